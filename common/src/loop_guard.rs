//! Self-echo suppression for backend change notifications.
//!
//! Two guards decide whether a notification was caused by this coordinator:
//! a per-backend ledger of the last command time (anything observed inside
//! the window is treated as an echo), and a per-backend correction flag that
//! suppresses every notification while a corrective sequence is in flight.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    TurnOffBeforeSwitch,
    RouteToBackend,
    SetTemperature,
    ApplyPreset,
    ForceCorrection,
}

impl UpdateReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnOffBeforeSwitch => "turn_off_before_mode_switch",
            Self::RouteToBackend => "route_to_backend",
            Self::SetTemperature => "set_temperature",
            Self::ApplyPreset => "apply_preset",
            Self::ForceCorrection => "force_mode_correction",
        }
    }
}

/// Shared view of the correction-in-flight flags.
///
/// The set of backends is fixed when the guard is built; unknown ids are never
/// reported as correcting.
#[derive(Debug, Clone)]
pub struct CorrectionFlags {
    flags: Arc<HashMap<String, AtomicBool>>,
}

impl CorrectionFlags {
    fn new<'a>(backend_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let flags = backend_ids
            .into_iter()
            .map(|id| (id.to_string(), AtomicBool::new(false)))
            .collect();
        Self {
            flags: Arc::new(flags),
        }
    }

    pub fn is_correcting(&self, backend_id: &str) -> bool {
        self.flags
            .get(backend_id)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn set(&self, backend_id: &str, value: bool) {
        if let Some(flag) = self.flags.get(backend_id) {
            flag.store(value, Ordering::SeqCst);
        }
    }

    fn clear_all(&self) {
        for flag in self.flags.values() {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

/// Keeps a backend's correction flag raised until dropped.
#[must_use = "the correction flag is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct CorrectionGuard {
    flags: CorrectionFlags,
    backend_id: String,
}

impl Drop for CorrectionGuard {
    fn drop(&mut self) {
        self.flags.set(&self.backend_id, false);
        debug!("correction finished for {}", self.backend_id);
    }
}

#[derive(Debug)]
pub struct LoopGuard {
    window_ms: u64,
    last_internal_update: HashMap<String, u64>,
    correcting: CorrectionFlags,
}

impl LoopGuard {
    pub fn new<'a>(window_ms: u64, backend_ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            window_ms,
            last_internal_update: HashMap::new(),
            correcting: CorrectionFlags::new(backend_ids),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn record(&mut self, backend_id: &str, reason: UpdateReason, now_ms: u64) {
        self.last_internal_update
            .insert(backend_id.to_string(), now_ms);
        debug!(
            "recorded internal update for {backend_id} (context: {}, time: {now_ms})",
            reason.as_str()
        );
    }

    pub fn last_internal_update(&self, backend_id: &str) -> Option<u64> {
        self.last_internal_update.get(backend_id).copied()
    }

    pub fn is_self_echo(&self, backend_id: &str, observed_at_ms: u64) -> bool {
        self.last_internal_update
            .get(backend_id)
            .map(|last| observed_at_ms.saturating_sub(*last) < self.window_ms)
            .unwrap_or(false)
    }

    pub fn is_correcting(&self, backend_id: &str) -> bool {
        self.correcting.is_correcting(backend_id)
    }

    pub fn begin_correction(&self, backend_id: &str) -> CorrectionGuard {
        self.correcting.set(backend_id, true);
        debug!("correction started for {backend_id}");
        CorrectionGuard {
            flags: self.correcting.clone(),
            backend_id: backend_id.to_string(),
        }
    }

    pub fn end_correction(&self, backend_id: &str) {
        self.correcting.set(backend_id, false);
    }

    pub fn correction_flags(&self) -> CorrectionFlags {
        self.correcting.clone()
    }

    /// Forget every recorded update and release all flags.
    pub fn clear(&mut self) {
        self.last_internal_update.clear();
        self.correcting.clear_all();
    }
}
