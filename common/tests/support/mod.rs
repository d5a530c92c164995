//! In-memory backend port for coordinator tests.
//!
//! Commands are applied to a stored snapshot per backend and recorded in
//! order, so tests can assert on the exact command history.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use room_hvac_common::{
    AcPreset, BackendChange, BackendError, BackendPort, BackendState, CoordinatorConfig, FhPreset,
    HvacMode,
};

pub const AC: &str = "climate.ac";
pub const FH: &str = "climate.floor";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Mode(String, HvacMode),
    Temperature(String, f32),
    FanMode(String, String),
    Subscribe(String),
    Unsubscribe(String),
}

#[derive(Default)]
struct Inner {
    states: HashMap<String, BackendState>,
    calls: Vec<Call>,
    failing: HashSet<String>,
}

/// Clones share the same backends and history.
#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Mutex<Inner>>,
}

#[allow(dead_code)]
impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// AC in OFF reporting 24 target / 26 room, FH in OFF reporting 21 / 19.
    pub fn room() -> Self {
        let backend = Self::new();
        backend.put_state(AC, ac_state());
        backend.put_state(FH, fh_state());
        backend
    }

    pub fn put_state(&self, backend_id: &str, state: BackendState) {
        self.lock().states.insert(backend_id.to_string(), state);
    }

    pub fn state(&self, backend_id: &str) -> Option<BackendState> {
        self.lock().states.get(backend_id).cloned()
    }

    /// Simulate an actor outside the coordinator changing a backend. Returns
    /// the notification the host would deliver.
    pub fn external_change(
        &self,
        backend_id: &str,
        observed_at_ms: u64,
        change: impl FnOnce(&mut BackendState),
    ) -> BackendChange {
        let mut inner = self.lock();
        let old = inner.states.get(backend_id).cloned();
        let mut new = old.clone().unwrap_or_else(|| BackendState::new(HvacMode::Off));
        change(&mut new);
        inner.states.insert(backend_id.to_string(), new.clone());
        BackendChange {
            backend_id: backend_id.to_string(),
            old,
            new,
            observed_at_ms,
        }
    }

    /// Every later command to `backend_id` is rejected.
    pub fn fail_commands(&self, backend_id: &str) {
        self.lock().failing.insert(backend_id.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls minus subscription bookkeeping.
    pub fn commands(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::Subscribe(_) | Call::Unsubscribe(_)))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// No two backends may ever be in a non-OFF mode together.
    pub fn active_backends(&self) -> usize {
        self.lock()
            .states
            .values()
            .filter(|state| state.mode != HvacMode::Off)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("fake backend lock poisoned")
    }

    fn command(
        &self,
        backend_id: &str,
        call: Call,
        apply: impl FnOnce(&mut BackendState),
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(call);
        if inner.failing.contains(backend_id) {
            return Err(BackendError::Rejected(format!("{backend_id} refused")));
        }
        let state = inner
            .states
            .entry(backend_id.to_string())
            .or_insert_with(|| BackendState::new(HvacMode::Off));
        apply(state);
        Ok(())
    }
}

#[async_trait]
impl BackendPort for FakeBackend {
    async fn set_mode(&self, backend_id: &str, mode: HvacMode) -> Result<(), BackendError> {
        self.command(backend_id, Call::Mode(backend_id.to_string(), mode), |state| {
            state.mode = mode.into();
        })
    }

    async fn set_temperature(&self, backend_id: &str, value: f32) -> Result<(), BackendError> {
        self.command(
            backend_id,
            Call::Temperature(backend_id.to_string(), value),
            |state| state.target_temperature = Some(value),
        )
    }

    async fn set_fan_mode(&self, backend_id: &str, fan_mode: &str) -> Result<(), BackendError> {
        self.command(
            backend_id,
            Call::FanMode(backend_id.to_string(), fan_mode.to_string()),
            |state| state.fan_mode = Some(fan_mode.to_string()),
        )
    }

    fn read_state(&self, backend_id: &str) -> Option<BackendState> {
        self.state(backend_id)
    }

    async fn subscribe(&self, backend_id: &str) -> Result<(), BackendError> {
        self.lock()
            .calls
            .push(Call::Subscribe(backend_id.to_string()));
        Ok(())
    }

    async fn unsubscribe(&self, backend_id: &str) -> Result<(), BackendError> {
        self.lock()
            .calls
            .push(Call::Unsubscribe(backend_id.to_string()));
        Ok(())
    }
}

pub fn ac_state() -> BackendState {
    BackendState {
        current_temperature: Some(26.0),
        target_temperature: Some(24.0),
        fan_mode: Some("auto".to_string()),
        fan_modes: vec!["auto".to_string(), "low".to_string(), "high".to_string()],
        hvac_modes: [HvacMode::Off, HvacMode::Cool, HvacMode::Dry, HvacMode::FanOnly]
            .map(Into::into)
            .to_vec(),
        ..BackendState::new(HvacMode::Off)
    }
}

pub fn fh_state() -> BackendState {
    BackendState {
        current_temperature: Some(19.0),
        target_temperature: Some(21.0),
        hvac_modes: [HvacMode::Off, HvacMode::Heat].map(Into::into).to_vec(),
        min_temp: Some(5.0),
        max_temp: Some(30.0),
        ..BackendState::new(HvacMode::Off)
    }
}

pub fn config(force_mode: bool) -> CoordinatorConfig {
    CoordinatorConfig {
        ac_id: Some(AC.to_string()),
        fh_id: Some(FH.to_string()),
        force_mode,
        ac_presets: vec![AcPreset {
            name: "turbo".to_string(),
            fan_mode: "high".to_string(),
            icon: None,
        }],
        fh_presets: vec![
            FhPreset {
                name: "comfort".to_string(),
                temperature: "22.5".to_string(),
                icon: None,
            },
            FhPreset {
                name: "broken".to_string(),
                temperature: "warm".to_string(),
                icon: None,
            },
        ],
        ..CoordinatorConfig::default()
    }
}
