//! The logical climate endpoint.
//!
//! A [`Coordinator`] owns the [`LogicalState`] and routes every mutation of it
//! to whichever backend owns the requested mode. Backend change notifications
//! are classified by the [`LoopGuard`] and then either mirrored onto the
//! logical state or, with `force_mode`, corrected back to match it.

use std::{collections::BTreeSet, sync::Arc};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    config::CoordinatorConfig,
    error::CoordinatorError,
    loop_guard::{CorrectionFlags, LoopGuard, UpdateReason},
    port::{BackendChange, BackendPort},
    types::{BackendRole, CoordinatorStatus, HvacMode, LogicalState},
};

mod enforcer;
mod preset;
mod router;
mod sync;

pub use preset::PresetOutcome;

/// What the coordinator did with a backend change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    UnknownBackend,
    SuppressedCorrecting,
    SelfEcho,
    InactiveBackend,
    Synced,
    Consistent,
    Corrected,
}

pub struct Coordinator<P> {
    config: CoordinatorConfig,
    port: P,
    clock: Arc<dyn Clock>,
    state: LogicalState,
    guard: LoopGuard,
    subscriptions: BTreeSet<String>,
    status_tx: watch::Sender<CoordinatorStatus>,
}

impl<P: BackendPort> Coordinator<P> {
    pub fn new(config: CoordinatorConfig, port: P, clock: Arc<dyn Clock>) -> Self {
        let guard = LoopGuard::new(
            config.self_echo_window_ms,
            config.backends().map(|(_, id)| id),
        );
        let state = LogicalState::default();
        let initial = CoordinatorStatus {
            mode: state.mode,
            target_temperature: None,
            current_temperature: None,
            preset: None,
            preset_modes: Vec::new(),
            force_mode: config.force_mode,
            ac_backend: config.ac_id.clone(),
            fh_backend: config.fh_id.clone(),
            active_backend: None,
            ac_correcting: false,
            fh_correcting: false,
            subscription_count: 0,
            published_at_epoch: Utc::now().timestamp(),
        };
        let (status_tx, _) = watch::channel(initial);

        Self {
            config,
            port,
            clock,
            state,
            guard,
            subscriptions: BTreeSet::new(),
            status_tx,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn state(&self) -> &LogicalState {
        &self.state
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn loop_guard(&self) -> &LoopGuard {
        &self.guard
    }

    pub fn correction_flags(&self) -> CorrectionFlags {
        self.guard.correction_flags()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// The status as of the last publish. Failed operations do not publish.
    pub fn status(&self) -> CoordinatorStatus {
        self.status_tx.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status_tx.subscribe()
    }

    /// Preset names offered for the active backend; none while OFF.
    pub fn preset_modes(&self) -> Vec<String> {
        self.state
            .active_backend()
            .map(|role| self.config.preset_names(role))
            .unwrap_or_default()
    }

    pub async fn attach(&mut self) -> Result<(), CoordinatorError> {
        let backends: Vec<String> = self
            .config
            .backends()
            .map(|(_, id)| id.to_string())
            .collect();

        for backend_id in backends {
            self.port
                .subscribe(&backend_id)
                .await
                .map_err(|err| CoordinatorError::command(&backend_id, err))?;
            debug!("setup state listener for {backend_id}");
            self.subscriptions.insert(backend_id);
        }

        if self.subscriptions.is_empty() {
            warn!("no backends configured; the logical endpoint stays idle");
        } else {
            info!(
                "state change listeners initialized for {} backends",
                self.subscriptions.len()
            );
        }
        self.publish();
        Ok(())
    }

    pub async fn detach(&mut self) {
        for backend_id in std::mem::take(&mut self.subscriptions) {
            if let Err(err) = self.port.unsubscribe(&backend_id).await {
                warn!("failed to remove state listener for {backend_id}: {err}");
                continue;
            }
            debug!("removed state listener for {backend_id}");
        }
        self.guard.clear();
        info!("state change listeners cleaned up");
        self.publish();
    }

    pub async fn handle_backend_change(
        &mut self,
        change: &BackendChange,
    ) -> Result<ChangeOutcome, CoordinatorError> {
        let backend_id = change.backend_id.as_str();
        let Some(role) = self.config.role_of(backend_id) else {
            return Ok(ChangeOutcome::UnknownBackend);
        };

        self.observe_current_temperature(role, change.new.current_temperature);

        if self.guard.is_correcting(backend_id) {
            debug!("ignoring state change from {backend_id} - correction already in progress");
            return Ok(ChangeOutcome::SuppressedCorrecting);
        }

        if self.guard.is_self_echo(backend_id, change.observed_at_ms) {
            debug!("ignoring state change from {backend_id} - recent internal update detected");
            return Ok(ChangeOutcome::SelfEcho);
        }

        info!(
            "external modification detected on {backend_id}: {} -> {}",
            change
                .old
                .as_ref()
                .map(|old| old.mode.as_str())
                .unwrap_or("none"),
            change.new.mode
        );

        if self.config.force_mode {
            self.enforce_consistency(role, backend_id, &change.new)
                .await
                .inspect_err(|err| {
                    error!("force mode enforcement failed for {backend_id}: {err}");
                })
        } else {
            Ok(self.sync_from_backend(role, &change.new))
        }
    }

    /// Room temperature is read-only data; it follows the active backend even
    /// for notifications that are otherwise ignored.
    fn observe_current_temperature(&mut self, role: BackendRole, reported: Option<f32>) {
        if self.state.active_backend() != Some(role) {
            return;
        }
        let Some(temperature) = reported else {
            return;
        };
        if self.state.current_temperature != Some(temperature) {
            self.state.current_temperature = Some(temperature);
            self.publish();
        }
    }

    fn publish(&mut self) {
        let status = CoordinatorStatus {
            mode: self.state.mode,
            target_temperature: self.state.target_temperature,
            current_temperature: self.state.current_temperature,
            preset: self.state.preset.clone(),
            preset_modes: self.preset_modes(),
            force_mode: self.config.force_mode,
            ac_backend: self.config.ac_id.clone(),
            fh_backend: self.config.fh_id.clone(),
            active_backend: self.state.active_backend(),
            ac_correcting: self.is_role_correcting(BackendRole::Ac),
            fh_correcting: self.is_role_correcting(BackendRole::Fh),
            subscription_count: self.subscriptions.len(),
            published_at_epoch: Utc::now().timestamp(),
        };
        self.status_tx.send_replace(status);
    }

    fn is_role_correcting(&self, role: BackendRole) -> bool {
        self.config
            .backend_id(role)
            .is_some_and(|id| self.guard.is_correcting(id))
    }

    fn backend_id(&self, role: BackendRole) -> Result<String, CoordinatorError> {
        self.config
            .backend_id(role)
            .map(str::to_string)
            .ok_or(CoordinatorError::Configuration { role })
    }

    async fn issue_mode(
        &mut self,
        backend_id: &str,
        mode: HvacMode,
        reason: UpdateReason,
    ) -> Result<(), CoordinatorError> {
        self.guard.record(backend_id, reason, self.clock.now_ms());
        self.port
            .set_mode(backend_id, mode)
            .await
            .map_err(|err| CoordinatorError::command(backend_id, err))
    }

    async fn issue_temperature(
        &mut self,
        backend_id: &str,
        value: f32,
        reason: UpdateReason,
    ) -> Result<(), CoordinatorError> {
        self.guard.record(backend_id, reason, self.clock.now_ms());
        self.port
            .set_temperature(backend_id, value)
            .await
            .map_err(|err| CoordinatorError::command(backend_id, err))
    }

    async fn issue_fan_mode(
        &mut self,
        backend_id: &str,
        fan_mode: &str,
        reason: UpdateReason,
    ) -> Result<(), CoordinatorError> {
        self.guard.record(backend_id, reason, self.clock.now_ms());
        self.port
            .set_fan_mode(backend_id, fan_mode)
            .await
            .map_err(|err| CoordinatorError::command(backend_id, err))
    }
}
