use tracing::{debug, error, info, warn};

use super::{ChangeOutcome, Coordinator};
use crate::{
    error::CoordinatorError,
    loop_guard::UpdateReason,
    port::BackendPort,
    types::{BackendRole, BackendState, HvacMode},
};

impl<P: BackendPort> Coordinator<P> {
    /// The mode `role` should be in: the logical mode if it owns it, OFF otherwise.
    pub fn expected_mode_for(&self, role: BackendRole) -> HvacMode {
        if self.state.mode.owner() == Some(role) {
            self.state.mode
        } else {
            HvacMode::Off
        }
    }

    pub fn expected_temperature_for(&self, role: BackendRole) -> Option<f32> {
        if self.expected_mode_for(role).has_temperature() {
            self.state.target_temperature
        } else {
            None
        }
    }

    pub(super) async fn enforce_consistency(
        &mut self,
        role: BackendRole,
        backend_id: &str,
        observed: &BackendState,
    ) -> Result<ChangeOutcome, CoordinatorError> {
        let expected_mode = self.expected_mode_for(role);
        let expected_temperature = self.expected_temperature_for(role);

        let mut inconsistencies = Vec::new();
        if observed.mode != expected_mode {
            inconsistencies.push(format!(
                "HVAC mode mismatch: expected {expected_mode}, got {}",
                observed.mode
            ));
        }
        if let (Some(expected), Some(actual)) = (expected_temperature, observed.target_temperature)
        {
            if (expected - actual).abs() > f32::EPSILON {
                inconsistencies.push(format!(
                    "Temperature mismatch: expected {expected}, got {actual}"
                ));
            }
        }

        if inconsistencies.is_empty() {
            debug!("force mode consistency check passed for {backend_id}");
            return Ok(ChangeOutcome::Consistent);
        }

        warn!(
            "force mode inconsistency detected on {backend_id}: {}",
            inconsistencies.join("; ")
        );
        self.correct(backend_id, expected_mode, expected_temperature)
            .await?;
        Ok(ChangeOutcome::Corrected)
    }

    /// Check every configured backend against the logical state and correct
    /// any that drifted. This is the only pass that looks at the backend that
    /// did not trigger the change.
    pub async fn validate_all_backends(&mut self) -> Result<(), CoordinatorError> {
        let backends: Vec<(BackendRole, String)> = self
            .config
            .backends()
            .map(|(role, id)| (role, id.to_string()))
            .collect();

        for (role, backend_id) in backends {
            let Some(snapshot) = self.port.read_state(&backend_id) else {
                continue;
            };

            let expected_mode = self.expected_mode_for(role);
            if snapshot.mode == expected_mode {
                continue;
            }

            warn!(
                "force mode: {role} state inconsistency after change - expected {expected_mode}, got {}",
                snapshot.mode
            );
            let expected_temperature = self.expected_temperature_for(role);
            self.correct(&backend_id, expected_mode, expected_temperature)
                .await?;
        }
        Ok(())
    }

    async fn correct(
        &mut self,
        backend_id: &str,
        expected_mode: HvacMode,
        expected_temperature: Option<f32>,
    ) -> Result<(), CoordinatorError> {
        let _correction = self.guard.begin_correction(backend_id);
        info!(
            "force mode: correcting {backend_id} to mode={expected_mode}, temp={expected_temperature:?}"
        );

        let result = self
            .apply_correction(backend_id, expected_mode, expected_temperature)
            .await;
        match &result {
            Ok(()) => info!("force mode correction successful for {backend_id}"),
            Err(err) => error!("force mode correction FAILED for {backend_id}: {err}"),
        }
        result
    }

    async fn apply_correction(
        &mut self,
        backend_id: &str,
        expected_mode: HvacMode,
        expected_temperature: Option<f32>,
    ) -> Result<(), CoordinatorError> {
        self.issue_mode(backend_id, expected_mode, UpdateReason::ForceCorrection)
            .await?;

        if expected_mode != HvacMode::FanOnly {
            if let Some(temperature) = expected_temperature {
                self.issue_temperature(backend_id, temperature, UpdateReason::ForceCorrection)
                    .await?;
            }
        }
        Ok(())
    }
}
