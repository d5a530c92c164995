use tracing::{debug, error, info};

use super::Coordinator;
use crate::{
    error::CoordinatorError,
    loop_guard::UpdateReason,
    port::BackendPort,
    types::{BackendRole, HvacMode},
};

impl<P: BackendPort> Coordinator<P> {
    /// Switch the logical endpoint to `requested`.
    ///
    /// The active backend is always turned off first, even when `requested`
    /// is the current mode, so re-requesting a mode re-sends the on command.
    pub async fn set_mode(&mut self, requested: HvacMode) -> Result<(), CoordinatorError> {
        info!("setting hvac mode to {requested}");

        if self.state.mode != HvacMode::Off {
            self.turn_off_active_backend().await?;
        }

        self.state.mode = requested;

        match requested.owner() {
            Some(role) => self.route_to(role, requested).await?,
            None => {
                self.state.target_temperature = None;
                self.state.current_temperature = None;
                self.state.preset = None;
                info!("all backends turned off");
            }
        }

        self.refresh_from_active_backend();
        self.publish();

        if self.config.force_mode {
            self.validate_all_backends().await?;
        }
        Ok(())
    }

    pub async fn set_temperature(&mut self, value: f32) -> Result<(), CoordinatorError> {
        if self.state.mode == HvacMode::FanOnly {
            info!("ignoring temperature set in fan_only mode");
            return Ok(());
        }

        if let Some(role) = self.state.active_backend() {
            let backend_id = self.backend_id(role)?;
            self.issue_temperature(&backend_id, value, UpdateReason::SetTemperature)
                .await
                .inspect_err(|err| error!("failed to set {role} temperature: {err}"))?;
            self.state.target_temperature = Some(value);
            info!("set {role} temperature to {value}");
        }

        self.publish();

        if self.config.force_mode {
            self.validate_all_backends().await?;
        }
        Ok(())
    }

    async fn turn_off_active_backend(&mut self) -> Result<(), CoordinatorError> {
        let Some(role) = self.state.active_backend() else {
            return Ok(());
        };
        let Some(backend_id) = self.config.backend_id(role).map(str::to_string) else {
            return Ok(());
        };

        self.issue_mode(&backend_id, HvacMode::Off, UpdateReason::TurnOffBeforeSwitch)
            .await
            .inspect_err(|err| error!("failed to turn off {role} {backend_id}: {err}"))?;
        info!("turned off {role} device: {backend_id}");
        Ok(())
    }

    async fn route_to(&mut self, role: BackendRole, mode: HvacMode) -> Result<(), CoordinatorError> {
        let backend_id = self
            .backend_id(role)
            .inspect_err(|_| error!("{role} backend not configured"))?;

        self.issue_mode(&backend_id, mode, UpdateReason::RouteToBackend)
            .await
            .inspect_err(|err| error!("failed to route to {role} {backend_id}: {err}"))?;
        info!("routed to {role} with mode {mode}: {backend_id}");
        Ok(())
    }

    /// Pull temperatures from the newly active backend, keeping a setpoint the
    /// operator already chose.
    fn refresh_from_active_backend(&mut self) {
        let Some(role) = self.state.active_backend() else {
            return;
        };
        let Some(snapshot) = self
            .config
            .backend_id(role)
            .and_then(|id| self.port.read_state(id))
        else {
            return;
        };

        if self.state.target_temperature.is_none() {
            self.state.target_temperature = snapshot.target_temperature;
        }
        if snapshot.current_temperature.is_some() {
            self.state.current_temperature = snapshot.current_temperature;
        }
        debug!(
            "updated {role} target temp: {:?}",
            self.state.target_temperature
        );
    }
}
