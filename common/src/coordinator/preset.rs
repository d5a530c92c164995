use tracing::{error, info, warn};

use super::Coordinator;
use crate::{
    error::CoordinatorError,
    loop_guard::UpdateReason,
    port::BackendPort,
    types::BackendRole,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetOutcome {
    Applied,
    /// The name is not in the active backend's preset table. Nothing changed.
    NotFound,
}

impl<P: BackendPort> Coordinator<P> {
    pub async fn set_preset(&mut self, name: &str) -> Result<PresetOutcome, CoordinatorError> {
        info!("setting preset mode to {name}");

        let outcome = match self.state.active_backend() {
            None => {
                warn!("cannot set preset mode {name} when hvac mode is off");
                return Err(CoordinatorError::InvalidState {
                    operation: "set_preset",
                    mode: self.state.mode,
                });
            }
            Some(BackendRole::Ac) => self.apply_ac_preset(name).await?,
            Some(BackendRole::Fh) => self.apply_fh_preset(name).await?,
        };

        self.publish();

        if self.config.force_mode {
            self.validate_all_backends().await?;
        }
        Ok(outcome)
    }

    async fn apply_ac_preset(&mut self, name: &str) -> Result<PresetOutcome, CoordinatorError> {
        let Some(fan_mode) = self
            .config
            .ac_preset(name)
            .map(|preset| preset.fan_mode.clone())
        else {
            warn!("preset {name} not found in AC presets");
            return Ok(PresetOutcome::NotFound);
        };

        // nothing to send; the preset is not adopted either
        if fan_mode.is_empty() {
            return Ok(PresetOutcome::Applied);
        }

        let backend_id = self.backend_id(BackendRole::Ac)?;
        self.issue_fan_mode(&backend_id, &fan_mode, UpdateReason::ApplyPreset)
            .await
            .inspect_err(|err| error!("failed to apply AC preset {name}: {err}"))?;
        self.state.preset = Some(name.to_string());
        info!("applied AC preset {name} with fan_mode {fan_mode}");
        Ok(PresetOutcome::Applied)
    }

    /// The preset temperature was clamped when the config was built; it is
    /// sent as-is here.
    async fn apply_fh_preset(&mut self, name: &str) -> Result<PresetOutcome, CoordinatorError> {
        let Some(raw) = self
            .config
            .fh_preset(name)
            .map(|preset| preset.temperature.clone())
        else {
            warn!("preset {name} not found in FH presets");
            return Ok(PresetOutcome::NotFound);
        };

        let temperature = match raw.trim().parse::<f32>() {
            Ok(value) => value,
            Err(source) => {
                error!("invalid temperature in preset {name}: {source}");
                return Err(CoordinatorError::InvalidPresetValue {
                    name: name.to_string(),
                    value: raw,
                    source,
                });
            }
        };

        let backend_id = self.backend_id(BackendRole::Fh)?;
        self.issue_temperature(&backend_id, temperature, UpdateReason::ApplyPreset)
            .await
            .inspect_err(|err| error!("failed to apply FH preset {name}: {err}"))?;
        self.state.preset = Some(name.to_string());
        self.state.target_temperature = Some(temperature);
        info!("applied FH preset {name} with temperature {temperature}");
        Ok(PresetOutcome::Applied)
    }
}
