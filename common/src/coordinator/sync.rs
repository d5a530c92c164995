use tracing::{debug, info, warn};

use super::{ChangeOutcome, Coordinator};
use crate::{
    port::BackendPort,
    types::{BackendRole, BackendState, HvacMode},
};

impl<P: BackendPort> Coordinator<P> {
    /// Mirror the active backend's reported state onto the logical endpoint.
    /// Never issues commands.
    pub(super) fn sync_from_backend(
        &mut self,
        role: BackendRole,
        observed: &BackendState,
    ) -> ChangeOutcome {
        if self.state.active_backend() != Some(role) {
            debug!("{role} backend is not active, skipping sync");
            return ChangeOutcome::InactiveBackend;
        }

        match observed.mode.known() {
            Some(mode) if mode != self.state.mode => {
                info!("syncing hvac mode from {} to {mode}", self.state.mode);
                self.state.mode = mode;
            }
            Some(_) => {}
            None => warn!(
                "{role} reports mode {} with no logical counterpart, keeping {}",
                observed.mode, self.state.mode
            ),
        }

        if let Some(current) = observed.current_temperature {
            self.state.current_temperature = Some(current);
        }

        // fan_only has no temperature semantics
        if self.state.mode != HvacMode::FanOnly {
            if let Some(target) = observed.target_temperature {
                self.state.target_temperature = Some(target);
            }
        }

        if let Some(preset) = &observed.preset {
            self.state.preset = Some(preset.clone());
        }

        self.publish();
        ChangeOutcome::Synced
    }
}
