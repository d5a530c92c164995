use std::num::ParseFloatError;

use thiserror::Error;

use crate::types::{BackendRole, HvacMode};

/// Failure reported by a backend port implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend `{0}` is unavailable")]
    Unavailable(String),
    #[error("backend rejected the command: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("{role} backend is not configured")]
    Configuration { role: BackendRole },

    #[error("command to backend `{backend_id}` failed")]
    BackendCommand {
        backend_id: String,
        #[source]
        source: BackendError,
    },

    #[error("{operation} is not available while the hvac mode is {mode}")]
    InvalidState {
        operation: &'static str,
        mode: HvacMode,
    },

    #[error("preset `{name}` has an invalid temperature `{value}`")]
    InvalidPresetValue {
        name: String,
        value: String,
        #[source]
        source: ParseFloatError,
    },
}

impl CoordinatorError {
    pub(crate) fn command(backend_id: &str, source: BackendError) -> Self {
        Self::BackendCommand {
            backend_id: backend_id.to_string(),
            source,
        }
    }
}

/// Rejections raised while turning an operator's draft into a [`crate::CoordinatorConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("{0} backend id is required")]
    BackendRequired(BackendRole),
    #[error("AC and FH must be different backends")]
    SameBackend,
    #[error("{role} backend `{id}` has not reported any state")]
    BackendNotFound { role: BackendRole, id: String },
    #[error("AC backend does not report any fan modes")]
    AcNoFanModes,
    #[error("AC backend supports none of cool, dry or fan_only")]
    AcMissingModes,
    #[error("FH backend does not support heat")]
    FhNoHeatMode,
    #[error("FH backend does not report a target temperature")]
    FhNoTargetTemperature,
    #[error("{role} has {count} presets, at most {max} are allowed")]
    TooManyPresets {
        role: BackendRole,
        count: usize,
        max: usize,
    },
}
