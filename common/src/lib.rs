pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod loop_guard;
pub mod port;
pub mod setup;
pub mod topics;
pub mod types;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{AcPreset, CoordinatorConfig, FhPreset, NetworkConfig, RuntimeConfig};
pub use coordinator::{ChangeOutcome, Coordinator, PresetOutcome};
pub use error::{BackendError, CoordinatorError, SetupError};
pub use loop_guard::{CorrectionFlags, LoopGuard, UpdateReason};
pub use port::{BackendChange, BackendPort};
pub use setup::{build_config, configuration_summary, ConfigDraft};
pub use topics::*;
pub use types::{
    BackendCommand, BackendRole, BackendState, CoordinatorStatus, HvacMode, LogicalState,
    ReportedMode, StatePayload,
};
