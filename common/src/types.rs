use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Off,
    Cool,
    Dry,
    FanOnly,
    Heat,
}

impl HvacMode {
    pub const ALL: [HvacMode; 5] = [
        Self::Off,
        Self::Cool,
        Self::Dry,
        Self::FanOnly,
        Self::Heat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Cool => "cool",
            Self::Dry => "dry",
            Self::FanOnly => "fan_only",
            Self::Heat => "heat",
        }
    }

    /// The backend that has to be running for this mode, `None` for OFF.
    pub fn owner(self) -> Option<BackendRole> {
        match self {
            Self::Off => None,
            Self::Cool | Self::Dry | Self::FanOnly => Some(BackendRole::Ac),
            Self::Heat => Some(BackendRole::Fh),
        }
    }

    /// Modes where a target temperature means something. FAN_ONLY and OFF carry none.
    pub fn has_temperature(self) -> bool {
        matches!(self, Self::Cool | Self::Dry | Self::Heat)
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown hvac mode `{0}`")]
pub struct UnknownMode(pub String);

impl FromStr for HvacMode {
    type Err = UnknownMode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lower = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == lower)
            .ok_or(UnknownMode(lower))
    }
}

/// A mode as a backend reports it. Real devices expose modes the logical
/// endpoint never routes to (`auto`, `heat_cool`); those are kept verbatim
/// instead of failing the whole report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportedMode {
    Known(HvacMode),
    Other(String),
}

impl ReportedMode {
    pub fn known(&self) -> Option<HvacMode> {
        match self {
            Self::Known(mode) => Some(*mode),
            Self::Other(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(mode) => mode.as_str(),
            Self::Other(raw) => raw,
        }
    }
}

impl From<HvacMode> for ReportedMode {
    fn from(mode: HvacMode) -> Self {
        Self::Known(mode)
    }
}

impl PartialEq<HvacMode> for ReportedMode {
    fn eq(&self, other: &HvacMode) -> bool {
        self.known() == Some(*other)
    }
}

impl fmt::Display for ReportedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendRole {
    #[serde(rename = "AC")]
    Ac,
    #[serde(rename = "FH")]
    Fh,
}

impl BackendRole {
    pub const ALL: [BackendRole; 2] = [Self::Ac, Self::Fh];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ac => "AC",
            Self::Fh => "FH",
        }
    }

    pub fn modes(self) -> &'static [HvacMode] {
        match self {
            Self::Ac => &[HvacMode::Cool, HvacMode::Dry, HvacMode::FanOnly],
            Self::Fh => &[HvacMode::Heat],
        }
    }
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of what a physical backend reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendState {
    pub mode: ReportedMode,
    #[serde(default)]
    pub current_temperature: Option<f32>,
    #[serde(default, rename = "temperature")]
    pub target_temperature: Option<f32>,
    #[serde(default)]
    pub fan_mode: Option<String>,
    #[serde(default)]
    pub fan_modes: Vec<String>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub hvac_modes: Vec<ReportedMode>,
    #[serde(default)]
    pub min_temp: Option<f32>,
    #[serde(default)]
    pub max_temp: Option<f32>,
}

impl BackendState {
    pub fn new(mode: HvacMode) -> Self {
        Self {
            mode: mode.into(),
            current_temperature: None,
            target_temperature: None,
            fan_mode: None,
            fan_modes: Vec::new(),
            preset: None,
            hvac_modes: Vec::new(),
            min_temp: None,
            max_temp: None,
        }
    }

    pub fn supports(&self, mode: HvacMode) -> bool {
        self.hvac_modes.iter().any(|supported| *supported == mode)
    }
}

/// Wire form of a command sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum BackendCommand {
    Mode { mode: HvacMode },
    Temperature { value: f32 },
    FanMode { fan_mode: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalState {
    pub mode: HvacMode,
    pub target_temperature: Option<f32>,
    pub current_temperature: Option<f32>,
    pub preset: Option<String>,
}

impl Default for LogicalState {
    fn default() -> Self {
        Self {
            mode: HvacMode::Off,
            target_temperature: None,
            current_temperature: None,
            preset: None,
        }
    }
}

impl LogicalState {
    pub fn active_backend(&self) -> Option<BackendRole> {
        self.mode.owner()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorStatus {
    pub mode: HvacMode,
    #[serde(rename = "targetTemp")]
    pub target_temperature: Option<f32>,
    #[serde(rename = "currentTemp")]
    pub current_temperature: Option<f32>,
    pub preset: Option<String>,
    #[serde(rename = "presetModes")]
    pub preset_modes: Vec<String>,
    #[serde(rename = "forceMode")]
    pub force_mode: bool,
    #[serde(rename = "acBackend")]
    pub ac_backend: Option<String>,
    #[serde(rename = "fhBackend")]
    pub fh_backend: Option<String>,
    #[serde(rename = "activeBackend")]
    pub active_backend: Option<BackendRole>,
    #[serde(rename = "acCorrecting")]
    pub ac_correcting: bool,
    #[serde(rename = "fhCorrecting")]
    pub fh_correcting: bool,
    #[serde(rename = "subscriptionCount")]
    pub subscription_count: usize,
    #[serde(rename = "publishedAtEpoch")]
    pub published_at_epoch: i64,
}

impl CoordinatorStatus {
    pub fn state_payload(&self) -> StatePayload {
        StatePayload {
            mode: self.mode,
            target: self.target_temperature,
            temp: self.current_temperature,
            preset: self.preset.clone(),
            active: self.active_backend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatePayload {
    pub mode: HvacMode,
    pub target: Option<f32>,
    pub temp: Option<f32>,
    pub preset: Option<String>,
    pub active: Option<BackendRole>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_route_to_exactly_one_owner() {
        for role in BackendRole::ALL {
            for mode in role.modes() {
                assert_eq!(mode.owner(), Some(role));
            }
        }
        assert_eq!(HvacMode::Off.owner(), None);
    }

    #[test]
    fn parses_modes_case_insensitively() {
        assert_eq!("FAN_ONLY".parse::<HvacMode>(), Ok(HvacMode::FanOnly));
        assert_eq!(" heat ".parse::<HvacMode>(), Ok(HvacMode::Heat));
        let err = "Auto".parse::<HvacMode>().unwrap_err();
        assert_eq!(err, UnknownMode("auto".to_string()));
        assert_eq!(err.to_string(), "unknown hvac mode `auto`");
    }

    #[test]
    fn backend_state_reads_temperature_attribute() {
        let state: BackendState =
            serde_json::from_str(r#"{"mode":"cool","temperature":24.0,"current_temperature":26.5}"#)
                .unwrap();

        assert_eq!(state.mode, HvacMode::Cool);
        assert_eq!(state.target_temperature, Some(24.0));
        assert_eq!(state.current_temperature, Some(26.5));
        assert!(state.fan_modes.is_empty());
    }

    #[test]
    fn backend_state_keeps_modes_outside_the_logical_set() {
        let state: BackendState = serde_json::from_str(
            r#"{"mode":"heat_cool","hvac_modes":["off","auto","cool","heat_cool"]}"#,
        )
        .unwrap();

        assert_eq!(state.mode, ReportedMode::Other("heat_cool".to_string()));
        assert_ne!(state.mode, HvacMode::Heat);
        assert!(state.supports(HvacMode::Cool));
        assert!(!state.supports(HvacMode::Dry));
        assert_eq!(state.hvac_modes[1].as_str(), "auto");
    }

    #[test]
    fn commands_are_tagged_on_the_wire() {
        let json = serde_json::to_string(&BackendCommand::Mode {
            mode: HvacMode::FanOnly,
        })
        .unwrap();
        assert_eq!(json, r#"{"command":"mode","mode":"fan_only"}"#);

        let parsed: BackendCommand =
            serde_json::from_str(r#"{"command":"fan_mode","fan_mode":"low"}"#).unwrap();
        assert_eq!(
            parsed,
            BackendCommand::FanMode {
                fan_mode: "low".to_string()
            }
        );
    }
}
