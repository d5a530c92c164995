//! Turning an operator-supplied draft into a [`CoordinatorConfig`].
//!
//! Backend capabilities are checked once, against whatever the backends report
//! at this moment. FH preset temperatures are pulled into the FH range here and
//! never again.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::{
    config::{AcPreset, CoordinatorConfig, FhPreset, DEFAULT_SELF_ECHO_WINDOW_MS, MAX_PRESETS},
    error::SetupError,
    types::{BackendRole, BackendState, HvacMode},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcPresetDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fan_mode: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FhPresetDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub temperature: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDraft {
    #[serde(default)]
    pub ac_id: String,
    #[serde(default)]
    pub fh_id: String,
    #[serde(default)]
    pub force_mode: bool,
    #[serde(default)]
    pub ac_presets: Vec<AcPresetDraft>,
    #[serde(default)]
    pub fh_presets: Vec<FhPresetDraft>,
    #[serde(default)]
    pub self_echo_window_ms: Option<u64>,
}

pub fn build_config(
    draft: &ConfigDraft,
    ac_state: Option<&BackendState>,
    fh_state: Option<&BackendState>,
) -> Result<CoordinatorConfig, SetupError> {
    let ac_id = draft.ac_id.trim();
    let fh_id = draft.fh_id.trim();

    if ac_id.is_empty() {
        return Err(SetupError::BackendRequired(BackendRole::Ac));
    }
    if fh_id.is_empty() {
        return Err(SetupError::BackendRequired(BackendRole::Fh));
    }
    if ac_id == fh_id {
        return Err(SetupError::SameBackend);
    }

    let ac_state = ac_state.ok_or_else(|| SetupError::BackendNotFound {
        role: BackendRole::Ac,
        id: ac_id.to_string(),
    })?;
    let fh_state = fh_state.ok_or_else(|| SetupError::BackendNotFound {
        role: BackendRole::Fh,
        id: fh_id.to_string(),
    })?;

    validate_ac_capabilities(ac_id, ac_state)?;
    validate_fh_capabilities(fh_id, fh_state)?;

    for (role, count) in [
        (BackendRole::Ac, draft.ac_presets.len()),
        (BackendRole::Fh, draft.fh_presets.len()),
    ] {
        if count > MAX_PRESETS {
            return Err(SetupError::TooManyPresets {
                role,
                count,
                max: MAX_PRESETS,
            });
        }
    }

    Ok(CoordinatorConfig {
        ac_id: Some(ac_id.to_string()),
        fh_id: Some(fh_id.to_string()),
        force_mode: draft.force_mode,
        ac_presets: build_ac_presets(&draft.ac_presets, ac_state),
        fh_presets: build_fh_presets(&draft.fh_presets, fh_state),
        self_echo_window_ms: draft
            .self_echo_window_ms
            .unwrap_or(DEFAULT_SELF_ECHO_WINDOW_MS),
    })
}

fn validate_ac_capabilities(ac_id: &str, state: &BackendState) -> Result<(), SetupError> {
    if state.fan_modes.is_empty() {
        return Err(SetupError::AcNoFanModes);
    }

    let supports = |mode: HvacMode| state.supports(mode);
    if !BackendRole::Ac.modes().iter().copied().any(supports) {
        return Err(SetupError::AcMissingModes);
    }

    if !supports(HvacMode::Cool) && !supports(HvacMode::Dry) && state.target_temperature.is_none()
    {
        warn!("AC entity {ac_id} may not support target temperature");
    }
    Ok(())
}

fn validate_fh_capabilities(fh_id: &str, state: &BackendState) -> Result<(), SetupError> {
    if !state.supports(HvacMode::Heat) {
        return Err(SetupError::FhNoHeatMode);
    }
    if state.target_temperature.is_none() {
        return Err(SetupError::FhNoTargetTemperature);
    }
    if state.min_temp.is_none() || state.max_temp.is_none() {
        warn!("FH entity {fh_id} missing temperature range attributes");
    }
    Ok(())
}

fn build_ac_presets(drafts: &[AcPresetDraft], ac_state: &BackendState) -> Vec<AcPreset> {
    drafts
        .iter()
        .filter_map(|draft| {
            let name = draft.name.trim();
            let fan_mode = draft.fan_mode.as_deref().map(str::trim).unwrap_or_default();
            if name.is_empty() || fan_mode.is_empty() {
                return None;
            }
            if !ac_state.fan_modes.iter().any(|mode| mode == fan_mode) {
                warn!("AC preset {name} uses fan mode {fan_mode} the AC does not report");
            }
            Some(AcPreset {
                name: name.to_string(),
                fan_mode: fan_mode.to_string(),
                icon: non_empty(draft.icon.as_deref()),
            })
        })
        .collect()
}

fn build_fh_presets(drafts: &[FhPresetDraft], fh_state: &BackendState) -> Vec<FhPreset> {
    drafts
        .iter()
        .filter_map(|draft| {
            let name = draft.name.trim();
            let raw = draft.temperature.as_deref().map(str::trim).unwrap_or_default();
            if name.is_empty() || raw.is_empty() {
                return None;
            }

            let value = match raw.parse::<f32>() {
                Ok(value) if value.is_finite() => value,
                _ => {
                    error!("invalid temperature value for FH preset {name}: {raw}");
                    return None;
                }
            };

            let clamped = clamp_to_range(value, fh_state.min_temp, fh_state.max_temp);
            if clamped != value {
                warn!("FH preset temperature {value} is outside the FH range, adjusting to {clamped}");
            }

            Some(FhPreset {
                name: name.to_string(),
                temperature: clamped.to_string(),
                icon: non_empty(draft.icon.as_deref()),
            })
        })
        .collect()
}

/// Pull `value` to the nearest bound; missing bounds do not constrain.
pub fn clamp_to_range(value: f32, min: Option<f32>, max: Option<f32>) -> f32 {
    let mut clamped = value;
    if let Some(min) = min {
        if clamped < min {
            clamped = min;
        }
    }
    if let Some(max) = max {
        if clamped > max {
            clamped = max;
        }
    }
    clamped
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Human-readable summary shown before a configuration is saved.
pub fn configuration_summary(config: &CoordinatorConfig) -> String {
    let mut summary = String::new();
    let _ = writeln!(
        summary,
        "AC: {}",
        config.ac_id.as_deref().unwrap_or("Not selected")
    );
    let _ = writeln!(
        summary,
        "FH: {}",
        config.fh_id.as_deref().unwrap_or("Not selected")
    );
    let _ = writeln!(
        summary,
        "Force mode: {}",
        if config.force_mode { "Enabled" } else { "Disabled" }
    );

    let _ = writeln!(summary, "AC presets:");
    if config.ac_presets.is_empty() {
        let _ = writeln!(summary, "  - No presets configured");
    }
    for preset in &config.ac_presets {
        let icon = preset.icon.as_deref().map(|i| format!("{i} ")).unwrap_or_default();
        let _ = writeln!(summary, "  - {icon}{}: {}", preset.name, preset.fan_mode);
    }

    let _ = writeln!(summary, "FH presets:");
    if config.fh_presets.is_empty() {
        let _ = writeln!(summary, "  - No presets configured");
    }
    for preset in &config.fh_presets {
        let icon = preset.icon.as_deref().map(|i| format!("{i} ")).unwrap_or_default();
        let _ = writeln!(summary, "  - {icon}{}: {}°C", preset.name, preset.temperature);
    }
    summary
}
