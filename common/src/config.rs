use serde::{Deserialize, Serialize};

use crate::types::BackendRole;

pub const MAX_PRESETS: usize = 4;
pub const DEFAULT_SELF_ECHO_WINDOW_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcPreset {
    pub name: String,
    pub fan_mode: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhPreset {
    pub name: String,
    /// Numeric string, already clamped into the FH range when the config was built.
    pub temperature: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub ac_id: Option<String>,
    #[serde(default)]
    pub fh_id: Option<String>,
    #[serde(default)]
    pub force_mode: bool,
    #[serde(default)]
    pub ac_presets: Vec<AcPreset>,
    #[serde(default)]
    pub fh_presets: Vec<FhPreset>,
    #[serde(default = "default_self_echo_window_ms")]
    pub self_echo_window_ms: u64,
}

fn default_self_echo_window_ms() -> u64 {
    DEFAULT_SELF_ECHO_WINDOW_MS
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ac_id: None,
            fh_id: None,
            force_mode: false,
            ac_presets: Vec::new(),
            fh_presets: Vec::new(),
            self_echo_window_ms: DEFAULT_SELF_ECHO_WINDOW_MS,
        }
    }
}

impl CoordinatorConfig {
    pub fn backend_id(&self, role: BackendRole) -> Option<&str> {
        match role {
            BackendRole::Ac => self.ac_id.as_deref(),
            BackendRole::Fh => self.fh_id.as_deref(),
        }
    }

    pub fn role_of(&self, backend_id: &str) -> Option<BackendRole> {
        BackendRole::ALL
            .into_iter()
            .find(|role| self.backend_id(*role) == Some(backend_id))
    }

    /// Configured backends in routing order (AC first).
    pub fn backends(&self) -> impl Iterator<Item = (BackendRole, &str)> {
        BackendRole::ALL
            .into_iter()
            .filter_map(|role| self.backend_id(role).map(|id| (role, id)))
    }

    pub fn ac_preset(&self, name: &str) -> Option<&AcPreset> {
        self.ac_presets.iter().find(|preset| preset.name == name)
    }

    pub fn fh_preset(&self, name: &str) -> Option<&FhPreset> {
        self.fh_presets.iter().find(|preset| preset.name == name)
    }

    pub fn preset_names(&self, role: BackendRole) -> Vec<String> {
        match role {
            BackendRole::Ac => self.ac_presets.iter().map(|p| p.name.clone()).collect(),
            BackendRole::Fh => self.fh_presets.iter().map(|p| p.name.clone()).collect(),
        }
    }

    pub fn sanitize(&mut self) {
        for id in [&mut self.ac_id, &mut self.fh_id] {
            if id.as_deref().is_some_and(|value| value.trim().is_empty()) {
                *id = None;
            }
        }
        if self.ac_id.is_some() && self.ac_id == self.fh_id {
            self.fh_id = None;
        }

        self.ac_presets
            .retain(|preset| !preset.name.is_empty() && !preset.fan_mode.is_empty());
        self.fh_presets.retain(|preset| {
            !preset.name.is_empty() && preset.temperature.trim().parse::<f32>().is_ok()
        });
        self.ac_presets.truncate(MAX_PRESETS);
        self.fh_presets.truncate(MAX_PRESETS);

        self.self_echo_window_ms = self.self_echo_window_ms.clamp(100, 60_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_http_port() -> u16 {
    8080
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            network: NetworkConfig::default(),
            http_port: default_http_port(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.coordinator.sanitize();
        if self.network.mqtt_port == 0 {
            self.network.mqtt_port = 1883;
        }
        if self.http_port == 0 {
            self.http_port = default_http_port();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ac(name: &str, fan_mode: &str) -> AcPreset {
        AcPreset {
            name: name.to_string(),
            fan_mode: fan_mode.to_string(),
            icon: None,
        }
    }

    #[test]
    fn resolves_roles_by_backend_id() {
        let config = CoordinatorConfig {
            ac_id: Some("climate.ac".to_string()),
            fh_id: Some("climate.floor".to_string()),
            ..CoordinatorConfig::default()
        };

        assert_eq!(config.role_of("climate.ac"), Some(BackendRole::Ac));
        assert_eq!(config.role_of("climate.floor"), Some(BackendRole::Fh));
        assert_eq!(config.role_of("climate.other"), None);
        assert_eq!(config.backends().count(), 2);
    }

    #[test]
    fn sanitize_drops_incomplete_presets_and_caps_slots() {
        let mut config = CoordinatorConfig {
            ac_id: Some("climate.ac".to_string()),
            fh_id: Some("climate.ac".to_string()),
            ac_presets: vec![
                ac("auto", "auto"),
                ac("", "low"),
                ac("quiet", ""),
                ac("low", "low"),
                ac("mid", "medium"),
                ac("high", "high"),
                ac("turbo", "turbo"),
            ],
            fh_presets: vec![FhPreset {
                name: "away".to_string(),
                temperature: "warm".to_string(),
                icon: None,
            }],
            self_echo_window_ms: 0,
            ..CoordinatorConfig::default()
        };

        config.sanitize();

        assert_eq!(config.fh_id, None);
        assert_eq!(
            config.preset_names(BackendRole::Ac),
            vec!["auto", "low", "mid", "high"]
        );
        assert!(config.fh_presets.is_empty());
        assert_eq!(config.self_echo_window_ms, 100);
    }

    #[test]
    fn missing_window_defaults_to_two_seconds() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"ac_id":"climate.ac","force_mode":true}"#).unwrap();

        assert_eq!(config.self_echo_window_ms, 2_000);
        assert!(config.force_mode);
        assert_eq!(config.fh_id, None);
    }
}
