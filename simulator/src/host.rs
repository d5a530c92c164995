use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tracing::{debug, info, warn};

use room_hvac_common::{
    backend_command_topic, backend_id_from_command_topic, backend_state_topic, BackendCommand,
    BackendState, HvacMode,
};

const DRIFT_INTERVAL: Duration = Duration::from_secs(30);
const DRIFT_STEP: f32 = 0.1;
const AMBIENT_TEMPERATURE: f32 = 22.0;

/// An in-memory climate device that behaves like a real AC or floor heater.
#[derive(Debug, Clone)]
struct SimulatedBackend {
    id: String,
    state: BackendState,
}

impl SimulatedBackend {
    fn air_conditioner(id: String) -> Self {
        Self {
            id,
            state: BackendState {
                current_temperature: Some(26.0),
                target_temperature: Some(24.0),
                fan_mode: Some("auto".to_string()),
                fan_modes: ["auto", "low", "medium", "high"]
                    .map(str::to_string)
                    .to_vec(),
                hvac_modes: [HvacMode::Off, HvacMode::Cool, HvacMode::Dry, HvacMode::FanOnly]
                    .map(Into::into)
                    .to_vec(),
                min_temp: Some(16.0),
                max_temp: Some(30.0),
                ..BackendState::new(HvacMode::Off)
            },
        }
    }

    fn floor_heating(id: String) -> Self {
        Self {
            id,
            state: BackendState {
                current_temperature: Some(19.0),
                target_temperature: Some(21.0),
                hvac_modes: [HvacMode::Off, HvacMode::Heat].map(Into::into).to_vec(),
                min_temp: Some(5.0),
                max_temp: Some(30.0),
                ..BackendState::new(HvacMode::Off)
            },
        }
    }

    /// Returns whether the reported state changed.
    fn apply(&mut self, command: BackendCommand) -> bool {
        match command {
            BackendCommand::Mode { mode } => {
                if !self.state.supports(mode) {
                    warn!("{} does not support mode {mode}", self.id);
                    return false;
                }
                replace(&mut self.state.mode, mode.into())
            }
            BackendCommand::Temperature { value } => {
                if !value.is_finite() {
                    warn!("{} ignoring non-finite temperature", self.id);
                    return false;
                }
                let mut value = value;
                if let Some(min) = self.state.min_temp {
                    value = value.max(min);
                }
                if let Some(max) = self.state.max_temp {
                    value = value.min(max);
                }
                replace(&mut self.state.target_temperature, Some(value))
            }
            BackendCommand::FanMode { fan_mode } => {
                if !self.state.fan_modes.contains(&fan_mode) {
                    warn!("{} does not support fan mode {fan_mode}", self.id);
                    return false;
                }
                replace(&mut self.state.fan_mode, Some(fan_mode))
            }
        }
    }

    /// Move the room temperature one step toward the setpoint while running,
    /// or toward ambient while off.
    fn drift(&mut self) -> bool {
        let Some(current) = self.state.current_temperature else {
            return false;
        };
        let goal = match (self.state.mode.known(), self.state.target_temperature) {
            (None | Some(HvacMode::Off | HvacMode::FanOnly), _) | (_, None) => AMBIENT_TEMPERATURE,
            (_, Some(target)) => target,
        };

        let delta = goal - current;
        if delta.abs() < DRIFT_STEP / 2.0 {
            return false;
        }
        let next = current + delta.clamp(-DRIFT_STEP, DRIFT_STEP);
        self.state.current_temperature = Some((next * 10.0).round() / 10.0);
        true
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("room-hvac-simulator", mqtt_host, mqtt_port);

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    let ac_id = std::env::var("SIM_AC_ID").unwrap_or_else(|_| "climate.ac".to_string());
    let fh_id = std::env::var("SIM_FH_ID").unwrap_or_else(|_| "climate.floor".to_string());
    let mut backends = vec![
        SimulatedBackend::air_conditioner(ac_id),
        SimulatedBackend::floor_heating(fh_id),
    ];

    for backend in &backends {
        mqtt.subscribe(backend_command_topic(&backend.id), QoS::AtLeastOnce)
            .await
            .with_context(|| format!("failed to subscribe for {}", backend.id))?;
    }

    info!("simulator started with {} backends", backends.len());

    let mut interval = tokio::time::interval(DRIFT_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for backend in backends.iter_mut() {
                    if backend.drift() {
                        publish_state(&mqtt, backend).await?;
                    }
                }
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("simulator mqtt connected");
                    for backend in &backends {
                        publish_state(&mqtt, backend).await?;
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    let Some(backend) = backend_id_from_command_topic(&message.topic)
                        .and_then(|id| backends.iter_mut().find(|backend| backend.id == id))
                    else {
                        continue;
                    };
                    match serde_json::from_slice::<BackendCommand>(&message.payload) {
                        Ok(command) => {
                            debug!("{} received {command:?}", backend.id);
                            if backend.apply(command) {
                                publish_state(&mqtt, backend).await?;
                            }
                        }
                        Err(err) => warn!("invalid command for {}: {err}", backend.id),
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("simulator mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            },
        }
    }
}

async fn publish_state(mqtt: &AsyncClient, backend: &SimulatedBackend) -> anyhow::Result<()> {
    let body = serde_json::to_vec(&backend.state)?;
    mqtt.publish(backend_state_topic(&backend.id), QoS::AtLeastOnce, true, body)
        .await
        .with_context(|| format!("failed to publish state for {}", backend.id))
}
