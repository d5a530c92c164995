use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use tracing::debug;

use room_hvac_common::{
    backend_command_topic, BackendChange, BackendCommand, BackendError, BackendPort, BackendState,
    Clock, HvacMode,
};

/// Backends reached over MQTT.
///
/// Every backend publishes its state as retained JSON; the latest snapshot of
/// each is cached here whether or not a coordinator listens to it. Commands
/// are fire-and-forget publishes: a command counts as accepted once the MQTT
/// client has queued it.
#[derive(Clone)]
pub struct MqttBackend {
    mqtt: AsyncClient,
    clock: Arc<dyn Clock>,
    snapshots: Arc<RwLock<HashMap<String, BackendState>>>,
    listening: Arc<RwLock<HashSet<String>>>,
}

impl MqttBackend {
    pub fn new(mqtt: AsyncClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            mqtt,
            clock,
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            listening: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Cache a state report. Returns a change notification when the report
    /// differs from the cached one and the backend is subscribed.
    pub fn ingest(
        &self,
        backend_id: &str,
        payload: &[u8],
    ) -> Result<Option<BackendChange>, serde_json::Error> {
        let new = serde_json::from_slice::<BackendState>(payload)?;
        let observed_at_ms = self.clock.now_ms();

        let old = self
            .snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(backend_id.to_string(), new.clone());

        if old.as_ref() == Some(&new) {
            return Ok(None);
        }
        if !self.is_listening(backend_id) {
            debug!("cached state for unsubscribed backend {backend_id}");
            return Ok(None);
        }

        Ok(Some(BackendChange {
            backend_id: backend_id.to_string(),
            old,
            new,
            observed_at_ms,
        }))
    }

    pub fn snapshots(&self) -> BTreeMap<String, BackendState> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect()
    }

    fn is_listening(&self, backend_id: &str) -> bool {
        self.listening
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(backend_id)
    }

    async fn send(&self, backend_id: &str, command: BackendCommand) -> Result<(), BackendError> {
        let body = serde_json::to_vec(&command)
            .map_err(|err| BackendError::Rejected(err.to_string()))?;
        self.mqtt
            .publish(backend_command_topic(backend_id), QoS::AtLeastOnce, false, body)
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        debug!("sent {command:?} to {backend_id}");
        Ok(())
    }
}

#[async_trait]
impl BackendPort for MqttBackend {
    async fn set_mode(&self, backend_id: &str, mode: HvacMode) -> Result<(), BackendError> {
        self.send(backend_id, BackendCommand::Mode { mode }).await
    }

    async fn set_temperature(&self, backend_id: &str, value: f32) -> Result<(), BackendError> {
        self.send(backend_id, BackendCommand::Temperature { value })
            .await
    }

    async fn set_fan_mode(&self, backend_id: &str, fan_mode: &str) -> Result<(), BackendError> {
        self.send(
            backend_id,
            BackendCommand::FanMode {
                fan_mode: fan_mode.to_string(),
            },
        )
        .await
    }

    fn read_state(&self, backend_id: &str) -> Option<BackendState> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(backend_id)
            .cloned()
    }

    async fn subscribe(&self, backend_id: &str) -> Result<(), BackendError> {
        self.listening
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(backend_id.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, backend_id: &str) -> Result<(), BackendError> {
        self.listening
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(backend_id);
        Ok(())
    }
}
