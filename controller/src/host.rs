use std::{
    collections::{BTreeMap, HashMap},
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{
        mpsc::{self, error::TrySendError},
        watch, Mutex,
    },
};
use tracing::{debug, info, warn};

use room_hvac_common::{
    backend_id_from_state_topic, build_config, config::NetworkConfig, configuration_summary,
    BackendChange, BackendPort, BackendState, Clock, ConfigDraft, Coordinator, CoordinatorConfig,
    CoordinatorError, CoordinatorStatus, CorrectionFlags, HvacMode, MonotonicClock,
    PresetOutcome, RuntimeConfig, TOPIC_BACKEND_STATE_WILDCARD, TOPIC_CMD_MODE, TOPIC_CMD_PRESET,
    TOPIC_CMD_TARGET, TOPIC_CONTROLLER_STATE, TOPIC_CONTROLLER_STATUS,
};

use crate::backend::MqttBackend;

#[derive(Clone)]
struct AppState {
    coordinator: Arc<Mutex<Coordinator<MqttBackend>>>,
    status: watch::Receiver<CoordinatorStatus>,
    flags: CorrectionFlags,
    backend: MqttBackend,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct BackendsView {
    backends: BTreeMap<String, BackendState>,
}

#[derive(Debug, Serialize)]
struct NetworkConfigView {
    #[serde(rename = "mqttHost")]
    mqtt_host: String,
    #[serde(rename = "mqttPort")]
    mqtt_port: u16,
    #[serde(rename = "mqttUser")]
    mqtt_user: String,
    #[serde(rename = "mqttPassSet")]
    mqtt_pass_set: bool,
}

#[derive(Debug, Serialize)]
struct ConfigView {
    coordinator: CoordinatorConfig,
    summary: String,
    network: NetworkConfigView,
    #[serde(rename = "httpPort")]
    http_port: u16,
}

#[derive(Debug, Serialize)]
struct ConfigUpdateResponse {
    #[serde(rename = "restartRequired")]
    restart_required: bool,
    summary: String,
    coordinator: CoordinatorConfig,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 2048;
const STATE_PUBLISH_INTERVAL: Duration = Duration::from_secs(10);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("room-hvac-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock);
    let backend = MqttBackend::new(mqtt.clone(), clock.clone());
    let coordinator = Coordinator::new(runtime.coordinator.clone(), backend.clone(), clock);

    let app_state = AppState {
        status: coordinator.status_receiver(),
        flags: coordinator.correction_flags(),
        coordinator: Arc::new(Mutex::new(coordinator)),
        backend,
        mqtt,
        store,
    };

    let (event_tx, event_rx) = mpsc::channel(64);

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop, event_tx);
    app_state
        .coordinator
        .lock()
        .await
        .attach()
        .await
        .context("failed to attach to backends")?;
    spawn_event_pump(app_state.clone(), event_rx);
    spawn_state_publish_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/target", post(handle_set_target))
        .route("/api/preset", post(handle_set_preset))
        .route("/api/backends", get(handle_get_backends))
        .route("/api/config", get(handle_get_config).put(handle_put_config))
        .with_state(app_state.clone());

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state.coordinator.lock().await.detach().await;
    info!("controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
    }
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_BACKEND_STATE_WILDCARD,
        TOPIC_CMD_MODE,
        TOPIC_CMD_TARGET,
        TOPIC_CMD_PRESET,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtLeastOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(
    app_state: AppState,
    mut eventloop: rumqttc::EventLoop,
    events: mpsc::Sender<HostEvent>,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) = handle_mqtt_message(
                        &app_state,
                        &events,
                        message.topic,
                        message.payload.to_vec(),
                    ) {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Work for the coordinator, queued by the MQTT loop.
#[derive(Debug)]
enum HostEvent {
    Backend(BackendChange),
    Mode(HvacMode),
    Target(f32),
    Preset(String),
}

/// Applies queued events to the coordinator one at a time, off the MQTT loop,
/// so commands issued while handling an event can still be flushed.
fn spawn_event_pump(app_state: AppState, mut events: mpsc::Receiver<HostEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let HostEvent::Backend(change) = &event {
                if app_state.flags.is_correcting(&change.backend_id) {
                    debug!(
                        "dropping state change from {} during correction",
                        change.backend_id
                    );
                    continue;
                }
            }

            let mut coordinator = app_state.coordinator.lock().await;
            let result = match &event {
                HostEvent::Backend(change) => coordinator
                    .handle_backend_change(change)
                    .await
                    .map(|outcome| {
                        debug!("state change from {}: {outcome:?}", change.backend_id);
                    }),
                HostEvent::Mode(mode) => coordinator.set_mode(*mode).await,
                HostEvent::Target(target) => coordinator.set_temperature(*target).await,
                HostEvent::Preset(name) => coordinator.set_preset(name).await.map(|outcome| {
                    if outcome == PresetOutcome::NotFound {
                        warn!("preset command {name} ignored in the current mode");
                    }
                }),
            };
            drop(coordinator);

            if let Err(err) = result {
                warn!("{event:?} failed: {:#}", anyhow::Error::new(err));
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut status = app_state.status.clone();
        let mut interval = tokio::time::interval(STATE_PUBLISH_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let snapshot = status.borrow_and_update().clone();
            publish_json(
                &app_state.mqtt,
                TOPIC_CONTROLLER_STATE,
                &snapshot.state_payload(),
            )
            .await;
            publish_json(&app_state.mqtt, TOPIC_CONTROLLER_STATUS, &snapshot).await;
        }
    });
}

async fn publish_json<T: Serialize>(mqtt: &AsyncClient, topic: &str, value: &T) {
    match serde_json::to_vec(value) {
        Ok(body) => {
            if let Err(err) = mqtt.publish(topic, QoS::AtLeastOnce, true, body).await {
                warn!("{topic} publish failed: {err}");
            }
        }
        Err(err) => warn!("{topic} serialization failed: {err}"),
    }
}

fn handle_mqtt_message(
    app_state: &AppState,
    events: &mpsc::Sender<HostEvent>,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let event = if let Some(backend_id) = backend_id_from_state_topic(&topic) {
        let change = app_state
            .backend
            .ingest(backend_id, &payload)
            .with_context(|| format!("invalid state report from {backend_id}"))?;
        match change {
            Some(change) => HostEvent::Backend(change),
            None => return Ok(()),
        }
    } else {
        let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
        let message = message.trim();

        match topic.as_str() {
            TOPIC_CMD_MODE => HostEvent::Mode(message.parse::<HvacMode>()?),
            TOPIC_CMD_TARGET => match message.parse::<f32>() {
                Ok(target) if target.is_finite() => HostEvent::Target(target),
                _ => {
                    warn!("ignoring invalid target temperature {message}");
                    return Ok(());
                }
            },
            TOPIC_CMD_PRESET if !message.is_empty() => HostEvent::Preset(message.to_string()),
            _ => return Ok(()),
        }
    };

    queue_event(events, event)
}

/// Hand an event to the pump without waiting. The pump publishes through the
/// same client this loop drives, so the poller must never block on it.
fn queue_event(events: &mpsc::Sender<HostEvent>, event: HostEvent) -> anyhow::Result<()> {
    match events.try_send(event) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(event)) => {
            warn!("coordinator event queue full, dropping {event:?}");
            Ok(())
        }
        Err(TrySendError::Closed(_)) => anyhow::bail!("coordinator event pump stopped"),
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    Json(status)
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(mode) = value.parse::<HvacMode>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid mode. Use 'off', 'cool', 'dry', 'fan_only' or 'heat'",
        );
    };

    let result = state.coordinator.lock().await.set_mode(mode).await;
    if let Err(err) = result {
        return coordinator_error_response(err);
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_target(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(target) = value.parse::<f32>().ok().filter(|value| value.is_finite()) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    let result = state.coordinator.lock().await.set_temperature(target).await;
    if let Err(err) = result {
        return coordinator_error_response(err);
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_preset(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(name) = params.get("value").map(|value| value.trim()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    let result = state.coordinator.lock().await.set_preset(name).await;
    match result {
        Ok(PresetOutcome::Applied) => handle_get_status(State(state)).await.into_response(),
        Ok(PresetOutcome::NotFound) => error_response(
            StatusCode::NOT_FOUND,
            "Preset not available in the current mode",
        ),
        Err(err) => coordinator_error_response(err),
    }
}

async fn handle_get_backends(State(state): State<AppState>) -> impl IntoResponse {
    Json(BackendsView {
        backends: state.backend.snapshots(),
    })
}

async fn handle_get_config(State(state): State<AppState>) -> impl IntoResponse {
    let runtime = state
        .store
        .load_runtime_config()
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config from store: {err:#}");
            RuntimeConfig::default()
        });

    Json(ConfigView {
        summary: configuration_summary(&runtime.coordinator),
        network: build_network_config_view(&runtime.network),
        http_port: runtime.http_port,
        coordinator: runtime.coordinator,
    })
}

async fn handle_put_config(
    State(state): State<AppState>,
    Json(draft): Json<ConfigDraft>,
) -> impl IntoResponse {
    let ac_state = state.backend.read_state(draft.ac_id.trim());
    let fh_state = state.backend.read_state(draft.fh_id.trim());
    let config = match build_config(&draft, ac_state.as_ref(), fh_state.as_ref()) {
        Ok(config) => config,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let mut runtime = state
        .store
        .load_runtime_config()
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load existing runtime config for update: {err:#}");
            RuntimeConfig::default()
        });

    let previous = std::mem::replace(&mut runtime.coordinator, config);
    runtime.sanitize();

    if let Err(err) = state.store.save_runtime_config(&runtime).await {
        warn!("failed to persist coordinator config update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist coordinator settings",
        );
    }

    let summary = configuration_summary(&runtime.coordinator);
    info!("coordinator configuration saved:\n{summary}");
    Json(ConfigUpdateResponse {
        restart_required: previous != runtime.coordinator,
        summary,
        coordinator: runtime.coordinator,
    })
    .into_response()
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("ROOM_HVAC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.room_hvac"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

fn build_network_config_view(network: &NetworkConfig) -> NetworkConfigView {
    NetworkConfigView {
        mqtt_host: network.mqtt_host.clone(),
        mqtt_port: network.mqtt_port,
        mqtt_user: network.mqtt_user.clone(),
        mqtt_pass_set: !network.mqtt_pass.is_empty(),
    }
}

fn coordinator_error_status(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::Configuration { .. } | CoordinatorError::InvalidPresetValue { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        CoordinatorError::BackendCommand { .. } => StatusCode::BAD_GATEWAY,
        CoordinatorError::InvalidState { .. } => StatusCode::CONFLICT,
    }
}

fn coordinator_error_response(err: CoordinatorError) -> axum::response::Response {
    let status = coordinator_error_status(&err);
    let message = format!("{:#}", anyhow::Error::new(err));
    warn!("request failed: {message}");
    error_response(status, &message)
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
