use std::{io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use futures_util::StreamExt;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use lantern_common::{
    config::{NotificationConfig, TimezoneConfig},
    ArtifactKind, ChannelStatus, ConfigError, ConfigStore, Configuration, DutyChange,
    DutyChangePayload, PersistError, Persister, ScheduleEngine, SunTimeTable, SystemStatus,
    UploadError, UploadReceiver, TOPIC_DUTY_CHANGES, TOPIC_SYSTEM_EVENTS,
};

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<ConfigStore<FileStore>>>,
    engine: Arc<Mutex<ScheduleEngine>>,
    uploads: Arc<Mutex<UploadReceiver>>,
    mqtt: Option<AsyncClient>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct UploadAccepted {
    artifact: &'static str,
    version: String,
    bytes: usize,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    timezone: String,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
    #[serde(rename = "localTime")]
    local_time: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let files = FileStore::new();
    let config = files.load_config().unwrap_or_else(|err| {
        warn!("failed to load configuration from store: {err:#}");
        Configuration::default()
    });
    let sun = files.load_sun_times().unwrap_or_else(|err| {
        warn!("failed to load sun-time table from store: {err:#}");
        SunTimeTable::default()
    });
    info!(
        "loaded configuration {} with {} channel(s), sun-time table {} with {} day(s)",
        config.version,
        config.channels.len(),
        sun.version,
        sun.len()
    );

    let notifications = config.notifications.clone();
    let mqtt = connect_mqtt(&notifications);
    if let Some(client) = &mqtt {
        publish_startup_event(client).await;
    }

    let app_state = AppState {
        store: Arc::new(Mutex::new(ConfigStore::new(config, sun, files))),
        engine: Arc::new(Mutex::new(ScheduleEngine::new())),
        uploads: Arc::new(Mutex::new(UploadReceiver::default())),
        mqtt,
    };

    spawn_schedule_loop(app_state.clone());

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/config", get(handle_get_config))
        .route("/api/config/upload", post(handle_config_upload))
        .route("/api/suntimes", get(handle_get_sun_times))
        .route("/api/suntimes/upload", post(handle_sun_times_upload))
        .route("/api/time", get(handle_get_time))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let port = std::env::var("LANTERN_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

fn spawn_schedule_loop(app_state: AppState) {
    tokio::spawn(async move {
        loop {
            let (config, sun) = {
                let store = app_state.store.lock().await;
                (store.active(), store.sun_times())
            };
            let now = now_in_timezone(&config.timezone);

            let result = {
                let mut engine = app_state.engine.lock().await;
                engine.tick(now, &config, &sun)
            };

            match result {
                Ok(changes) => {
                    if !changes.is_empty() {
                        apply_duty_changes(&app_state, &config.notifications, changes).await;
                    }
                }
                Err(err) => {
                    warn!("window resolution failed: {err}; holding last-applied duty cycles");
                    if config.notifications.notify_on_errors {
                        publish_error_event(&app_state, &err.to_string()).await;
                    }
                }
            }

            // Cadence comes from the active config, so a committed upload
            // changes it on the next iteration without a restart.
            tokio::time::sleep(Duration::from_secs(config.system.update_interval.max(1))).await;
        }
    });
}

/// Forwards change events to the PWM collaborator and the MQTT sink. The
/// hardware transport hooks in here; the host build logs the application.
async fn apply_duty_changes(
    app_state: &AppState,
    notifications: &NotificationConfig,
    changes: Vec<DutyChange>,
) {
    for change in changes {
        info!(
            "channel {}: duty {}% -> {}% (window {})",
            change.channel,
            change.previous.map_or_else(|| "-".to_string(), |d| d.to_string()),
            change.duty_cycle,
            change.window.as_deref().unwrap_or("held"),
        );

        let Some(mqtt) = &app_state.mqtt else {
            continue;
        };
        if !notifications.notify_on_window_change {
            continue;
        }

        let payload = DutyChangePayload {
            channel: change.channel.clone(),
            window: change.window.clone(),
            duty_cycle: change.duty_cycle,
            previous: change.previous,
            timestamp: change.at.timestamp(),
        };
        match serde_json::to_vec(&payload) {
            Ok(body) => {
                if let Err(err) = mqtt
                    .publish(TOPIC_DUTY_CHANGES, QoS::AtLeastOnce, false, body)
                    .await
                {
                    warn!("duty change publish failed: {err}");
                }
            }
            Err(err) => warn!("duty change serialization failed: {err}"),
        }
    }
}

fn connect_mqtt(notifications: &NotificationConfig) -> Option<AsyncClient> {
    if !notifications.enabled {
        return None;
    }

    let options = MqttOptions::new(
        notifications.mqtt_client_id.clone(),
        notifications.mqtt_broker.clone(),
        notifications.mqtt_port,
    );
    let (client, eventloop) = AsyncClient::new(options, 64);
    spawn_mqtt_loop(eventloop);
    Some(client)
}

fn spawn_mqtt_loop(mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
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

async fn publish_startup_event(mqtt: &AsyncClient) {
    let body = serde_json::json!({
        "event": "system_startup",
        "timestamp": Utc::now().timestamp(),
    });
    if let Err(err) = mqtt
        .publish(TOPIC_SYSTEM_EVENTS, QoS::AtLeastOnce, false, body.to_string())
        .await
    {
        warn!("startup event publish failed: {err}");
    }
}

async fn publish_error_event(app_state: &AppState, message: &str) {
    let Some(mqtt) = &app_state.mqtt else {
        return;
    };
    let body = serde_json::json!({
        "event": "scheduler_error",
        "message": message,
        "timestamp": Utc::now().timestamp(),
    });
    if let Err(err) = mqtt
        .publish(TOPIC_SYSTEM_EVENTS, QoS::AtLeastOnce, false, body.to_string())
        .await
    {
        warn!("error event publish failed: {err}");
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let (config, sun) = {
        let store = state.store.lock().await;
        (store.active(), store.sun_times())
    };
    let applied = state.engine.lock().await.applied().clone();
    let now = now_in_timezone(&config.timezone);

    let channels = config
        .channels
        .iter()
        .map(|channel| {
            let state = applied.get(&channel.name);
            ChannelStatus {
                name: channel.name.clone(),
                gpio_pin: channel.gpio_pin,
                enabled: channel.enabled,
                duty_cycle: state.map(|applied| applied.duty_cycle),
                active_window: state.and_then(|applied| applied.window.clone()),
            }
        })
        .collect();

    Json(SystemStatus {
        version: config.version.clone(),
        web_title: config.system.web_title.clone(),
        timezone: config.timezone.name.clone(),
        now_epoch: now.timestamp(),
        local_time: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        update_interval: config.system.update_interval,
        sun_times_version: sun.version.clone(),
        sun_times_entries: sun.len(),
        channels,
    })
}

async fn handle_get_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.store.lock().await.active();
    Json((*config).clone())
}

async fn handle_get_sun_times(State(state): State<AppState>) -> impl IntoResponse {
    let sun = state.store.lock().await.sun_times();
    Json((*sun).clone())
}

async fn handle_get_time(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.store.lock().await.active();
    let now = now_in_timezone(&config.timezone);
    Json(TimeStatus {
        timezone: config.timezone.name.clone(),
        now_epoch: now.timestamp(),
        local_time: now.format("%Y-%m-%d %H:%M:%S").to_string(),
    })
}

async fn handle_config_upload(
    State(state): State<AppState>,
    body: Body,
) -> axum::response::Response {
    receive_upload(state, ArtifactKind::Config, body).await
}

async fn handle_sun_times_upload(
    State(state): State<AppState>,
    body: Body,
) -> axum::response::Response {
    receive_upload(state, ArtifactKind::SunTimes, body).await
}

/// Accumulates the request body chunk-by-chunk through the bounded upload
/// receiver, then stages and commits the assembled buffer. A disconnect or
/// ceiling violation abandons the session and leaves the active document
/// untouched.
async fn receive_upload(
    app_state: AppState,
    kind: ArtifactKind,
    body: Body,
) -> axum::response::Response {
    let mut session = match app_state.uploads.lock().await.begin(kind) {
        Ok(session) => session,
        Err(err) => return error_response(StatusCode::CONFLICT, &err.to_string()),
    };

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                app_state.uploads.lock().await.abandon(session);
                warn!("{kind} upload aborted mid-stream: {err}");
                return error_response(StatusCode::BAD_REQUEST, "upload interrupted");
            }
        };
        if let Err(err) = session.append(&chunk) {
            app_state.uploads.lock().await.abandon(session);
            let status = match err {
                UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                UploadError::SessionBusy(_) => StatusCode::CONFLICT,
            };
            return error_response(status, &err.to_string());
        }
    }

    let bytes = app_state.uploads.lock().await.finish(session);
    let received = bytes.len();

    let result = {
        let mut store = app_state.store.lock().await;
        store
            .stage(&bytes, kind)
            .and_then(|staged| store.commit(staged))
    };

    match result {
        Ok(()) => {
            let version = {
                let store = app_state.store.lock().await;
                match kind {
                    ArtifactKind::Config => store.active().version.clone(),
                    ArtifactKind::SunTimes => store.sun_times().version.clone(),
                }
            };
            info!("committed {kind} {version} ({received} bytes)");
            (
                StatusCode::OK,
                Json(UploadAccepted {
                    artifact: kind.as_str(),
                    version,
                    bytes: received,
                }),
            )
                .into_response()
        }
        Err(err) => {
            warn!("{kind} upload rejected: {err}");
            config_error_response(&err)
        }
    }
}

fn config_error_response(err: &ConfigError) -> axum::response::Response {
    let status = match err {
        ConfigError::Parse(_) | ConfigError::Version(_) => StatusCode::BAD_REQUEST,
        ConfigError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ConfigError::IncompatibleVersion { .. } => StatusCode::CONFLICT,
        ConfigError::ConfigCorrupt(_) => StatusCode::SERVICE_UNAVAILABLE,
        ConfigError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &err.to_string())
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

fn now_in_timezone(timezone: &TimezoneConfig) -> DateTime<FixedOffset> {
    if let Ok(tz) = timezone.name.parse::<Tz>() {
        let local = Utc::now().with_timezone(&tz);
        return local.with_timezone(&local.offset().fix());
    }
    let seconds = (timezone.offset * 3600.0) as i32;
    let offset = FixedOffset::east_opt(seconds).unwrap_or_else(|| Utc.fix());
    Utc::now().with_timezone(&offset)
}

struct FileStore {
    config_path: PathBuf,
    sun_path: PathBuf,
}

impl FileStore {
    fn new() -> Self {
        let data_dir = std::env::var("LANTERN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.lantern"));

        Self {
            config_path: data_dir.join("config.json"),
            sun_path: data_dir.join("sun_times.json"),
        }
    }

    fn path_for(&self, kind: ArtifactKind) -> &PathBuf {
        match kind {
            ArtifactKind::Config => &self.config_path,
            ArtifactKind::SunTimes => &self.sun_path,
        }
    }

    /// Loads and validates the on-disk configuration. Only validated
    /// documents may become active; a document that fails validation is an
    /// error the caller handles by falling back to the default.
    fn load_config(&self) -> anyhow::Result<Configuration> {
        match std::fs::read(&self.config_path) {
            Ok(raw) => {
                let mut config: Configuration = serde_json::from_slice(&raw)?;
                config.validate()?;
                Ok(config)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Configuration::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn load_sun_times(&self) -> anyhow::Result<SunTimeTable> {
        match std::fs::read(&self.sun_path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(SunTimeTable::default()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Persister for FileStore {
    fn persist(&mut self, kind: ArtifactKind, bytes: &[u8]) -> Result<(), PersistError> {
        let path = self.path_for(kind);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| PersistError(err.to_string()))?;
        }
        std::fs::write(path, bytes).map_err(|err| PersistError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store(tag: &str) -> FileStore {
        let dir = std::env::temp_dir().join(format!("lantern-{tag}-{}", std::process::id()));
        FileStore {
            config_path: dir.join("config.json"),
            sun_path: dir.join("sun_times.json"),
        }
    }

    fn config_json(duty: i32, pin: u8) -> String {
        format!(
            r#"{{
                "version": "1.0.0",
                "wifi": {{"ssid": "garden", "password": "hunter2"}},
                "hardware": {{"rtc_i2c_sda_pin": 20, "rtc_i2c_scl_pin": 21}},
                "system": {{"log_level": "INFO", "update_interval": 60}},
                "channels": {{
                    "porch": {{
                        "gpio_pin": {pin},
                        "enabled": true,
                        "time_windows": {{
                            "all_day": {{"start": "00:00", "end": "00:00", "duty_cycle": {duty}}}
                        }}
                    }}
                }}
            }}"#
        )
    }

    #[test]
    fn persists_and_reloads_artifacts() {
        let mut files = scratch_store("roundtrip");

        let mut config: Configuration = serde_json::from_str(&config_json(35, 16)).unwrap();
        config.validate().unwrap();
        let bytes = serde_json::to_vec_pretty(&config).unwrap();
        files.persist(ArtifactKind::Config, &bytes).unwrap();
        assert_eq!(files.load_config().unwrap(), config);

        let table: SunTimeTable = serde_json::from_str(
            r#"{"version": "1.0.0", "days": {"03-01": {"sunrise": "06:40", "sunset": "18:20"}}}"#,
        )
        .unwrap();
        let bytes = serde_json::to_vec_pretty(&table).unwrap();
        files.persist(ArtifactKind::SunTimes, &bytes).unwrap();
        assert_eq!(files.load_sun_times().unwrap(), table);
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let files = scratch_store("defaults");
        assert_eq!(files.load_config().unwrap(), Configuration::default());
        assert!(files.load_sun_times().unwrap().is_empty());
    }

    #[test]
    fn boot_load_clamps_out_of_range_duty_cycles() {
        let mut files = scratch_store("clamp");
        files
            .persist(ArtifactKind::Config, config_json(-10, 16).as_bytes())
            .unwrap();

        let config = files.load_config().unwrap();
        assert_eq!(config.channels[0].windows[0].duty_cycle, 0);
    }

    #[test]
    fn boot_load_rejects_invalid_documents() {
        let mut files = scratch_store("reject");
        // gpio_pin 29 is out of range, so the document must not load.
        files
            .persist(ArtifactKind::Config, config_json(35, 29).as_bytes())
            .unwrap();
        assert!(files.load_config().is_err());
    }
}
