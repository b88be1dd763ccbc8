use std::sync::Arc;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::{get, post}, Json, Router};
use awg_core::{decode, AccessError, AccessGate, Relay};
use awg_mqtt::{CommandError, CommandPublisher, MqttConfig, MqttEvent, MqttService, SessionProfile};
use chrono::Utc;
use dotenvy::dotenv;
use prometheus::{Encoder, IntCounter, IntGauge, IntGaugeVec, TextEncoder};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod models;
mod services;
#[cfg(test)]
mod tests;

use config::SiteConfig;
use models::*;
use services::{ControlError, ControlService};

#[derive(Clone)]
struct AppState {
    dashboard: MqttService,
    power: MqttService,
    control: ControlService<MqttService>,
    site: Arc<SiteConfig>,
    metrics: Arc<Metrics>,
}

impl AppState {
    fn new(dashboard: MqttService, power: MqttService, site: SiteConfig, metrics: Arc<Metrics>) -> Self {
        let control = ControlService::new(
            CommandPublisher::new(dashboard.clone(), dashboard.store().clone()),
            CommandPublisher::new(power.clone(), power.store().clone()),
            AccessGate::for_origin(site.origin()),
            &site.pin,
        );
        Self { dashboard, power, control, site: Arc::new(site), metrics }
    }
}

struct Metrics {
    mqtt_connected: IntGaugeVec, // label: session
    mqtt_rx_total: IntCounter,
    mqtt_tx_total: IntCounter,
    ws_clients: IntGauge,
    last_update: IntGaugeVec, // label: session
}

impl Metrics {
    fn new() -> prometheus::Result<Arc<Self>> {
        let mqtt_connected = IntGaugeVec::new(
            prometheus::Opts::new("awg_mqtt_connected", "MQTT connection status (1 connected, 0 otherwise)"),
            &["session"],
        )?;
        let mqtt_rx_total = IntCounter::new("awg_mqtt_messages_received_total", "Total MQTT messages received")?;
        let mqtt_tx_total = IntCounter::new("awg_mqtt_messages_published_total", "Total MQTT commands published")?;
        let ws_clients = IntGauge::new("awg_ws_clients", "Number of connected WebSocket clients")?;
        let last_update = IntGaugeVec::new(
            prometheus::Opts::new("awg_state_last_update", "Epoch seconds of the last decoded update"),
            &["session"],
        )?;

        // Already-registered collectors (tests build several states) are fine.
        let registry = prometheus::default_registry();
        let _ = registry.register(Box::new(mqtt_connected.clone()));
        let _ = registry.register(Box::new(mqtt_rx_total.clone()));
        let _ = registry.register(Box::new(mqtt_tx_total.clone()));
        let _ = registry.register(Box::new(ws_clients.clone()));
        let _ = registry.register(Box::new(last_update.clone()));

        Ok(Arc::new(Self { mqtt_connected, mqtt_rx_total, mqtt_tx_total, ws_clients, last_update }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing()?;

    let site = SiteConfig::from_env()?;
    let mqtt_cfg = MqttConfig::from_env().context("Invalid MQTT configuration")?;
    let origin = site.origin();
    info!(
        origin_host = %site.origin_host,
        ?origin,
        primary = %mqtt_cfg.primary_broker,
        fallback = %mqtt_cfg.fallback_broker,
        "Configuring MQTT sessions"
    );

    let dashboard = MqttService::connect(mqtt_cfg.clone(), SessionProfile::Dashboard { origin }).await?;
    let power = MqttService::connect(mqtt_cfg, SessionProfile::PowerMonitor).await?;
    let metrics = Metrics::new()?;
    let addr = site.http_addr;
    let state = AppState::new(dashboard.clone(), power.clone(), site, metrics.clone());

    tokio::spawn(mqtt_consumer_loop(dashboard.clone(), metrics.clone()));
    tokio::spawn(mqtt_consumer_loop(power.clone(), metrics));

    let app = router(state);
    info!(%addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, closing MQTT sessions");
    dashboard.shutdown().await;
    power.shutdown().await;
    Ok(())
}

fn router(state: AppState) -> Router {
    let app_dir = state.site.app_dir.clone();
    let static_service = ServeDir::new(&app_dir)
        .not_found_service(ServeFile::new(format!("{}/index.html", app_dir)));

    Router::new()
        .route("/", get(|| async { axum::response::Redirect::permanent("/app/") }))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/metrics", get(metrics_handler))
        // Frontend
        .nest_service("/app", static_service)
        // Read APIs
        .route("/api/state", get(api_get_state))
        .route("/api/power", get(api_get_power))
        .route("/api/access", get(api_get_access))
        .route("/api/info", get(api_get_info))
        // Access
        .route("/api/access/unlock", post(api_unlock))
        .route("/api/info/reveal", post(api_reveal_info))
        // Control API
        .route("/api/relay/:id", post(api_set_relay))
        .route("/api/relay/:id/toggle", post(api_toggle_relay))
        .route("/api/kuras", post(api_set_kuras))
        .route("/api/kuras/toggle", post(api_toggle_kuras))
        .route("/api/power/reset", post(api_reset_energy))
        // MQTT admin endpoint
        .route("/api/admin/mqtt/reset", post(api_mqtt_reset))
        // WebSocket endpoints
        .route("/ws/state", get(ws_state))
        .route("/ws/power", get(ws_power))
        .with_state(state)
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,axum=info,hyper=info,rumqttc=warn"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(?err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                warn!(?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

async fn healthz() -> &'static str { "ok" }

async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.dashboard.is_ready() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buf) {
        warn!(?err, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())], buf).into_response()
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControlError::Locked => StatusCode::FORBIDDEN,
            ControlError::Access(AccessError::InvalidPin) => StatusCode::UNAUTHORIZED,
            ControlError::Command(CommandError::NotConnected) => StatusCode::SERVICE_UNAVAILABLE,
            ControlError::Command(CommandError::Publish(err)) => {
                warn!(?err, "MQTT publish failed");
                StatusCode::BAD_GATEWAY
            }
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

fn parse_relay(id: &str) -> Result<Relay, Response> {
    id.parse::<Relay>().map_err(|err| {
        (StatusCode::NOT_FOUND, Json(ErrorBody { error: err.to_string() })).into_response()
    })
}

// ----- Read endpoints -----

async fn dashboard_snapshot(state: &AppState) -> DashboardResponse {
    DashboardResponse {
        status: state.dashboard.status(),
        access: state.control.access().await,
        state: state.dashboard.state(),
    }
}

fn power_snapshot(state: &AppState) -> PowerResponse {
    PowerResponse::new(state.power.status(), state.control.reset_status(), &state.power.state())
}

async fn api_get_state(State(state): State<AppState>) -> Json<DashboardResponse> {
    Json(dashboard_snapshot(&state).await)
}

async fn api_get_power(State(state): State<AppState>) -> Json<PowerResponse> {
    Json(power_snapshot(&state))
}

async fn api_get_access(State(state): State<AppState>) -> Response {
    Json(state.control.access().await).into_response()
}

async fn api_get_info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse { revealed: false, info: state.site.info.masked() })
}

async fn api_unlock(State(state): State<AppState>, Json(body): Json<UnlockPayload>) -> Response {
    match state.control.unlock(&body.pin).await {
        Ok(view) => Json(view).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn api_reveal_info(State(state): State<AppState>, Json(body): Json<UnlockPayload>) -> Response {
    match state.control.verify_pin(&body.pin) {
        Ok(()) => Json(InfoResponse { revealed: true, info: state.site.info.clone() }).into_response(),
        Err(err) => err.into_response(),
    }
}

// ----- Control endpoints -----

async fn api_set_relay(Path(id): Path<String>, State(state): State<AppState>, Json(body): Json<SwitchPayload>) -> Response {
    let relay = match parse_relay(&id) {
        Ok(relay) => relay,
        Err(resp) => return resp,
    };
    match state.control.set_relay(relay, body.on).await {
        Ok(()) => { state.metrics.mqtt_tx_total.inc(); StatusCode::NO_CONTENT.into_response() }
        Err(err) => err.into_response(),
    }
}

async fn api_toggle_relay(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    let relay = match parse_relay(&id) {
        Ok(relay) => relay,
        Err(resp) => return resp,
    };
    match state.control.toggle_relay(relay).await {
        Ok(on) => { state.metrics.mqtt_tx_total.inc(); Json(ToggleResponse { on }).into_response() }
        Err(err) => err.into_response(),
    }
}

async fn api_set_kuras(State(state): State<AppState>, Json(body): Json<SwitchPayload>) -> Response {
    match state.control.set_drain_mode(body.on).await {
        Ok(()) => { state.metrics.mqtt_tx_total.inc(); StatusCode::NO_CONTENT.into_response() }
        Err(err) => err.into_response(),
    }
}

async fn api_toggle_kuras(State(state): State<AppState>) -> Response {
    match state.control.toggle_drain_mode().await {
        Ok(on) => { state.metrics.mqtt_tx_total.inc(); Json(ToggleResponse { on }).into_response() }
        Err(err) => err.into_response(),
    }
}

async fn api_reset_energy(State(state): State<AppState>) -> Response {
    match state.control.reset_energy_counter().await {
        Ok(()) => { state.metrics.mqtt_tx_total.inc(); StatusCode::ACCEPTED.into_response() }
        Err(err) => err.into_response(),
    }
}

async fn api_mqtt_reset(State(state): State<AppState>) -> impl IntoResponse {
    info!("MQTT re-subscribe requested via API");
    let mut failed = Vec::new();
    for service in [&state.dashboard, &state.power] {
        if let Err(err) = service.resubscribe().await {
            warn!(?err, session = service.profile().name(), "Failed to re-subscribe");
            failed.push(service.profile().name());
        }
    }
    if failed.is_empty() {
        (StatusCode::OK, "MQTT subscriptions restored").into_response()
    } else {
        // Sessions that are down re-subscribe on their own once reconnected.
        let error = format!("not connected: {}", failed.join(", "));
        (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorBody { error })).into_response()
    }
}

// ----- WebSocket snapshots -----

#[derive(Debug, Clone, Copy)]
enum Page {
    Dashboard,
    Power,
}

async fn ws_state(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| snapshot_ws_loop(state, socket, Page::Dashboard))
}

async fn ws_power(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| snapshot_ws_loop(state, socket, Page::Power))
}

async fn page_snapshot(state: &AppState, page: Page) -> serde_json::Result<String> {
    match page {
        Page::Dashboard => serde_json::to_string(&dashboard_snapshot(state).await),
        Page::Power => serde_json::to_string(&power_snapshot(state)),
    }
}

/// Pushes a full snapshot on connect and again whenever state, link status or
/// the reset indicator changes.
async fn snapshot_ws_loop(state: AppState, mut socket: WebSocket, page: Page) {
    state.metrics.ws_clients.inc();
    let service = match page {
        Page::Dashboard => &state.dashboard,
        Page::Power => &state.power,
    };
    let mut state_rx = service.store().subscribe();
    let mut status_rx = service.watch_status();
    let mut reset_rx = state.control.watch_reset();

    'outer: loop {
        state_rx.borrow_and_update();
        status_rx.borrow_and_update();
        reset_rx.borrow_and_update();
        let text = match page_snapshot(&state, page).await {
            Ok(text) => text,
            Err(err) => {
                warn!(?err, "Failed to serialize snapshot");
                break;
            }
        };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }

        loop {
            tokio::select! {
                changed = state_rx.changed() => if changed.is_err() { break 'outer } else { break },
                changed = status_rx.changed() => if changed.is_err() { break 'outer } else { break },
                changed = reset_rx.changed() => if changed.is_err() { break 'outer } else { break },
                msg = socket.recv() => match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break 'outer,
                    Some(Ok(_)) => {}
                },
            }
        }
    }
    let _ = socket.close().await;
    state.metrics.ws_clients.dec();
}

// ----- Background consumer -----

async fn mqtt_consumer_loop(mqtt: MqttService, metrics: Arc<Metrics>) {
    let session = mqtt.profile().name();
    let connected = metrics.mqtt_connected.with_label_values(&[session]);
    let last_update = metrics.last_update.with_label_values(&[session]);
    let mut rx = mqtt.events();
    loop {
        match rx.recv().await {
            Ok(MqttEvent::Connected) => connected.set(1),
            Ok(MqttEvent::Disconnected) => connected.set(0),
            Ok(MqttEvent::Publish { topic, payload }) => {
                metrics.mqtt_rx_total.inc();
                if decode(&topic, &payload).is_some() {
                    last_update.set(Utc::now().timestamp());
                }
            }
            Ok(MqttEvent::PubAck(pkid)) => debug!(session, pkid, "Publish acknowledged"),
            Err(RecvError::Lagged(skipped)) => debug!(session, skipped, "Metrics consumer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
