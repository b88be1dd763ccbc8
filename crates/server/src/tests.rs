use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::*;

// Nothing listens on port 1, so both sessions keep cycling without a broker.
async fn test_state(vars: &[(&str, &str)]) -> Result<AppState> {
    let site = SiteConfig::from_vars(|key| {
        vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    })?;
    let mqtt = MqttConfig {
        primary_broker: "mqtt://127.0.0.1:1".to_string(),
        fallback_broker: "mqtt://127.0.0.1:1".to_string(),
        power_brokers: vec!["mqtt://127.0.0.1:1".to_string()],
        connect_timeout: Duration::from_millis(100),
        reconnect_delay: Duration::from_millis(50),
        ..MqttConfig::default()
    };
    let origin = site.origin();
    let dashboard = MqttService::connect(mqtt.clone(), SessionProfile::Dashboard { origin }).await?;
    let power = MqttService::connect(mqtt, SessionProfile::PowerMonitor).await?;
    Ok(AppState::new(dashboard, power, site, Metrics::new()?))
}

async fn stop(state: AppState) {
    state.dashboard.shutdown().await;
    state.power.shutdown().await;
}

fn get(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

fn post(uri: &str, body: Option<Value>) -> Result<Request<Body>> {
    let builder = Request::builder().method(Method::POST).uri(uri);
    Ok(match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    })
}

async fn response_json(response: Response) -> Result<Value> {
    let collected = response.into_body().collect().await?;
    Ok(serde_json::from_slice(&collected.to_bytes())?)
}

#[tokio::test]
async fn health_ok_but_not_ready_without_broker() -> Result<()> {
    let state = test_state(&[]).await?;
    let app = router(state.clone());

    let health = app.clone().oneshot(get("/healthz")?).await?;
    let readiness = app.oneshot(get("/readyz")?).await?;

    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(readiness.status(), StatusCode::SERVICE_UNAVAILABLE);
    stop(state).await;
    Ok(())
}

#[tokio::test]
async fn commands_while_disconnected_are_rejected() -> Result<()> {
    let state = test_state(&[]).await?;
    let app = router(state.clone());

    let resp = app.clone().oneshot(post("/api/relay/1", Some(json!({ "on": true })))?).await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let resp = app.clone().oneshot(post("/api/kuras/toggle", None)?).await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let resp = app.clone().oneshot(get("/api/state")?).await?;
    let body = response_json(resp).await?;
    assert_eq!(body["state"]["drain_mode_active"], json!(false));
    assert_eq!(body["access"]["controls_reachable"], json!(true));
    assert!(body["state"]["last_update"].is_null());

    stop(state).await;
    Ok(())
}

#[tokio::test]
async fn unknown_relay_is_not_found() -> Result<()> {
    let state = test_state(&[]).await?;
    let app = router(state.clone());

    let resp = app.clone().oneshot(post("/api/relay/3", Some(json!({ "on": true })))?).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = app.oneshot(post("/api/relay/pump/toggle", None)?).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    stop(state).await;
    Ok(())
}

#[tokio::test]
async fn public_origin_requires_pin_before_controls() -> Result<()> {
    let state = test_state(&[("AWG_ORIGIN_HOST", "awg03.qbyte.web.id"), ("AWG_INFO_PIN", "654321")]).await?;
    let app = router(state.clone());

    let resp = app.clone().oneshot(post("/api/relay/2/toggle", None)?).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = app.clone().oneshot(post("/api/access/unlock", Some(json!({ "pin": "123456" })))?).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app.clone().oneshot(post("/api/access/unlock", Some(json!({ "pin": "654321" })))?).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let view = response_json(resp).await?;
    assert_eq!(view["restricted_origin"], json!(true));
    assert_eq!(view["unlocked"], json!(true));

    // Past the gate, the command now fails on the link instead.
    let resp = app.oneshot(post("/api/relay/2/toggle", None)?).await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    stop(state).await;
    Ok(())
}

#[tokio::test]
async fn power_page_reports_readings_and_reset_status() -> Result<()> {
    let state = test_state(&[]).await?;
    let app = router(state.clone());

    let body = response_json(app.clone().oneshot(get("/api/power")?).await?).await?;
    let readings = body["readings"].as_array().cloned().unwrap_or_default();
    assert_eq!(readings.len(), 6);
    assert_eq!(readings[0]["key"], json!("voltage"));
    assert_eq!(readings[0]["display"], json!("--"));
    assert_eq!(body["reset_status"], json!("idle"));

    let resp = app.clone().oneshot(post("/api/power/reset", None)?).await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = response_json(app.oneshot(get("/api/power")?).await?).await?;
    assert_eq!(body["reset_status"], json!("not_connected"));
    assert_eq!(body["reset_label"], json!("Not Connected"));

    stop(state).await;
    Ok(())
}

#[tokio::test]
async fn info_credentials_need_pin() -> Result<()> {
    let state = test_state(&[("AWG_WIFI_PASS", "hunter2"), ("AWG_SSID", "AWG-03")]).await?;
    let app = router(state.clone());

    let body = response_json(app.clone().oneshot(get("/api/info")?).await?).await?;
    assert_eq!(body["revealed"], json!(false));
    assert_eq!(body["info"]["ssid"], json!("AWG-03"));
    assert_eq!(body["info"]["wifi_password"], json!("******"));

    let resp = app.clone().oneshot(post("/api/info/reveal", Some(json!({ "pin": "000000" })))?).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body = response_json(app.oneshot(post("/api/info/reveal", Some(json!({ "pin": "123456" })))?).await?).await?;
    assert_eq!(body["revealed"], json!(true));
    assert_eq!(body["info"]["wifi_password"], json!("hunter2"));

    stop(state).await;
    Ok(())
}

#[tokio::test]
async fn mqtt_reset_reports_disconnected_sessions() -> Result<()> {
    let state = test_state(&[]).await?;
    let resp = router(state.clone()).oneshot(post("/api/admin/mqtt/reset", None)?).await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    stop(state).await;
    Ok(())
}
