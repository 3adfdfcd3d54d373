use anyhow::Context;
use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

use lifeline_core::logging::{self, LogFormat};
use lifeline_core::{CancellationToken, Result as CoreResult};

mod action;
mod config;
mod error;
mod handlers;
mod state;

use state::AppState;

const SERVICE_NAME: &str = "lifeline-node";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_with(LogFormat::from_env());

    let config = config::load()?;
    let bind_addr = config::bind_addr(&config);
    let state = Arc::new(AppState::new(config)?);

    let workers = spawn_workers(&state);

    let app = router(state.clone());
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, worker_id = state.scheduler.worker_id(), "Lifeline node listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await
        .context("server error")?;

    state.shutdown.cancel();
    for (name, handle) in workers {
        match handle.await {
            Ok(Ok(())) => info!(worker = name, "Worker stopped"),
            Ok(Err(e)) => error!(worker = name, error = %e, "Worker exited with error"),
            Err(e) => error!(worker = name, error = %e, "Worker panicked"),
        }
    }
    info!("Lifeline node stopped");
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/actions", post(action::handle_action))
        .with_state(state)
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            ),
        )
}

fn spawn_workers(state: &Arc<AppState>) -> Vec<(&'static str, JoinHandle<CoreResult<()>>)> {
    let token = state.shutdown.clone();

    let s = state.clone();
    let t = token.clone();
    let scheduler = tokio::spawn(async move { s.scheduler.run_worker(t).await });

    let s = state.clone();
    let t = token.clone();
    let tracking = tokio::spawn(async move { s.tracking.run(t).await });

    let s = state.clone();
    let escalation = tokio::spawn(async move { s.escalation.run_ticker(token).await });

    vec![
        ("scheduler", scheduler),
        ("tracking", tracking),
        ("escalation", escalation),
    ]
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
        }
        _ = token.cancelled() => {}
    }
    token.cancel();
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": Utc::now().to_rfc3339()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use lifeline_core::{LifelineConfig, ManualClock};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let state = AppState::in_memory(LifelineConfig::default(), Arc::new(ManualClock::default())).unwrap();
        router(Arc::new(state))
    }

    async fn call(app: &Router, body: Value, request_id: Option<&str>) -> (StatusCode, String, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/actions")
            .header("content-type", "application/json");
        if let Some(id) = request_id {
            request = request.header(action::REQUEST_ID_HEADER, id);
        }
        let response = app
            .clone()
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let id = response
            .headers()
            .get(action::REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, id, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["service"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn test_distress_survives_restart() {
        let path = std::env::temp_dir().join(format!("lifeline-node-{}.db", uuid::Uuid::new_v4()));
        let mut config = LifelineConfig::default();
        config.storage.database_path = path.display().to_string();

        let app = router(Arc::new(AppState::new(config.clone()).unwrap()));
        let (_, _, facility) = call(
            &app,
            json!({"action_name": "register_facility",
                   "input": {"name": "Bo Government Hospital", "latitude": 7.96, "longitude": -11.74}}),
            None,
        )
        .await;
        let (_, _, subject) = call(
            &app,
            json!({"action_name": "register_subject",
                   "input": {"primary_facility_id": facility["id"]}}),
            None,
        )
        .await;
        let (status, _, event) = call(
            &app,
            json!({"action_name": "report_distress",
                   "input": {"subject_id": subject["id"], "reporter_id": subject["id"],
                             "latitude": 7.95, "longitude": -11.73, "nature": "labor", "description": "prolonged labour"}}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        drop(app);

        let app = router(Arc::new(AppState::new(config).unwrap()));
        let (status, _, fetched) = call(
            &app,
            json!({"action_name": "get_distress", "input": {"distress_id": event["id"]}}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["status"], "reported");
        assert_eq!(fetched["assigned_facility"], facility["id"]);
        drop(app);

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    #[tokio::test]
    async fn test_unknown_action_is_bad_request() {
        let app = test_app();
        let (status, id, body) = call(&app, json!({"action_name": "launch-rocket", "input": {}}), Some("req-42")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(id, "req-42");
        assert_eq!(body["code"], "validation");
        assert_eq!(body["details"]["field"], "action_name");
    }

    #[tokio::test]
    async fn test_report_and_fetch_distress() {
        let app = test_app();
        let (status, _, facility) = call(
            &app,
            json!({"action_name": "register-facility",
                   "input": {"name": "Kisumu County Referral", "latitude": -0.09, "longitude": 34.76}}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _, subject) = call(
            &app,
            json!({"action_name": "register_subject",
                   "input": {"primary_facility_id": facility["id"]}}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _, event) = call(
            &app,
            json!({"action_name": "report-distress",
                   "request_id": "env-7",
                   "input": {"subject_id": subject["id"], "reporter_id": subject["id"],
                             "latitude": -0.1, "longitude": 34.75, "nature": "bleeding",
                             "description": "heavy bleeding"}}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(event["status"], "reported");
        assert_eq!(event["assigned_facility"], facility["id"]);

        let (status, id, fetched) = call(
            &app,
            json!({"action_name": "get_distress", "request_id": "env-8",
                   "input": {"distress_id": event["id"]}}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(id, "env-8");
        assert_eq!(fetched["id"], event["id"]);
    }

    #[tokio::test]
    async fn test_missing_distress_is_not_found() {
        let app = test_app();
        let (status, _, body) = call(
            &app,
            json!({"action_name": "get_eta", "input": {"distress_id": uuid::Uuid::new_v4()}}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn test_malformed_envelope() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/actions")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().contains_key(action::REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_schedule_rejects_past_instant() {
        let app = test_app();
        let (status, _, body) = call(
            &app,
            json!({"action_name": "schedule_sms",
                   "input": {"recipient": "+254700000001", "payload": {"body": "hello"},
                             "when": "2000-01-01T00:00:00Z"}}),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");
    }
}
