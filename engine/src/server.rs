use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxumPath, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use substrate_core::{EventBus, EventSubscriber};
use substrate_store::DecisionStore;
use substrate_types::SubstrateEvent;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<DecisionStore>,
    pub events: broadcast::Sender<SubstrateEvent>,
}

/// Bridges the synchronous, registration-ordered `EventBus` onto a
/// `tokio::sync::broadcast` channel the WebSocket handler fans out from.
/// Lagging or absent consumers never block `publish` — that's the whole
/// reason the bridge exists instead of handing `broadcast::Sender` to every
/// publisher directly.
struct EventBridge {
    tx: broadcast::Sender<SubstrateEvent>,
}

#[async_trait::async_trait]
impl EventSubscriber for EventBridge {
    fn name(&self) -> &str {
        "websocket-bridge"
    }

    async fn handle(&self, event: &SubstrateEvent) -> anyhow::Result<()> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

fn app(state: ServerState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/health", get(health))
        .route("/events", get(events_ws))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/decisions", get(get_decisions))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, event_bus: EventBus, store: Arc<DecisionStore>) -> anyhow::Result<()> {
    let (tx, _rx) = broadcast::channel(1024);
    event_bus.subscribe(Arc::new(EventBridge { tx: tx.clone() })).await;

    let state = ServerState { store, events: tx };
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "substrate event surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn events_ws(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

async fn stream_events(mut socket: WebSocket, state: ServerState) {
    let mut rx = state.events.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Ok(payload) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "websocket event consumer lagged; some events were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn get_run(AxumPath(run_id): AxumPath<String>, State(state): State<ServerState>) -> impl IntoResponse {
    match state.store.get_pipeline_run(&run_id).await {
        Ok(run) => Json(serde_json::to_value(run).unwrap()).into_response(),
        Err(err) => (axum::http::StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct DecisionsQuery {
    phase: String,
}

async fn get_decisions(
    AxumPath(run_id): AxumPath<String>,
    Query(query): Query<DecisionsQuery>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    match state.store.get_decisions_by_phase_for_run(&run_id, &query.phase).await {
        Ok(decisions) => Json(serde_json::to_value(decisions).unwrap()).into_response(),
        Err(err) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    async fn test_state() -> ServerState {
        let store = Arc::new(DecisionStore::open_in_memory().await.unwrap());
        let (tx, _rx) = broadcast::channel(16);
        ServerState { store, events: tx }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = app(test_state().await);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_run_returns_not_found_for_an_unknown_run() {
        let app = app(test_state().await);
        let req = Request::builder().uri("/runs/does-not-exist").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_run_returns_a_created_pipeline_run() {
        let state = test_state().await;
        let run = state.store.create_pipeline_run("demo", None).await.unwrap();
        let app = app(state);

        let req = Request::builder().uri(format!("/runs/{}", run.id)).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.get("id").and_then(|v| v.as_str()), Some(run.id.as_str()));
    }
}
