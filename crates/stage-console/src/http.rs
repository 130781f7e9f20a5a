use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use stage_core::{CoreEvent, OperatorAction, SessionView, ViewStore};
use stage_proto::protocol::NavigateTarget;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    view: ViewStore,
    event_tx: mpsc::Sender<CoreEvent>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    view: ViewStore,
    event_tx: mpsc::Sender<CoreEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(view, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(view: ViewStore, event_tx: mpsc::Sender<CoreEvent>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/start/:event_id", post(start))
        .route("/api/stop", post(stop))
        .route("/api/retry", post(retry))
        .route("/api/next", post(next_item))
        .route("/api/prev", post(prev_item))
        .route("/api/goto/:index", post(goto_item))
        .route("/api/wake", post(wake))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { view, event_tx })
}

async fn get_state(State(state): State<HttpState>) -> Json<SessionView> {
    Json(state.view.get().await)
}

async fn start(State(state): State<HttpState>, Path(event_id): Path<String>) -> StatusCode {
    info!("HTTP API: Start session for {}", event_id);
    let selected = state.view.get().await.event_id;
    if selected.as_deref() != Some(event_id.as_str()) {
        let status = dispatch(&state, OperatorAction::SelectEvent(event_id)).await;
        if status != StatusCode::OK {
            return status;
        }
    }
    dispatch(&state, OperatorAction::StartSession).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Stop session");
    dispatch(&state, OperatorAction::StopSession).await
}

async fn retry(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Retry start");
    dispatch(&state, OperatorAction::Retry).await
}

async fn next_item(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Next item");
    dispatch(&state, OperatorAction::Navigate(NavigateTarget::Next)).await
}

async fn prev_item(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Previous item");
    dispatch(&state, OperatorAction::Navigate(NavigateTarget::Prev)).await
}

async fn goto_item(State(state): State<HttpState>, Path(index): Path<usize>) -> StatusCode {
    info!("HTTP API: Go to item {}", index);
    dispatch(&state, OperatorAction::Navigate(NavigateTarget::Goto { index })).await
}

async fn wake(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Wake capture");
    dispatch(&state, OperatorAction::WakeCapture).await
}

/// Queue an action for the core.  Acceptance is decided there; the HTTP
/// status only says whether it was delivered.
async fn dispatch(state: &HttpState, action: OperatorAction) -> StatusCode {
    if state.event_tx.send(CoreEvent::Operator(action)).await.is_err() {
        error!("Failed to send operator action: core is gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn next_action(rx: &mut mpsc::Receiver<CoreEvent>) -> Option<OperatorAction> {
        match rx.try_recv() {
            Ok(CoreEvent::Operator(action)) => Some(action),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_state_is_served_as_json() {
        let view = ViewStore::new();
        view.publish(SessionView {
            connected: true,
            event_id: Some("sunday-am".into()),
            ..Default::default()
        })
        .await;
        let (tx, _rx) = mpsc::channel(8);

        let response = router(view, tx)
            .oneshot(request(Method::GET, "/api/state"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["connected"], true);
        assert_eq!(json["event_id"], "sunday-am");
        assert_eq!(json["phase"]["phase"], "idle");
    }

    #[tokio::test]
    async fn test_start_selects_a_different_event_first() {
        let (tx, mut rx) = mpsc::channel(8);
        let response = router(ViewStore::new(), tx)
            .oneshot(request(Method::POST, "/api/start/evening"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            next_action(&mut rx),
            Some(OperatorAction::SelectEvent("evening".into()))
        );
        assert_eq!(next_action(&mut rx), Some(OperatorAction::StartSession));
        assert_eq!(next_action(&mut rx), None);
    }

    #[tokio::test]
    async fn test_goto_parses_the_index() {
        let (tx, mut rx) = mpsc::channel(8);
        let response = router(ViewStore::new(), tx)
            .oneshot(request(Method::POST, "/api/goto/3"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            next_action(&mut rx),
            Some(OperatorAction::Navigate(NavigateTarget::Goto { index: 3 }))
        );
    }

    #[tokio::test]
    async fn test_closed_core_is_an_internal_error() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let response = router(ViewStore::new(), tx)
            .oneshot(request(Method::POST, "/api/stop"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
