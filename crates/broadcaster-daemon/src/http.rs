use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use broadcaster_core::guide::{GuideLayout, LayoutView};
use broadcaster_core::{BroadcastMessage, CoreEvent, StateManager};
use broadcaster_proto::config::GuideConfig;
use broadcaster_proto::protocol::{Command, PlayerSnapshot};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
    layout: GuideLayout,
    scroll_lead: f64,
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    host: String,
    port: i64,
}

pub fn router(
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoreEvent>,
    guide: &GuideConfig,
) -> Router {
    let app_state = HttpState {
        state_manager,
        event_tx,
        layout: GuideLayout::from(guide),
        scroll_lead: guide.scroll_lead,
    };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/events", get(events))
        .route("/api/connect", post(connect))
        .route("/api/disconnect", post(disconnect))
        .route("/api/channel/up", post(channel_up))
        .route("/api/channel/down", post(channel_down))
        .route("/api/channel/:idx", post(change_channel))
        .route("/api/retry", post(retry))
        .route("/api/pause", post(toggle_pause))
        .route("/api/guide/open", post(open_guide))
        .route("/api/guide/close", post(close_guide))
        .route("/api/guide/layout", get(guide_layout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

pub fn start_server(bind_address: String, port: u16, app: Router) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
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

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(CoreEvent::Command(cmd)).await.is_err() {
        error!("HTTP API: player core is gone");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayerSnapshot> {
    Json(state.state_manager.get_state().await)
}

/// Current snapshot on connect, then one per change.  Lagging clients skip
/// straight to the latest snapshot.
async fn events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.state_manager.subscribe();
    let manager = state.state_manager.clone();

    let stream = stream::unfold((rx, manager, true), |(mut rx, manager, first)| async move {
        if first {
            let event = snapshot_event(&manager).await;
            return Some((event, (rx, manager, false)));
        }
        loop {
            match rx.recv().await {
                Ok(BroadcastMessage::StateUpdated) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    let event = snapshot_event(&manager).await;
                    return Some((event, (rx, manager, false)));
                }
                Ok(BroadcastMessage::Log(line)) => {
                    let event = Ok(Event::default().event("log").data(line));
                    return Some((event, (rx, manager, false)));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn snapshot_event(manager: &StateManager) -> Result<Event, axum::Error> {
    Event::default()
        .event("state")
        .json_data(manager.get_state().await)
}

async fn connect(State(state): State<HttpState>, Json(req): Json<ConnectRequest>) -> StatusCode {
    send(
        &state,
        Command::Connect {
            host: req.host,
            port: req.port,
        },
    )
    .await
}

async fn disconnect(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Disconnect).await
}

async fn change_channel(State(state): State<HttpState>, Path(idx): Path<usize>) -> StatusCode {
    send(&state, Command::ChangeChannel { index: idx }).await
}

async fn channel_up(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::ChannelUp).await
}

async fn channel_down(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::ChannelDown).await
}

async fn retry(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Retry).await
}

async fn toggle_pause(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::TogglePlayPause).await
}

async fn open_guide(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::OpenGuide).await
}

async fn close_guide(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::CloseGuide).await
}

async fn guide_layout(State(state): State<HttpState>) -> Result<Json<LayoutView>, StatusCode> {
    let snapshot = state.state_manager.get_state().await;
    let data = snapshot.guide.data.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    let now_ms = snapshot
        .guide
        .now_ms
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    Ok(Json(state.layout.render(
        &snapshot.channels,
        data,
        now_ms,
        state.scroll_lead,
        &chrono::Local,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use broadcaster_proto::protocol::GuideView;
    use broadcaster_proto::{Channel, GuideData};
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn setup() -> (Router, Arc<StateManager>, mpsc::Receiver<CoreEvent>) {
        let (broadcast_tx, _) = broadcast::channel(16);
        let manager = Arc::new(StateManager::new(broadcast_tx));
        let (event_tx, event_rx) = mpsc::channel(16);
        let app = router(manager.clone(), event_tx, &GuideConfig::default());
        (app, manager, event_rx)
    }

    fn post(uri: &str) -> Request<Body> {
        Request::post(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_channel_routes_forward_commands() {
        let (app, _, mut rx) = setup();

        let cases = [
            ("/api/channel/3", Command::ChangeChannel { index: 3 }),
            ("/api/channel/up", Command::ChannelUp),
            ("/api/channel/down", Command::ChannelDown),
            ("/api/retry", Command::Retry),
            ("/api/pause", Command::TogglePlayPause),
            ("/api/guide/open", Command::OpenGuide),
            ("/api/guide/close", Command::CloseGuide),
            ("/api/disconnect", Command::Disconnect),
        ];
        for (uri, expected) in cases {
            let response = app.clone().oneshot(post(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED, "{}", uri);
            match rx.recv().await.unwrap() {
                CoreEvent::Command(cmd) => assert_eq!(cmd, expected),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_bad_channel_index_is_rejected() {
        let (app, _, mut rx) = setup();
        let response = app.oneshot(post("/api/channel/minus-one")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_passes_raw_input_through() {
        let (app, _, mut rx) = setup();
        let request = Request::post("/api/connect")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"host":"10.0.0.4","port":99999}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        match rx.recv().await.unwrap() {
            CoreEvent::Command(cmd) => assert_eq!(
                cmd,
                Command::Connect {
                    host: "10.0.0.4".into(),
                    port: 99999
                }
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_state() {
        let (app, manager, _rx) = setup();
        manager
            .publish(PlayerSnapshot {
                channels: vec![Channel::new("News", "news")],
                ..Default::default()
            })
            .await;

        let response = app
            .oneshot(Request::get("/api/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["rev"], 2);
        assert_eq!(body["channels"][0]["slug"], "news");
        assert_eq!(body["playback"]["state"], "Idle");
    }

    #[tokio::test]
    async fn test_guide_layout() {
        let (app, manager, _rx) = setup();
        let layout_req = || Request::get("/api/guide/layout").body(Body::empty()).unwrap();

        let response = app.clone().oneshot(layout_req()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        manager
            .publish(PlayerSnapshot {
                channels: vec![Channel::new("News", "news")],
                guide: GuideView {
                    visible: true,
                    data: Some(GuideData {
                        day_start_ms: 0,
                        channels: HashMap::new(),
                    }),
                    now_ms: Some(30 * 60_000),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await;

        let response = app.oneshot(layout_req()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["now_line"], 300.0);
        assert_eq!(body["markers"].as_array().unwrap().len(), 24);
        assert_eq!(body["rows"][0]["slug"], "news");
        assert_eq!(body["rows"][0]["programs"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_closed_core_is_unavailable() {
        let (app, _, rx) = setup();
        drop(rx);
        let response = app.oneshot(post("/api/retry")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
