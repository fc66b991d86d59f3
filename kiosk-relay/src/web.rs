//! WebSocket transport for the browser screens.
//!
//! Browsers cannot speak the line protocol, so the controller and monitor
//! pages connect to `/ws` and exchange the same JSON frames, one frame per
//! text message. `GET /state` returns the current selection for debugging
//! from a phone or a terminal.

use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::Response,
    routing::get,
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{net::TcpListener, select, sync::broadcast};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    hub::{ConnectionId, HubHandle, Subscription},
    message::{ClientEvent, ServerEvent},
    state::SharedState,
};

pub fn router(hub: HubHandle) -> Router {
    Router::new()
        .route("/ws", get(handle_websocket))
        .route("/state", get(current_state))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

/// Serves the WebSocket endpoint until `shutdown` resolves.
pub async fn serve_until<F>(listener: TcpListener, hub: HubHandle, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    axum::serve(listener, router(hub))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!(?addr, "websocket listener stopped");
    Ok(())
}

async fn current_state(State(hub): State<HubHandle>) -> Result<Json<SharedState>, StatusCode> {
    hub.snapshot()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn handle_websocket(ws: WebSocketUpgrade, State(hub): State<HubHandle>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: HubHandle) {
    let mut subscription = match hub.connect().await {
        Ok(subscription) => subscription,
        Err(err) => {
            warn!(error = %err, "rejecting websocket client");
            return;
        }
    };
    let id = subscription.id;

    let (mut sender, receiver) = socket.split();
    if let Err(err) = run_socket(&hub, &mut subscription, &mut sender, receiver).await {
        debug!(connection = id, error = ?err, "websocket session ended with error");
    }
    let _ = sender.close().await;
    hub.disconnect(id);
}

async fn run_socket(
    hub: &HubHandle,
    subscription: &mut Subscription,
    sender: &mut SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
) -> Result<()> {
    for frame in subscription.greeting() {
        send_event(sender, &frame).await?;
    }

    let id = subscription.id;
    loop {
        select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => handle_text_frame(&text, hub, id)?,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.into()),
                }
            }
            outgoing = subscription.events.recv() => {
                match outgoing {
                    Ok(event) => send_event(sender, &event).await?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(connection = id, skipped, "websocket client lagged; resending state");
                        let snapshot = hub.snapshot().await?;
                        send_event(sender, &ServerEvent::StateUpdate(snapshot)).await?;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}

fn handle_text_frame(text: &str, hub: &HubHandle, id: ConnectionId) -> Result<()> {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => hub.dispatch(event)?,
        Err(err) => warn!(connection = id, error = %err, "dropping malformed frame"),
    }
    Ok(())
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<()> {
    let text = serde_json::to_string(event)?;
    sender.send(Message::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{HubConfig, spawn_hub};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
    };
    use tower::ServiceExt;

    type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn next_ws_event(socket: &mut WsClient) -> ServerEvent {
        loop {
            let message = timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("timed out waiting for websocket frame")
                .expect("websocket closed")
                .expect("websocket error");
            if let WsMessage::Text(text) = message {
                return serde_json::from_str(&text).expect("server frame decodes");
            }
        }
    }

    #[tokio::test]
    async fn state_endpoint_returns_snapshot() {
        let (hub, _worker) = spawn_hub(HubConfig::default());
        hub.dispatch(ClientEvent::ProfilesLoaded { count: 3 }).unwrap();
        hub.dispatch(ClientEvent::ProfileSelected {
            profile_index: 2,
            profile: None,
        })
        .unwrap();

        let response = router(hub)
            .oneshot(Request::builder().uri("/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let state: SharedState = serde_json::from_slice(&body).unwrap();
        assert_eq!(state.selected_profile_index, 2);
        assert_eq!(state.total_profiles, 3);
    }

    #[tokio::test]
    async fn state_endpoint_reports_stopped_hub() {
        let (hub, worker) = spawn_hub(HubConfig::default());
        hub.shutdown().unwrap();
        worker.await.unwrap();

        let response = router(hub)
            .oneshot(Request::builder().uri("/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn websocket_route_requires_upgrade() {
        let (hub, _worker) = spawn_hub(HubConfig::default());
        let response = router(hub)
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn websocket_session_greets_relays_and_skips_bad_frames() {
        let (hub, _worker) = spawn_hub(HubConfig::default());
        hub.dispatch(ClientEvent::ProfilesLoaded { count: 3 }).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve_until(listener, hub.clone(), async move {
            let _ = stop_rx.await;
        }));

        let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        assert_eq!(
            next_ws_event(&mut socket).await,
            ServerEvent::StateUpdate(SharedState {
                total_profiles: 3,
                ..SharedState::new()
            })
        );
        assert_eq!(
            next_ws_event(&mut socket).await,
            ServerEvent::ArduinoStatus { connected: false }
        );

        socket
            .send(WsMessage::Text("not even json".into()))
            .await
            .unwrap();
        let frame = serde_json::to_string(&ClientEvent::ProfileSelected {
            profile_index: 2,
            profile: None,
        })
        .unwrap();
        socket.send(WsMessage::Text(frame)).await.unwrap();

        assert_eq!(
            next_ws_event(&mut socket).await,
            ServerEvent::ProfileSelected {
                profile_index: 2,
                profile: None,
            }
        );
        assert_eq!(hub.snapshot().await.unwrap().selected_profile_index, 2);

        // Events from other transports reach the websocket client too.
        hub.dispatch(ClientEvent::SimulateArrow).unwrap();
        assert_eq!(
            next_ws_event(&mut socket).await,
            ServerEvent::NextArtwork {
                profile_index: 2,
                current_artwork_index: Some(0),
            }
        );

        socket.close(None).await.unwrap();
        stop_tx.send(()).unwrap();
        timeout(Duration::from_secs(5), server)
            .await
            .expect("websocket listener stops")
            .unwrap()
            .unwrap();
    }
}
