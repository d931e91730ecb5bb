//! WebSocket transport of one client session.
//!
//! The socket is split: the read half feeds requests to the handlers on the
//! connection task, while a writer task owns the send half and drains the
//! session's outbound queue, pinging the client when it has been idle.

use crate::server::handlers::{self, SessionContext};
use crate::server::messages::{Request, Response};
use crate::server::session::{ClientSession, SessionId};
use crate::server::ServerState;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let id = SessionId::next();
    let nickname = state.config.irc.session_nickname(id.get());
    let (session, outbound) =
        ClientSession::new(id, nickname, state.config.server.outbound_queue);
    let session = Arc::new(session);
    state.hub.register(session.clone());

    let ctx = SessionContext {
        hub: state.hub.clone(),
        session: session.clone(),
        config: state.config.clone(),
    };
    let keepalive = Duration::from_secs(state.config.server.keepalive_secs.max(1));
    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        session.cancel_token().clone(),
        keepalive,
    ));

    read_loop(stream, &ctx).await;
    state.hub.unregister(id).await;
    let _ = writer.await;
    tracing::debug!(session = %id, "websocket closed");
}

async fn read_loop(mut stream: SplitStream<WebSocket>, ctx: &SessionContext) {
    let cancel = ctx.session.cancel_token().clone();
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<Request>(text.as_str()) {
                Ok(request) => {
                    tracing::debug!(session = %ctx.session.id(), ?request, "client request");
                    handlers::handle_request(ctx, request).await;
                }
                Err(e) => {
                    ctx.session
                        .send(Response::error(format!("Invalid request: {}", e)))
                        .await
                }
            },
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {} // Ping/Pong handled by axum
            Some(Err(e)) => {
                tracing::debug!(session = %ctx.session.id(), error = %e, "websocket read failed");
                break;
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Response>,
    cancel: CancellationToken,
    keepalive: Duration,
) {
    let mut ticker = tokio::time::interval(keepalive);
    ticker.tick().await;

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            response = outbound.recv() => match response {
                Some(response) => {
                    ticker.reset();
                    match encode(&response) {
                        Some(frame) => frame,
                        None => continue,
                    }
                }
                None => break,
            },
            _ = ticker.tick() => WsMessage::Ping(Vec::new().into()),
        };
        match tokio::time::timeout(SEND_TIMEOUT, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => {
                tracing::debug!("websocket send failed or timed out");
                cancel.cancel();
                return;
            }
        }
    }

    // Deliver what was queued before the session closed.
    outbound.close();
    while let Ok(response) = outbound.try_recv() {
        if let Some(frame) = encode(&response) {
            if sink.send(frame).await.is_err() {
                return;
            }
        }
    }
    let _ = sink.send(WsMessage::Close(None)).await;
}

fn encode(response: &Response) -> Option<WsMessage> {
    match serde_json::to_string(response) {
        Ok(json) => Some(WsMessage::Text(json.into())),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode response");
            None
        }
    }
}
