use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use souk_types::events::{ClientCommand, ErrorCode, ServerEvent};
use souk_types::models::Identity;

use crate::dispatcher::Dispatcher;
use crate::error::{AuthError, GatewayError};
use crate::registry::Outbound;

#[derive(Debug, Default, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// `GET /gateway` upgrade handler.
///
/// The bearer token may come from `Authorization`, from
/// `Sec-WebSocket-Protocol` (echoed back so browsers accept the upgrade),
/// or from `?token=`. Without any, the socket must `Identify` first.
pub async fn ws_upgrade(
    State(dispatcher): State<Dispatcher>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned);
    let protocol = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty());

    let ws = match &protocol {
        Some(p) => ws.protocols([p.clone()]),
        None => ws,
    };
    let token = bearer.or(protocol).or(query.token);

    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher, token))
}

/// Run one gateway connection from handshake to disconnect.
pub async fn handle_socket(socket: WebSocket, dispatcher: Dispatcher, token: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let identity = match token {
        Some(token) => dispatcher.authenticate(&token),
        None => wait_for_identify(&mut receiver, &dispatcher).await,
    };
    let identity = match identity {
        Ok(identity) => identity,
        Err(e) => {
            warn!("gateway handshake refused: {}", e);
            let frame = CloseFrame {
                code: e.close_code(),
                reason: Utf8Bytes::from_static(e.close_reason()),
            };
            let _ = sender.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    run_connection_loop(sender, receiver, dispatcher, identity).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    identity: Identity,
) {
    let username = identity.username.clone();
    let user_id = identity.user_id;
    let (handle, outbound) = dispatcher.attach(identity).await;
    let conn_id = handle.id();

    let mut send_task = tokio::spawn(async move { write_outbound(&mut sender, outbound).await });

    let recv_dispatcher = dispatcher.clone();
    let recv_handle = handle.clone();
    let stop = CancellationToken::new();
    let recv_stop = stop.clone();
    let mut recv_task = tokio::spawn(async move {
        // One command at a time: the next frame is not read until the
        // current one has been fully handled. Stopping is only checked
        // between frames, so a command is never cut off halfway.
        loop {
            let next = tokio::select! {
                _ = recv_stop.cancelled() => break,
                next = receiver.next() => next,
            };
            let Some(Ok(msg)) = next else { break };
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(text.as_str()) {
                    Ok(cmd) => {
                        if let Err(e) = recv_dispatcher.on_event(&recv_handle, cmd).await {
                            recv_dispatcher.report(&recv_handle, &e);
                        }
                    }
                    Err(e) => {
                        let err = GatewayError::Malformed(e.to_string());
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_handle.identity().username,
                            recv_handle.user_id(),
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        recv_handle.send(ServerEvent::Error {
                            code: ErrorCode::Malformed,
                            message: err.to_string(),
                        });
                    }
                },
                Message::Pong(_) => recv_handle.mark_alive(),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => {
            stop.cancel();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.detach(&handle).await;
    info!("{} ({}) connection {} closed", username, user_id, conn_id);
}

async fn write_outbound(
    sender: &mut SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            Outbound::Event(event) => {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("dropping unserializable event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: Utf8Bytes::from_static(reason),
                };
                let _ = sender.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    dispatcher: &Dispatcher,
) -> Result<Identity, AuthError> {
    let timeout = dispatcher.config().auth_timeout;
    let handshake = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    return match serde_json::from_str::<ClientCommand>(text.as_str()) {
                        Ok(ClientCommand::Identify { token }) => dispatcher.authenticate(&token),
                        _ => Err(AuthError::Missing),
                    };
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(AuthError::Missing)
    };

    match tokio::time::timeout(timeout, handshake).await {
        Ok(result) => result,
        Err(_) => {
            warn!("gateway handshake timed out after {:?}", timeout);
            Err(AuthError::Missing)
        }
    }
}
