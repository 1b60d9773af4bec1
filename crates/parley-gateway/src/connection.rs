use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::api::Claims;
use parley_types::events::{ClientEvent, ServerEvent};

use crate::error::ChatError;
use crate::gateway::Gateway;
use crate::identity::Authenticator;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated socket may take to send `identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a WebSocket whose token was validated at the HTTP upgrade.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    gateway: Gateway,
    user_id: Uuid,
    name: String,
) {
    let (sender, receiver) = socket.split();
    info!("{} ({}) connected to gateway (pre-authenticated)", name, user_id);
    run_connection_loop(sender, receiver, gateway, user_id, name).await;
}

/// Handle a WebSocket that must authenticate with an `identify` event.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, auth: Authenticator) {
    let (mut sender, mut receiver) = socket.split();

    let claims = match wait_for_identify(&mut receiver, &auth).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            let rejected = ServerEvent::Error {
                code: ChatError::Unauthenticated.code().to_string(),
                message: ChatError::Unauthenticated.to_string(),
                event: Some("identify".into()),
            };
            if let Ok(text) = serde_json::to_string(&rejected) {
                let _ = sender.send(Message::Text(text.into())).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    info!("{} ({}) connected to gateway", claims.name, claims.sub);
    run_connection_loop(sender, receiver, gateway, claims.sub, claims.name).await;
}

/// One writer task drains the connection's queue and runs the heartbeat.
/// Inbound frames are handled inline, one at a time, so a handler that is
/// running when the socket closes still finishes before cleanup.
async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    gateway: Gateway,
    user_id: Uuid,
    name: String,
) {
    let (session, mut events) = gateway.connect(user_id, name);
    let conn_id = session.conn_id;

    let shutdown = CancellationToken::new();
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();

    let send_shutdown = shutdown.clone();
    let send_task = tokio::spawn(async move {
        // Whatever ends the writer also ends the reader.
        let _stop_reader = send_shutdown.clone().drop_guard();

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                _ = send_shutdown.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(event.as_ref()) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("{} dropped unserializable event: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("{} heartbeat timeout (missed {} pongs), dropping connection", conn_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = sender.close().await;
    });

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = receiver.next() => frame,
        };
        let Some(Ok(frame)) = frame else { break };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => gateway.handle(&session, event).await,
                Err(e) => {
                    warn!(
                        "{} bad event: {} -- raw: {}",
                        conn_id,
                        e,
                        text.chars().take(200).collect::<String>()
                    );
                    gateway.report(
                        conn_id,
                        &ChatError::Validation(format!("malformed event: {e}")),
                        None,
                    );
                }
            },
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    shutdown.cancel();
    gateway.disconnect(session).await;
    if let Err(e) = send_task.await {
        debug!("{} writer task ended abnormally: {}", conn_id, e);
    }
}

/// Wait for an `identify` event carrying a valid token. Other frames are
/// ignored until the timeout.
async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    auth: &Authenticator,
) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientEvent::Identify { token }) = serde_json::from_str(&text) {
                    return auth.verify(&token).ok();
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}
