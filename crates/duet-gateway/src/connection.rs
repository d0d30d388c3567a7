use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use duet_types::events::{GatewayCommand, GatewayEvent};

use crate::auth::TokenVerifier;
use crate::router::{self, GatewayContext};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection for its whole lifetime.
///
/// The token is verified before anything else; a bad or missing token
/// closes the socket without emitting a single event.
pub async fn handle_connection(
    socket: WebSocket,
    ctx: GatewayContext,
    verifier: Arc<dyn TokenVerifier>,
    token: Option<String>,
) {
    let (mut sender, receiver) = socket.split();

    let user = match token.as_deref().and_then(|t| verifier.verify(t)) {
        Some(user) => user,
        None => {
            warn!("WebSocket client failed authentication, closing");
            let _ = sender.close().await;
            return;
        }
    };

    info!("{} connected to gateway", user.id);

    // Register with presence; events for this connection buffer in conn_rx
    // until the send task starts draining it.
    let (conn_id, mut conn_rx, came_online) = ctx.dispatcher.register(&user.id).await;

    // The new client gets the full online snapshot (itself included)
    let snapshot = GatewayEvent::OnlineUsers {
        user_ids: ctx.dispatcher.online_users().await,
    };
    if sender
        .send(Message::Text(serde_json::to_string(&snapshot).unwrap().into()))
        .await
        .is_err()
    {
        ctx.dispatcher.unregister(conn_id).await;
        return;
    }

    // Everyone learns about the first connection only
    if came_online {
        ctx.dispatcher
            .broadcast_all(GatewayEvent::UserOnline {
                user_id: user.id.clone(),
            })
            .await;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward dispatcher events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = conn_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
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
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client. Awaiting each command before taking
    // the next keeps one connection's events in arrival order.
    let ctx_recv = ctx.clone();
    let user_recv = user.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut receiver = receiver;
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        let keep_open =
                            router::handle_command(&ctx_recv, conn_id, &user_recv, cmd).await;
                        if !keep_open {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_recv.id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Graceful or abrupt, the cleanup is the same and idempotent
    if let Some(user_id) = ctx.dispatcher.unregister(conn_id).await {
        ctx.dispatcher
            .broadcast_all(GatewayEvent::UserOffline { user_id })
            .await;
    }

    info!("{} disconnected from gateway", user.id);
}
