use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use clockwork_types::events::{GatewayEvent, notification_group};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Relay a notification room to one client.
pub async fn handle_notification_connection(socket: WebSocket, dispatcher: Dispatcher, room_name: String) {
    let group = notification_group(&room_name);
    run_consumer(socket, dispatcher, group, std::future::ready(None), false).await;
}

/// Relay progress of one task to one client. `snapshot` resolves to the stored
/// state of the task; it is awaited after joining the group and sent before any
/// live update, so a task finishing during the handshake is not missed.
pub async fn handle_progress_connection<F>(socket: WebSocket, dispatcher: Dispatcher, task_id: String, snapshot: F)
where
    F: Future<Output = GatewayEvent>,
{
    run_consumer(socket, dispatcher, task_id, async { Some(snapshot.await) }, true).await;
}

/// Shared consumer loop: join the group, relay its events, heartbeat, leave.
async fn run_consumer<F>(socket: WebSocket, dispatcher: Dispatcher, group: String, initial: F, close_on_complete: bool)
where
    F: Future<Output = Option<GatewayEvent>>,
{
    let (mut sender, receiver) = socket.split();

    // Join before taking the snapshot so nothing published in between is lost
    let group_rx = dispatcher.group_add(&group).await;
    let live = dispatcher.connection_opened();
    info!("client joined {} ({} connections)", group, live);

    let mut finished = false;
    if let Some(event) = initial.await {
        finished = close_on_complete && is_final(&event);
        if send_event(&mut sender, &event).await.is_err() {
            finished = true;
        }
    }

    if !finished {
        relay(sender, receiver, group_rx, close_on_complete).await;
    } else {
        drop(group_rx);
        let _ = sender.send(Message::Close(None)).await;
    }

    dispatcher.group_discard(&group).await;
    let live = dispatcher.connection_closed();
    info!("client left {} ({} connections)", group, live);
}

async fn relay(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut group_rx: tokio::sync::broadcast::Receiver<GatewayEvent>,
    close_on_complete: bool,
) {
    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward group events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = group_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Group receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                    if close_on_complete && is_final(&event) {
                        let _ = sender.send(Message::Close(None)).await;
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

    // Consumers are receive-only; the client side only answers pings and closes
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                Message::Text(text) => {
                    debug!("ignoring client text frame ({} bytes)", text.len());
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    let send_finished = tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            true
        }
        _ = &mut recv_task => {
            send_task.abort();
            false
        }
    };

    // The group receiver lives in the send task; it must be gone before discard
    if !send_finished {
        let _ = send_task.await;
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

fn is_final(event: &GatewayEvent) -> bool {
    matches!(event, GatewayEvent::UpdateTaskProgress(report) if report.complete)
}
