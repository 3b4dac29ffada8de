use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use clockwork_gateway::connection::{handle_notification_connection, handle_progress_connection};
use clockwork_gateway::dispatcher::Dispatcher;
use clockwork_types::events::GatewayEvent;
use clockwork_types::tasks::{ProgressInfo, ProgressReport, TaskStatus};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone)]
struct TestState {
    dispatcher: Dispatcher,
    /// Stored report every progress socket reads on connect
    stored: GatewayEvent,
    /// Published to the task's group while the stored report is being read
    racing: Option<GatewayEvent>,
}

async fn notification_ws(
    State(state): State<TestState>,
    Path(room_name): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_notification_connection(socket, state.dispatcher, room_name))
}

async fn progress_ws(
    State(state): State<TestState>,
    Path(task_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let TestState {
        dispatcher,
        stored,
        racing,
    } = state;
    let publisher = dispatcher.clone();
    let group = task_id.clone();
    let snapshot = async move {
        if let Some(event) = racing {
            publisher.group_send(&group, event).await;
        }
        stored
    };
    ws.on_upgrade(move |socket| handle_progress_connection(socket, dispatcher, task_id, snapshot))
}

async fn serve(state: TestState) -> SocketAddr {
    let app = Router::new()
        .route("/ws/notification/{room_name}/", get(notification_ws))
        .route("/ws/progress/{task_id}/", get(progress_ws))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{}{}", addr, path)).await.unwrap();
    client
}

/// Next text or close frame; pings are answered by the client library.
async fn next_frame(client: &mut Client) -> Message {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no frame within 5s")
            .expect("stream ended")
            .expect("websocket error");
        if msg.is_text() || msg.is_close() {
            return msg;
        }
    }
}

async fn next_event(client: &mut Client) -> GatewayEvent {
    let msg = next_frame(client).await;
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

async fn wait_for_group_size(dispatcher: &Dispatcher, group: &str, size: usize) {
    timeout(Duration::from_secs(5), async {
        while dispatcher.group_size(group).await != size {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("group {} never reached {} members", group, size));
}

fn report(state: TaskStatus, current: u64) -> GatewayEvent {
    GatewayEvent::UpdateTaskProgress(ProgressReport {
        state,
        complete: state.is_complete(),
        success: state.is_complete().then_some(state == TaskStatus::Success),
        progress: ProgressInfo::new(current, 100, None),
        result: None,
    })
}

fn pending() -> GatewayEvent {
    GatewayEvent::UpdateTaskProgress(ProgressReport {
        state: TaskStatus::Pending,
        complete: false,
        success: None,
        progress: ProgressInfo::pending(),
        result: None,
    })
}

#[tokio::test]
async fn notification_room_relays_and_leaves_group_on_close() {
    let dispatcher = Dispatcher::new();
    let addr = serve(TestState {
        dispatcher: dispatcher.clone(),
        stored: pending(),
        racing: None,
    })
    .await;

    let mut client = connect(addr, "/ws/notification/lobby/").await;
    wait_for_group_size(&dispatcher, "notification_lobby", 1).await;

    // Other rooms are not relayed
    dispatcher
        .group_send("notification_other", GatewayEvent::SendNotification { message: "nope".into() })
        .await;
    let reached = dispatcher
        .group_send("notification_lobby", GatewayEvent::SendNotification { message: "hello".into() })
        .await;
    assert_eq!(reached, 1);

    let msg = next_frame(&mut client).await;
    let json: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(json, serde_json::json!({"type": "send_notification", "data": {"message": "hello"}}));

    client.close(None).await.unwrap();
    wait_for_group_size(&dispatcher, "notification_lobby", 0).await;
    timeout(Duration::from_secs(5), async {
        while dispatcher.connections() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection count never dropped");
}

#[tokio::test]
async fn progress_socket_sends_snapshot_then_live_updates_then_closes() {
    let dispatcher = Dispatcher::new();
    let addr = serve(TestState {
        dispatcher: dispatcher.clone(),
        stored: pending(),
        // Published after the socket joined but before the snapshot went out
        racing: Some(report(TaskStatus::Progress, 40)),
    })
    .await;

    let mut client = connect(addr, "/ws/progress/task-1/").await;

    assert_eq!(next_event(&mut client).await, pending());
    assert_eq!(next_event(&mut client).await, report(TaskStatus::Progress, 40));

    dispatcher.group_send("task-1", report(TaskStatus::Progress, 80)).await;
    assert_eq!(next_event(&mut client).await, report(TaskStatus::Progress, 80));

    dispatcher.group_send("task-1", report(TaskStatus::Success, 100)).await;
    assert_eq!(next_event(&mut client).await, report(TaskStatus::Success, 100));
    assert!(next_frame(&mut client).await.is_close());

    wait_for_group_size(&dispatcher, "task-1", 0).await;
}

#[tokio::test]
async fn progress_socket_for_finished_task_closes_after_snapshot() {
    let dispatcher = Dispatcher::new();
    let addr = serve(TestState {
        dispatcher: dispatcher.clone(),
        stored: report(TaskStatus::Failure, 50),
        racing: None,
    })
    .await;

    let mut client = connect(addr, "/ws/progress/task-2/").await;
    assert_eq!(next_event(&mut client).await, report(TaskStatus::Failure, 50));
    assert!(next_frame(&mut client).await.is_close());

    wait_for_group_size(&dispatcher, "task-2", 0).await;
}
