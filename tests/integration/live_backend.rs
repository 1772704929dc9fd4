// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::significant_drop_tightening,
    clippy::too_many_lines
)]

//! Live end-to-end tests: the real `HttpBackend` and `WsSession` against an
//! in-process axum server that speaks the backend's REST and WebSocket
//! contracts.
//!
//! The fake backend answers in snake_case on REST and camelCase on the
//! socket, so both normalization paths are exercised. Every `send_message`
//! is echoed as `message_sent` and answered by peer 2 with a typing event
//! followed by a `new_message` "pong". Both are stored in the inbox. Sending
//! the text `drop` makes the server close the socket after echoing it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::Json;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use ecodeli_messaging::api::http::{HttpBackend, HttpConfig};
use ecodeli_messaging::controller::{Messenger, MessengerConfig};
use ecodeli_messaging::transport::ws::{WsConfig, WsSession};
use ecodeli_proto::message::{Delivery, MessageId};
use ecodeli_proto::presence::PresenceStatus;
use ecodeli_proto::user::{Role, User, UserId};

const ME: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);

// =============================================================================
// Fake backend
// =============================================================================

struct Fake {
    inbox: Mutex<Vec<Value>>,
    inbox_hits: AtomicUsize,
    rest_reads: Mutex<Vec<i64>>,
    frames: Mutex<Vec<Value>>,
    handshake_queries: Mutex<Vec<HashMap<String, String>>>,
    next_id: AtomicI64,
}

impl Fake {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inbox: Mutex::new(vec![json!({
                "id": 10,
                "sender_id": 2,
                "receiver_id": 1,
                "content": "is the parcel ready?",
                "is_read": 0,
                "created_at": "2024-05-01 09:00:00"
            })]),
            inbox_hits: AtomicUsize::new(0),
            rest_reads: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            handshake_queries: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1000),
        })
    }

    /// Stores a message so later inbox fetches return it.
    fn persist(&self, id: i64, sender: i64, receiver: i64, content: &str) {
        self.inbox.lock().push(json!({
            "id": id,
            "sender_id": sender,
            "receiver_id": receiver,
            "content": content,
            "is_read": 0,
            "created_at": Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
        }));
    }

    fn frames_named(&self, event: &str) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f["event"] == event)
            .cloned()
            .collect()
    }
}

async fn conversations() -> Json<Value> {
    Json(json!({ "data": [{
        "recipient_id": 2,
        "recipient_name": "Bob Stone",
        "last_message": "is the parcel ready?",
        "last_message_time": "2024-05-01 09:00:00",
        "unread_count": 1,
        "status": "online"
    }]}))
}

async fn inbox(State(fake): State<Arc<Fake>>) -> Json<Value> {
    fake.inbox_hits.fetch_add(1, Ordering::SeqCst);
    Json(Value::Array(fake.inbox.lock().clone()))
}

async fn mark_read(State(fake): State<Arc<Fake>>, Path(id): Path<i64>) -> StatusCode {
    fake.rest_reads.lock().push(id);
    StatusCode::NO_CONTENT
}

async fn available_users() -> Json<Value> {
    Json(json!([
        {"id": 2, "first_name": "Bob", "last_name": "Stone", "role": "deliveryman"},
        {"id": 3, "name": "Cara Lee", "userType": "service_provider"}
    ]))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(fake): State<Arc<Fake>>,
) -> impl IntoResponse {
    fake.handshake_queries.lock().push(query);
    ws.on_upgrade(move |socket| handle_socket(socket, fake))
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> bool {
    socket
        .send(WsMessage::Text(value.to_string().into()))
        .await
        .is_ok()
}

async fn handle_socket(mut socket: WebSocket, fake: Arc<Fake>) {
    let mut user_id: Option<i64> = None;

    while let Some(Ok(msg)) = socket.recv().await {
        let WsMessage::Text(text) = msg else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        fake.frames.lock().push(frame.clone());

        match frame["event"].as_str() {
            Some("authenticate") => user_id = frame["data"]["userId"].as_i64(),
            Some("send_message") => {
                let Some(me) = user_id else {
                    let _ = send_json(&mut socket, &json!({
                        "event": "error",
                        "data": {"message": "not authenticated"}
                    }))
                    .await;
                    continue;
                };
                let data = &frame["data"];
                let content = data["content"].as_str().unwrap_or_default().to_string();
                let echo_id = fake.next_id.fetch_add(1, Ordering::SeqCst);
                let echo = json!({
                    "event": "message_sent",
                    "data": {
                        "id": echo_id,
                        "senderId": me,
                        "receiverId": data["receiverId"],
                        "content": content,
                        "isRead": false,
                        "tempId": data["tempId"],
                        "createdAt": Utc::now().to_rfc3339()
                    }
                });
                fake.persist(echo_id, me, data["receiverId"].as_i64().unwrap_or_default(), &content);
                if !send_json(&mut socket, &echo).await {
                    return;
                }
                if content == "drop" {
                    return;
                }

                let peer = data["receiverId"].as_i64().unwrap_or_default();
                let reply_id = fake.next_id.fetch_add(1, Ordering::SeqCst);
                let typing = json!({"event": "user_typing", "data": {"userId": peer}});
                let status = json!({
                    "type": "user_status_change",
                    "userId": peer.to_string(),
                    "status": "away"
                });
                fake.persist(reply_id, peer, me, &format!("pong: {content}"));
                let reply = json!({
                    "event": "new_message",
                    "data": {
                        "id": reply_id,
                        "senderId": peer,
                        "receiverId": me,
                        "content": format!("pong: {content}"),
                        "createdAt": Utc::now().to_rfc3339(),
                        "sender": {"id": peer, "firstName": "Bob", "lastName": "Stone", "role": "deliveryman"}
                    }
                });
                for event in [typing, status, reply] {
                    if !send_json(&mut socket, &event).await {
                        return;
                    }
                }
            }
            _ => {}
        }
    }
}

async fn start_fake() -> (SocketAddr, Arc<Fake>) {
    let fake = Fake::new();
    let app = Router::new()
        .route("/api/messages/conversations", get(conversations))
        .route("/api/messages/inbox", get(inbox))
        .route("/api/messages/{id}/read", put(mark_read))
        .route("/api/messages/available-users", get(available_users))
        .route("/ws", get(ws_handler))
        .with_state(Arc::clone(&fake));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, fake)
}

// =============================================================================
// Client helpers
// =============================================================================

type LiveMessenger = Messenger<WsSession, HttpBackend>;

fn live_messenger(addr: SocketAddr) -> LiveMessenger {
    let backend = HttpBackend::new(&HttpConfig {
        base_url: format!("http://{addr}/api"),
        auth_token: Some("test-token".into()),
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let transport = WsSession::new(WsConfig {
        url: format!("ws://{addr}/ws"),
        max_attempts: 5,
        retry_delay: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(2),
    });
    let me = User::new(ME, "Alice", "Martin").with_role(Role::Client);
    Messenger::new(me, Arc::new(transport), Arc::new(backend), MessengerConfig::default())
}

/// Applies events until `done` holds.
async fn drive_until(m: &mut LiveMessenger, what: &str, done: impl Fn(&LiveMessenger) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !done(m) {
        let event = tokio::time::timeout_at(deadline, m.next_event())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .expect("event channel closed");
        m.handle_event(event);
    }
}

/// Waits until the fake has seen `count` frames named `event`.
async fn wait_for_frames(fake: &Fake, m: &mut LiveMessenger, event: &str, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while fake.frames_named(event).len() < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} {event} frame(s)"
        );
        // Keep applying events so acknowledgements and reconciles progress.
        if let Ok(Some(ev)) = tokio::time::timeout(Duration::from_millis(20), m.next_event()).await {
            m.handle_event(ev);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn full_session_against_live_backend() {
    let (addr, fake) = start_fake().await;
    let mut m = live_messenger(addr);

    m.start();
    assert_eq!(m.load_conversations().await.unwrap(), 1);
    drive_until(&mut m, "connection", LiveMessenger::is_connected).await;

    // Handshake credential plus explicit authenticate.
    assert_eq!(
        fake.handshake_queries.lock()[0].get("userId").map(String::as_str),
        Some("1")
    );
    wait_for_frames(&fake, &mut m, "authenticate", 1).await;
    assert_eq!(fake.frames.lock()[0]["data"]["userId"], 1);

    // Opening the summary-only conversation loads history and acknowledges it.
    let bob = m.conversation(BOB).unwrap();
    assert_eq!(bob.unread_count, 1);
    assert_eq!(bob.status, PresenceStatus::Online);
    assert!(m.select_conversation(Some(BOB)).await);
    assert_eq!(fake.inbox_hits.load(Ordering::SeqCst), 1);
    let bob = m.conversation(BOB).unwrap();
    assert_eq!(bob.messages.len(), 1);
    assert_eq!(bob.unread_count, 0);
    wait_for_frames(&fake, &mut m, "mark_read", 1).await;
    assert_eq!(fake.frames_named("mark_read")[0]["data"]["messageId"], 10);

    // Send, get the echo, then the peer's reply lands in the open conversation.
    let token = m.send_message(BOB, "hello").unwrap();
    drive_until(&mut m, "pong", |m| {
        m.conversation(BOB)
            .is_some_and(|c| c.messages.iter().any(|x| x.content == "pong: hello"))
    })
    .await;

    let bob = m.conversation(BOB).unwrap();
    let sent = bob
        .messages
        .iter()
        .find(|x| x.temp_id.as_ref() == Some(&token))
        .unwrap();
    assert_eq!(sent.delivery, Delivery::Confirmed);
    assert_eq!(sent.id, MessageId::new(1000));
    assert_eq!(bob.messages.iter().filter(|x| x.content == "hello").count(), 1);
    assert_eq!(bob.status, PresenceStatus::Away);
    assert!(bob.is_typing);

    // The reply was acknowledged because the conversation is open.
    let pong = bob.messages.iter().find(|x| x.content == "pong: hello").unwrap();
    assert!(pong.is_read);
    assert_eq!(bob.unread_count, 0);
    wait_for_frames(&fake, &mut m, "mark_read", 2).await;
    drive_until(&mut m, "REST acknowledgements", |_| fake.rest_reads.lock().len() == 2).await;
    let mut reads = fake.rest_reads.lock().clone();
    reads.sort_unstable();
    assert_eq!(reads, vec![10, 1001]);

    // The directory fills in roles and normalizes single-name entries.
    assert!(m.load_available_users());
    drive_until(&mut m, "directory", |m| !m.directory().is_empty()).await;
    assert_eq!(m.directory().len(), 2);
    assert_eq!(m.directory()[1].full_name(), "Cara Lee");
    assert_eq!(m.conversation(BOB).unwrap().recipient.role, Some(Role::Deliveryman));

    m.shutdown();
}

#[tokio::test]
async fn dropped_socket_reconnects_reauthenticates_and_resyncs() {
    let (addr, fake) = start_fake().await;
    let mut m = live_messenger(addr);

    m.start();
    drive_until(&mut m, "connection", LiveMessenger::is_connected).await;
    wait_for_frames(&fake, &mut m, "authenticate", 1).await;

    // The server closes the socket right after echoing this one.
    m.send_message(BOB, "drop");
    drive_until(&mut m, "disconnect", |m| !m.is_connected()).await;

    // A message that arrives while the client is away.
    fake.inbox.lock().push(json!({
        "id": 20, "sender_id": 2, "receiver_id": 1,
        "content": "missed you", "created_at": "2024-05-01 10:00:00"
    }));

    drive_until(&mut m, "reconnect", LiveMessenger::is_connected).await;
    wait_for_frames(&fake, &mut m, "authenticate", 2).await;
    assert_eq!(fake.handshake_queries.lock().len(), 2);

    drive_until(&mut m, "resync", |m| {
        m.conversation(BOB)
            .is_some_and(|c| c.messages.iter().any(|x| x.content == "missed you"))
    })
    .await;
    let bob = m.conversation(BOB).unwrap();
    assert_eq!(bob.messages.iter().filter(|x| x.content == "drop").count(), 1);
    assert_eq!(bob.unread_count, 2);

    m.shutdown();
    assert!(!m.is_connected());
}
