use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use squadlink_chat::backend::ChatBackend;
use squadlink_chat::{ChatError, HttpBackend};
use squadlink_messaging::{
    AttachmentKind, AttachmentUpload, ConversationId, MessageId, OutgoingMessage, UserId,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const TOKEN: &str = "secret";

#[derive(Clone, Default)]
struct Recorded {
    reactions: Arc<Mutex<Vec<(String, String)>>>,
    opened: Arc<Mutex<Vec<Value>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {TOKEN}"))
        .unwrap_or(false)
}

fn conversation_json(id: u64) -> Value {
    json!({
        "id": id,
        "participants": [
            {"id": 1, "display_name": "Me"},
            {"id": 2, "display_name": "Rook", "avatar_url": "https://cdn.test/rook.png"}
        ],
        "last_message": {"sender_name": "Rook", "content": "gg", "sent_at": "2024-05-01T10:00:00Z"},
        "unread_count": 2,
        "last_activity": "2024-05-01T10:00:00Z"
    })
}

async fn list_conversations(headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }
    Json(json!([conversation_json(3)])).into_response()
}

async fn open_conversation(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.opened.lock().unwrap().push(body);
    Json(conversation_json(4))
}

async fn list_messages(Path(id): Path<String>) -> Json<Value> {
    Json(json!([
        {
            "id": 10,
            "conversation_id": id,
            "sender": {"id": 2, "display_name": "Rook"},
            "content": "ready?",
            "reply_count": 1,
            "created_at": "2024-05-01T09:58:00Z",
            "reactions": {"1": "👍"}
        }
    ]))
}

async fn send_message(Path(id): Path<String>, mut multipart: Multipart) -> Json<Value> {
    let mut content = None;
    let mut parent_id = None;
    let mut attachment = None;
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "content" => content = Some(field.text().await.unwrap()),
            "parent_id" => parent_id = Some(field.text().await.unwrap()),
            "image" | "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let mime_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await.unwrap();
                attachment = Some(json!({
                    "kind": name,
                    "name": file_name,
                    "size": bytes.len(),
                    "mime_type": mime_type,
                    "url": format!("https://cdn.test/{file_name}")
                }));
            }
            _ => {}
        }
    }
    Json(json!({
        "id": 11,
        "conversation_id": id,
        "sender": {"id": 1, "display_name": "Me"},
        "content": content,
        "attachment": attachment,
        "parent_id": parent_id,
        "created_at": "2024-05-01T10:01:00Z"
    }))
}

async fn edit_message() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn delete_message(Path(id): Path<String>) -> StatusCode {
    if id == "gone" {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn react(
    State(recorded): State<Recorded>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    let emoji = body["emoji"].as_str().unwrap_or_default().to_string();
    recorded.reactions.lock().unwrap().push((id, emoji));
    StatusCode::OK
}

async fn list_replies() -> &'static str {
    "not json"
}

async fn spawn_stub() -> (SocketAddr, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/conversations", get(list_conversations).post(open_conversation))
        .route("/api/conversations/:id/messages", get(list_messages).post(send_message))
        .route("/api/messages/:id", delete(delete_message).patch(edit_message))
        .route("/api/messages/:id/reactions", post(react))
        .route("/api/messages/:id/replies", get(list_replies))
        .with_state(recorded.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, recorded)
}

fn backend(addr: SocketAddr, token: Option<&str>) -> HttpBackend {
    HttpBackend::new(
        format!("http://{addr}/api/"),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn lists_conversations_with_bearer_token() {
    let (addr, _) = spawn_stub().await;
    let conversations = backend(addr, Some(TOKEN)).list_conversations().await.unwrap();
    assert_eq!(conversations.len(), 1);
    let conversation = &conversations[0];
    assert_eq!(conversation.id, ConversationId::new("3"));
    assert_eq!(conversation.unread_count, 2);
    assert_eq!(
        conversation.counterpart(&UserId::new("1")).unwrap().display_name,
        "Rook"
    );
    assert_eq!(conversation.last_message.as_ref().unwrap().summary(), "gg");
}

#[tokio::test]
async fn missing_token_maps_to_auth_error() {
    let (addr, _) = spawn_stub().await;
    let err = backend(addr, None).list_conversations().await.unwrap_err();
    assert_eq!(err, ChatError::Auth("bad token".into()));
}

#[tokio::test]
async fn open_conversation_posts_participant() {
    let (addr, recorded) = spawn_stub().await;
    let conversation = backend(addr, Some(TOKEN))
        .open_conversation(&UserId::new("2"))
        .await
        .unwrap();
    assert_eq!(conversation.id, ConversationId::new("4"));
    assert_eq!(
        recorded.opened.lock().unwrap().as_slice(),
        &[json!({"participant_id": "2"})]
    );
}

#[tokio::test]
async fn decodes_messages_with_numeric_ids() {
    let (addr, _) = spawn_stub().await;
    let messages = backend(addr, Some(TOKEN))
        .list_messages(&ConversationId::new("3"))
        .await
        .unwrap();
    assert_eq!(messages[0].id, MessageId::server("10"));
    assert_eq!(messages[0].reply_count, 1);
    assert_eq!(
        messages[0].reactions.get(&UserId::new("1")).map(String::as_str),
        Some("👍")
    );
}

#[tokio::test]
async fn send_uploads_multipart_fields() {
    let (addr, _) = spawn_stub().await;
    let outgoing = OutgoingMessage {
        content: Some("see map".into()),
        image: Some(AttachmentUpload::new("map.png", "image/png", vec![1, 2, 3, 4])),
        file: None,
        parent_id: Some(MessageId::server("10")),
    };
    let message = backend(addr, Some(TOKEN))
        .send_message(&ConversationId::new("3"), outgoing)
        .await
        .unwrap();

    assert_eq!(message.id, MessageId::server("11"));
    assert_eq!(message.content.as_deref(), Some("see map"));
    assert_eq!(message.parent_id, Some(MessageId::server("10")));
    let attachment = message.attachment.unwrap();
    assert_eq!(attachment.kind, AttachmentKind::Image);
    assert_eq!(attachment.size, 4);
    assert_eq!(attachment.mime_type, "image/png");
    assert_eq!(attachment.url.as_deref(), Some("https://cdn.test/map.png"));
}

#[tokio::test]
async fn delete_maps_missing_message_to_not_found() {
    let (addr, _) = spawn_stub().await;
    let backend = backend(addr, Some(TOKEN));
    backend.delete_message(&MessageId::server("10")).await.unwrap();
    let err = backend
        .delete_message(&MessageId::server("gone"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}

#[tokio::test]
async fn server_failures_carry_status_and_body() {
    let (addr, _) = spawn_stub().await;
    let err = backend(addr, Some(TOKEN))
        .edit_message(&MessageId::server("10"), "edited")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ChatError::Server {
            status: 500,
            message: "boom".into()
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn reactions_post_the_emoji() {
    let (addr, recorded) = spawn_stub().await;
    backend(addr, Some(TOKEN))
        .react(&MessageId::server("10"), "🔥")
        .await
        .unwrap();
    assert_eq!(
        recorded.reactions.lock().unwrap().as_slice(),
        &[("10".to_string(), "🔥".to_string())]
    );
}

#[tokio::test]
async fn malformed_body_is_a_server_error() {
    let (addr, _) = spawn_stub().await;
    let err = backend(addr, Some(TOKEN))
        .list_replies(&MessageId::server("10"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Server { status: 200, .. }));
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = backend(addr, Some(TOKEN)).list_conversations().await.unwrap_err();
    assert!(matches!(err, ChatError::Network(_)));
}
