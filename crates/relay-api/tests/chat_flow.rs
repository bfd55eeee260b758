//! Drives the chat router end to end: in-memory SQLite store, and a fake
//! Gemini endpoint served by axum on a loopback port.
//!
//! The fake answers "Echo #n" for turn n, blocks prompts containing
//! `BLOCKME` with a SAFETY finish reason, and rejects prompts containing
//! `BADKEY` with an invalid-key error.

use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

use relay_api::{AppState, AppStateInner, ChatConfig, SessionReuse, router};
use relay_db::Database;
use relay_genai::{GeminiClient, GenerationConfig};

type Prompts = Arc<Mutex<Vec<String>>>;

async fn spawn_fake_gemini() -> (String, Prompts) {
    let prompts: Prompts = Arc::new(Mutex::new(Vec::new()));
    let recorded = prompts.clone();

    let app = Router::new().route(
        "/v1beta/models/gemini-test:generateContent",
        post(move |Json(body): Json<Value>| {
            let recorded = recorded.clone();
            async move {
                let prompt = body["contents"][0]["parts"][0]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let turn = {
                    let mut prompts = recorded.lock().unwrap();
                    prompts.push(prompt.clone());
                    prompts.len()
                };

                if prompt.contains("BADKEY") {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "error": { "code": 400, "message": "API key not valid. Please pass a valid API key." } })),
                    )
                        .into_response();
                }
                if prompt.contains("BLOCKME") {
                    return Json(json!({ "candidates": [{ "finishReason": "SAFETY" }] })).into_response();
                }
                Json(json!({
                    "candidates": [{
                        "content": { "parts": [{ "text": format!("Echo #{turn}") }] },
                        "finishReason": "STOP"
                    }]
                }))
                .into_response()
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), prompts)
}

async fn test_app(session_reuse: SessionReuse) -> (Router, Prompts) {
    let (app, prompts, _) = test_app_with_state(session_reuse).await;
    (app, prompts)
}

/// Also hands back the shared state so a test can tamper with the store.
async fn test_app_with_state(session_reuse: SessionReuse) -> (Router, Prompts, AppState) {
    let (base_url, prompts) = spawn_fake_gemini().await;
    let config = GenerationConfig::new(SecretString::from("test-key-not-real"))
        .with_model("gemini-test")
        .with_base_url(base_url);
    let state = AppStateInner::new(
        Database::open_in_memory().unwrap(),
        GeminiClient::new(config).unwrap(),
        ChatConfig {
            history_limit: 10,
            session_reuse,
        },
    );
    (router(state.clone()), prompts, state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn chat(app: &Router, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, "/chat", Some(body)).await
}

#[tokio::test]
async fn first_turn_creates_session_and_follow_up_uses_context() {
    let (app, prompts) = test_app(SessionReuse::ReuseLatest).await;

    let (status, first) = chat(&app, json!({ "userId": "u1", "message": "Hello" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["reply"], "Echo #1");
    assert_eq!(first["contextUsed"], false);
    let chat_id = first["chatId"].as_str().unwrap().to_string();
    assert!(!chat_id.is_empty());

    let (status, second) = chat(
        &app,
        json!({ "userId": "u1", "message": "How are you?", "chatId": chat_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["chatId"], chat_id.as_str());
    assert_eq!(second["contextUsed"], true);

    let prompts = prompts.lock().unwrap();
    assert!(prompts[0].ends_with("Hello"));
    assert!(!prompts[0].contains("Previous conversation"));
    assert!(prompts[1].contains("User: Hello\nAssistant: Echo #1"));
    assert!(prompts[1].ends_with("How are you?"));
    // The current message is not repeated in the history block.
    assert_eq!(prompts[1].matches("How are you?").count(), 1);
}

#[tokio::test]
async fn missing_fields_are_rejected_without_side_effects() {
    let (app, prompts) = test_app(SessionReuse::ReuseLatest).await;

    let (status, body) = chat(&app, json!({ "userId": "u1" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("message"));

    let (status, body) = chat(&app, json!({ "message": "hi" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("userId"));

    let (status, _) = chat(&app, json!({ "userId": "u1", "message": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].is_string());

    let (_, sessions) = send(&app, Method::GET, "/chat-sessions/u1", None).await;
    assert_eq!(sessions, json!([]));
    assert!(prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn turn_without_chat_id_reuses_latest_session() {
    let (app, _) = test_app(SessionReuse::ReuseLatest).await;

    let (_, first) = chat(&app, json!({ "userId": "u1", "message": "one" })).await;
    let (_, second) = chat(&app, json!({ "userId": "u1", "message": "two" })).await;
    assert_eq!(first["chatId"], second["chatId"]);
    assert_eq!(second["contextUsed"], true);

    let (status, sessions) = send(&app, Method::GET, "/chat-sessions/u1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["title"], "one");
}

#[tokio::test]
async fn always_create_policy_starts_fresh_sessions() {
    let (app, _) = test_app(SessionReuse::AlwaysCreate).await;

    let (_, first) = chat(&app, json!({ "userId": "u1", "message": "one" })).await;
    let (_, second) = chat(&app, json!({ "userId": "u1", "message": "two" })).await;
    assert_ne!(first["chatId"], second["chatId"]);
    assert_eq!(second["contextUsed"], false);

    let (_, sessions) = send(&app, Method::GET, "/chat-sessions/u1", None).await;
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    // Most recently updated first.
    assert_eq!(sessions[0]["id"], second["chatId"]);
}

#[tokio::test]
async fn explicit_title_creates_new_session() {
    let (app, _) = test_app(SessionReuse::ReuseLatest).await;

    let (_, first) = chat(&app, json!({ "userId": "u1", "message": "one" })).await;
    let (_, titled) = chat(
        &app,
        json!({ "userId": "u1", "message": "two", "title": "Trip planning" }),
    )
    .await;
    assert_ne!(first["chatId"], titled["chatId"]);

    let (_, sessions) = send(&app, Method::GET, "/chat-sessions/u1", None).await;
    assert_eq!(sessions[0]["title"], "Trip planning");
}

#[tokio::test]
async fn long_first_message_is_truncated_into_title() {
    let (app, _) = test_app(SessionReuse::ReuseLatest).await;
    let message = "m".repeat(80);

    chat(&app, json!({ "userId": "u1", "message": message })).await;

    let (_, sessions) = send(&app, Method::GET, "/chat-sessions/u1", None).await;
    assert_eq!(sessions[0]["title"], format!("{}…", "m".repeat(50)));
}

#[tokio::test]
async fn chat_id_of_another_user_is_not_reused() {
    let (app, _) = test_app(SessionReuse::ReuseLatest).await;

    let (_, owned) = chat(&app, json!({ "userId": "alice", "message": "secret plans" })).await;
    let (status, other) = chat(
        &app,
        json!({ "userId": "bob", "message": "hi", "chatId": owned["chatId"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(other["chatId"], owned["chatId"]);
    assert_eq!(other["contextUsed"], false);

    let (status, unknown) = chat(
        &app,
        json!({ "userId": "carol", "message": "hi", "chatId": "does-not-exist" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(unknown["chatId"], "does-not-exist");
}

#[tokio::test]
async fn messages_are_listed_oldest_first() {
    let (app, _) = test_app(SessionReuse::ReuseLatest).await;

    let (_, first) = chat(&app, json!({ "userId": "u1", "message": "first" })).await;
    let chat_id = first["chatId"].as_str().unwrap().to_string();
    chat(&app, json!({ "userId": "u1", "message": "second", "chatId": chat_id })).await;

    let (status, messages) =
        send(&app, Method::GET, &format!("/chat-messages/{chat_id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let pairs: Vec<(String, String)> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| {
            (
                m["role"].as_str().unwrap().to_string(),
                m["content"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        [
            ("user".to_string(), "first".to_string()),
            ("bot".to_string(), "Echo #1".to_string()),
            ("user".to_string(), "second".to_string()),
            ("bot".to_string(), "Echo #2".to_string()),
        ]
    );
}

#[tokio::test]
async fn prompt_history_is_capped_at_ten_messages() {
    let (app, prompts) = test_app(SessionReuse::ReuseLatest).await;

    for i in 0..7 {
        let (status, _) = chat(&app, json!({ "userId": "u1", "message": format!("msg-{i}") })).await;
        assert_eq!(status, StatusCode::OK);
    }

    let prompts = prompts.lock().unwrap();
    let last = prompts.last().unwrap();
    // Twelve stored messages precede the seventh turn; the oldest two drop out.
    assert!(!last.contains("User: msg-0"));
    assert!(!last.contains("Assistant: Echo #1\n"));
    assert!(last.contains("User: msg-1"));
    assert!(last.contains("Assistant: Echo #6"));
    assert!(last.ends_with("msg-6"));
}

#[tokio::test]
async fn deleting_a_session_removes_its_messages() {
    let (app, _) = test_app(SessionReuse::ReuseLatest).await;

    let (_, turn) = chat(&app, json!({ "userId": "u1", "message": "to be deleted" })).await;
    let chat_id = turn["chatId"].as_str().unwrap().to_string();

    let (status, body) =
        send(&app, Method::DELETE, &format!("/chat-sessions/{chat_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Chat session deleted successfully");

    let (_, messages) = send(&app, Method::GET, &format!("/chat-messages/{chat_id}"), None).await;
    assert_eq!(messages, json!([]));

    let (_, sessions) = send(&app, Method::GET, "/chat-sessions/u1", None).await;
    assert!(
        sessions
            .as_array()
            .unwrap()
            .iter()
            .all(|s| s["id"] != chat_id.as_str())
    );
}

#[tokio::test]
async fn scoped_delete_leaves_other_users_sessions() {
    let (app, _) = test_app(SessionReuse::ReuseLatest).await;

    let (_, turn) = chat(&app, json!({ "userId": "alice", "message": "mine" })).await;
    let chat_id = turn["chatId"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/chat-sessions/{chat_id}?userId=bob"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, messages) = send(&app, Method::GET, &format!("/chat-messages/{chat_id}"), None).await;
    assert_eq!(messages.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn delete_with_malformed_query_is_a_json_error() {
    let (app, _) = test_app(SessionReuse::ReuseLatest).await;

    let (_, turn) = chat(&app, json!({ "userId": "alice", "message": "keep me" })).await;
    let chat_id = turn["chatId"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::DELETE,
        &format!("/chat-sessions/{chat_id}?userId=a&userId=b"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid query string"));

    // Nothing was deleted.
    let (_, messages) = send(&app, Method::GET, &format!("/chat-messages/{chat_id}"), None).await;
    assert_eq!(messages.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn failed_writes_do_not_block_the_reply() {
    let (app, prompts, state) = test_app_with_state(SessionReuse::ReuseLatest).await;
    state
        .db
        .with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER no_messages BEFORE INSERT ON chat_messages
                 BEGIN SELECT RAISE(ABORT, 'nope'); END;
                 CREATE TRIGGER no_touch BEFORE UPDATE ON chat_sessions
                 BEGIN SELECT RAISE(ABORT, 'nope'); END;",
            )?;
            Ok(())
        })
        .unwrap();

    let (status, body) = chat(&app, json!({ "userId": "u1", "message": "Hello" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "Echo #1");
    assert_eq!(body["contextUsed"], false);
    assert_eq!(prompts.lock().unwrap().len(), 1);

    let chat_id = body["chatId"].as_str().unwrap().to_string();
    let (status, messages) =
        send(&app, Method::GET, &format!("/chat-messages/{chat_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(messages, json!([]));
}

#[tokio::test]
async fn session_store_failure_aborts_before_generation() {
    let (app, prompts, state) = test_app_with_state(SessionReuse::ReuseLatest).await;
    state
        .db
        .with_conn(|conn| {
            conn.execute_batch("DROP TABLE chat_sessions;")?;
            Ok(())
        })
        .unwrap();

    let (status, body) = chat(&app, json!({ "userId": "u1", "message": "Hello" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
    assert!(body["details"].is_string());
    assert!(prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn safety_blocked_reply_is_a_user_facing_error() {
    let (app, _) = test_app(SessionReuse::ReuseLatest).await;

    let (status, body) = chat(&app, json!({ "userId": "u1", "message": "BLOCKME please" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("safety"));

    // The session and the user's message were written before generation.
    let (_, sessions) = send(&app, Method::GET, "/chat-sessions/u1", None).await;
    let chat_id = sessions[0]["id"].as_str().unwrap().to_string();
    let (_, messages) = send(&app, Method::GET, &format!("/chat-messages/{chat_id}"), None).await;
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
}

#[tokio::test]
async fn credential_failure_is_explained() {
    let (app, _) = test_app(SessionReuse::ReuseLatest).await;

    let (status, body) = chat(&app, json!({ "userId": "u1", "message": "BADKEY" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Invalid API key configuration");
}

#[tokio::test]
async fn health_reports_backend_configuration() {
    let (app, _) = test_app(SessionReuse::ReuseLatest).await;

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["generationBackendConfigured"], true);
    assert!(body["timestamp"].is_string());
}
