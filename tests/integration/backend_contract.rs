//! The coordinator driving the HTTP chat backend against a mock server.

use crate::helpers::{Fakes, Harness, eventually, launch_with_backend, test_config};
use avatar_chat::RuntimeEvent;
use avatar_chat::history::ChatRole;
use avatar_chat::providers::HttpChatBackend;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn launch_http(server: &MockServer) -> Harness {
    let mut config = test_config();
    config.session.activation_delay_ms = 10;
    let backend = Arc::new(HttpChatBackend::new(format!(
        "{}/api/v1/chat/",
        server.uri()
    )));
    let h = launch_with_backend(config, Fakes::healthy(), Some(backend));
    h.start_active().await;
    h
}

#[tokio::test]
async fn reply_from_backend_is_recorded_and_spoken() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/"))
        .and(body_json(json!({"session_id": "test-session", "query": "stock?"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "We have ten. Want more?"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = launch_http(&server).await;
    h.handle.submit("stock?").unwrap();

    eventually(|| h.synthesizer.spoken().len() == 2).await;
    assert!(h.synthesizer.spoke("We have ten."));
    assert!(h.synthesizer.spoke("Want more?"));

    let history = h.handle.snapshot().await.unwrap().history;
    let last = history.last().unwrap();
    assert_eq!(last.role, ChatRole::Assistant);
    assert_eq!(last.content, "We have ten. Want more?");
}

#[tokio::test]
async fn http_error_surfaces_as_one_chat_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database down"))
        .expect(1)
        .mount(&server)
        .await;

    let mut h = launch_http(&server).await;
    h.handle.submit("anything").unwrap();

    let mut errors = Vec::new();
    eventually(|| {
        errors.extend(h.drain_events().into_iter().filter_map(|e| match e {
            RuntimeEvent::ChatError { message } => Some(message),
            _ => None,
        }));
        !errors.is_empty()
    })
    .await;
    assert_eq!(errors, ["HTTP 500: database down"]);

    let history = h.handle.snapshot().await.unwrap().history;
    assert!(history.iter().all(|t| t.role != ChatRole::Assistant));
}
