// Integration tests for the backend client
// These run BackendApiClient against a local mock HTTP server

use keyez_admin_lib::backend_api::{BackendApi, BackendApiClient};
use keyez_admin_lib::services::roster::{BulkAction, PageRequest};
use keyez_admin_lib::services::session::{AdminProfile, SessionToken};
use keyez_admin_lib::{ConsoleError, SessionContext};
use rstest::rstest;
use serde_json::json;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer) -> BackendApiClient {
    let base_url = format!("{}/api", server.uri());
    BackendApiClient::with_timeout(&base_url, Duration::from_secs(5)).unwrap()
}

fn session(token: &str) -> SessionContext {
    SessionContext::new(
        SessionToken::new(token),
        AdminProfile {
            id: "admin".into(),
            username: "root".into(),
            is_admin: true,
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_login_builds_admin_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"username": "root", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "jwt-1",
            "user": {"_id": "a1", "username": "root", "isAdmin": true}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = assert_ok!(client_for(&server).await.login("root", "pw").await);
    assert_eq!(session.admin().id, "a1");
    assert_eq!(session.bearer_token(), "jwt-1");
}

#[tokio::test]
async fn test_login_rejects_non_admin() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "jwt-2",
            "user": {"_id": "u1", "username": "bob", "isAdmin": false}
        })))
        .mount(&server)
        .await;

    let err = assert_err!(client_for(&server).await.login("bob", "pw").await);
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn test_login_validates_input_before_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = assert_err!(client.login("", "pw").await);
    assert!(matches!(err, ConsoleError::Validation(_)));
    assert_err!(client.login("root", "  ").await);
}

#[tokio::test]
async fn test_requests_carry_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/messages/bob"))
        .and(header("authorization", "Bearer jwt-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversation": [
                {"_id": "m1", "sender": "bob", "text": "hi", "createdAt": "2025-10-16T10:00:00Z"},
                {"_id": "m2", "sender": {"_id": "admin", "username": "root"}, "content": "yo", "createdAt": "2025-10-16T10:01:00Z"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await.with_session(&session("jwt-3"));
    let records = assert_ok!(client.get_conversation("bob").await);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id.as_deref(), Some("m1"));
}

#[tokio::test]
async fn test_unauthorized_status_maps_to_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/conversations"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Token expired"})))
        .mount(&server)
        .await;

    let client = client_for(&server).await.with_session(&session("stale"));
    let err = assert_err!(client.get_conversations().await);
    assert!(err.is_unauthorized());
    assert!(err.to_string().contains("Token expired"));
}

#[tokio::test]
async fn test_server_error_keeps_status_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/send"))
        .and(body_json(json!({"to": "bob", "text": "hi"})))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .mount(&server)
        .await;

    let client = client_for(&server).await.with_session(&session("jwt"));
    match client.send_message("bob", "hi").await {
        Err(ConsoleError::Backend { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_network_unavailable() {
    let client =
        BackendApiClient::with_timeout("http://127.0.0.1:1/api", Duration::from_secs(2)).unwrap();
    let err = assert_err!(client.get_conversations().await);
    assert!(matches!(err, ConsoleError::NetworkUnavailable(_)), "{:?}", err);
}

#[tokio::test]
async fn test_list_users_sends_page_and_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .and(query_param("page", "2"))
        .and(query_param("limit", "10"))
        .and(query_param("isAdmin", "false"))
        .and(query_param("search", "al"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [{"_id": "u1", "username": "alice", "isAdmin": false}],
            "totalPages": 3
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await.with_session(&session("jwt"));
    let request = PageRequest::new(2, 10)
        .with_filter("isAdmin", "false")
        .with_filter("search", "al");
    let page = assert_ok!(client.list_users(&request).await);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.users[0].username, "alice");
    assert!(page.users[0].is_active);
}

#[tokio::test]
async fn test_bulk_and_group_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/users/bulk"))
        .and(body_json(json!({"action": "delete", "userIds": ["u1", "u2"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"affected": 2})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/groups/g%201/messages"))
        .and(body_json(json!({"text": "hello all"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "message": {"_id": "gm1", "sender": "admin", "text": "hello all", "createdAt": "2025-10-16T10:00:00Z"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/groups/g1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await.with_session(&session("jwt"));
    let ids = vec!["u1".to_string(), "u2".to_string()];
    let result = assert_ok!(client.bulk_users(BulkAction::Delete, &ids).await);
    assert_eq!(result.affected, 2);

    let echo = assert_ok!(client.send_group_message("g 1", "hello all").await);
    assert_eq!(echo.and_then(|m| m.id).as_deref(), Some("gm1"));

    assert_ok!(client.delete_group("g1").await);
}

#[rstest]
#[case::wrapped(json!({"user": {"_id": "a1", "username": "root", "isAdmin": true}}))]
#[case::bare(json!({"id": "a1", "username": "root", "isAdmin": true}))]
#[tokio::test]
async fn test_profile_accepts_both_shapes(#[case] body: serde_json::Value) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/profile"))
        .and(header("authorization", "Bearer jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await.with_session(&session("jwt"));
    let profile = assert_ok!(client.profile().await);
    assert_eq!(profile.id, "a1");
    assert_eq!(profile.username, "root");
    assert!(profile.is_admin);
}

#[rstest]
#[case::wrapped(json!({"conversations": [
    {"userId": "bob", "username": "bob", "lastMessage": "hey", "unreadCount": 2},
    {"_id": "carol"}
]}))]
#[case::bare(json!([
    {"userId": "bob", "username": "bob", "lastMessage": "hey", "unreadCount": 2},
    {"_id": "carol"}
]))]
#[tokio::test]
async fn test_conversations_accept_both_shapes(#[case] body: serde_json::Value) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chat/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await.with_session(&session("jwt"));
    let conversations = assert_ok!(client.get_conversations().await);
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0].id, "bob");
    assert_eq!(conversations[0].display_name.as_deref(), Some("bob"));
    assert_eq!(conversations[0].unread_count, 2);
    assert_eq!(conversations[1].id, "carol");
    assert!(conversations[1].last_message.is_none());
}
