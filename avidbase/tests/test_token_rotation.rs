mod common;

use avidbase::{Error, TokenScope, ACCESS_TOKEN_HEADER};
use common::mock_server::{AvidbaseMock, ACCOUNT_ID};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

fn token_path() -> String {
    format!("/v1/account/{ACCOUNT_ID}/token")
}

async fn mount_token_once(mock: &AvidbaseMock, token: &str) {
    Mock::given(method("POST"))
        .and(path(token_path()))
        .respond_with(ResponseTemplate::new(200).insert_header(ACCESS_TOKEN_HEADER, token))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock.server)
        .await;
}

#[tokio::test]
async fn test_rotated_token_is_used_by_next_call() {
    let mock = AvidbaseMock::start().await;
    mock.mount_machine_token("T1", 1).await;
    Mock::given(method("GET"))
        .and(path("/v1/user"))
        .and(header(ACCESS_TOKEN_HEADER, "T1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(ACCESS_TOKEN_HEADER, "T2")
                .set_body_json(json!([])),
        )
        .expect(1)
        .mount(&mock.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/user/u-100"))
        .and(header(ACCESS_TOKEN_HEADER, "T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "u-100" })))
        .expect(1)
        .mount(&mock.server)
        .await;

    let client = mock.client();
    client.list_users().await.unwrap();
    assert_eq!(client.machine_token().as_deref(), Some("T2"));
    client.get_user("u-100").await.unwrap();
}

#[tokio::test]
async fn test_token_rotates_even_when_call_fails() {
    let mock = AvidbaseMock::start().await;
    mock.mount_machine_token("T1", 1).await;
    Mock::given(method("GET"))
        .and(path("/v1/user/missing"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header(ACCESS_TOKEN_HEADER, "T2")
                .set_body_string("not found"),
        )
        .mount(&mock.server)
        .await;

    let client = mock.client();
    let err = client.get_user("missing").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(client.machine_token().as_deref(), Some("T2"));
}

#[tokio::test]
async fn test_rotation_updates_user_token_in_user_scope() {
    let mock = AvidbaseMock::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/user"))
        .and(header(ACCESS_TOKEN_HEADER, "U1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(ACCESS_TOKEN_HEADER, "U2")
                .set_body_json(json!([{ "id": "u-100" }])),
        )
        .expect(1)
        .mount(&mock.server)
        .await;

    let client = mock.client().with_scope(TokenScope::User);
    client.set_user_token("U1");
    let users = client.list_users().await.unwrap();

    assert_eq!(users.len(), 1);
    assert_eq!(client.user_token().as_deref(), Some("U2"));
    assert_eq!(client.machine_token(), None);
    assert_eq!(mock.requests_to(&token_path()).await, 0);
}

#[tokio::test]
async fn test_rejected_machine_token_is_reacquired_once() {
    let mock = AvidbaseMock::start().await;
    mount_token_once(&mock, "stale").await;
    mount_token_once(&mock, "fresh").await;
    Mock::given(method("GET"))
        .and(path("/v1/user"))
        .and(header(ACCESS_TOKEN_HEADER, "stale"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .expect(1)
        .mount(&mock.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/user"))
        .and(header(ACCESS_TOKEN_HEADER, "fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "u-100" }])))
        .expect(1)
        .mount(&mock.server)
        .await;

    let client = mock.client();
    let users = client.list_users().await.unwrap();

    assert_eq!(users.len(), 1);
    assert_eq!(client.machine_token().as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_second_rejection_is_returned() {
    let mock = AvidbaseMock::start().await;
    mock.mount_machine_token("machine-token-1", 2).await;
    Mock::given(method("GET"))
        .and(path("/v1/user"))
        .respond_with(ResponseTemplate::new(401).set_body_string("revoked"))
        .expect(2)
        .mount(&mock.server)
        .await;

    let client = mock.client();
    let err = client.list_users().await.unwrap_err();

    assert!(err.is_unauthorized());
    assert!(matches!(err, Error::HttpStatus { ref body, .. } if body == "revoked"));
}

#[tokio::test]
async fn test_rejected_user_token_is_cleared() {
    let mock = AvidbaseMock::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/user/u-100"))
        .respond_with(ResponseTemplate::new(401).set_body_string("session expired"))
        .expect(1)
        .mount(&mock.server)
        .await;

    let client = mock.client().with_scope(TokenScope::User);
    client.set_user_token("U1");
    let err = client.get_user("u-100").await.unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(client.user_token(), None);
    assert_eq!(mock.requests_to(&token_path()).await, 0);
}

#[tokio::test]
async fn test_user_scope_without_login_issues_no_request() {
    let mock = AvidbaseMock::start().await;

    let client = mock.client().with_scope(TokenScope::User);
    let err = client.list_users().await.unwrap_err();

    assert!(matches!(err, Error::NotLoggedIn));
    assert!(mock.requests().await.is_empty());
}
