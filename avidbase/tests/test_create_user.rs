mod common;

use avidbase::types::CreateUser;
use avidbase::ACCESS_TOKEN_HEADER;
use common::mock_server::AvidbaseMock;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_create_user_valid() {
    let mock = AvidbaseMock::start().await;
    mock.mount_fixture("token/acquire_valid.json").await;
    mock.mount_fixture("user/create_user_valid.json").await;

    let client = mock.client();
    let user = CreateUser::new()
        .with_first_name("Katherine")
        .with_last_name("Johnson")
        .with_username("kjohnson")
        .with_email("kj@example.com")
        .with_password("orbit");

    let created = client.create_user(&user).await.unwrap();
    assert_eq!(created.id, "u-200");
    assert_eq!(created.username, "kjohnson");
}

#[tokio::test]
async fn test_create_user_omits_absent_fields() {
    let mock = AvidbaseMock::start().await;
    mock.mount_fixture("token/acquire_valid.json").await;
    Mock::given(method("POST"))
        .and(path("/v1/user"))
        .and(header(ACCESS_TOKEN_HEADER, "machine-token-1"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "username": "kjohnson",
            "password": "orbit",
            "data": { "team": "flight" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "u-200" })))
        .expect(1)
        .mount(&mock.server)
        .await;

    let client = mock.client();
    let mut data = serde_json::Map::new();
    data.insert("team".to_string(), json!("flight"));
    let user = CreateUser::new()
        .with_username("kjohnson")
        .with_password("orbit")
        .with_data(data);

    let created = client.create_user(&user).await.unwrap();
    assert_eq!(created.id, "u-200");
}

#[tokio::test]
async fn test_create_user_conflict() {
    let mock = AvidbaseMock::start().await;
    mock.mount_fixture("token/acquire_valid.json").await;
    mock.mount_fixture("user/create_user_conflict.json").await;

    let client = mock.client();
    let user = CreateUser::new().with_username("ada");
    let err = client.create_user(&user).await.unwrap_err();
    assert_eq!(err.status(), Some(409));
}
