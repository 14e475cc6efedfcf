use avidbase::{AvidbaseClient, Environment, ACCESS_TOKEN_HEADER};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use wiremock::matchers::{body_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const ACCOUNT_ID: &str = "acme";
pub const API_KEY: &str = "test_api_key";

#[derive(Deserialize)]
pub struct Fixture {
    #[serde(rename = "_meta")]
    pub meta: Option<FixtureMeta>,
    pub request: FixtureRequest,
    pub response: FixtureResponse,
}

#[derive(Deserialize)]
pub struct FixtureMeta {
    /// Token the request must carry in its `Access-Token` header
    pub access_token: Option<String>,
}

#[derive(Deserialize)]
pub struct FixtureRequest {
    pub method: String,
    pub path_pattern: String,
}

#[derive(Deserialize)]
pub struct FixtureResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// JSON bodies are sent as JSON, string bodies verbatim
    pub body: serde_json::Value,
}

pub struct AvidbaseMock {
    pub server: MockServer,
}

impl AvidbaseMock {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
    }

    pub async fn mount_fixture(&self, fixture_path: &str) {
        self.mount_fixture_in("min", fixture_path).await;
    }

    pub async fn mount_fixture_in(&self, fixture_set: &str, fixture_path: &str) {
        let full_path = Self::fixtures_dir().join(fixture_set).join(fixture_path);

        let content = fs::read_to_string(&full_path)
            .unwrap_or_else(|e| panic!("Failed to read fixture {}: {}", full_path.display(), e));

        let fixture: Fixture = serde_json::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse fixture {}: {}", full_path.display(), e));

        let mut mock = Mock::given(method(fixture.request.method.as_str()))
            .and(path_regex(&fixture.request.path_pattern));

        if let Some(token) = fixture.meta.and_then(|meta| meta.access_token) {
            mock = mock.and(header(ACCESS_TOKEN_HEADER, token.as_str()));
        }

        let mut response = ResponseTemplate::new(fixture.response.status_code);
        for (name, value) in &fixture.response.headers {
            response = response.insert_header(name.as_str(), value.as_str());
        }
        response = match fixture.response.body {
            serde_json::Value::String(text) => response.set_body_string(text),
            body => response.set_body_json(body),
        };

        mock.respond_with(response).mount(&self.server).await;
    }

    /// Serves `token` from the machine token endpoint and expects exactly
    /// `expected_calls` acquisitions.
    pub async fn mount_machine_token(&self, token: &str, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path(format!("/v1/account/{ACCOUNT_ID}/token")))
            .and(body_json(json!({ "api_key": API_KEY })))
            .respond_with(ResponseTemplate::new(200).insert_header(ACCESS_TOKEN_HEADER, token))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    pub async fn requests(&self) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .expect("request recording is enabled")
    }

    pub async fn requests_to(&self, request_path: &str) -> usize {
        self.requests()
            .await
            .iter()
            .filter(|request| request.url.path() == request_path)
            .count()
    }

    pub fn base_url(&self) -> String {
        format!("{}/", self.server.uri())
    }

    pub fn client(&self) -> AvidbaseClient {
        AvidbaseClient::new(ACCOUNT_ID, API_KEY, Environment::Development)
            .with_base_url(self.base_url())
    }

    pub fn client_with_api_key(&self, api_key: &str) -> AvidbaseClient {
        AvidbaseClient::new(ACCOUNT_ID, api_key, Environment::Development)
            .with_base_url(self.base_url())
    }
}
