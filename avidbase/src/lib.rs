pub mod types;

mod identifier;
mod token;

pub use crate::identifier::LoginIdentifier;
pub use crate::token::TokenScope;

use crate::token::TokenStore;
use crate::types::{AuthOutput, CreateUser, Identity, LoginRequest, TokenRequest, UpdateUser};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Header carrying a bearer token on requests, and a rotated one on responses.
pub const ACCESS_TOKEN_HEADER: &str = "Access-Token";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing required input: {0}")]
    MissingInput(&'static str),
    #[error("not logged in: no user access token is held")]
    NotLoggedIn,
    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {status} {reason}: {body}")]
    HttpStatus {
        status: u16,
        reason: String,
        body: String,
    },
    #[error("response is missing the Access-Token header")]
    MissingAccessToken,
    #[error("unable to encode request body: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("unable to decode {context} response: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// HTTP status code behind this error, if the server answered.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED.as_u16())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND.as_u16())
    }
}

/// Backend deployment a client talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    pub const PRODUCTION_URL: &'static str = "https://api.avidbase.com/";
    pub const DEVELOPMENT_URL: &'static str = "https://dev-api.avidbase.com/";

    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Production => Self::PRODUCTION_URL,
            Self::Development => Self::DEVELOPMENT_URL,
        }
    }

    #[must_use]
    pub const fn from_production_flag(is_production: bool) -> Self {
        if is_production {
            Self::Production
        } else {
            Self::Development
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentParseError {
    value: String,
}

impl fmt::Display for EnvironmentParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid environment '{}'; expected one of: production, development",
            self.value
        )
    }
}

impl std::error::Error for EnvironmentParseError {}

impl std::str::FromStr for Environment {
    type Err = EnvironmentParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            _ => Err(EnvironmentParseError {
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Clone)]
struct Credentials {
    account_id: String,
    api_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Client for the Avidbase identity API.
///
/// Clones share credentials and token state, so a clone switched to
/// [`TokenScope::User`] with [`with_scope`](Self::with_scope) sees the user
/// token stored by a login made through the original.
#[derive(Debug, Clone)]
pub struct AvidbaseClient {
    client: Client,
    base_url: String,
    credentials: Arc<Credentials>,
    tokens: Arc<TokenStore>,
    scope: TokenScope,
}

impl AvidbaseClient {
    /// Creates a client for `account_id` authenticating with `api_key`.
    ///
    /// Nothing is validated or requested here; the machine token is acquired
    /// lazily by the first call that needs it.
    #[must_use]
    pub fn new(
        account_id: impl Into<String>,
        api_key: impl Into<String>,
        environment: Environment,
    ) -> Self {
        let account_id = account_id.into();
        tracing::debug!(
            "Creating AvidbaseClient for account {} ({:?})",
            account_id,
            environment
        );
        Self {
            client: Client::new(),
            base_url: environment.base_url().to_string(),
            credentials: Arc::new(Credentials {
                account_id,
                api_key: api_key.into(),
            }),
            tokens: Arc::default(),
            scope: TokenScope::Machine,
        }
    }

    /// Overrides the environment's base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Selects the token used by `list_users`, `get_user`, `create_user`
    /// and `update_user`. Defaults to [`TokenScope::Machine`].
    #[must_use]
    pub fn with_scope(mut self, scope: TokenScope) -> Self {
        self.scope = scope;
        self
    }

    /// Uses a preconfigured `reqwest` client (proxies, timeouts, TLS).
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.credentials.account_id
    }

    #[must_use]
    pub const fn scope(&self) -> TokenScope {
        self.scope
    }

    /// The machine token currently held, without acquiring one.
    #[must_use]
    pub fn machine_token(&self) -> Option<String> {
        self.tokens.get(TokenScope::Machine)
    }

    /// The user token from the last login, if any.
    #[must_use]
    pub fn user_token(&self) -> Option<String> {
        self.tokens.get(TokenScope::User)
    }

    /// Restores a user token obtained earlier, e.g. from a saved session.
    pub fn set_user_token(&self, token: impl Into<String>) {
        self.tokens.set(TokenScope::User, token.into());
    }

    /// Drops the machine token; the next call acquires a fresh one.
    pub fn clear_machine_token(&self) {
        self.tokens.clear(TokenScope::Machine);
    }

    /// Forgets the user token.
    pub fn logout(&self) {
        self.tokens.clear(TokenScope::User);
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let invalid = |reason: String| Error::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments.iter());
        Ok(url)
    }

    /// Returns the held machine token, acquiring one if none is held.
    ///
    /// A held token is returned as is: there is no expiry check and no
    /// proactive refresh.
    ///
    /// # Errors
    /// Returns an error if the account id or API key is empty, the request
    /// fails, the status is not 200 or the response carries no token.
    pub async fn ensure_machine_token(&self) -> Result<String, Error> {
        if let Some(token) = self.tokens.get(TokenScope::Machine) {
            return Ok(token);
        }
        let _guard = self.tokens.acquisition.lock().await;
        // Another caller may have finished acquiring while we waited.
        if let Some(token) = self.tokens.get(TokenScope::Machine) {
            return Ok(token);
        }
        self.acquire_machine_token().await
    }

    async fn acquire_machine_token(&self) -> Result<String, Error> {
        let Credentials {
            account_id,
            api_key,
        } = &*self.credentials;
        if account_id.is_empty() {
            return Err(Error::MissingInput("account id"));
        }
        if api_key.is_empty() {
            return Err(Error::MissingInput("api key"));
        }

        let url = self.endpoint(&["v1", "account", account_id.as_str(), "token"])?;
        tracing::debug!("Requesting machine access token from: {}", url);

        let response = self
            .client
            .post(url)
            .json(&TokenRequest { api_key })
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send machine token request: {}", e);
                Error::from(e)
            })?;
        let response = require_ok(response, "machine token").await?;
        let token = access_token(response.headers()).ok_or(Error::MissingAccessToken)?;

        tracing::info!("Acquired machine access token ({} chars)", token.len());
        self.tokens.set(TokenScope::Machine, token.clone());
        Ok(token)
    }

    /// Authenticates an end user and stores the returned user token.
    ///
    /// `email_or_username` is sent as `email` when it parses as an email
    /// address and as `username` otherwise.
    ///
    /// # Errors
    /// Returns an error if an input is empty, the request fails, the status
    /// is not 200, the response carries no token or the body cannot be parsed.
    pub async fn login(
        &self,
        email_or_username: &str,
        password: &str,
    ) -> Result<AuthOutput, Error> {
        let account_id = self.credentials.account_id.as_str();
        if account_id.is_empty() {
            return Err(Error::MissingInput("account id"));
        }
        if email_or_username.is_empty() {
            return Err(Error::MissingInput("email or username"));
        }
        if password.is_empty() {
            return Err(Error::MissingInput("password"));
        }

        let identifier = LoginIdentifier::classify(email_or_username);
        let request = LoginRequest {
            account_uuid: account_id,
            password,
            email: identifier.email(),
            username: identifier.username(),
        };

        let url = self.endpoint(&["v1", "auth"])?;
        tracing::debug!("Sending login request to: {}", url);

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send login request: {}", e);
                Error::from(e)
            })?;
        let response = require_ok(response, "login").await?;
        let token = access_token(response.headers()).ok_or(Error::MissingAccessToken)?;
        let output: AuthOutput = parse_body(response, "login").await?;

        tracing::info!(
            "Logged in user {} with {} permissions",
            output.user.id,
            output.permissions.len()
        );
        self.tokens.set(TokenScope::User, token);
        Ok(output)
    }

    /// Lists every user of the account, in the order the API returns them.
    ///
    /// # Errors
    /// Returns an error if no token can be obtained, the request fails, the
    /// status is not 200 or the response cannot be parsed.
    pub async fn list_users(&self) -> Result<Vec<Identity>, Error> {
        let url = self.endpoint(&["v1", "user"])?;
        let response = self.send_authenticated::<()>(Method::GET, url, None).await?;
        decode(response, "list users").await
    }

    /// Retrieves a single user by id.
    ///
    /// # Errors
    /// Returns an error if `user_id` is empty, no token can be obtained, the
    /// request fails, the status is not 200 or the response cannot be parsed.
    pub async fn get_user(&self, user_id: &str) -> Result<Identity, Error> {
        if user_id.is_empty() {
            return Err(Error::MissingInput("user id"));
        }
        let url = self.endpoint(&["v1", "user", user_id])?;
        let response = self.send_authenticated::<()>(Method::GET, url, None).await?;
        decode(response, "get user").await
    }

    /// Creates a user and returns the stored record.
    ///
    /// # Errors
    /// Returns an error if no token can be obtained, the request fails, the
    /// status is not 200 or the response cannot be parsed.
    pub async fn create_user(&self, user: &CreateUser) -> Result<Identity, Error> {
        let url = self.endpoint(&["v1", "user"])?;
        let response = self.send_authenticated(Method::POST, url, Some(user)).await?;
        decode(response, "create user").await
    }

    /// Applies a partial update to a user and returns the updated record.
    ///
    /// # Errors
    /// Returns an error if `user_id` is empty, no token can be obtained, the
    /// request fails, the status is not 200 or the response cannot be parsed.
    pub async fn update_user(
        &self,
        user_id: &str,
        update: &UpdateUser,
    ) -> Result<Identity, Error> {
        if user_id.is_empty() {
            return Err(Error::MissingInput("user id"));
        }
        let url = self.endpoint(&["v1", "user", user_id])?;
        let response = self.send_authenticated(Method::PUT, url, Some(update)).await?;
        decode(response, "update user").await
    }

    async fn scope_token(&self) -> Result<String, Error> {
        match self.scope {
            TokenScope::Machine => self.ensure_machine_token().await,
            TokenScope::User => self.tokens.get(TokenScope::User).ok_or(Error::NotLoggedIn),
        }
    }

    /// Sends a request with the scope's token.
    ///
    /// A 401 on the machine scope drops the rejected token, acquires a new
    /// one and retries once; on the user scope it drops the user token.
    async fn send_authenticated<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<Response, Error> {
        let body = body.map(serde_json::to_vec).transpose().map_err(Error::Encode)?;
        let token = self.scope_token().await?;
        let response = self.dispatch(&method, &url, body.as_deref(), &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        match self.scope {
            TokenScope::User => {
                tracing::warn!("User access token rejected by {} {}", method, url);
                self.tokens.clear_if(TokenScope::User, &token);
                Ok(response)
            }
            TokenScope::Machine => {
                tracing::warn!(
                    "Machine access token rejected by {} {}; re-acquiring once",
                    method,
                    url
                );
                self.tokens.clear_if(TokenScope::Machine, &token);
                let token = self.ensure_machine_token().await?;
                self.dispatch(&method, &url, body.as_deref(), &token).await
            }
        }
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&[u8]>,
        token: &str,
    ) -> Result<Response, Error> {
        tracing::debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header(ACCESS_TOKEN_HEADER, token);
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!("Failed to send {} {}: {}", method, url, e);
            Error::from(e)
        })?;
        tracing::debug!("Received response with status: {}", response.status());

        // The backend may rotate the token on any response, successful or not.
        if let Some(rotated) = access_token(response.headers()) {
            if rotated != token {
                tracing::debug!("Storing rotated {:?} access token", self.scope);
            }
            self.tokens.set(self.scope, rotated);
        }
        Ok(response)
    }
}

fn access_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

async fn require_ok(response: Response, context: &'static str) -> Result<Response, Error> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(
        "{} request failed: HTTP {} - {}",
        context,
        status.as_u16(),
        body
    );
    Err(Error::HttpStatus {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        body,
    })
}

async fn parse_body<T: DeserializeOwned>(
    response: Response,
    context: &'static str,
) -> Result<T, Error> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|source| {
        tracing::error!("Failed to parse {} response: {}", context, source);
        Error::Decode { context, source }
    })
}

async fn decode<T: DeserializeOwned>(
    response: Response,
    context: &'static str,
) -> Result<T, Error> {
    let response = require_ok(response, context).await?;
    parse_body(response, context).await
}
