//! OAuth2 authorization-code flow and token refresh
//!
//! `LocalOAuth2Implementation` talks to the authorization server;
//! `OAuth2Session` holds one entry's token and refreshes it when it is about
//! to expire.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Tokens expiring within this many seconds are refreshed early
const CLOCK_OUT_OF_SYNC_MAX_SEC: f64 = 20.0;

#[derive(Debug, Error)]
pub enum OAuth2Error {
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    TokenRequest { status: u16, body: String },

    #[error("token has no refresh_token")]
    MissingRefreshToken,

    #[error("invalid authorize url: {0}")]
    InvalidUrl(String),
}

/// Authorize and token endpoints of an OAuth2 provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationServer {
    pub authorize_url: String,
    pub token_url: String,
}

/// Application credentials registered with the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredential {
    pub client_id: String,
    pub client_secret: String,
}

/// Token as stored in a config entry under `token`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    /// UNIX seconds
    #[serde(default)]
    pub expires_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuth2Token {
    /// True while the token is good for more than the clock-skew margin
    pub fn is_valid(&self) -> bool {
        self.expires_at > now_ts() + CLOCK_OUT_OF_SYNC_MAX_SEC
    }
}

fn now_ts() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

impl From<TokenResponse> for OAuth2Token {
    fn from(resp: TokenResponse) -> Self {
        OAuth2Token {
            expires_at: now_ts() + resp.expires_in as f64,
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            token_type: resp.token_type,
            expires_in: resp.expires_in,
            scope: resp.scope,
        }
    }
}

/// OAuth2 client for one integration domain using locally held credentials
#[derive(Debug, Clone)]
pub struct LocalOAuth2Implementation {
    pub domain: String,
    credential: ClientCredential,
    server: AuthorizationServer,
    http: reqwest::Client,
}

impl LocalOAuth2Implementation {
    pub fn new(
        domain: impl Into<String>,
        credential: ClientCredential,
        server: AuthorizationServer,
    ) -> Self {
        Self {
            domain: domain.into(),
            credential,
            server,
            http: reqwest::Client::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.credential.client_id
    }

    /// URL to send the user to; `extra` carries provider-specific params
    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        state: &str,
        extra: &[(&str, &str)],
    ) -> Result<String, OAuth2Error> {
        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", "code"),
            ("client_id", &self.credential.client_id),
            ("redirect_uri", redirect_uri),
            ("state", state),
        ];
        params.extend_from_slice(extra);

        Url::parse_with_params(&self.server.authorize_url, &params)
            .map(String::from)
            .map_err(|e| OAuth2Error::InvalidUrl(e.to_string()))
    }

    /// Exchange an authorization code for a token
    #[instrument(skip(self, code), fields(domain = %self.domain))]
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuth2Token, OAuth2Error> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    /// Refresh a token, keeping the old refresh_token if none is returned
    #[instrument(skip(self, token), fields(domain = %self.domain))]
    pub async fn refresh_token(&self, token: &OAuth2Token) -> Result<OAuth2Token, OAuth2Error> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(OAuth2Error::MissingRefreshToken)?;

        let mut new_token = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;
        if new_token.refresh_token.is_none() {
            new_token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(new_token)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<OAuth2Token, OAuth2Error> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", &self.credential.client_id),
            ("client_secret", &self.credential.client_secret),
        ];
        form.extend_from_slice(params);

        let resp = self
            .http
            .post(&self.server.token_url)
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Token request failed");
            return Err(OAuth2Error::TokenRequest {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = resp.json().await?;
        debug!("Token request succeeded");
        Ok(token.into())
    }
}

/// Called with the new token after every refresh
pub type TokenUpdateCallback = Arc<dyn Fn(OAuth2Token) -> BoxFuture<'static, ()> + Send + Sync>;

/// One config entry's OAuth2 token
pub struct OAuth2Session {
    implementation: Arc<LocalOAuth2Implementation>,
    entry_id: String,
    /// Held across the refresh so concurrent callers refresh once
    token: Mutex<OAuth2Token>,
    on_token_update: Option<TokenUpdateCallback>,
}

impl OAuth2Session {
    pub fn new(
        implementation: Arc<LocalOAuth2Implementation>,
        entry_id: impl Into<String>,
        token: OAuth2Token,
    ) -> Self {
        Self {
            implementation,
            entry_id: entry_id.into(),
            token: Mutex::new(token),
            on_token_update: None,
        }
    }

    pub fn with_token_update(mut self, callback: TokenUpdateCallback) -> Self {
        self.on_token_update = Some(callback);
        self
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub async fn token(&self) -> OAuth2Token {
        self.token.lock().await.clone()
    }

    pub async fn valid_token(&self) -> bool {
        self.token.lock().await.is_valid()
    }

    /// Refresh the token if it is expired or about to expire
    #[instrument(skip(self), fields(entry_id = %self.entry_id))]
    pub async fn ensure_token_valid(&self) -> Result<(), OAuth2Error> {
        let mut token = self.token.lock().await;
        if token.is_valid() {
            return Ok(());
        }

        debug!("Refreshing OAuth2 token");
        let new_token = self.implementation.refresh_token(&token).await?;
        *token = new_token.clone();
        drop(token);

        if let Some(callback) = &self.on_token_update {
            callback(new_token).await;
        }
        Ok(())
    }

    pub async fn access_token(&self) -> String {
        self.token.lock().await.access_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Form, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct TokenServer {
        calls: Arc<AtomicUsize>,
        forms: Arc<std::sync::Mutex<Vec<HashMap<String, String>>>>,
    }

    async fn token_endpoint(
        State(server): State<TokenServer>,
        Form(form): Form<HashMap<String, String>>,
    ) -> impl IntoResponse {
        server.calls.fetch_add(1, Ordering::SeqCst);
        server.forms.lock().unwrap().push(form.clone());

        if form.get("client_secret").map(String::as_str) != Some("shh") {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_client"})));
        }
        match form.get("grant_type").map(String::as_str) {
            Some("authorization_code") => (
                StatusCode::OK,
                Json(json!({
                    "access_token": "access-1",
                    "refresh_token": "refresh-1",
                    "expires_in": 3599,
                    "token_type": "Bearer",
                    "scope": "https://www.googleapis.com/auth/spreadsheets"
                })),
            ),
            Some("refresh_token") => (
                StatusCode::OK,
                Json(json!({"access_token": "access-2", "expires_in": 3599, "token_type": "Bearer"})),
            ),
            _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "unsupported_grant_type"}))),
        }
    }

    async fn spawn_token_server() -> (String, TokenServer) {
        let server = TokenServer::default();
        let app = Router::new()
            .route("/token", post(token_endpoint))
            .with_state(server.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), server)
    }

    fn implementation(base: &str, secret: &str) -> LocalOAuth2Implementation {
        LocalOAuth2Implementation::new(
            "cat_care_tracker",
            ClientCredential {
                client_id: "client-id".into(),
                client_secret: secret.into(),
            },
            AuthorizationServer {
                authorize_url: format!("{}/auth", base),
                token_url: format!("{}/token", base),
            },
        )
    }

    fn expired_token() -> OAuth2Token {
        OAuth2Token {
            access_token: "stale".into(),
            refresh_token: Some("refresh-1".into()),
            token_type: "Bearer".into(),
            expires_in: 3600,
            expires_at: now_ts() - 10.0,
            scope: None,
        }
    }

    #[test]
    fn test_authorize_url_params() {
        let imp = implementation("https://accounts.google.com/o/oauth2", "shh");
        let url = imp
            .authorize_url(
                "http://localhost:8123/auth/external/callback",
                "flow-1",
                &[("access_type", "offline"), ("prompt", "consent")],
            )
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-id");
        assert_eq!(params["redirect_uri"], "http://localhost:8123/auth/external/callback");
        assert_eq!(params["state"], "flow-1");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
    }

    #[test]
    fn test_token_validity_margin() {
        let mut token = expired_token();
        assert!(!token.is_valid());
        token.expires_at = now_ts() + 10.0;
        assert!(!token.is_valid());
        token.expires_at = now_ts() + 60.0;
        assert!(token.is_valid());
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let (base, server) = spawn_token_server().await;
        let imp = implementation(&base, "shh");

        let token = imp.exchange_code("code-1", "http://localhost/cb").await.unwrap();
        assert_eq!(token.access_token, "access-1");
        assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));
        assert!(token.is_valid());

        let forms = server.forms.lock().unwrap();
        assert_eq!(forms[0]["code"], "code-1");
        assert_eq!(forms[0]["redirect_uri"], "http://localhost/cb");
    }

    #[tokio::test]
    async fn test_token_endpoint_error() {
        let (base, _server) = spawn_token_server().await;
        let imp = implementation(&base, "wrong");

        let err = imp.exchange_code("code-1", "http://localhost/cb").await.unwrap_err();
        match err {
            OAuth2Error::TokenRequest { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid_client"));
            }
            other => panic!("expected TokenRequest, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_refreshes_and_reports_new_token() {
        let (base, server) = spawn_token_server().await;
        let updates: Arc<std::sync::Mutex<Vec<OAuth2Token>>> = Arc::default();
        let sink = updates.clone();

        let session = OAuth2Session::new(Arc::new(implementation(&base, "shh")), "entry-1", expired_token())
            .with_token_update(Arc::new(move |token| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().unwrap().push(token);
                })
            }));

        assert!(!session.valid_token().await);
        session.ensure_token_valid().await.unwrap();

        assert_eq!(session.access_token().await, "access-2");
        // Refresh response had no refresh_token, the old one is kept
        assert_eq!(session.token().await.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(updates.lock().unwrap().len(), 1);

        // Still valid, no second request
        session.ensure_token_valid().await.unwrap();
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let imp = implementation("http://127.0.0.1:9", "shh");
        let mut token = expired_token();
        token.refresh_token = None;

        let err = imp.refresh_token(&token).await.unwrap_err();
        assert!(matches!(err, OAuth2Error::MissingRefreshToken));
    }
}
