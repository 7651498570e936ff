// Login providers
//
// Each provider turns configured account material into `Credentials`.
// `BasicLogin` and `StaticLogin` work offline; `PasswordLogin` performs an
// OAuth2 password grant against the server's token endpoint.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::auth::{Credentials, server_base_url};
use crate::error::Error;
use crate::transport::TransportConfig;

/// Token endpoint path, relative to the server URL.
pub const TOKEN_PATH: &str = "/services/oauth2/token";

// ── Basic ───────────────────────────────────────────────────────────

/// HTTP Basic credentials for a fixed server.
#[derive(Debug, Clone)]
pub struct BasicLogin {
    server_url: String,
    username: String,
    password: SecretString,
}

impl BasicLogin {
    pub fn new(server_url: impl Into<String>, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            password,
        }
    }

    /// Build `Basic base64(user:password)` for the configured server.
    pub fn login(&self) -> Result<Credentials, Error> {
        if self.username.is_empty() {
            return Err(Error::Authentication {
                message: "basic login requires a username".into(),
            });
        }
        let raw = format!("{}:{}", self.username, self.password.expose_secret());
        let token = format!("Basic {}", STANDARD.encode(raw));
        Ok(Credentials::new(self.server_url.clone(), SecretString::from(token)))
    }
}

// ── Static ──────────────────────────────────────────────────────────

/// A pre-issued token, presented as-is.
#[derive(Debug, Clone)]
pub struct StaticLogin {
    server_url: String,
    token: SecretString,
}

impl StaticLogin {
    pub fn new(server_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            server_url: server_url.into(),
            token,
        }
    }

    pub fn login(&self) -> Result<Credentials, Error> {
        if self.token.expose_secret().trim().is_empty() {
            return Err(Error::Authentication {
                message: "static login has an empty token".into(),
            });
        }
        Ok(Credentials::new(self.server_url.clone(), self.token.clone()))
    }
}

// ── OAuth2 password grant ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_token_type() -> String {
    "Bearer".into()
}

/// Username/password login through an OAuth2 token endpoint.
pub struct PasswordLogin {
    http: reqwest::Client,
    server_url: String,
    token_url: Url,
    client_id: String,
    client_secret: SecretString,
    username: String,
    password: SecretString,
}

impl PasswordLogin {
    pub fn new(
        server_url: &str,
        client_id: impl Into<String>,
        client_secret: SecretString,
        username: impl Into<String>,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::with_client(http, server_url, client_id, client_secret, username, password)
    }

    /// Create a provider with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        server_url: &str,
        client_id: impl Into<String>,
        client_secret: SecretString,
        username: impl Into<String>,
        password: SecretString,
    ) -> Result<Self, Error> {
        let token_url = server_base_url(server_url)?.join(TOKEN_PATH)?;
        Ok(Self {
            http,
            server_url: server_url.to_owned(),
            token_url,
            client_id: client_id.into(),
            client_secret,
            username: username.into(),
            password,
        })
    }

    /// Exchange the account password for an access token.
    ///
    /// The returned credentials point at the `instance_url` from the token
    /// response when present, otherwise at the configured server.
    pub async fn login(&self) -> Result<Credentials, Error> {
        debug!("requesting access token at {}", self.token_url);

        let form = [
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("username", self.username.as_str()),
            ("password", self.password.expose_secret()),
        ];

        let resp = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;
        if !status.is_success() {
            return Err(Error::Authentication {
                message: format!("login failed (HTTP {status}): {body}"),
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: body.clone(),
            })?;

        let server = token
            .instance_url
            .unwrap_or_else(|| self.server_url.clone());
        debug!(server = %server, "login successful");

        Ok(Credentials::new(
            server,
            SecretString::from(format!("{} {}", token.token_type, token.access_token)),
        ))
    }
}
