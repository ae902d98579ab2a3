//! Authenticated Platform Sessions
//!
//! Exchanges a stored refresh token for an access token once, at
//! construction. When the identity provider rotates the refresh token the new
//! value is handed to a [`SecretSink`] instead of being written anywhere
//! directly.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::PlatformCredentials;
use crate::error::{AdsError, Result};

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
pub const MICROSOFT_SCOPE: &str = "https://ads.microsoft.com/msads.manage offline_access";

/// An authenticated handle gateways draw credentials from.
#[async_trait]
pub trait Session: Send + Sync {
    /// Bearer token for the next request
    async fn access_token(&self) -> Result<String>;
}

/// Receives a refresh token that replaced the configured one.
pub trait SecretSink: Send + Sync {
    fn store_refresh_token(&self, refresh_token: &str) -> Result<()>;
}

/// Identity provider endpoint for the refresh-token grant
#[derive(Debug, Clone)]
pub struct OAuthEndpoint {
    pub token_url: String,
    pub scope: Option<String>,
}

impl OAuthEndpoint {
    pub fn google() -> Self {
        Self {
            token_url: GOOGLE_TOKEN_URL.to_string(),
            scope: None,
        }
    }

    pub fn microsoft() -> Self {
        Self {
            token_url: MICROSOFT_TOKEN_URL.to_string(),
            scope: Some(MICROSOFT_SCOPE.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Session backed by an OAuth2 refresh-token exchange.
pub struct OAuthSession {
    access_token: String,
}

impl OAuthSession {
    /// Exchange the configured refresh token for an access token.
    ///
    /// A rotated refresh token is passed to `sink` when one is given; without
    /// a sink the rotation is only logged.
    pub async fn connect(
        http: &Client,
        endpoint: &OAuthEndpoint,
        credentials: &PlatformCredentials,
        sink: Option<&dyn SecretSink>,
    ) -> Result<Self> {
        debug!("Requesting access token from {}", endpoint.token_url);

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", credentials.refresh_token.as_str()),
        ];
        if let Some(scope) = endpoint.scope.as_deref() {
            form.push(("scope", scope));
        }

        let response = http
            .post(&endpoint.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AdsError::Auth(format!("token request failed: {}", e)))?;

        let status = response.status();
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AdsError::Auth(format!("unreadable token response ({}): {}", status, e)))?;

        if let Some(error) = body.error {
            let detail = body.error_description.unwrap_or_default();
            return Err(AdsError::Auth(format!("{} {}", error, detail).trim().to_string()));
        }

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AdsError::Auth("Failed to obtain access token".to_string()))?;

        if let Some(rotated) = body.refresh_token {
            if rotated != credentials.refresh_token {
                match sink {
                    Some(sink) => {
                        sink.store_refresh_token(&rotated)?;
                        info!("Stored rotated refresh token");
                    }
                    None => warn!("Refresh token was rotated but no secret sink is configured"),
                }
            }
        }

        info!("Access token acquired (length: {} bytes)", access_token.len());
        Ok(Self { access_token })
    }
}

#[async_trait]
impl Session for OAuthSession {
    async fn access_token(&self) -> Result<String> {
        Ok(self.access_token.clone())
    }
}

/// Session with a pre-issued token.
pub struct StaticSession(String);

impl StaticSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl Session for StaticSession {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Rewrites `KEY=value` in a dotenv file when a token rotates.
pub struct EnvFileSecretSink {
    path: PathBuf,
    key: String,
}

impl EnvFileSecretSink {
    pub fn new(path: impl AsRef<Path>, key: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            key: key.into(),
        }
    }
}

impl SecretSink for EnvFileSecretSink {
    fn store_refresh_token(&self, refresh_token: &str) -> Result<()> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            AdsError::Config(format!("Unable to read {}: {}", self.path.display(), e))
        })?;

        let updated = replace_env_line(&content, &self.key, refresh_token);

        std::fs::write(&self.path, updated).map_err(|e| {
            AdsError::Config(format!("Unable to write {}: {}", self.path.display(), e))
        })
    }
}

/// Replace every `key=...` line, appending one when the key is absent.
fn replace_env_line(content: &str, key: &str, value: &str) -> String {
    let prefix = format!("{}=", key);
    let mut found = false;

    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if line.starts_with(&prefix) {
                found = true;
                format!("{}{}", prefix, value)
            } else {
                line.to_string()
            }
        })
        .collect();

    if !found {
        lines.push(format!("{}{}", prefix, value));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
