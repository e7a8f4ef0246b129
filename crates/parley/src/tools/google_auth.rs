//! Credentials for Google APIs, read from an authorized-user token file.
//!
//! The file is the one written by Google's client libraries after the user
//! granted access (`token.json`). Access tokens are refreshed when they are
//! about to expire and the file is rewritten in place.

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const REFRESH_SAFETY_WINDOW_S: i64 = 60;

/// Errors raised while obtaining an access token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The user never authorized access.
    #[error("Google Calendar is not authorized: no token file at {}", .0.display())]
    Missing(PathBuf),
    /// The token file could not be read or written.
    #[error("failed to access token file {}: {source}", path.display())]
    #[allow(missing_docs)]
    Io { path: PathBuf, source: io::Error },
    /// The token file is not valid JSON.
    #[allow(missing_docs)]
    #[error("token file {} is malformed: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// No refresh token to renew an expired access token.
    #[error("the access token expired and there is no refresh token")]
    NoRefreshToken,
    /// The token endpoint rejected the refresh.
    #[error("token refresh failed: {0}")]
    Refresh(String),
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_owned()
}

/// The contents of an authorized-user token file.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AuthorizedUser {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    // Scopes, account and whatever else the file carries are kept as is.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

impl AuthorizedUser {
    /// Returns `true` if the access token is missing or expires within the
    /// safety window.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        if self.token.is_none() {
            return true;
        }
        match self.expiry {
            Some(expiry) => {
                expiry <= now + Duration::seconds(REFRESH_SAFETY_WINDOW_S)
            }
            None => false,
        }
    }

    fn apply_token_response(&mut self, resp: TokenResponse, now: DateTime<Utc>) {
        self.token = Some(resp.access_token);
        self.expiry = resp
            .expires_in
            .map(|expires_in| now + Duration::seconds(expires_in));
    }

    fn refresh_params(&self) -> Result<Vec<(&'static str, &str)>, AuthError> {
        let refresh_token =
            self.refresh_token.as_deref().ok_or(AuthError::NoRefreshToken)?;
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(client_id) = &self.client_id {
            params.push(("client_id", client_id.as_str()));
        }
        if let Some(client_secret) = &self.client_secret {
            params.push(("client_secret", client_secret.as_str()));
        }
        Ok(params)
    }
}

fn load(path: &Path) -> Result<AuthorizedUser, AuthError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(AuthError::Missing(path.to_owned()));
        }
        Err(source) => {
            return Err(AuthError::Io {
                path: path.to_owned(),
                source,
            });
        }
    };
    serde_json::from_str(&contents).map_err(|source| AuthError::Malformed {
        path: path.to_owned(),
        source,
    })
}

fn save(path: &Path, user: &AuthorizedUser) -> Result<(), AuthError> {
    let io_error = |source| AuthError::Io {
        path: path.to_owned(),
        source,
    };
    let contents = serde_json::to_string(user).map_err(|source| {
        AuthError::Malformed {
            path: path.to_owned(),
            source,
        }
    })?;
    let mut temp_file = match path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new_in("."),
    }
    .map_err(io_error)?;
    temp_file.write_all(contents.as_bytes()).map_err(io_error)?;
    temp_file.as_file_mut().sync_all().map_err(io_error)?;
    temp_file.persist(path).map_err(|err| io_error(err.error))?;
    Ok(())
}

/// Hands out access tokens for Google APIs.
pub struct GoogleAuth {
    client: Client,
    path: PathBuf,
    cached: Mutex<Option<AuthorizedUser>>,
}

impl GoogleAuth {
    /// Creates an authenticator backed by the token file at `path`.
    ///
    /// The file is not read until a token is needed.
    pub fn new(client: Client, path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid access token, refreshing it if needed.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        let mut user = match cached.take() {
            Some(user) => user,
            None => {
                let path = self.path.clone();
                spawn_blocking(move || load(&path))
                    .await
                    .map_err(|err| AuthError::Refresh(err.to_string()))??
            }
        };

        if user.needs_refresh(Utc::now()) {
            debug!("refreshing Google access token");
            if let Err(err) = self.refresh(&mut user).await {
                // Keep the credentials so a later call can retry.
                *cached = Some(user);
                return Err(err);
            }
            let path = self.path.clone();
            let snapshot = user.clone();
            let saved = spawn_blocking(move || save(&path, &snapshot))
                .await
                .map_err(|err| AuthError::Refresh(err.to_string()))
                .and_then(|result| result);
            if let Err(err) = saved {
                warn!("failed to persist refreshed token: {err}");
            }
        }

        let token = user.token.clone().unwrap_or_default();
        *cached = Some(user);
        Ok(token)
    }

    async fn refresh(&self, user: &mut AuthorizedUser) -> Result<(), AuthError> {
        let resp = self
            .client
            .post(&user.token_uri)
            .form(&user.refresh_params()?)
            .send()
            .await
            .map_err(|err| AuthError::Refresh(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::Refresh(format!("{status}: {text}")));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|err| AuthError::Refresh(err.to_string()))?;
        user.apply_token_response(token, Utc::now());
        Ok(())
    }
}
