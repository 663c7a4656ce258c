//! OAuth password-grant token acquisition for the order service. Tokens are
//! cached and refreshed a few minutes before they expire.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

use crate::service::error::ServiceError;

const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSettings {
    pub token_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug)]
pub struct TokenManager {
    settings: OAuthSettings,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    pub fn new(settings: OAuthSettings, client: reqwest::Client) -> Self {
        Self {
            settings,
            client,
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid bearer token, fetching a new one when the cache is
    /// empty or close to expiry. Concurrent callers share one refresh.
    pub async fn token(&self) -> Result<String, ServiceError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn fetch(&self) -> Result<CachedToken, ServiceError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "password"),
            ("client_id", &self.settings.client_id),
            ("username", &self.settings.username),
            ("password", &self.settings.password),
        ];
        if let Some(secret) = self.settings.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        if let Some(scope) = self.settings.scope.as_deref() {
            form.push(("scope", scope));
        }

        let request = self.client.post(&self.settings.token_url).form(&form).send();
        let response = timeout(TOKEN_REQUEST_TIMEOUT, request)
            .await
            .map_err(|_| ServiceError::Auth("token request timed out".to_string()))?
            .map_err(|err| ServiceError::Auth(format!("token request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Auth(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| ServiceError::Auth(format!("invalid token response: {err}")))?;

        let lifetime = cache_lifetime(token.expires_in);
        tracing::info!(
            token_type = token.token_type.as_deref().unwrap_or("bearer"),
            refresh_in_secs = lifetime.as_secs(),
            "obtained order service access token"
        );
        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}

/// How long a token may be reused: its lifetime minus the safety margin, or
/// the full lifetime when it is shorter than the margin.
fn cache_lifetime(expires_in: Option<u64>) -> Duration {
    let lifetime = Duration::from_secs(expires_in.unwrap_or(0));
    if lifetime > EXPIRY_SAFETY_MARGIN {
        lifetime - EXPIRY_SAFETY_MARGIN
    } else {
        lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_lifetime_keeps_safety_margin() {
        assert_eq!(cache_lifetime(Some(3600)), Duration::from_secs(3300));
        assert_eq!(cache_lifetime(Some(120)), Duration::from_secs(120));
        assert_eq!(cache_lifetime(None), Duration::ZERO);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let settings = OAuthSettings {
            token_url: "http://127.0.0.1/token".to_string(),
            client_id: "sim".to_string(),
            client_secret: Some("hunter2".to_string()),
            username: "alice".to_string(),
            password: "s3cret".to_string(),
            scope: None,
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("s3cret"));
    }
}
