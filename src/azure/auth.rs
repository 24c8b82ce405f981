//! Azure AD client-credentials authentication.
//!
//! Exchanges a service principal's client secret for a bearer token
//! and caches it until shortly before it expires.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::AzureCredentials;
use crate::error::{AzureError, Result};

/// Refresh tokens this many seconds before they expire.
const TOKEN_REFRESH_SKEW_SECS: i64 = 300;

/// A cached bearer token.
#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Utc::now() + ChronoDuration::seconds(TOKEN_REFRESH_SKEW_SECS) < self.expires_at
    }
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Token endpoint error response.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Service principal credential using a client secret.
pub struct ClientSecretCredential {
    /// HTTP client.
    http: Client,
    /// Token endpoint URL.
    token_url: String,
    /// Application (client) id.
    client_id: String,
    /// Client secret.
    client_secret: String,
    /// Cached token.
    cached: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for ClientSecretCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl ClientSecretCredential {
    /// Creates a credential for the given authority host.
    #[must_use]
    pub fn new(http: Client, authority_host: &str, credentials: &AzureCredentials) -> Self {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            authority_host.trim_end_matches('/'),
            credentials.tenant_id
        );

        Self {
            http,
            token_url,
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            cached: Mutex::new(None),
        }
    }

    /// Returns a bearer token for `scope`, fetching a new one when needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the token endpoint rejects the credential or is unreachable.
    pub async fn token(&self, scope: &str) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.token.clone());
        }

        debug!("Requesting access token from {}", self.token_url);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AzureError::network(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<TokenErrorResponse>(&body).map_or_else(
                |_| format!("HTTP {status}: {body}"),
                |e| format!("{}: {}", e.error, e.error_description.unwrap_or_default()),
            );
            return Err(AzureError::AuthenticationFailed { message }.into());
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AzureError::invalid_response(format!("Failed to parse token response: {e}")))?;

        let token = AccessToken {
            token: body.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(body.expires_in),
        };
        let value = token.token.clone();
        *cached = Some(token);

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> AzureCredentials {
        AzureCredentials {
            client_id: String::from("app-id"),
            client_secret: String::from("s3cret"),
            tenant_id: String::from("tenant-1"),
            subscription_id: String::from("sub-1"),
        }
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "tok-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = ClientSecretCredential::new(Client::new(), &server.uri(), &credentials());
        let scope = "https://management.azure.com/.default";

        assert_eq!(credential.token(scope).await.unwrap(), "tok-1");
        assert_eq!(credential.token(scope).await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn test_rejected_secret_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided."
            })))
            .mount(&server)
            .await;

        let credential = ClientSecretCredential::new(Client::new(), &server.uri(), &credentials());
        let err = credential.token("scope").await.unwrap_err();

        assert!(matches!(
            err,
            crate::error::VnetError::Azure(AzureError::AuthenticationFailed { ref message })
                if message.contains("invalid_client")
        ));
    }
}
