//! Bearer tokens for AVEVA Data Hub requests.
use std::{collections::HashMap, fmt, time::Duration};

use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};

use super::{forwarded_header, get_json, join_segments, parse_url, read_json};
use crate::error::ClientError;

/// Tokens are refreshed once less than this much of their lifetime remains.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Longest lifetime trusted from a token response.
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors obtaining a bearer token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unable to retrieve token: no Authorization header was forwarded")]
    MissingAuthorization,
    #[error("unable to discover token endpoint: {0}")]
    Discovery(#[source] Box<ClientError>),
    #[error("unable to retrieve token: {0}")]
    TokenRequest(#[source] Box<ClientError>),
}

/// How requests to AVEVA Data Hub are authenticated.
#[derive(Clone, Debug)]
pub enum Credentials {
    /// Forward the signed-in Grafana user's `Authorization` header.
    PassThrough,
    /// Use the OAuth client-credentials flow.
    ClientCredentials {
        client_id: String,
        client_secret: SecretString,
    },
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at.saturating_duration_since(Instant::now()) > REFRESH_MARGIN
    }
}

#[derive(Deserialize)]
struct OpenIdConfiguration {
    token_endpoint: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// A source of `Authorization` header values.
///
/// Client-credentials tokens are cached and shared by every request made
/// through the same source.
pub struct TokenSource {
    http: reqwest::Client,
    resource: Url,
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource")
            .field("resource", &self.resource.as_str())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    pub fn new(http: reqwest::Client, resource: Url, credentials: Credentials) -> Self {
        Self {
            http,
            resource,
            credentials,
            cached: Mutex::new(None),
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self.credentials, Credentials::PassThrough)
    }

    /// The `Authorization` header value to send with the next request.
    ///
    /// `headers` are the headers Grafana forwarded with the incoming request.
    pub async fn authorization(&self, headers: &HashMap<String, String>) -> Result<String, AuthError> {
        match &self.credentials {
            Credentials::PassThrough => forwarded_header(headers, "Authorization")
                .map(str::to_string)
                .ok_or(AuthError::MissingAuthorization),
            Credentials::ClientCredentials {
                client_id,
                client_secret,
            } => self
                .client_token(client_id, client_secret)
                .await
                .map(|token| format!("Bearer {token}")),
        }
    }

    async fn client_token(&self, client_id: &str, client_secret: &SecretString) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.token.clone());
        }

        let discovery = join_segments(
            &self.resource,
            ["identity", ".well-known", "openid-configuration"],
        )
        .map_err(|e| AuthError::Discovery(Box::new(e)))?;
        debug!(url = %discovery, "Discovering token endpoint");
        let config: OpenIdConfiguration = get_json(&self.http, discovery, None, &[])
            .await
            .map_err(|e| AuthError::Discovery(Box::new(e)))?;
        let endpoint =
            parse_url(&config.token_endpoint).map_err(|e| AuthError::Discovery(Box::new(e)))?;

        let response = self
            .http
            .post(endpoint.clone())
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret.expose_secret()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|source| {
                AuthError::TokenRequest(Box::new(ClientError::Request {
                    url: endpoint.to_string(),
                    source,
                }))
            })?;
        let token: TokenResponse = read_json(endpoint, response)
            .await
            .map_err(|e| AuthError::TokenRequest(Box::new(e)))?;

        info!(expires_in = token.expires_in, "Obtained access token");
        let lifetime = Duration::from_secs(token.expires_in).min(MAX_TOKEN_LIFETIME);
        *cached = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}
