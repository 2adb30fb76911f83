//! HTTP clients for the two Sequential Data Store flavours.
//!
//! [`EdsClient`] talks to a local Edge Data Store without authentication.
//! [`AdhClient`] talks to AVEVA Data Hub, authenticating every request with a
//! bearer token from its [`TokenSource`].
use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header::AUTHORIZATION, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

mod adh;
mod auth;
mod eds;

pub use adh::AdhClient;
pub use auth::{AuthError, Credentials, TokenSource};
pub use eds::EdsClient;

/// Format a timestamp the way SDS expects index values.
pub fn format_index(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Append percent-encoded path segments to `base`.
pub(crate) fn join_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ClientError::Url {
            url: base.to_string(),
            reason: "URL cannot be a base".to_string(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| ClientError::Url {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Look up a header forwarded by Grafana, ignoring case.
pub(crate) fn forwarded_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// Send a GET request and decode the JSON response.
#[tracing::instrument(level = "debug", skip(http, token, headers), fields(url = %url))]
pub(crate) async fn get_json<T>(
    http: &reqwest::Client,
    url: Url,
    token: Option<&str>,
    headers: &[(&str, &str)],
) -> Result<T>
where
    T: DeserializeOwned,
{
    let mut request = http.get(url.clone());
    if let Some(token) = token {
        request = request.header(AUTHORIZATION, token);
    }
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = request.send().await.map_err(|source| {
        warn!(%url, %source, "Error making request");
        ClientError::Request {
            url: url.to_string(),
            source,
        }
    })?;
    read_json(url, response).await
}

pub(crate) async fn read_json<T>(url: Url, response: reqwest::Response) -> Result<T>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|source| ClientError::Request {
            url: url.to_string(),
            source,
        })?;
    if !status.is_success() {
        let body = String::from_utf8_lossy(&body).into_owned();
        warn!(%url, %status, body, "SDS returned an error status");
        return Err(ClientError::Status {
            url: url.to_string(),
            status,
            body,
        });
    }
    debug!(%url, %status, bytes = body.len(), "SDS response received");
    serde_json::from_slice(&body).map_err(|source| {
        warn!(%url, %source, "Error parsing json");
        ClientError::Decode {
            url: url.to_string(),
            source,
        }
    })
}
