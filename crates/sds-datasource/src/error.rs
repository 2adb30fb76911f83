//! Errors returned when talking to a Sequential Data Store.
use reqwest::StatusCode;
use thiserror::Error;

use crate::{client::AuthError, settings::SettingsError};

/// Errors returned by the SDS clients.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The datasource settings are incomplete or invalid.
    #[error("invalid datasource settings: {0}")]
    Settings(#[from] SettingsError),

    /// A URL could not be built from the configured resource.
    #[error("invalid URL {url:?}: {reason}")]
    Url { url: String, reason: String },

    /// The request could not be sent, or the response body could not be read.
    #[error("error sending request to {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// SDS answered with a non-success status code.
    #[error("request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    /// The response body was not the JSON we expected.
    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// No bearer token could be obtained.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ClientError {
    /// The HTTP status returned by SDS, if the request got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Whether the error was caused by the remote service rather than by this plugin.
    pub fn is_downstream(&self) -> bool {
        matches!(
            self,
            Self::Request { .. }
                | Self::Status { .. }
                | Self::Decode { .. }
                | Self::Auth(AuthError::Discovery(_) | AuthError::TokenRequest(_))
        )
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
