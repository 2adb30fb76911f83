use chrono::{DateTime, Utc};
use reqwest::Url;
use tracing::debug;

use super::{format_index, get_json, join_segments, parse_url};
use crate::{
    error::{ClientError, Result},
    sds::SdsStream,
    settings::{SdsSettings, EDS_NAMESPACES},
    shape::Row,
};

/// A client for a local Edge Data Store.
///
/// EDS has a single tenant, `default`, and needs no authentication.
#[derive(Clone, Debug)]
pub struct EdsClient {
    http: reqwest::Client,
    /// `{resource}:{port}/api/v1/tenants/default/namespaces/`
    base: Url,
    namespace_id: String,
}

impl EdsClient {
    pub fn new(http: reqwest::Client, settings: &SdsSettings) -> Result<Self> {
        let mut base = parse_url(settings.resource())?;
        let port = settings
            .eds_port()
            .parse::<u16>()
            .map_err(|e| ClientError::Url {
                url: settings.resource().to_string(),
                reason: format!("invalid port {:?}: {e}", settings.eds_port()),
            })?;
        base.set_port(Some(port)).map_err(|()| ClientError::Url {
            url: settings.resource().to_string(),
            reason: "URL cannot have a port".to_string(),
        })?;
        let base = join_segments(&base, ["api", "v1", "tenants", "default", "namespaces", ""])?;
        Ok(Self {
            http,
            base,
            namespace_id: settings.namespace_id().to_string(),
        })
    }

    /// `requested` if it is an EDS namespace, otherwise the configured one.
    fn namespace<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .filter(|ns| EDS_NAMESPACES.contains(ns))
            .unwrap_or(self.namespace_id.as_str())
    }

    fn streams_url(&self, namespace: Option<&str>, segments: &[&str]) -> Result<Url> {
        let mut url = join_segments(&self.base, [self.namespace(namespace), "streams"])?;
        if !segments.is_empty() {
            url = join_segments(&url, segments.iter().copied())?;
        }
        Ok(url)
    }

    /// Search `namespace` (or the configured one) for streams matching `query`.
    pub async fn search_streams(&self, namespace: Option<&str>, query: &str) -> Result<Vec<SdsStream>> {
        let mut url = self.streams_url(namespace, &[])?;
        url.query_pairs_mut().append_pair("query", query);
        debug!(%url, "Searching EDS streams");
        let streams: Option<Vec<SdsStream>> = get_json(&self.http, url, None, &[]).await?;
        Ok(streams.unwrap_or_default())
    }

    /// Fetch the stored values of stream `id` between `from` and `to`.
    pub async fn stream_data(
        &self,
        namespace: Option<&str>,
        id: &str,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
    ) -> Result<Vec<Row>> {
        let mut url = self.streams_url(namespace, &[id, "data"])?;
        url.query_pairs_mut()
            .append_pair("startIndex", &format_index(from))
            .append_pair("endIndex", &format_index(to));
        debug!(%url, "Fetching EDS stream data");
        let rows: Option<Vec<Row>> = get_json(&self.http, url, None, &[]).await?;
        Ok(rows.unwrap_or_default())
    }
}
