use chrono::{DateTime, Utc};
use reqwest::Url;
use secrecy::SecretString;
use tracing::debug;

use super::{format_index, get_json, join_segments, parse_url, Credentials, TokenSource};
use crate::{
    error::Result,
    sds::{SdsNamespace, SdsResolvedStream, SdsStream, SdsType, StreamSearchResult},
    settings::{SdsSettings, SettingsError},
    shape::Row,
};

const COMMUNITY_HEADER: &str = "Community-Id";

/// A client for AVEVA Data Hub.
///
/// Every method takes the `Authorization` header value to send, as obtained
/// from [`AdhClient::tokens`].
#[derive(Debug)]
pub struct AdhClient {
    http: reqwest::Client,
    resource: Url,
    api_version: String,
    tenant_id: String,
    namespace_id: String,
    community_id: Option<String>,
    tokens: TokenSource,
}

impl AdhClient {
    pub fn new(
        http: reqwest::Client,
        settings: &SdsSettings,
        client_secret: Option<SecretString>,
    ) -> Result<Self> {
        settings.validate(client_secret.is_some())?;
        let resource = parse_url(settings.resource())?;
        let credentials = if settings.oauth_pass_thru() {
            Credentials::PassThrough
        } else {
            Credentials::ClientCredentials {
                client_id: settings.client_id().to_string(),
                client_secret: client_secret.ok_or(SettingsError::Missing("clientSecret"))?,
            }
        };
        Ok(Self {
            tokens: TokenSource::new(http.clone(), resource.clone(), credentials),
            http,
            resource,
            api_version: settings.api_version().to_string(),
            tenant_id: settings.tenant_id().to_string(),
            namespace_id: settings.namespace_id().to_string(),
            community_id: settings
                .use_community()
                .then(|| settings.community_id().to_string()),
        })
    }

    pub fn tokens(&self) -> &TokenSource {
        &self.tokens
    }

    /// The namespace used when a query does not name one.
    pub fn namespace_id(&self) -> &str {
        &self.namespace_id
    }

    /// The community searched instead of the tenant, if community mode is on.
    pub fn community_id(&self) -> Option<&str> {
        self.community_id.as_deref()
    }

    fn api_url<'a>(&'a self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        join_segments(
            &self.resource,
            ["api", self.api_version.as_str()].into_iter().chain(segments),
        )
    }

    fn namespace_url<'a>(
        &'a self,
        namespace: &'a str,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url> {
        self.api_url(
            ["tenants", self.tenant_id.as_str(), "namespaces", namespace]
                .into_iter()
                .chain(segments),
        )
    }

    /// List the namespaces of the tenant.
    pub async fn namespaces(&self, auth: &str) -> Result<Vec<SdsNamespace>> {
        let url = self.api_url(["tenants", self.tenant_id.as_str(), "namespaces"])?;
        let namespaces: Option<Vec<SdsNamespace>> =
            get_json(&self.http, url, Some(auth), &[]).await?;
        Ok(namespaces.unwrap_or_default())
    }

    /// Search `namespace` for streams matching `query`.
    pub async fn search_streams(&self, namespace: &str, query: &str, auth: &str) -> Result<Vec<SdsStream>> {
        let mut url = self.namespace_url(namespace, ["streams"])?;
        url.query_pairs_mut().append_pair("query", query);
        let streams: Option<Vec<SdsStream>> = get_json(&self.http, url, Some(auth), &[]).await?;
        Ok(streams.unwrap_or_default())
    }

    pub async fn stream(&self, namespace: &str, id: &str, auth: &str) -> Result<SdsStream> {
        let url = self.namespace_url(namespace, ["streams", id])?;
        get_json(&self.http, url, Some(auth), &[]).await
    }

    pub async fn sds_type(&self, namespace: &str, type_id: &str, auth: &str) -> Result<SdsType> {
        let url = self.namespace_url(namespace, ["types", type_id])?;
        get_json(&self.http, url, Some(auth), &[]).await
    }

    /// Fetch the stored values of stream `id` between `from` and `to`.
    pub async fn stream_values(
        &self,
        namespace: &str,
        id: &str,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
        auth: &str,
    ) -> Result<Vec<Row>> {
        let mut url = self.namespace_url(namespace, ["streams", id, "Data"])?;
        append_range(&mut url, from, to);
        let rows: Option<Vec<Row>> = get_json(&self.http, url, Some(auth), &[]).await?;
        Ok(rows.unwrap_or_default())
    }

    /// Search `community` for streams matching `query`.
    pub async fn community_search(
        &self,
        community: &str,
        query: &str,
        auth: &str,
    ) -> Result<Vec<StreamSearchResult>> {
        let mut url = self.api_url(["search", "communities", community, "streams"])?;
        url.query_pairs_mut().append_pair("query", query);
        let results: Option<Vec<StreamSearchResult>> =
            get_json(&self.http, url, Some(auth), &[]).await?;
        Ok(results.unwrap_or_default())
    }

    /// Fetch a community stream together with its resolved type.
    pub async fn community_resolved(
        &self,
        community: &str,
        self_link: &str,
        auth: &str,
    ) -> Result<SdsResolvedStream> {
        let url = join_segments(&parse_url(self_link)?, ["resolved"])?;
        get_json(&self.http, url, Some(auth), &[(COMMUNITY_HEADER, community)]).await
    }

    pub async fn community_values(
        &self,
        community: &str,
        self_link: &str,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
        auth: &str,
    ) -> Result<Vec<Row>> {
        let mut url = join_segments(&parse_url(self_link)?, ["Data"])?;
        append_range(&mut url, from, to);
        debug!(%url, community, "Fetching community stream data");
        let rows: Option<Vec<Row>> =
            get_json(&self.http, url, Some(auth), &[(COMMUNITY_HEADER, community)]).await?;
        Ok(rows.unwrap_or_default())
    }
}

fn append_range(url: &mut Url, from: &DateTime<Utc>, to: &DateTime<Utc>) {
    url.query_pairs_mut()
        .append_pair("startIndex", &format_index(from))
        .append_pair("endIndex", &format_index(to));
}
