//! The query model sent by the query editor.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Correlation id used for stream autocomplete lookups.
pub const AUTOCOMPLETE_REF_ID: &str = "sds-stream-autocomplete";

/// The kind of SDS service request a query maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceRequest {
    ServiceInstances,
    Streams,
    StreamData,
}

/// A single query, as saved in a dashboard panel.
///
/// Two shapes of query are accepted: the stream picker shape (`id`, `name`,
/// `queryText`, `collection`) and the service shape (`serviceId`,
/// `serviceInstance`, `serviceRequest`, `urlParameters`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SdsQuery {
    pub collection: String,
    pub query_text: String,
    pub id: String,
    pub name: String,
    pub service_id: Option<String>,
    pub service_instance: Option<String>,
    pub service_request: Option<ServiceRequest>,
    pub url_parameters: HashMap<String, String>,
}

impl Default for SdsQuery {
    fn default() -> Self {
        Self {
            collection: "streams".to_string(),
            query_text: String::new(),
            id: String::new(),
            name: String::new(),
            service_id: None,
            service_instance: None,
            service_request: None,
            url_parameters: HashMap::new(),
        }
    }
}

/// What a query resolves to once the two query shapes are reconciled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryKind {
    /// List the namespaces (service instances) of the tenant.
    ServiceInstances,
    /// Search for streams matching `query`.
    Streams { query: String },
    /// Fetch the values of stream `id` over the query's time range.
    StreamData { id: String },
}

impl SdsQuery {
    /// The query used when a new panel query is created.
    pub fn default_query() -> Self {
        Self::default()
    }

    /// Build the query issued by stream autocomplete.
    pub fn autocomplete(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            query_text: text.clone(),
            service_id: Some("sds".to_string()),
            service_request: Some(ServiceRequest::Streams),
            url_parameters: HashMap::from([("query".to_string(), text)]),
            ..Self::default()
        }
    }

    /// The stream id, from either query shape.
    pub fn stream_id(&self) -> Option<&str> {
        self.url_parameters
            .get("id")
            .map(String::as_str)
            .into_iter()
            .chain([self.id.as_str()])
            .find(|id| !id.is_empty())
    }

    /// The free-text search term, from either query shape.
    pub fn search_text(&self) -> &str {
        self.url_parameters
            .get("query")
            .map(String::as_str)
            .unwrap_or(&self.query_text)
    }

    /// Resolve this query into the request it represents.
    ///
    /// An explicit `serviceRequest` wins; otherwise a query without a stream id
    /// is a search and a query with one fetches data.
    pub fn kind(&self) -> QueryKind {
        match (self.service_request, self.stream_id()) {
            (Some(ServiceRequest::ServiceInstances), _) => QueryKind::ServiceInstances,
            (Some(ServiceRequest::Streams), _) | (None, None) => QueryKind::Streams {
                query: self.search_text().to_string(),
            },
            (Some(ServiceRequest::StreamData), Some(id)) | (None, Some(id)) => {
                QueryKind::StreamData { id: id.to_string() }
            }
            (Some(ServiceRequest::StreamData), None) => QueryKind::StreamData { id: String::new() },
        }
    }

    /// The display name for frames produced by this query.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            self.stream_id().unwrap_or("response")
        } else {
            &self.name
        }
    }
}

/// A query paired with its correlation id and resolved UTC time range.
#[derive(Clone, Debug)]
pub struct Target {
    pub ref_id: String,
    pub query: SdsQuery,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Target {
    pub fn new(
        ref_id: impl Into<String>,
        query: SdsQuery,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Self {
        Self {
            ref_id: ref_id.into(),
            query,
            from,
            to,
        }
    }

    /// The autocomplete target for `text`; the time range is unused by searches.
    pub fn autocomplete(text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self::new(AUTOCOMPLETE_REF_ID, SdsQuery::autocomplete(text), now, now)
    }
}
