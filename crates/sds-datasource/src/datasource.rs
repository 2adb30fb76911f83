//! The Grafana datasource: query, health and resource handlers.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{
    future::BoxFuture,
    stream::{FuturesOrdered, StreamExt},
    FutureExt,
};
use grafana_plugin_sdk::{backend, data, prelude::*};
use http::{Response, StatusCode};
use reqwest::Url;
use secrecy::SecretString;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    backend::SdsBackend,
    client::AuthError,
    debounce::{DebounceError, Debouncer},
    error::ClientError,
    query::{SdsQuery, Target},
    settings::{apply_defaults, SdsJsonData, SdsSecureJsonData, SdsSettings},
    streams::{OptionsSlot, SelectableOption, StreamLister},
};

/// How long the stream picker waits for typing to pause before searching.
pub const STREAM_LOOKUP_DELAY: Duration = Duration::from_millis(1000);

/// The instance settings Grafana sends with every request.
pub type InstanceSettings = backend::DataSourceInstanceSettings<SdsJsonData, SdsSecureJsonData>;

/// The outcome of one query target.
#[derive(Debug)]
pub struct TargetResponse<E> {
    pub ref_id: String,
    pub result: Result<data::Frame, E>,
}

/// The operations every SDS datasource adapter provides.
#[backend::async_trait]
pub trait DataSourceAdapter: Send + Sync + Sized {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The settings this adapter was built from.
    fn config(&self) -> &SdsSettings;

    /// Build a new adapter from different settings.
    fn with_config(
        &self,
        settings: SdsSettings,
        client_secret: Option<SecretString>,
    ) -> Result<Self, Self::Error>;

    /// Run every target concurrently.
    ///
    /// Responses are returned in target order, one per target. A failing
    /// target does not affect the others.
    async fn run_query(
        &self,
        targets: Vec<Target>,
        headers: &HashMap<String, String>,
    ) -> Vec<TargetResponse<Self::Error>>;

    /// The query used when a new panel query is created.
    fn default_query(&self) -> SdsQuery {
        SdsQuery::default_query()
    }
}

/// An adapter backed by a live SDS connection.
#[derive(Debug)]
pub struct SdsAdapter {
    settings: SdsSettings,
    backend: SdsBackend,
}

impl SdsAdapter {
    pub fn new(settings: SdsSettings, client_secret: Option<SecretString>) -> Result<Self, ClientError> {
        let backend = SdsBackend::new(&settings, client_secret)?;
        Ok(Self { settings, backend })
    }

    /// Build an adapter from the settings stored by Grafana.
    pub fn from_instance(instance: &InstanceSettings) -> Result<Self, ClientError> {
        Self::new(
            apply_defaults(&instance.json_data),
            instance.decrypted_secure_json_data.client_secret.clone(),
        )
    }

    pub fn backend(&self) -> &SdsBackend {
        &self.backend
    }
}

#[backend::async_trait]
impl DataSourceAdapter for SdsAdapter {
    type Error = ClientError;

    fn config(&self) -> &SdsSettings {
        &self.settings
    }

    fn with_config(
        &self,
        settings: SdsSettings,
        client_secret: Option<SecretString>,
    ) -> Result<Self, Self::Error> {
        Self::new(settings, client_secret)
    }

    async fn run_query(
        &self,
        targets: Vec<Target>,
        headers: &HashMap<String, String>,
    ) -> Vec<TargetResponse<Self::Error>> {
        targets
            .iter()
            .map(|target| async move {
                let result = self.backend.query(target, headers).await;
                if let Err(error) = &result {
                    warn!(ref_id = %target.ref_id, %error, "Query failed");
                }
                TargetResponse {
                    ref_id: target.ref_id.clone(),
                    result,
                }
            })
            .collect::<FuturesOrdered<_>>()
            .collect()
            .await
    }
}

type LookupFn = Box<
    dyn Fn(
            (String, HashMap<String, String>),
        ) -> BoxFuture<'static, Result<Vec<SelectableOption>, ClientError>>
        + Send
        + Sync,
>;

/// Pickers kept per instance before idle ones are dropped.
const MAX_PICKERS: usize = 1024;

/// A Grafana user login and the picker id sent by the query editor.
type PickerKey = (String, String);

/// The state of one stream picker: its debounced lookups and last options.
#[derive(Debug)]
struct Picker {
    options: OptionsSlot,
    lookups: Debouncer<LookupFn>,
}

impl Picker {
    fn new(adapter: &Arc<SdsAdapter>) -> Self {
        let options = OptionsSlot::new();
        let lookup: LookupFn = {
            let adapter = Arc::clone(adapter);
            let options = options.clone();
            Box::new(move |(text, headers): (String, HashMap<String, String>)| {
                let adapter = Arc::clone(&adapter);
                let options = options.clone();
                async move {
                    StreamLister::new(adapter.as_ref(), &headers)
                        .get_streams(&text, &options)
                        .await
                }
                .boxed()
            })
        };
        Self {
            options,
            lookups: Debouncer::new(STREAM_LOOKUP_DELAY, lookup),
        }
    }
}

/// Per-instance state kept between requests.
#[derive(Debug)]
struct Instance {
    updated: DateTime<Utc>,
    adapter: Arc<SdsAdapter>,
    pickers: Mutex<HashMap<PickerKey, Arc<Picker>>>,
}

impl Instance {
    fn new(updated: DateTime<Utc>, adapter: SdsAdapter) -> Self {
        Self {
            updated,
            adapter: Arc::new(adapter),
            pickers: Mutex::new(HashMap::new()),
        }
    }

    /// The picker `picker` of user `user`, created on first use.
    ///
    /// Pickers never share debounce state or options.
    fn picker(&self, user: &str, picker: &str) -> Arc<Picker> {
        let mut pickers = self.pickers.lock().unwrap_or_else(PoisonError::into_inner);
        if pickers.len() >= MAX_PICKERS {
            // Only drop pickers with no lookup in flight.
            pickers.retain(|_, p| Arc::strong_count(p) > 1);
        }
        let key = (user.to_string(), picker.to_string());
        Arc::clone(
            pickers
                .entry(key)
                .or_insert_with(|| Arc::new(Picker::new(&self.adapter))),
        )
    }
}

/// Errors resolving the datasource instance a request was made for.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("missing datasource instance settings")]
    MissingSettings,
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// The Sequential Data Store datasource plugin.
///
/// Clients are cached per datasource instance and rebuilt whenever Grafana
/// reports that the instance's settings changed, so cached tokens survive
/// across requests.
#[derive(Clone, Debug, Default, GrafanaPlugin)]
#[grafana_plugin(
    plugin_type = "datasource",
    json_data = "SdsJsonData",
    secure_json_data = "SdsSecureJsonData"
)]
pub struct SdsDataSource {
    instances: Arc<RwLock<HashMap<i64, Arc<Instance>>>>,
}

impl SdsDataSource {
    fn instance(&self, settings: Option<&InstanceSettings>) -> Result<Arc<Instance>, InstanceError> {
        let settings = settings.ok_or(InstanceError::MissingSettings)?;
        self.cached_instance(settings.id, settings.updated, || {
            let adapter = SdsAdapter::from_instance(settings)?;
            info!(
                id = settings.id,
                uid = %settings.uid,
                backend = %adapter.backend().kind(),
                "Creating datasource instance"
            );
            Ok(adapter)
        })
    }

    /// The instance cached for `id`, built with `build` unless one at least
    /// as recent as `updated` exists. A rebuilt instance replaces the stale one.
    fn cached_instance(
        &self,
        id: i64,
        updated: DateTime<Utc>,
        build: impl FnOnce() -> Result<SdsAdapter, ClientError>,
    ) -> Result<Arc<Instance>, InstanceError> {
        let current = |instances: &HashMap<i64, Arc<Instance>>| {
            instances
                .get(&id)
                .filter(|i| i.updated >= updated)
                .map(Arc::clone)
        };
        if let Some(instance) = current(&*self.instances.read().unwrap_or_else(PoisonError::into_inner)) {
            return Ok(instance);
        }
        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        // Another request may have built it while we waited for the lock.
        if let Some(instance) = current(&*instances) {
            return Ok(instance);
        }
        let instance = Arc::new(Instance::new(updated, build()?));
        instances.insert(id, Arc::clone(&instance));
        Ok(instance)
    }
}

/// An error returned for a single query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("error querying SDS for query {ref_id}: {source}")]
    Instance {
        ref_id: String,
        source: Arc<InstanceError>,
    },
    #[error("error querying SDS for query {ref_id}: {source}")]
    Client { ref_id: String, source: ClientError },
    #[error("invalid frame returned for query {ref_id}: {source}")]
    Frame { ref_id: String, source: data::Error },
}

fn client_status(error: &ClientError) -> backend::DataQueryStatus {
    use backend::DataQueryStatus;
    match error.status() {
        Some(StatusCode::UNAUTHORIZED) => DataQueryStatus::Unauthorized,
        Some(StatusCode::FORBIDDEN) => DataQueryStatus::Forbidden,
        Some(StatusCode::NOT_FOUND) => DataQueryStatus::NotFound,
        Some(StatusCode::TOO_MANY_REQUESTS) => DataQueryStatus::TooManyRequests,
        Some(status) => DataQueryStatus::Custom(status),
        None => match error {
            ClientError::Auth(AuthError::MissingAuthorization) => DataQueryStatus::Unauthorized,
            ClientError::Settings(_) | ClientError::Url { .. } => DataQueryStatus::BadRequest,
            _ if error.is_downstream() => DataQueryStatus::BadGateway,
            _ => DataQueryStatus::Internal,
        },
    }
}

impl backend::DataQueryError for QueryError {
    fn ref_id(self) -> String {
        match self {
            Self::Instance { ref_id, .. } | Self::Client { ref_id, .. } | Self::Frame { ref_id, .. } => {
                ref_id
            }
        }
    }

    fn status(&self) -> backend::DataQueryStatus {
        match self {
            Self::Instance { source, .. } => match source.as_ref() {
                InstanceError::Client(source) => client_status(source),
                InstanceError::MissingSettings => backend::DataQueryStatus::BadRequest,
            },
            Self::Client { source, .. } => client_status(source),
            Self::Frame { .. } => backend::DataQueryStatus::Internal,
        }
    }

    fn source(&self) -> backend::ErrorSource {
        match self {
            Self::Client { source, .. } if source.is_downstream() => backend::ErrorSource::Downstream,
            _ => backend::ErrorSource::Plugin,
        }
    }
}

#[backend::async_trait]
impl backend::DataService for SdsDataSource {
    type Query = SdsQuery;
    type QueryError = QueryError;
    type Stream = backend::BoxDataResponseStream<Self::QueryError>;

    #[tracing::instrument(skip_all, fields(queries = request.queries.len()))]
    async fn query_data(&self, request: backend::QueryDataRequest<Self::Query, Self>) -> Self::Stream {
        let targets: Vec<Target> = request
            .queries
            .into_iter()
            .map(|q| Target::new(q.ref_id, q.query, q.time_range.from, q.time_range.to))
            .collect();
        let instance = match self.instance(request.plugin_context.instance_settings.as_ref()) {
            Ok(instance) => instance,
            Err(error) => {
                warn!(%error, "Unable to resolve datasource instance");
                let error = Arc::new(error);
                return Box::pin(futures_util::stream::iter(targets.into_iter().map(
                    move |t| {
                        Err(QueryError::Instance {
                            ref_id: t.ref_id,
                            source: Arc::clone(&error),
                        })
                    },
                )));
            }
        };
        let responses = instance.adapter.run_query(targets, &request.headers).await;
        Box::pin(futures_util::stream::iter(responses.into_iter().map(
            |TargetResponse { ref_id, result }| {
                let frame = result.map_err(|source| QueryError::Client {
                    ref_id: ref_id.clone(),
                    source,
                })?;
                let checked = frame.check().map_err(|source| QueryError::Frame {
                    ref_id: ref_id.clone(),
                    source,
                })?;
                Ok(backend::DataResponse::new(ref_id.clone(), vec![checked]))
            },
        )))
    }
}

#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error(transparent)]
    Instance(#[from] InstanceError),
}

#[backend::async_trait]
impl backend::DiagnosticsService for SdsDataSource {
    type CheckHealthError = HealthCheckError;

    #[tracing::instrument(skip_all)]
    async fn check_health(
        &self,
        request: backend::CheckHealthRequest<Self>,
    ) -> Result<backend::CheckHealthResponse, Self::CheckHealthError> {
        let instance = match self.instance(request.plugin_context.instance_settings.as_ref()) {
            Ok(instance) => instance,
            Err(InstanceError::Client(error)) => {
                return Ok(backend::CheckHealthResponse::error(error.to_string()))
            }
            Err(error) => return Err(error.into()),
        };
        Ok(match instance.adapter.backend().check().await {
            Ok(()) => backend::CheckHealthResponse::ok("Data source is working".to_string()),
            Err(error) => {
                warn!(%error, cause = ?std::error::Error::source(&error), "Health check failed");
                backend::CheckHealthResponse::error(error.to_string())
            }
        })
    }

    type CollectMetricsError = std::convert::Infallible;

    async fn collect_metrics(
        &self,
        _request: backend::CollectMetricsRequest<Self>,
    ) -> Result<backend::CollectMetricsResponse, Self::CollectMetricsError> {
        Ok(backend::CollectMetricsResponse::new(None))
    }
}

/// Errors returned by resource calls.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("unable to encode response: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Debounce(#[from] DebounceError),

    #[error("Path not found")]
    NotFound,
}

impl backend::ErrIntoHttpResponse for ResourceError {
    fn into_http_response(self) -> Result<Response<Bytes>, Box<dyn std::error::Error>> {
        let status = match &self {
            Self::Http(_) | Self::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Instance(InstanceError::MissingSettings) => StatusCode::BAD_REQUEST,
            Self::Instance(InstanceError::Client(e)) | Self::Client(e) => {
                e.status().unwrap_or(StatusCode::BAD_GATEWAY)
            }
            // Superseded by a newer lookup from the same picker.
            Self::Debounce(_) => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
        };
        Ok(Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(serde_json::to_vec(
                &serde_json::json!({"error": self.to_string()}),
            )?))?)
    }
}

fn json_response(options: &[SelectableOption]) -> Result<Response<Bytes>, ResourceError> {
    Ok(Response::builder()
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Bytes::from(serde_json::to_vec(options)?))?)
}

/// The query parameter `name` of a resource request URI.
fn query_param(uri: &http::Uri, name: &str) -> String {
    uri.query()
        .and_then(|q| Url::parse(&format!("http://localhost/?{q}")).ok())
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or_default()
}

fn forwarded_headers(headers: &http::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect()
}

#[backend::async_trait]
impl backend::ResourceService for SdsDataSource {
    type Error = ResourceError;
    type InitialResponse = Response<Bytes>;
    type Stream = backend::BoxResourceStream<Self::Error>;

    /// Handle the stream picker's requests.
    ///
    /// Each picker is identified by the Grafana user and the `picker`
    /// parameter sent by the query editor.
    ///
    /// - `GET /streams?query=text&picker=id` searches for streams, debounced
    ///   per picker.
    /// - `GET /streams/default?picker=id` returns the options of the picker's
    ///   last search.
    #[tracing::instrument(skip_all, fields(path = %request.request.uri().path()))]
    async fn call_resource(
        &self,
        request: backend::CallResourceRequest<Self>,
    ) -> Result<(Self::InitialResponse, Self::Stream), Self::Error> {
        let instance = self.instance(request.plugin_context.instance_settings.as_ref())?;
        let uri = request.request.uri();
        let user = request
            .plugin_context
            .user
            .as_ref()
            .map(|u| u.login.as_str())
            .unwrap_or_default();
        let picker = instance.picker(user, &query_param(uri, "picker"));
        let response = match uri.path() {
            "/streams" => {
                let text = query_param(uri, "query");
                let headers = forwarded_headers(request.request.headers());
                debug!(text, user, "Stream lookup requested");
                let options = picker.lookups.schedule((text, headers)).await??;
                json_response(&options)?
            }
            "/streams/default" => json_response(&picker.options.get().unwrap_or_default())?,
            _ => return Err(ResourceError::NotFound),
        };
        Ok((response, Box::pin(futures_util::stream::empty())))
    }
}
