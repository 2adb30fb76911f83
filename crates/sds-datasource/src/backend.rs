//! A single interface over both Sequential Data Store flavours.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use grafana_plugin_sdk::data::Frame;
use secrecy::SecretString;
use thiserror::Error;
use tracing::debug;

use crate::{
    client::{AdhClient, AuthError, EdsClient},
    error::{ClientError, Result},
    query::{QueryKind, Target},
    settings::{SdsBackendKind, SdsSettings, EDS_NAMESPACES},
    shape::{frame_from_rows, frame_from_streams, frame_from_typed_rows},
};

/// Why a health check failed.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Unable to retrieve token")]
    Token(#[source] AuthError),
    #[error("Invalid Configuration")]
    Probe(#[source] ClientError),
}

/// The configured SDS backend.
#[derive(Debug)]
pub enum SdsBackend {
    Adh(AdhClient),
    Eds(EdsClient),
}

impl SdsBackend {
    /// Build the backend selected by `settings`.
    pub fn new(settings: &SdsSettings, client_secret: Option<SecretString>) -> Result<Self> {
        let http = reqwest::Client::new();
        Ok(match settings.kind() {
            SdsBackendKind::Adh => Self::Adh(AdhClient::new(http, settings, client_secret)?),
            SdsBackendKind::Eds => Self::Eds(EdsClient::new(http, settings)?),
        })
    }

    pub fn kind(&self) -> SdsBackendKind {
        match self {
            Self::Adh(_) => SdsBackendKind::Adh,
            Self::Eds(_) => SdsBackendKind::Eds,
        }
    }

    /// Run a single query target.
    pub async fn query(&self, target: &Target, headers: &HashMap<String, String>) -> Result<Frame> {
        let namespace = target
            .query
            .service_instance
            .as_deref()
            .filter(|ns| !ns.is_empty());
        match target.query.kind() {
            QueryKind::ServiceInstances => self.service_instances(headers).await,
            QueryKind::Streams { query } => self.search_streams(namespace, &query, headers).await,
            QueryKind::StreamData { id } if id.is_empty() => {
                debug!(ref_id = %target.ref_id, "No stream selected");
                Ok(Frame::new(target.query.display_name()))
            }
            QueryKind::StreamData { id } => {
                self.stream_data(
                    namespace,
                    &id,
                    target.query.display_name(),
                    &target.from,
                    &target.to,
                    headers,
                )
                .await
            }
        }
    }

    /// Search for streams, returning a frame of `Id` and `Name` fields.
    ///
    /// In community mode the `Self` link of each stream is used as its id.
    pub async fn search_streams(
        &self,
        namespace: Option<&str>,
        text: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Frame> {
        match self {
            Self::Eds(client) => {
                let streams = client.search_streams(namespace, text).await?;
                Ok(frame_from_streams(streams.into_iter().map(|s| (s.id, s.name))))
            }
            Self::Adh(client) => {
                let auth = client.tokens().authorization(headers).await?;
                if let Some(community) = client.community_id() {
                    let results = client.community_search(community, text, &auth).await?;
                    return Ok(frame_from_streams(
                        results.into_iter().map(|r| (r.self_link, r.name)),
                    ));
                }
                let namespace = namespace.unwrap_or(client.namespace_id());
                let streams = client.search_streams(namespace, text, &auth).await?;
                Ok(frame_from_streams(streams.into_iter().map(|s| (s.id, s.name))))
            }
        }
    }

    /// Fetch the values of stream `id` between `from` and `to`.
    ///
    /// EDS frames are named `name`; ADH frames take the stream's own name.
    pub async fn stream_data(
        &self,
        namespace: Option<&str>,
        id: &str,
        name: &str,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
        headers: &HashMap<String, String>,
    ) -> Result<Frame> {
        match self {
            Self::Eds(client) => {
                let rows = client.stream_data(namespace, id, from, to).await?;
                Ok(frame_from_rows(name, &rows))
            }
            Self::Adh(client) => {
                let auth = client.tokens().authorization(headers).await?;
                if let Some(community) = client.community_id() {
                    let resolved = client.community_resolved(community, id, &auth).await?;
                    let rows = client
                        .community_values(community, id, from, to, &auth)
                        .await?;
                    return Ok(frame_from_typed_rows(
                        resolved.name,
                        &resolved.sds_type,
                        &rows,
                    ));
                }
                let namespace = namespace.unwrap_or(client.namespace_id());
                let stream = client.stream(namespace, id, &auth).await?;
                let sds_type = client.sds_type(namespace, &stream.type_id, &auth).await?;
                let rows = client
                    .stream_values(namespace, id, from, to, &auth)
                    .await?;
                debug!(stream = %stream.id, sds_type = %sds_type.id, rows = rows.len(), "Fetched stream data");
                Ok(frame_from_typed_rows(stream.name, &sds_type, &rows))
            }
        }
    }

    /// List the service instances (namespaces) as a frame of `Id` and `Name` fields.
    pub async fn service_instances(&self, headers: &HashMap<String, String>) -> Result<Frame> {
        match self {
            Self::Eds(_) => Ok(frame_from_streams(EDS_NAMESPACES.map(|n| (n, n)))),
            Self::Adh(client) => {
                let auth = client.tokens().authorization(headers).await?;
                let namespaces = client.namespaces(&auth).await?;
                Ok(frame_from_streams(
                    namespaces.into_iter().map(|n| (n.id.clone(), n.id)),
                ))
            }
        }
    }

    /// Probe the backend with the configured credentials.
    ///
    /// With OAuth pass-through there is no user token to probe with, so the
    /// check always succeeds.
    pub async fn check(&self) -> std::result::Result<(), HealthError> {
        match self {
            Self::Eds(client) => client
                .search_streams(None, "")
                .await
                .map(|_| ())
                .map_err(HealthError::Probe),
            Self::Adh(client) if client.tokens().is_pass_through() => Ok(()),
            Self::Adh(client) => {
                let auth = client
                    .tokens()
                    .authorization(&HashMap::new())
                    .await
                    .map_err(HealthError::Token)?;
                client
                    .namespaces(&auth)
                    .await
                    .map(|_| ())
                    .map_err(HealthError::Probe)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use grafana_plugin_sdk::{
        arrow::array::{Array, StringArray},
        data::Field,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::query::SdsQuery;

    fn strings(field: &Field) -> Vec<Option<&str>> {
        field
            .values()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
            .iter()
            .collect()
    }

    fn eds(server: &MockServer) -> SdsBackend {
        let address = server.address();
        let settings = SdsSettings::default()
            .with_kind(SdsBackendKind::Eds)
            .with_resource(format!("http://{}", address.ip()))
            .with_eds_port(address.port().to_string())
            .with_namespace_id("default");
        SdsBackend::new(&settings, None).unwrap()
    }

    fn adh(server: &MockServer, community: Option<&str>) -> SdsBackend {
        let settings = SdsSettings::default()
            .with_resource(server.uri())
            .with_tenant_id("tenant")
            .with_namespace_id("namespace")
            .with_oauth_pass_thru(true)
            .with_community(community.map(str::to_string));
        SdsBackend::new(&settings, None).unwrap()
    }

    fn user() -> HashMap<String, String> {
        HashMap::from([("Authorization".to_string(), "Bearer user".to_string())])
    }

    #[tokio::test]
    async fn eds_search_frame() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tenants/default/namespaces/default/streams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"Id": "Id1", "Name": "Name1"},
                {"Id": "Id2", "Name": "Name2"},
            ])))
            .mount(&server)
            .await;

        let backend = eds(&server);
        assert_eq!(backend.kind(), SdsBackendKind::Eds);
        let frame = backend
            .query(&Target::autocomplete("Id"), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(strings(&frame["Id"]), vec![Some("Id1"), Some("Id2")]);
        assert_eq!(strings(&frame["Name"]), vec![Some("Name1"), Some("Name2")]);
    }

    #[tokio::test]
    async fn eds_stream_data_frame_is_named_after_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tenants/default/namespaces/default/streams/Id1/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"Timestamp": "2020-01-01T00:00:00Z", "Value": 1},
            ])))
            .mount(&server)
            .await;

        let from = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().unwrap();
        let query = SdsQuery {
            id: "Id1".to_string(),
            name: "Name1".to_string(),
            ..SdsQuery::default()
        };
        let frame = eds(&server)
            .query(&Target::new("A", query, from, from), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(frame.name, "Name1");
        assert_eq!(frame.fields().len(), 2);
    }

    #[tokio::test]
    async fn eds_service_instances() {
        let server = MockServer::start().await;
        let frame = eds(&server).service_instances(&HashMap::new()).await.unwrap();
        assert_eq!(
            strings(&frame["Id"]),
            vec![Some("default"), Some("diagnostics")]
        );
    }

    #[tokio::test]
    async fn eds_query_uses_diagnostics_namespace() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tenants/default/namespaces/diagnostics/streams/Diag1/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"Timestamp": "2020-01-01T00:00:00Z", "Value": 1},
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let from = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().unwrap();
        let query: SdsQuery = serde_json::from_value(json!({
            "serviceInstance": "diagnostics",
            "serviceRequest": "streamData",
            "urlParameters": {"id": "Diag1"},
        }))
        .unwrap();
        let frame = eds(&server)
            .query(&Target::new("A", query, from, from), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(frame.fields().len(), 2);
    }

    #[tokio::test]
    async fn missing_stream_id_gives_empty_frame() {
        let server = MockServer::start().await;
        let query: SdsQuery = serde_json::from_value(json!({"serviceRequest": "streamData"})).unwrap();
        let now = Utc::now();
        let frame = eds(&server)
            .query(&Target::new("A", query, now, now), &HashMap::new())
            .await
            .unwrap();
        assert!(frame.fields().is_empty());
    }

    #[tokio::test]
    async fn adh_query_namespace_overrides_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tenants/tenant/namespaces/other/streams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"Id": "Id1", "Name": "Name1"},
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let frame = adh(&server, None)
            .search_streams(Some("other"), "", &user())
            .await
            .unwrap();
        assert_eq!(strings(&frame["Id"]), vec![Some("Id1")]);
    }

    #[tokio::test]
    async fn adh_community_search_uses_self_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/search/communities/community/streams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"Id": "Id1", "Name": "Name1", "Self": "https://host/streams/Id1"},
            ])))
            .mount(&server)
            .await;

        let frame = adh(&server, Some("community"))
            .search_streams(None, "", &user())
            .await
            .unwrap();
        assert_eq!(strings(&frame["Id"]), vec![Some("https://host/streams/Id1")]);
        assert_eq!(strings(&frame["Name"]), vec![Some("Name1")]);
    }

    #[tokio::test]
    async fn adh_pass_through_without_header_fails() {
        let server = MockServer::start().await;
        let err = adh(&server, None)
            .search_streams(None, "", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Auth(AuthError::MissingAuthorization)
        ));
    }

    #[tokio::test]
    async fn health_checks() {
        let server = MockServer::start().await;
        assert!(adh(&server, None).check().await.is_ok());

        let settings = SdsSettings::default()
            .with_resource(server.uri())
            .with_tenant_id("tenant")
            .with_client_id("client");
        let backend = SdsBackend::new(&settings, Some(SecretString::new("secret".into()))).unwrap();
        let err = backend.check().await.unwrap_err();
        assert_eq!(err.to_string(), "Unable to retrieve token");

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let err = eds(&server).check().await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid Configuration");
    }
}
