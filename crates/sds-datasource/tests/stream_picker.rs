use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use grafana_plugin_sdk::arrow::array::{Array, Float64Array, StringArray};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use sds_datasource::{
    query::{SdsQuery, Target},
    settings::{apply_defaults, SdsJsonData, SdsSecureJsonData},
    streams::{OptionsSlot, SelectableOption, StreamLister},
    DataSourceAdapter, SdsAdapter,
};
use wiremock::{
    matchers::{body_string_contains, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn option(value: &str, label: &str) -> SelectableOption {
    SelectableOption {
        value: value.to_string(),
        label: label.to_string(),
    }
}

#[tokio::test]
async fn eds_stream_picker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tenants/default/namespaces/default/streams"))
        .and(query_param("query", "Id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"Id": "Id1", "Name": "Name1", "TypeId": "Simple"},
            {"Id": "Id2", "Name": "Name2", "TypeId": "Simple"},
        ])))
        .mount(&server)
        .await;

    let address = server.address();
    let json: SdsJsonData = serde_json::from_value(json!({
        "type": "EDS",
        "resource": format!("http://{}", address.ip()),
        "edsPort": address.port().to_string(),
        "namespaceId": "somewhere-else",
    }))
    .unwrap();
    let adapter = SdsAdapter::new(apply_defaults(&json), None).unwrap();
    let headers = HashMap::new();
    let slot = OptionsSlot::new();

    let options = StreamLister::new(&adapter, &headers)
        .get_streams("Id", &slot)
        .await
        .unwrap();
    assert_eq!(options, vec![option("Id1", "Name1"), option("Id2", "Name2")]);
    assert_eq!(slot.get(), Some(options));
}

#[tokio::test]
async fn adh_client_credentials_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_endpoint": format!("{}/identity/connect/token", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/identity/connect/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "abc",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let base = "/api/v1/tenants/tenant/namespaces/namespace";
    Mock::given(method("GET"))
        .and(path(format!("{base}/streams/StreamId1")))
        .and(header("Authorization", "Bearer abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(
            {"Id": "StreamId1", "Name": "StreamName1", "TypeId": "StreamType1"}
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{base}/types/StreamType1")))
        .and(header("Authorization", "Bearer abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Id": "StreamType1",
            "SdsTypeCode": 1,
            "Properties": [
                {"Id": "Timestamp", "IsKey": true, "SdsType": {"SdsTypeCode": 16}},
                {"Id": "Label", "SdsType": {"SdsTypeCode": 18}},
                {"Id": "Value", "SdsType": {"SdsTypeCode": 114}},
            ],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{base}/streams/StreamId1/Data")))
        .and(header("Authorization", "Bearer abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"Timestamp": "2022-06-04T00:00:00Z", "Label": "a", "Value": 0.5},
            {"Timestamp": "2022-06-05T00:00:00Z", "Label": "b"},
        ])))
        .mount(&server)
        .await;

    let json: SdsJsonData = serde_json::from_value(json!({
        "type": "ADH",
        "resource": server.uri(),
        "tenantId": "tenant",
        "namespaceId": "namespace",
        "clientId": "client",
    }))
    .unwrap();
    let secure: SdsSecureJsonData =
        serde_json::from_value(json!({"clientSecret": "secret"})).unwrap();
    assert!(secure.client_secret.is_some());
    let adapter = SdsAdapter::new(apply_defaults(&json), secure.client_secret).unwrap();

    let from = Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).single().unwrap();
    let to = Utc.with_ymd_and_hms(2022, 6, 30, 0, 0, 0).single().unwrap();
    let query: SdsQuery = serde_json::from_value(json!({
        "serviceId": "sds",
        "serviceInstance": "",
        "serviceRequest": "streamData",
        "urlParameters": {"id": "StreamId1"},
    }))
    .unwrap();
    let targets = vec![
        Target::new("A", query.clone(), from, to),
        Target::new("B", query, from, to),
    ];
    let responses = adapter.run_query(targets, &HashMap::new()).await;
    assert_eq!(responses.len(), 2);

    for response in responses {
        let frame = response.result.unwrap();
        assert_eq!(frame.name, "StreamName1");
        let labels: Vec<_> = frame["Label"]
            .values()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
            .iter()
            .collect();
        assert_eq!(labels, vec![Some("a"), Some("b")]);
        let values: Vec<_> = frame["Value"]
            .values()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap()
            .iter()
            .collect();
        assert_eq!(values, vec![Some(0.5), None]);
        assert!(frame.check().is_ok());
    }
}

#[tokio::test]
async fn adh_pass_through_requires_header() {
    let json: SdsJsonData = serde_json::from_value(json!({
        "tenantId": "tenant",
        "oauthPassThru": true,
    }))
    .unwrap();
    let adapter = SdsAdapter::new(apply_defaults(&json), None::<SecretString>).unwrap();
    let responses = adapter
        .run_query(vec![Target::autocomplete("")], &HashMap::new())
        .await;
    let error = responses[0].result.as_ref().unwrap_err();
    assert!(error.to_string().contains("Authorization"));
}
