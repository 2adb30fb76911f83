//! Wire types returned by the Sequential Data Store REST API.
use serde::Deserialize;

mod type_code;

pub use type_code::SdsTypeCode;

/// A stream, as returned by `GET .../streams` and `GET .../streams/{id}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SdsStream {
    pub id: String,
    pub name: String,
    pub type_id: String,
    pub description: Option<String>,
}

/// A stream returned by a community search.
///
/// Community streams are addressed through their `Self` link rather than
/// their id, since they may live in another tenant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StreamSearchResult {
    pub type_id: String,
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "Self")]
    pub self_link: String,
    pub tenant_id: String,
    pub namespace_id: String,
    pub community_id: String,
}

/// An SDS type definition.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SdsType {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub sds_type_code: SdsTypeCode,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Vec<SdsTypeProperty>,
}

/// A property of an [`SdsType`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SdsTypeProperty {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_key: bool,
    pub sds_type: SdsType,
}

/// A stream together with its fully resolved type, as returned by
/// `GET {self}/resolved`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SdsResolvedStream {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "Type")]
    pub sds_type: SdsType,
}

/// A namespace, which the query editor presents as a service instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SdsNamespace {
    pub id: String,
    pub description: Option<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn stream_ignores_unknown_fields() {
        let stream: SdsStream = serde_json::from_str(
            r#"{
                "TypeId": "StreamType1",
                "Id": "StreamId1",
                "Name": "StreamName1",
                "Description": "",
                "InterpolationMode": null,
                "ExtrapolationMode": null
            }"#,
        )
        .unwrap();
        assert_eq!(stream.id, "StreamId1");
        assert_eq!(stream.type_id, "StreamType1");
    }

    #[test]
    fn type_with_numeric_codes() {
        let t: SdsType = serde_json::from_str(
            r#"{
                "Id": "StreamType1",
                "Name": "StreamType1",
                "SdsTypeCode": 1,
                "Properties": [
                    {
                        "Id": "Timestamp",
                        "Name": "Timestamp",
                        "IsKey": true,
                        "SdsType": {"Id": "DateTime", "SdsTypeCode": 16, "Properties": null}
                    },
                    {
                        "Id": "Value",
                        "Name": "Value",
                        "IsKey": false,
                        "SdsType": {"Id": "Single", "SdsTypeCode": 13, "Properties": null}
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(t.sds_type_code, SdsTypeCode::Object);
        assert_eq!(t.properties.len(), 2);
        assert_eq!(t.properties[0].sds_type.sds_type_code, SdsTypeCode::DateTime);
        assert!(t.properties[0].is_key);
        assert_eq!(t.properties[1].sds_type.sds_type_code, SdsTypeCode::Single);
    }

    #[test]
    fn resolved_stream_with_named_codes() {
        let resolved: SdsResolvedStream = serde_json::from_str(
            r#"{
                "Id": "StreamId1",
                "Name": "StreamName1",
                "Resolved": true,
                "Type": {
                    "Id": "StreamType1",
                    "SdsTypeCode": "Object",
                    "Properties": [
                        {"Id": "Timestamp", "SdsType": {"SdsTypeCode": "DateTime", "Properties": []}},
                        {"Id": "Value", "SdsType": {"SdsTypeCode": "NullableDouble", "Properties": []}}
                    ]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(resolved.name, "StreamName1");
        assert_eq!(
            resolved.sds_type.properties[1].sds_type.sds_type_code,
            SdsTypeCode::NullableDouble
        );
    }

    #[test]
    fn search_result_self_link() {
        let result: StreamSearchResult = serde_json::from_str(
            r#"{"Name": "StreamName1", "Id": "StreamId1", "Self": "http://host/StreamId1"}"#,
        )
        .unwrap();
        assert_eq!(result.self_link, "http://host/StreamId1");
    }
}
