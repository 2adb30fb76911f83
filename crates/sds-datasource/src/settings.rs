//! Connection settings for a Sequential Data Store datasource instance.
//!
//! Grafana persists two blobs per datasource instance: the plain JSON data
//! ([`SdsJsonData`]) and the encrypted secure JSON data ([`SdsSecureJsonData`]).
//! Both arrive with every request through the plugin context. The raw JSON data
//! is resolved into an immutable [`SdsSettings`] with [`apply_defaults`].
use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Default AVEVA Data Hub resource.
pub const DEFAULT_RESOURCE: &str = "https://uswe.datahub.connect.aveva.com";
/// Default SDS API version.
pub const DEFAULT_API_VERSION: &str = "v1";
/// Default Edge Data Store port.
pub const DEFAULT_EDS_PORT: &str = "5590";
/// Namespaces exposed by an Edge Data Store.
pub const EDS_NAMESPACES: [&str; 2] = ["default", "diagnostics"];

/// The flavour of Sequential Data Store the datasource talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdsBackendKind {
    /// AVEVA Data Hub, the cloud service.
    #[default]
    #[serde(rename = "ADH")]
    Adh,
    /// Edge Data Store, a local service reached directly over HTTP.
    #[serde(rename = "EDS")]
    Eds,
}

impl fmt::Display for SdsBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adh => f.write_str("AVEVA Data Hub"),
            Self::Eds => f.write_str("Edge Data Store"),
        }
    }
}

/// The datasource's JSON data, exactly as stored by Grafana.
///
/// Every field is optional; missing values are filled in by [`apply_defaults`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdsJsonData {
    #[serde(rename = "type")]
    pub kind: Option<SdsBackendKind>,
    pub eds_port: Option<String>,
    pub resource: Option<String>,
    pub api_version: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub oauth_pass_thru: Option<bool>,
    pub namespace_id: Option<String>,
    pub use_community: Option<bool>,
    pub community_id: Option<String>,
}

/// The datasource's decrypted secure JSON data.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdsSecureJsonData {
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub client_secret: Option<SecretString>,
}

impl fmt::Debug for SdsSecureJsonData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdsSecureJsonData")
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

// Grafana sends an empty string once a secret has been reset.
fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.filter(|s| !s.is_empty())
        .map(|s| SecretString::new(s.into())))
}

/// A required setting was missing for the selected backend.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid resource URL {url:?}: {reason}")]
    InvalidResource { url: String, reason: String },
}

/// Resolved, immutable datasource settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdsSettings {
    kind: SdsBackendKind,
    eds_port: String,
    resource: String,
    api_version: String,
    tenant_id: String,
    client_id: String,
    oauth_pass_thru: bool,
    namespace_id: String,
    use_community: bool,
    community_id: String,
}

/// Fill in defaults for any missing values, returning a new [`SdsSettings`].
///
/// The input is never modified.
pub fn apply_defaults(json: &SdsJsonData) -> SdsSettings {
    fn non_empty(value: &Option<String>, default: &str) -> String {
        value
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .to_string()
    }

    let kind = json.kind.unwrap_or_default();
    let namespace_id = json.namespace_id.clone().unwrap_or_default();
    let namespace_id = if kind == SdsBackendKind::Eds && !EDS_NAMESPACES.contains(&&*namespace_id)
    {
        EDS_NAMESPACES[0].to_string()
    } else {
        namespace_id
    };
    SdsSettings {
        kind,
        eds_port: non_empty(&json.eds_port, DEFAULT_EDS_PORT),
        resource: non_empty(&json.resource, DEFAULT_RESOURCE)
            .trim_end_matches('/')
            .to_string(),
        api_version: non_empty(&json.api_version, DEFAULT_API_VERSION),
        tenant_id: json.tenant_id.clone().unwrap_or_default(),
        client_id: json.client_id.clone().unwrap_or_default(),
        oauth_pass_thru: json.oauth_pass_thru.unwrap_or(false),
        namespace_id,
        use_community: json.use_community.unwrap_or(false),
        community_id: json.community_id.clone().unwrap_or_default(),
    }
}

impl Default for SdsSettings {
    fn default() -> Self {
        apply_defaults(&SdsJsonData::default())
    }
}

impl SdsSettings {
    pub fn kind(&self) -> SdsBackendKind {
        self.kind
    }

    pub fn eds_port(&self) -> &str {
        &self.eds_port
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn oauth_pass_thru(&self) -> bool {
        self.oauth_pass_thru
    }

    pub fn namespace_id(&self) -> &str {
        &self.namespace_id
    }

    pub fn use_community(&self) -> bool {
        self.use_community
    }

    pub fn community_id(&self) -> &str {
        &self.community_id
    }

    #[must_use]
    pub fn with_kind(mut self, kind: SdsBackendKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_eds_port(mut self, port: impl Into<String>) -> Self {
        self.eds_port = port.into();
        self
    }

    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    #[must_use]
    pub fn with_oauth_pass_thru(mut self, oauth_pass_thru: bool) -> Self {
        self.oauth_pass_thru = oauth_pass_thru;
        self
    }

    #[must_use]
    pub fn with_namespace_id(mut self, namespace_id: impl Into<String>) -> Self {
        self.namespace_id = namespace_id.into();
        self
    }

    #[must_use]
    pub fn with_community(mut self, community_id: Option<String>) -> Self {
        self.use_community = community_id.is_some();
        self.community_id = community_id.unwrap_or_default();
        self
    }

    /// Check that the settings required by the selected backend are present.
    ///
    /// `has_secret` reports whether a client secret is stored; the secret
    /// itself is kept out of `SdsSettings`.
    pub fn validate(&self, has_secret: bool) -> Result<(), SettingsError> {
        reqwest::Url::parse(&self.resource).map_err(|e| SettingsError::InvalidResource {
            url: self.resource.clone(),
            reason: e.to_string(),
        })?;
        if self.kind == SdsBackendKind::Eds {
            return Ok(());
        }
        if self.tenant_id.is_empty() {
            return Err(SettingsError::Missing("tenantId"));
        }
        if self.use_community && self.community_id.is_empty() {
            return Err(SettingsError::Missing("communityId"));
        }
        if !self.oauth_pass_thru {
            if self.client_id.is_empty() {
                return Err(SettingsError::Missing("clientId"));
            }
            if !has_secret {
                return Err(SettingsError::Missing("clientSecret"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_fill_missing_values() {
        let settings = apply_defaults(&SdsJsonData::default());
        assert_eq!(settings.kind(), SdsBackendKind::Adh);
        assert_eq!(settings.eds_port(), "5590");
        assert_eq!(settings.resource(), DEFAULT_RESOURCE);
        assert_eq!(settings.api_version(), "v1");
        assert!(!settings.oauth_pass_thru());
        assert!(!settings.use_community());
    }

    #[test]
    fn defaults_do_not_touch_input() {
        let json: SdsJsonData = serde_json::from_value(json!({
            "type": "EDS",
            "namespaceId": "not-a-namespace",
        }))
        .unwrap();
        let before = json.clone();
        let settings = apply_defaults(&json);
        assert_eq!(json, before);
        assert_eq!(settings.namespace_id(), "default");
    }

    #[test]
    fn eds_keeps_known_namespace() {
        let json: SdsJsonData = serde_json::from_value(json!({
            "type": "EDS",
            "namespaceId": "diagnostics",
            "edsPort": "6000",
        }))
        .unwrap();
        let settings = apply_defaults(&json);
        assert_eq!(settings.namespace_id(), "diagnostics");
        assert_eq!(settings.eds_port(), "6000");
    }

    #[test]
    fn adh_keeps_any_namespace() {
        let json: SdsJsonData = serde_json::from_value(json!({
            "resource": "https://example.com/",
            "tenantId": "tenant",
            "namespaceId": "production",
        }))
        .unwrap();
        let settings = apply_defaults(&json);
        assert_eq!(settings.namespace_id(), "production");
        assert_eq!(settings.resource(), "https://example.com");
    }

    #[test]
    fn secure_json_data_redacts_and_drops_empty() {
        let secure: SdsSecureJsonData =
            serde_json::from_value(json!({"clientSecret": "hunter2"})).unwrap();
        assert_eq!(
            secure.client_secret.as_ref().unwrap().expose_secret(),
            "hunter2"
        );
        assert!(!format!("{secure:?}").contains("hunter2"));

        let reset: SdsSecureJsonData = serde_json::from_value(json!({"clientSecret": ""})).unwrap();
        assert!(reset.client_secret.is_none());
    }

    #[test]
    fn validation() {
        let settings = SdsSettings::default();
        assert_eq!(
            settings.validate(false),
            Err(SettingsError::Missing("tenantId"))
        );
        let settings = settings.with_tenant_id("tenant");
        assert_eq!(
            settings.validate(false),
            Err(SettingsError::Missing("clientId"))
        );
        let settings = settings.with_client_id("client");
        assert_eq!(
            settings.validate(false),
            Err(SettingsError::Missing("clientSecret"))
        );
        assert_eq!(settings.validate(true), Ok(()));
        assert_eq!(
            settings.clone().with_oauth_pass_thru(true).validate(false),
            Ok(())
        );
        assert_eq!(
            settings.with_community(Some(String::new())).validate(true),
            Err(SettingsError::Missing("communityId"))
        );
        assert_eq!(
            SdsSettings::default()
                .with_kind(SdsBackendKind::Eds)
                .validate(false),
            Ok(())
        );
    }

    #[test]
    fn backend_kind_names() {
        assert_eq!(SdsBackendKind::Adh.to_string(), "AVEVA Data Hub");
        assert_eq!(SdsBackendKind::Eds.to_string(), "Edge Data Store");
    }

    #[test]
    fn invalid_resource() {
        let settings = SdsSettings::default().with_resource("not a url");
        assert!(matches!(
            settings.validate(true),
            Err(SettingsError::InvalidResource { .. })
        ));
    }
}
