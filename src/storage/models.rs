//! Plain records persisted by the storage layer.

use serde::{Deserialize, Serialize};

/// Identifier of the always-present external trace source.
pub const EXTERNAL_TRACE_SOURCE_ID: i64 = 0;

/// Annotation name reserved for per-event alert severities.
pub const ALERT_ANNOTATION: &str = "ALERT";

/// Internal/external classification of an API or event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApiType {
    #[default]
    Internal,
    External,
}

impl ApiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiType::Internal => "INTERNAL",
            ApiType::External => "EXTERNAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INTERNAL" => Some(ApiType::Internal),
            "EXTERNAL" => Some(ApiType::External),
            _ => None,
        }
    }
}

/// Kind of difference between a trace and a known spec.
///
/// Ordered by priority: when both the provided and reconstructed spec
/// report a diff, the event keeps the higher one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiffType {
    #[default]
    #[serde(rename = "NO_DIFF")]
    NoDiff,
    #[serde(rename = "GENERAL_DIFF")]
    GeneralDiff,
    #[serde(rename = "SHADOW_DIFF")]
    ShadowDiff,
    #[serde(rename = "ZOMBIE_DIFF")]
    ZombieDiff,
}

impl DiffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffType::NoDiff => "NO_DIFF",
            DiffType::GeneralDiff => "GENERAL_DIFF",
            DiffType::ShadowDiff => "SHADOW_DIFF",
            DiffType::ZombieDiff => "ZOMBIE_DIFF",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NO_DIFF" => Some(DiffType::NoDiff),
            "GENERAL_DIFF" => Some(DiffType::GeneralDiff),
            "SHADOW_DIFF" => Some(DiffType::ShadowDiff),
            "ZOMBIE_DIFF" => Some(DiffType::ZombieDiff),
            _ => None,
        }
    }

    /// Highest-priority of two diff types.
    pub fn highest(self, other: DiffType) -> DiffType {
        self.max(other)
    }
}

/// Which spec a lookup or diff refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecSource {
    Provided,
    Reconstructed,
}

/// An API (host, port, trace source) in the inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiInfo {
    pub id: i64,
    #[serde(rename = "type")]
    pub api_type: ApiType,
    pub name: String,
    pub port: i64,
    #[serde(rename = "traceSourceID")]
    pub trace_source_id: i64,
    pub destination_namespace: String,
    pub has_provided_spec: bool,
    pub has_reconstructed_spec: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub provided_spec: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub provided_spec_info: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reconstructed_spec: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reconstructed_spec_info: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provided_spec_created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconstructed_spec_created_at: Option<String>,
}

impl ApiInfo {
    /// Identity columns used by first-or-create.
    pub fn new(
        name: impl Into<String>,
        port: i64,
        trace_source_id: i64,
        api_type: ApiType,
        destination_namespace: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            port,
            trace_source_id,
            api_type,
            destination_namespace: destination_namespace.into(),
            ..Self::default()
        }
    }

    /// Key used by the spec engine for this API.
    pub fn spec_key(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }
}

/// One observed request/response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: i64,
    pub time: String,
    pub request_time: String,
    pub method: String,
    pub path: String,
    pub query: String,
    pub status_code: i64,
    #[serde(rename = "sourceIP")]
    pub source_ip: String,
    #[serde(rename = "destinationIP")]
    pub destination_ip: String,
    pub destination_port: i64,
    pub has_reconstructed_spec_diff: bool,
    pub has_provided_spec_diff: bool,
    pub has_spec_diff: bool,
    pub spec_diff_type: DiffType,
    pub host_spec_name: String,
    pub is_non_api: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub new_reconstructed_spec: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub old_reconstructed_spec: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub new_provided_spec: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub old_provided_spec: String,
    pub provided_path_id: String,
    pub reconstructed_path_id: String,
    /// None for non-API events.
    pub api_info_id: Option<i64>,
    pub event_type: ApiType,
    /// Annotations joined in by listing queries; not a column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<EventAnnotation>,
}

/// Old/new path-item payloads recorded for one spec source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecDiff {
    pub diff_type: DiffType,
    pub old_spec: String,
    pub new_spec: String,
}

/// Module-owned annotation attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAnnotation {
    pub module_name: String,
    pub event_id: i64,
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub annotation: Vec<u8>,
}

/// Module-owned annotation aggregated at API granularity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiAnnotation {
    pub module_name: String,
    pub api_id: i64,
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub annotation: Vec<u8>,
}

/// Pending parameterization proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: i64,
    pub approved: bool,
    pub spec_key: String,
    /// Serialized path → path item mapping from the spec engine.
    pub path_to_path_item_str: String,
}

/// A fleet of agents, authenticated by token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSource {
    pub id: i64,
    pub uid: uuid::Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub description: String,
    #[serde(rename = "auth_token", skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// "Component wants traces for api from source."
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceSampling {
    pub api_id: i64,
    pub trace_source_id: i64,
    pub component: String,
}

/// Key/value label attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub api_info_id: Option<i64>,
    pub path: String,
    pub method: String,
    pub event_id: i64,
    pub key: String,
    pub value: String,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_type_priority() {
        assert_eq!(
            DiffType::NoDiff.highest(DiffType::ShadowDiff),
            DiffType::ShadowDiff
        );
        assert_eq!(
            DiffType::ZombieDiff.highest(DiffType::GeneralDiff),
            DiffType::ZombieDiff
        );
        assert_eq!(DiffType::NoDiff.highest(DiffType::NoDiff), DiffType::NoDiff);
    }

    #[test]
    fn test_api_type_round_trip_through_str() {
        assert_eq!(ApiType::parse("internal"), Some(ApiType::Internal));
        assert_eq!(ApiType::External.as_str(), "EXTERNAL");
        assert_eq!(ApiType::parse("other"), None);
    }

    #[test]
    fn test_spec_key() {
        let api = ApiInfo::new("svc", 8080, 0, ApiType::Internal, "");
        assert_eq!(api.spec_key(), "svc:8080");
    }
}
