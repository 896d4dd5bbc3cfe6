//! Telemetry wire types posted by capture agents.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// One HTTP header as captured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

/// Fields shared by requests and responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Common {
    pub headers: Vec<Header>,
    /// Base64 encoded body.
    pub body: String,
    #[serde(rename = "TruncatedBody", alias = "truncatedBody", alias = "truncated_body")]
    pub truncated_body: bool,
    pub version: String,
    /// Capture time, milliseconds since the epoch.
    pub time: i64,
}

impl Common {
    /// Decoded body. Bodies that are not valid base64 are taken verbatim.
    pub fn body_bytes(&self) -> Vec<u8> {
        STANDARD
            .decode(&self.body)
            .unwrap_or_else(|_| self.body.as_bytes().to_vec())
    }

    /// Headers keyed by lower-cased name; the last value wins.
    pub fn header_map(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .map(|h| (h.key.to_ascii_lowercase(), h.value.clone()))
            .collect()
    }

    /// First header named `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    pub host: String,
    pub method: String,
    /// Path including the query string.
    pub path: String,
    pub common: Common,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Response {
    #[serde(alias = "status_code")]
    pub status_code: String,
    pub common: Common,
}

/// One request/response pair observed by an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Telemetry {
    #[serde(rename = "requestID", alias = "request_id")]
    pub request_id: String,
    pub scheme: String,
    #[serde(alias = "source_address")]
    pub source_address: String,
    #[serde(alias = "destination_address")]
    pub destination_address: String,
    #[serde(alias = "destination_namespace")]
    pub destination_namespace: String,
    pub request: Request,
    pub response: Response,
}

/// Split `path?query` at the first `?`.
pub fn path_and_query(full: &str) -> (&str, &str) {
    full.split_once('?').unwrap_or((full, ""))
}
