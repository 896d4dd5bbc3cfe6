//! Host, address and content-type helpers for incoming traces.

use url::Url;

use super::telemetry::Common;
use super::{PipelineError, Result};

/// Hostname without scheme or port: `https://example.org:8000` → `example.org`.
pub fn hostname(host: &str) -> Result<String> {
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };
    let parsed = Url::parse(&with_scheme)
        .map_err(|e| PipelineError::HostMalformed(format!("{host}: {e}")))?;
    match parsed.host_str() {
        Some(name) if !name.is_empty() => Ok(name.trim_matches(|c| c == '[' || c == ']').to_string()),
        _ => Err(PipelineError::HostMalformed(format!("{host}: hostname is empty"))),
    }
}

/// IP and port of an `ip:port` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    pub ip: String,
    pub port: String,
}

impl AddressInfo {
    pub fn parse(address: &str) -> Result<Self> {
        let (ip, port) = address
            .rsplit_once(':')
            .ok_or_else(|| PipelineError::AddressMalformed(address.to_string()))?;
        let ip = ip.trim_matches(|c| c == '[' || c == ']');
        if ip.is_empty() {
            return Err(PipelineError::AddressMalformed(address.to_string()));
        }
        Ok(Self {
            ip: ip.to_string(),
            port: port.to_string(),
        })
    }

    pub fn port_number(&self) -> Result<i64> {
        self.port
            .parse()
            .map_err(|_| PipelineError::AddressMalformed(format!("port '{}'", self.port)))
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(
                    b,
                    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/'
                        | b'[' | b']' | b'?' | b'='
                )
        })
}

/// Lower-cased media type of a `Content-Type` value, `None` when malformed.
pub fn parse_media_type(value: &str) -> Option<String> {
    let mut parts = value.split(';');
    let media_type = parts.next()?.trim().to_ascii_lowercase();

    match media_type.split_once('/') {
        Some((kind, subtype)) if is_token(kind) && is_token(subtype) => {}
        None if is_token(&media_type) => {}
        _ => return None,
    }

    for param in parts {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let (key, _) = param.split_once('=')?;
        if !is_token(key.trim()) {
            return None;
        }
    }
    Some(media_type)
}

/// `application/json` and `application/*+json`.
pub fn is_json_media_type(media_type: &str) -> bool {
    media_type == "application/json"
        || (media_type.starts_with("application/") && media_type.ends_with("+json"))
}

/// A response without a content type counts as an API response; one with an
/// unparseable or non-JSON type does not.
pub fn is_non_api(response: &Common) -> bool {
    let Some(content_type) = response.header("content-type") else {
        return false;
    };
    match parse_media_type(content_type) {
        Some(media_type) => !is_json_media_type(&media_type),
        None => {
            tracing::warn!(content_type, "unparseable response media type, classifying as non-API");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::telemetry::Header;

    #[test]
    fn test_hostname() {
        assert_eq!(hostname("https://example.org:8000").unwrap(), "example.org");
        assert_eq!(hostname("svc.cluster.local:8080").unwrap(), "svc.cluster.local");
        assert_eq!(hostname("svc").unwrap(), "svc");
        assert!(hostname("").is_err());
        assert!(hostname("http://:80").is_err());
    }

    #[test]
    fn test_address_info() {
        let info = AddressInfo::parse("10.0.0.5:8080").unwrap();
        assert_eq!(info.ip, "10.0.0.5");
        assert_eq!(info.port_number().unwrap(), 8080);
        assert!(AddressInfo::parse("10.0.0.5").is_err());
        assert!(AddressInfo::parse("10.0.0.5:http").unwrap().port_number().is_err());
        assert_eq!(AddressInfo::parse("[::1]:80").unwrap().ip, "::1");
    }

    #[test]
    fn test_media_types() {
        assert_eq!(
            parse_media_type("Application/JSON; charset=utf-8").as_deref(),
            Some("application/json")
        );
        assert!(parse_media_type("").is_none());
        assert!(parse_media_type("text/").is_none());
        assert!(parse_media_type("text/html; charset").is_none());
        assert!(is_json_media_type("application/problem+json"));
        assert!(!is_json_media_type("text/html"));
    }

    #[test]
    fn test_is_non_api() {
        let with = |value: &str| Common {
            headers: vec![Header {
                key: "Content-Type".to_string(),
                value: value.to_string(),
            }],
            ..Common::default()
        };
        assert!(!is_non_api(&Common::default()));
        assert!(!is_non_api(&with("application/json")));
        assert!(is_non_api(&with("text/html")));
        assert!(is_non_api(&with("/")));
    }
}
