//! Per-event alert annotations.

use serde::{Deserialize, Serialize};

use super::Annotation;
use crate::storage::ALERT_ANNOTATION;

/// Highest severity a module raised on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    #[serde(rename = "ALERT_INFO")]
    Info,
    #[serde(rename = "ALERT_WARN")]
    Warn,
    #[serde(rename = "ALERT_CRITICAL")]
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "ALERT_INFO",
            AlertSeverity::Warn => "ALERT_WARN",
            AlertSeverity::Critical => "ALERT_CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALERT_INFO" => Some(AlertSeverity::Info),
            "ALERT_WARN" => Some(AlertSeverity::Warn),
            "ALERT_CRITICAL" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }

    /// The `ALERT` annotation carrying this severity.
    pub fn annotation(self) -> Annotation {
        Annotation {
            name: ALERT_ANNOTATION.to_string(),
            annotation: self.as_str().as_bytes().to_vec(),
        }
    }

    /// Severity stored in an `ALERT` annotation.
    pub fn from_annotation(annotation: &Annotation) -> Option<Self> {
        if annotation.name != ALERT_ANNOTATION {
            return None;
        }
        std::str::from_utf8(&annotation.annotation)
            .ok()
            .and_then(Self::parse)
    }
}
