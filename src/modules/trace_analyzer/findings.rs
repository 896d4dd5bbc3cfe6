//! Trace analyzer findings.
//!
//! An event finding is stored as an event annotation named by its code with
//! the variant's JSON body as payload. API findings aggregate event findings
//! per (spec path, method, code) and are stored one annotation per code.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AnalyzerError, Result};
use crate::modules::{AlertSeverity, Annotation};
use crate::notifier::ApiFinding;

pub const SHORT_PASSWORD: &str = "BASIC_AUTH_SHORT_PASSWORD";
pub const KNOWN_PASSWORD: &str = "BASIC_AUTH_KNOWN_PASSWORD";
pub const SAME_PASSWORD: &str = "BASIC_AUTH_SAME_PASSWORD";
pub const JWT_NO_ALG_FIELD: &str = "JWT_NO_ALG_FIELD";
pub const JWT_ALG_FIELD_NONE: &str = "JWT_ALG_FIELD_NONE";
pub const JWT_NOT_RECOMMENDED_ALG: &str = "JWT_NOT_RECOMMENDED_ALG";
pub const JWT_NO_EXPIRE_CLAIM: &str = "JWT_NO_EXPIRE_CLAIM";
pub const JWT_EXP_TOO_FAR: &str = "JWT_EXP_TOO_FAR";
pub const JWT_WEAK_SYMETRIC_SECRET: &str = "JWT_WEAK_SYMETRIC_SECRET";
pub const JWT_SENSITIVE_CONTENT_IN_HEADERS: &str = "JWT_SENSITIVE_CONTENT_IN_HEADERS";
pub const JWT_SENSITIVE_CONTENT_IN_CLAIMS: &str = "JWT_SENSITIVE_CONTENT_IN_CLAIMS";
pub const REGEXP_MATCHING: &str = "REGEXP_MATCHING";
pub const GUESSABLE_ID: &str = "GUESSABLE_ID";
pub const NLID: &str = "NLID";

const REDACTED_PASSWORD: &str = "XXX";
const REDACTED_VALUE: &str = "[redacted]";
const MAX_REDACTED_KEY_LEN: usize = 4;

/// Aggregated API findings expire after a day without updates.
pub const API_FINDING_TTL: chrono::Duration = chrono::Duration::hours(24);

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn alert(self) -> AlertSeverity {
        match self {
            Severity::Info | Severity::Low => AlertSeverity::Info,
            Severity::Medium | Severity::High => AlertSeverity::Warn,
            Severity::Critical => AlertSeverity::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortPassword {
    pub password: String,
    pub length: usize,
    pub min_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownPassword {
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamePassword {
    pub user: String,
    pub password: String,
    pub apis: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotRecommendedAlg {
    pub algorithm: String,
    pub recommended_algs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpTooFar {
    /// RFC3339 expiry.
    pub expire_at: String,
    /// Seconds until expiry when the token was seen.
    pub expire_in: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeakSymmetricSecret {
    pub weak_key: String,
    pub weak_key_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveWords {
    pub sensitive_words: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule_id: String,
    pub description: String,
    /// `RequestHeaders`, `ResponseHeaders`, `RequestBody`, `ResponseBody`.
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexpMatching {
    pub matches: Vec<RuleMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuessableReason {
    pub distance: f32,
    pub distance_threshold: f32,
    pub compression_ratio: f32,
    pub compression_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuessableParameter {
    pub name: String,
    pub value: String,
    pub reason: GuessableReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuessableId {
    pub spec_location: String,
    pub parameters: Vec<GuessableParameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NlidParameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nlid {
    pub spec_location: String,
    pub parameters: Vec<NlidParameter>,
}

/// Human-readable projection of a finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingDescription {
    pub short_desc: String,
    pub detailed_desc: String,
    pub severity: Severity,
    pub alert: AlertSeverity,
}

/// One per-event finding.
#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    ShortPassword(ShortPassword),
    KnownPassword(KnownPassword),
    SamePassword(SamePassword),
    NoAlgField,
    AlgFieldNone,
    NotRecommendedAlg(NotRecommendedAlg),
    NoExpireClaim,
    ExpTooFar(ExpTooFar),
    WeakSymmetricSecret(WeakSymmetricSecret),
    SensitiveInHeaders(SensitiveWords),
    SensitiveInClaims(SensitiveWords),
    RegexpMatching(RegexpMatching),
    GuessableId(GuessableId),
    Nlid(Nlid),
    /// An annotation this version does not know, kept verbatim.
    Unknown { code: String, payload: Vec<u8> },
}

fn redact_word(word: &str) -> String {
    let first: String = word.chars().take(1).collect();
    format!("{first}...[redacted]")
}

fn decode<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| AnalyzerError::Serialization(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| AnalyzerError::Serialization(e.to_string()))
}

impl Finding {
    pub fn code(&self) -> &str {
        match self {
            Finding::ShortPassword(_) => SHORT_PASSWORD,
            Finding::KnownPassword(_) => KNOWN_PASSWORD,
            Finding::SamePassword(_) => SAME_PASSWORD,
            Finding::NoAlgField => JWT_NO_ALG_FIELD,
            Finding::AlgFieldNone => JWT_ALG_FIELD_NONE,
            Finding::NotRecommendedAlg(_) => JWT_NOT_RECOMMENDED_ALG,
            Finding::NoExpireClaim => JWT_NO_EXPIRE_CLAIM,
            Finding::ExpTooFar(_) => JWT_EXP_TOO_FAR,
            Finding::WeakSymmetricSecret(_) => JWT_WEAK_SYMETRIC_SECRET,
            Finding::SensitiveInHeaders(_) => JWT_SENSITIVE_CONTENT_IN_HEADERS,
            Finding::SensitiveInClaims(_) => JWT_SENSITIVE_CONTENT_IN_CLAIMS,
            Finding::RegexpMatching(_) => REGEXP_MATCHING,
            Finding::GuessableId(_) => GUESSABLE_ID,
            Finding::Nlid(_) => NLID,
            Finding::Unknown { code, .. } => code,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Finding::NoAlgField | Finding::AlgFieldNone | Finding::NotRecommendedAlg(_) => {
                Severity::High
            }
            Finding::NoExpireClaim | Finding::ExpTooFar(_) => Severity::Low,
            Finding::GuessableId(_) | Finding::Nlid(_) | Finding::Unknown { .. } => Severity::Info,
            _ => Severity::Medium,
        }
    }

    /// JSON body of the variant.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        match self {
            Finding::ShortPassword(f) => encode(f),
            Finding::KnownPassword(f) => encode(f),
            Finding::SamePassword(f) => encode(f),
            Finding::NoAlgField | Finding::AlgFieldNone | Finding::NoExpireClaim => {
                Ok(b"{}".to_vec())
            }
            Finding::NotRecommendedAlg(f) => encode(f),
            Finding::ExpTooFar(f) => encode(f),
            Finding::WeakSymmetricSecret(f) => encode(f),
            Finding::SensitiveInHeaders(f) | Finding::SensitiveInClaims(f) => encode(f),
            Finding::RegexpMatching(f) => encode(f),
            Finding::GuessableId(f) => encode(f),
            Finding::Nlid(f) => encode(f),
            Finding::Unknown { payload, .. } => Ok(payload.clone()),
        }
    }

    pub fn deserialize(code: &str, payload: &[u8]) -> Result<Self> {
        Ok(match code {
            SHORT_PASSWORD => Finding::ShortPassword(decode(payload)?),
            KNOWN_PASSWORD => Finding::KnownPassword(decode(payload)?),
            SAME_PASSWORD => Finding::SamePassword(decode(payload)?),
            JWT_NO_ALG_FIELD => Finding::NoAlgField,
            JWT_ALG_FIELD_NONE => Finding::AlgFieldNone,
            JWT_NOT_RECOMMENDED_ALG => Finding::NotRecommendedAlg(decode(payload)?),
            JWT_NO_EXPIRE_CLAIM => Finding::NoExpireClaim,
            JWT_EXP_TOO_FAR => Finding::ExpTooFar(decode(payload)?),
            JWT_WEAK_SYMETRIC_SECRET => Finding::WeakSymmetricSecret(decode(payload)?),
            JWT_SENSITIVE_CONTENT_IN_HEADERS => Finding::SensitiveInHeaders(decode(payload)?),
            JWT_SENSITIVE_CONTENT_IN_CLAIMS => Finding::SensitiveInClaims(decode(payload)?),
            REGEXP_MATCHING => Finding::RegexpMatching(decode(payload)?),
            GUESSABLE_ID => Finding::GuessableId(decode(payload)?),
            NLID => Finding::Nlid(decode(payload)?),
            other => Finding::Unknown {
                code: other.to_string(),
                payload: payload.to_vec(),
            },
        })
    }

    pub fn to_annotation(&self) -> Result<Annotation> {
        Ok(Annotation {
            name: self.code().to_string(),
            annotation: self.serialize()?,
        })
    }

    pub fn from_annotation(annotation: &Annotation) -> Result<Self> {
        Self::deserialize(&annotation.name, &annotation.annotation)
    }

    /// The finding with secrets masked.
    pub fn redacted(&self) -> Self {
        match self {
            Finding::ShortPassword(f) => Finding::ShortPassword(ShortPassword {
                password: REDACTED_PASSWORD.to_string(),
                ..f.clone()
            }),
            Finding::KnownPassword(_) => Finding::KnownPassword(KnownPassword {
                password: REDACTED_PASSWORD.to_string(),
            }),
            Finding::SamePassword(f) => Finding::SamePassword(SamePassword {
                password: REDACTED_PASSWORD.to_string(),
                ..f.clone()
            }),
            Finding::WeakSymmetricSecret(f) => {
                let prefix: String = f.weak_key.chars().take(MAX_REDACTED_KEY_LEN).collect();
                Finding::WeakSymmetricSecret(WeakSymmetricSecret {
                    weak_key: format!("{prefix}... [redacted]"),
                    weak_key_len: f.weak_key_len,
                })
            }
            Finding::SensitiveInHeaders(f) => Finding::SensitiveInHeaders(SensitiveWords {
                sensitive_words: f.sensitive_words.iter().map(|w| redact_word(w)).collect(),
            }),
            Finding::SensitiveInClaims(f) => Finding::SensitiveInClaims(SensitiveWords {
                sensitive_words: f.sensitive_words.iter().map(|w| redact_word(w)).collect(),
            }),
            Finding::GuessableId(f) => {
                let mut redacted = f.clone();
                for p in &mut redacted.parameters {
                    p.value = REDACTED_VALUE.to_string();
                }
                Finding::GuessableId(redacted)
            }
            Finding::Nlid(f) => {
                let mut redacted = f.clone();
                for p in &mut redacted.parameters {
                    p.value = REDACTED_VALUE.to_string();
                }
                Finding::Nlid(redacted)
            }
            other => other.clone(),
        }
    }

    pub fn to_finding(&self) -> FindingDescription {
        let (short, detailed) = match self {
            Finding::ShortPassword(f) => (
                "Too short Basic Auth password".to_string(),
                format!("The length of Basic Auth password is too short ({})", f.length),
            ),
            Finding::KnownPassword(f) => (
                "Weak Basic Auth password (found in dictionary)".to_string(),
                format!("The Basic Auth password is too weak because it's too common ({})", f.password),
            ),
            Finding::SamePassword(f) => (
                "Same Basic Auth credentials used for another service".to_string(),
                format!(
                    "The exact same Basic Auth credentials ({}:{}) of this event are used for multiple services ({})",
                    f.user,
                    f.password,
                    f.apis.join(",")
                ),
            ),
            Finding::NoAlgField => (
                "JWT has no algorithm specified".to_string(),
                "The JOSE header of the JWT does not contain an 'alg' field".to_string(),
            ),
            Finding::AlgFieldNone => (
                "'alg' field set to None".to_string(),
                "The JOSE header of the JWT contains an 'alg' field but it's set to none".to_string(),
            ),
            Finding::NotRecommendedAlg(f) => (
                "Not a recommended JWT signing algorithm".to_string(),
                format!(
                    "'{}' is not a recommended signing algorithm (recommended are: {})",
                    f.algorithm,
                    f.recommended_algs.join(",")
                ),
            ),
            Finding::NoExpireClaim => (
                "JWT does not have any expire claims".to_string(),
                "JWT does not have any expire claims".to_string(),
            ),
            Finding::ExpTooFar(f) => {
                let days = f.expire_in / 86_400;
                let expire = if days > 2 {
                    format!("{days} days")
                } else {
                    format!("{}s", f.expire_in)
                };
                (
                    "JWT expire too far in the future".to_string(),
                    format!("The JWT expire in {expire}"),
                )
            }
            Finding::WeakSymmetricSecret(f) => (
                "JWT signed with a weak key".to_string(),
                format!(
                    "The weak signing key is {} bytes long and starts with '{}'",
                    f.weak_key_len,
                    f.weak_key.chars().take(20).collect::<String>()
                ),
            ),
            Finding::SensitiveInHeaders(f) => (
                "JWT headers may contain sensitive content".to_string(),
                format!(
                    "JWT are signed, not encrypted, hence sensitive information can be seen in clear by a potential attacker. Here, '{}' seems sensitive",
                    f.sensitive_words.join(",")
                ),
            ),
            Finding::SensitiveInClaims(f) => (
                "JWT claims may contain sensitive content".to_string(),
                format!(
                    "JWT are signed, not encrypted, hence sensitive information can be seen in clear by a potential attacker. Here, '{}' seems sensitive",
                    f.sensitive_words.join(",")
                ),
            ),
            Finding::RegexpMatching(f) => (
                "Matching regular expression".to_string(),
                format!(
                    "This event matches sensitive information (rules: {})",
                    f.matches
                        .iter()
                        .map(|m| m.rule_id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ),
            Finding::GuessableId(f) => (
                "Guessable identifier".to_string(),
                format!(
                    "In call '{}', parameter(s) '{}' seems to be guessable",
                    f.spec_location,
                    f.parameters
                        .iter()
                        .map(|p| p.name.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                ),
            ),
            Finding::Nlid(f) => (
                "NLID (Non learnt Identifier)".to_string(),
                format!(
                    "In call '{}', parameter(s) '{}' were used but not previously retrieved. Potential BOLA.",
                    f.spec_location,
                    f.parameters
                        .iter()
                        .map(|p| p.value.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                ),
            ),
            Finding::Unknown { code, payload } => {
                (code.clone(), String::from_utf8_lossy(payload).into_owned())
            }
        };
        FindingDescription {
            short_desc: short,
            detailed_desc: detailed,
            severity: self.severity(),
            alert: self.severity().alert(),
        }
    }

    /// What this finding contributes to its API finding's value set.
    fn aggregation_values(&self) -> Vec<String> {
        match self {
            Finding::SamePassword(f) => f.apis.clone(),
            Finding::RegexpMatching(f) => f.matches.iter().map(|m| m.rule_id.clone()).collect(),
            Finding::GuessableId(f) => f.parameters.iter().map(|p| p.name.clone()).collect(),
            Finding::Nlid(f) => f.parameters.iter().map(|p| p.name.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether this finding is aggregated at API level at all.
    pub fn aggregates(&self) -> bool {
        !matches!(self, Finding::Unknown { .. })
    }
}

/// Severity of the aggregated API finding for `code`.
pub fn api_severity(code: &str) -> Severity {
    match code {
        SHORT_PASSWORD | KNOWN_PASSWORD | SAME_PASSWORD => Severity::High,
        other => Finding::deserialize(other, b"{}")
            .map(|f| f.severity())
            .unwrap_or(Severity::Info),
    }
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// JSON pointer of an operation in a spec; empty when the path is unknown.
pub fn spec_location(path: &str, method: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let mut pointer = format!("/paths/{}", escape_pointer_token(path));
    if !method.is_empty() {
        pointer.push('/');
        pointer.push_str(&escape_pointer_token(&method.to_ascii_lowercase()));
    }
    pointer
}

/// Aggregated state of one (spec path, method, code).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiFindingEntry {
    pub path: String,
    pub method: String,
    pub code: String,
    /// Parameter names, rule ids or API hosts, depending on `code`.
    pub values: BTreeSet<String>,
    /// Body of the event finding that opened the entry.
    pub example: serde_json::Value,
    /// RFC3339 time of the last change.
    pub updated_at: String,
}

impl ApiFindingEntry {
    /// A fresh entry seeded from `finding`.
    pub fn new(path: &str, method: &str, finding: &Finding, now: DateTime<Utc>) -> Self {
        let example = finding
            .serialize()
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .unwrap_or(serde_json::Value::Null);
        Self {
            path: path.to_string(),
            method: method.to_string(),
            code: finding.code().to_string(),
            values: BTreeSet::new(),
            example,
            updated_at: now.to_rfc3339(),
        }
    }

    /// Merge `finding`; true when the entry changed.
    pub fn aggregate(&mut self, finding: &Finding, now: DateTime<Utc>) -> bool {
        let before = self.values.len();
        self.values.extend(finding.aggregation_values());
        let changed = self.values.len() != before;
        if changed {
            self.updated_at = now.to_rfc3339();
        }
        changed
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|t| now - t.with_timezone(&Utc) > API_FINDING_TTL)
            .unwrap_or(false)
    }

    fn example_finding(&self) -> Option<Finding> {
        let raw = serde_json::to_vec(&self.example).ok()?;
        Finding::deserialize(&self.code, &raw).ok()
    }

    /// Wire projection; secrets in the example are masked unless `sensitive`.
    pub fn to_api_finding(&self, source: &str, sensitive: bool) -> ApiFinding {
        let example = self.example_finding();
        let (name, description) = match &example {
            Some(f) => {
                let desc = f.to_finding();
                (desc.short_desc.clone(), api_description(&self.code, &desc))
            }
            None => (self.code.clone(), String::new()),
        };

        let mut info = serde_json::Map::new();
        if !self.values.is_empty() {
            info.insert(
                values_key(&self.code).to_string(),
                serde_json::Value::from(self.values.iter().cloned().collect::<Vec<_>>()),
            );
        }
        if let Some(f) = example {
            let shown = if sensitive { f } else { f.redacted() };
            if let Some(value) = shown
                .serialize()
                .ok()
                .and_then(|raw| serde_json::from_slice::<serde_json::Value>(&raw).ok())
            {
                info.insert("example".to_string(), value);
            }
        }

        let location = spec_location(&self.path, &self.method);
        ApiFinding {
            source: source.to_string(),
            finding_type: self.code.clone(),
            name,
            description,
            provided_spec_location: Some(location.clone()),
            reconstructed_spec_location: Some(location),
            severity: api_severity(&self.code).as_str().to_string(),
            additional_info: (!info.is_empty()).then_some(serde_json::Value::Object(info)),
        }
    }
}

fn values_key(code: &str) -> &'static str {
    match code {
        SAME_PASSWORD => "apis",
        REGEXP_MATCHING => "matching_rules",
        _ => "parameters",
    }
}

fn api_description(code: &str, desc: &FindingDescription) -> String {
    match code {
        GUESSABLE_ID => "Parameters of this operation seem to be guessable".to_string(),
        NLID => "Parameters were used but not previously retrieved. Potential BOLA".to_string(),
        REGEXP_MATCHING => "This operation carries sensitive information".to_string(),
        _ => desc.short_desc.clone(),
    }
}

/// Encode all entries of one code as an API annotation.
pub fn entries_to_annotation(code: &str, entries: &[ApiFindingEntry]) -> Result<Annotation> {
    Ok(Annotation {
        name: code.to_string(),
        annotation: encode(&entries)?,
    })
}

pub fn entries_from_annotation(annotation: &Annotation) -> Result<Vec<ApiFindingEntry>> {
    decode(&annotation.annotation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_findings() -> Vec<Finding> {
        vec![
            Finding::ShortPassword(ShortPassword {
                password: "hunter".to_string(),
                length: 6,
                min_size: 8,
            }),
            Finding::KnownPassword(KnownPassword {
                password: "letmein".to_string(),
            }),
            Finding::SamePassword(SamePassword {
                user: "bob".to_string(),
                password: "s3cr3tpass".to_string(),
                apis: vec!["a".to_string(), "b".to_string()],
            }),
            Finding::NoAlgField,
            Finding::AlgFieldNone,
            Finding::NotRecommendedAlg(NotRecommendedAlg {
                algorithm: "HS384".to_string(),
                recommended_algs: vec!["RS256".to_string()],
            }),
            Finding::NoExpireClaim,
            Finding::ExpTooFar(ExpTooFar {
                expire_at: "2030-01-01T00:00:00Z".to_string(),
                expire_in: 86_400 * 10,
            }),
            Finding::WeakSymmetricSecret(WeakSymmetricSecret {
                weak_key: "supersecret".to_string(),
                weak_key_len: 11,
            }),
            Finding::SensitiveInHeaders(SensitiveWords {
                sensitive_words: vec!["password".to_string()],
            }),
            Finding::SensitiveInClaims(SensitiveWords {
                sensitive_words: vec!["ssn".to_string()],
            }),
            Finding::RegexpMatching(RegexpMatching {
                matches: vec![RuleMatch {
                    rule_id: "card".to_string(),
                    description: "credit card".to_string(),
                    locations: vec!["ResponseBody".to_string()],
                }],
            }),
            Finding::GuessableId(GuessableId {
                spec_location: "/paths/~1pet~1{petId}/get".to_string(),
                parameters: vec![GuessableParameter {
                    name: "petId".to_string(),
                    value: "0000042".to_string(),
                    reason: GuessableReason {
                        distance: 0.9,
                        distance_threshold: 0.8,
                        compression_ratio: 2.5,
                        compression_threshold: 2.0,
                    },
                }],
            }),
            Finding::Nlid(Nlid {
                spec_location: "/paths/~1pet~1{petId}/get".to_string(),
                parameters: vec![NlidParameter {
                    name: "x-user-id".to_string(),
                    value: "u-98765432".to_string(),
                }],
            }),
        ]
    }

    /// Values that must never appear in a redacted payload.
    fn secrets(finding: &Finding) -> Vec<String> {
        match finding {
            Finding::ShortPassword(f) => vec![f.password.clone()],
            Finding::KnownPassword(f) => vec![f.password.clone()],
            Finding::SamePassword(f) => vec![f.password.clone()],
            Finding::WeakSymmetricSecret(f) => vec![f.weak_key.clone()],
            Finding::SensitiveInHeaders(f) | Finding::SensitiveInClaims(f) => {
                f.sensitive_words.clone()
            }
            Finding::GuessableId(f) => f.parameters.iter().map(|p| p.value.clone()).collect(),
            Finding::Nlid(f) => f.parameters.iter().map(|p| p.value.clone()).collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_annotation_round_trip() {
        for finding in all_findings() {
            let annotation = finding.to_annotation().unwrap();
            assert_eq!(annotation.name, finding.code());
            assert_eq!(Finding::from_annotation(&annotation).unwrap(), finding);
        }
    }

    #[test]
    fn test_redaction_hides_secrets() {
        for finding in all_findings() {
            let redacted = String::from_utf8(finding.redacted().serialize().unwrap()).unwrap();
            for secret in secrets(&finding) {
                assert!(
                    !redacted.contains(&secret),
                    "{} leaks {secret} in {redacted}",
                    finding.code()
                );
            }
        }
    }

    #[test]
    fn test_weak_key_redaction_keeps_prefix() {
        let finding = Finding::WeakSymmetricSecret(WeakSymmetricSecret {
            weak_key: "supersecret".to_string(),
            weak_key_len: 11,
        });
        match finding.redacted() {
            Finding::WeakSymmetricSecret(f) => {
                assert_eq!(f.weak_key, "supe... [redacted]");
                assert_eq!(f.weak_key_len, 11);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_severities_and_alerts() {
        assert_eq!(Finding::AlgFieldNone.severity(), Severity::High);
        assert_eq!(Finding::AlgFieldNone.to_finding().alert, AlertSeverity::Warn);
        assert_eq!(Finding::NoExpireClaim.to_finding().alert, AlertSeverity::Info);
        assert_eq!(api_severity(SHORT_PASSWORD), Severity::High);
        assert_eq!(api_severity(NLID), Severity::Info);
        assert_eq!(Severity::Critical.alert(), AlertSeverity::Critical);
    }

    #[test]
    fn test_unknown_annotation_is_kept() {
        let finding = Finding::deserialize("SOMETHING_NEW", b"raw").unwrap();
        assert_eq!(finding.code(), "SOMETHING_NEW");
        assert_eq!(finding.serialize().unwrap(), b"raw");
        assert!(!finding.aggregates());
    }

    #[test]
    fn test_spec_location() {
        assert_eq!(spec_location("/pet/{petId}", "GET"), "/paths/~1pet~1{petId}/get");
        assert_eq!(spec_location("", "GET"), "");
    }

    #[test]
    fn test_entry_aggregate_and_project() {
        let now = Utc::now();
        let findings = all_findings();
        let guessable = findings
            .iter()
            .find(|f| f.code() == GUESSABLE_ID)
            .unwrap();

        let mut entry = ApiFindingEntry::new("/pet/{petId}", "GET", guessable, now);
        assert!(entry.aggregate(guessable, now));
        assert!(!entry.aggregate(guessable, now));

        let redacted = entry.to_api_finding("traceanalyzer", false);
        assert_eq!(redacted.finding_type, GUESSABLE_ID);
        assert_eq!(redacted.severity, "INFO");
        let info = redacted.additional_info.unwrap();
        assert_eq!(info["parameters"][0], "petId");
        assert_eq!(info["example"]["parameters"][0]["value"], "[redacted]");

        let full = entry.to_api_finding("traceanalyzer", true);
        assert_eq!(
            full.additional_info.unwrap()["example"]["parameters"][0]["value"],
            "0000042"
        );
        assert!(!entry.is_expired(now + chrono::Duration::hours(23)));
        assert!(entry.is_expired(now + chrono::Duration::hours(25)));
    }
}
