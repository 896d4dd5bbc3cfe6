//! Bearer JWT checks.
//!
//! Tokens are decoded without verification; the only signature work done is
//! re-signing HS* tokens with dictionary keys.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::{Sha256, Sha384, Sha512};

use super::findings::{
    ExpTooFar, Finding, NotRecommendedAlg, SensitiveWords, WeakSymmetricSecret,
};
use super::utils::WordMatcher;
use super::Result;
use crate::pipeline::Telemetry;

/// Tokens expiring further out than this are reported.
pub const MAX_TOKEN_AGE: chrono::Duration = chrono::Duration::days(5);

pub const RECOMMENDED_ALGS: [&str; 3] = ["ES256", "RS256", "HS256"];

/// A JWT split into its decoded parts.
struct Jwt<'a> {
    header: Map<String, Value>,
    claims: Map<String, Value>,
    signing_input: &'a str,
    signature: &'a str,
}

fn decode_segment(segment: &str) -> Option<Map<String, Value>> {
    let raw = URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()?;
    match serde_json::from_slice(&raw).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn parse_jwt(token: &str) -> Option<Jwt<'_>> {
    let (signing_input, signature) = token.rsplit_once('.')?;
    let (header, claims) = signing_input.split_once('.')?;
    if claims.contains('.') {
        return None;
    }
    Some(Jwt {
        header: decode_segment(header)?,
        claims: decode_segment(claims)?,
        signing_input,
        signature,
    })
}

fn bearer_token(telemetry: &Telemetry) -> Option<&str> {
    let value = telemetry.request.common.header("authorization")?;
    let (scheme, token) = value.split_once(' ')?;
    (scheme == "Bearer" && !token.contains(' ')).then_some(token)
}

fn hmac_signature(alg: &str, key: &[u8], input: &str) -> Option<String> {
    fn sign<M: Mac + hmac::digest::KeyInit>(key: &[u8], input: &str) -> Option<String> {
        let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(key).ok()?;
        mac.update(input.as_bytes());
        Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }
    match alg {
        "HS256" => sign::<Hmac<Sha256>>(key, input),
        "HS384" => sign::<Hmac<Sha384>>(key, input),
        "HS512" => sign::<Hmac<Sha512>>(key, input),
        _ => None,
    }
}

fn number_as_secs(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))
}

pub struct WeakJwt {
    known_weak_keys: Vec<String>,
    sensitive_keywords: WordMatcher,
    max_token_age: chrono::Duration,
}

impl WeakJwt {
    pub fn new(weak_keys: &[String], sensitive_keywords: &[String]) -> Result<Self> {
        Ok(Self {
            known_weak_keys: weak_keys.to_vec(),
            sensitive_keywords: WordMatcher::new(sensitive_keywords, true)?,
            max_token_age: MAX_TOKEN_AGE,
        })
    }

    pub fn analyze(&self, telemetry: &Telemetry) -> Vec<Finding> {
        self.analyze_at(telemetry, Utc::now())
    }

    fn analyze_at(&self, telemetry: &Telemetry, now: DateTime<Utc>) -> Vec<Finding> {
        let Some(token) = bearer_token(telemetry) else {
            return Vec::new();
        };
        let Some(jwt) = parse_jwt(token) else {
            return Vec::new();
        };

        // Unsigned tokens get a single finding.
        let alg = match jwt.header.get("alg") {
            None => return vec![Finding::NoAlgField],
            Some(Value::String(alg)) if alg.eq_ignore_ascii_case("none") => {
                return vec![Finding::AlgFieldNone]
            }
            Some(Value::String(alg)) => alg.clone(),
            Some(_) => return vec![Finding::NoAlgField],
        };

        let mut findings = Vec::new();
        if !RECOMMENDED_ALGS.contains(&alg.as_str()) {
            findings.push(Finding::NotRecommendedAlg(NotRecommendedAlg {
                algorithm: alg.clone(),
                recommended_algs: RECOMMENDED_ALGS.iter().map(|a| a.to_string()).collect(),
            }));
        }
        findings.extend(self.analyze_expiry(&jwt.claims, now));
        findings.extend(self.analyze_signature(&alg, &jwt));
        findings.extend(self.analyze_sensitive(&jwt));
        findings
    }

    fn analyze_expiry(&self, claims: &Map<String, Value>, now: DateTime<Utc>) -> Option<Finding> {
        let exp = claims.get("exp");
        if exp.is_none() && !claims.contains_key("nbf") && !claims.contains_key("iat") {
            return Some(Finding::NoExpireClaim);
        }
        let expire_at = DateTime::from_timestamp(number_as_secs(exp?)?, 0)?;
        let expire_in = expire_at - now;
        (expire_in >= self.max_token_age).then(|| {
            Finding::ExpTooFar(ExpTooFar {
                expire_at: expire_at.to_rfc3339(),
                expire_in: expire_in.num_seconds(),
            })
        })
    }

    fn analyze_signature(&self, alg: &str, jwt: &Jwt<'_>) -> Option<Finding> {
        if !alg.starts_with("HS") {
            return None;
        }
        let signature = jwt.signature.trim_end_matches('=');
        self.known_weak_keys
            .iter()
            .find(|key| {
                hmac_signature(alg, key.as_bytes(), jwt.signing_input).as_deref() == Some(signature)
            })
            .map(|key| {
                Finding::WeakSymmetricSecret(WeakSymmetricSecret {
                    weak_key: key.clone(),
                    weak_key_len: key.len(),
                })
            })
    }

    fn analyze_sensitive(&self, jwt: &Jwt<'_>) -> Vec<Finding> {
        let sensitive = |map: &Map<String, Value>| -> Vec<String> {
            let mut words: Vec<String> = map
                .keys()
                .filter(|k| self.sensitive_keywords.matches(k))
                .cloned()
                .collect();
            words.sort();
            words
        };

        let mut findings = Vec::new();
        let in_headers = sensitive(&jwt.header);
        if !in_headers.is_empty() {
            findings.push(Finding::SensitiveInHeaders(SensitiveWords {
                sensitive_words: in_headers,
            }));
        }
        let in_claims = sensitive(&jwt.claims);
        if !in_claims.is_empty() {
            findings.push(Finding::SensitiveInClaims(SensitiveWords {
                sensitive_words: in_claims,
            }));
        }
        findings
    }
}
