//! Basic authentication credential checks.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::findings::{Finding, KnownPassword, SamePassword, ShortPassword};
use super::utils::WordMatcher;
use super::Result;
use crate::pipeline::Telemetry;

/// Passwords this long or shorter are reported.
pub const SHORT_PASSWORD_LEN: usize = 8;

/// `(user, password)` of an `Authorization: Basic` header.
fn basic_auth_credentials(telemetry: &Telemetry) -> Option<(String, String)> {
    let value = telemetry.request.common.header("authorization")?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme != "Basic" || token.contains(' ') {
        return None;
    }
    let decoded = STANDARD.decode(token).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let mut parts = decoded.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(user), Some(password), None) => Some((user.to_string(), password.to_string())),
        _ => None,
    }
}

pub struct WeakBasicAuth {
    short_password_len: usize,
    known_passwords: WordMatcher,
    /// (user, password) to the hosts it was presented to.
    used_credentials: Mutex<HashMap<(String, String), BTreeSet<String>>>,
}

impl WeakBasicAuth {
    pub fn new(known_passwords: &[String]) -> Result<Self> {
        Ok(Self {
            short_password_len: SHORT_PASSWORD_LEN,
            known_passwords: WordMatcher::new(known_passwords, false)?,
            used_credentials: Mutex::new(HashMap::new()),
        })
    }

    pub fn analyze(&self, telemetry: &Telemetry) -> Vec<Finding> {
        let Some((user, password)) = basic_auth_credentials(telemetry) else {
            return Vec::new();
        };

        let mut findings = Vec::new();
        let length = password.chars().count();
        if length <= self.short_password_len {
            findings.push(Finding::ShortPassword(ShortPassword {
                password: password.clone(),
                length,
                min_size: self.short_password_len,
            }));
        }
        if self.known_passwords.matches(&password) {
            findings.push(Finding::KnownPassword(KnownPassword {
                password: password.clone(),
            }));
        }
        if let Some(apis) = self.record_credentials(&telemetry.request.host, &user, &password) {
            findings.push(Finding::SamePassword(SamePassword {
                user,
                password,
                apis,
            }));
        }
        findings
    }

    /// Remember that `api` saw these credentials. Returns every API using
    /// them when `api` is new to an already known pair.
    fn record_credentials(&self, api: &str, user: &str, password: &str) -> Option<Vec<String>> {
        let mut used = self
            .used_credentials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let apis = used
            .entry((user.to_string(), password.to_string()))
            .or_default();
        let first_use = apis.is_empty();
        if !apis.insert(api.to_string()) || first_use {
            return None;
        }
        Some(apis.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::telemetry::Header;

    fn trace(host: &str, authorization: &str) -> Telemetry {
        let mut t = Telemetry::default();
        t.request.host = host.to_string();
        t.request.common.headers.push(Header {
            key: "Authorization".to_string(),
            value: authorization.to_string(),
        });
        t
    }

    fn basic(user_pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(user_pass))
    }

    #[test]
    fn test_short_and_known_password() {
        let analyzer = WeakBasicAuth::new(&["pass".to_string()]).unwrap();
        let findings = analyzer.analyze(&trace("svc", "Basic dXNlcjE6cGFzcw=="));
        assert_eq!(
            findings,
            vec![
                Finding::ShortPassword(ShortPassword {
                    password: "pass".to_string(),
                    length: 4,
                    min_size: 8,
                }),
                Finding::KnownPassword(KnownPassword {
                    password: "pass".to_string()
                }),
            ]
        );
    }

    #[test]
    fn test_strong_password_is_clean() {
        let analyzer = WeakBasicAuth::new(&["pass".to_string()]).unwrap();
        assert!(analyzer
            .analyze(&trace("svc", &basic("user:correct-horse-battery")))
            .is_empty());
    }

    #[test]
    fn test_same_credentials_on_other_api() {
        let analyzer = WeakBasicAuth::new(&[]).unwrap();
        let creds = basic("user:a-long-password");
        assert!(analyzer.analyze(&trace("b.svc", &creds)).is_empty());
        assert!(analyzer.analyze(&trace("b.svc", &creds)).is_empty());

        let findings = analyzer.analyze(&trace("a.svc", &creds));
        assert_eq!(
            findings,
            vec![Finding::SamePassword(SamePassword {
                user: "user".to_string(),
                password: "a-long-password".to_string(),
                apis: vec!["a.svc".to_string(), "b.svc".to_string()],
            })]
        );
        assert!(analyzer.analyze(&trace("a.svc", &creds)).is_empty());
    }

    #[test]
    fn test_ignores_other_schemes() {
        let analyzer = WeakBasicAuth::new(&[]).unwrap();
        assert!(analyzer.analyze(&trace("svc", "Bearer abc")).is_empty());
        assert!(analyzer.analyze(&trace("svc", "Basic !!!")).is_empty());
        assert!(analyzer.analyze(&trace("svc", &basic("no-colon"))).is_empty());
    }
}
