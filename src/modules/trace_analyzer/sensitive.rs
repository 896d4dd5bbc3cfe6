//! Regular-expression rules for sensitive content.
//!
//! Rule files are YAML lists:
//!
//! ```yaml
//! - id: credit-card
//!   description: Credit card number
//!   regex: '\b4[0-9]{12}(?:[0-9]{3})?\b'
//!   searchIn: [RequestBody, ResponseBody]
//! ```

use std::path::PathBuf;

use regex::bytes::Regex;
use serde::Deserialize;

use super::findings::{Finding, RegexpMatching, RuleMatch};
use super::{AnalyzerError, Result};
use crate::pipeline::telemetry::Header;
use crate::pipeline::Telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SearchIn {
    RequestHeaders,
    ResponseHeaders,
    RequestBody,
    ResponseBody,
}

impl SearchIn {
    fn as_str(&self) -> &'static str {
        match self {
            SearchIn::RequestHeaders => "RequestHeaders",
            SearchIn::ResponseHeaders => "ResponseHeaders",
            SearchIn::RequestBody => "RequestBody",
            SearchIn::ResponseBody => "ResponseBody",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleSpec {
    id: String,
    #[serde(default)]
    description: String,
    regex: String,
    search_in: Vec<SearchIn>,
}

#[derive(Debug)]
pub struct Rule {
    pub id: String,
    pub description: String,
    pub search_in: Vec<SearchIn>,
    regex: Regex,
}

impl Rule {
    fn matches_headers(&self, headers: &[Header]) -> bool {
        headers.iter().any(|h| {
            self.regex.is_match(h.key.as_bytes()) || self.regex.is_match(h.value.as_bytes())
        })
    }

    fn locations(&self, telemetry: &Telemetry, request_body: &[u8], response_body: &[u8]) -> Vec<String> {
        self.search_in
            .iter()
            .filter(|location| match location {
                SearchIn::RequestHeaders => self.matches_headers(&telemetry.request.common.headers),
                SearchIn::ResponseHeaders => {
                    self.matches_headers(&telemetry.response.common.headers)
                }
                SearchIn::RequestBody => self.regex.is_match(request_body),
                SearchIn::ResponseBody => self.regex.is_match(response_body),
            })
            .map(|location| location.as_str().to_string())
            .collect()
    }
}

/// Parse one rule file.
pub fn parse_rules(source: &str, content: &str) -> Result<Vec<Rule>> {
    let specs: Vec<RuleSpec> = serde_yaml::from_str(content).map_err(|e| {
        AnalyzerError::InvalidRules(format!("rule file '{source}' is not a valid yaml file: {e}"))
    })?;
    specs
        .into_iter()
        .map(|spec| {
            let regex = Regex::new(&spec.regex).map_err(|e| {
                AnalyzerError::InvalidRules(format!(
                    "in rule file '{source}', unable to compile regexp of rule '{}': {e}",
                    spec.id
                ))
            })?;
            Ok(Rule {
                id: spec.id,
                description: spec.description,
                search_in: spec.search_in,
                regex,
            })
        })
        .collect()
}

pub struct Sensitive {
    rules: Vec<Rule>,
}

impl Sensitive {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn from_files(files: &[PathBuf]) -> Result<Self> {
        let mut rules = Vec::new();
        for file in files {
            let content = std::fs::read_to_string(file).map_err(|e| {
                AnalyzerError::InvalidRules(format!("unable to open file '{}': {e}", file.display()))
            })?;
            rules.extend(parse_rules(&file.display().to_string(), &content)?);
        }
        Ok(Self::new(rules))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn analyze(&self, telemetry: &Telemetry) -> Vec<Finding> {
        if self.rules.is_empty() {
            return Vec::new();
        }
        let request_body = telemetry.request.common.body_bytes();
        let response_body = telemetry.response.common.body_bytes();

        let matches: Vec<RuleMatch> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let locations = rule.locations(telemetry, &request_body, &response_body);
                (!locations.is_empty()).then(|| RuleMatch {
                    rule_id: rule.id.clone(),
                    description: rule.description.clone(),
                    locations,
                })
            })
            .collect();

        if matches.is_empty() {
            Vec::new()
        } else {
            vec![Finding::RegexpMatching(RegexpMatching { matches })]
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    use super::*;

    const RULES: &str = r#"
- id: card
  description: Visa card number
  regex: '4[0-9]{15}'
  searchIn: [RequestBody, ResponseBody]
- id: secret-header
  description: Secret header
  regex: '(?i)x-secret'
  searchIn: [RequestHeaders]
"#;

    #[test]
    fn test_matching_locations() {
        let sensitive = Sensitive::new(parse_rules("inline", RULES).unwrap());
        assert_eq!(sensitive.rule_count(), 2);

        let mut t = Telemetry::default();
        t.response.common.body = STANDARD.encode(r#"{"card":"4111111111111111"}"#);
        t.request.common.headers.push(Header {
            key: "X-Secret".to_string(),
            value: "1".to_string(),
        });

        let findings = sensitive.analyze(&t);
        assert_eq!(
            findings,
            vec![Finding::RegexpMatching(RegexpMatching {
                matches: vec![
                    RuleMatch {
                        rule_id: "card".to_string(),
                        description: "Visa card number".to_string(),
                        locations: vec!["ResponseBody".to_string()],
                    },
                    RuleMatch {
                        rule_id: "secret-header".to_string(),
                        description: "Secret header".to_string(),
                        locations: vec!["RequestHeaders".to_string()],
                    },
                ],
            })]
        );
    }

    #[test]
    fn test_no_match_no_finding() {
        let sensitive = Sensitive::new(parse_rules("inline", RULES).unwrap());
        assert!(sensitive.analyze(&Telemetry::default()).is_empty());
    }

    #[test]
    fn test_invalid_rules() {
        let bad_location = "- {id: a, regex: 'x', searchIn: [Cookies]}";
        assert!(matches!(
            parse_rules("f", bad_location),
            Err(AnalyzerError::InvalidRules(_))
        ));
        let bad_regex = "- {id: a, regex: '(', searchIn: [RequestBody]}";
        assert!(matches!(
            parse_rules("f", bad_regex),
            Err(AnalyzerError::InvalidRules(_))
        ));
    }
}
