//! Helpers shared by the analyzers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use super::{AnalyzerError, Result};

/// Path parameters of `path` under the spec `template`.
///
/// Segments are compared positionally; `{name}` segments of the template
/// capture the matching request segment. Mismatched segment counts yield
/// whatever aligned.
pub fn path_params(template: &str, path: &str) -> HashMap<String, String> {
    template
        .split('/')
        .zip(path.split('/'))
        .filter(|(spec, op)| spec != op)
        .filter_map(|(spec, op)| {
            spec.strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .map(|name| (name.to_string(), op.to_string()))
        })
        .collect()
}

/// Whole-word dictionary matcher.
pub struct WordMatcher {
    automaton: Option<AhoCorasick>,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

impl WordMatcher {
    pub fn new(words: &[String], case_insensitive: bool) -> Result<Self> {
        let words: Vec<&str> = words
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return Ok(Self { automaton: None });
        }
        let automaton = AhoCorasickBuilder::new()
            .ascii_case_insensitive(case_insensitive)
            .match_kind(MatchKind::LeftmostLongest)
            .build(words)
            .map_err(|e| AnalyzerError::Dictionary(e.to_string()))?;
        Ok(Self {
            automaton: Some(automaton),
        })
    }

    /// True when a dictionary word occurs in `text` bounded by non-word
    /// characters or the ends of `text`.
    pub fn matches(&self, text: &str) -> bool {
        let Some(automaton) = &self.automaton else {
            return false;
        };
        automaton.find_iter(text).any(|m| {
            let before = text[..m.start()].chars().next_back();
            let after = text[m.end()..].chars().next();
            !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
        })
    }
}

/// Regular files below `root`, sorted. A missing directory yields nothing.
pub fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(t) if t.is_dir() => pending.push(path),
                Ok(t) if t.is_file() => files.push(path),
                _ => {}
            }
        }
    }
    files.sort();
    files
}

/// Non-empty lines of every file.
pub fn read_dictionary_files(files: &[PathBuf]) -> Result<Vec<String>> {
    let mut words = Vec::new();
    for file in files {
        let content = std::fs::read_to_string(file).map_err(|e| {
            AnalyzerError::Dictionary(format!("unable to read dictionary file {}: {e}", file.display()))
        })?;
        words.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
    }
    Ok(words)
}
