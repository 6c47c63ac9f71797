// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shell-style glob patterns used for listing and for policy rules.
//!
//! `*` matches any run of characters (including `/`), `?` matches exactly one
//! character and everything else is literal. A run of several `*` means the
//! same as a single one. Brackets are literal too: they are rewritten into
//! single-character classes before the pattern reaches the `glob` crate.
//! Matching is case-sensitive and anchored at both ends.

use crate::error::{KmsError, KmsResult};

/// Pattern meaning "everything".
pub const MATCH_ALL: &str = "*";

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    compiled: glob::Pattern,
}

impl Pattern {
    /// Compile a pattern. The empty pattern is treated as [`MATCH_ALL`].
    pub fn new(raw: &str) -> KmsResult<Self> {
        let raw = collapse_stars(if raw.is_empty() { MATCH_ALL } else { raw });
        let compiled = glob::Pattern::new(&escape_brackets(&raw))
            .map_err(|e| KmsError::invalid(format!("malformed pattern {raw:?}: {}", e.msg)))?;
        Ok(Self { raw, compiled })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.compiled.matches(name)
    }

    /// Literal text every matching name starts with.
    pub fn literal_prefix(&self) -> &str {
        match self.raw.find(['*', '?']) {
            Some(end) => &self.raw[..end],
            None => &self.raw,
        }
    }
}

/// Whether `name` contains a character with glob meaning.
pub fn has_metacharacters(name: &str) -> bool {
    name.contains(['*', '?', '[', ']'])
}

/// `glob` gives `**` a recursive-directory meaning; plain shell globs don't.
fn collapse_stars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == '*' && out.ends_with('*') {
            continue;
        }
        out.push(ch);
    }
    out
}

fn escape_brackets(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '[' => out.push_str("[[]"),
            ']' => out.push_str("[]]"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run() {
        let p = Pattern::new("obj/*").unwrap();
        assert!(p.matches("obj/public"));
        assert!(p.matches("obj/"));
        assert!(p.matches("obj/a/b"));
        assert!(!p.matches("other/x"));
    }

    #[test]
    fn question_mark_matches_one_character() {
        let p = Pattern::new("key-?").unwrap();
        assert!(p.matches("key-1"));
        assert!(!p.matches("key-"));
        assert!(!p.matches("key-12"));
    }

    #[test]
    fn matching_is_anchored() {
        let p = Pattern::new("a").unwrap();
        assert!(p.matches("a"));
        assert!(!p.matches("ab"));
        assert!(!p.matches("ba"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let p = Pattern::new("Key*").unwrap();
        assert!(p.matches("Key-1"));
        assert!(!p.matches("key-1"));
    }

    #[test]
    fn brackets_are_literal() {
        let p = Pattern::new("a[1]").unwrap();
        assert!(p.matches("a[1]"));
        assert!(!p.matches("a1"));
    }

    #[test]
    fn empty_pattern_matches_everything() {
        let p = Pattern::new("").unwrap();
        assert_eq!(p.literal_prefix(), "");
        assert!(p.matches("anything/at/all"));
        assert!(p.matches(""));
    }

    #[test]
    fn repeated_stars_act_as_one() {
        let p = Pattern::new("a**b").unwrap();
        assert!(p.matches("ab"));
        assert!(p.matches("a/x/b"));
        assert!(!p.matches("a/x/c"));

        let p = Pattern::new("/v1/key/get/app**").unwrap();
        assert!(p.matches("/v1/key/get/app-key"));
    }

    #[test]
    fn double_star_component_needs_a_middle_segment() {
        let p = Pattern::new("a/**/b").unwrap();
        assert!(p.matches("a/x/b"));
        assert!(p.matches("a/x/y/b"));
        assert!(!p.matches("a/b"));
    }

    #[test]
    fn literal_prefix_stops_at_first_wildcard() {
        assert_eq!(Pattern::new("enclaves/a/keys/*").unwrap().literal_prefix(), "enclaves/a/keys/");
        assert_eq!(Pattern::new("key-?").unwrap().literal_prefix(), "key-");
        assert_eq!(Pattern::new("a[1]").unwrap().literal_prefix(), "a[1]");
    }

    #[test]
    fn detects_metacharacters() {
        assert!(has_metacharacters("a*"));
        assert!(has_metacharacters("a?"));
        assert!(has_metacharacters("[a]"));
        assert!(!has_metacharacters("my-key.v2"));
    }
}
