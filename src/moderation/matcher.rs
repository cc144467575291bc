//! Obfuscation-tolerant matcher compilation.
//!
//! Each blocklist term compiles to exactly one regex that also matches
//! leetspeak substitutions and punctuation/space insertion:
//!
//! - the term is NFKD-decomposed, stripped of combining marks, lowercased
//! - each alphanumeric character expands to a small class of common
//!   substitutions (a -> [a@4], s -> [s5$], ...)
//! - consecutive characters are joined by a glue of 0-2 non-alphanumeric
//!   separators, so "b a d" matches but "b   a   d" (3+ separators) does not
//!
//! Terms are admin-controlled but persisted, so compilation is defensive:
//! term length is capped and the regex size limit is set.

use regex::{Regex, RegexBuilder};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Longest accepted raw term, in characters post-normalization.
const MAX_TERM_CHARS: usize = 64;

/// Compiled-pattern size ceiling; generous for 64 chars of classes+glue.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Separator tolerance between term characters.
const GLUE: &str = "[^a-zA-Z0-9]{0,2}";

/// Matcher compilation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatcherError {
    #[error("term is empty after normalization")]
    EmptyTerm,
    #[error("term exceeds the length cap")]
    TermTooLong,
    #[error("pattern failed to compile: {0}")]
    Compile(String),
}

/// Leetspeak substitution class for a character, if it has one.
fn leet_class(ch: char) -> Option<&'static str> {
    match ch {
        'a' => Some("[a@4]"),
        'b' => Some("[b8]"),
        'e' => Some("[e3]"),
        'g' => Some("[g9]"),
        'i' => Some("[i1!|]"),
        'l' => Some("[l1|]"),
        'o' => Some("[o0]"),
        's' => Some("[s5$]"),
        't' => Some("[t7]"),
        'z' => Some("[z2]"),
        _ => None,
    }
}

/// NFKD-decompose, drop combining marks, lowercase.
fn fold(term: &str) -> String {
    term.nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(|ch| ch.to_lowercase())
        .collect()
}

/// Compile one raw term into its obfuscation-tolerant matcher.
pub fn compile(term: &str) -> Result<Regex, MatcherError> {
    let folded = fold(term.trim());
    if folded.is_empty() {
        return Err(MatcherError::EmptyTerm);
    }
    if folded.chars().count() > MAX_TERM_CHARS {
        return Err(MatcherError::TermTooLong);
    }

    let parts: Vec<String> = folded
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() {
                leet_class(ch)
                    .map(str::to_string)
                    .unwrap_or_else(|| regex::escape(&ch.to_string()))
            } else {
                regex::escape(&ch.to_string())
            }
        })
        .collect();

    RegexBuilder::new(&parts.join(GLUE))
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| MatcherError::Compile(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_match() {
        let rx = compile("badword").unwrap();
        assert!(rx.is_match("badword"));
        assert!(rx.is_match("say badword now"));
    }

    #[test]
    fn test_leetspeak_variants() {
        let rx = compile("badword").unwrap();
        assert!(rx.is_match("b4dw0rd"));
        assert!(rx.is_match("B@DW0RD"));
        let rx = compile("test").unwrap();
        assert!(rx.is_match("7e$7"));
    }

    #[test]
    fn test_separator_gap_limit() {
        let rx = compile("badword").unwrap();
        // 0-2 separators between characters match.
        assert!(rx.is_match("bad word"));
        assert!(rx.is_match("b.a.d.w.o.r.d"));
        assert!(rx.is_match("bad  word"));
        // 3+ separators must not match.
        assert!(!rx.is_match("bad   word"));
        assert!(!rx.is_match("b---- adword"));
    }

    #[test]
    fn test_case_insensitive() {
        let rx = compile("Evil").unwrap();
        assert!(rx.is_match("EVIL"));
        assert!(rx.is_match("evil"));
    }

    #[test]
    fn test_diacritics_folded_in_term() {
        // Term with combining marks compiles to its base-letter form.
        let rx = compile("ba\u{0301}d").unwrap();
        assert!(rx.is_match("bad"));
    }

    #[test]
    fn test_defensive_caps() {
        assert_eq!(compile("   ").unwrap_err(), MatcherError::EmptyTerm);
        let long: String = "a".repeat(MAX_TERM_CHARS + 1);
        assert_eq!(compile(&long).unwrap_err(), MatcherError::TermTooLong);
    }
}
