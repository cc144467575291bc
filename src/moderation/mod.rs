//! Text moderation ahead of speech synthesis.
//!
//! Three passes in a fixed order: URLs are replaced with a spoken
//! placeholder, emoji are stripped, then blocklisted terms are censored
//! with obfuscation-tolerant matchers. Each pass is individually
//! switchable in config.

pub mod blocklist;
pub mod emoji;
pub mod matcher;

use crate::config::ModerationConfig;
use crate::error::{Error, Result};
use blocklist::{Blocklist, BlocklistError};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// What a term match turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CensorMode {
    /// Keep first and last character, asterisk the middle.
    Mask,
    /// Remove the match entirely and collapse the surrounding whitespace.
    Drop,
}

impl CensorMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mask" => Some(Self::Mask),
            "drop" => Some(Self::Drop),
            _ => None,
        }
    }
}

/// Counts of what each pass changed, reported back to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModFlags {
    pub urls: usize,
    pub emojis: usize,
    pub terms: usize,
}

impl ModFlags {
    pub fn any(&self) -> bool {
        self.urls > 0 || self.emojis > 0 || self.terms > 0
    }
}

static URL_RX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").unwrap());

/// Spoken stand-in for a removed URL.
const LINK_PLACEHOLDER: &str = "[link]";

/// Moderation pipeline over a shared blocklist.
pub struct Moderator {
    enabled: bool,
    strip_urls: bool,
    strip_emojis: bool,
    blocklist: Option<Blocklist>,
}

impl Moderator {
    pub fn new(cfg: &ModerationConfig) -> std::io::Result<Self> {
        let blocklist = match (&cfg.blocklist_path, cfg.enabled && cfg.censor_terms) {
            (Some(path), true) => Some(Blocklist::open(path)?),
            _ => None,
        };
        Ok(Self {
            enabled: cfg.enabled,
            strip_urls: cfg.strip_urls,
            strip_emojis: cfg.strip_emojis,
            blocklist,
        })
    }

    /// Whether the engine is on at all.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Run all enabled passes over `text`.
    pub fn filter(&self, text: &str, mode: CensorMode) -> (String, ModFlags) {
        let mut flags = ModFlags::default();
        if !self.enabled {
            return (text.to_string(), flags);
        }
        let mut out = text.to_string();

        if self.strip_urls {
            let mut count = 0;
            out = URL_RX
                .replace_all(&out, |_: &regex::Captures| {
                    count += 1;
                    LINK_PLACEHOLDER.to_string()
                })
                .into_owned();
            flags.urls = count;
        }

        if self.strip_emojis {
            let (cleaned, removed) = emoji::strip(&out);
            out = cleaned;
            flags.emojis = removed;
        }

        if let Some(bl) = &self.blocklist {
            let (censored, hits) = censor(bl, &out, mode);
            out = censored;
            flags.terms = hits;
        }

        if flags.any() {
            debug!(
                urls = flags.urls,
                emojis = flags.emojis,
                terms = flags.terms,
                "moderation altered text"
            );
        }
        (normalize_whitespace(&out), flags)
    }

    /// Terms currently in the blocklist; `ModerationDisabled` if censoring
    /// is turned off.
    pub fn list_terms(&self) -> Result<Vec<String>> {
        Ok(self.require_blocklist()?.list())
    }

    /// Add a blocklist term; false means it was already present.
    pub fn add_term(&self, term: &str) -> Result<bool> {
        self.require_blocklist()?
            .add(term)
            .map_err(blocklist_error)
    }

    /// Remove a blocklist term; false means it wasn't there.
    pub fn remove_term(&self, term: &str) -> Result<bool> {
        self.require_blocklist()?
            .remove(term)
            .map_err(blocklist_error)
    }

    /// Force a reload from disk, returning the term count.
    pub fn reload_terms(&self) -> Result<usize> {
        Ok(self.require_blocklist()?.reload()?)
    }

    fn require_blocklist(&self) -> Result<&Blocklist> {
        self.blocklist.as_ref().ok_or(Error::ModerationDisabled)
    }
}

fn blocklist_error(e: BlocklistError) -> Error {
    match e {
        BlocklistError::Term(t) => Error::BadRequest(t.to_string()),
        BlocklistError::Io(io) => Error::Io(io),
    }
}

fn censor(bl: &Blocklist, text: &str, mode: CensorMode) -> (String, usize) {
    bl.with_matchers(|matchers| {
        let mut out = text.to_string();
        let mut hits = 0;
        for rx in matchers {
            out = rx
                .replace_all(&out, |caps: &regex::Captures| {
                    hits += 1;
                    match mode {
                        CensorMode::Mask => mask_token(&caps[0]),
                        CensorMode::Drop => String::new(),
                    }
                })
                .into_owned();
        }
        (out, hits)
    })
}

/// Asterisk the middle of a matched token, keeping the first and last
/// character. Matches of two characters or fewer are fully masked.
fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 2 {
        return "*".repeat(chars.len());
    }
    let mut masked = String::with_capacity(token.len());
    masked.push(chars[0]);
    for _ in 1..chars.len() - 1 {
        masked.push('*');
    }
    masked.push(chars[chars.len() - 1]);
    masked
}

/// Collapse whitespace runs left behind by drop-mode censoring.
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModerationConfig;

    fn moderator(dir: &tempfile::TempDir, terms: &str) -> Moderator {
        let path = dir.path().join("blocklist.txt");
        std::fs::write(&path, terms).unwrap();
        let cfg = ModerationConfig {
            enabled: true,
            strip_urls: true,
            strip_emojis: true,
            censor_terms: true,
            blocklist_path: Some(path.to_string_lossy().into_owned()),
        };
        Moderator::new(&cfg).unwrap()
    }

    #[test]
    fn test_url_replaced_with_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(&dir, "");
        let (out, flags) = m.filter("see https://example.com/x?y=1 now", CensorMode::Mask);
        assert_eq!(out, "see [link] now");
        assert_eq!(flags.urls, 1);
    }

    #[test]
    fn test_www_counts_as_url() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(&dir, "");
        let (out, flags) = m.filter("www.example.com is it", CensorMode::Mask);
        assert_eq!(out, "[link] is it");
        assert_eq!(flags.urls, 1);
    }

    #[test]
    fn test_mask_keeps_edges() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(&dir, "badword\n");
        let (out, flags) = m.filter("you badword!", CensorMode::Mask);
        assert_eq!(out, "you b*****d!");
        assert_eq!(flags.terms, 1);
    }

    #[test]
    fn test_drop_collapses_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(&dir, "badword\n");
        let (out, flags) = m.filter("you badword friend", CensorMode::Drop);
        assert_eq!(out, "you friend");
        assert_eq!(flags.terms, 1);
    }

    #[test]
    fn test_leetspeak_censored() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(&dir, "badword\n");
        let (out, flags) = m.filter("b4dw0rd here", CensorMode::Mask);
        assert_eq!(out, "b*****d here");
        assert_eq!(flags.terms, 1);
    }

    #[test]
    fn test_wide_gaps_not_censored() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(&dir, "badword\n");
        let (out, flags) = m.filter("bad   word", CensorMode::Mask);
        assert_eq!(out, "bad word");
        assert_eq!(flags.terms, 0);
    }

    #[test]
    fn test_emoji_stripped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(&dir, "");
        let (out, flags) = m.filter("hi \u{1F600}\u{1F680} there", CensorMode::Mask);
        assert_eq!(out, "hi there");
        assert_eq!(flags.emojis, 2);
    }

    #[test]
    fn test_disabled_term_ops_error() {
        let cfg = ModerationConfig::default();
        let m = Moderator::new(&cfg).unwrap();
        assert!(matches!(m.list_terms(), Err(Error::ModerationDisabled)));
        assert!(matches!(m.add_term("x"), Err(Error::ModerationDisabled)));

        let (out, flags) = m.filter("https://x.example \u{1F600}", CensorMode::Mask);
        assert_eq!(out, "https://x.example \u{1F600}");
        assert!(!flags.any());
    }

    #[test]
    fn test_passes_compose() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(&dir, "evil\n");
        let (out, flags) = m.filter(
            "\u{1F608} evil plan at https://evil.example",
            CensorMode::Mask,
        );
        assert_eq!(out, "e**l plan at [link]");
        assert!(flags.urls == 1 && flags.emojis == 1 && flags.terms >= 1);
    }
}
