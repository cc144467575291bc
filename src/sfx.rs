//! Sound-effect library and inline tag syntax.
//!
//! Sounds are audio files discovered by scanning the sounds directory
//! recursively; a sound's name is its lowercased file stem. Messages may
//! embed `[SFX: name]` tags which split the text into interleaved speech
//! and sound segments.

use crate::error::{Error, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// File extensions the scanner picks up.
const SOUND_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a"];

static SFX_TAG_RX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[SFX:\s*([^\]]+)\]").unwrap());

/// One segment of a tag-split message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SfxSegment {
    /// Speech text between tags, whitespace-trimmed, never empty.
    Text(String),
    /// A sound name from an `[SFX: name]` tag, trimmed and lowercased.
    Sound(String),
}

/// Split a message on `[SFX: name]` tags.
pub fn split_tags(text: &str) -> Vec<SfxSegment> {
    let mut segments = Vec::new();
    let mut last = 0;
    for caps in SFX_TAG_RX.captures_iter(text) {
        let whole = caps.get(0).expect("group 0 always present");
        let before = text[last..whole.start()].trim();
        if !before.is_empty() {
            segments.push(SfxSegment::Text(before.to_string()));
        }
        segments.push(SfxSegment::Sound(caps[1].trim().to_lowercase()));
        last = whole.end();
    }
    let rest = text[last..].trim();
    if !rest.is_empty() {
        segments.push(SfxSegment::Text(rest.to_string()));
    }
    segments
}

/// Scanned sound files plus the alias table.
pub struct SfxLibrary {
    dir: PathBuf,
    sounds: RwLock<BTreeMap<String, PathBuf>>,
    aliases: DashMap<String, String>,
}

impl SfxLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let sounds = scan(&dir);
        debug!(dir = %dir.display(), sounds = sounds.len(), "sound library loaded");
        Self {
            dir,
            sounds: RwLock::new(sounds),
            aliases: DashMap::new(),
        }
    }

    /// Rescan the sounds directory. Returns the new sound count.
    pub fn reload(&self) -> usize {
        let sounds = scan(&self.dir);
        let count = sounds.len();
        *self.sounds.write() = sounds;
        debug!(sounds = count, "sound library reloaded");
        count
    }

    /// All sound names, sorted.
    pub fn list(&self) -> Vec<String> {
        self.sounds.read().keys().cloned().collect()
    }

    /// All aliases as (alias, sound name) pairs, sorted.
    pub fn aliases(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self
            .aliases
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort();
        out
    }

    /// Map `alias` to an existing sound name.
    pub fn set_alias(&self, alias: &str, sound: &str) -> Result<()> {
        let alias = alias.trim().to_lowercase();
        if alias.is_empty()
            || !alias
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::BadAlias(alias));
        }
        let sound = sound.trim().to_lowercase();
        if !self.sounds.read().contains_key(&sound) {
            return Err(Error::NotFound(format!("sound: {sound}")));
        }
        self.aliases.insert(alias, sound);
        Ok(())
    }

    /// Remove an alias. Returns whether it existed.
    pub fn remove_alias(&self, alias: &str) -> bool {
        self.aliases.remove(&alias.trim().to_lowercase()).is_some()
    }

    /// Resolve a sound name (or alias) to its file path.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let name = name.trim().to_lowercase();
        let sounds = self.sounds.read();
        if let Some(path) = sounds.get(&name) {
            return Some(path.clone());
        }
        self.aliases
            .get(&name)
            .and_then(|target| sounds.get(target.value()).cloned())
    }
}

fn scan(dir: &Path) -> BTreeMap<String, PathBuf> {
    let mut sounds = BTreeMap::new();
    for ext in SOUND_EXTENSIONS {
        let pattern = format!("{}/**/*.{ext}", dir.display());
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "sound scan pattern invalid");
                continue;
            }
        };
        for entry in paths {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "unreadable path during sound scan");
                    continue;
                }
            };
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                sounds.insert(stem.to_lowercase(), path);
            }
        }
    }
    sounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn library(dir: &Path, names: &[&str]) -> SfxLibrary {
        for name in names {
            fs::write(dir.join(name), b"audio").unwrap();
        }
        SfxLibrary::new(dir)
    }

    #[test]
    fn test_split_interleaves_text_and_sounds() {
        let segs = split_tags("hello [SFX: horn] world [SFX:bell]");
        assert_eq!(
            segs,
            vec![
                SfxSegment::Text("hello".to_string()),
                SfxSegment::Sound("horn".to_string()),
                SfxSegment::Text("world".to_string()),
                SfxSegment::Sound("bell".to_string()),
            ]
        );
    }

    #[test]
    fn test_split_plain_text() {
        assert_eq!(
            split_tags("no tags here"),
            vec![SfxSegment::Text("no tags here".to_string())]
        );
        assert!(split_tags("   ").is_empty());
    }

    #[test]
    fn test_split_tag_only_and_case() {
        assert_eq!(
            split_tags("[SFX:  Airhorn ]"),
            vec![SfxSegment::Sound("airhorn".to_string())]
        );
    }

    #[test]
    fn test_scan_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(dir.path(), &["Horn.mp3", "bell.wav", "notes.txt"]);
        assert_eq!(lib.list(), vec!["bell", "horn"]);
        assert!(lib.resolve("HORN").is_some());
        assert!(lib.resolve("notes").is_none());
    }

    #[test]
    fn test_alias_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(dir.path(), &["airhorn.mp3"]);
        lib.set_alias("toot", "airhorn").unwrap();
        assert_eq!(lib.resolve("toot"), lib.resolve("airhorn"));
        assert!(matches!(
            lib.set_alias("bad alias", "airhorn"),
            Err(Error::BadAlias(_))
        ));
        assert!(matches!(lib.set_alias("x", "missing"), Err(Error::NotFound(_))));
        assert!(lib.remove_alias("toot"));
        assert!(lib.resolve("toot").is_none());
    }

    #[test]
    fn test_reload_picks_up_new_sounds() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(dir.path(), &["one.mp3"]);
        fs::write(dir.path().join("two.ogg"), b"audio").unwrap();
        assert_eq!(lib.reload(), 2);
    }
}
