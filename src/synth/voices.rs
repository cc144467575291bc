//! Voice model catalog.
//!
//! Voices are discovered by scanning the voices directory recursively for
//! `*.onnx` models with a `.onnx.json` sidecar; the sidecar supplies the
//! sample rate, speaker count, and language. A voice's id is the model
//! file stem, e.g. `en_US-amy-medium`.

use crate::config::Config;
use crate::error::{Error, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One discovered voice model.
#[derive(Debug, Clone)]
pub struct VoiceInfo {
    pub id: String,
    pub model_path: PathBuf,
    pub config_path: PathBuf,
    pub sample_rate: u32,
    pub speakers: u32,
    pub language: Option<String>,
}

/// Sidecar fields we care about; everything else in the JSON is ignored.
#[derive(Deserialize)]
struct SidecarConfig {
    audio: Option<SidecarAudio>,
    num_speakers: Option<u32>,
    language: Option<SidecarLanguage>,
}

#[derive(Deserialize)]
struct SidecarAudio {
    sample_rate: Option<u32>,
}

#[derive(Deserialize)]
struct SidecarLanguage {
    code: Option<String>,
}

/// Outcome of a voice lookup.
#[derive(Debug, Clone)]
pub struct ResolvedVoice {
    pub voice: VoiceInfo,
    /// True when the requested name was unknown and the default stood in.
    pub fallback: bool,
}

/// Catalog of scanned voices plus the alias table.
///
/// The catalog itself is replaced wholesale on reload; aliases mutate
/// individually through the API.
pub struct VoiceCatalog {
    dir: PathBuf,
    // BTreeMap keeps ids sorted so the fallback choice is deterministic.
    voices: RwLock<BTreeMap<String, VoiceInfo>>,
    aliases: DashMap<String, String>,
}

impl VoiceCatalog {
    /// Scan `cfg.synth.voices_dir` and seed aliases from config.
    pub fn new(cfg: &Config) -> Self {
        let dir = PathBuf::from(&cfg.synth.voices_dir);
        let voices = scan(&dir);
        debug!(dir = %dir.display(), voices = voices.len(), "voice catalog loaded");
        let aliases = DashMap::new();
        for (alias, voice) in &cfg.aliases {
            aliases.insert(alias.to_lowercase(), voice.clone());
        }
        Self {
            dir,
            voices: RwLock::new(voices),
            aliases,
        }
    }

    /// Rescan the voices directory. Returns the new voice count.
    pub fn reload(&self) -> usize {
        let voices = scan(&self.dir);
        let count = voices.len();
        *self.voices.write() = voices;
        debug!(voices = count, "voice catalog reloaded");
        count
    }

    /// All voices, id-sorted.
    pub fn list(&self) -> Vec<VoiceInfo> {
        self.voices.read().values().cloned().collect()
    }

    /// All aliases as (alias, voice id) pairs.
    pub fn aliases(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self
            .aliases
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort();
        out
    }

    /// Map `alias` to `voice`; the voice must exist.
    pub fn set_alias(&self, alias: &str, voice: &str) -> Result<()> {
        let alias = alias.trim().to_lowercase();
        if alias.is_empty() || !alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(Error::BadAlias(alias));
        }
        if !self.voices.read().contains_key(voice) {
            return Err(Error::NotFound(format!("voice: {voice}")));
        }
        self.aliases.insert(alias, voice.to_string());
        Ok(())
    }

    /// Remove an alias. Returns whether it existed.
    pub fn remove_alias(&self, alias: &str) -> bool {
        self.aliases.remove(&alias.trim().to_lowercase()).is_some()
    }

    /// Exact-or-alias lookup with no fallback. Used to decide whether a
    /// message prefix names a voice.
    pub fn lookup(&self, name: &str) -> Option<VoiceInfo> {
        let name = name.trim();
        let voices = self.voices.read();
        if let Some(voice) = voices.get(name) {
            return Some(voice.clone());
        }
        self.aliases
            .get(&name.to_lowercase())
            .and_then(|target| voices.get(target.value()).cloned())
    }

    /// Resolve a requested voice name to a model.
    ///
    /// Exact id first, then alias, then fall back to the
    /// lexicographically-first voice with the fallback flag set. `None`
    /// requests go straight to the default without the flag.
    pub fn resolve(&self, requested: Option<&str>) -> Result<ResolvedVoice> {
        let voices = self.voices.read();
        let default = voices
            .values()
            .next()
            .cloned()
            .ok_or_else(|| Error::RendererUnavailable("no voices installed".to_string()))?;

        let Some(name) = requested.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(ResolvedVoice {
                voice: default,
                fallback: false,
            });
        };

        if let Some(voice) = voices.get(name) {
            return Ok(ResolvedVoice {
                voice: voice.clone(),
                fallback: false,
            });
        }

        if let Some(target) = self.aliases.get(&name.to_lowercase()) {
            if let Some(voice) = voices.get(target.value()) {
                return Ok(ResolvedVoice {
                    voice: voice.clone(),
                    fallback: false,
                });
            }
            warn!(alias = %name, target = %target.value(), "alias points at missing voice");
        }

        debug!(requested = %name, fallback = %default.id, "unknown voice, using default");
        Ok(ResolvedVoice {
            voice: default,
            fallback: true,
        })
    }
}

fn scan(dir: &Path) -> BTreeMap<String, VoiceInfo> {
    let mut voices = BTreeMap::new();
    let pattern = format!("{}/**/*.onnx", dir.display());
    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "voice scan pattern invalid");
            return voices;
        }
    };

    for entry in paths {
        let model_path = match entry {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "unreadable path during voice scan");
                continue;
            }
        };
        let config_path = PathBuf::from(format!("{}.json", model_path.display()));
        if !config_path.exists() {
            debug!(model = %model_path.display(), "model without sidecar, skipping");
            continue;
        }
        let Some(id) = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
        else {
            continue;
        };

        let sidecar: SidecarConfig = match std::fs::read_to_string(&config_path)
            .map_err(|e| e.to_string())
            .and_then(|body| serde_json::from_str(&body).map_err(|e| e.to_string()))
        {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(voice = %id, error = %e, "bad voice sidecar, skipping");
                continue;
            }
        };

        voices.insert(
            id.clone(),
            VoiceInfo {
                id,
                model_path,
                config_path,
                sample_rate: sidecar.audio.and_then(|a| a.sample_rate).unwrap_or(22050),
                speakers: sidecar.num_speakers.unwrap_or(1),
                language: sidecar.language.and_then(|l| l.code),
            },
        );
    }
    voices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn fake_voice(dir: &Path, id: &str, sample_rate: u32) {
        fs::write(dir.join(format!("{id}.onnx")), b"model").unwrap();
        fs::write(
            dir.join(format!("{id}.onnx.json")),
            format!(
                r#"{{"audio":{{"sample_rate":{sample_rate}}},"num_speakers":1,"language":{{"code":"en_US"}}}}"#
            ),
        )
        .unwrap();
    }

    fn catalog_with(dir: &Path, aliases: HashMap<String, String>) -> VoiceCatalog {
        let mut cfg = Config::default();
        cfg.synth.voices_dir = dir.display().to_string();
        cfg.aliases = aliases;
        VoiceCatalog::new(&cfg)
    }

    #[test]
    fn test_scan_finds_models_with_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        fake_voice(dir.path(), "en_US-amy-medium", 22050);
        fs::write(dir.path().join("orphan.onnx"), b"model").unwrap();

        let catalog = catalog_with(dir.path(), HashMap::new());
        let voices = catalog.list();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].id, "en_US-amy-medium");
        assert_eq!(voices[0].sample_rate, 22050);
        assert_eq!(voices[0].language.as_deref(), Some("en_US"));
    }

    #[test]
    fn test_resolve_exact_then_alias_then_fallback() {
        let dir = tempfile::tempdir().unwrap();
        fake_voice(dir.path(), "en_US-amy-medium", 22050);
        fake_voice(dir.path(), "en_US-ryan-high", 22050);
        let catalog = catalog_with(
            dir.path(),
            HashMap::from([("ryan".to_string(), "en_US-ryan-high".to_string())]),
        );

        let exact = catalog.resolve(Some("en_US-ryan-high")).unwrap();
        assert_eq!(exact.voice.id, "en_US-ryan-high");
        assert!(!exact.fallback);

        let aliased = catalog.resolve(Some("RYAN")).unwrap();
        assert_eq!(aliased.voice.id, "en_US-ryan-high");
        assert!(!aliased.fallback);

        // Unknown name falls back to the first id in sort order.
        let fell = catalog.resolve(Some("nope")).unwrap();
        assert_eq!(fell.voice.id, "en_US-amy-medium");
        assert!(fell.fallback);

        // No request also gets the default but is not flagged.
        let default = catalog.resolve(None).unwrap();
        assert_eq!(default.voice.id, "en_US-amy-medium");
        assert!(!default.fallback);
    }

    #[test]
    fn test_empty_catalog_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_with(dir.path(), HashMap::new());
        assert!(matches!(
            catalog.resolve(None),
            Err(Error::RendererUnavailable(_))
        ));
    }

    #[test]
    fn test_alias_crud() {
        let dir = tempfile::tempdir().unwrap();
        fake_voice(dir.path(), "en_US-amy-medium", 22050);
        let catalog = catalog_with(dir.path(), HashMap::new());

        catalog.set_alias("amy", "en_US-amy-medium").unwrap();
        assert_eq!(
            catalog.aliases(),
            vec![("amy".to_string(), "en_US-amy-medium".to_string())]
        );
        assert!(matches!(
            catalog.set_alias("bad alias!", "en_US-amy-medium"),
            Err(Error::BadAlias(_))
        ));
        assert!(matches!(
            catalog.set_alias("ok", "missing-voice"),
            Err(Error::NotFound(_))
        ));
        assert!(catalog.remove_alias("AMY"));
        assert!(!catalog.remove_alias("amy"));
    }

    #[test]
    fn test_reload_picks_up_new_models() {
        let dir = tempfile::tempdir().unwrap();
        fake_voice(dir.path(), "en_US-amy-medium", 22050);
        let catalog = catalog_with(dir.path(), HashMap::new());
        assert_eq!(catalog.list().len(), 1);

        fake_voice(dir.path(), "en_US-ryan-high", 22050);
        assert_eq!(catalog.reload(), 2);
        assert_eq!(catalog.list().len(), 2);
    }
}
