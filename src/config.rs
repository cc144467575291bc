//! Configuration loading and management.

use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server identity and listen configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Authorization configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Moderation configuration.
    #[serde(default)]
    pub moderation: ModerationConfig,
    /// Synthesis configuration.
    #[serde(default)]
    pub synth: SynthConfig,
    /// Audio cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Sound-effect library configuration.
    #[serde(default)]
    pub sfx: SfxConfig,
    /// Voice aliases: alias name -> voice id.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    /// Named parameter presets selectable per request or via `[tag]` prefix.
    #[serde(default)]
    pub presets: HashMap<String, PresetConfig>,
    /// OAuth-style identity providers keyed by provider name.
    #[serde(default)]
    pub identity: HashMap<String, IdentityProviderConfig>,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name used as token issuer.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Address to bind the API listener to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            listen: default_listen(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file (":memory:" for tests).
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Authorization configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Deployment switch: when false every capability check passes.
    #[serde(default)]
    pub enabled: bool,
    /// Path to the secrets file (static keys, signing secrets).
    #[serde(default = "default_secrets_file")]
    pub secrets_file: String,
    /// Session cookie name for panel grants.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secrets_file: default_secrets_file(),
            cookie_name: default_cookie_name(),
        }
    }
}

/// Moderation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModerationConfig {
    /// Master switch; disabled engine yields `ModerationDisabled`.
    #[serde(default)]
    pub enabled: bool,
    /// Replace URLs with a placeholder token.
    #[serde(default = "default_true")]
    pub strip_urls: bool,
    /// Remove emoji code points.
    #[serde(default = "default_true")]
    pub strip_emojis: bool,
    /// Censor blocklisted terms.
    #[serde(default = "default_true")]
    pub censor_terms: bool,
    /// Newline-delimited blocklist file; lines starting with `#` ignored.
    pub blocklist_path: Option<String>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strip_urls: true,
            strip_emojis: true,
            censor_terms: true,
            blocklist_path: None,
        }
    }
}

/// Synthesis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SynthConfig {
    /// Directory scanned recursively for voice models (`*.onnx` + sidecar).
    #[serde(default = "default_voices_dir")]
    pub voices_dir: String,
    /// External renderer binary.
    #[serde(default = "default_piper_bin")]
    pub piper_bin: String,
    /// External audio tool binary.
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    /// Render permit pool size: at most this many renderer invocations
    /// run concurrently.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Output format when the request does not specify one.
    #[serde(default = "default_format")]
    pub default_format: String,
    /// Bitrate for mp3 transcodes.
    #[serde(default = "default_bitrate")]
    pub mp3_bitrate: String,
    /// Apply loudness normalization by default.
    #[serde(default)]
    pub normalize: bool,
    /// Input text is truncated to this many characters before moderation.
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            voices_dir: default_voices_dir(),
            piper_bin: default_piper_bin(),
            ffmpeg_bin: default_ffmpeg_bin(),
            max_concurrency: default_max_concurrency(),
            default_format: default_format(),
            mp3_bitrate: default_bitrate(),
            normalize: false,
            max_text_chars: default_max_text_chars(),
        }
    }
}

/// Audio cache configuration. A capacity or TTL of zero disables caching.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_size")]
    pub size: usize,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

/// Sound-effect library configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SfxConfig {
    /// Directory scanned recursively for sound files.
    #[serde(default = "default_sounds_dir")]
    pub sounds_dir: String,
    /// Inclusive cap on sound-effect parts per batch.
    #[serde(default = "default_max_sounds")]
    pub max_sounds: usize,
}

impl Default for SfxConfig {
    fn default() -> Self {
        Self {
            sounds_dir: default_sounds_dir(),
            max_sounds: default_max_sounds(),
        }
    }
}

/// A named bundle of renderer parameters.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PresetConfig {
    pub length_scale: Option<f32>,
    pub noise_scale: Option<f32>,
    pub noise_w: Option<f32>,
    pub sentence_silence: Option<f32>,
}

/// Credentials and endpoints for one OAuth-style identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

fn default_server_name() -> String {
    "crierd".to_string()
}
fn default_listen() -> SocketAddr {
    "127.0.0.1:8080".parse().expect("valid default listen addr")
}
fn default_db_path() -> String {
    "crierd.db".to_string()
}
fn default_secrets_file() -> String {
    "secrets.toml".to_string()
}
fn default_cookie_name() -> String {
    "sid".to_string()
}
fn default_true() -> bool {
    true
}
fn default_voices_dir() -> String {
    "./voices".to_string()
}
fn default_piper_bin() -> String {
    "piper".to_string()
}
fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}
fn default_max_concurrency() -> usize {
    2
}
fn default_format() -> String {
    "mp3".to_string()
}
fn default_bitrate() -> String {
    "128k".to_string()
}
fn default_max_text_chars() -> usize {
    500
}
fn default_cache_size() -> usize {
    64
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_sounds_dir() -> String {
    "./sounds".to_string()
}
fn default_max_sounds() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_gets_defaults() {
        let config: Config = toml::from_str("").expect("empty config parses");
        assert_eq!(config.synth.max_concurrency, 2);
        assert_eq!(config.cache.size, 64);
        assert_eq!(config.sfx.max_sounds, 10);
        assert!(!config.auth.enabled);
        assert!(!config.moderation.enabled);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [moderation]
            enabled = true
            blocklist_path = "/tmp/bl.txt"

            [presets.slow]
            length_scale = 1.4
            "#,
        )
        .expect("config parses");
        assert!(config.moderation.enabled);
        assert!(config.moderation.strip_urls);
        assert_eq!(config.presets["slow"].length_scale, Some(1.4));
        assert_eq!(config.presets["slow"].noise_scale, None);
    }
}
