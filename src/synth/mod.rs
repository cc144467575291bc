//! Speech synthesis engine.
//!
//! Orchestrates the full request path: sanitize and truncate the text,
//! run moderation, resolve the voice, consult the audio cache, render
//! under the concurrency limit, post-process, and report what happened in
//! the response metadata.

pub mod audio;
pub mod batch;
pub mod cache;
pub mod renderer;
pub mod voices;

use crate::config::{Config, PresetConfig};
use crate::error::{Error, Result};
use crate::metrics;
use crate::moderation::{CensorMode, ModFlags, Moderator};
use crate::sfx::SfxLibrary;
use audio::FfmpegTool;
use batch::{BatchPart, BatchReport};
use bytes::Bytes;
use cache::{AudioCache, CacheKey};
use renderer::{PiperRenderer, RenderParams, RenderPool, Renderer};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Inline preset tag at the start of a message, e.g. `[slow] hello`.
static PRESET_TAG_RX: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^\[([A-Za-z0-9_-]+)\]\s*").unwrap());

/// One synthesis request, after HTTP decoding.
#[derive(Debug, Clone, Default)]
pub struct SpeakRequest {
    pub text: String,
    pub voice: Option<String>,
    pub format: Option<String>,
    pub preset: Option<String>,
    pub params: RenderParams,
    pub censor_mode: Option<CensorMode>,
    pub normalize: Option<bool>,
}

/// What actually happened, surfaced as response headers.
#[derive(Debug, Clone)]
pub struct SpeakMeta {
    pub request_id: String,
    pub voice: String,
    pub requested_voice: Option<String>,
    pub voice_fallback: bool,
    pub cached: bool,
    pub preset: Option<String>,
    pub flags: ModFlags,
    pub render_ms: u64,
}

/// Rendered audio plus its metadata.
#[derive(Debug)]
pub struct SpeakOutcome {
    pub audio: Bytes,
    pub content_type: &'static str,
    pub meta: SpeakMeta,
}

/// Batch outcome carries the assembly report too.
#[derive(Debug)]
pub struct BatchOutcome {
    pub audio: Bytes,
    pub content_type: &'static str,
    pub meta: SpeakMeta,
    pub report: BatchReport,
}

/// The synthesis engine. Cheap to share behind an `Arc`.
pub struct SynthEngine {
    catalog: Arc<voices::VoiceCatalog>,
    pool: RenderPool,
    ffmpeg: FfmpegTool,
    cache: AudioCache,
    moderator: Arc<Moderator>,
    sfx: Arc<SfxLibrary>,
    presets: HashMap<String, PresetConfig>,
    default_format: String,
    mp3_bitrate: String,
    normalize_default: bool,
    max_text_chars: usize,
    max_sounds: usize,
}

impl SynthEngine {
    pub fn new(
        cfg: &Config,
        catalog: Arc<voices::VoiceCatalog>,
        moderator: Arc<Moderator>,
        sfx: Arc<SfxLibrary>,
    ) -> Self {
        let renderer: Arc<dyn Renderer> = Arc::new(PiperRenderer::new(&cfg.synth.piper_bin));
        Self::with_renderer(cfg, catalog, moderator, sfx, renderer)
    }

    /// Construction seam for tests that substitute the renderer.
    pub fn with_renderer(
        cfg: &Config,
        catalog: Arc<voices::VoiceCatalog>,
        moderator: Arc<Moderator>,
        sfx: Arc<SfxLibrary>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            catalog,
            pool: RenderPool::new(renderer, cfg.synth.max_concurrency),
            ffmpeg: FfmpegTool::new(&cfg.synth.ffmpeg_bin),
            cache: AudioCache::new(cfg.cache.size, Duration::from_secs(cfg.cache.ttl_secs)),
            moderator,
            sfx,
            presets: cfg.presets.clone(),
            default_format: cfg.synth.default_format.clone(),
            mp3_bitrate: cfg.synth.mp3_bitrate.clone(),
            normalize_default: cfg.synth.normalize,
            max_text_chars: cfg.synth.max_text_chars,
            max_sounds: cfg.sfx.max_sounds,
        }
    }

    pub fn catalog(&self) -> &voices::VoiceCatalog {
        &self.catalog
    }

    pub fn sfx(&self) -> &SfxLibrary {
        &self.sfx
    }

    pub fn moderator(&self) -> &Moderator {
        &self.moderator
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear()
    }

    /// Synthesize one message.
    pub async fn speak(&self, req: SpeakRequest) -> Result<SpeakOutcome> {
        let request_id = short_id();
        let mut text = sanitize(&req.text, self.max_text_chars);
        if text.is_empty() {
            metrics::record_tts("empty_text");
            return Err(Error::EmptyText);
        }

        let mut preset_name = req.preset.clone();
        if preset_name.is_none() {
            if let Some((name, rest)) = self.take_preset_tag(&text) {
                preset_name = Some(name);
                text = rest;
            }
        }

        let mut requested_voice = req.voice.clone();
        if requested_voice.is_none() {
            if let Some((name, rest)) = self.take_voice_prefix(&text) {
                requested_voice = Some(name);
                text = rest;
            }
        }

        let (text, flags) = self.moderate(&text, req.censor_mode);
        if text.is_empty() {
            metrics::record_tts("empty_text");
            return Err(Error::EmptyText);
        }

        let resolved = self.catalog.resolve(requested_voice.as_deref())?;
        let params = self.preset_params(preset_name.as_deref())?.merged(req.params);
        let normalize = req.normalize.unwrap_or(self.normalize_default);
        let format = self.pick_format(req.format.as_deref())?;

        let key = CacheKey {
            voice: resolved.voice.id.clone(),
            text: text.clone(),
            format: format.to_string(),
            speaker: params.speaker,
            length_scale: CacheKey::bits(params.length_scale),
            noise_scale: CacheKey::bits(params.noise_scale),
            noise_w: CacheKey::bits(params.noise_w),
            sentence_silence: CacheKey::bits(params.sentence_silence),
            normalized: normalize,
        };

        if let Some(audio) = self.cache.get(&key) {
            metrics::record_cache(true);
            metrics::record_tts("cached");
            debug!(request_id = %request_id, voice = %resolved.voice.id, "cache hit");
            return Ok(SpeakOutcome {
                content_type: content_type(format),
                audio,
                meta: SpeakMeta {
                    request_id,
                    voice: resolved.voice.id,
                    requested_voice,
                    voice_fallback: resolved.fallback,
                    cached: true,
                    preset: preset_name,
                    flags,
                    render_ms: 0,
                },
            });
        }
        metrics::record_cache(false);

        let started = Instant::now();
        let mut wav = self.pool.render(&resolved.voice, &text, &params).await?;
        let render_ms = started.elapsed().as_millis() as u64;
        metrics::record_render(started.elapsed().as_secs_f64());

        if normalize {
            wav = self.ffmpeg.normalize(wav).await;
        }

        let (audio, content_type, cacheable) = self.finish_format(wav, format).await;
        if cacheable {
            self.cache.put(key, audio.clone());
        }

        metrics::record_tts("ok");
        info!(
            request_id = %request_id,
            voice = %resolved.voice.id,
            chars = text.chars().count(),
            render_ms,
            fallback = resolved.fallback,
            "synthesized"
        );
        Ok(SpeakOutcome {
            audio,
            content_type,
            meta: SpeakMeta {
                request_id,
                voice: resolved.voice.id,
                requested_voice,
                voice_fallback: resolved.fallback,
                cached: false,
                preset: preset_name,
                flags,
                render_ms,
            },
        })
    }

    /// Synthesize a message with inline `[SFX: name]` tags into one clip.
    pub async fn speak_batch(&self, req: SpeakRequest) -> Result<BatchOutcome> {
        let request_id = short_id();
        let text = sanitize(&req.text, self.max_text_chars);
        if text.is_empty() {
            metrics::record_batch("empty_text");
            return Err(Error::EmptyText);
        }

        let (text, flags) = self.moderate(&text, req.censor_mode);
        let (parts, report) = match batch::assemble(&text, &self.sfx, self.max_sounds) {
            Ok(ok) => ok,
            Err(e) => {
                metrics::record_batch(e.error_code());
                return Err(e);
            }
        };

        let resolved = self.catalog.resolve(req.voice.as_deref())?;
        let params = self.preset_params(req.preset.as_deref())?.merged(req.params);
        let normalize = req.normalize.unwrap_or(self.normalize_default);
        let format = self.pick_format(req.format.as_deref())?;

        let started = Instant::now();
        let mut rendered: Vec<Vec<u8>> = Vec::with_capacity(parts.len());
        for part in &parts {
            match part {
                BatchPart::Text(t) => {
                    rendered.push(self.render_part(&resolved.voice, t, &params).await?);
                }
                BatchPart::Sfx(path) => rendered.push(std::fs::read(path)?),
            }
        }

        let mut wav = self.ffmpeg.concat(&rendered).await?;
        if normalize {
            wav = self.ffmpeg.normalize(wav).await;
        }
        let render_ms = started.elapsed().as_millis() as u64;
        let (audio, content_type, _) = self.finish_format(wav, format).await;

        metrics::record_batch("ok");
        info!(
            request_id = %request_id,
            voice = %resolved.voice.id,
            parts = parts.len(),
            skipped = report.unresolved.len() + report.over_cap.len(),
            render_ms,
            "synthesized batch"
        );
        Ok(BatchOutcome {
            audio,
            content_type,
            meta: SpeakMeta {
                request_id,
                voice: resolved.voice.id,
                requested_voice: req.voice,
                voice_fallback: resolved.fallback,
                cached: false,
                preset: req.preset,
                flags,
                render_ms,
            },
            report,
        })
    }

    /// Render one text part as WAV, cached under the wav format.
    async fn render_part(
        &self,
        voice: &voices::VoiceInfo,
        text: &str,
        params: &RenderParams,
    ) -> Result<Vec<u8>> {
        let key = CacheKey {
            voice: voice.id.clone(),
            text: text.to_string(),
            format: "wav".to_string(),
            speaker: params.speaker,
            length_scale: CacheKey::bits(params.length_scale),
            noise_scale: CacheKey::bits(params.noise_scale),
            noise_w: CacheKey::bits(params.noise_w),
            sentence_silence: CacheKey::bits(params.sentence_silence),
            normalized: false,
        };
        if let Some(hit) = self.cache.get(&key) {
            metrics::record_cache(true);
            return Ok(hit.to_vec());
        }
        metrics::record_cache(false);

        let started = Instant::now();
        let wav = self.pool.render(voice, text, params).await?;
        metrics::record_render(started.elapsed().as_secs_f64());
        self.cache.put(key, Bytes::from(wav.clone()));
        Ok(wav)
    }

    /// Spoken output drops censored terms outright; masking is only for
    /// the moderation preview endpoint.
    fn moderate(&self, text: &str, mode: Option<CensorMode>) -> (String, ModFlags) {
        let (out, flags) = self
            .moderator
            .filter(text, mode.unwrap_or(CensorMode::Drop));
        metrics::record_moderation("url", flags.urls);
        metrics::record_moderation("emoji", flags.emojis);
        metrics::record_moderation("term", flags.terms);
        (out, flags)
    }

    fn take_preset_tag(&self, text: &str) -> Option<(String, String)> {
        let caps = PRESET_TAG_RX.captures(text)?;
        let name = caps[1].to_lowercase();
        if !self.presets.contains_key(&name) {
            return None;
        }
        let rest = text[caps.get(0).expect("group 0").end()..].to_string();
        Some((name, rest))
    }

    /// A leading `name:` selects the voice when `name` is a known voice or
    /// alias; anything else (including URLs the moderator will handle) is
    /// left alone.
    fn take_voice_prefix(&self, text: &str) -> Option<(String, String)> {
        let (head, rest) = text.split_once(':')?;
        let head = head.trim();
        if head.is_empty() || head.contains(char::is_whitespace) {
            return None;
        }
        self.catalog.lookup(head)?;
        Some((head.to_string(), rest.trim_start().to_string()))
    }

    fn preset_params(&self, name: Option<&str>) -> Result<RenderParams> {
        let Some(name) = name else {
            return Ok(RenderParams::default());
        };
        let preset = self
            .presets
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::BadRequest(format!("unknown preset: {name}")))?;
        Ok(RenderParams {
            speaker: None,
            length_scale: preset.length_scale,
            noise_scale: preset.noise_scale,
            noise_w: preset.noise_w,
            sentence_silence: preset.sentence_silence,
        })
    }

    fn pick_format<'a>(&'a self, requested: Option<&'a str>) -> Result<&'a str> {
        let format = requested.unwrap_or(&self.default_format);
        match format {
            "mp3" | "wav" => Ok(format),
            other => Err(Error::BadRequest(format!("unsupported format: {other}"))),
        }
    }

    /// Transcode to the requested format. mp3 soft-fails back to wav, in
    /// which case the result is not cached under the mp3 key.
    async fn finish_format(&self, wav: Vec<u8>, format: &str) -> (Bytes, &'static str, bool) {
        if format == "mp3" {
            match self.ffmpeg.to_mp3(&wav, &self.mp3_bitrate).await {
                Some(mp3) => (Bytes::from(mp3), "audio/mpeg", true),
                None => (Bytes::from(wav), "audio/wav", false),
            }
        } else {
            (Bytes::from(wav), "audio/wav", true)
        }
    }
}

/// Eight hex characters of a v4 UUID; plenty for correlating logs.
fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn content_type(format: &str) -> &'static str {
    if format == "mp3" { "audio/mpeg" } else { "audio/wav" }
}

/// Drop control characters and truncate to `max` characters.
fn sanitize(text: &str, max: usize) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    cleaned.trim().chars().take(max).collect::<String>().trim_end().to_string()
}
