//! External speech renderer and the permit pool that bounds it.
//!
//! Rendering shells out to the piper binary, one process per request.
//! Model inference is CPU-heavy, so a semaphore caps how many renders run
//! at once; excess requests queue on the permit rather than erroring.

use crate::error::{Error, Result};
use crate::synth::voices::VoiceInfo;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// A WAV file with only a header and no samples is 44 bytes; anything at
/// or under that size means the renderer produced no speech.
const WAV_HEADER_BYTES: u64 = 44;

/// Tunable synthesis parameters, all optional.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderParams {
    pub speaker: Option<u32>,
    pub length_scale: Option<f32>,
    pub noise_scale: Option<f32>,
    pub noise_w: Option<f32>,
    pub sentence_silence: Option<f32>,
}

impl RenderParams {
    /// Overlay `other` on top of self; set fields in `other` win.
    pub fn merged(self, other: RenderParams) -> RenderParams {
        RenderParams {
            speaker: other.speaker.or(self.speaker),
            length_scale: other.length_scale.or(self.length_scale),
            noise_scale: other.noise_scale.or(self.noise_scale),
            noise_w: other.noise_w.or(self.noise_w),
            sentence_silence: other.sentence_silence.or(self.sentence_silence),
        }
    }
}

/// Turns text into WAV bytes with a specific voice model.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, voice: &VoiceInfo, text: &str, params: &RenderParams)
    -> Result<Vec<u8>>;
}

/// Piper subprocess renderer.
pub struct PiperRenderer {
    bin: String,
}

impl PiperRenderer {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl Renderer for PiperRenderer {
    async fn render(
        &self,
        voice: &VoiceInfo,
        text: &str,
        params: &RenderParams,
    ) -> Result<Vec<u8>> {
        // TempPath deletes the file on drop, covering every exit below.
        let out = tempfile::Builder::new()
            .prefix("crierd-tts-")
            .suffix(".wav")
            .tempfile()?
            .into_temp_path();

        let mut cmd = Command::new(&self.bin);
        cmd.arg("--model")
            .arg(&voice.model_path)
            .arg("--config")
            .arg(&voice.config_path)
            .arg("--output_file")
            .arg(out.as_os_str());
        if let Some(speaker) = params.speaker {
            cmd.arg("--speaker").arg(speaker.to_string());
        }
        if let Some(v) = params.length_scale {
            cmd.arg("--length_scale").arg(v.to_string());
        }
        if let Some(v) = params.noise_scale {
            cmd.arg("--noise_scale").arg(v.to_string());
        }
        if let Some(v) = params.noise_w {
            cmd.arg("--noise_w").arg(v.to_string());
        }
        if let Some(v) = params.sentence_silence {
            cmd.arg("--sentence_silence").arg(v.to_string());
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::RendererUnavailable(format!("{} not found", self.bin))
            } else {
                Error::Io(e)
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(voice = %voice.id, status = %output.status, "renderer failed");
            return Err(Error::RendererFailed(
                stderr.lines().last().unwrap_or("no output").to_string(),
            ));
        }

        let size = std::fs::metadata(&out).map(|m| m.len()).unwrap_or(0);
        if size <= WAV_HEADER_BYTES {
            return Err(Error::EmptyAudio);
        }

        debug!(voice = %voice.id, bytes = size, "rendered");
        Ok(std::fs::read(&out)?)
    }
}

/// Semaphore-bounded front to a renderer.
///
/// Cloneable handle; all clones share the permit pool.
#[derive(Clone)]
pub struct RenderPool {
    renderer: Arc<dyn Renderer>,
    permits: Arc<Semaphore>,
}

impl RenderPool {
    pub fn new(renderer: Arc<dyn Renderer>, max_concurrency: usize) -> Self {
        Self {
            renderer,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Render under a permit; waits if all permits are in use.
    pub async fn render(
        &self,
        voice: &VoiceInfo,
        text: &str,
        params: &RenderParams,
    ) -> Result<Vec<u8>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::RendererUnavailable("render pool closed".to_string()))?;
        self.renderer.render(voice, text, params).await
    }
}
