//! Audio post-processing via the ffmpeg binary.
//!
//! Loudness normalization and mp3 transcoding are conveniences and soft-
//! fail: on any error the input audio is passed through and a warning
//! logged. Resampling and concatenation are correctness-critical for
//! batch playback and fail hard.

use crate::error::{Error, Result};
use std::io::ErrorKind;
use std::process::Stdio;
use tempfile::TempPath;
use tokio::process::Command;
use tracing::{debug, warn};

/// Common sample rate every batch part is converted to before joining.
const CONCAT_SAMPLE_RATE: &str = "48000";

/// Wrapper around one ffmpeg binary.
#[derive(Clone)]
pub struct FfmpegTool {
    bin: String,
}

impl FfmpegTool {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// EBU R128 loudness normalization. Returns the input untouched if
    /// ffmpeg is missing or errors.
    pub async fn normalize(&self, wav: Vec<u8>) -> Vec<u8> {
        match self
            .convert(&wav, ".wav", &["-af", "loudnorm=I=-18:TP=-2:LRA=11"])
            .await
        {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "loudness normalization failed, passing audio through");
                wav
            }
        }
    }

    /// Transcode WAV to mp3. `None` means the caller should serve the WAV.
    pub async fn to_mp3(&self, wav: &[u8], bitrate: &str) -> Option<Vec<u8>> {
        match self
            .convert(wav, ".mp3", &["-codec:a", "libmp3lame", "-b:a", bitrate])
            .await
        {
            Ok(out) => Some(out),
            Err(e) => {
                warn!(error = %e, "mp3 transcode failed, serving wav");
                None
            }
        }
    }

    /// Join audio parts gaplessly into one WAV.
    ///
    /// Each part is first resampled to 48 kHz mono 16-bit so models with
    /// different native rates and arbitrary sound files can be mixed.
    pub async fn concat(&self, parts: &[Vec<u8>]) -> Result<Vec<u8>> {
        debug_assert!(!parts.is_empty());

        let mut resampled: Vec<TempPath> = Vec::with_capacity(parts.len());
        for part in parts {
            resampled.push(self.resample_to_file(part).await?);
        }

        let mut listing = String::new();
        for path in &resampled {
            // The concat demuxer list format; single quotes in paths are
            // escaped as '\''.
            let p = path.display().to_string().replace('\'', r"'\''");
            listing.push_str(&format!("file '{p}'\n"));
        }
        let list_file = write_temp(listing.as_bytes(), ".txt")?;

        let out = tempfile::Builder::new()
            .prefix("crierd-cat-")
            .suffix(".wav")
            .tempfile()?
            .into_temp_path();

        self.run(&[
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
            &list_file.display().to_string(),
            "-c",
            "copy",
            &out.display().to_string(),
        ])
        .await?;

        let joined = std::fs::read(&out)?;
        debug!(parts = parts.len(), bytes = joined.len(), "concatenated batch audio");
        Ok(joined)
    }

    /// Resample arbitrary audio to the common concat format, on disk.
    async fn resample_to_file(&self, audio: &[u8]) -> Result<TempPath> {
        let input = write_temp(audio, ".bin")?;
        let out = tempfile::Builder::new()
            .prefix("crierd-rs-")
            .suffix(".wav")
            .tempfile()?
            .into_temp_path();

        self.run(&[
            "-i",
            &input.display().to_string(),
            "-ar",
            CONCAT_SAMPLE_RATE,
            "-ac",
            "1",
            "-sample_fmt",
            "s16",
            &out.display().to_string(),
        ])
        .await?;
        Ok(out)
    }

    /// One input-file, one output-file conversion used by the soft paths.
    async fn convert(&self, input: &[u8], out_suffix: &str, args: &[&str]) -> Result<Vec<u8>> {
        let in_path = write_temp(input, ".wav")?;
        let out = tempfile::Builder::new()
            .prefix("crierd-ff-")
            .suffix(out_suffix)
            .tempfile()?
            .into_temp_path();

        let mut full: Vec<String> = vec!["-i".to_string(), in_path.display().to_string()];
        full.extend(args.iter().map(|s| s.to_string()));
        full.push(out.display().to_string());
        let refs: Vec<&str> = full.iter().map(String::as_str).collect();
        self.run(&refs).await?;

        Ok(std::fs::read(&out)?)
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        let output = Command::new(&self.bin)
            .arg("-nostdin")
            .arg("-hide_banner")
            .arg("-y")
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Error::RendererUnavailable(format!("{} not found", self.bin))
                } else {
                    Error::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::RendererFailed(format!(
                "ffmpeg: {}",
                stderr.lines().last().unwrap_or("no output")
            )));
        }
        Ok(())
    }
}

fn write_temp(data: &[u8], suffix: &str) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("crierd-in-")
        .suffix(suffix)
        .tempfile()?;
    std::io::Write::write_all(&mut file, data)?;
    Ok(file.into_temp_path())
}
