//! Batch assembly: turning a tagged message into renderable parts.
//!
//! A message like `hello [SFX: horn] world` becomes alternating speech and
//! sound parts. Sounds that don't resolve are skipped rather than failing
//! the whole message, and the number of sounds per batch is capped
//! inclusively: a cap of 10 plays at most 10.

use crate::error::{Error, Result};
use crate::sfx::{SfxLibrary, SfxSegment, split_tags};
use std::path::PathBuf;
use tracing::debug;

/// One renderable unit of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPart {
    /// Speech to synthesize.
    Text(String),
    /// A resolved sound file to splice in.
    Sfx(PathBuf),
}

/// What assembly decided, for response metadata.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Sound names that didn't resolve and were skipped.
    pub unresolved: Vec<String>,
    /// Sound names dropped because the cap was already reached.
    pub over_cap: Vec<String>,
}

/// Split `text` into parts, resolving sounds against `sfx`.
pub fn assemble(
    text: &str,
    sfx: &SfxLibrary,
    max_sounds: usize,
) -> Result<(Vec<BatchPart>, BatchReport)> {
    let mut parts = Vec::new();
    let mut report = BatchReport::default();
    let mut sounds_used = 0;

    for segment in split_tags(text) {
        match segment {
            SfxSegment::Text(t) => parts.push(BatchPart::Text(t)),
            SfxSegment::Sound(name) => {
                if sounds_used >= max_sounds {
                    report.over_cap.push(name);
                    continue;
                }
                match sfx.resolve(&name) {
                    Some(path) => {
                        sounds_used += 1;
                        parts.push(BatchPart::Sfx(path));
                    }
                    None => report.unresolved.push(name),
                }
            }
        }
    }

    if parts.is_empty() {
        return Err(Error::EmptyBatch);
    }
    if !report.unresolved.is_empty() || !report.over_cap.is_empty() {
        debug!(
            unresolved = report.unresolved.len(),
            over_cap = report.over_cap.len(),
            "batch assembly skipped sounds"
        );
    }
    Ok((parts, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn library(names: &[&str]) -> (tempfile::TempDir, SfxLibrary) {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(format!("{name}.mp3")), b"audio").unwrap();
        }
        let lib = SfxLibrary::new(dir.path());
        (dir, lib)
    }

    #[test]
    fn test_interleaved_parts() {
        let (_dir, lib) = library(&["horn"]);
        let (parts, report) = assemble("hello [SFX: horn] world", &lib, 10).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[0], BatchPart::Text(t) if t == "hello"));
        assert!(matches!(&parts[1], BatchPart::Sfx(_)));
        assert!(matches!(&parts[2], BatchPart::Text(t) if t == "world"));
        assert!(report.unresolved.is_empty());
    }

    #[test]
    fn test_unresolvable_sound_skipped() {
        let (_dir, lib) = library(&["horn"]);
        let (parts, report) = assemble("a [SFX: nope] b", &lib, 10).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(report.unresolved, vec!["nope"]);
    }

    #[test]
    fn test_cap_is_inclusive() {
        let (_dir, lib) = library(&["horn"]);
        let text = "[SFX: horn] ".repeat(4);
        // A cap of 3 keeps exactly 3 sounds and drops the fourth.
        let (parts, report) = assemble(&text, &lib, 3).unwrap();
        let sounds = parts
            .iter()
            .filter(|p| matches!(p, BatchPart::Sfx(_)))
            .count();
        assert_eq!(sounds, 3);
        assert_eq!(report.over_cap, vec!["horn"]);
    }

    #[test]
    fn test_unresolved_does_not_consume_cap() {
        let (_dir, lib) = library(&["horn"]);
        let (parts, _) = assemble("[SFX: nope] [SFX: horn]", &lib, 1).unwrap();
        assert_eq!(parts.len(), 1);
        assert!(matches!(&parts[0], BatchPart::Sfx(_)));
    }

    #[test]
    fn test_nothing_resolvable_is_empty_batch() {
        let (_dir, lib) = library(&[]);
        assert!(matches!(
            assemble("[SFX: nope]", &lib, 10),
            Err(Error::EmptyBatch)
        ));
        assert!(matches!(assemble("   ", &lib, 10), Err(Error::EmptyBatch)));
    }
}
