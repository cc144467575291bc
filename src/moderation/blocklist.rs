//! Persistent blocklist with hot reload.
//!
//! Terms live one-per-line in a plain text file so operators can edit it
//! with anything. Before every read the file's mtime is compared against
//! the last load and the list is re-read on change, so external edits take
//! effect without a restart. Mutations through the API write the file back
//! and keep the in-memory compiled matchers in lockstep.

use crate::moderation::matcher::{self, MatcherError};
use parking_lot::RwLock;
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

struct Inner {
    terms: Vec<String>,
    matchers: Vec<Regex>,
    mtime: Option<SystemTime>,
}

/// File-backed list of censored terms and their compiled matchers.
pub struct Blocklist {
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl Blocklist {
    /// Open the blocklist at `path`, creating an empty file if absent.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, "")?;
        }
        let (terms, matchers, mtime) = load(&path)?;
        debug!(path = %path.display(), terms = terms.len(), "blocklist loaded");
        Ok(Self {
            path,
            inner: RwLock::new(Inner {
                terms,
                matchers,
                mtime,
            }),
        })
    }

    /// Reload from disk if the file changed since the last load.
    pub fn ensure_fresh(&self) {
        let current = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        {
            let inner = self.inner.read();
            if current == inner.mtime {
                return;
            }
        }
        if let Err(e) = self.reload() {
            warn!(path = %self.path.display(), error = %e, "blocklist reload failed, keeping previous");
        }
    }

    /// Unconditionally re-read the file.
    pub fn reload(&self) -> io::Result<usize> {
        let (terms, matchers, mtime) = load(&self.path)?;
        let count = terms.len();
        let mut inner = self.inner.write();
        inner.terms = terms;
        inner.matchers = matchers;
        inner.mtime = mtime;
        debug!(terms = count, "blocklist reloaded");
        Ok(count)
    }

    /// Current terms, freshest-on-disk.
    pub fn list(&self) -> Vec<String> {
        self.ensure_fresh();
        self.inner.read().terms.clone()
    }

    /// Add a term; no-op if already present. Returns whether it was added.
    pub fn add(&self, term: &str) -> Result<bool, BlocklistError> {
        self.ensure_fresh();
        let term = term.trim().to_lowercase();
        let rx = matcher::compile(&term)?;
        let mut inner = self.inner.write();
        if inner.terms.iter().any(|t| *t == term) {
            return Ok(false);
        }
        inner.terms.push(term);
        inner.matchers.push(rx);
        self.persist(&mut inner)?;
        Ok(true)
    }

    /// Remove a term. Returns whether it was present.
    pub fn remove(&self, term: &str) -> Result<bool, BlocklistError> {
        self.ensure_fresh();
        let term = term.trim().to_lowercase();
        let mut inner = self.inner.write();
        let Some(idx) = inner.terms.iter().position(|t| *t == term) else {
            return Ok(false);
        };
        inner.terms.remove(idx);
        inner.matchers.remove(idx);
        self.persist(&mut inner)?;
        Ok(true)
    }

    /// Run `f` over the compiled matchers, freshest-on-disk.
    pub fn with_matchers<R>(&self, f: impl FnOnce(&[Regex]) -> R) -> R {
        self.ensure_fresh();
        let inner = self.inner.read();
        f(&inner.matchers)
    }

    fn persist(&self, inner: &mut Inner) -> io::Result<()> {
        let mut body = inner.terms.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&self.path, body)?;
        inner.mtime = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        Ok(())
    }
}

/// Blocklist mutation failures.
#[derive(Debug, thiserror::Error)]
pub enum BlocklistError {
    #[error("invalid term: {0}")]
    Term(#[from] MatcherError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn load(path: &Path) -> io::Result<(Vec<String>, Vec<Regex>, Option<SystemTime>)> {
    let body = fs::read_to_string(path)?;
    let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
    let mut terms = Vec::new();
    let mut matchers = Vec::new();
    for line in body.lines() {
        let term = line.trim().to_lowercase();
        if term.is_empty() || term.starts_with('#') {
            continue;
        }
        match matcher::compile(&term) {
            Ok(rx) => {
                terms.push(term);
                matchers.push(rx);
            }
            Err(e) => warn!(term = %term, error = %e, "skipping uncompilable blocklist term"),
        }
    }
    Ok((terms, matchers, mtime))
}
