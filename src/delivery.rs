//! Delivery of finished artifacts and the per-kind in-flight guard.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Content kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Diagram,
    Document,
    Presentation,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diagram => "diagram",
            Self::Document => "document",
            Self::Presentation => "presentation",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Diagram => 0,
            Self::Document => 1,
            Self::Presentation => 2,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// In-flight guard
// =============================================================================

/// One flag per content kind; a second request of a kind already running is
/// rejected rather than queued.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    flags: Arc<[AtomicBool; 3]>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `kind`, or `None` when a request of that kind is already running.
    pub fn try_acquire(&self, kind: ContentKind) -> Option<InFlightGuard> {
        let flag = &self.flags[kind.index()];
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                flags: Arc::clone(&self.flags),
                kind,
            })
    }

    pub fn is_busy(&self, kind: ContentKind) -> bool {
        self.flags[kind.index()].load(Ordering::Acquire)
    }
}

/// Releases its kind on drop, whatever the pipeline outcome.
#[derive(Debug)]
pub struct InFlightGuard {
    flags: Arc<[AtomicBool; 3]>,
    kind: ContentKind,
}

impl InFlightGuard {
    pub fn kind(&self) -> ContentKind {
        self.kind
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flags[self.kind.index()].store(false, Ordering::Release);
    }
}

// =============================================================================
// Artifacts
// =============================================================================

/// Finished output, ready to be written.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: ContentKind,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// Artifact named after its title, e.g. `Rust_Ownership.docx`.
    pub fn titled(kind: ContentKind, title: &str, extension: &str, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            file_name: format!("{}.{extension}", file_stem(title, kind.as_str())),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Title with spaces turned into underscores and characters that are unsafe
/// in file names removed. Falls back to `fallback` when nothing is left.
pub fn file_stem(title: &str, fallback: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => None,
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();
    let stem = stem.trim_matches('.');
    if stem.is_empty() {
        fallback.to_string()
    } else {
        stem.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Write `artifact` into `out_dir`, creating the directory if needed.
/// An existing file with the same name is replaced.
pub async fn deliver(artifact: &Artifact, out_dir: &Path) -> Result<PathBuf, DeliveryError> {
    let path = out_dir.join(&artifact.file_name);
    let write_err = |source| DeliveryError::Write {
        path: path.clone(),
        source,
    };

    tokio::fs::create_dir_all(out_dir).await.map_err(write_err)?;
    tokio::fs::write(&path, &artifact.bytes)
        .await
        .map_err(write_err)?;

    info!(
        kind = %artifact.kind,
        path = %path.display(),
        bytes = artifact.bytes.len(),
        "delivered artifact"
    );
    Ok(path)
}
