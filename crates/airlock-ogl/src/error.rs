//! Error types for the repository.

use std::path::PathBuf;

use thiserror::Error;

/// Repository failures.
///
/// I/O problems surface here; a failed [`crate::Repo::commit`] leaves
/// `root-ref` untouched. Corrupt objects (bad magic, impossible offsets)
/// are programmer-error-or-corruption and abort via assertions instead.
#[derive(Debug, Error)]
pub enum OglError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// `root-ref` does not hold exactly one 16-hex-digit line.
    #[error("malformed root-ref in {repo}")]
    BadRootRef {
        /// Repository directory.
        repo: PathBuf,
    },

    /// A path lookup found nothing.
    #[error("no entry at {path}")]
    NotFound {
        /// Path that failed to resolve.
        path: PathBuf,
    },

    /// An insertion target name already exists.
    #[error("entry already exists at {path}")]
    Exists {
        /// Path of the colliding entry.
        path: PathBuf,
    },

    /// A path component resolved to something other than a directory.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// Offending path.
        path: PathBuf,
    },

    /// A serialized object would exceed the 16-bit size field.
    #[error("directory object too large ({size} bytes) for {path}")]
    ObjectTooLarge {
        /// Would-be object size.
        size: usize,
        /// Directory being dumped.
        path: PathBuf,
    },

    /// A symlink target exceeds the 256-byte wire limit.
    #[error("symlink target too long at {path}")]
    TargetTooLong {
        /// Symlink path.
        path: PathBuf,
    },

    /// Three-way merge found a conflicting change.
    #[error("merge conflict on {name} in {dir}")]
    MergeConflict {
        /// Directory containing the conflict.
        dir: PathBuf,
        /// Conflicting entry name.
        name: String,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OglError>;

impl OglError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
