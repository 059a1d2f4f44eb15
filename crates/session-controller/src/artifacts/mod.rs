//! Persisted game artifacts.
//!
//! Each token owns at most one data blob (the generated game) and at most one
//! save blob (progress written by the worker). Both are keyed by the token
//! alone in a single flat namespace.
//!
//! - [`fs`] - one file per artifact under a directory (production)
//! - [`memory`] - in-process map (tests, embedded deployments)

pub mod fs;
pub mod memory;

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;

use crate::allocation::Token;
use crate::errors::ScError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

/// Which blob of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    Data,
    Save,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Data, ArtifactKind::Save];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Data => "data",
            ArtifactKind::Save => "save",
        }
    }
}

/// How a worker reaches an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactHandle {
    /// A file path the worker opens itself.
    File(PathBuf),
    /// The artifact bytes, for workers running in-process.
    Inline(Bytes),
}

/// Artifacts handed to a worker at launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArtifacts {
    pub data: ArtifactHandle,
    /// Existing save state, or for file-backed stores the path the worker
    /// should persist its save to.
    pub save: Option<ArtifactHandle>,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store (or replace) an artifact.
    async fn save(&self, token: &Token, kind: ArtifactKind, bytes: Bytes) -> Result<(), ScError>;

    /// Load an artifact. Missing artifacts are `ScError::ArtifactNotFound`.
    async fn load(&self, token: &Token, kind: ArtifactKind) -> Result<Bytes, ScError>;

    async fn exists(&self, token: &Token, kind: ArtifactKind) -> Result<bool, ScError>;

    /// Delete one artifact. Deleting an absent artifact is not an error.
    async fn delete(&self, token: &Token, kind: ArtifactKind) -> Result<(), ScError>;

    /// Every token with at least one stored artifact.
    async fn tokens(&self) -> Result<BTreeSet<Token>, ScError>;

    /// Handles for launching a worker on `token`.
    ///
    /// Fails with `ScError::ArtifactNotFound` if the data artifact is missing.
    async fn worker_artifacts(&self, token: &Token) -> Result<WorkerArtifacts, ScError>;

    /// Delete both artifacts of a token.
    async fn delete_all(&self, token: &Token) -> Result<(), ScError> {
        for kind in ArtifactKind::ALL {
            self.delete(token, kind).await?;
        }
        Ok(())
    }

    /// Tokens with stored artifacts that are not in `active`.
    async fn list_orphans(&self, active: &HashSet<Token>) -> Result<Vec<Token>, ScError> {
        Ok(self
            .tokens()
            .await?
            .into_iter()
            .filter(|token| !active.contains(token))
            .collect())
    }
}
