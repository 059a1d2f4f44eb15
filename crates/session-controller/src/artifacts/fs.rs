//! Directory-backed artifact store.
//!
//! Layout: `<root>/<TOKEN>.data` and `<root>/<TOKEN>.save`. Writes go to a
//! temporary sibling first and are renamed into place, so a reader never
//! observes a half-written blob.

use super::{ArtifactHandle, ArtifactKind, ArtifactStore, WorkerArtifacts};
use crate::allocation::Token;
use crate::errors::ScError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Open (creating if needed) the artifact directory.
    ///
    /// # Errors
    ///
    /// Returns `ScError::Storage` if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ScError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| storage_error("create artifact directory", &root, &e))?;
        info!(target: "sc.artifacts", root = %root.display(), "Artifact store opened");
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path(&self, token: &Token, kind: ArtifactKind) -> PathBuf {
        self.root.join(format!("{token}.{}", kind.as_str()))
    }

    /// Parse `<TOKEN>.<kind>` file names; anything else in the directory is ignored.
    fn token_from_file_name(name: &str) -> Option<Token> {
        let (stem, ext) = name.rsplit_once('.')?;
        if !ArtifactKind::ALL.iter().any(|kind| kind.as_str() == ext) {
            return None;
        }
        let token = Token::parse(stem).ok()?;
        // Only canonical (upper-case) names belong to the store.
        (token.as_str() == stem).then_some(token)
    }
}

fn storage_error(action: &str, path: &Path, err: &std::io::Error) -> ScError {
    ScError::Storage(format!("{action} {}: {err}", path.display()))
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, token: &Token, kind: ArtifactKind, bytes: Bytes) -> Result<(), ScError> {
        let path = self.path(token, kind);
        let tmp = self.root.join(format!(".{token}.{}.tmp", kind.as_str()));

        let written = match tokio::fs::write(&tmp, &bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| storage_error("rename", &path, &e)),
            Err(e) => Err(storage_error("write", &tmp, &e)),
        };
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(target: "sc.artifacts", path = %tmp.display(), error = %cleanup, "Failed to remove temporary artifact");
                }
            }
            return Err(e);
        }

        debug!(
            target: "sc.artifacts",
            token = %token,
            kind = kind.as_str(),
            size = bytes.len(),
            "Artifact saved"
        );
        Ok(())
    }

    async fn load(&self, token: &Token, kind: ArtifactKind) -> Result<Bytes, ScError> {
        let path = self.path(token, kind);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ScError::ArtifactNotFound(token.to_string()))
            }
            Err(e) => Err(storage_error("read", &path, &e)),
        }
    }

    async fn exists(&self, token: &Token, kind: ArtifactKind) -> Result<bool, ScError> {
        let path = self.path(token, kind);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| storage_error("stat", &path, &e))
    }

    async fn delete(&self, token: &Token, kind: ArtifactKind) -> Result<(), ScError> {
        let path = self.path(token, kind);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(target: "sc.artifacts", token = %token, kind = kind.as_str(), "Artifact deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("delete", &path, &e)),
        }
    }

    async fn tokens(&self) -> Result<BTreeSet<Token>, ScError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| storage_error("list", &self.root, &e))?;

        let mut tokens = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("list", &self.root, &e))?
        {
            if let Some(token) = entry.file_name().to_str().and_then(Self::token_from_file_name) {
                tokens.insert(token);
            }
        }
        Ok(tokens)
    }

    async fn worker_artifacts(&self, token: &Token) -> Result<WorkerArtifacts, ScError> {
        if !self.exists(token, ArtifactKind::Data).await? {
            return Err(ScError::ArtifactNotFound(token.to_string()));
        }
        Ok(WorkerArtifacts {
            data: ArtifactHandle::File(self.path(token, ArtifactKind::Data)),
            save: Some(ArtifactHandle::File(self.path(token, ArtifactKind::Save))),
        })
    }
}
