//! In-memory artifact store.

use super::{ArtifactHandle, ArtifactKind, ArtifactStore, WorkerArtifacts};
use crate::allocation::Token;
use crate::errors::ScError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// Artifacts kept in a map. Workers receive the bytes inline.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    blobs: RwLock<HashMap<(Token, ArtifactKind), Bytes>>,
}

impl InMemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn save(&self, token: &Token, kind: ArtifactKind, bytes: Bytes) -> Result<(), ScError> {
        self.blobs.write().await.insert((token.clone(), kind), bytes);
        Ok(())
    }

    async fn load(&self, token: &Token, kind: ArtifactKind) -> Result<Bytes, ScError> {
        self.blobs
            .read()
            .await
            .get(&(token.clone(), kind))
            .cloned()
            .ok_or_else(|| ScError::ArtifactNotFound(token.to_string()))
    }

    async fn exists(&self, token: &Token, kind: ArtifactKind) -> Result<bool, ScError> {
        Ok(self.blobs.read().await.contains_key(&(token.clone(), kind)))
    }

    async fn delete(&self, token: &Token, kind: ArtifactKind) -> Result<(), ScError> {
        self.blobs.write().await.remove(&(token.clone(), kind));
        Ok(())
    }

    async fn tokens(&self) -> Result<BTreeSet<Token>, ScError> {
        Ok(self
            .blobs
            .read()
            .await
            .keys()
            .map(|(token, _)| token.clone())
            .collect())
    }

    async fn worker_artifacts(&self, token: &Token) -> Result<WorkerArtifacts, ScError> {
        let blobs = self.blobs.read().await;
        let data = blobs
            .get(&(token.clone(), ArtifactKind::Data))
            .cloned()
            .ok_or_else(|| ScError::ArtifactNotFound(token.to_string()))?;
        let save = blobs.get(&(token.clone(), ArtifactKind::Save)).cloned();

        Ok(WorkerArtifacts {
            data: ArtifactHandle::Inline(data),
            save: save.map(ArtifactHandle::Inline),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_orphans_and_delete_all() {
        let store = InMemoryArtifactStore::new();
        let live = Token::parse("LIVE").unwrap();
        let dead = Token::parse("DEAD").unwrap();

        store.save(&live, ArtifactKind::Data, Bytes::from_static(b"1")).await.unwrap();
        store.save(&dead, ArtifactKind::Data, Bytes::from_static(b"2")).await.unwrap();
        store.save(&dead, ArtifactKind::Save, Bytes::from_static(b"3")).await.unwrap();

        let active: HashSet<Token> = [live.clone()].into_iter().collect();
        assert_eq!(store.list_orphans(&active).await.unwrap(), vec![dead.clone()]);

        store.delete_all(&dead).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(store.list_orphans(&active).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_artifacts_inline_save_only_when_present() {
        let store = InMemoryArtifactStore::new();
        let token = Token::parse("SAVE").unwrap();
        store.save(&token, ArtifactKind::Data, Bytes::from_static(b"d")).await.unwrap();

        let artifacts = store.worker_artifacts(&token).await.unwrap();
        assert_eq!(artifacts.data, ArtifactHandle::Inline(Bytes::from_static(b"d")));
        assert!(artifacts.save.is_none());

        store.save(&token, ArtifactKind::Save, Bytes::from_static(b"s")).await.unwrap();
        let artifacts = store.worker_artifacts(&token).await.unwrap();
        assert_eq!(artifacts.save, Some(ArtifactHandle::Inline(Bytes::from_static(b"s"))));
    }
}
