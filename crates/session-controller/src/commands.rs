//! Session command surface.
//!
//! `SessionCommands` is what the chat command layer and the HTTP API call.
//! It parses user-supplied tokens, asks a [`LifecycleAuthorizer`] whether the
//! acting user may perform the transition, then forwards to the registry.

use crate::actors::{SessionEndpoint, SessionInfo, SessionRegistryHandle};
use crate::allocation::Token;
use crate::errors::ScError;
use crate::supervisor::WorkerParams;
use bytes::Bytes;
use common::UserId;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle transitions subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleAction {
    Host,
    Resume,
    Send,
    End,
    Purge,
    Inspect,
}

impl LifecycleAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleAction::Host => "host",
            LifecycleAction::Resume => "resume",
            LifecycleAction::Send => "send",
            LifecycleAction::End => "end",
            LifecycleAction::Purge => "purge",
            LifecycleAction::Inspect => "inspect",
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether `actor` may perform `action`. `actor` is `None` when the
/// caller did not identify itself.
pub trait LifecycleAuthorizer: Send + Sync {
    /// # Errors
    ///
    /// `PermissionDenied` when the transition is not allowed.
    fn authorize(&self, actor: Option<UserId>, action: LifecycleAction) -> Result<(), ScError>;
}

/// Permits everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl LifecycleAuthorizer for AllowAll {
    fn authorize(&self, _actor: Option<UserId>, _action: LifecycleAction) -> Result<(), ScError> {
        Ok(())
    }
}

/// Restricts `end` and `purge` to a set of operators.
///
/// An empty operator set leaves every action open.
#[derive(Debug, Default, Clone)]
pub struct OperatorPolicy {
    operators: HashSet<UserId>,
}

impl OperatorPolicy {
    pub fn new(operators: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            operators: operators.into_iter().collect(),
        }
    }

    fn restricted(action: LifecycleAction) -> bool {
        matches!(action, LifecycleAction::End | LifecycleAction::Purge)
    }
}

impl LifecycleAuthorizer for OperatorPolicy {
    fn authorize(&self, actor: Option<UserId>, action: LifecycleAction) -> Result<(), ScError> {
        if self.operators.is_empty() || !Self::restricted(action) {
            return Ok(());
        }
        match actor {
            Some(user) if self.operators.contains(&user) => Ok(()),
            _ => {
                warn!(
                    target: "sc.api",
                    actor = ?actor,
                    action = %action,
                    "Lifecycle action denied"
                );
                Err(ScError::PermissionDenied(format!(
                    "Only operators may {action} sessions"
                )))
            }
        }
    }
}

/// Authorized entry point to the session registry.
#[derive(Clone)]
pub struct SessionCommands {
    registry: SessionRegistryHandle,
    authorizer: Arc<dyn LifecycleAuthorizer>,
}

impl SessionCommands {
    pub fn new(registry: SessionRegistryHandle, authorizer: Arc<dyn LifecycleAuthorizer>) -> Self {
        Self {
            registry,
            authorizer,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistryHandle {
        &self.registry
    }

    /// Store `data` under a fresh token and start a worker for it.
    ///
    /// # Errors
    ///
    /// Authorization, allocation and launch errors.
    pub async fn host(
        &self,
        actor: Option<UserId>,
        data: Bytes,
        params: WorkerParams,
    ) -> Result<SessionEndpoint, ScError> {
        self.authorizer.authorize(actor, LifecycleAction::Host)?;
        let endpoint = self.registry.host(data, params).await?;
        info!(
            target: "sc.api",
            actor = ?actor,
            token = %endpoint.token,
            port = endpoint.port,
            "Session hosted"
        );
        Ok(endpoint)
    }

    /// # Errors
    ///
    /// `InvalidToken`, `ArtifactNotFound`, `SessionAlreadyRunning` and launch errors.
    pub async fn resume(
        &self,
        actor: Option<UserId>,
        raw_token: &str,
        params: WorkerParams,
    ) -> Result<SessionEndpoint, ScError> {
        let token = Token::parse(raw_token)?;
        self.authorizer.authorize(actor, LifecycleAction::Resume)?;
        let endpoint = self.registry.resume(token, params).await?;
        info!(target: "sc.api", actor = ?actor, token = %endpoint.token, port = endpoint.port, "Session resumed");
        Ok(endpoint)
    }

    /// # Errors
    ///
    /// `InvalidToken`, `SessionNotFound`, `SessionNotRunning`, `HandleClosed`.
    pub async fn send(&self, actor: Option<UserId>, raw_token: &str, message: String) -> Result<(), ScError> {
        let token = Token::parse(raw_token)?;
        self.authorizer.authorize(actor, LifecycleAction::Send)?;
        self.registry.send(token, message).await
    }

    /// # Errors
    ///
    /// `InvalidToken`, `PermissionDenied`, `SessionNotFound`.
    pub async fn end(&self, actor: Option<UserId>, raw_token: &str) -> Result<(), ScError> {
        let token = Token::parse(raw_token)?;
        self.authorizer.authorize(actor, LifecycleAction::End)?;
        self.registry.end(token.clone()).await?;
        info!(target: "sc.api", actor = ?actor, token = %token, "Session ended");
        Ok(())
    }

    /// Returns the number of tokens whose artifacts were deleted.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` or storage errors.
    pub async fn purge(&self, actor: Option<UserId>) -> Result<usize, ScError> {
        self.authorizer.authorize(actor, LifecycleAction::Purge)?;
        let purged = self.registry.purge().await?;
        info!(target: "sc.api", actor = ?actor, purged, "Artifacts purged");
        Ok(purged)
    }

    /// # Errors
    ///
    /// `InvalidToken`, `SessionNotFound`.
    pub async fn get(&self, actor: Option<UserId>, raw_token: &str) -> Result<SessionInfo, ScError> {
        let token = Token::parse(raw_token)?;
        self.authorizer.authorize(actor, LifecycleAction::Inspect)?;
        self.registry.get(token).await
    }

    /// # Errors
    ///
    /// Only authorization and registry channel failures.
    pub async fn list(&self, actor: Option<UserId>) -> Result<Vec<SessionInfo>, ScError> {
        self.authorizer.authorize(actor, LifecycleAction::Inspect)?;
        self.registry.list().await
    }
}
