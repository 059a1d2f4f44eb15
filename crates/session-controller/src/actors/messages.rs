//! Actor message types.

use crate::allocation::Token;
use crate::channels::{GroupSummary, ReadyReport, RoomSystem};
use crate::errors::ScError;
use crate::presence::{PresenceEvent, PresenceOutcome};
use crate::supervisor::WorkerParams;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{ChannelId, UserId};
use serde::Serialize;
use tokio::sync::oneshot;

type Reply<T> = oneshot::Sender<Result<T, ScError>>;

// ----------------------------------------------------------------------------
// Session registry
// ----------------------------------------------------------------------------

/// Where players connect to a running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEndpoint {
    pub token: Token,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Provisioning,
    Running,
    /// Worker found dead; reported once, then the session is removed.
    Crashed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub token: Token,
    pub host: String,
    /// `None` while provisioning.
    pub port: Option<u16>,
    pub state: SessionState,
    pub params: WorkerParams,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum RegistryMessage {
    Host {
        data: Bytes,
        params: WorkerParams,
        respond_to: Reply<SessionEndpoint>,
    },
    Resume {
        token: Token,
        params: WorkerParams,
        respond_to: Reply<SessionEndpoint>,
    },
    Send {
        token: Token,
        message: String,
        respond_to: Reply<()>,
    },
    End {
        token: Token,
        respond_to: Reply<()>,
    },
    /// Delete artifacts of every token without a live session.
    Purge { respond_to: Reply<usize> },
    Get {
        token: Token,
        respond_to: Reply<SessionInfo>,
    },
    List { respond_to: Reply<Vec<SessionInfo>> },
    /// Stop every worker and exit.
    Shutdown { respond_to: Reply<()> },
}

// ----------------------------------------------------------------------------
// Guild scope
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub enum ScopeMessage {
    /// `respond_to` is `None` for fire-and-forget dispatch.
    Presence {
        event: PresenceEvent,
        respond_to: Option<Reply<PresenceOutcome>>,
    },
    RegisterSystem {
        system: RoomSystem,
        respond_to: Reply<()>,
    },
    /// Returns the number of groups torn down with the system.
    RemoveSystem {
        lobby: ChannelId,
        respond_to: Reply<usize>,
    },
    /// Mark `user` (un)ready in the room owning `channel`.
    SetReady {
        channel: ChannelId,
        user: UserId,
        ready: bool,
        respond_to: Reply<ReadyReport>,
    },
    ReadyCheck {
        channel: ChannelId,
        respond_to: Reply<ReadyReport>,
    },
    SetLocked {
        channel: ChannelId,
        user: UserId,
        locked: bool,
        respond_to: Reply<()>,
    },
    ListGroups { respond_to: Reply<Vec<GroupSummary>> },
}
