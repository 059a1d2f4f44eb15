//! Recording mock of the chat platform.
//!
//! Implements both [`ChannelDirectory`] and [`ChannelPermissions`] over an
//! in-memory model of roles, channels, member roles and permission entries.
//! Any operation can be made to fail, immediately or after a number of
//! successful calls, to exercise rollback paths.
//!
//! # Example
//!
//! ```rust,ignore
//! use sc_test_utils::{MockPlatform, PlatformOp};
//!
//! // Second channel creation fails: the first channel and the role must be
//! // rolled back.
//! let platform = MockPlatform::new().with_failure_after(PlatformOp::CreateChannel, 1);
//! ```

use async_trait::async_trait;
use common::{ChannelId, GuildId, RoleId, UserId};
use session_controller::channels::{
    Capabilities, ChannelDirectory, ChannelKind, ChannelPermissions, ChannelSpec, Subject,
};
use session_controller::errors::ScError;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// First id handed out by the mock. Fixture ids stay below this.
const FIRST_PLATFORM_ID: u64 = 1_000_000;

/// Platform operations that can be counted and failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformOp {
    CreateRole,
    DeleteRole,
    CreateChannel,
    DeleteChannel,
    MoveMember,
    AddRole,
    RemoveRole,
    Grant,
    Deny,
    Revoke,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRecord {
    pub guild: GuildId,
    pub name: String,
    pub mentionable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub guild: GuildId,
    pub name: String,
    pub kind: ChannelKind,
    pub parent: Option<ChannelId>,
}

/// One permission entry on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionEntry {
    Allow(Capabilities),
    Deny(Capabilities),
}

#[derive(Debug, Default)]
struct PlatformInner {
    next_id: u64,
    roles: HashMap<RoleId, RoleRecord>,
    channels: HashMap<ChannelId, ChannelRecord>,
    member_roles: HashMap<UserId, BTreeSet<RoleId>>,
    permissions: HashMap<(ChannelId, Subject), PermissionEntry>,
    moves: Vec<(UserId, ChannelId)>,
    calls: HashMap<PlatformOp, usize>,
    /// Remaining successful calls before `op` starts failing.
    failures: HashMap<PlatformOp, usize>,
}

impl PlatformInner {
    fn enter(&mut self, op: PlatformOp) -> Result<(), ScError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op) {
            Some(0) => Err(ScError::Platform(format!("injected {op:?} failure"))),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn next_id(&mut self) -> u64 {
        if self.next_id == 0 {
            self.next_id = FIRST_PLATFORM_ID;
        }
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory chat platform.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    inner: Arc<Mutex<PlatformInner>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call to `op` fails.
    pub fn with_failure(self, op: PlatformOp) -> Self {
        self.fail_after(op, 0);
        self
    }

    /// Calls to `op` succeed `successes` times, then fail.
    pub fn with_failure_after(self, op: PlatformOp, successes: usize) -> Self {
        self.fail_after(op, successes);
        self
    }

    pub fn fail_after(&self, op: PlatformOp, successes: usize) {
        self.inner.lock().unwrap().failures.insert(op, successes);
    }

    pub fn clear_failures(&self) {
        self.inner.lock().unwrap().failures.clear();
    }

    pub fn call_count(&self, op: PlatformOp) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    pub fn channel(&self, channel: ChannelId) -> Option<ChannelRecord> {
        self.inner.lock().unwrap().channels.get(&channel).cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.inner.lock().unwrap().channels.len()
    }

    /// Names of every channel in `guild`, sorted.
    pub fn channel_names(&self, guild: GuildId) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .unwrap()
            .channels
            .values()
            .filter(|c| c.guild == guild)
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Id of the channel called `name`, if it exists.
    pub fn channel_named(&self, name: &str) -> Option<ChannelId> {
        self.inner
            .lock()
            .unwrap()
            .channels
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| *id)
    }

    pub fn role(&self, role: RoleId) -> Option<RoleRecord> {
        self.inner.lock().unwrap().roles.get(&role).cloned()
    }

    pub fn role_count(&self) -> usize {
        self.inner.lock().unwrap().roles.len()
    }

    pub fn role_named(&self, name: &str) -> Option<RoleId> {
        self.inner
            .lock()
            .unwrap()
            .roles
            .iter()
            .find(|(_, r)| r.name == name)
            .map(|(id, _)| *id)
    }

    pub fn roles_of(&self, user: UserId) -> BTreeSet<RoleId> {
        self.inner
            .lock()
            .unwrap()
            .member_roles
            .get(&user)
            .cloned()
            .unwrap_or_default()
    }

    pub fn permission(&self, channel: ChannelId, subject: Subject) -> Option<PermissionEntry> {
        self.inner
            .lock()
            .unwrap()
            .permissions
            .get(&(channel, subject))
            .copied()
    }

    pub fn moves(&self) -> Vec<(UserId, ChannelId)> {
        self.inner.lock().unwrap().moves.clone()
    }

    /// Resolve whether `user` can read `channel`: a user entry wins, then any
    /// allowing role entry, then the everyone entry. Channels without entries
    /// are readable.
    pub fn can_read(&self, channel: ChannelId, user: UserId) -> bool {
        let inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.permissions.get(&(channel, Subject::User(user))) {
            return matches!(entry, PermissionEntry::Allow(c) if c.read);
        }
        let roles = inner.member_roles.get(&user).cloned().unwrap_or_default();
        if roles.iter().any(|role| {
            matches!(
                inner.permissions.get(&(channel, Subject::Role(*role))),
                Some(PermissionEntry::Allow(c)) if c.read
            )
        }) {
            return true;
        }
        !matches!(
            inner.permissions.get(&(channel, Subject::Everyone)),
            Some(PermissionEntry::Deny(c)) if c.read
        )
    }

    /// Whether everyone is denied `connect` on `channel`.
    pub fn is_locked(&self, channel: ChannelId) -> bool {
        matches!(
            self.permission(channel, Subject::Everyone),
            Some(PermissionEntry::Deny(c)) if c.connect
        )
    }

    /// Whether nothing the mock created is left behind.
    pub fn is_clean(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.roles.is_empty() && inner.channels.is_empty()
    }
}

#[async_trait]
impl ChannelDirectory for MockPlatform {
    async fn create_role(
        &self,
        guild: GuildId,
        name: &str,
        mentionable: bool,
    ) -> Result<RoleId, ScError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enter(PlatformOp::CreateRole)?;
        let id = RoleId(inner.next_id());
        inner.roles.insert(
            id,
            RoleRecord {
                guild,
                name: name.to_string(),
                mentionable,
            },
        );
        Ok(id)
    }

    async fn delete_role(&self, _guild: GuildId, role: RoleId) -> Result<(), ScError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enter(PlatformOp::DeleteRole)?;
        inner.roles.remove(&role);
        for roles in inner.member_roles.values_mut() {
            roles.remove(&role);
        }
        inner
            .permissions
            .retain(|(_, subject), _| *subject != Subject::Role(role));
        Ok(())
    }

    async fn create_channel(
        &self,
        guild: GuildId,
        spec: &ChannelSpec,
    ) -> Result<ChannelId, ScError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enter(PlatformOp::CreateChannel)?;
        let id = ChannelId(inner.next_id());
        inner.channels.insert(
            id,
            ChannelRecord {
                guild,
                name: spec.name.clone(),
                kind: spec.kind,
                parent: spec.parent,
            },
        );
        Ok(id)
    }

    async fn delete_channel(&self, _guild: GuildId, channel: ChannelId) -> Result<(), ScError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enter(PlatformOp::DeleteChannel)?;
        inner.channels.remove(&channel);
        inner.permissions.retain(|(id, _), _| *id != channel);
        Ok(())
    }

    async fn move_member(
        &self,
        _guild: GuildId,
        user: UserId,
        channel: ChannelId,
    ) -> Result<(), ScError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enter(PlatformOp::MoveMember)?;
        if !inner.channels.contains_key(&channel) {
            return Err(ScError::Platform(format!("unknown channel {channel}")));
        }
        inner.moves.push((user, channel));
        Ok(())
    }

    async fn add_role(&self, _guild: GuildId, user: UserId, role: RoleId) -> Result<(), ScError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enter(PlatformOp::AddRole)?;
        if !inner.roles.contains_key(&role) {
            return Err(ScError::Platform(format!("unknown role {role}")));
        }
        inner.member_roles.entry(user).or_default().insert(role);
        Ok(())
    }

    async fn remove_role(
        &self,
        _guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<(), ScError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enter(PlatformOp::RemoveRole)?;
        if let Some(roles) = inner.member_roles.get_mut(&user) {
            roles.remove(&role);
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelPermissions for MockPlatform {
    async fn grant(
        &self,
        _guild: GuildId,
        channel: ChannelId,
        subject: Subject,
        capabilities: Capabilities,
    ) -> Result<(), ScError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enter(PlatformOp::Grant)?;
        inner
            .permissions
            .insert((channel, subject), PermissionEntry::Allow(capabilities));
        Ok(())
    }

    async fn deny(
        &self,
        _guild: GuildId,
        channel: ChannelId,
        subject: Subject,
        capabilities: Capabilities,
    ) -> Result<(), ScError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enter(PlatformOp::Deny)?;
        inner
            .permissions
            .insert((channel, subject), PermissionEntry::Deny(capabilities));
        Ok(())
    }

    async fn revoke(
        &self,
        _guild: GuildId,
        channel: ChannelId,
        subject: Subject,
    ) -> Result<(), ScError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enter(PlatformOp::Revoke)?;
        inner.permissions.remove(&(channel, subject));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId(1);

    #[tokio::test]
    async fn test_failure_after_successes() {
        let platform = MockPlatform::new().with_failure_after(PlatformOp::CreateRole, 1);

        assert!(platform.create_role(GUILD, "one", false).await.is_ok());
        assert!(matches!(
            platform.create_role(GUILD, "two", false).await,
            Err(ScError::Platform(_))
        ));
        assert_eq!(platform.call_count(PlatformOp::CreateRole), 2);
        assert_eq!(platform.role_count(), 1);
    }

    #[tokio::test]
    async fn test_can_read_resolution() {
        let platform = MockPlatform::new();
        let user = UserId(7);
        let spec = ChannelSpec {
            name: "game-room-1".to_string(),
            kind: ChannelKind::Text,
            parent: None,
        };
        let text = platform.create_channel(GUILD, &spec).await.unwrap();
        let role = platform.create_role(GUILD, "Game Room 1", true).await.unwrap();

        assert!(platform.can_read(text, user));

        platform
            .deny(GUILD, text, Subject::Everyone, Capabilities::READ)
            .await
            .unwrap();
        platform
            .grant(GUILD, text, Subject::Role(role), Capabilities::READ_WRITE)
            .await
            .unwrap();
        assert!(!platform.can_read(text, user));

        platform.add_role(GUILD, user, role).await.unwrap();
        assert!(platform.can_read(text, user));

        platform.delete_role(GUILD, role).await.unwrap();
        assert!(!platform.can_read(text, user));
    }
}
