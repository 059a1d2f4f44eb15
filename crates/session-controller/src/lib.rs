//! Session Controller Library
//!
//! Lifecycle manager for hosted game sessions and the chat channel groups
//! players gather in:
//!
//! - Short, unique session tokens and smallest-free channel-group numbers
//! - Port leasing and worker supervision (subprocess or embedded server)
//! - Persisted game artifacts with orphan purging
//! - Presence-driven provisioning and teardown of voice/text channel groups
//!
//! # Architecture
//!
//! ```text
//! SessionCommands ──> SessionRegistry (singleton actor)
//!                     ├── ProcessSupervisor ── PortAllocator
//!                     └── ArtifactStore
//!
//! VoiceStateReactor
//! └── ScopeActor (one per guild) ── ChannelGroupProvisioner ── platform
//! ```
//!
//! # Modules
//!
//! - [`actors`] - registry, per-guild scope actors and the reactor
//! - [`allocation`] - tokens, sequence numbers, ports
//! - [`artifacts`] - artifact storage
//! - [`channels`] - channel-group model and provisioning
//! - [`commands`] - authorized command surface
//! - [`config`] - service configuration from environment
//! - [`errors`] - error types with stable codes
//! - [`routes`] / [`handlers`] - HTTP API

#![warn(clippy::pedantic)]

pub mod actors;
pub mod allocation;
pub mod artifacts;
pub mod channels;
pub mod commands;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod observability;
pub mod presence;
pub mod routes;
pub mod supervisor;
