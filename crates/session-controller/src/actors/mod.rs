//! Actor hierarchy.
//!
//! ```text
//! SessionRegistry (singleton)
//! └── launch tasks (one per host/resume in flight)
//!
//! VoiceStateReactor
//! └── ScopeActor (one per guild)
//! ```
//!
//! Every actor follows the same shape: a cloneable handle wrapping an mpsc
//! sender and a `CancellationToken`; requests carry a oneshot for the reply;
//! the run loop selects over cancellation and the mailbox.

pub mod messages;
pub mod metrics;
pub mod reactor;
pub mod registry;
pub mod scope;

pub use messages::{SessionEndpoint, SessionInfo, SessionState};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use reactor::VoiceStateReactor;
pub use registry::{RegistryConfig, SessionRegistryHandle};
pub use scope::ScopeActorHandle;
