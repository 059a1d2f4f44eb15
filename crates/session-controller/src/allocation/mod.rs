//! Identifier and port allocation.
//!
//! - [`identifiers`] - session tokens and per-scope sequence numbers
//! - [`ports`] - worker port leases within a bounded range
//!
//! Nothing here records an allocation on its own behalf. Reservation happens
//! inside the owning actor (session registry, scope actor) or, for ports,
//! inside the allocator's lease set, so a free value is never handed to two
//! callers.

pub mod identifiers;
pub mod ports;

pub use identifiers::{allocate_sequence_number, IdentifierAllocator, Token};
pub use ports::{is_bindable, PortAllocator, PortLease, PortRange};
