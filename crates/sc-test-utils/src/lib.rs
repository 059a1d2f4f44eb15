//! # SC Test Utilities
//!
//! Shared test utilities for the Session Controller (SC).
//!
//! This crate provides mock collaborators and fixtures for isolated SC
//! testing without a chat platform or real game servers.
//!
//! ## Modules
//!
//! - `mock_platform` - Recording chat platform with failure injection
//! - `mock_launcher` - Scriptable worker launcher (ready, hang, exit, port in use)
//! - `fixtures` - Ids, sample artifacts and room systems
//! - `harness` - Fully wired registry, reactor and HTTP router
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let sessions = TestSessions::spawn(MockLauncher::new(), 46_000).await.unwrap();
//!     let endpoint = sessions
//!         .registry()
//!         .host(sample_game_data(), WorkerParams::default())
//!         .await
//!         .unwrap();
//!
//!     let channels = TestChannels::new(Duration::ZERO);
//!     channels.register(single_room_system(LOBBY)).await;
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod mock_launcher;
pub mod mock_platform;

// Re-export commonly used items
pub use fixtures::*;
pub use harness::*;
pub use mock_launcher::*;
pub use mock_platform::*;
