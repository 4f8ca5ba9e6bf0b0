//! Session management core module.
//!
//! This module provides the transient session model, the concurrent session registry and the
//! per-connection recorder tying a session to its persisted records.

/// Submodule for per-connection logging and persistence.
pub mod recorder;
/// Submodule for session data structures.
pub mod session;
/// Submodule for the session registry.
pub mod session_manager;

pub use recorder::{RecordingSinks, SessionRecorder};
pub use session::Session;
pub use session_manager::SessionRegistry;
