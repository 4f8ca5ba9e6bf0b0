//! Network subsystem
//!
//! Components:
//! - `read_outcome`: one bounded socket read, as a tagged outcome.
//! - `dwell_controller`: minimum session duration enforcement.
//! - `network_listener`: per-service TCP accept loops.

pub mod dwell_controller;
pub mod network_listener;
pub mod read_outcome;

pub use dwell_controller::DwellController;
pub use network_listener::ListenerManager;
