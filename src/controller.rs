//! Top-level orchestration: builds every subsystem from the configuration and runs the listeners
//! until shutdown.

pub mod controller_handler;

pub use controller_handler::Controller;
