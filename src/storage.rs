//! Storage subsystem
//!
//! This module provides the append-only Event Store where connections and captured commands
//! are persisted.
//!
//! Components:
//! - `storage_trait`: the `EventStore` trait defining a uniform API.
//! - `types`: records written and read by every backend.
//! - `database_storage`: ORM-based SQLite implementation using SeaORM.
//! - `memory_storage`: volatile implementation for dry runs and tests.
//! - `connection_filter`: criteria for reading connections back.
//! - `db_entities`: SeaORM entity models for the database backend.

pub mod connection_filter;
pub mod database_storage;
pub mod db_entities;
pub mod memory_storage;
pub mod storage_trait;
pub mod types;

pub use connection_filter::ConnectionFilter;
pub use database_storage::DatabaseStorage;
pub use memory_storage::MemoryStorage;
pub use storage_trait::EventStore;
