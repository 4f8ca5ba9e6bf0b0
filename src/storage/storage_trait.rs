//! Event Store trait
//!
//! This module defines the `EventStore` trait, the append-only persistence interface shared by
//! every protocol handler.
//!
//! Implementors of this trait are responsible for:
//! - Creating one connection record per accepted socket
//! - Appending command records that reference an existing connection
//! - Setting the final session duration exactly once
//!
//! Every write must be durable when the returned future resolves. Implementations are shared
//! between all concurrently running sessions and must serialize writes internally.

use crate::error_handling::types::StorageError;
use crate::storage::connection_filter::ConnectionFilter;
use crate::storage::types::{CommandRecord, ConnectionRecord, NewCommand, NewConnection};
use async_trait::async_trait;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists a new connection and returns its identifier.
    async fn record_connection(&self, connection: NewConnection) -> Result<i64, StorageError>;

    /// Appends a command to an existing connection.
    ///
    /// Fails with `StorageError::NotFound` when `command.connection_id` is unknown.
    async fn record_command(&self, command: NewCommand) -> Result<i64, StorageError>;

    /// Sets `session_duration_sec` on a connection.
    async fn update_session_duration(
        &self,
        connection_id: i64,
        duration_secs: i64,
    ) -> Result<(), StorageError>;

    /// Retrieves connections in insertion order, optionally filtered.
    async fn get_connections(
        &self,
        filter: &ConnectionFilter,
    ) -> Result<Vec<ConnectionRecord>, StorageError>;

    /// Retrieves the commands of one connection in the order they were recorded.
    async fn get_commands(&self, connection_id: i64) -> Result<Vec<CommandRecord>, StorageError>;
}
