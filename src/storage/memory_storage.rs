use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

use crate::error_handling::types::StorageError;
use crate::storage::connection_filter::ConnectionFilter;
use crate::storage::storage_trait::EventStore;
use crate::storage::types::{CommandRecord, ConnectionRecord, NewCommand, NewConnection};

#[derive(Default)]
struct Tables {
    connections: Vec<ConnectionRecord>,
    commands: Vec<CommandRecord>,
}

impl Tables {
    /// Connection ids are dense from 1, so id `n` sits at index `n - 1`.
    fn connection_mut(&mut self, id: i64) -> Option<&mut ConnectionRecord> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        self.connections.get_mut(index)
    }
}

/// Volatile event store, used for dry runs and tests.
///
/// Identifiers start at 1 and follow insertion order, like SQLite's rowids.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryStorage {
    async fn record_connection(&self, connection: NewConnection) -> Result<i64, StorageError> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let id = tables.connections.len() as i64 + 1;
        tables
            .connections
            .push(ConnectionRecord::from_new(id, &connection));
        Ok(id)
    }

    async fn record_command(&self, command: NewCommand) -> Result<i64, StorageError> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        if tables.connection_mut(command.connection_id).is_none() {
            return Err(StorageError::NotFound);
        }
        let id = tables.commands.len() as i64 + 1;
        tables.commands.push(CommandRecord::from_new(id, &command));
        Ok(id)
    }

    async fn update_session_duration(
        &self,
        connection_id: i64,
        duration_secs: i64,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        match tables.connection_mut(connection_id) {
            Some(record) => {
                record.session_duration_sec = duration_secs;
                Ok(())
            }
            None => Err(StorageError::NotFound),
        }
    }

    async fn get_connections(
        &self,
        filter: &ConnectionFilter,
    ) -> Result<Vec<ConnectionRecord>, StorageError> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .connections
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn get_commands(&self, connection_id: i64) -> Result<Vec<CommandRecord>, StorageError> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .commands
            .iter()
            .filter(|c| c.connection_id == connection_id)
            .cloned()
            .collect())
    }
}
