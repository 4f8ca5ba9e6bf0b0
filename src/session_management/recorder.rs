//! Per-connection event recording.
//!
//! A [`SessionRecorder`] is opened when a socket is accepted and closed once the handler, dwell
//! hold included, has returned. It owns the registry entry and the connection record of that
//! socket, emits the operator log lines and routes every captured command through the
//! classifier and the event store.

use crate::configuration::types::ServiceKind;
use crate::enrichment::classifier::Classifier;
use crate::enrichment::geolocation::GeoLocator;
use crate::session_management::session_manager::SessionRegistry;
use crate::storage::storage_trait::EventStore;
use crate::storage::types::{NewCommand, NewConnection};
use chrono::Utc;
use log::{error, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Shared collaborators a recorder writes to.
#[derive(Clone)]
pub struct RecordingSinks {
    pub store: Arc<dyn EventStore>,
    pub registry: Arc<SessionRegistry>,
    pub classifier: Arc<dyn Classifier>,
    pub geolocator: Arc<dyn GeoLocator>,
}

#[derive(Clone)]
pub struct SessionRecorder {
    sinks: RecordingSinks,
    session_id: String,
    ip: IpAddr,
    service: ServiceKind,
    /// `None` when the connection record could not be written
    connection_id: Option<i64>,
}

impl SessionRecorder {
    pub async fn open(
        sinks: &RecordingSinks,
        peer: SocketAddr,
        local_port: u16,
        service: ServiceKind,
    ) -> Self {
        let ip = peer.ip();
        let session_id = sinks.registry.create_session(ip, service);
        let geo = sinks.geolocator.lookup(ip).await;

        let connection = NewConnection {
            ip: ip.to_string(),
            port: local_port,
            service: service.label().to_string(),
            timestamp: Utc::now(),
            geo,
        };
        let connection_id = match sinks.store.record_connection(connection).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    "[Session: {}] unable to record connection, continuing unlogged: {}",
                    session_id, e
                );
                None
            }
        };

        let recorder = Self {
            sinks: sinks.clone(),
            session_id,
            ip,
            service,
            connection_id,
        };
        recorder.status("connected");
        recorder
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connection_id(&self) -> Option<i64> {
        self.connection_id
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Classifies, logs and persists one captured command. Returns its category.
    pub async fn command(&self, text: &str) -> String {
        let category = self.sinks.classifier.classify(text);
        info!(
            "[Session: {}] [IP: {}] [Service: {}] Command: {}",
            self.session_id, self.ip, self.service, text
        );
        self.sinks.registry.append_command(&self.session_id, text);

        if let Some(connection_id) = self.connection_id {
            let record = NewCommand {
                connection_id,
                ip: self.ip.to_string(),
                service: self.service.label().to_string(),
                command: text.to_string(),
                timestamp: Utc::now(),
                attack_category: Some(category.clone()),
            };
            if let Err(e) = self.sinks.store.record_command(record).await {
                error!(
                    "[Session: {}] unable to record command: {}",
                    self.session_id, e
                );
            }
        }
        category
    }

    /// Flushes the observed duration and releases the registry entry.
    pub async fn close(self, elapsed: Duration) {
        if let Some(connection_id) = self.connection_id {
            let secs = i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX);
            if let Err(e) = self
                .sinks
                .store
                .update_session_duration(connection_id, secs)
                .await
            {
                warn!(
                    "[Session: {}] unable to record session duration: {}",
                    self.session_id, e
                );
            }
        }
        self.status("disconnected");
        self.sinks.registry.end_session(&self.session_id);
    }

    fn status(&self, status: &str) {
        info!(
            "[Session: {}] [IP: {}] [Service: {}] Status: {}",
            self.session_id, self.ip, self.service, status
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::classifier::AttackClassifier;
    use crate::enrichment::geolocation::{DisabledLocator, GeoRecord};
    use crate::error_handling::types::StorageError;
    use crate::storage::connection_filter::ConnectionFilter;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::storage::types::{CommandRecord, ConnectionRecord};
    use async_trait::async_trait;

    struct FixedLocator;

    #[async_trait]
    impl GeoLocator for FixedLocator {
        async fn lookup(&self, _ip: IpAddr) -> Option<GeoRecord> {
            Some(GeoRecord {
                country: Some("Iceland".into()),
                ..Default::default()
            })
        }
    }

    /// Store whose every write fails.
    struct BrokenStore;

    #[async_trait]
    impl EventStore for BrokenStore {
        async fn record_connection(&self, _c: NewConnection) -> Result<i64, StorageError> {
            Err(StorageError::ConnectionFailed)
        }
        async fn record_command(&self, _c: NewCommand) -> Result<i64, StorageError> {
            Err(StorageError::WriteFailed)
        }
        async fn update_session_duration(&self, _id: i64, _d: i64) -> Result<(), StorageError> {
            Err(StorageError::WriteFailed)
        }
        async fn get_connections(
            &self,
            _f: &ConnectionFilter,
        ) -> Result<Vec<ConnectionRecord>, StorageError> {
            Err(StorageError::ReadFailed)
        }
        async fn get_commands(&self, _id: i64) -> Result<Vec<CommandRecord>, StorageError> {
            Err(StorageError::ReadFailed)
        }
    }

    fn sinks(store: Arc<dyn EventStore>, geolocator: Arc<dyn GeoLocator>) -> RecordingSinks {
        RecordingSinks {
            store,
            registry: Arc::new(SessionRegistry::new()),
            classifier: Arc::new(AttackClassifier::unloaded()),
            geolocator,
        }
    }

    #[tokio::test]
    async fn test_recorder_lifecycle() {
        let store = Arc::new(MemoryStorage::new());
        let sinks = sinks(store.clone(), Arc::new(FixedLocator));
        let peer: SocketAddr = "198.51.100.20:40000".parse().unwrap();

        let recorder = SessionRecorder::open(&sinks, peer, 4444, ServiceKind::Nc).await;
        let id = recorder.connection_id().unwrap();
        assert_eq!(sinks.registry.get_active_session_count(), 1);

        assert_eq!(recorder.command("GET / HTTP/1.0").await, "unknown");
        recorder.close(Duration::from_secs(121)).await;
        assert_eq!(sinks.registry.get_active_session_count(), 0);

        let connections = store.get_connections(&ConnectionFilter::default()).await.unwrap();
        assert_eq!(connections[0].ip, "198.51.100.20");
        assert_eq!(connections[0].port, 4444);
        assert_eq!(connections[0].service, "nc");
        assert_eq!(connections[0].country.as_deref(), Some("Iceland"));
        assert_eq!(connections[0].session_duration_sec, 121);

        let commands = store.get_commands(id).await.unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].attack_category.as_deref(), Some("unknown"));
        assert!(commands[0].timestamp >= connections[0].timestamp);
    }

    #[tokio::test]
    async fn test_recorder_degrades_without_storage() {
        let sinks = sinks(Arc::new(BrokenStore), Arc::new(DisabledLocator));
        let peer: SocketAddr = "198.51.100.20:40000".parse().unwrap();

        let recorder = SessionRecorder::open(&sinks, peer, 2121, ServiceKind::Ftp).await;
        assert!(recorder.connection_id().is_none());
        recorder.command("USER root").await;
        let session = sinks.registry.get_session(recorder.session_id()).unwrap();
        assert_eq!(session.command_history, vec!["USER root"]);
        recorder.close(Duration::from_secs(1)).await;
        assert_eq!(sinks.registry.get_active_session_count(), 0);
    }
}
