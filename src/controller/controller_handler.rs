use crate::configuration::config::Config;
use crate::configuration::types::{ServiceKind, StorageBackend};
use crate::enrichment::classifier::AttackClassifier;
use crate::enrichment::geolocation;
use crate::error_handling::types::*;
use crate::network::dwell_controller::wait_for_shutdown;
use crate::network::network_listener::ListenerManager;
use crate::protocols::{ssh, HandlerContext};
use crate::session_management::recorder::RecordingSinks;
use crate::session_management::session_manager::SessionRegistry;
use crate::storage::database_storage::DatabaseStorage;
use crate::storage::memory_storage::MemoryStorage;
use crate::storage::storage_trait::EventStore;
use log::{debug, error, info};
use russh::keys::{Algorithm, PrivateKey};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Owns the bound listeners and the shutdown signal of a running honeypot.
pub struct Controller {
    pub config: Config,
    manager: ListenerManager,
    registry: Arc<SessionRegistry>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Controller {
    /// Builds every subsystem from `config` and binds the enabled services.
    ///
    /// Fails when the configuration is invalid, the event store cannot be opened, or not a single
    /// service could be bound.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        let bind_ip = config.bind_ip()?;

        let store: Arc<dyn EventStore> = match config.storage.backend {
            StorageBackend::Sqlite => {
                info!("Opening event store at {}", config.storage.database_url);
                Arc::new(DatabaseStorage::connect(&config.storage.database_url).await?)
            }
            StorageBackend::Memory => {
                info!("Using in-memory event store, records are lost on exit");
                Arc::new(MemoryStorage::new())
            }
        };

        let classifier = AttackClassifier::from_path(config.classifier.model_path.as_deref());
        debug!("Attack classifier loaded: {}", classifier.is_loaded());
        let registry = Arc::new(SessionRegistry::new());
        let sinks = RecordingSinks {
            store,
            registry: registry.clone(),
            classifier: Arc::new(classifier),
            geolocator: Arc::from(geolocation::from_settings(&config.geolocation)),
        };

        let host_key = PrivateKey::random(&mut rand_core::OsRng, Algorithm::Ed25519)
            .map_err(|e| ControllerError::InitializationFailed(format!("ssh host key: {}", e)))?;
        let read_timeout = Duration::from_secs(config.session.read_timeout_secs);
        let ssh_config = Arc::new(ssh::server_config(host_key, read_timeout));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let ctx = HandlerContext::new(&config, sinks, ssh_config, shutdown_rx);
        let mut manager = ListenerManager::new(
            ctx,
            config.max_sessions,
            Duration::from_secs(config.session.shutdown_grace_secs),
        );

        let services: Vec<_> = config.enabled_services().cloned().collect();
        if manager.bind_services(bind_ip, &services) == 0 {
            return Err(ControllerError::InitializationFailed(
                "no service could be bound".to_string(),
            ));
        }

        Ok(Self {
            config,
            manager,
            registry,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn local_addrs(&self) -> Vec<(ServiceKind, SocketAddr)> {
        self.manager.local_addrs()
    }

    /// Sender that stops the controller when `true` is sent.
    pub fn shutdown_handle(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.shutdown)
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.get_active_session_count()
    }

    /// Serves until Ctrl-C or a shutdown request, then drains the sessions.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("[+] Controller running");
        let Self {
            manager,
            registry,
            shutdown,
            ..
        } = self;
        let mut requested = shutdown.subscribe();
        let mut listeners = tokio::spawn(manager.run());

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Unable to listen for the shutdown signal: {}", e);
                }
                info!("[+] Shutdown requested");
            }
            _ = wait_for_shutdown(&mut requested) => {
                info!("[+] Shutdown requested");
            }
            joined = &mut listeners => {
                return joined.map_err(|e| ControllerError::InitializationFailed(e.to_string()));
            }
        }

        shutdown.send_replace(true);
        info!(
            "[+] Stopping listeners, {} session(s) still open",
            registry.get_active_session_count()
        );
        listeners
            .await
            .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        info!("[+] Controller stopped");
        Ok(())
    }
}
