//! # Network Listener Module
//!
//! This module binds one TCP listener per enabled service and runs an accept loop for each of
//! them. Every accepted socket is handed to [`serve_connection`] on its own task, tagged with the
//! service it was accepted on.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌──────────────────────┐
//! │ Incoming        │───▶│ ListenerManager  │───▶│ serve_connection     │
//! │ Connections     │    │                  │    │ (one task per socket)│
//! └─────────────────┘    │ - one loop/port  │    └──────────────────────┘
//!                        │ - session bound  │
//!                        │ - shutdown/grace │
//!                        └──────────────────┘
//! ```
//!
//! A port that cannot be bound is logged and skipped; the other services keep running.

use crate::configuration::types::{ServiceConfig, ServiceKind};
use crate::error_handling::types::NetworkError;
use crate::network::dwell_controller::wait_for_shutdown;
use crate::protocols::{serve_connection, HandlerContext};
use log::{error, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Pending connections queued by the kernel per listener
const BACKLOG: u32 = 1024;

/// Pause after a failed `accept`, so descriptor exhaustion does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Owns the bound listeners of every service and drives their accept loops.
///
/// `ListenerManager` is responsible for:
/// - Binding one socket per enabled service on the configured address
/// - Bounding the number of concurrent sessions per service
/// - Stopping the accept loops on shutdown and draining the remaining sessions
pub struct ListenerManager {
    /// Shared context cloned into every session
    ctx: HandlerContext,

    /// Bound listeners with the service they serve
    listeners: Vec<(ServiceConfig, TcpListener)>,

    /// Concurrent sessions allowed per service
    max_sessions: usize,

    /// Time given to running sessions after shutdown before they are aborted
    grace: Duration,
}

impl ListenerManager {
    /// Creates a manager with no bound listener.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Context handed to every session
    /// * `max_sessions` - Concurrent sessions allowed per service
    /// * `grace` - Drain time after shutdown
    pub fn new(ctx: HandlerContext, max_sessions: usize, grace: Duration) -> Self {
        Self {
            ctx,
            listeners: Vec::new(),
            max_sessions,
            grace,
        }
    }

    /// Binds a listener for each service on `bind_ip`.
    ///
    /// Services whose port cannot be bound are logged at error level and skipped.
    ///
    /// # Returns
    ///
    /// The number of services now listening.
    pub fn bind_services(&mut self, bind_ip: IpAddr, services: &[ServiceConfig]) -> usize {
        for service in services {
            let addr = SocketAddr::new(bind_ip, service.port);
            match bind(addr) {
                Ok(listener) => {
                    info!("[{}] listening on {}", service.kind, addr);
                    self.listeners.push((service.clone(), listener));
                }
                Err(err) => {
                    error!("[{}] unable to listen on {}: {}", service.kind, addr, err);
                }
            }
        }
        self.listeners.len()
    }

    /// Actual bound addresses, useful when ports were requested as `0`.
    pub fn local_addrs(&self) -> Vec<(ServiceKind, SocketAddr)> {
        self.listeners
            .iter()
            .filter_map(|(service, listener)| {
                listener.local_addr().ok().map(|addr| (service.kind, addr))
            })
            .collect()
    }

    /// Runs every accept loop until shutdown is requested and the sessions are drained.
    pub async fn run(self) {
        let mut loops = JoinSet::new();
        for (service, listener) in self.listeners {
            loops.spawn(accept_loop(
                self.ctx.clone(),
                service,
                listener,
                self.max_sessions,
                self.grace,
            ));
        }
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!("accept loop ended abnormally: {}", e);
            }
        }
        info!("all listeners stopped");
    }
}

fn bind(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(NetworkError::SockError)?;
    socket.set_reuseaddr(true).map_err(NetworkError::SockError)?;
    socket.bind(addr).map_err(NetworkError::BindError)?;
    socket.listen(BACKLOG).map_err(NetworkError::BindError)
}

async fn accept_loop(
    ctx: HandlerContext,
    service: ServiceConfig,
    listener: TcpListener,
    max_sessions: usize,
    grace: Duration,
) {
    let permits = Arc::new(Semaphore::new(max_sessions));
    let mut sessions = JoinSet::new();
    let mut shutdown = ctx.shutdown.clone();
    let local_port = listener
        .local_addr()
        .map(|addr| addr.port())
        .unwrap_or(service.port);

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    error!("[{}] session task failed: {}", service.kind, e);
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("[{}] accept failed: {}", service.kind, e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    warn!(
                        "[{}] session limit of {} reached, dropping {}",
                        service.kind, max_sessions, peer
                    );
                    continue;
                };
                let ctx = ctx.clone();
                let service = service.clone();
                sessions.spawn(async move {
                    serve_connection(ctx, service, stream, peer, local_port).await;
                    drop(permit);
                });
            }
        }
    }
    drop(listener);

    if sessions.is_empty() {
        return;
    }
    info!(
        "[{}] waiting up to {:?} for {} session(s)",
        service.kind,
        grace,
        sessions.len()
    );
    let drain = async { while sessions.join_next().await.is_some() {} };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(
            "[{}] aborting {} session(s) after grace period",
            service.kind,
            sessions.len()
        );
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
}
