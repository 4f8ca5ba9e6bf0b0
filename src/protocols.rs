//! Protocol handlers and per-connection dispatch.
//!
//! Every accepted socket goes through [`serve_connection`], which opens the session recorder,
//! runs the state machine of the service the socket was accepted on, applies the dwell hold and
//! finally closes the recorder with the observed duration.

/// Submodule for the FTP control channel.
pub mod ftp;
/// Submodule for the one-shot HTTP responder.
pub mod http;
/// Submodule for line framing shared by Telnet and FTP.
pub mod line_buffer;
/// Submodule for the raw TCP catch-all.
pub mod raw;
/// Submodule for RESP decoding.
pub mod redis;
/// Submodule for the SSH handler.
pub mod ssh;
/// Submodule for Telnet.
pub mod telnet;

use crate::configuration::config::Config;
use crate::configuration::types::{OsProfile, ServiceConfig, ServiceKind};
use crate::error_handling::types::NetworkError;
use crate::network::dwell_controller::{wait_for_shutdown, DwellController};
use crate::session_management::recorder::{RecordingSinks, SessionRecorder};
use crate::shell::filesystem::FakeFilesystem;
use log::{debug, error};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::Instant;

/// Everything a protocol handler needs besides its socket.
#[derive(Clone)]
pub struct HandlerContext {
    pub sinks: RecordingSinks,
    pub dwell: DwellController,
    pub filesystem: Arc<FakeFilesystem>,
    pub profile: OsProfile,
    pub read_timeout: Duration,
    pub handshake_timeout: Duration,
    pub ssh_config: Arc<russh::server::Config>,
    pub ssh_accept_after: u32,
    pub shutdown: watch::Receiver<bool>,
}

impl HandlerContext {
    pub fn new(
        config: &Config,
        sinks: RecordingSinks,
        ssh_config: Arc<russh::server::Config>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sinks,
            dwell: DwellController::new(Duration::from_secs(config.session.min_session_secs)),
            filesystem: Arc::new(FakeFilesystem::load()),
            profile: config.shell.profile,
            read_timeout: Duration::from_secs(config.session.read_timeout_secs),
            handshake_timeout: Duration::from_secs(config.session.handshake_timeout_secs),
            ssh_config,
            ssh_accept_after: config.ssh.accept_after_attempts,
            shutdown,
        }
    }
}

/// Runs the conversation of a borrowed-stream protocol.
async fn converse<S>(
    kind: ServiceKind,
    stream: &mut S,
    recorder: &SessionRecorder,
    ctx: &HandlerContext,
    banner: Option<&str>,
) -> Result<(), NetworkError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match kind {
        ServiceKind::Telnet => telnet::serve(stream, recorder, ctx, banner).await,
        ServiceKind::Ftp => ftp::serve(stream, recorder, ctx, banner).await,
        ServiceKind::Http => http::serve(stream, recorder, ctx, banner).await,
        ServiceKind::Redis => redis::serve(stream, recorder, ctx).await,
        ServiceKind::Nc => raw::serve(stream, recorder, ctx, banner).await,
        // served by `ssh::serve`, which takes ownership of the stream
        ServiceKind::Ssh => Ok(()),
    }
}

/// Drives one accepted connection from open to close.
///
/// Transport errors end the conversation and are logged; they never skip the dwell hold nor the
/// final duration update.
pub async fn serve_connection<S>(
    ctx: HandlerContext,
    service: ServiceConfig,
    mut stream: S,
    peer: SocketAddr,
    local_port: u16,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let started = Instant::now();
    let mut shutdown = ctx.shutdown.clone();
    let recorder = SessionRecorder::open(&ctx.sinks, peer, local_port, service.kind).await;

    let result = match service.kind {
        ServiceKind::Ssh => ssh::serve(stream, &recorder, &ctx, shutdown.clone()).await,
        kind => {
            let banner = service.banner_response.as_deref();
            let result = tokio::select! {
                result = converse(kind, &mut stream, &recorder, &ctx, banner) => result,
                _ = wait_for_shutdown(&mut shutdown) => Ok(()),
            };
            if kind.holds_socket() && !ctx.dwell.hold(started, &mut shutdown).await {
                debug!("[Session: {}] hold cut short by shutdown", recorder.session_id());
            }
            drop(stream);
            result
        }
    };

    if let Err(e) = result {
        error!(
            "[Session: {}] [IP: {}] [Service: {}] {}",
            recorder.session_id(),
            peer.ip(),
            service.kind,
            e
        );
    }
    recorder.close(started.elapsed()).await;
}
