//! SSH emulation on top of the `russh` transport.
//!
//! The transport (key exchange, encryption) is handled by `russh`; this module supplies the
//! [`russh::server::Handler`] that records credentials, fakes an interactive shell, and a driver
//! enforcing the handshake deadline and the shutdown signal.

use super::HandlerContext;
use crate::error_handling::types::NetworkError;
use crate::network::dwell_controller::wait_for_shutdown;
use crate::session_management::recorder::SessionRecorder;
use crate::shell::fake_shell::{FakeShell, ShellResponse};
use log::{debug, info, trace, warn};
use russh::keys::{PrivateKey, PublicKey};
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodKind, MethodSet, Pty};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::Instant;

pub const SERVER_ID: &str = "SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.5";
pub const WELCOME: &str = "Welcome to Ubuntu 20.04.1 LTS (GNU/Linux 5.4.0-42-generic x86_64)\r\n";

/// Progress of one SSH conversation. Ordered, so the driver can wait for "at least" a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SshState {
    AwaitingTransport,
    AwaitingAuth,
    AwaitingChannel,
    AwaitingShellRequest,
    Interactive,
    Closed,
}

pub fn server_config(key: PrivateKey, read_timeout: Duration) -> russh::server::Config {
    russh::server::Config {
        server_id: russh::SshId::Standard(SERVER_ID.to_string()),
        inactivity_timeout: Some(read_timeout),
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        methods: MethodSet::from(&[MethodKind::Password, MethodKind::PublicKey][..]),
        keys: vec![key],
        ..Default::default()
    }
}

/// `true` once enough password attempts were made for the login to be let through.
pub fn password_accepted(attempts: u32, accept_after: u32) -> bool {
    attempts >= accept_after
}

/// What the terminal input produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// Bytes to echo back to the client
    Echo(Vec<u8>),
    /// A completed line
    Submit(String),
    /// Ctrl-C
    Interrupt,
    /// Ctrl-D on an empty line
    EndOfInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Escape {
    #[default]
    None,
    Started,
    Csi,
}

/// Line discipline for a raw pty: echo, backspace, Ctrl-C, Ctrl-D.
///
/// Arrow keys and other escape sequences are swallowed.
#[derive(Debug, Default)]
pub struct LineEditor {
    line: Vec<u8>,
    after_cr: bool,
    escape: Escape,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) -> Vec<EditorEvent> {
        let mut events = Vec::new();
        let mut echo = Vec::new();

        for &byte in data {
            match self.escape {
                Escape::Started => {
                    self.escape = if byte == b'[' { Escape::Csi } else { Escape::None };
                    continue;
                }
                Escape::Csi => {
                    if (0x40..=0x7E).contains(&byte) {
                        self.escape = Escape::None;
                    }
                    continue;
                }
                Escape::None => {}
            }

            let was_cr = std::mem::replace(&mut self.after_cr, false);
            match byte {
                0x1B => self.escape = Escape::Started,
                b'\n' if was_cr => {}
                b'\r' | b'\n' => {
                    self.after_cr = byte == b'\r';
                    echo.extend_from_slice(b"\r\n");
                    events.push(EditorEvent::Echo(std::mem::take(&mut echo)));
                    let line = std::mem::take(&mut self.line);
                    events.push(EditorEvent::Submit(
                        String::from_utf8_lossy(&line).into_owned(),
                    ));
                }
                0x7F | 0x08 => {
                    if self.line.pop().is_some() {
                        echo.extend_from_slice(b"\x08 \x08");
                    }
                }
                0x03 => {
                    self.line.clear();
                    flush_echo(&mut events, &mut echo);
                    events.push(EditorEvent::Interrupt);
                }
                0x04 if self.line.is_empty() => {
                    flush_echo(&mut events, &mut echo);
                    events.push(EditorEvent::EndOfInput);
                }
                0x20..=0x7E => {
                    self.line.push(byte);
                    echo.push(byte);
                }
                _ => {}
            }
        }
        flush_echo(&mut events, &mut echo);
        events
    }
}

fn flush_echo(events: &mut Vec<EditorEvent>, echo: &mut Vec<u8>) {
    if !echo.is_empty() {
        events.push(EditorEvent::Echo(std::mem::take(echo)));
    }
}

fn terminal_text(text: &str) -> CryptoVec {
    CryptoVec::from_slice(text.replace('\n', "\r\n").as_bytes())
}

/// Per-connection `russh` handler.
pub struct SshSession {
    recorder: SessionRecorder,
    shell: FakeShell,
    state: watch::Sender<SshState>,
    attempts: u32,
    accept_after: u32,
    editor: LineEditor,
    channel: Option<ChannelId>,
}

impl SshSession {
    pub fn new(
        recorder: SessionRecorder,
        shell: FakeShell,
        state: watch::Sender<SshState>,
        accept_after: u32,
    ) -> Self {
        Self {
            recorder,
            shell,
            state,
            attempts: 0,
            accept_after,
            editor: LineEditor::new(),
            channel: None,
        }
    }

    fn set_state(&self, next: SshState) {
        debug!("[Session: {}] ssh state {:?}", self.recorder.session_id(), next);
        self.state.send_replace(next);
    }

    fn reject() -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(MethodSet::from(&[MethodKind::Password][..])),
            partial_success: false,
        }
    }

    fn logout(&self, channel: ChannelId, session: &mut Session) -> Result<(), russh::Error> {
        session.data(channel, CryptoVec::from_slice(b"logout\r\n"))?;
        session.close(channel)?;
        self.set_state(SshState::Closed);
        Ok(())
    }

    async fn submit(
        &mut self,
        channel: ChannelId,
        line: &str,
        session: &mut Session,
    ) -> Result<(), russh::Error> {
        let line = line.trim();
        if line.is_empty() {
            session.data(channel, CryptoVec::from_slice(self.shell.prompt().as_bytes()))?;
            return Ok(());
        }
        self.recorder.command(line).await;
        match self.shell.handle(line) {
            ShellResponse::Output(out) => {
                session.data(channel, terminal_text(&out))?;
                session.data(channel, CryptoVec::from_slice(self.shell.prompt().as_bytes()))?;
                Ok(())
            }
            ShellResponse::Exit => self.logout(channel, session),
        }
    }
}

impl Handler for SshSession {
    type Error = russh::Error;

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        self.set_state(SshState::AwaitingAuth);
        Ok(Self::reject())
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        trace!("[Session: {}] publickey offered for {}", self.recorder.session_id(), user);
        self.set_state(SshState::AwaitingAuth);
        Ok(Self::reject())
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        self.attempts = self.attempts.saturating_add(1);
        self.recorder
            .command(&format!("LOGIN ATTEMPT: USER={} PASS={}", user, password))
            .await;

        if password_accepted(self.attempts, self.accept_after) {
            info!(
                "[Session: {}] ssh login accepted after {} attempt(s)",
                self.recorder.session_id(),
                self.attempts
            );
            self.set_state(SshState::AwaitingChannel);
            Ok(Auth::Accept)
        } else {
            self.set_state(SshState::AwaitingAuth);
            Ok(Self::reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.channel.is_some() {
            return Ok(false);
        }
        self.channel = Some(channel.id());
        self.set_state(SshState::AwaitingShellRequest);
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        trace!("pty {} {}x{}", term, col_width, row_height);
        session.channel_success(channel)?;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        session.data(channel, CryptoVec::from_slice(WELCOME.as_bytes()))?;
        session.data(channel, CryptoVec::from_slice(self.shell.prompt().as_bytes()))?;
        self.set_state(SshState::Interactive);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        self.set_state(SshState::Interactive);

        let command = String::from_utf8_lossy(data).trim().to_string();
        if !command.is_empty() {
            self.recorder.command(&command).await;
            if let ShellResponse::Output(out) = self.shell.handle(&command) {
                session.data(channel, CryptoVec::from_slice(out.as_bytes()))?;
            }
        }
        session.exit_status_request(channel, 0)?;
        session.close(channel)?;
        self.set_state(SshState::Closed);
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if *self.state.borrow() != SshState::Interactive {
            return Ok(());
        }
        for event in self.editor.feed(data) {
            match event {
                EditorEvent::Echo(bytes) => session.data(channel, CryptoVec::from_slice(&bytes))?,
                EditorEvent::Submit(line) => self.submit(channel, &line, session).await?,
                EditorEvent::Interrupt => {
                    session.data(channel, CryptoVec::from_slice(b"^C\r\n"))?;
                    session.data(channel, CryptoVec::from_slice(self.shell.prompt().as_bytes()))?;
                }
                EditorEvent::EndOfInput => self.logout(channel, session)?,
            }
            if *self.state.borrow() == SshState::Closed {
                break;
            }
        }
        Ok(())
    }
}

/// Resolves once the conversation reached `target`. Stays pending if the handler is gone.
async fn reached(state: &mut watch::Receiver<SshState>, target: SshState) {
    let ok = state.wait_for(|s| *s >= target).await.is_ok();
    if !ok {
        std::future::pending::<()>().await;
    }
}

fn map_session_result(result: Result<(), russh::Error>) -> Result<(), NetworkError> {
    match result {
        Ok(()) | Err(russh::Error::Disconnect) => Ok(()),
        Err(russh::Error::InactivityTimeout) => Err(NetworkError::Timeout),
        Err(russh::Error::IO(e)) => Err(NetworkError::SockError(e)),
        Err(e) => Err(NetworkError::SockError(io::Error::other(e.to_string()))),
    }
}

/// Runs one SSH connection to completion.
///
/// The client must reach an interactive channel within the handshake timeout, after which the
/// session lives until the client leaves, logs out, idles past the read timeout or the process
/// shuts down.
pub async fn serve<S>(
    stream: S,
    recorder: &SessionRecorder,
    ctx: &HandlerContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), NetworkError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (state_tx, mut state_rx) = watch::channel(SshState::AwaitingTransport);
    let handler = SshSession::new(
        recorder.clone(),
        FakeShell::new(ctx.filesystem.clone(), ctx.profile),
        state_tx,
        ctx.ssh_accept_after,
    );

    let deadline = Instant::now() + ctx.handshake_timeout;
    let running = match tokio::time::timeout_at(
        deadline,
        russh::server::run_stream(Arc::clone(&ctx.ssh_config), stream, handler),
    )
    .await
    {
        Err(_) => {
            return Err(NetworkError::HandshakeFailed(
                "no identification received".to_string(),
            ))
        }
        Ok(Err(e)) => return Err(NetworkError::HandshakeFailed(e.to_string())),
        Ok(Ok(running)) => running,
    };
    let handle = running.handle();
    tokio::pin!(running);

    let interactive = tokio::select! {
        result = &mut running => return map_session_result(result),
        _ = reached(&mut state_rx, SshState::Interactive) => true,
        _ = tokio::time::sleep_until(deadline) => {
            warn!(
                "[Session: {}] ssh client did not open a shell within {:?}",
                recorder.session_id(),
                ctx.handshake_timeout
            );
            false
        }
        _ = wait_for_shutdown(&mut shutdown) => false,
    };

    if interactive {
        tokio::select! {
            result = &mut running => return map_session_result(result),
            _ = reached(&mut state_rx, SshState::Closed) => {}
            _ = wait_for_shutdown(&mut shutdown) => {}
        }
    }

    let _ = handle
        .disconnect(
            russh::Disconnect::ByApplication,
            "closed by server".to_string(),
            "en".to_string(),
        )
        .await;
    match tokio::time::timeout(Duration::from_secs(1), &mut running).await {
        Ok(result) => map_session_result(result),
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::{ServiceConfig, ServiceKind};
    use crate::protocols::serve_connection;
    use crate::protocols::tests::{context, recorder_for};
    use crate::storage::connection_filter::ConnectionFilter;
    use crate::storage::storage_trait::EventStore;
    use tokio::io::AsyncReadExt;

    fn submitted(events: &[EditorEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                EditorEvent::Submit(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_editor_echo_and_submit() {
        let mut editor = LineEditor::new();
        let events = editor.feed(b"ls -la\r");
        assert_eq!(
            events,
            vec![
                EditorEvent::Echo(b"ls -la\r\n".to_vec()),
                EditorEvent::Submit("ls -la".to_string()),
            ]
        );
    }

    #[test]
    fn test_editor_crlf_split_across_packets() {
        let mut editor = LineEditor::new();
        let mut events = editor.feed(b"whoami\r");
        events.extend(editor.feed(b"\nid\n"));
        assert_eq!(submitted(&events), vec!["whoami", "id"]);
    }

    #[test]
    fn test_editor_backspace_and_escape() {
        let mut editor = LineEditor::new();
        let mut events = editor.feed(b"cax\x7f");
        events.extend(editor.feed(b"\x1b[At /etc/passwd\r"));
        assert_eq!(submitted(&events), vec!["cat /etc/passwd"]);
        assert!(events.contains(&EditorEvent::Echo(b"cax\x08 \x08".to_vec())));
    }

    #[test]
    fn test_editor_control_keys() {
        let mut editor = LineEditor::new();
        let events = editor.feed(b"rm -rf\x03");
        assert_eq!(events.last(), Some(&EditorEvent::Interrupt));
        assert!(submitted(&editor.feed(b"\r")).iter().all(|l| l.is_empty()));

        // Ctrl-D only ends the session on an empty line
        assert!(!editor.feed(b"ls\x04").contains(&EditorEvent::EndOfInput));
        editor.feed(b"\r");
        assert_eq!(editor.feed(b"\x04"), vec![EditorEvent::EndOfInput]);
    }

    #[test]
    fn test_password_policy() {
        assert!(password_accepted(1, 1));
        assert!(!password_accepted(1, 3));
        assert!(!password_accepted(2, 3));
        assert!(password_accepted(3, 3));
    }

    #[test]
    fn test_state_order() {
        assert!(SshState::Interactive > SshState::AwaitingShellRequest);
        assert!(SshState::Closed > SshState::Interactive);
    }

    #[test]
    fn test_server_config() {
        let key = PrivateKey::random(&mut rand_core::OsRng, russh::keys::Algorithm::Ed25519)
            .unwrap();
        let config = server_config(key, Duration::from_secs(300));
        assert_eq!(config.inactivity_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.keys.len(), 1);
        match config.server_id {
            russh::SshId::Standard(ref id) => assert_eq!(id, SERVER_ID),
            _ => panic!("unexpected server id"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_fails_handshake() {
        let (ctx, _store) = context(0);
        let (mut client, server) = tokio::io::duplex(4096);
        let recorder = recorder_for(&ctx, ServiceKind::Ssh).await;

        let result = serve(server, &recorder, &ctx, ctx.shutdown.clone()).await;
        assert!(matches!(result, Err(NetworkError::HandshakeFailed(_))));

        // the server identification went out before the deadline
        let mut greeting = vec![0u8; SERVER_ID.len()];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, SERVER_ID.as_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_duration_is_flushed() {
        let (ctx, store) = context(0);
        let (_client, server) = tokio::io::duplex(4096);
        let started = Instant::now();

        serve_connection(
            ctx.clone(),
            ServiceConfig::with_defaults(ServiceKind::Ssh),
            server,
            "203.0.113.40:50022".parse().unwrap(),
            2222,
        )
        .await;

        assert!(started.elapsed() >= ctx.handshake_timeout);
        assert_eq!(ctx.sinks.registry.get_active_session_count(), 0);
        let connections = store
            .get_connections(&ConnectionFilter::by_service("ssh"))
            .await
            .unwrap();
        assert_eq!(connections.len(), 1);
        assert!((30..32).contains(&connections[0].session_duration_sec));
        assert!(store.get_commands(connections[0].id).await.unwrap().is_empty());
    }
}
