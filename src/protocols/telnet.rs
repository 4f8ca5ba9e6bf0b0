//! Telnet emulation: banner, login and password prompts, then the fake shell.

use super::line_buffer::LineReader;
use super::HandlerContext;
use crate::error_handling::types::NetworkError;
use crate::session_management::recorder::SessionRecorder;
use crate::shell::fake_shell::{FakeShell, ShellResponse};
use chrono::Utc;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_BANNER: &str =
    "Welcome to Ubuntu 20.04.1 LTS (GNU/Linux 5.4.0-42-generic x86_64)\r\n";

const IAC: u8 = 0xFF;

/// Removes Telnet option negotiation from a byte stream.
///
/// Every 0xFF byte starts a three byte sequence that is discarded entirely, including when the
/// sequence is split across reads. Of the remaining bytes only printable ASCII, CR and LF are
/// kept.
#[derive(Debug, Default)]
pub struct IacFilter {
    /// Bytes of the current sequence still to discard
    skip: usize,
}

impl IacFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for &byte in data {
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            match byte {
                IAC => self.skip = 2,
                b'\r' | b'\n' | 0x20..=0x7E => out.push(byte),
                _ => {}
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TelnetState {
    Banner,
    LoginPrompt,
    PasswordPrompt,
    Interactive,
    Closed,
}

pub async fn serve<S>(
    stream: &mut S,
    recorder: &SessionRecorder,
    ctx: &HandlerContext,
    banner: Option<&str>,
) -> Result<(), NetworkError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut reader = LineReader::telnet(ctx.read_timeout);
    let shell = FakeShell::new(ctx.filesystem.clone(), ctx.profile);
    let mut state = TelnetState::Banner;

    loop {
        debug!("[Session: {}] telnet state {:?}", recorder.session_id(), state);
        state = match state {
            TelnetState::Banner => {
                stream
                    .write_all(banner.unwrap_or(DEFAULT_BANNER).as_bytes())
                    .await?;
                TelnetState::LoginPrompt
            }
            TelnetState::LoginPrompt => {
                stream.write_all(b"login: ").await?;
                match reader.next_line(stream).await? {
                    Some(user) => {
                        recorder
                            .command(&format!("LOGIN ATTEMPT: USER={}", user.trim()))
                            .await;
                        TelnetState::PasswordPrompt
                    }
                    None => TelnetState::Closed,
                }
            }
            TelnetState::PasswordPrompt => {
                stream.write_all(b"Password: ").await?;
                match reader.next_line(stream).await? {
                    Some(pass) => {
                        recorder
                            .command(&format!("LOGIN ATTEMPT: PASS={}", pass.trim()))
                            .await;
                        let welcome = format!(
                            "\r\nLast login: {} from {}\r\n",
                            Utc::now().format("%a %b %e %H:%M:%S %Y"),
                            recorder.ip()
                        );
                        stream.write_all(welcome.as_bytes()).await?;
                        TelnetState::Interactive
                    }
                    None => TelnetState::Closed,
                }
            }
            TelnetState::Interactive => {
                stream.write_all(shell.prompt().as_bytes()).await?;
                match reader.next_line(stream).await? {
                    None => TelnetState::Closed,
                    Some(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            TelnetState::Interactive
                        } else {
                            recorder.command(line).await;
                            match shell.handle(line) {
                                ShellResponse::Output(out) => {
                                    stream.write_all(out.replace('\n', "\r\n").as_bytes()).await?;
                                    TelnetState::Interactive
                                }
                                ShellResponse::Exit => {
                                    stream.write_all(b"logout\r\n").await?;
                                    TelnetState::Closed
                                }
                            }
                        }
                    }
                }
            }
            TelnetState::Closed => break,
        };
    }
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::line_buffer::LineBuffer;
    use crate::configuration::types::ServiceKind;
    use crate::protocols::tests::{context, recorder_for};
    use crate::storage::storage_trait::EventStore;
    use tokio::io::AsyncReadExt;

    fn decode_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut filter = IacFilter::new();
        let mut lines = LineBuffer::new();
        for chunk in chunks {
            lines.feed(&filter.filter(chunk));
        }
        let mut out = Vec::new();
        while let Some(line) = lines.next_line() {
            out.push(line);
        }
        out
    }

    #[test]
    fn test_iac_sequences_are_removed() {
        let stream = b"\xff\xfb\x01\xff\xfd\x03root\r\n\xff\xfe\x22pass\x00word\r\n";
        assert_eq!(decode_all(&[stream]), vec!["root", "password"]);
    }

    #[test]
    fn test_iac_stripping_ignores_fragmentation() {
        let stream: &[u8] =
            b"\xff\xfb\x18\xff\xfb\x1fadmin\r\n\xff\xfd\x01cat /etc/passwd\r\n\xff\xfc\x03exit\r\n";
        let expected = decode_all(&[stream]);
        assert_eq!(expected, vec!["admin", "cat /etc/passwd", "exit"]);

        for i in 0..=stream.len() {
            for j in i..=stream.len() {
                let chunks = [&stream[..i], &stream[i..j], &stream[j..]];
                assert_eq!(decode_all(&chunks), expected, "split at {} and {}", i, j);
            }
        }
    }

    #[tokio::test]
    async fn test_telnet_session() {
        let (ctx, store) = context(0);
        let recorder = recorder_for(&ctx, ServiceKind::Telnet).await;
        let (mut client, mut server) = tokio::io::duplex(4096);

        let handler = {
            let ctx = ctx.clone();
            let recorder = recorder.clone();
            tokio::spawn(async move { serve(&mut server, &recorder, &ctx, None).await })
        };

        client
            .write_all(b"\xff\xfd\x18root\r\nhunter2\r\nwhoami\r\n\r\nfoobar\r\nexit\r\n")
            .await
            .unwrap();
        handler.await.unwrap().unwrap();

        let mut transcript = String::new();
        client.read_to_string(&mut transcript).await.unwrap();
        assert!(transcript.starts_with(DEFAULT_BANNER));
        assert!(transcript.contains("login: Password: \r\nLast login: "));
        assert!(transcript.contains("admin@ubuntu-server:/home/admin$ admin\r\n"));
        assert!(transcript.contains("foobar: command not found\r\n"));
        assert!(transcript.ends_with("logout\r\n"));

        let commands = store
            .get_commands(recorder.connection_id().unwrap())
            .await
            .unwrap();
        let texts: Vec<&str> = commands.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "LOGIN ATTEMPT: USER=root",
                "LOGIN ATTEMPT: PASS=hunter2",
                "whoami",
                "foobar",
                "exit"
            ]
        );
    }
}
