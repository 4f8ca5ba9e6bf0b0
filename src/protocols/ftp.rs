//! Minimal FTP control channel. No data connection is ever opened.

use super::line_buffer::LineReader;
use super::HandlerContext;
use crate::error_handling::types::NetworkError;
use crate::session_management::recorder::SessionRecorder;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_BANNER: &str = "220 Welcome to FTP server";

/// Reply for one control command, and whether the conversation ends after it.
fn reply(verb: &str, logged_in: &mut bool) -> (&'static str, bool) {
    match verb {
        "USER" => ("331 Password required\r\n", false),
        "PASS" => {
            *logged_in = true;
            ("230 Login successful\r\n", false)
        }
        "PWD" | "XPWD" => ("257 \"/home/admin\"\r\n", false),
        "SYST" | "FEAT" | "TYPE" | "PASV" | "PORT" | "NOOP" => ("200 OK\r\n", false),
        "LIST" | "NLST" => (
            "150 Here comes the directory listing\r\n226 Directory send OK\r\n",
            false,
        ),
        "CWD" | "CDUP" | "MKD" | "RMD" => ("250 OK\r\n", false),
        "STOR" => ("226 Transfer complete\r\n", false),
        "RETR" | "DELE" => ("550 Failed\r\n", false),
        "QUIT" => ("221 Goodbye\r\n", true),
        _ => ("502 Command not implemented\r\n", false),
    }
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
    let banner = banner.unwrap_or(DEFAULT_BANNER).trim_end();
    stream.write_all(format!("{}\r\n", banner).as_bytes()).await?;

    let mut reader = LineReader::new(ctx.read_timeout);
    let mut logged_in = false;

    while let Some(line) = reader.next_line(stream).await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        recorder.command(line).await;

        let verb = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let (response, done) = reply(&verb, &mut logged_in);
        debug!(
            "[Session: {}] ftp {} (logged in: {})",
            recorder.session_id(),
            verb,
            logged_in
        );
        stream.write_all(response.as_bytes()).await?;
        if done {
            break;
        }
    }
    stream.flush().await?;
    Ok(())
}
