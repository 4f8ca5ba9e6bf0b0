//! One-shot HTTP responder: read the request head, record it, answer a static page.

use super::HandlerContext;
use crate::error_handling::types::NetworkError;
use crate::network::read_outcome::{read_with_timeout, ReadOutcome};
use crate::session_management::recorder::SessionRecorder;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Largest request head read before answering anyway
pub const MAX_REQUEST_HEAD: usize = 8192;

const MAX_USER_AGENT: usize = 200;

pub const MAINTENANCE_PAGE: &str = "<html><head><title>Welcome</title></head><body><h1>Welcome</h1><p>Server is under maintenance.</p></body></html>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub user_agent: String,
}

impl RequestHead {
    pub fn parse(raw: &str) -> Self {
        let mut lines = raw.lines();
        let mut request_line = lines.next().unwrap_or_default().split_whitespace();
        let method = request_line.next().unwrap_or("UNKNOWN").to_string();
        let path = request_line.next().unwrap_or("/").to_string();

        let user_agent = lines
            .filter_map(|l| l.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("user-agent"))
            .map(|(_, value)| value.trim().chars().take(MAX_USER_AGENT).collect())
            .unwrap_or_default();

        Self {
            method,
            path,
            user_agent,
        }
    }

    /// Text stored as the captured command.
    pub fn summary(&self) -> String {
        format!("{} {} | User-Agent: {}", self.method, self.path, self.user_agent)
    }
}

fn head_complete(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.windows(2).any(|w| w == b"\n\n")
}

pub fn response(banner: Option<&str>) -> String {
    let body = banner.unwrap_or(MAINTENANCE_PAGE);
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
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
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    while !head_complete(&head) && head.len() < MAX_REQUEST_HEAD {
        match read_with_timeout(stream, &mut chunk, ctx.read_timeout).await {
            ReadOutcome::Data(n) => head.extend_from_slice(&chunk[..n]),
            ReadOutcome::Closed => break,
            ReadOutcome::Timeout => return Err(NetworkError::Timeout),
            ReadOutcome::Error(e) => return Err(NetworkError::SockError(e)),
        }
    }
    if head.is_empty() {
        debug!("[Session: {}] empty http request", recorder.session_id());
        return Ok(());
    }
    head.truncate(MAX_REQUEST_HEAD);

    let request = RequestHead::parse(&String::from_utf8_lossy(&head));
    recorder.command(&request.summary()).await;

    stream.write_all(response(banner).as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
