//! Raw TCP catch-all: every received buffer is recorded and acknowledged.

use super::HandlerContext;
use crate::error_handling::types::NetworkError;
use crate::network::read_outcome::{read_with_timeout, ReadOutcome};
use crate::session_management::recorder::SessionRecorder;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_BANNER: &str = "Connected.\r\n";
const ACK: &[u8] = b"ok\r\n";

pub async fn serve<S>(
    stream: &mut S,
    recorder: &SessionRecorder,
    ctx: &HandlerContext,
    banner: Option<&str>,
) -> Result<(), NetworkError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    stream
        .write_all(banner.unwrap_or(DEFAULT_BANNER).as_bytes())
        .await?;

    let mut chunk = [0u8; 4096];
    loop {
        let n = match read_with_timeout(stream, &mut chunk, ctx.read_timeout).await {
            ReadOutcome::Data(n) => n,
            ReadOutcome::Closed => break,
            ReadOutcome::Timeout => return Err(NetworkError::Timeout),
            ReadOutcome::Error(e) => return Err(NetworkError::SockError(e)),
        };
        let text = String::from_utf8_lossy(&chunk[..n]);
        let payload = text.trim_end_matches(['\r', '\n']);
        if !payload.is_empty() {
            recorder.command(payload).await;
        }
        stream.write_all(ACK).await?;
    }
    stream.flush().await?;
    Ok(())
}
