use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Result of one bounded socket read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n > 0` bytes were read into the buffer
    Data(usize),
    /// Nothing arrived before the deadline
    Timeout,
    /// The peer closed its side cleanly
    Closed,
    Error(io::Error),
}

pub async fn read_with_timeout<R>(reader: &mut R, buf: &mut [u8], limit: Duration) -> ReadOutcome
where
    R: AsyncRead + Unpin + ?Sized,
{
    match tokio::time::timeout(limit, reader.read(buf)).await {
        Err(_) => ReadOutcome::Timeout,
        Ok(Ok(0)) => ReadOutcome::Closed,
        Ok(Ok(n)) => ReadOutcome::Data(n),
        Ok(Err(e)) => ReadOutcome::Error(e),
    }
}
