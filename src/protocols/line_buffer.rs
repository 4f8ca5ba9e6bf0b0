//! Line framing for the line-oriented protocols (Telnet, FTP).

use super::telnet::IacFilter;
use crate::error_handling::types::NetworkError;
use crate::network::read_outcome::{read_with_timeout, ReadOutcome};
use log::trace;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Longest line kept before it is flushed without a terminator
pub const MAX_LINE_LEN: usize = 8192;

/// Accumulates bytes and yields complete lines.
///
/// CR, LF and CRLF all terminate a line; the LF of a CRLF pair is swallowed even when it
/// arrives in a later chunk.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    lines: VecDeque<Vec<u8>>,
    after_cr: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        for &byte in data {
            match byte {
                b'\n' if self.after_cr => {
                    self.after_cr = false;
                }
                b'\r' | b'\n' => {
                    self.after_cr = byte == b'\r';
                    self.lines.push_back(std::mem::take(&mut self.pending));
                }
                _ => {
                    self.after_cr = false;
                    self.pending.push(byte);
                    if self.pending.len() >= MAX_LINE_LEN {
                        self.lines.push_back(std::mem::take(&mut self.pending));
                    }
                }
            }
        }
    }

    pub fn next_line(&mut self) -> Option<String> {
        self.lines
            .pop_front()
            .map(|l| String::from_utf8_lossy(&l).into_owned())
    }

    /// Unterminated trailing bytes, if any.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let rest = std::mem::take(&mut self.pending);
            Some(String::from_utf8_lossy(&rest).into_owned())
        }
    }
}

/// Reads lines from a socket with a per-read timeout.
pub struct LineReader {
    buffer: LineBuffer,
    iac: Option<IacFilter>,
    read_timeout: Duration,
    closed: bool,
}

impl LineReader {
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            buffer: LineBuffer::new(),
            iac: None,
            read_timeout,
            closed: false,
        }
    }

    /// Reader stripping Telnet negotiation before framing.
    pub fn telnet(read_timeout: Duration) -> Self {
        Self {
            iac: Some(IacFilter::new()),
            ..Self::new(read_timeout)
        }
    }

    /// Next line, or `None` once the peer has closed and every buffered line was returned.
    pub async fn next_line<R>(&mut self, reader: &mut R) -> Result<Option<String>, NetworkError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(line) = self.buffer.next_line() {
                return Ok(Some(line));
            }
            if self.closed {
                return Ok(self.buffer.take_remainder());
            }
            match read_with_timeout(reader, &mut chunk, self.read_timeout).await {
                ReadOutcome::Data(n) => {
                    trace!("read {} bytes", n);
                    match self.iac.as_mut() {
                        Some(filter) => self.buffer.feed(&filter.filter(&chunk[..n])),
                        None => self.buffer.feed(&chunk[..n]),
                    }
                }
                ReadOutcome::Closed => self.closed = true,
                ReadOutcome::Timeout => return Err(NetworkError::Timeout),
                ReadOutcome::Error(e) => return Err(NetworkError::SockError(e)),
            }
        }
    }
}
