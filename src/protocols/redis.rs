//! RESP command decoding and canned Redis replies.

use super::HandlerContext;
use crate::error_handling::types::NetworkError;
use crate::network::read_outcome::{read_with_timeout, ReadOutcome};
use crate::session_management::recorder::SessionRecorder;
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Most elements accepted in one command array
pub const MAX_ELEMENTS: usize = 1024;
/// Largest bulk string accepted
pub const MAX_BULK_LEN: usize = 1024 * 1024;
/// Buffered bytes after which a still incomplete frame is abandoned
const MAX_BUFFERED: usize = 4 * MAX_BULK_LEN;

/// Outcome of trying to parse one frame from the front of the buffer.
enum Frame {
    /// Need more bytes
    Incomplete,
    /// Header was not a valid array header, or an element was malformed
    Malformed,
    /// A full command, plus the number of bytes it spanned
    Command(Vec<String>, usize),
}

/// Incremental decoder for arrays of bulk strings.
#[derive(Debug, Default)]
pub struct RespDecoder {
    buf: Vec<u8>,
}

impl RespDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete command, skipping garbage. Empty arrays are consumed silently.
    pub fn next_command(&mut self) -> Option<Vec<String>> {
        loop {
            if self.buf.is_empty() {
                return None;
            }
            if self.buf[0] != b'*' {
                self.discard_line();
                continue;
            }
            match parse_frame(&self.buf) {
                Frame::Incomplete if self.buf.len() > MAX_BUFFERED => {
                    trace!("abandoning oversized resp frame");
                    self.discard_line();
                }
                Frame::Incomplete => return None,
                Frame::Malformed => {
                    trace!("dropping malformed resp header");
                    self.discard_line();
                }
                Frame::Command(args, used) => {
                    self.buf.drain(..used);
                    if !args.is_empty() {
                        return Some(args);
                    }
                }
            }
        }
    }

    /// Drops everything up to and including the next LF, or the whole buffer if none.
    fn discard_line(&mut self) {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                self.buf.drain(..=pos);
            }
            None => self.buf.clear(),
        }
    }
}

/// Position just past the CRLF terminating the line at `start`, and the line itself.
fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    let pos = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..pos], start + pos + 2))
}

fn parse_len(line: &[u8], prefix: u8, max: usize) -> Option<usize> {
    let (&first, digits) = line.split_first()?;
    if first != prefix {
        return None;
    }
    let n: usize = std::str::from_utf8(digits).ok()?.parse().ok()?;
    (n <= max).then_some(n)
}

fn parse_frame(buf: &[u8]) -> Frame {
    let Some((header, mut pos)) = read_line(buf, 0) else {
        // a header line without its CRLF yet, unless a bare LF already ended it
        return if buf.contains(&b'\n') {
            Frame::Malformed
        } else {
            Frame::Incomplete
        };
    };
    let Some(count) = parse_len(header, b'*', MAX_ELEMENTS) else {
        return Frame::Malformed;
    };

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let Some((len_line, data_start)) = read_line(buf, pos) else {
            return Frame::Incomplete;
        };
        let Some(len) = parse_len(len_line, b'$', MAX_BULK_LEN) else {
            return Frame::Malformed;
        };
        let data_end = data_start + len;
        if buf.len() < data_end + 2 {
            return Frame::Incomplete;
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Frame::Malformed;
        }
        args.push(String::from_utf8_lossy(&buf[data_start..data_end]).into_owned());
        pos = data_end + 2;
    }
    Frame::Command(args, pos)
}

pub fn reply(args: &[String]) -> &'static str {
    match args.first().map(|v| v.to_ascii_uppercase()).as_deref() {
        Some("PING") => "+PONG\r\n",
        _ => "+OK\r\n",
    }
}

pub async fn serve<S>(
    stream: &mut S,
    recorder: &SessionRecorder,
    ctx: &HandlerContext,
) -> Result<(), NetworkError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut decoder = RespDecoder::new();
    let mut chunk = [0u8; 4096];

    loop {
        match read_with_timeout(stream, &mut chunk, ctx.read_timeout).await {
            ReadOutcome::Data(n) => decoder.feed(&chunk[..n]),
            ReadOutcome::Closed => break,
            ReadOutcome::Timeout => return Err(NetworkError::Timeout),
            ReadOutcome::Error(e) => return Err(NetworkError::SockError(e)),
        }

        while let Some(args) = decoder.next_command() {
            let line = args.join(" ");
            recorder.command(&line).await;
            stream.write_all(reply(&args).as_bytes()).await?;

            if args[0].eq_ignore_ascii_case("QUIT") {
                debug!("[Session: {}] redis client quit", recorder.session_id());
                stream.flush().await?;
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::ServiceKind;
    use crate::protocols::tests::{context, recorder_for};
    use crate::storage::storage_trait::EventStore;
    use tokio_test::io::Builder;

    fn encode(args: &[&str]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", args.len()).into_bytes();
        for arg in args {
            out.extend_from_slice(format!("${}\r\n{}\r\n", arg.len(), arg).as_bytes());
        }
        out
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_decoding_survives_any_chunk_size() {
        let args = ["SET", "key", "va\r\nlue", ""];
        let wire = encode(&args);
        for size in 1..=wire.len() {
            let mut decoder = RespDecoder::new();
            let mut decoded = Vec::new();
            for chunk in wire.chunks(size) {
                decoder.feed(chunk);
                while let Some(cmd) = decoder.next_command() {
                    decoded.push(cmd);
                }
            }
            assert_eq!(decoded, vec![strings(&args)], "chunk size {}", size);
        }
    }

    #[test]
    fn test_garbage_is_skipped() {
        let mut decoder = RespDecoder::new();
        decoder.feed(b"PING\r\nhello\n");
        decoder.feed(&encode(&["INFO"]));
        assert_eq!(decoder.next_command(), Some(strings(&["INFO"])));
        assert_eq!(decoder.next_command(), None);
    }

    #[test]
    fn test_malformed_header_is_dropped() {
        let mut decoder = RespDecoder::new();
        decoder.feed(b"*x\r\n*0\r\n*99999999\r\n");
        decoder.feed(&encode(&["KEYS", "*"]));
        assert_eq!(decoder.next_command(), Some(strings(&["KEYS", "*"])));
    }

    #[test]
    fn test_replies() {
        assert_eq!(reply(&strings(&["ping"])), "+PONG\r\n");
        assert_eq!(reply(&strings(&["CONFIG", "SET", "dir", "/tmp"])), "+OK\r\n");
        assert_eq!(reply(&strings(&["FLUSHALL"])), "+OK\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let (ctx, store) = context(0);
        let recorder = recorder_for(&ctx, ServiceKind::Redis).await;
        let mut wire = encode(&["PING"]);
        wire.extend(encode(&["SET", "x", "1"]));
        wire.extend(encode(&["QUIT"]));

        let mut mock = Builder::new()
            .read(&wire)
            .write(b"+PONG\r\n")
            .write(b"+OK\r\n")
            .write(b"+OK\r\n")
            .build();
        serve(&mut mock, &recorder, &ctx).await.unwrap();

        let commands = store
            .get_commands(recorder.connection_id().unwrap())
            .await
            .unwrap();
        let texts: Vec<&str> = commands.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(texts, vec!["PING", "SET x 1", "QUIT"]);
    }
}
