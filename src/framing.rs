//! CRLF line framing over a byte stream.
//!
//! TCP gives no message boundaries: a single command may arrive split across
//! several reads, and one read may carry several commands. `LineReader`
//! buffers raw bytes and hands back complete `\r\n`-terminated lines with the
//! delimiter stripped.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Initial capacity of the pending buffer.
const BUFFER_SIZE: usize = 4 * 1024;

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Underlying transport read failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A line exceeded the configured maximum length without a terminator.
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Reads complete CRLF-terminated lines from a byte stream.
///
/// Incomplete trailing fragments are kept across reads; lines already
/// buffered are drained before more bytes are requested from the transport.
pub struct LineReader<R> {
    stream: R,
    buffer: BytesMut,
    max_line: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(stream: R, max_line: usize) -> Self {
        LineReader {
            stream,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            max_line,
            eof: false,
        }
    }

    /// Next complete line, without its CRLF terminator.
    ///
    /// Returns `Ok(None)` once the peer closes the connection. A partial
    /// line left in the buffer at close is dropped. A zero-length line (two
    /// consecutive CRLFs) is returned as an empty slice, not skipped.
    pub async fn next_line(&mut self) -> Result<Option<Bytes>, FrameError> {
        loop {
            if let Some(pos) = find_crlf(&self.buffer) {
                if pos > self.max_line {
                    return Err(FrameError::LineTooLong(self.max_line));
                }
                let mut line = self.buffer.split_to(pos + 2);
                line.truncate(pos);
                return Ok(Some(line.freeze()));
            }

            if self.eof {
                return Ok(None);
            }

            // No terminator yet; everything buffered is one pending line,
            // except that its last byte may be the CR half of the delimiter.
            // A fragment of max_line + 1 bytes can still resolve to a line
            // of exactly max_line, so only reject beyond that.
            if self.buffer.len() > self.max_line + 1 {
                return Err(FrameError::LineTooLong(self.max_line));
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                self.eof = true;
            }
        }
    }
}

/// Find the first \r\n in the buffer, returning the offset of the \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(2)
        .position(|window| window == b"\r\n")
}
