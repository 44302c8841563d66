//! Line framing for the text half of the protocol
//!
//! Command lines, size lines and status lines are all read with
//! [`recv_line`]. The reader pulls one byte at a time so that nothing past
//! the newline is consumed: whatever follows a size line is payload and
//! belongs to the caller. Wrap sockets in a `BufReader` to keep this cheap.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Read a single `\n`-terminated (or EOF-terminated) line.
///
/// At most `max_len - 1` bytes are stored; the newline is kept when it fits.
/// A read error ends the line exactly like EOF does, so the returned buffer
/// holds whatever arrived before the failure. An empty result means the peer
/// sent nothing.
pub async fn recv_line<R>(reader: &mut R, max_len: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let limit = max_len.saturating_sub(1);
    let mut line = Vec::with_capacity(limit.min(128));

    while line.len() < limit {
        match reader.read_u8().await {
            Ok(byte) => {
                line.push(byte);
                if byte == b'\n' {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                trace!("line read stopped after {} bytes: {}", line.len(), e);
                break;
            }
        }
    }

    line
}
