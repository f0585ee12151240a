//! Length-prefixed message framing over a byte stream.
//!
//! Every frame on the wire is a 4-byte big-endian unsigned length,
//! followed by exactly that many payload bytes. This module knows
//! nothing about what the payload means.

use std::io::{ErrorKind, Read, Write};

use crate::error::FrameError;

/// Protocol-level sanity cap on a single frame's payload size.
///
/// The wire format itself does not bound frame size; this cap rejects
/// runaway length prefixes (malicious or buggy clients) before we try
/// to allocate a buffer for them.
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

const LEN_PREFIX_SIZE: usize = 4;

/// Writes `payload` as one length-prefixed frame.
///
/// Writes the full frame or fails with a transport error; never writes
/// a partial frame on the happy path (a write error may still leave
/// some bytes on the wire, but the caller has no way to retry cleanly
/// at that point and should close the connection).
pub fn send(mut sock: impl Write, payload: &[u8]) -> Result<(), FrameError> {
    let len = payload.len() as u32;
    sock.write_all(&len.to_be_bytes())?;
    sock.write_all(payload)?;
    Ok(())
}

/// Reads one length-prefixed frame.
///
/// Loops over partial reads for both the length prefix and the
/// payload, since the kernel is not required to satisfy a `read` in
/// one syscall. Returns [`FrameError::Closed`] if the peer closes
/// cleanly before any prefix bytes arrive, and [`FrameError::Truncated`]
/// if the stream ends partway through a frame.
pub fn recv(mut sock: impl Read) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; LEN_PREFIX_SIZE];
    match read_exact_or_closed(&mut sock, &mut len_buf)? {
        ReadOutcome::Closed => return Err(FrameError::Closed),
        ReadOutcome::Full => {}
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len, MAX_FRAME_LEN));
    }

    let mut payload = vec![0u8; len as usize];
    match read_exact_or_closed(&mut sock, &mut payload)? {
        ReadOutcome::Closed if len > 0 => return Err(FrameError::Truncated),
        _ => {}
    }

    Ok(payload)
}

enum ReadOutcome {
    /// The buffer was filled completely.
    Full,
    /// The peer closed before a single byte of this read was received.
    Closed,
}

/// Like [`Read::read_exact`], but distinguishes "closed before any
/// bytes arrived" from a genuine mid-read truncation, and retries on
/// `Interrupted`.
fn read_exact_or_closed(sock: &mut impl Read, buf: &mut [u8]) -> Result<ReadOutcome, FrameError> {
    if buf.is_empty() {
        return Ok(ReadOutcome::Full);
    }

    let mut filled = 0;
    while filled < buf.len() {
        match sock.read(&mut buf[filled..]) {
            Ok(0) => {
                return if filled == 0 {
                    Ok(ReadOutcome::Closed)
                } else {
                    Err(FrameError::Truncated)
                };
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    Ok(ReadOutcome::Full)
}
