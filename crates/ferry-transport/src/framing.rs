//! Wire framing for byte streams.
//!
//! Two frame shapes share one stream:
//!
//! | Frame | Layout | Used for |
//! |-------|--------|----------|
//! | Control | exactly 256 ASCII bytes, right-padded with `:` | relay banner, room tokens, `pong`, `paired`, errors |
//! | Data | 6 ASCII decimal digits of length, then the payload | protocol messages, PAKE bytes, blocks |
//!
//! Control frames only appear during the relay handshake; once a pair is
//! spliced everything is data frames.

use crate::transport::{TransportError, TransportResult};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width of the decimal length header.
pub const HEADER_LEN: usize = 6;

/// Largest payload a data frame can carry.
pub const MAX_FRAME_SIZE: usize = 999_999;

/// Fixed size of a control frame.
pub const CONTROL_FRAME_SIZE: usize = 256;

const PAD: u8 = b':';

fn eof_as_closed(e: std::io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
            TransportError::Closed
        }
        _ => TransportError::Io(e),
    }
}

/// Write one length-prefixed data frame.
///
/// # Errors
///
/// Returns `TransportError::FrameTooLarge` if the payload exceeds
/// [`MAX_FRAME_SIZE`], otherwise any write error.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> TransportResult<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let header = format!("{:0width$}", payload.len(), width = HEADER_LEN);
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(payload);
    w.write_all(&buf).await.map_err(eof_as_closed)?;
    w.flush().await.map_err(eof_as_closed)
}

/// Read one length-prefixed data frame.
///
/// # Errors
///
/// Returns `TransportError::Closed` on a clean or abrupt end of stream and
/// `TransportError::Malformed` for a non-numeric header.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> TransportResult<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header).await.map_err(eof_as_closed)?;
    let len = parse_header(&header)?;

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await.map_err(eof_as_closed)?;
    Ok(payload)
}

fn parse_header(header: &[u8; HEADER_LEN]) -> TransportResult<usize> {
    if !header.iter().all(u8::is_ascii_digit) {
        return Err(TransportError::Malformed(format!(
            "bad length header {:?}",
            String::from_utf8_lossy(header)
        )));
    }
    Ok(header
        .iter()
        .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0')))
}

/// Right-pad a control string with `:` to [`CONTROL_FRAME_SIZE`] bytes.
///
/// # Errors
///
/// Returns `TransportError::Malformed` if the string is too long, not
/// ASCII, or ends in the padding character.
pub fn pad_control(msg: &str) -> TransportResult<[u8; CONTROL_FRAME_SIZE]> {
    if msg.len() > CONTROL_FRAME_SIZE || !msg.is_ascii() || msg.ends_with(':') {
        return Err(TransportError::Malformed(format!(
            "unencodable control message ({} bytes)",
            msg.len()
        )));
    }
    let mut frame = [PAD; CONTROL_FRAME_SIZE];
    frame[..msg.len()].copy_from_slice(msg.as_bytes());
    Ok(frame)
}

/// Strip the `:` padding from a control frame.
#[must_use]
pub fn unpad_control(frame: &[u8]) -> String {
    let end = frame
        .iter()
        .rposition(|&b| b != PAD)
        .map_or(0, |i| i + 1);
    String::from_utf8_lossy(&frame[..end]).into_owned()
}

/// Write one control frame.
///
/// # Errors
///
/// As [`pad_control`], plus any write error.
pub async fn write_control<W: AsyncWrite + Unpin>(w: &mut W, msg: &str) -> TransportResult<()> {
    let frame = pad_control(msg)?;
    w.write_all(&frame).await.map_err(eof_as_closed)?;
    w.flush().await.map_err(eof_as_closed)
}

/// Read one control frame.
///
/// # Errors
///
/// Returns `TransportError::Closed` if the stream ends first.
pub async fn read_control<R: AsyncRead + Unpin>(r: &mut R) -> TransportResult<String> {
    let mut frame = [0u8; CONTROL_FRAME_SIZE];
    r.read_exact(&mut frame).await.map_err(eof_as_closed)?;
    Ok(unpad_control(&frame))
}
