// Author: Lukas Bower
// Purpose: Newline-delimited framing for stream transports.

//! Line framing for envelopes carried over stream sockets.
//!
//! JSON never contains a raw newline, so `\n` is a safe terminator.

use std::io::{self, BufRead, Read, Write};

use thiserror::Error;

use crate::types::MAX_FRAME_LEN;

/// Errors surfaced while reading a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Underlying stream failed or timed out.
    #[error("frame i/o failed: {0}")]
    Io(#[from] io::Error),
    /// Peer sent more than [`MAX_FRAME_LEN`] bytes without a terminator.
    #[error("frame exceeds {limit} bytes")]
    TooLarge {
        /// Maximum accepted frame length.
        limit: usize,
    },
}

impl FrameError {
    /// True when the read failed because the socket timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}

/// Write one payload followed by the frame terminator.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(payload)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Read one frame, returning `Ok(None)` on a clean end of stream.
///
/// A trailing `\r` is stripped. Bytes left at end of stream without a
/// terminator are returned as a final frame.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError> {
    let mut frame = Vec::new();
    // Room for a full-size payload plus its `\r\n` terminator.
    let limit = MAX_FRAME_LEN as u64 + 2;
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut frame)?;
    if read == 0 {
        return Ok(None);
    }
    if frame.last() == Some(&b'\n') {
        frame.pop();
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }
    }
    if frame.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            limit: MAX_FRAME_LEN,
        });
    }
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_consecutive_frames() {
        let mut reader = Cursor::new(b"{\"a\":1}\n{\"b\":2}\r\ntrailing".to_vec());
        assert_eq!(read_frame(&mut reader).unwrap().unwrap(), b"{\"a\":1}");
        assert_eq!(read_frame(&mut reader).unwrap().unwrap(), b"{\"b\":2}");
        assert_eq!(read_frame(&mut reader).unwrap().unwrap(), b"trailing");
        assert!(read_frame(&mut reader).unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_frames() {
        let mut payload = vec![b'x'; MAX_FRAME_LEN + 10];
        payload.push(b'\n');
        let mut reader = Cursor::new(payload);
        let err = read_frame(&mut reader).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { limit } if limit == MAX_FRAME_LEN));
    }

    #[test]
    fn accepts_frame_at_the_limit() {
        let mut payload = vec![b'x'; MAX_FRAME_LEN];
        payload.push(b'\n');
        let mut reader = Cursor::new(payload);
        assert_eq!(read_frame(&mut reader).unwrap().unwrap().len(), MAX_FRAME_LEN);
    }

    #[test]
    fn accepts_crlf_frame_at_the_limit() {
        let mut payload = vec![b'x'; MAX_FRAME_LEN];
        payload.extend_from_slice(b"\r\n{}\n");
        let mut reader = Cursor::new(payload);
        assert_eq!(read_frame(&mut reader).unwrap().unwrap().len(), MAX_FRAME_LEN);
        assert_eq!(read_frame(&mut reader).unwrap().unwrap(), b"{}");
    }

    #[test]
    fn rejects_frame_one_byte_over_the_limit() {
        let mut payload = vec![b'x'; MAX_FRAME_LEN + 1];
        payload.push(b'\n');
        let mut reader = Cursor::new(payload);
        assert!(matches!(
            read_frame(&mut reader),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn write_frame_terminates_payload() {
        let mut out = Vec::new();
        write_frame(&mut out, b"{}").unwrap();
        assert_eq!(out, b"{}\n");
    }

    #[test]
    fn timeout_detection() {
        let err = FrameError::Io(io::Error::new(io::ErrorKind::WouldBlock, "idle"));
        assert!(err.is_timeout());
        let err = FrameError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(!err.is_timeout());
    }
}
