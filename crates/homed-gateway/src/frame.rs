//! Byte-level framing for the gateway wire protocol.
//!
//! Frames are delimited by a start byte and an end byte; any payload byte
//! that collides with a control byte is escaped. This module has no notion
//! of encryption or JSON — it only turns a byte stream into delimited
//! packets and back.

/// Frame start delimiter.
pub const START: u8 = 0x42;
/// Frame end delimiter.
pub const END: u8 = 0x43;
/// Escape byte: precedes `literal XOR MASK` for any of `{START, END, ESCAPE}`.
pub const ESCAPE: u8 = 0x45;
/// XOR mask applied to an escaped literal byte.
const MASK: u8 = 0x20;

/// Escape `plain` so it can be safely placed between [`START`] and [`END`]
/// bytes: every occurrence of `START`, `END`, or `ESCAPE` is replaced by
/// `ESCAPE` followed by `byte ^ MASK`.
pub fn escape(plain: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(plain.len());
    for &b in plain {
        if b == START || b == END || b == ESCAPE {
            out.push(ESCAPE);
            out.push(b ^ MASK);
        } else {
            out.push(b);
        }
    }
    out
}

/// Error returned when a framed payload contains a byte sequence that is
/// neither a plain byte nor a valid escape pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("escape byte at end of frame with no following literal")]
    DanglingEscape,
    #[error("unescaped control byte {0:#04x} inside frame payload")]
    UnescapedControlByte(u8),
}

/// Reverse of [`escape`]: turn a framed interior payload back into plain
/// bytes. A bare `START` or `END` byte inside the payload (not preceded by
/// `ESCAPE`) is a protocol error — framing guarantees those are always
/// escaped by a correct sender.
pub fn unescape(framed: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(framed.len());
    let mut i = 0;
    while i < framed.len() {
        let b = framed[i];
        if b == ESCAPE {
            let literal = *framed
                .get(i + 1)
                .ok_or(FrameError::DanglingEscape)?;
            out.push(literal ^ MASK);
            i += 2;
        } else if b == START || b == END {
            return Err(FrameError::UnescapedControlByte(b));
        } else {
            out.push(b);
            i += 1;
        }
    }
    Ok(out)
}

/// Scan `buffer` for one complete `START ... END` frame.
///
/// Returns `(Some(interior_bytes), remainder)` if a complete frame was
/// found — `remainder` is everything in `buffer` after the consumed frame
/// (including, notably, a second frame that arrived in the same read).
/// Returns `(None, buffer)` unchanged if no `START` byte or no terminating
/// `END` byte is present yet (an unterminated tail).
pub fn read(buffer: &[u8]) -> (Option<Vec<u8>>, Vec<u8>) {
    let Some(start_idx) = buffer.iter().position(|&b| b == START) else {
        return (None, buffer.to_vec());
    };
    let Some(end_offset) = buffer[start_idx + 1..].iter().position(|&b| b == END) else {
        return (None, buffer.to_vec());
    };
    let end_idx = start_idx + 1 + end_offset;
    let packet = buffer[start_idx + 1..end_idx].to_vec();
    let remainder = buffer[end_idx + 1..].to_vec();
    (Some(packet), remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_unescape_round_trips() {
        let cases: &[&[u8]] = &[
            b"",
            b"hello world",
            &[START],
            &[END],
            &[ESCAPE],
            &[START, END, ESCAPE, START],
            &[0x00, 0xff, 0x41, 0x44],
        ];
        for plain in cases {
            let framed = escape(plain);
            assert_eq!(unescape(&framed).unwrap(), *plain);
        }
    }

    #[test]
    fn read_extracts_one_frame_and_leaves_tail() {
        let plain = b"{\"a\":1}".to_vec();
        let framed = escape(&plain);
        let mut buffer = Vec::new();
        buffer.push(START);
        buffer.extend_from_slice(&framed);
        buffer.push(END);
        let tail = b"partial-next-frame".to_vec();
        buffer.extend_from_slice(&tail);

        let (packet, remainder) = read(&buffer);
        let packet = packet.expect("complete frame");
        assert_eq!(unescape(&packet).unwrap(), plain);
        assert_eq!(remainder, tail);
    }

    #[test]
    fn read_returns_none_on_unterminated_tail() {
        let mut buffer = vec![START];
        buffer.extend_from_slice(&escape(b"incomplete"));
        let (packet, remainder) = read(&buffer);
        assert!(packet.is_none());
        assert_eq!(remainder, buffer);
    }

    #[test]
    fn read_returns_none_without_start_byte() {
        let buffer = vec![0x01, 0x02, 0x03];
        let (packet, remainder) = read(&buffer);
        assert!(packet.is_none());
        assert_eq!(remainder, buffer);
    }

    #[test]
    fn unescape_rejects_bare_control_byte() {
        let bad = vec![0x01, START, 0x02];
        assert_eq!(unescape(&bad), Err(FrameError::UnescapedControlByte(START)));
    }

    #[test]
    fn unescape_rejects_dangling_escape() {
        let bad = vec![0x01, ESCAPE];
        assert_eq!(unescape(&bad), Err(FrameError::DanglingEscape));
    }
}
