//! Byte-at-a-time line assembly for the serial link.

use core::mem;

use heapless::Vec;

use super::ProtocolError;

/// Maximum bytes accepted on one line, excluding the terminator.
pub const MAX_LINE_LEN: usize = 256;

/// Owned copy of one complete line.
pub type Line = Vec<u8, MAX_LINE_LEN>;

/// Accumulates bytes until CR or LF.
///
/// Empty lines are swallowed. A line that outgrows the buffer is discarded up
/// to its terminator and reported once as [`ProtocolError::LineTooLong`].
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Line,
    overflowed: bool,
}

impl LineAssembler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    /// Feeds one byte, returning a finished line when a terminator arrives.
    pub fn push(&mut self, byte: u8) -> Option<Result<Line, ProtocolError>> {
        match byte {
            b'\r' | b'\n' => {
                if mem::take(&mut self.overflowed) {
                    self.buffer.clear();
                    return Some(Err(ProtocolError::LineTooLong));
                }
                if self.buffer.is_empty() {
                    return None;
                }
                Some(Ok(mem::take(&mut self.buffer)))
            }
            _ if self.overflowed => None,
            _ => {
                if self.buffer.push(byte).is_err() {
                    self.overflowed = true;
                    self.buffer.clear();
                }
                None
            }
        }
    }

    /// Drops any partial line.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }

    /// Bytes buffered for the line in progress.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(assembler: &mut LineAssembler, bytes: &[u8]) -> Option<Result<Line, ProtocolError>> {
        let mut last = None;
        for &byte in bytes {
            if let Some(result) = assembler.push(byte) {
                last = Some(result);
            }
        }
        last
    }

    #[test]
    fn completes_on_newline_and_ignores_blank_lines() {
        let mut assembler = LineAssembler::new();
        assert!(feed(&mut assembler, b"\r\n\n").is_none());

        let line = feed(&mut assembler, b"{\"command\":\"stop\"}\r\n").unwrap().unwrap();
        assert_eq!(line.as_slice(), b"{\"command\":\"stop\"}");
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn overflow_is_reported_once_and_resynchronizes() {
        let mut assembler = LineAssembler::new();
        for _ in 0..MAX_LINE_LEN + 10 {
            assert!(assembler.push(b'x').is_none());
        }
        assert_eq!(assembler.push(b'\n'), Some(Err(ProtocolError::LineTooLong)));
        assert!(assembler.push(b'\n').is_none());

        let line = feed(&mut assembler, b"ok\n").unwrap().unwrap();
        assert_eq!(line.as_slice(), b"ok");
    }

    #[test]
    fn exactly_full_line_is_accepted() {
        let mut assembler = LineAssembler::new();
        for _ in 0..MAX_LINE_LEN {
            assembler.push(b'a');
        }
        let line = assembler.push(b'\n').unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LEN);
    }
}
