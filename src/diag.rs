//! Diagnostic text output for raw and processed frames.
//!
//! Formats a frame as one human-readable line, decimal or hex, terminated by
//! CR/LF. Lines are assembled in a fixed 128-byte budget and truncate safely
//! rather than overflow when the payload would not fit. The sink writes to
//! any [`io::Write`]; [`TextSink::open_serial`] builds one on top of a
//! serial port.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::errors::Result;

/// Line budget, terminator included.
const LINE_CAP: usize = 128;
/// Stop appending decimal values past this column (worst case "65535 ").
const DECIMAL_CUTOFF: usize = LINE_CAP - 18;
/// Stop appending hex bytes past this column.
const HEX_CUTOFF: usize = LINE_CAP - 13;

const SERIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Writes diagnostic frame lines to an underlying byte sink.
pub struct TextSink<W: Write> {
    out: W,
}

impl TextSink<Box<dyn SerialPort>> {
    /// Open a serial port as the diagnostic sink.
    pub fn open_serial(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(SERIAL_TIMEOUT)
            .open()?;
        Ok(TextSink { out: port })
    }
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W) -> Self {
        TextSink { out }
    }

    /// Emit `Decimal: v0 v1 ...\r\n`, decoding the data as little-endian
    /// 16-bit pairs. A trailing odd byte is ignored.
    pub fn write_decimal(&mut self, data: &[u8]) -> io::Result<()> {
        let mut line = String::with_capacity(LINE_CAP);
        line.push_str("Decimal: ");
        for pair in data.chunks_exact(2) {
            if line.len() >= DECIMAL_CUTOFF {
                break;
            }
            let value = u16::from_le_bytes([pair[0], pair[1]]);
            let _ = write!(line, "{value} ");
        }
        line.push_str("\r\n");
        self.out.write_all(line.as_bytes())
    }

    /// Emit `Raw: xx xx ...\r\n` with one lowercase hex pair per byte.
    pub fn write_hex(&mut self, data: &[u8]) -> io::Result<()> {
        let mut line = String::with_capacity(LINE_CAP);
        line.push_str("Raw: ");
        for &byte in data {
            if line.len() >= HEX_CUTOFF {
                break;
            }
            let _ = write!(line, "{byte:02x} ");
        }
        line.push_str("\r\n");
        self.out.write_all(line.as_bytes())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(write: impl Fn(&mut TextSink<&mut Vec<u8>>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        let mut sink = TextSink::new(&mut buf);
        write(&mut sink).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn decimal_line_decodes_pairs() {
        let line = capture(|s| s.write_decimal(&[0x02, 0x01, 0xff, 0xff, 0x00, 0x00]));
        assert_eq!(line, "Decimal: 258 65535 0 \r\n");
    }

    #[test]
    fn decimal_ignores_trailing_odd_byte() {
        let line = capture(|s| s.write_decimal(&[0x0a, 0x00, 0x99]));
        assert_eq!(line, "Decimal: 10 \r\n");
    }

    #[test]
    fn hex_line_formats_each_byte() {
        let line = capture(|s| s.write_hex(&[0x00, 0xab, 0x10]));
        assert_eq!(line, "Raw: 00 ab 10 \r\n");
    }

    #[test]
    fn oversized_input_truncates_within_budget() {
        let big = [0xffu8; 512];
        let hex = capture(|s| s.write_hex(&big));
        assert!(hex.len() <= LINE_CAP);
        assert!(hex.ends_with("\r\n"));

        let dec = capture(|s| s.write_decimal(&big));
        assert!(dec.len() <= LINE_CAP);
        assert!(dec.ends_with("\r\n"));
    }

    #[test]
    fn empty_input_still_terminates_the_line() {
        assert_eq!(capture(|s| s.write_decimal(&[])), "Decimal: \r\n");
        assert_eq!(capture(|s| s.write_hex(&[])), "Raw: \r\n");
    }
}
