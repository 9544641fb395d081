//! Piece → display text codecs used when rendering history.
//!
//! Each entry starts with a header line `[HH:MM:SS]D:` where `D` is the
//! direction marker (`S` sent, `R` received).

use std::fmt::Write;

use crate::piece::Piece;

/// Default number of bytes per hex dump row.
pub const DEFAULT_BYTES_PER_ROW: usize = 16;

pub trait Formatter: Send + Sync {
    /// Append the rendering of `piece` to `out`.  Must not depend on
    /// anything but `piece` and the formatter's own configuration.
    fn format(&self, piece: &Piece, out: &mut String);
}

fn write_header(piece: &Piece, out: &mut String) {
    let _ = write!(
        out,
        "[{}]{}:",
        piece.timestamp().format("%H:%M:%S"),
        piece.direction().marker()
    );
}

/// Best-effort UTF-8 decoding; invalid sequences become U+FFFD.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextFormatter;

impl Formatter for PlainTextFormatter {
    fn format(&self, piece: &Piece, out: &mut String) {
        write_header(piece, out);
        out.push(' ');
        out.push_str(&String::from_utf8_lossy(piece.data()));
        out.push('\n');
    }
}

/// Fixed-width hex dump: two uppercase digits per byte, single spaces
/// between columns, a line break after every row.
#[derive(Debug, Clone, Copy)]
pub struct HexFormatter {
    bytes_per_row: usize,
}

impl HexFormatter {
    /// `bytes_per_row` of zero is treated as one.
    pub fn new(bytes_per_row: usize) -> Self {
        Self {
            bytes_per_row: bytes_per_row.max(1),
        }
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }
}

impl Default for HexFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_BYTES_PER_ROW)
    }
}

impl Formatter for HexFormatter {
    fn format(&self, piece: &Piece, out: &mut String) {
        write_header(piece, out);
        out.push('\n');

        for row in piece.data().chunks(self.bytes_per_row) {
            for (i, byte) in row.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "{byte:02X}");
            }
            out.push('\n');
        }
    }
}

/// Formatter selection by name, as exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FormatterKind {
    #[default]
    Text,
    Hex,
}

impl FormatterKind {
    pub fn build(self, bytes_per_row: usize) -> Box<dyn Formatter> {
        match self {
            Self::Text => Box::new(PlainTextFormatter),
            Self::Hex => Box::new(HexFormatter::new(bytes_per_row)),
        }
    }
}
