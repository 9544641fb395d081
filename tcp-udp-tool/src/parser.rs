//! Text → bytes codecs used when the user composes outgoing data.
//!
//! Every parser is total over its input: malformed text produces a
//! [`ParseError`] naming the offending position, never a panic.

use crate::error::ParseError;

pub trait Parser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Vec<u8>, ParseError>;
}

/// UTF-8 bytes of the literal string.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextParser;

impl Parser for PlainTextParser {
    fn parse(&self, text: &str) -> Result<Vec<u8>, ParseError> {
        Ok(text.as_bytes().to_vec())
    }
}

/// Text with backslash escapes.
///
/// | Escape   | Byte(s)              |
/// |----------|----------------------|
/// | `\xHH`   | the byte `0xHH`      |
/// | `\n`     | `0x0A`               |
/// | `\r`     | `0x0D`               |
/// | `\t`     | `0x09`               |
/// | `\0`     | `0x00`               |
/// | `\\`     | `\`                  |
/// | `\"` `\'`| the quote character  |
///
/// Everything else is copied as UTF-8.  Positions in errors are character
/// offsets into the input.
#[derive(Debug, Default, Clone, Copy)]
pub struct EscapedTextParser;

impl Parser for EscapedTextParser {
    fn parse(&self, text: &str) -> Result<Vec<u8>, ParseError> {
        let mut out = Vec::with_capacity(text.len());
        let mut chars = text.chars().enumerate();

        while let Some((pos, c)) = chars.next() {
            if c != '\\' {
                let mut utf8 = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                continue;
            }

            let (_, esc) = chars
                .next()
                .ok_or(ParseError::IncompleteEscape { position: pos })?;
            match esc {
                'n' => out.push(b'\n'),
                'r' => out.push(b'\r'),
                't' => out.push(b'\t'),
                '0' => out.push(0),
                '\\' => out.push(b'\\'),
                '"' => out.push(b'"'),
                '\'' => out.push(b'\''),
                'x' => {
                    let mut value = 0u8;
                    for _ in 0..2 {
                        let (dpos, d) = chars
                            .next()
                            .ok_or(ParseError::IncompleteEscape { position: pos })?;
                        let nibble = hex_value(d).ok_or(ParseError::InvalidHexDigit {
                            position: dpos,
                            digit: d,
                        })?;
                        value = (value << 4) | nibble;
                    }
                    out.push(value);
                }
                other => {
                    return Err(ParseError::UnknownEscape {
                        position: pos,
                        sequence: other,
                    })
                }
            }
        }

        Ok(out)
    }
}

/// Hex digit pairs, optionally separated by whitespace (`"DE AD be ef"`,
/// `"deadbeef"`).  A pair may not be split by whitespace.
#[derive(Debug, Default, Clone, Copy)]
pub struct HexParser;

impl Parser for HexParser {
    fn parse(&self, text: &str) -> Result<Vec<u8>, ParseError> {
        let mut out = Vec::with_capacity(text.len() / 2);
        let mut high: Option<u8> = None;

        for (pos, c) in text.chars().enumerate() {
            if c.is_whitespace() {
                if high.is_some() {
                    return Err(ParseError::OddHexLength);
                }
                continue;
            }
            let nibble = hex_value(c).ok_or(ParseError::InvalidHexDigit {
                position: pos,
                digit: c,
            })?;
            match high.take() {
                Some(h) => out.push((h << 4) | nibble),
                None => high = Some(nibble),
            }
        }

        if high.is_some() {
            return Err(ParseError::OddHexLength);
        }
        Ok(out)
    }
}

fn hex_value(c: char) -> Option<u8> {
    c.to_digit(16).map(|d| d as u8)
}

/// Parser selection by name, as exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ParserKind {
    #[default]
    Text,
    Escaped,
    Hex,
}

impl ParserKind {
    pub fn build(self) -> Box<dyn Parser> {
        match self {
            Self::Text => Box::new(PlainTextParser),
            Self::Escaped => Box::new(EscapedTextParser),
            Self::Hex => Box::new(HexParser),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_utf8() {
        assert_eq!(PlainTextParser.parse("hé").unwrap(), vec![b'h', 0xC3, 0xA9]);
        assert_eq!(PlainTextParser.parse("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn escaped_resolves_hex_and_control_escapes() {
        let bytes = EscapedTextParser.parse(r"A\xFF\x00\r\n\t\\\0").unwrap();
        assert_eq!(bytes, vec![b'A', 0xFF, 0x00, b'\r', b'\n', b'\t', b'\\', 0]);
    }

    #[test]
    fn escaped_lowercase_hex() {
        assert_eq!(EscapedTextParser.parse(r"\xab").unwrap(), vec![0xAB]);
    }

    #[test]
    fn escaped_rejects_unknown_escape() {
        assert_eq!(
            EscapedTextParser.parse(r"ab\q"),
            Err(ParseError::UnknownEscape {
                position: 2,
                sequence: 'q'
            })
        );
    }

    #[test]
    fn escaped_rejects_trailing_backslash() {
        assert_eq!(
            EscapedTextParser.parse("abc\\"),
            Err(ParseError::IncompleteEscape { position: 3 })
        );
    }

    #[test]
    fn escaped_rejects_short_hex() {
        assert_eq!(
            EscapedTextParser.parse(r"\xF"),
            Err(ParseError::IncompleteEscape { position: 0 })
        );
        assert_eq!(
            EscapedTextParser.parse(r"\xG1"),
            Err(ParseError::InvalidHexDigit {
                position: 2,
                digit: 'G'
            })
        );
    }

    #[test]
    fn hex_accepts_spaced_and_contiguous() {
        assert_eq!(
            HexParser.parse("DE AD be ef").unwrap(),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
        assert_eq!(HexParser.parse("0102").unwrap(), vec![1, 2]);
        assert_eq!(HexParser.parse("  ").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn hex_rejects_odd_and_split_pairs() {
        assert_eq!(HexParser.parse("ABC"), Err(ParseError::OddHexLength));
        assert_eq!(HexParser.parse("A B"), Err(ParseError::OddHexLength));
        assert_eq!(
            HexParser.parse("zz"),
            Err(ParseError::InvalidHexDigit {
                position: 0,
                digit: 'z'
            })
        );
    }

    #[test]
    fn kind_builds_matching_parser() {
        assert_eq!(ParserKind::Hex.build().parse("41").unwrap(), b"A");
        assert_eq!(ParserKind::Text.build().parse("41").unwrap(), b"41");
        assert_eq!(ParserKind::Escaped.build().parse(r"\x41").unwrap(), b"A");
    }
}
