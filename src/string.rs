//! Primitive I/O (C1): little-endian integers are handled directly via
//! `byteorder` at each call site; this module is just the NUL-terminated
//! string codec, since it has a couple of format quirks worth documenting
//! in one place.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::consts;

/// Reads a NUL-terminated string, decoding as ASCII or UTF-8 depending on
/// `is_utf8` (selected by the caller from the file's "name is UTF-8"
/// attribute bit).
///
/// Reading stops at the first `0x00` byte (consumed, not included in the
/// result) *or* at EOF; a premature end of stream yields whatever bytes
/// were accumulated so far rather than an error. This mirrors the on-disk
/// format's guarantee that well-formed input always has a terminating NUL;
/// a caller parsing untrusted input should treat an unexpectedly short
/// result as reason to reject the surrounding record as truncated, rather
/// than trust this function to catch it.
pub(crate) fn read_null_terminated_string<R: Read>(
    mut reader: R,
    is_utf8: bool,
) -> io::Result<String> {
    let mut bytes = Vec::<u8>::with_capacity(32);
    loop {
        match reader.read_u8() {
            Ok(0) => break,
            Ok(byte) => {
                if bytes.len() + 1 >= consts::MAX_STRING_SIZE_WITH_NUL {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "name longer than the {}-byte limit",
                            consts::MAX_STRING_SIZE_WITH_NUL
                        ),
                    ));
                }
                bytes.push(byte);
            }
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    if is_utf8 {
        String::from_utf8(bytes).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("invalid UTF-8 name: {e}"))
        })
    } else {
        // Names are stored as ASCII when the UTF-8 bit is clear; every
        // stored byte is <= 0x7f by construction on write, so this is a
        // lossless decode in well-formed input.
        Ok(bytes.iter().map(|&b| b as char).collect())
    }
}

/// Picks the on-disk encoding for a name: ASCII if every code point is
/// `<= 0x7f` (in which case the ASCII and UTF-8 encodings agree byte for
/// byte), else UTF-8. Returns the encoded bytes and whether the "name is
/// UTF-8" attribute bit must be set.
pub(crate) fn encode_name(name: &str) -> (Vec<u8>, bool) {
    let is_utf8 = !name.bytes().all(|b| b <= 0x7f);
    (name.as_bytes().to_vec(), is_utf8)
}

/// Writes `encoded` followed by a NUL terminator. The 256-byte cap
/// (including the NUL) is enforced by the caller, which has the file name
/// available for a better error message.
pub(crate) fn write_null_terminated_string<W: Write>(
    mut writer: W,
    encoded: &[u8],
) -> io::Result<()> {
    writer.write_all(encoded)?;
    writer.write_u8(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_ascii_name() {
        let data = b"hi.txt\0garbage";
        let s = read_null_terminated_string(Cursor::new(data), false).unwrap();
        assert_eq!(s, "hi.txt");
    }

    #[test]
    fn reads_utf8_name() {
        let data = "\u{2603}.txt\0".as_bytes();
        let s = read_null_terminated_string(Cursor::new(data), true).unwrap();
        assert_eq!(s, "\u{2603}.txt");
    }

    #[test]
    fn premature_eof_yields_accumulated_bytes() {
        let data = b"no-terminator";
        let s = read_null_terminated_string(Cursor::new(data), false).unwrap();
        assert_eq!(s, "no-terminator");
    }

    #[test]
    fn encode_name_picks_ascii_when_possible() {
        let (bytes, is_utf8) = encode_name("hi.txt");
        assert_eq!(bytes, b"hi.txt");
        assert!(!is_utf8);
    }

    #[test]
    fn encode_name_picks_utf8_for_non_ascii() {
        let (bytes, is_utf8) = encode_name("\u{2603}.txt");
        assert_eq!(bytes, "\u{2603}.txt".as_bytes());
        assert!(is_utf8);
    }
}
