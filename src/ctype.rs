//! Compression plug-point (C4): a pair of capabilities, compress and
//! decompress, selected by a folder's declared [`CompressionType`]. The
//! only variant this core actually implements is `None` (pass-through
//! "Store" mode); the others are parsed and preserved faithfully so a
//! folder using them can still be inspected, but any attempt to read or
//! write their data fails with [`CabError::UnsupportedCompression`].

use crate::error::{CabError, Result};

const CTYPE_NONE: u16 = 0x0;
const CTYPE_MSZIP: u16 = 0x1;
const CTYPE_QUANTUM: u16 = 0x2;
const CTYPE_LZX: u16 = 0x3;
const CTYPE_BAD: u16 = 0xf;

/// The compression scheme a folder declares for its data blocks.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CompressionType {
    /// No compression ("Store" mode): compressed length == uncompressed
    /// length.
    None,
    /// MSZIP compression, as described in MS-MCI. Parsed, not implemented.
    MsZip,
    /// Quantum compression, as described in MS-MCI. Parsed, not
    /// implemented.
    Quantum,
    /// LZX compression, as described in MS-PATCH. Parsed, not
    /// implemented.
    Lzx,
    /// An explicitly-reserved "bad" compression type value.
    Bad,
}

impl CompressionType {
    /// Low nibble of the on-disk `typeCompress` field selects the scheme;
    /// the remaining bits are scheme-specific parameters this core never
    /// needs, since it never decodes anything but `None`.
    pub(crate) fn from_bitfield(bits: u16) -> Result<CompressionType> {
        match bits & 0x000f {
            CTYPE_NONE => Ok(CompressionType::None),
            CTYPE_MSZIP => Ok(CompressionType::MsZip),
            CTYPE_QUANTUM => Ok(CompressionType::Quantum),
            CTYPE_LZX => Ok(CompressionType::Lzx),
            CTYPE_BAD => Ok(CompressionType::Bad),
            other => Err(CabError::invalid_data(format!(
                "invalid compression type: 0x{other:04x}"
            ))),
        }
    }

    pub(crate) fn to_bitfield(self) -> u16 {
        match self {
            CompressionType::None => CTYPE_NONE,
            CompressionType::MsZip => CTYPE_MSZIP,
            CompressionType::Quantum => CTYPE_QUANTUM,
            CompressionType::Lzx => CTYPE_LZX,
            CompressionType::Bad => CTYPE_BAD,
        }
    }

    fn name(self) -> &'static str {
        match self {
            CompressionType::None => "None",
            CompressionType::MsZip => "MsZip",
            CompressionType::Quantum => "Quantum",
            CompressionType::Lzx => "Lzx",
            CompressionType::Bad => "Bad",
        }
    }

    /// Looks up the decompressor for this folder's declared scheme.
    pub(crate) fn into_decompressor(self, folder_index: u16) -> Result<Codec> {
        match self {
            CompressionType::None => Ok(Codec::Identity),
            other => Err(CabError::UnsupportedCompression {
                folder_index,
                ctype: other.name().to_string(),
            }),
        }
    }

    /// Looks up the compressor for this folder's declared scheme.
    pub(crate) fn into_compressor(self, folder_index: u16) -> Result<Codec> {
        self.into_decompressor(folder_index)
    }
}

/// The registry of compression capabilities. Identity is the only
/// implemented variant; [`CompressionType::into_decompressor`] and
/// [`CompressionType::into_compressor`] are the only ways to obtain one,
/// and they reject every other scheme.
pub(crate) enum Codec {
    Identity,
}

impl Codec {
    pub(crate) fn decompress(&mut self, data: Vec<u8>, _uncompressed_size: usize) -> Vec<u8> {
        match self {
            Codec::Identity => data,
        }
    }

    pub(crate) fn compress(&mut self, data: Vec<u8>) -> Vec<u8> {
        match self {
            Codec::Identity => data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CompressionType;

    #[test]
    fn compression_type_round_trips_bitfield() {
        for (ctype, bits) in [
            (CompressionType::None, 0x0),
            (CompressionType::MsZip, 0x1),
            (CompressionType::Quantum, 0x2),
            (CompressionType::Lzx, 0x3),
            (CompressionType::Bad, 0xf),
        ] {
            assert_eq!(ctype.to_bitfield(), bits);
            assert_eq!(CompressionType::from_bitfield(bits).unwrap(), ctype);
        }
    }

    #[test]
    fn unknown_compression_type_is_rejected() {
        assert!(CompressionType::from_bitfield(0x7).is_err());
    }

    #[test]
    fn only_none_yields_a_usable_codec() {
        assert!(CompressionType::None.into_decompressor(0).is_ok());
        assert!(CompressionType::MsZip.into_decompressor(0).is_err());
        assert!(CompressionType::Quantum.into_decompressor(0).is_err());
        assert!(CompressionType::Lzx.into_decompressor(0).is_err());
        assert!(CompressionType::Bad.into_decompressor(0).is_err());
    }
}
