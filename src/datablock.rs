//! Data-block record (C3): the on-disk header for one chunk of a folder's
//! compressed payload, plus the payload bytes that immediately follow it.
//!
//! ```text
//! u32 checksum; u16 cbData; u16 cbUncomp; u8[cbCFData] reserved;
//! ```
//! followed by `cbData` bytes of payload.

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::ctype::Codec;
use crate::error::{CabError, Result};

/// A parsed data-block header, plus the derived offset of its payload and
/// its logical position within the folder's uncompressed stream.
#[derive(Debug, Clone)]
pub(crate) struct DataBlockEntry {
    /// Always `0` on write, never verified on read: checksum semantics
    /// are parsed/preserved but not computed or checked.
    pub(crate) checksum: u32,
    pub(crate) compressed_len: u16,
    pub(crate) uncompressed_len: u16,
    pub(crate) reserve_data: Vec<u8>,
    /// Stream offset of the first payload byte, derived at parse time,
    /// not itself stored on disk.
    pub(crate) payload_offset: u64,
    /// Uncompressed offset, within the owning folder, of this block's
    /// first byte.
    pub(crate) uncompressed_start: u64,
}

impl DataBlockEntry {
    /// True if this block's uncompressed content continues into the next
    /// cabinet in a set (`cbUncomp == 0`). The restricted core recognizes
    /// this but cannot read across cabinets.
    pub(crate) fn is_spanning(&self) -> bool {
        self.uncompressed_len == 0 && self.compressed_len != 0
    }

    pub(crate) fn uncompressed_end(&self) -> u64 {
        self.uncompressed_start + self.uncompressed_len as u64
    }
}

/// Parses one data-block header. `reader` must be positioned at the start
/// of the header; on return it is positioned at `payload_offset` (the
/// payload itself is not consumed).
pub(crate) fn parse_data_block_header<R: Read + Seek>(
    mut reader: R,
    data_reserve_size: usize,
    uncompressed_start: u64,
) -> Result<DataBlockEntry> {
    let checksum = reader.read_u32::<LittleEndian>()?;
    let compressed_len = reader.read_u16::<LittleEndian>()?;
    let uncompressed_len = reader.read_u16::<LittleEndian>()?;
    let mut reserve_data = vec![0u8; data_reserve_size];
    if data_reserve_size > 0 {
        reader.read_exact(&mut reserve_data)?;
    }
    let payload_offset = reader.stream_position()?;
    Ok(DataBlockEntry {
        checksum,
        compressed_len,
        uncompressed_len,
        reserve_data,
        payload_offset,
        uncompressed_start,
    })
}

/// Reads this block's raw (still-compressed) payload.
pub(crate) fn read_payload<R: Read + Seek>(mut reader: R, block: &DataBlockEntry) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(block.payload_offset))?;
    let mut payload = vec![0u8; block.compressed_len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Reads and decompresses this block's payload, verifying the declared
/// uncompressed length when it is nonzero (a `0` length marks a spanning
/// block, handled by the caller before this is ever invoked).
pub(crate) fn read_uncompressed<R: Read + Seek>(
    reader: R,
    block: &DataBlockEntry,
    folder_index: u16,
    block_index: usize,
    codec: &mut Codec,
) -> Result<Vec<u8>> {
    let payload = read_payload(reader, block)?;
    let data = codec.decompress(payload, block.uncompressed_len as usize);
    if block.uncompressed_len != 0 && data.len() != block.uncompressed_len as usize {
        return Err(CabError::CorruptedData {
            folder_index,
            block_index,
            expected: block.uncompressed_len as usize,
            actual: data.len(),
        });
    }
    Ok(data)
}

/// Compresses `data` and writes a full data-block record (header +
/// reserve + payload) at the writer's current position, returning the
/// parsed entry that was just written (with `uncompressed_start` filled
/// in by the caller). `reserve_size` must match the cabinet's declared
/// `dataReservedSize`; the reserve bytes are always zero-filled.
pub(crate) fn write_data_block<W: Write + Seek>(
    mut writer: W,
    data: Vec<u8>,
    codec: &mut Codec,
    reserve_size: usize,
) -> io::Result<(u16, u16)> {
    let uncompressed_len = data.len() as u16;
    let compressed = codec.compress(data);
    let compressed_len = compressed.len() as u16;
    writer.write_u32::<LittleEndian>(0)?; // checksum: never computed, always zero
    writer.write_u16::<LittleEndian>(compressed_len)?;
    writer.write_u16::<LittleEndian>(uncompressed_len)?;
    if reserve_size > 0 {
        writer.write_all(&vec![0u8; reserve_size])?;
    }
    writer.write_all(&compressed)?;
    Ok((compressed_len, uncompressed_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::CompressionType;
    use std::io::Cursor;

    #[test]
    fn write_then_parse_round_trips() {
        let mut buf = Cursor::new(Vec::new());
        let mut codec = CompressionType::None.into_compressor(0).unwrap();
        write_data_block(&mut buf, b"hello".to_vec(), &mut codec, 0).unwrap();
        buf.set_position(0);
        let entry = parse_data_block_header(&mut buf, 0, 0).unwrap();
        assert_eq!(entry.checksum, 0);
        assert_eq!(entry.compressed_len, 5);
        assert_eq!(entry.uncompressed_len, 5);
        let mut codec = CompressionType::None.into_decompressor(0).unwrap();
        let data = read_uncompressed(&mut buf, &entry, 0, 0, &mut codec).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn write_then_parse_round_trips_with_reserve_bytes() {
        let mut buf = Cursor::new(Vec::new());
        let mut codec = CompressionType::None.into_compressor(0).unwrap();
        write_data_block(&mut buf, b"hello".to_vec(), &mut codec, 4).unwrap();
        buf.set_position(0);
        let entry = parse_data_block_header(&mut buf, 4, 0).unwrap();
        assert_eq!(entry.reserve_data, vec![0u8; 4]);
        let mut codec = CompressionType::None.into_decompressor(0).unwrap();
        let data = read_uncompressed(&mut buf, &entry, 0, 0, &mut codec).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn spanning_block_is_recognized() {
        let mut buf = Cursor::new(Vec::new());
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u16::<LittleEndian>(3).unwrap();
        buf.write_u16::<LittleEndian>(0).unwrap();
        buf.write_all(b"abc").unwrap();
        buf.set_position(0);
        let entry = parse_data_block_header(&mut buf, 0, 0).unwrap();
        assert!(entry.is_spanning());
    }

    #[test]
    fn corrupted_length_is_detected() {
        // Manually build a block claiming 10 uncompressed bytes but only
        // storing 5 bytes of (identity-"compressed") payload.
        let mut buf = Cursor::new(Vec::new());
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u16::<LittleEndian>(5).unwrap();
        buf.write_u16::<LittleEndian>(10).unwrap();
        buf.write_all(b"hello").unwrap();
        buf.set_position(0);
        let entry = parse_data_block_header(&mut buf, 0, 0).unwrap();
        let mut codec = CompressionType::None.into_decompressor(0).unwrap();
        let err = read_uncompressed(&mut buf, &entry, 0, 0, &mut codec).unwrap_err();
        assert!(matches!(err, CabError::CorruptedData { .. }));
    }
}
