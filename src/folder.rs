//! Folder record (C6): a folder owns an ordered run of [`FileEntry`]s and
//! the data blocks their bytes are packed into. Data-block headers are
//! loaded lazily, so opening a cabinet never walks past the file table, and
//! once loaded are cached for the lifetime of the [`Folder`].
//!
//! This module also carries the two streaming pipelines that never
//! materialize a whole folder in memory: [`stream_file_bytes`] pulls one
//! file's uncompressed bytes out of a folder's data blocks in
//! `MAX_UNCOMPRESSED_BLOCK_SIZE`-sized chunks, and [`write_folder_data_blocks`]
//! is the `Save`-time rewrite that reassembles a folder's data blocks from
//! whatever mix of external files and original-cabinet bytes its file list
//! now requires.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::consts;
use crate::ctype::{CompressionType, Codec};
use crate::datablock::{self, DataBlockEntry};
use crate::error::{CabError, Result};
use crate::file::{FileEntry, FileSource};
use crate::progress::CancelToken;

/// One folder's header plus the files it owns. Data-block headers are
/// `None` until [`Folder::ensure_blocks_loaded`] is called.
#[derive(Debug)]
pub struct Folder {
    pub(crate) index: usize,
    first_data_block_offset: u32,
    num_data_blocks: u16,
    compression_type: CompressionType,
    reserve_data: Vec<u8>,
    data_reserve_size: u8,
    data_blocks: Option<Vec<DataBlockEntry>>,
    pub(crate) files: Vec<FileEntry>,
}

/// The fixed portion of a folder header, as read off the wire.
pub(crate) struct ParsedFolderHeader {
    pub(crate) first_data_block_offset: u32,
    pub(crate) num_data_blocks: u16,
    pub(crate) compression_type: CompressionType,
    pub(crate) reserve_data: Vec<u8>,
}

pub(crate) fn parse_folder_header<R: Read>(
    mut reader: R,
    folder_reserve_size: usize,
) -> Result<ParsedFolderHeader> {
    use byteorder::{LittleEndian, ReadBytesExt};
    let first_data_block_offset = reader.read_u32::<LittleEndian>()?;
    let num_data_blocks = reader.read_u16::<LittleEndian>()?;
    let type_compress = reader.read_u16::<LittleEndian>()?;
    let compression_type = CompressionType::from_bitfield(type_compress)?;
    let mut reserve_data = vec![0u8; folder_reserve_size];
    if folder_reserve_size > 0 {
        reader.read_exact(&mut reserve_data)?;
    }
    Ok(ParsedFolderHeader { first_data_block_offset, num_data_blocks, compression_type, reserve_data })
}

pub(crate) fn write_folder_header<W: Write>(
    mut writer: W,
    folder: &Folder,
) -> std::io::Result<()> {
    use byteorder::{LittleEndian, WriteBytesExt};
    writer.write_u32::<LittleEndian>(folder.first_data_block_offset)?;
    writer.write_u16::<LittleEndian>(folder.num_data_blocks)?;
    writer.write_u16::<LittleEndian>(folder.compression_type.to_bitfield())?;
    writer.write_all(&folder.reserve_data)?;
    Ok(())
}

pub(crate) fn folder_header_size(folder_reserve_size: usize) -> usize {
    8 + folder_reserve_size
}

impl Folder {
    pub(crate) fn from_parsed(
        index: usize,
        header: ParsedFolderHeader,
        data_reserve_size: u8,
    ) -> Folder {
        Folder {
            index,
            first_data_block_offset: header.first_data_block_offset,
            num_data_blocks: header.num_data_blocks,
            compression_type: header.compression_type,
            reserve_data: header.reserve_data,
            data_reserve_size,
            data_blocks: None,
            files: Vec::new(),
        }
    }

    /// Creates a new, empty folder (used by `AddExternalFile` when no
    /// existing folder has room). Its header fields are placeholders,
    /// overwritten during `Save`; `reserve_data` is padded to
    /// `folder_reserve_size` up front so `folder_header_size` and the bytes
    /// this folder actually writes never disagree.
    pub(crate) fn new_empty(index: usize, compression_type: CompressionType, folder_reserve_size: usize) -> Folder {
        Folder {
            index,
            first_data_block_offset: 0,
            num_data_blocks: 0,
            compression_type,
            reserve_data: vec![0u8; folder_reserve_size],
            data_reserve_size: 0,
            data_blocks: Some(Vec::new()),
            files: Vec::new(),
        }
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compression_type
    }

    pub(crate) fn set_compression_type(&mut self, compression_type: CompressionType) {
        self.compression_type = compression_type;
    }

    pub fn reserve_data(&self) -> &[u8] {
        &self.reserve_data
    }

    pub fn num_data_blocks(&self) -> u16 {
        self.num_data_blocks
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.iter()
    }

    pub(crate) fn uncompressed_size(&self) -> u64 {
        self.files.iter().map(|f| f.uncompressed_size() as u64).sum()
    }

    pub(crate) fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Loads every data-block header, if not already loaded. `reader` must
    /// be an open handle onto the cabinet this folder was parsed from.
    pub(crate) fn ensure_blocks_loaded<R: Read + Seek>(
        &mut self,
        mut reader: R,
        folder_index: u16,
    ) -> Result<()> {
        if self.data_blocks.is_some() {
            return Ok(());
        }
        let mut blocks = Vec::with_capacity(self.num_data_blocks as usize);
        reader.seek(SeekFrom::Start(self.first_data_block_offset as u64))?;
        let mut cumulative = 0u64;
        for block_index in 0..self.num_data_blocks as usize {
            let entry = match datablock::parse_data_block_header(
                &mut reader,
                self.data_reserve_size as usize,
                cumulative,
            ) {
                Ok(entry) => entry,
                Err(CabError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(CabError::TruncatedStream {
                        context: format!("folder {folder_index} data block {block_index} header"),
                        expected: 8 + self.data_reserve_size as usize,
                    });
                }
                Err(e) => return Err(e),
            };
            cumulative += entry.uncompressed_len as u64;
            let next = entry.payload_offset + entry.compressed_len as u64;
            reader.seek(SeekFrom::Start(next))?;
            blocks.push(entry);
        }
        self.data_blocks = Some(blocks);
        Ok(())
    }
}

/// Tracks a linear read position across a folder's (already-loaded) data
/// blocks, caching the single most recently decompressed block. Reads never
/// go backwards, so a monotonically advancing block index is enough; no
/// general seek support is needed for the Store-only core.
struct FolderCursor {
    position: u64,
    end: u64,
    block_index: usize,
    cached_block_index: Option<usize>,
    cached_data: Vec<u8>,
}

impl FolderCursor {
    fn new(start: u64, len: u64) -> FolderCursor {
        FolderCursor { position: start, end: start + len, block_index: 0, cached_block_index: None, cached_data: Vec::new() }
    }

    /// Returns up to `max_len` bytes, or an empty vector once `end` has been
    /// reached. An empty return before `end` is reached is a bug in the
    /// caller's bookkeeping, not end-of-data; callers that expect more bytes
    /// than the folder's data blocks can supply get
    /// [`CabError::TruncatedData`] instead of a silent short read.
    fn read_chunk<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        folder: &Folder,
        folder_index: u16,
        max_len: usize,
    ) -> Result<Vec<u8>> {
        if self.position >= self.end {
            return Ok(Vec::new());
        }
        let blocks = folder
            .data_blocks
            .as_ref()
            .expect("ensure_blocks_loaded must be called before reading");
        while self.block_index < blocks.len() && blocks[self.block_index].uncompressed_end() <= self.position {
            self.block_index += 1;
        }
        let rel_path = String::new();
        let block = blocks.get(self.block_index).ok_or_else(|| CabError::TruncatedData { rel_path: rel_path.clone() })?;
        if block.is_spanning() {
            return Err(CabError::invalid_data(format!(
                "folder {folder_index}: cannot read a data block that spans cabinets"
            )));
        }
        if self.cached_block_index != Some(self.block_index) {
            let mut codec = folder.compression_type.into_decompressor(folder_index)?;
            self.cached_data = datablock::read_uncompressed(&mut *reader, block, folder_index, self.block_index, &mut codec)?;
            self.cached_block_index = Some(self.block_index);
        }
        let offset_in_block = (self.position - block.uncompressed_start) as usize;
        let available = self.cached_data.len().saturating_sub(offset_in_block);
        if available == 0 {
            return Err(CabError::TruncatedData { rel_path });
        }
        let want = (max_len as u64).min(self.end - self.position) as usize;
        let n = want.min(available);
        let bytes = self.cached_data[offset_in_block..offset_in_block + n].to_vec();
        self.position += n as u64;
        Ok(bytes)
    }
}

/// Streams one file's uncompressed bytes out of `folder`'s data blocks,
/// `MAX_UNCOMPRESSED_BLOCK_SIZE` bytes at a time, calling `sink` for each
/// chunk and `on_progress` with the cumulative byte count. Checks `cancel`
/// between chunks.
pub(crate) fn stream_file_bytes<R: Read + Seek>(
    reader: &mut R,
    folder: &mut Folder,
    folder_index: u16,
    rel_path: &str,
    origin_offset: u32,
    size: u32,
    mut sink: impl FnMut(&[u8]) -> Result<()>,
    mut on_progress: impl FnMut(u64),
    cancel: &CancelToken,
) -> Result<()> {
    folder.ensure_blocks_loaded(&mut *reader, folder_index)?;
    let mut cursor = FolderCursor::new(origin_offset as u64, size as u64);
    let mut remaining = size as u64;
    let mut done = 0u64;
    while remaining > 0 {
        cancel.check()?;
        let want = remaining.min(consts::MAX_UNCOMPRESSED_BLOCK_SIZE as u64) as usize;
        let chunk = cursor.read_chunk(reader, folder, folder_index, want).map_err(|e| match e {
            CabError::TruncatedData { .. } => CabError::TruncatedData { rel_path: rel_path.to_string() },
            other => other,
        })?;
        if chunk.is_empty() {
            return Err(CabError::TruncatedData { rel_path: rel_path.to_string() });
        }
        sink(&chunk)?;
        done += chunk.len() as u64;
        on_progress(done);
        remaining -= chunk.len() as u64;
    }
    Ok(())
}

/// Result of rewriting one folder's data blocks during `Save`.
pub(crate) struct FolderWriteOutcome {
    pub(crate) first_data_block_offset: u32,
    pub(crate) num_data_blocks: u16,
}

const STAGING_CAPACITY: usize = consts::MAX_UNCOMPRESSED_BLOCK_SIZE;

/// Rewrites `folder`'s data blocks at the writer's current position,
/// pulling each file's bytes from wherever its [`FileSource`] says they
/// currently live: an external host file, or (for files carried over
/// unchanged from the cabinet being saved) the original folder's data
/// blocks, reached through `original_reader`.
///
/// Files are packed into `MAX_UNCOMPRESSED_BLOCK_SIZE`-byte data blocks in
/// file order, exactly as a fresh folder would be built; this function
/// doesn't know or care about each file's *new* uncompressed offset. The
/// caller already computed and wrote those into the file headers before
/// calling this, since a file's new offset is just the running total of
/// bytes packed into its folder so far. `data_reserve_size` is the
/// cabinet's declared per-block reserve size and is written into every
/// block this call produces.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_folder_data_blocks<W, R>(
    folder: &mut Folder,
    folder_index: u16,
    mut original_reader: Option<&mut R>,
    writer: &mut W,
    data_reserve_size: usize,
    mut on_progress: impl FnMut(&str, u64),
    cancel: &CancelToken,
) -> Result<FolderWriteOutcome>
where
    W: Write + Seek,
    R: Read + Seek,
{
    let first_data_block_offset = writer.stream_position()? as u32;
    let mut compressor = folder.compression_type.into_compressor(folder_index)?;
    let mut staging = Vec::with_capacity(STAGING_CAPACITY);
    let mut num_data_blocks: u16 = 0;

    let files = std::mem::take(&mut folder.files);
    for file in &files {
        cancel.check()?;
        match &file.source {
            FileSource::External { path } => {
                stream_external_file(
                    path,
                    &file.rel_path,
                    file.uncompressed_size(),
                    &mut staging,
                    writer,
                    &mut compressor,
                    &mut num_data_blocks,
                    folder_index,
                    data_reserve_size,
                    &mut on_progress,
                    cancel,
                )?;
            }
            FileSource::Cabinet { origin_offset } => {
                let reader = original_reader
                    .as_deref_mut()
                    .expect("files sourced from the cabinet require the original reader");
                folder.ensure_blocks_loaded(&mut *reader, folder_index)?;
                let mut cursor = FolderCursor::new(*origin_offset as u64, file.uncompressed_size() as u64);
                let mut remaining = file.uncompressed_size() as u64;
                let mut done = 0u64;
                while remaining > 0 {
                    cancel.check()?;
                    let want = remaining.min(STAGING_CAPACITY as u64) as usize;
                    let chunk = cursor.read_chunk(reader, folder, folder_index, want).map_err(|e| match e {
                        CabError::TruncatedData { .. } => CabError::TruncatedData { rel_path: file.rel_path.clone() },
                        other => other,
                    })?;
                    if chunk.is_empty() {
                        return Err(CabError::TruncatedData { rel_path: file.rel_path.clone() });
                    }
                    done += chunk.len() as u64;
                    remaining -= chunk.len() as u64;
                    append_staging(
                        &mut staging,
                        &chunk,
                        writer,
                        &mut compressor,
                        &mut num_data_blocks,
                        folder_index,
                        data_reserve_size,
                    )?;
                    on_progress(&file.rel_path, done);
                }
            }
        }
    }
    folder.files = files;

    if !staging.is_empty() {
        flush_block(&mut staging, writer, &mut compressor, &mut num_data_blocks, folder_index, data_reserve_size)?;
    }

    folder.first_data_block_offset = first_data_block_offset;
    folder.num_data_blocks = num_data_blocks;
    Ok(FolderWriteOutcome { first_data_block_offset, num_data_blocks })
}

#[allow(clippy::too_many_arguments)]
fn stream_external_file<W: Write + Seek>(
    path: &Path,
    rel_path: &str,
    size: u32,
    staging: &mut Vec<u8>,
    writer: &mut W,
    compressor: &mut Codec,
    num_data_blocks: &mut u16,
    folder_index: u16,
    data_reserve_size: usize,
    on_progress: &mut impl FnMut(&str, u64),
    cancel: &CancelToken,
) -> Result<()> {
    let mut source = std::fs::File::open(path).map_err(|_| CabError::MissingSource {
        path: path.to_path_buf(),
        rel_path: rel_path.to_string(),
    })?;
    let mut remaining = size as u64;
    let mut done = 0u64;
    let mut buf = vec![0u8; STAGING_CAPACITY];
    while remaining > 0 {
        cancel.check()?;
        let want = remaining.min(STAGING_CAPACITY as u64) as usize;
        source.read_exact(&mut buf[..want]).map_err(|_| CabError::MissingSource {
            path: path.to_path_buf(),
            rel_path: rel_path.to_string(),
        })?;
        done += want as u64;
        remaining -= want as u64;
        append_staging(staging, &buf[..want], writer, compressor, num_data_blocks, folder_index, data_reserve_size)?;
        on_progress(rel_path, done);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn append_staging<W: Write + Seek>(
    staging: &mut Vec<u8>,
    chunk: &[u8],
    writer: &mut W,
    compressor: &mut Codec,
    num_data_blocks: &mut u16,
    folder_index: u16,
    data_reserve_size: usize,
) -> Result<()> {
    let mut chunk = chunk;
    while !chunk.is_empty() {
        let room = STAGING_CAPACITY - staging.len();
        let take = room.min(chunk.len());
        staging.extend_from_slice(&chunk[..take]);
        chunk = &chunk[take..];
        if staging.len() == STAGING_CAPACITY {
            flush_block(staging, writer, compressor, num_data_blocks, folder_index, data_reserve_size)?;
        }
    }
    Ok(())
}

fn flush_block<W: Write + Seek>(
    staging: &mut Vec<u8>,
    writer: &mut W,
    compressor: &mut Codec,
    num_data_blocks: &mut u16,
    folder_index: u16,
    data_reserve_size: usize,
) -> Result<()> {
    if *num_data_blocks as usize >= consts::MAX_NUM_DATA_BLOCKS as usize {
        return Err(CabError::TooManyDataBlocks { folder_index, max: consts::MAX_NUM_DATA_BLOCKS as usize });
    }
    let data = std::mem::replace(staging, Vec::with_capacity(STAGING_CAPACITY));
    datablock::write_data_block(writer, data, compressor, data_reserve_size)?;
    *num_data_blocks += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::CompressionType;
    use std::io::Cursor;

    fn sample_folder_with_block(payload: &[u8]) -> (Folder, Vec<u8>) {
        let mut cab = Cursor::new(Vec::new());
        let mut codec = CompressionType::None.into_compressor(0).unwrap();
        datablock::write_data_block(&mut cab, payload.to_vec(), &mut codec).unwrap();
        let bytes = cab.into_inner();
        let mut folder = Folder::from_parsed(
            0,
            ParsedFolderHeader {
                first_data_block_offset: 0,
                num_data_blocks: 1,
                compression_type: CompressionType::None,
                reserve_data: Vec::new(),
            },
            0,
        );
        folder.ensure_blocks_loaded(&mut Cursor::new(bytes.clone()), 0).unwrap();
        (folder, bytes)
    }

    #[test]
    fn stream_file_bytes_reads_whole_file() {
        let (mut folder, bytes) = sample_folder_with_block(b"hello world");
        let mut reader = Cursor::new(bytes);
        let mut out = Vec::new();
        let cancel = CancelToken::new();
        stream_file_bytes(
            &mut reader,
            &mut folder,
            0,
            "a.txt",
            0,
            11,
            |chunk| {
                out.extend_from_slice(chunk);
                Ok(())
            },
            |_| {},
            &cancel,
        )
        .unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn stream_file_bytes_reads_second_file_at_its_offset() {
        let (mut folder, bytes) = sample_folder_with_block(b"AAABBB");
        let mut reader = Cursor::new(bytes);
        let mut out = Vec::new();
        let cancel = CancelToken::new();
        stream_file_bytes(&mut reader, &mut folder, 0, "b.txt", 3, 3, |c| { out.extend_from_slice(c); Ok(()) }, |_| {}, &cancel).unwrap();
        assert_eq!(out, b"BBB");
    }

    #[test]
    fn stream_file_bytes_rejects_overrun_with_truncated_data() {
        let (mut folder, bytes) = sample_folder_with_block(b"short");
        let mut reader = Cursor::new(bytes);
        let cancel = CancelToken::new();
        let err = stream_file_bytes(&mut reader, &mut folder, 0, "a.txt", 0, 100, |_| Ok(()), |_| {}, &cancel).unwrap_err();
        assert!(matches!(err, CabError::TruncatedData { .. }));
    }

    #[test]
    fn write_folder_data_blocks_splits_on_block_boundary() {
        let mut folder = Folder::new_empty(0, CompressionType::None, 0);
        folder.files.push(FileEntry::new_external(
            "big.bin".to_string(),
            std::path::PathBuf::from("/does/not/matter"),
            0,
            time::macros::datetime!(2018-01-06 15:19:42),
            false,
            false,
        ));
        // Replace the dummy file's declared size to force exactly one
        // block boundary split, using an in-memory source instead of a
        // real path.
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let data = vec![7u8; consts::MAX_UNCOMPRESSED_BLOCK_SIZE + 10];
        std::fs::write(tmp.path(), &data).unwrap();
        folder.files[0] = FileEntry::new_external(
            "big.bin".to_string(),
            tmp.path().to_path_buf(),
            data.len() as u32,
            time::macros::datetime!(2018-01-06 15:19:42),
            false,
            false,
        );
        let mut out = Cursor::new(Vec::new());
        let cancel = CancelToken::new();
        let outcome = write_folder_data_blocks::<_, std::fs::File>(
            &mut folder,
            0,
            None,
            &mut out,
            0,
            |_, _| {},
            &cancel,
        )
        .unwrap();
        assert_eq!(outcome.num_data_blocks, 2);
    }

    #[test]
    fn write_folder_data_blocks_packs_two_million_bytes_into_62_blocks() {
        let mut folder = Folder::new_empty(0, CompressionType::None, 0);
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let data = vec![9u8; 2_000_000];
        std::fs::write(tmp.path(), &data).unwrap();
        folder.files.push(FileEntry::new_external(
            "big.bin".to_string(),
            tmp.path().to_path_buf(),
            data.len() as u32,
            time::macros::datetime!(2018-01-06 15:19:42),
            false,
            false,
        ));
        let mut out = Cursor::new(Vec::new());
        let cancel = CancelToken::new();
        let outcome = write_folder_data_blocks::<_, std::fs::File>(
            &mut folder,
            0,
            None,
            &mut out,
            0,
            |_, _| {},
            &cancel,
        )
        .unwrap();
        assert_eq!(outcome.num_data_blocks, 62);

        let written = out.into_inner();
        let mut cursor = Cursor::new(written);
        cursor.set_position(outcome.first_data_block_offset as u64);
        let mut cumulative = 0u64;
        for block_index in 0..62usize {
            let entry = datablock::parse_data_block_header(&mut cursor, 0, cumulative).unwrap();
            let expected = if block_index < 61 { consts::MAX_UNCOMPRESSED_BLOCK_SIZE } else { 2_000_000 - 61 * consts::MAX_UNCOMPRESSED_BLOCK_SIZE };
            assert_eq!(entry.uncompressed_len as usize, expected, "block {block_index}");
            cumulative += entry.uncompressed_len as u64;
            cursor.set_position(entry.payload_offset + entry.compressed_len as u64);
        }
    }
}
