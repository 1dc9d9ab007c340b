//! File record (C5): one entry's fixed header plus its NUL-terminated
//! name, and the in-memory [`FileEntry`] that tracks both where its bytes
//! currently live (the original cabinet's data blocks, or an external
//! file waiting to be written) and the metadata callers can inspect or
//! change before a `Save`.

use std::io::{Read, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use time::PrimitiveDateTime;

use crate::consts;
use crate::datetime::{datetime_from_bits, datetime_to_bits};
use crate::error::{CabError, Result};
use crate::string::{encode_name, read_null_terminated_string, write_null_terminated_string};

/// Where a [`FileEntry`]'s uncompressed bytes come from.
#[derive(Debug, Clone)]
pub(crate) enum FileSource {
    /// Bytes live in the folder's original data blocks, at this
    /// uncompressed offset (recorded when the cabinet was opened; stays
    /// fixed even if the file is later renamed or other files in the same
    /// folder are deleted).
    Cabinet { origin_offset: u32 },
    /// Bytes haven't been written yet; they'll be read from this host
    /// path at `Save` time.
    External { path: PathBuf },
}

/// How a parsed file header's folder-index field should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FolderIndexKind {
    Folder(usize),
    /// One of the three spanning sentinels (0xFFFD/E/F): continued from
    /// the previous cabinet, continued to the next, or both. Preserved,
    /// never followed.
    Spanning(u16),
}

pub(crate) fn classify_folder_index(raw: u16, num_folders: usize) -> Result<FolderIndexKind> {
    match raw {
        consts::FOLDER_INDEX_CONTINUED_FROM_PREV
        | consts::FOLDER_INDEX_CONTINUED_TO_NEXT
        | consts::FOLDER_INDEX_CONTINUED_PREV_AND_NEXT => Ok(FolderIndexKind::Spanning(raw)),
        idx if (idx as usize) < num_folders => Ok(FolderIndexKind::Folder(idx as usize)),
        idx => Err(CabError::invalid_data(format!(
            "file entry folder index {idx} is out of bounds ({num_folders} folder(s))"
        ))),
    }
}

/// The fixed portion of a file header, as read off the wire, before the
/// caller has decided what folder (or spanning bucket) it belongs to.
pub(crate) struct ParsedFileRecord {
    pub(crate) uncompressed_size: u32,
    pub(crate) uncompressed_offset: u32,
    pub(crate) folder_index_raw: u16,
    pub(crate) date_bits: u16,
    pub(crate) time_bits: u16,
    pub(crate) attributes: u16,
    pub(crate) name: String,
}

pub(crate) fn parse_file_entry<R: Read>(mut reader: R) -> Result<ParsedFileRecord> {
    let uncompressed_size = reader.read_u32::<LittleEndian>()?;
    let uncompressed_offset = reader.read_u32::<LittleEndian>()?;
    let folder_index_raw = reader.read_u16::<LittleEndian>()?;
    let date_bits = reader.read_u16::<LittleEndian>()?;
    let time_bits = reader.read_u16::<LittleEndian>()?;
    let attributes = reader.read_u16::<LittleEndian>()?;
    let is_utf8 = (attributes & consts::ATTR_NAME_IS_UTF) != 0;
    let name = read_null_terminated_string(&mut reader, is_utf8)?;
    Ok(ParsedFileRecord {
        uncompressed_size,
        uncompressed_offset,
        folder_index_raw,
        date_bits,
        time_bits,
        attributes,
        name,
    })
}

/// Metadata (and pending source) for one file stored in, or about to be
/// stored in, a cabinet.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub(crate) rel_path: String,
    date_bits: u16,
    time_bits: u16,
    uncompressed_size: u32,
    /// Attribute bits *excluding* `ATTR_NAME_IS_UTF`, which is always
    /// recomputed from the current name at emission time.
    attributes: u16,
    pub(crate) source: FileSource,
}

impl FileEntry {
    pub(crate) fn from_parsed(record: ParsedFileRecord) -> FileEntry {
        FileEntry {
            rel_path: record.name,
            date_bits: record.date_bits,
            time_bits: record.time_bits,
            uncompressed_size: record.uncompressed_size,
            attributes: record.attributes & !consts::ATTR_NAME_IS_UTF,
            source: FileSource::Cabinet { origin_offset: record.uncompressed_offset },
        }
    }

    pub(crate) fn new_external(
        rel_path: String,
        path: PathBuf,
        uncompressed_size: u32,
        datetime: PrimitiveDateTime,
        is_read_only: bool,
        is_hidden: bool,
    ) -> FileEntry {
        let (date_bits, time_bits) = datetime_to_bits(datetime);
        let mut attributes = consts::ATTR_ARCH;
        if is_read_only {
            attributes |= consts::ATTR_READ_ONLY;
        }
        if is_hidden {
            attributes |= consts::ATTR_HIDDEN;
        }
        FileEntry {
            rel_path,
            date_bits,
            time_bits,
            uncompressed_size,
            attributes,
            source: FileSource::External { path },
        }
    }

    /// The file's logical, backslash-delimited path within the cabinet.
    pub fn name(&self) -> &str {
        &self.rel_path
    }

    pub fn uncompressed_size(&self) -> u32 {
        self.uncompressed_size
    }

    /// The file's timestamp, or `None` if the stored DOS bits don't
    /// decode to a legal calendar date/time.
    pub fn datetime(&self) -> Option<PrimitiveDateTime> {
        datetime_from_bits(self.date_bits, self.time_bits)
    }

    pub fn set_datetime(&mut self, datetime: PrimitiveDateTime) {
        let (date_bits, time_bits) = datetime_to_bits(datetime);
        self.date_bits = date_bits;
        self.time_bits = time_bits;
    }

    pub fn is_read_only(&self) -> bool {
        (self.attributes & consts::ATTR_READ_ONLY) != 0
    }

    pub fn is_hidden(&self) -> bool {
        (self.attributes & consts::ATTR_HIDDEN) != 0
    }

    pub fn is_system(&self) -> bool {
        (self.attributes & consts::ATTR_SYSTEM) != 0
    }

    pub fn is_archive(&self) -> bool {
        (self.attributes & consts::ATTR_ARCH) != 0
    }

    pub fn is_exec(&self) -> bool {
        (self.attributes & consts::ATTR_EXEC) != 0
    }

    /// True if the name contains a byte outside ASCII, i.e. it will be
    /// emitted as UTF-8 with the name-is-UTF-8 attribute bit set.
    pub fn is_name_utf(&self) -> bool {
        self.rel_path.bytes().any(|b| b > 0x7f)
    }

    pub(crate) fn matches_path_case_insensitive(&self, rel_path: &str) -> bool {
        self.rel_path.eq_ignore_ascii_case(rel_path)
    }

    fn raw_attributes(&self, name_is_utf: bool) -> u16 {
        if name_is_utf {
            self.attributes | consts::ATTR_NAME_IS_UTF
        } else {
            self.attributes
        }
    }
}

/// Writes a file header (fixed fields + NUL-terminated name) at the
/// writer's current position. Fails with [`CabError::NameTooLong`] if the
/// emitted name, including its terminator, would reach the 256-byte cap.
pub(crate) fn write_file_header<W: Write>(
    mut writer: W,
    file: &FileEntry,
    folder_index: u16,
    uncompressed_offset: u32,
) -> Result<()> {
    let (encoded_name, name_is_utf) = encode_name(&file.rel_path);
    if encoded_name.len() + 1 >= consts::MAX_STRING_SIZE_WITH_NUL {
        return Err(CabError::NameTooLong {
            name: file.rel_path.clone(),
            len: encoded_name.len() + 1,
        });
    }
    writer.write_u32::<LittleEndian>(file.uncompressed_size)?;
    writer.write_u32::<LittleEndian>(uncompressed_offset)?;
    writer.write_u16::<LittleEndian>(folder_index)?;
    writer.write_u16::<LittleEndian>(file.date_bits)?;
    writer.write_u16::<LittleEndian>(file.time_bits)?;
    writer.write_u16::<LittleEndian>(file.raw_attributes(name_is_utf))?;
    write_null_terminated_string(&mut writer, &encoded_name)?;
    Ok(())
}

pub(crate) fn file_header_size(file: &FileEntry) -> usize {
    let (encoded_name, _) = encode_name(&file.rel_path);
    17 + encoded_name.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use time::macros::datetime;

    fn sample() -> FileEntry {
        FileEntry::new_external(
            "sub\\x.txt".to_string(),
            PathBuf::from("/tmp/x"),
            1,
            datetime!(2018-01-06 15:19:42),
            false,
            false,
        )
    }

    #[test]
    fn ascii_name_round_trips_without_utf_bit() {
        let file = sample();
        let mut buf = Cursor::new(Vec::new());
        write_file_header(&mut buf, &file, 0, 0).unwrap();
        buf.set_position(0);
        let parsed = parse_file_entry(&mut buf).unwrap();
        assert_eq!(parsed.name, "sub\\x.txt");
        assert_eq!(parsed.attributes & consts::ATTR_NAME_IS_UTF, 0);
    }

    #[test]
    fn non_ascii_name_round_trips_with_utf_bit() {
        let file = FileEntry::new_external(
            "\u{2603}.txt".to_string(),
            PathBuf::from("/tmp/snowman"),
            1,
            datetime!(2018-01-06 15:19:42),
            false,
            false,
        );
        let mut buf = Cursor::new(Vec::new());
        write_file_header(&mut buf, &file, 0, 0).unwrap();
        buf.set_position(0);
        let parsed = parse_file_entry(&mut buf).unwrap();
        assert_eq!(parsed.name, "\u{2603}.txt");
        assert_ne!(parsed.attributes & consts::ATTR_NAME_IS_UTF, 0);
        assert!(FileEntry::from_parsed(parsed).is_name_utf());
    }

    #[test]
    fn overlong_name_is_rejected() {
        let file = FileEntry::new_external(
            "x".repeat(255),
            PathBuf::from("/tmp/x"),
            1,
            datetime!(2018-01-06 15:19:42),
            false,
            false,
        );
        let mut buf = Cursor::new(Vec::new());
        let err = write_file_header(&mut buf, &file, 0, 0).unwrap_err();
        assert!(matches!(err, CabError::NameTooLong { .. }));
    }

    #[test]
    fn archive_attribute_set_by_default_on_new_files() {
        assert!(sample().is_archive());
    }
}
