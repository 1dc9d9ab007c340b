//! Cabinet record (C7): the top-level container. Owns an ordered sequence
//! of [`Folder`]s and provides the mutating/extracting operations
//! (`add_external_file`, `extract_to_file`, `delete_file`, `move_file`) plus
//! `save`, which streams a complete rewrite through a temporary file and
//! atomically replaces the original.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use time::PrimitiveDateTime;

use crate::consts;
use crate::ctype::CompressionType;
use crate::error::{CabError, Result};
use crate::file::{self, classify_folder_index, FileEntry, FileSource, FolderIndexKind};
use crate::folder::{self, Folder, ParsedFolderHeader};
use crate::progress::CancelToken;

/// A previous/next cabinet reference preserved from the header: the
/// cabinet's own file name and the disk label it was cut onto.
#[derive(Debug, Clone)]
pub struct CabinetLink {
    pub cabinet_name: String,
    pub disk_name: String,
}

/// A single Microsoft Cabinet archive.
pub struct Cabinet {
    path: PathBuf,
    reader: Option<std::fs::File>,
    set_id: u16,
    cabinet_index: u16,
    header_reserve: Vec<u8>,
    folder_reserve_size: u8,
    data_reserve_size: u8,
    prev_cabinet: Option<CabinetLink>,
    /// Always `None` once a cabinet has been successfully opened: a
    /// present next-cabinet link fails `Open` outright (see
    /// [`CabError::MultiCabinetUnsupported`]).
    next_cabinet: Option<CabinetLink>,
    folders: Vec<Folder>,
    /// Files whose on-disk folder index was one of the spanning sentinels.
    /// Preserved for inspection; never addressable through
    /// add/extract/delete/move, and dropped (not re-emitted) on `Save`,
    /// matching the documented limitation that this core does not produce
    /// spanning output.
    spanning_files: Vec<FileEntry>,
}

fn wrap_truncated<T>(result: Result<T>, context: impl FnOnce() -> String, expected: usize) -> Result<T> {
    match result {
        Err(CabError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(CabError::TruncatedStream { context: context(), expected })
        }
        other => other,
    }
}

impl Cabinet {
    /// Opens an existing cabinet file, parsing its header, folder headers,
    /// and file headers. Data-block headers are not read until something
    /// needs them.
    pub fn open(path: impl Into<PathBuf>) -> Result<Cabinet> {
        let path = path.into();
        tracing::debug!(path = %path.display(), "opening cabinet");
        let mut file = std::fs::File::open(&path)?;
        let result = Self::parse(&mut file, &path);
        match result {
            Ok(mut cabinet) => {
                cabinet.reader = Some(file);
                Ok(cabinet)
            }
            Err(e) => Err(e),
        }
    }

    /// Creates a brand-new, empty cabinet at `path`. Nothing is written to
    /// disk until `save` is called.
    pub fn create(path: impl Into<PathBuf>) -> Cabinet {
        Cabinet {
            path: path.into(),
            reader: None,
            set_id: 0,
            cabinet_index: 0,
            header_reserve: Vec::new(),
            folder_reserve_size: 0,
            data_reserve_size: 0,
            prev_cabinet: None,
            next_cabinet: None,
            folders: Vec::new(),
            spanning_files: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn folders(&self) -> impl Iterator<Item = &Folder> {
        self.folders.iter()
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.folders.iter().flat_map(|f| f.files.iter())
    }

    pub fn prev_cabinet(&self) -> Option<&CabinetLink> {
        self.prev_cabinet.as_ref()
    }

    fn parse(reader: &mut std::fs::File, path: &Path) -> Result<Cabinet> {
        reader.seek(SeekFrom::Start(0))?;
        let signature = reader.read_u32::<LittleEndian>().map_err(CabError::from)?;
        if signature != consts::FILE_SIGNATURE {
            return Err(CabError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: "bad signature".to_string(),
            });
        }
        let _reserved1 = reader.read_u32::<LittleEndian>()?;
        let _cabinet_size = reader.read_u32::<LittleEndian>()?;
        let _reserved2 = reader.read_u32::<LittleEndian>()?;
        let first_file_entry_offset = reader.read_u32::<LittleEndian>()?;
        let _reserved3 = reader.read_u32::<LittleEndian>()?;
        let version_minor = reader.read_u8()?;
        let version_major = reader.read_u8()?;
        if version_major != consts::VERSION_MAJOR || version_minor != consts::VERSION_MINOR {
            return Err(CabError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: format!("unsupported version {version_major}.{version_minor}"),
            });
        }
        let num_folders = reader.read_u16::<LittleEndian>()?;
        let num_files = reader.read_u16::<LittleEndian>()?;
        let flags = reader.read_u16::<LittleEndian>()?;
        let set_id = reader.read_u16::<LittleEndian>()?;
        let cabinet_index = reader.read_u16::<LittleEndian>()?;

        let mut folder_reserve_size = 0u8;
        let mut data_reserve_size = 0u8;
        let mut header_reserve = Vec::new();
        if flags & consts::FLAG_RESERVE_PRESENT != 0 {
            let cabinet_reserved_size = reader.read_u16::<LittleEndian>()? as usize;
            folder_reserve_size = reader.read_u8()?;
            data_reserve_size = reader.read_u8()?;
            if cabinet_reserved_size > consts::MAX_HEADER_RESERVE_SIZE {
                return Err(CabError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    reason: format!("header reserve size {cabinet_reserved_size} exceeds the {} byte cap", consts::MAX_HEADER_RESERVE_SIZE),
                });
            }
            header_reserve = vec![0u8; cabinet_reserved_size];
            if cabinet_reserved_size > 0 {
                reader.read_exact(&mut header_reserve)?;
            }
        }

        let prev_cabinet = if flags & consts::FLAG_PREV_CABINET != 0 {
            let cabinet_name = crate::string::read_null_terminated_string(&mut *reader, false)?;
            let disk_name = crate::string::read_null_terminated_string(&mut *reader, false)?;
            Some(CabinetLink { cabinet_name, disk_name })
        } else {
            None
        };

        if flags & consts::FLAG_NEXT_CABINET != 0 {
            return Err(CabError::MultiCabinetUnsupported { path: path.to_path_buf() });
        }

        let mut folders = Vec::with_capacity(num_folders as usize);
        for index in 0..num_folders as usize {
            let header: ParsedFolderHeader = wrap_truncated(
                folder::parse_folder_header(&mut *reader, folder_reserve_size as usize),
                || format!("folder {index} header"),
                8 + folder_reserve_size as usize,
            )?;
            folders.push(Folder::from_parsed(index, header, data_reserve_size));
        }

        reader.seek(SeekFrom::Start(first_file_entry_offset as u64))?;
        let mut spanning_files = Vec::new();
        for file_index in 0..num_files as usize {
            let record = wrap_truncated(
                file::parse_file_entry(&mut *reader),
                || format!("file {file_index} header"),
                17,
            )?;
            match classify_folder_index(record.folder_index_raw, folders.len())? {
                FolderIndexKind::Folder(idx) => folders[idx].files.push(FileEntry::from_parsed(record)),
                FolderIndexKind::Spanning(_) => spanning_files.push(FileEntry::from_parsed(record)),
            }
        }

        Ok(Cabinet {
            path: path.to_path_buf(),
            reader: None,
            set_id,
            cabinet_index,
            header_reserve,
            folder_reserve_size,
            data_reserve_size,
            prev_cabinet,
            next_cabinet: None,
            folders,
            spanning_files,
        })
    }

    fn locate(&self, rel_path: &str) -> Option<(usize, usize)> {
        for (folder_index, folder) in self.folders.iter().enumerate() {
            if let Some(file_index) = folder.files.iter().position(|f| f.matches_path_case_insensitive(rel_path)) {
                return Some((folder_index, file_index));
            }
        }
        None
    }

    fn total_file_count(&self) -> usize {
        self.folders.iter().map(Folder::file_count).sum()
    }

    fn select_folder_for(&mut self, additional_size: u32) -> usize {
        for (index, folder) in self.folders.iter().enumerate() {
            let fits_size = folder.uncompressed_size() + additional_size as u64 <= consts::MAX_FOLDER_UNCOMPRESSED_SIZE as u64;
            let fits_count = folder.file_count() + 1 <= consts::MAX_NUM_FILES;
            if fits_size && fits_count {
                return index;
            }
        }
        let index = self.folders.len();
        self.folders.push(Folder::new_empty(index, CompressionType::None, self.folder_reserve_size as usize));
        index
    }

    /// Adds (or replaces, case-insensitively by `rel_path`) a file sourced
    /// from the host filesystem. Nothing is read from `source_path` until
    /// `save`.
    pub fn add_external_file(&mut self, source_path: impl AsRef<Path>, rel_path: impl Into<String>) -> Result<()> {
        let source_path = source_path.as_ref();
        let rel_path = rel_path.into();
        tracing::debug!(rel_path = %rel_path, source = %source_path.display(), "adding external file");
        let metadata = std::fs::metadata(source_path)?;
        let size = metadata.len();
        if size > consts::MAX_FILE_SIZE as u64 {
            return Err(CabError::FileTooLarge { path: source_path.to_path_buf(), size, max: consts::MAX_FILE_SIZE });
        }
        for folder in &mut self.folders {
            folder.files.retain(|f| !f.matches_path_case_insensitive(&rel_path));
        }
        if self.total_file_count() + 1 > consts::MAX_NUM_FILES {
            return Err(CabError::TooManyFiles { max: consts::MAX_NUM_FILES });
        }
        let datetime = host_modified_datetime(&metadata);
        let is_read_only = metadata.permissions().readonly();
        let is_hidden = host_is_hidden(source_path, &metadata);
        let entry = FileEntry::new_external(rel_path, source_path.to_path_buf(), size as u32, datetime, is_read_only, is_hidden);
        let folder_index = self.select_folder_for(size as u32);
        self.folders[folder_index].files.push(entry);
        Ok(())
    }

    /// Extracts `rel_path` to `dest_path`, returning `false` (not an error)
    /// if no file matches. Bytes are copied from wherever they currently
    /// live: the original cabinet's data blocks, or a pending external
    /// source if the file was added but not yet saved.
    pub fn extract_to_file(
        &mut self,
        rel_path: &str,
        dest_path: impl AsRef<Path>,
        mut on_progress: impl FnMut(&str, u64),
        cancel: &CancelToken,
    ) -> Result<bool> {
        tracing::trace!(rel_path = %rel_path, "extracting file");
        let Some((folder_index, file_index)) = self.locate(rel_path) else {
            tracing::warn!(rel_path = %rel_path, "extract_to_file: no such file in cabinet");
            return Ok(false);
        };
        let source = self.folders[folder_index].files[file_index].source.clone();
        let size = self.folders[folder_index].files[file_index].uncompressed_size();
        let datetime = self.folders[folder_index].files[file_index].datetime();
        let is_read_only = self.folders[folder_index].files[file_index].is_read_only();
        let is_hidden = self.folders[folder_index].files[file_index].is_hidden();

        let dest_path = dest_path.as_ref();
        let mut dest = create_dest_file(dest_path, is_hidden)?;
        match source {
            FileSource::External { path } => {
                let mut src = std::fs::File::open(&path)
                    .map_err(|_| CabError::MissingSource { path: path.clone(), rel_path: rel_path.to_string() })?;
                let mut buf = vec![0u8; consts::MAX_UNCOMPRESSED_BLOCK_SIZE];
                let mut remaining = size as u64;
                let mut done = 0u64;
                while remaining > 0 {
                    cancel.check()?;
                    let want = remaining.min(buf.len() as u64) as usize;
                    src.read_exact(&mut buf[..want])
                        .map_err(|_| CabError::MissingSource { path: path.clone(), rel_path: rel_path.to_string() })?;
                    dest.write_all(&buf[..want])?;
                    done += want as u64;
                    remaining -= want as u64;
                    on_progress(rel_path, done);
                }
            }
            FileSource::Cabinet { origin_offset } => {
                let reader = self
                    .reader
                    .as_mut()
                    .ok_or_else(|| CabError::invalid_data("cabinet has no open read handle"))?;
                let folder_index_u16 = folder_index as u16;
                let folder = &mut self.folders[folder_index];
                folder::stream_file_bytes(
                    reader,
                    folder,
                    folder_index_u16,
                    rel_path,
                    origin_offset,
                    size,
                    |chunk| {
                        dest.write_all(chunk)?;
                        Ok(())
                    },
                    |done| on_progress(rel_path, done),
                    cancel,
                )?;
            }
        }
        apply_host_metadata(dest_path, datetime, is_read_only)?;
        Ok(true)
    }

    /// Removes every file matching `rel_path` (case-insensitively), across
    /// all folders. Returns `true` iff at least one was removed.
    pub fn delete_file(&mut self, rel_path: &str) -> Result<bool> {
        tracing::debug!(rel_path = %rel_path, "deleting file");
        let mut removed = false;
        for folder in &mut self.folders {
            let before = folder.files.len();
            folder.files.retain(|f| !f.matches_path_case_insensitive(rel_path));
            if folder.files.len() != before {
                removed = true;
            }
        }
        if !removed {
            tracing::warn!(rel_path = %rel_path, "delete_file: no such file in cabinet");
        }
        Ok(removed)
    }

    /// Renames the first file matching `old_rel_path` to `new_rel_path`.
    /// Returns `true` iff a file was found. Since a file's byte source is
    /// tracked independently of its display name, no separate "reader map"
    /// needs updating: a later `save` still finds the right bytes.
    pub fn move_file(&mut self, old_rel_path: &str, new_rel_path: &str) -> Result<bool> {
        tracing::debug!(old_rel_path = %old_rel_path, new_rel_path = %new_rel_path, "renaming file");
        for folder in &mut self.folders {
            if let Some(entry) = folder.files.iter_mut().find(|f| f.matches_path_case_insensitive(old_rel_path)) {
                entry.rel_path = new_rel_path.to_string();
                return Ok(true);
            }
        }
        tracing::warn!(old_rel_path = %old_rel_path, "move_file: no such file in cabinet");
        Ok(false)
    }

    /// Writes a complete new cabinet to a temporary file beside `path` and
    /// atomically renames it into place. The original is left untouched if
    /// anything fails.
    pub fn save(&mut self, compression_type: CompressionType, mut on_progress: impl FnMut(&str, u64), cancel: &CancelToken) -> Result<()> {
        tracing::info!(path = %self.path.display(), "saving cabinet");
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let result = self.write_cabinet(tmp.as_file_mut(), compression_type, &mut on_progress, cancel);
        result?;
        tmp.as_file_mut().sync_all()?;
        self.reader.take();
        let tmp_path = tmp.path().to_path_buf();
        tmp.persist(&self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            CabError::Io(e.error)
        })?;
        self.reader = Some(std::fs::File::open(&self.path)?);
        Ok(())
    }

    fn write_cabinet(
        &mut self,
        writer: &mut std::fs::File,
        compression_type: CompressionType,
        on_progress: &mut impl FnMut(&str, u64),
        cancel: &CancelToken,
    ) -> Result<()> {
        for folder in &mut self.folders {
            folder.set_compression_type(compression_type);
        }

        let header_reserve_region = if !self.header_reserve.is_empty() || self.folder_reserve_size > 0 || self.data_reserve_size > 0 {
            4 + self.header_reserve.len()
        } else {
            0
        };
        let prev_region = self
            .prev_cabinet
            .as_ref()
            .map(|link| link.cabinet_name.len() + 1 + link.disk_name.len() + 1)
            .unwrap_or(0);
        let header_size = consts::CABINET_HEADER_SIZE as usize + header_reserve_region + prev_region;
        let folders_region: usize = self.folders.iter().map(|_| folder::folder_header_size(self.folder_reserve_size as usize)).sum();
        let first_file_entry_offset = (header_size + folders_region) as u32;

        writer.seek(SeekFrom::Start(0))?;
        writer.write_u32::<LittleEndian>(consts::FILE_SIGNATURE)?;
        writer.write_u32::<LittleEndian>(0)?;
        let cabinet_size_pos = writer.stream_position()?;
        writer.write_u32::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(first_file_entry_offset)?;
        writer.write_u32::<LittleEndian>(0)?;
        writer.write_u8(consts::VERSION_MINOR)?;
        writer.write_u8(consts::VERSION_MAJOR)?;
        writer.write_u16::<LittleEndian>(self.folders.len() as u16)?;
        let total_files: usize = self.folders.iter().map(Folder::file_count).sum();
        writer.write_u16::<LittleEndian>(total_files as u16)?;

        let mut flags = 0u16;
        if header_reserve_region > 0 {
            flags |= consts::FLAG_RESERVE_PRESENT;
        }
        if self.prev_cabinet.is_some() {
            flags |= consts::FLAG_PREV_CABINET;
        }
        writer.write_u16::<LittleEndian>(flags)?;
        writer.write_u16::<LittleEndian>(self.set_id)?;
        writer.write_u16::<LittleEndian>(self.cabinet_index)?;

        if header_reserve_region > 0 {
            writer.write_u16::<LittleEndian>(self.header_reserve.len() as u16)?;
            writer.write_u8(self.folder_reserve_size)?;
            writer.write_u8(self.data_reserve_size)?;
            writer.write_all(&self.header_reserve)?;
        }
        if let Some(link) = &self.prev_cabinet {
            crate::string::write_null_terminated_string(writer, link.cabinet_name.as_bytes())?;
            crate::string::write_null_terminated_string(writer, link.disk_name.as_bytes())?;
        }

        let mut folder_header_positions = Vec::with_capacity(self.folders.len());
        for folder in &self.folders {
            folder_header_positions.push(writer.stream_position()?);
            folder::write_folder_header(&mut *writer, folder)?;
        }

        debug_assert_eq!(writer.stream_position()?, first_file_entry_offset as u64);
        for folder in &self.folders {
            let mut offset = 0u32;
            for file in &folder.files {
                file::write_file_header(&mut *writer, file, folder.index as u16, offset)?;
                offset += file.uncompressed_size();
            }
        }

        let data_reserve_size = self.data_reserve_size as usize;
        let Cabinet { reader, folders, .. } = self;
        for (index, folder) in folders.iter_mut().enumerate() {
            cancel.check()?;
            let folder_index = index as u16;
            tracing::trace!(folder_index, file_count = folder.file_count(), "rewriting folder data blocks");
            folder::write_folder_data_blocks(
                folder,
                folder_index,
                reader.as_mut(),
                writer,
                data_reserve_size,
                |p, b| on_progress(p, b),
                cancel,
            )?;
            let resume_pos = writer.stream_position()?;
            writer.seek(SeekFrom::Start(folder_header_positions[index]))?;
            folder::write_folder_header(&mut *writer, folder)?;
            writer.seek(SeekFrom::Start(resume_pos))?;
        }

        let total_size = writer.stream_position()?;
        if total_size > consts::MAX_TOTAL_CAB_SIZE as u64 {
            return Err(CabError::CabinetTooLarge { size: total_size, max: consts::MAX_TOTAL_CAB_SIZE });
        }
        writer.seek(SeekFrom::Start(cabinet_size_pos))?;
        writer.write_u32::<LittleEndian>(total_size as u32)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(windows)]
fn create_dest_file(path: &Path, hidden: bool) -> std::io::Result<std::fs::File> {
    use std::os::windows::fs::OpenOptionsExt;
    let mut options = std::fs::File::options();
    options.write(true).create(true).truncate(true);
    if hidden {
        options.attributes(0x2);
    }
    options.open(path)
}

#[cfg(not(windows))]
fn create_dest_file(path: &Path, _hidden: bool) -> std::io::Result<std::fs::File> {
    std::fs::File::create(path)
}

#[cfg(windows)]
fn host_is_hidden(path: &Path, _metadata: &std::fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    std::fs::metadata(path).map(|m| m.file_attributes() & 0x2 != 0).unwrap_or(false)
}

#[cfg(not(windows))]
fn host_is_hidden(path: &Path, _metadata: &std::fs::Metadata) -> bool {
    path.file_name().and_then(|n| n.to_str()).map(|name| name.starts_with('.')).unwrap_or(false)
}

fn host_modified_datetime(metadata: &std::fs::Metadata) -> PrimitiveDateTime {
    let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let unix_time = modified.duration_since(std::time::SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    time::OffsetDateTime::from_unix_timestamp(unix_time)
        .map(|odt| PrimitiveDateTime::new(odt.date(), odt.time()))
        .unwrap_or_else(|_| {
            PrimitiveDateTime::new(
                time::Date::from_calendar_date(1980, time::Month::January, 1).expect("valid date"),
                time::Time::MIDNIGHT,
            )
        })
}

fn apply_host_metadata(path: &Path, datetime: Option<PrimitiveDateTime>, read_only: bool) -> Result<()> {
    if let Some(dt) = datetime {
        let unix_time = dt.assume_utc().unix_timestamp();
        let file_time = filetime::FileTime::from_unix_time(unix_time, 0);
        filetime::set_file_mtime(path, file_time)?;
    }
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_readonly(read_only);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}
