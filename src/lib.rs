//! A read/modify/write library for Microsoft Cabinet (`.cab`) archives,
//! restricted to the uncompressed ("Store") subset and to single-cabinet
//! (non-spanning) files.
//!
//! ```no_run
//! use cabstore::{Cabinet, CompressionType};
//! use cabstore::progress::CancelToken;
//!
//! # fn main() -> cabstore::Result<()> {
//! let mut cab = Cabinet::create("/tmp/demo.cab");
//! cab.add_external_file("/etc/hostname", "hostname.txt")?;
//! cab.save(CompressionType::None, |_, _| {}, &CancelToken::new())?;
//! # Ok(())
//! # }
//! ```
//!
//! What this crate does *not* do: decode or encode MSZip/Quantum/Lzx data
//! (folders using them are parsed and preserved but fail if read or
//! written), follow a multi-cabinet "next" chain, or verify data-block
//! checksums (they're parsed/preserved but never computed).

mod cabinet;
mod consts;
mod ctype;
mod datablock;
mod datetime;
mod error;
mod file;
mod folder;
pub mod manager;
pub mod progress;
mod string;

pub use cabinet::{Cabinet, CabinetLink};
pub use ctype::CompressionType;
pub use datetime::{datetime_from_bits, datetime_to_bits};
pub use error::{CabError, Result};
pub use file::FileEntry;
pub use folder::Folder;
pub use manager::{run_batch, CabFailure, Event, ManagerError, Request};
