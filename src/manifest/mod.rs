//! Manifest: the crash-consistent record of which SSTables and WAL segments
//! constitute the database.
//!
//! Layout on disk:
//! - `MANIFEST-<n>`: append-only edit log. Header `[magic(8B)][version(4B)]`,
//!   then records `[len(4B)][edit payload][crc32(4B)]`. Every append is
//!   fsync'd before the corresponding state change becomes visible.
//! - `CURRENT`: names the live manifest file. Replaced by writing a temp
//!   file and renaming it over `CURRENT`, so a crash between manifests never
//!   leaves the pointer dangling.
//!
//! On open, the live manifest is replayed, a fresh manifest containing a
//! single snapshot edit is written, and `CURRENT` is swapped — so the edit
//! history never grows without bound.
//!
//! A torn record at the manifest tail is ignored (the edit never took
//! effect; its side files are re-discovered via WAL replay or removed as
//! orphans). A torn record mid-log is fatal corruption.

pub mod edit;
pub mod version;

pub use edit::VersionEdit;
pub use version::{Version, VersionSet};

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};

const MANIFEST_MAGIC: u64 = 0x53494C545F4D414E; // "SILT_MAN"
const MANIFEST_FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 12;

/// Append-side handle to a manifest edit log.
pub struct Manifest {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl Manifest {
    /// Create a new, empty manifest file with a header, fsync'd.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&MANIFEST_MAGIC.to_le_bytes())?;
        writer.write_all(&MANIFEST_FORMAT_VERSION.to_le_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(Manifest {
            writer,
            path: path.to_path_buf(),
        })
    }

    /// Append one edit and fsync. The edit is durable when this returns.
    pub fn append(&mut self, edit: &VersionEdit) -> Result<()> {
        let payload = edit.encode();
        self.writer
            .write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer
            .write_all(&crc32fast::hash(&payload).to_le_bytes())?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay every edit in the manifest at `path`.
    pub fn replay(path: &Path) -> Result<Vec<VersionEdit>> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        if data.len() < HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "{}: manifest shorter than header",
                path.display()
            )));
        }
        let magic = u64::from_le_bytes(data[0..8].try_into().unwrap());
        if magic != MANIFEST_MAGIC {
            return Err(Error::Corruption(format!(
                "{}: bad manifest magic {magic:#x}",
                path.display()
            )));
        }
        let version = u32::from_le_bytes(data[8..12].try_into().unwrap());
        if version != MANIFEST_FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "{}: unsupported manifest version {version}",
                path.display()
            )));
        }

        let mut edits = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < data.len() {
            let remaining = &data[offset..];
            if remaining.len() < 4 {
                warn!(manifest = %path.display(), offset, "torn record at manifest tail, ignoring");
                break;
            }
            let len = u32::from_le_bytes(remaining[0..4].try_into().unwrap()) as usize;
            let total = 4 + len + 4;
            if remaining.len() < total {
                warn!(manifest = %path.display(), offset, "torn record at manifest tail, ignoring");
                break;
            }
            let payload = &remaining[4..4 + len];
            let stored_crc = u32::from_le_bytes(remaining[4 + len..total].try_into().unwrap());
            if crc32fast::hash(payload) != stored_crc {
                if offset + total >= data.len() {
                    warn!(manifest = %path.display(), offset, "corrupt record at manifest tail, ignoring");
                    break;
                }
                return Err(Error::Corruption(format!(
                    "{}: manifest corrupt mid-stream at offset {offset}",
                    path.display()
                )));
            }
            edits.push(VersionEdit::decode(payload)?);
            offset += total;
        }
        Ok(edits)
    }
}

/// Name of the manifest file with the given number.
pub fn manifest_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{number:06}"))
}

/// Read `CURRENT`, returning the live manifest path if one is published.
pub fn read_current(dir: &Path) -> Result<Option<PathBuf>> {
    let current = dir.join("CURRENT");
    match std::fs::read_to_string(&current) {
        Ok(name) => {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Corruption("CURRENT file is empty".into()));
            }
            Ok(Some(dir.join(name)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically point `CURRENT` at `manifest_name` (temp write + rename).
pub fn publish_current(dir: &Path, manifest_name: &str) -> Result<()> {
    let tmp = dir.join("CURRENT.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(manifest_name.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, dir.join("CURRENT"))?;
    // Make the rename itself durable.
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    Ok(())
}
