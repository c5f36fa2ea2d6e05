use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::manifest::edit::VersionEdit;
use crate::manifest::{manifest_path, publish_current, read_current, Manifest};
use crate::sstable::footer::TableMeta;
use crate::sstable::reader::Table;
use crate::sstable::table_path;

/// An immutable snapshot of the live SSTable set.
///
/// Readers grab an `Arc<Version>` at the start of an operation and hold it
/// until they finish; compaction installs a new version and marks retired
/// tables obsolete, whose files are deleted only when the last `Arc<Table>`
/// drops. No reader ever observes a half-applied transition.
pub struct Version {
    /// Live tables in read precedence order: generation ascending (fresh
    /// flushes first), id descending within a generation — newest data
    /// is always searched first.
    tables: Vec<Arc<Table>>,
}

impl Version {
    fn new(mut tables: Vec<Arc<Table>>) -> Arc<Self> {
        tables.sort_by(|a, b| {
            a.meta()
                .generation
                .cmp(&b.meta().generation)
                .then_with(|| b.meta().id.cmp(&a.meta().id))
        });
        Arc::new(Version { tables })
    }

    /// Tables in read precedence order (newest data first).
    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn total_file_bytes(&self) -> u64 {
        self.tables.iter().map(|t| t.meta().file_size).sum()
    }

    /// Highest sequence number present in any live table.
    pub fn max_sequence(&self) -> u64 {
        self.tables
            .iter()
            .map(|t| t.meta().max_sequence)
            .max()
            .unwrap_or(0)
    }
}

/// Owns the manifest and the chain of immutable versions.
///
/// Every flush or compaction appends one durable manifest edit and then
/// atomically installs the new version. A crash between the two leaves the
/// manifest ahead of memory, which is fine: recovery rebuilds from the
/// manifest alone.
pub struct VersionSet {
    dir: PathBuf,
    manifest: Mutex<Manifest>,
    current: RwLock<Arc<Version>>,
    next_table_id: AtomicU64,
    /// WAL segments with id below this are covered by SSTables.
    log_number: AtomicU64,
}

impl VersionSet {
    /// Rebuild state from the directory: replay the live manifest, open the
    /// live tables, clean up orphans, and start a fresh manifest with a
    /// single snapshot edit.
    pub fn recover(dir: &Path) -> Result<VersionSet> {
        let mut live: BTreeMap<u64, TableMeta> = BTreeMap::new();
        let mut log_number = 0u64;
        let mut next_table_id = 1u64;
        let mut old_manifest: Option<PathBuf> = None;

        if let Some(manifest_file) = read_current(dir)? {
            for edit in Manifest::replay(&manifest_file)? {
                match edit {
                    VersionEdit::Snapshot {
                        tables,
                        log_number: ln,
                        next_table_id: nt,
                    } => {
                        live = tables.into_iter().map(|t| (t.id, t)).collect();
                        log_number = ln;
                        next_table_id = nt;
                    }
                    VersionEdit::Flush { table, log_number: ln } => {
                        next_table_id = next_table_id.max(table.id + 1);
                        log_number = log_number.max(ln);
                        live.insert(table.id, table);
                    }
                    VersionEdit::Compaction { added, removed } => {
                        for id in removed {
                            live.remove(&id);
                        }
                        for table in added {
                            next_table_id = next_table_id.max(table.id + 1);
                            live.insert(table.id, table);
                        }
                    }
                }
            }
            old_manifest = Some(manifest_file);
        }

        let mut tables = Vec::with_capacity(live.len());
        for meta in live.values() {
            let path = table_path(dir, meta.id);
            let table = Table::open(&path).map_err(|e| {
                Error::Corruption(format!(
                    "manifest references unreadable table {}: {e}",
                    path.display()
                ))
            })?;
            tables.push(table);
        }

        remove_orphan_tables(dir, &live)?;

        // Roll the manifest: new file, one snapshot edit, swap CURRENT.
        let number = old_manifest
            .as_deref()
            .and_then(parse_manifest_number)
            .unwrap_or(0)
            + 1;
        let new_path = manifest_path(dir, number);
        if new_path.exists() {
            // Leftover of a recovery that crashed before publishing CURRENT.
            warn!(path = %new_path.display(), "removing stale manifest");
            std::fs::remove_file(&new_path)?;
        }
        let mut manifest = Manifest::create(&new_path)?;
        manifest.append(&VersionEdit::Snapshot {
            tables: live.values().cloned().collect(),
            log_number,
            next_table_id,
        })?;
        let name = new_path
            .file_name()
            .and_then(|n| n.to_str())
            .expect("manifest file name is valid utf-8")
            .to_string();
        publish_current(dir, &name)?;
        if let Some(old) = old_manifest {
            if let Err(e) = std::fs::remove_file(&old) {
                warn!(path = %old.display(), error = %e, "failed to remove superseded manifest");
            }
        }
        info!(
            dir = %dir.display(),
            tables = tables.len(),
            log_number,
            "version set recovered"
        );

        Ok(VersionSet {
            dir: dir.to_path_buf(),
            manifest: Mutex::new(manifest),
            current: RwLock::new(Version::new(tables)),
            next_table_id: AtomicU64::new(next_table_id),
            log_number: AtomicU64::new(log_number),
        })
    }

    /// The current immutable snapshot. Cloning the `Arc` is the reader's
    /// reference acquisition; dropping it is the release.
    pub fn current(&self) -> Arc<Version> {
        self.current.read().clone()
    }

    pub fn log_number(&self) -> u64 {
        self.log_number.load(Ordering::Acquire)
    }

    /// Allocate a fresh table id.
    pub fn allocate_table_id(&self) -> u64 {
        self.next_table_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_table_id(&self) -> u64 {
        self.next_table_id.load(Ordering::Acquire)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record a completed flush: durable manifest edit first, then install
    /// the new version.
    pub fn apply_flush(&self, table: Arc<Table>, log_number: u64) -> Result<()> {
        let mut manifest = self.manifest.lock();
        manifest.append(&VersionEdit::Flush {
            table: table.meta().clone(),
            log_number,
        })?;
        self.log_number.fetch_max(log_number, Ordering::SeqCst);

        let mut current = self.current.write();
        let mut tables = current.tables.clone();
        tables.push(table);
        *current = Version::new(tables);
        Ok(())
    }

    /// Record a completed compaction: one durable edit introduces the new
    /// table(s) and retires the inputs atomically. Input files are deleted
    /// once the last reader releases them.
    pub fn apply_compaction(&self, added: Vec<Arc<Table>>, removed: Vec<u64>) -> Result<()> {
        let mut manifest = self.manifest.lock();
        manifest.append(&VersionEdit::Compaction {
            added: added.iter().map(|t| t.meta().clone()).collect(),
            removed: removed.clone(),
        })?;

        let mut current = self.current.write();
        let mut tables = Vec::with_capacity(current.tables.len() + added.len());
        for table in &current.tables {
            if removed.contains(&table.meta().id) {
                table.mark_obsolete();
            } else {
                tables.push(table.clone());
            }
        }
        tables.extend(added);
        *current = Version::new(tables);
        Ok(())
    }
}

/// Delete `.sst` files the manifest does not reference. These are leftovers
/// of flushes or compactions that crashed before their manifest edit.
fn remove_orphan_tables(dir: &Path, live: &BTreeMap<u64, TableMeta>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sst") {
            continue;
        }
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        let keep = id.map(|id| live.contains_key(&id)).unwrap_or(false);
        if !keep {
            warn!(path = %path.display(), "removing orphan SSTable");
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove orphan SSTable");
            }
        }
    }
    Ok(())
}

fn parse_manifest_number(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("MANIFEST-")?
        .parse()
        .ok()
}
