use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::compaction::{CompactionConfig, CompactionWorker};
use crate::error::{Error, Result};
use crate::iterator::{MergeIterator, StorageIterator, VecIterator};
use crate::manifest::version::{Version, VersionSet};
use crate::memtable::MemTable;
use crate::sstable::builder::write_table;
use crate::sstable::reader::Table;
use crate::sstable::table_path;
use crate::types::{InternalKey, LookupResult, Value};
use crate::wal::{self, SyncPolicy, WalReader, WalRecord, WalWriter};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Memtable size that triggers rotation and flush.
    pub memtable_size_bytes: usize,
    /// Target SSTable data block size.
    pub block_size_bytes: usize,
    /// Target bloom filter false-positive rate.
    pub bloom_false_positive_rate: f64,
    /// Tables per size tier before that tier is compacted.
    pub compaction_fan_in: usize,
    /// Output generation at which bottom-most compactions may garbage-collect
    /// tombstones.
    pub tombstone_gc_horizon: u32,
    /// WAL durability policy.
    pub wal_sync_policy: SyncPolicy,
    /// How often the compaction worker looks for work unprompted.
    pub compaction_tick: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            memtable_size_bytes: 4 * 1024 * 1024,
            block_size_bytes: 64 * 1024,
            bloom_false_positive_rate: 0.01,
            compaction_fan_in: 4,
            tombstone_gc_horizon: 1,
            wal_sync_policy: SyncPolicy::EveryWrite,
            compaction_tick: Duration::from_millis(500),
        }
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub puts: u64,
    pub gets: u64,
    pub deletes: u64,
    /// SSTable reads skipped entirely by a bloom filter miss.
    pub bloom_skips: u64,
    pub flushes: u64,
    pub compactions: u64,
    pub memtable_bytes: u64,
    pub frozen_memtables: u64,
    pub live_tables: u64,
    pub table_file_bytes: u64,
}

#[derive(Default)]
struct Counters {
    puts: AtomicU64,
    gets: AtomicU64,
    deletes: AtomicU64,
    bloom_skips: AtomicU64,
    flushes: AtomicU64,
}

/// Memtable state: the active (writable) table plus frozen tables awaiting
/// flush, oldest first. Swapped wholesale under a brief write lock.
struct MemState {
    active: Arc<RwLock<MemTable>>,
    frozen: Vec<Arc<RwLock<MemTable>>>,
}

struct DbInner {
    dir: PathBuf,
    opts: Options,
    versions: Arc<VersionSet>,
    mem: RwLock<MemState>,
    /// Serializes writers: sequence allocation, WAL append, and rotation all
    /// happen under this lock. Reads never take it.
    wal: Mutex<WalWriter>,
    seq: AtomicU64,
    closed: AtomicBool,
    counters: Counters,
    compactions_run: Arc<AtomicU64>,
    flush_tx: Sender<FlushMsg>,
}

enum FlushMsg {
    /// Drain all frozen memtables; reply when done if a channel is given.
    Flush { done: Option<Sender<Result<()>>> },
    Shutdown,
}

struct Workers {
    flush_handle: Option<std::thread::JoinHandle<()>>,
    compaction: CompactionWorker,
}

/// The storage engine facade.
///
/// Write path: WAL (durability) → MemTable (speed) → flush → SSTable
/// (archive) → compaction (cleanup). Reads go newest-to-oldest:
/// active memtable, frozen memtables, then SSTables by version order,
/// stopping at the first resolved entry (value or tombstone).
pub struct DB {
    inner: Arc<DbInner>,
    workers: Mutex<Option<Workers>>,
}

impl DB {
    /// Open (or create) a database at `path`.
    ///
    /// Recovery: replay the manifest, remove orphan files, replay WAL
    /// segments not yet covered by SSTables into the memtable (truncating a
    /// torn tail), then start the background flush and compaction workers.
    pub fn open(path: impl AsRef<Path>, opts: Options) -> Result<DB> {
        let dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let versions = Arc::new(VersionSet::recover(&dir)?);
        let mut max_seq = versions.current().max_sequence();

        // Replay WAL segments the manifest says are not yet flushed.
        let log_number = versions.log_number();
        let mut active = MemTable::new(opts.memtable_size_bytes);
        let mut max_wal_id = log_number;
        for (id, segment) in wal::list_segments(&dir)? {
            if id < log_number {
                // Fully covered by SSTables; the flush that covered it
                // crashed before deleting it.
                debug!(wal = id, "removing obsolete WAL segment");
                if let Err(e) = std::fs::remove_file(&segment) {
                    warn!(wal = id, error = %e, "failed to remove obsolete WAL segment");
                }
                continue;
            }
            let reader = WalReader::open(&segment)?;
            let replay = reader.replay()?;
            if replay.truncated {
                reader.truncate_to(replay.valid_len)?;
            }
            for record in replay.records {
                max_seq = max_seq.max(record.sequence);
                match record.value_type {
                    crate::types::ValueType::Put => {
                        active.put(record.key, record.value, record.sequence)
                    }
                    crate::types::ValueType::Delete => active.delete(record.key, record.sequence),
                }
            }
            active.attach_wal(id);
            max_wal_id = max_wal_id.max(id);
        }

        let wal_id = max_wal_id + 1;
        let writer = WalWriter::new(&wal::segment_path(&dir, wal_id), wal_id, opts.wal_sync_policy)?;
        active.attach_wal(wal_id);

        let compactions_run = Arc::new(AtomicU64::new(0));
        let (flush_tx, flush_rx) = bounded::<FlushMsg>(16);

        let inner = Arc::new(DbInner {
            dir: dir.clone(),
            opts: opts.clone(),
            versions: versions.clone(),
            mem: RwLock::new(MemState {
                active: Arc::new(RwLock::new(active)),
                frozen: Vec::new(),
            }),
            wal: Mutex::new(writer),
            seq: AtomicU64::new(max_seq),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
            compactions_run: compactions_run.clone(),
            flush_tx,
        });

        let flush_inner = inner.clone();
        let flush_handle = std::thread::Builder::new()
            .name("silt-flush".into())
            .spawn(move || flush_loop(flush_inner, flush_rx))
            .expect("failed to spawn flush thread");

        let compaction = CompactionWorker::spawn(
            versions,
            CompactionConfig {
                fan_in: opts.compaction_fan_in,
                tombstone_gc_horizon: opts.tombstone_gc_horizon,
                block_size: opts.block_size_bytes,
                false_positive_rate: opts.bloom_false_positive_rate,
                tick: opts.compaction_tick,
            },
            compactions_run,
        );

        info!(dir = %dir.display(), sequence = max_seq, "database opened");
        Ok(DB {
            inner,
            workers: Mutex::new(Some(Workers {
                flush_handle: Some(flush_handle),
                compaction,
            })),
        })
    }

    /// Insert or update a key. Returns once the write is durable in the WAL.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(key, value, false)?;
        self.inner.counters.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Delete a key by writing a tombstone. Durable like `put`.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.write(key, &[], true)?;
        self.inner.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write(&self, key: &[u8], value: &[u8], tombstone: bool) -> Result<()> {
        self.check_open()?;
        let inner = &self.inner;

        let mut walw = inner.wal.lock();
        let seq = inner.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let record = if tombstone {
            WalRecord::delete(key.to_vec(), seq)
        } else {
            WalRecord::put(key.to_vec(), value.to_vec(), seq)
        };
        // Durability point: a put that cannot be made durable must fail.
        walw.append(&record)?;

        let rotate = {
            let mem = inner.mem.read();
            let mut active = mem.active.write();
            if tombstone {
                active.delete(key.to_vec(), seq);
            } else {
                active.put(key.to_vec(), value.to_vec(), seq);
            }
            active.is_full()
        };

        if rotate {
            self.rotate(&mut walw)?;
        }
        Ok(())
    }

    /// Freeze the active memtable, rotate the WAL segment, and nudge the
    /// flush worker. Readers see only a pointer swap.
    fn rotate(&self, walw: &mut WalWriter) -> Result<()> {
        let inner = &self.inner;
        walw.sync()?;
        let new_id = walw.id() + 1;
        let new_writer = WalWriter::new(
            &wal::segment_path(&inner.dir, new_id),
            new_id,
            inner.opts.wal_sync_policy,
        )?;
        *walw = new_writer;

        let mut fresh = MemTable::new(inner.opts.memtable_size_bytes);
        fresh.attach_wal(new_id);
        {
            let mut mem = inner.mem.write();
            let old = std::mem::replace(&mut mem.active, Arc::new(RwLock::new(fresh)));
            mem.frozen.push(old);
        }
        let _ = inner.flush_tx.send(FlushMsg::Flush { done: None });
        Ok(())
    }

    /// Look up a key. `Ok(None)` is a normal miss, not an error.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        self.check_open()?;
        let inner = &self.inner;
        inner.counters.gets.fetch_add(1, Ordering::Relaxed);

        // Memtables, newest first.
        let (active, frozen) = {
            let mem = inner.mem.read();
            (mem.active.clone(), mem.frozen.clone())
        };
        if let Some(hit) = active.read().get(key) {
            return Ok(resolve(hit));
        }
        for memtable in frozen.iter().rev() {
            if let Some(hit) = memtable.read().get(key) {
                return Ok(resolve(hit));
            }
        }

        // SSTables, newest data first; the first resolved entry wins.
        let version = inner.versions.current();
        for table in version.tables() {
            if table.filter_rules_out(key) {
                inner.counters.bloom_skips.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if let Some(hit) = table.get(key)? {
                return Ok(resolve(hit));
            }
        }
        Ok(None)
    }

    /// Ordered scan over `[low, high)`: lazy, deduplicated, tombstones and
    /// superseded versions suppressed.
    pub fn scan(&self, low: &[u8], high: &[u8]) -> Result<Scan> {
        self.check_open()?;
        let inner = &self.inner;

        let (active, frozen) = {
            let mem = inner.mem.read();
            (mem.active.clone(), mem.frozen.clone())
        };

        let mut sources: Vec<Box<dyn StorageIterator>> = Vec::new();
        sources.push(Box::new(VecIterator::new(
            active.read().range_entries(low, high),
        )));
        for memtable in frozen.iter().rev() {
            sources.push(Box::new(VecIterator::new(
                memtable.read().range_entries(low, high),
            )));
        }

        let version = inner.versions.current();
        for table in version.tables() {
            let meta = table.meta();
            if meta.min_key.as_slice() >= high || meta.max_key.as_slice() < low {
                continue;
            }
            sources.push(Box::new(table.range_iter(low)?));
        }

        Ok(Scan {
            merged: MergeIterator::new(sources)?,
            high: high.to_vec(),
            _version: version,
        })
    }

    /// Flush the current memtable contents to an SSTable and wait for it.
    pub fn flush(&self) -> Result<()> {
        self.check_open()?;
        {
            let mut walw = self.inner.wal.lock();
            let has_data = !self.inner.mem.read().active.read().is_empty();
            if has_data {
                self.rotate(&mut walw)?;
            }
        }
        self.flush_sync()
    }

    fn flush_sync(&self) -> Result<()> {
        let (done_tx, done_rx) = bounded(1);
        self.inner
            .flush_tx
            .send(FlushMsg::Flush {
                done: Some(done_tx),
            })
            .map_err(|_| Error::Closed)?;
        done_rx.recv().map_err(|_| Error::Closed)?
    }

    /// Run one compaction round synchronously. `Ok(false)` means no tier
    /// needed merging.
    pub fn compact_now(&self) -> Result<bool> {
        self.check_open()?;
        let workers = self.workers.lock();
        match workers.as_ref() {
            Some(w) => w.compaction.compact_now(),
            None => Err(Error::Closed),
        }
    }

    /// Current engine statistics.
    pub fn stats(&self) -> Stats {
        let inner = &self.inner;
        let (memtable_bytes, frozen_memtables) = {
            let mem = inner.mem.read();
            let pair = (
                mem.active.read().size() as u64,
                mem.frozen.len() as u64,
            );
            pair
        };
        let version = inner.versions.current();
        Stats {
            puts: inner.counters.puts.load(Ordering::Relaxed),
            gets: inner.counters.gets.load(Ordering::Relaxed),
            deletes: inner.counters.deletes.load(Ordering::Relaxed),
            bloom_skips: inner.counters.bloom_skips.load(Ordering::Relaxed),
            flushes: inner.counters.flushes.load(Ordering::Relaxed),
            compactions: inner.compactions_run.load(Ordering::Relaxed),
            memtable_bytes,
            frozen_memtables,
            live_tables: version.table_count() as u64,
            table_file_bytes: version.total_file_bytes(),
        }
    }

    /// Flush the remaining memtable, stop the background workers, and close
    /// all files. The engine rejects operations afterwards.
    pub fn close(&self) -> Result<()> {
        let workers = {
            let mut guard = self.workers.lock();
            guard.take()
        };
        let Some(mut workers) = workers else {
            return Ok(()); // already closed
        };

        let flush_result = self.flush();
        self.inner.closed.store(true, Ordering::Release);

        let _ = self.inner.flush_tx.send(FlushMsg::Shutdown);
        if let Some(handle) = workers.flush_handle.take() {
            let _ = handle.join();
        }
        workers.compaction.shutdown();
        info!(dir = %self.inner.dir.display(), "database closed");
        flush_result
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "error while closing database on drop");
        }
    }
}

fn resolve(hit: LookupResult) -> Option<Value> {
    match hit {
        LookupResult::Value(v) => Some(v),
        LookupResult::Tombstone => None,
    }
}

/// Lazy, ordered scan cursor. Holds the version (and therefore the table
/// files) alive for its whole lifetime.
pub struct Scan {
    merged: MergeIterator,
    high: Vec<u8>,
    _version: Arc<Version>,
}

impl Iterator for Scan {
    type Item = Result<(Value, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.merged.is_valid() {
            let key = self.merged.key();
            if key.user_key.as_slice() >= self.high.as_slice() {
                return None;
            }
            if key.is_tombstone() {
                if let Err(e) = self.merged.next() {
                    return Some(Err(e));
                }
                continue;
            }
            let item = (key.user_key.clone(), self.merged.value().to_vec());
            if let Err(e) = self.merged.next() {
                return Some(Err(e));
            }
            return Some(Ok(item));
        }
        None
    }
}

/// How often the flush worker re-checks for frozen memtables it failed to
/// drain earlier. Doubled per consecutive failure, capped.
const FLUSH_RETRY_TICK: Duration = Duration::from_millis(200);

/// Background flush worker: drains frozen memtables oldest-first into
/// SSTables, committing each through the manifest before deleting the WAL
/// segments it covered. I/O failures are logged and retried with backoff —
/// frozen memtables stay readable the whole time.
fn flush_loop(inner: Arc<DbInner>, rx: Receiver<FlushMsg>) {
    let mut consecutive_failures = 0u32;
    loop {
        let tick = FLUSH_RETRY_TICK * 2u32.pow(consecutive_failures.min(5));
        match rx.recv_timeout(tick) {
            Ok(FlushMsg::Flush { done }) => {
                let result = drain_frozen(&inner);
                match &result {
                    Ok(()) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "flush failed");
                    }
                }
                if let Some(done) = done {
                    let _ = done.send(result);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if inner.mem.read().frozen.is_empty() {
                    continue;
                }
                match drain_frozen(&inner) {
                    Ok(()) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, failures = consecutive_failures,
                               "flush retry failed, backing off");
                    }
                }
            }
            Ok(FlushMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                debug!("flush worker shutting down");
                return;
            }
        }
    }
}

/// Flush every frozen memtable, oldest first.
fn drain_frozen(inner: &Arc<DbInner>) -> Result<()> {
    loop {
        let memtable = {
            let mem = inner.mem.read();
            match mem.frozen.first() {
                Some(m) => m.clone(),
                None => return Ok(()),
            }
        };
        flush_one(inner, &memtable)?;
        let mut mem = inner.mem.write();
        mem.frozen.retain(|m| !Arc::ptr_eq(m, &memtable));
        inner.counters.flushes.fetch_add(1, Ordering::Relaxed);
    }
}

fn flush_one(inner: &Arc<DbInner>, memtable: &Arc<RwLock<MemTable>>) -> Result<()> {
    let (entries, wal_ids): (Vec<(InternalKey, Value)>, Vec<u64>) = {
        let guard = memtable.read();
        (
            guard.iter().map(|(k, v)| (k.clone(), v.to_vec())).collect(),
            guard.wal_ids().to_vec(),
        )
    };

    let id = inner.versions.allocate_table_id();
    let path = table_path(&inner.dir, id);
    let mut iter = VecIterator::new(entries);
    let meta = write_table(
        &path,
        id,
        0,
        inner.opts.block_size_bytes,
        inner.opts.bloom_false_positive_rate,
        &mut iter,
    )?;

    let table = Table::open(&path)?;
    // WAL segments strictly covered by this memtable become obsolete. The
    // highest attached id may be shared with the next memtable only at
    // recovery boundaries; flushing FIFO keeps this monotone.
    let log_number = wal_ids.iter().copied().max().map_or(0, |m| m + 1);
    inner.versions.apply_flush(table, log_number)?;

    for wal_id in wal_ids {
        let segment = wal::segment_path(&inner.dir, wal_id);
        if let Err(e) = std::fs::remove_file(&segment) {
            warn!(wal = wal_id, error = %e, "failed to remove flushed WAL segment");
        }
    }
    info!(
        table = meta.id,
        entries = meta.entry_count,
        bytes = meta.file_size,
        "memtable flushed"
    );
    Ok(())
}
