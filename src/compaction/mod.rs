//! Size-tiered background compaction.
//!
//! Tables are grouped into tiers by generation: flushes are generation 0,
//! and each compaction merges one tier's oldest `fan_in` tables into a
//! single table of generation + 1. Merging keeps only the newest version of
//! each key; tombstones are dropped only when nothing older could still hold
//! the key they shadow.
//!
//! The worker is an explicit background thread driven by a command channel
//! (compact now / shutdown) plus a periodic tick, so cancellation and
//! shutdown are deterministic. Failures are logged and retried with backoff;
//! the manifest edit is applied only on success, so a failed or abandoned
//! attempt leaves nothing partially visible.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::iterator::{MergeIterator, StorageIterator};
use crate::manifest::version::{Version, VersionSet};
use crate::sstable::builder::TableBuilder;
use crate::sstable::reader::Table;
use crate::sstable::table_path;

/// Tuning knobs the worker needs, copied out of the engine options.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Tables per tier before that tier is merged.
    pub fan_in: usize,
    /// Output generation at which bottom-most compactions may drop
    /// tombstones.
    pub tombstone_gc_horizon: u32,
    pub block_size: usize,
    pub false_positive_rate: f64,
    /// How often the worker looks for work on its own.
    pub tick: Duration,
}

/// A selected set of inputs: one tier's oldest `fan_in` tables.
pub struct CompactionJob {
    /// Inputs in read precedence order (newest first).
    pub inputs: Vec<Arc<Table>>,
    pub output_generation: u32,
}

/// Pick the next compaction, if any tier is full enough.
///
/// Inputs are always the *oldest* tables of the tier (lowest ids), so tables
/// within a generation stay chronologically ordered and the engine's
/// newest-first read order remains sound.
pub fn pick_compaction(version: &Version, fan_in: usize) -> Option<CompactionJob> {
    let mut generations: Vec<u32> = version
        .tables()
        .iter()
        .map(|t| t.meta().generation)
        .collect();
    generations.sort_unstable();
    generations.dedup();

    for generation in generations {
        let mut tier: Vec<Arc<Table>> = version
            .tables()
            .iter()
            .filter(|t| t.meta().generation == generation)
            .cloned()
            .collect();
        if tier.len() < fan_in {
            continue;
        }
        // Oldest fan_in tables of the tier, then newest-first for the merge.
        tier.sort_by_key(|t| t.meta().id);
        tier.truncate(fan_in);
        tier.reverse();
        return Some(CompactionJob {
            inputs: tier,
            output_generation: generation + 1,
        });
    }
    None
}

/// Whether a tombstone written by this job can be dropped outright.
///
/// True only when no live table outside the inputs holds older data (equal
/// or higher generation) overlapping the job's key range — otherwise the
/// tombstone must survive to keep shadowing those older values.
fn is_bottommost(version: &Version, job: &CompactionJob) -> bool {
    let min = job
        .inputs
        .iter()
        .map(|t| t.meta().min_key.as_slice())
        .min()
        .expect("compaction job has inputs");
    let max = job
        .inputs
        .iter()
        .map(|t| t.meta().max_key.as_slice())
        .max()
        .expect("compaction job has inputs");
    let input_ids: Vec<u64> = job.inputs.iter().map(|t| t.meta().id).collect();

    !version.tables().iter().any(|t| {
        let meta = t.meta();
        meta.generation >= job.output_generation
            && !input_ids.contains(&meta.id)
            && meta.min_key.as_slice() <= max
            && meta.max_key.as_slice() >= min
    })
}

/// Merge the job's inputs into one new table and commit the swap as a
/// single manifest edit. On error nothing becomes visible and the inputs
/// stay live for a later retry.
pub fn run_compaction(
    versions: &VersionSet,
    job: CompactionJob,
    config: &CompactionConfig,
) -> Result<()> {
    let version = versions.current();
    let drop_tombstones =
        job.output_generation >= config.tombstone_gc_horizon && is_bottommost(&version, &job);

    let mut sources: Vec<Box<dyn StorageIterator>> = Vec::with_capacity(job.inputs.len());
    for table in &job.inputs {
        sources.push(Box::new(table.iter()?));
    }
    let mut merged = MergeIterator::new(sources)?;

    let output_id = versions.allocate_table_id();
    let output_path = table_path(versions.dir(), output_id);
    let mut builder = TableBuilder::new(
        &output_path,
        output_id,
        job.output_generation,
        config.block_size,
        config.false_positive_rate,
    )?;

    let result = (|| -> Result<u64> {
        let mut written = 0u64;
        while merged.is_valid() {
            // MergeIterator already collapsed each key to its newest version.
            if !(merged.key().is_tombstone() && drop_tombstones) {
                builder.add(merged.key(), merged.value())?;
                written += 1;
            }
            merged.next()?;
        }
        Ok(written)
    })();

    let written = match result {
        Ok(n) => n,
        Err(e) => {
            builder.abort();
            return Err(e);
        }
    };

    let meta = builder.finish()?;
    let output = Table::open(&output_path)?;
    let removed: Vec<u64> = job.inputs.iter().map(|t| t.meta().id).collect();
    versions.apply_compaction(vec![output], removed.clone())?;

    info!(
        output = meta.id,
        generation = meta.generation,
        inputs = ?removed,
        entries = written,
        drop_tombstones,
        "compaction committed"
    );
    Ok(())
}

/// Commands accepted by the compaction worker.
pub enum CompactionCommand {
    /// Run one compaction round now; replies with whether work was done.
    Compact { done: Sender<Result<bool>> },
    Shutdown,
}

/// Handle to the dedicated compaction thread.
pub struct CompactionWorker {
    tx: Sender<CompactionCommand>,
    handle: Option<JoinHandle<()>>,
}

impl CompactionWorker {
    pub fn spawn(
        versions: Arc<VersionSet>,
        config: CompactionConfig,
        compactions_run: Arc<AtomicU64>,
    ) -> Self {
        let (tx, rx) = bounded::<CompactionCommand>(16);
        let handle = std::thread::Builder::new()
            .name("silt-compaction".into())
            .spawn(move || worker_loop(rx, versions, config, compactions_run))
            .expect("failed to spawn compaction thread");
        CompactionWorker {
            tx,
            handle: Some(handle),
        }
    }

    /// Run one compaction round synchronously. `Ok(false)` means no tier
    /// was full enough to need work.
    pub fn compact_now(&self) -> Result<bool> {
        let (done_tx, done_rx) = bounded(1);
        self.tx
            .send(CompactionCommand::Compact { done: done_tx })
            .map_err(|_| crate::error::Error::Closed)?;
        done_rx.recv().map_err(|_| crate::error::Error::Closed)?
    }

    pub fn shutdown(&mut self) {
        let _ = self.tx.send(CompactionCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CompactionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    rx: Receiver<CompactionCommand>,
    versions: Arc<VersionSet>,
    config: CompactionConfig,
    compactions_run: Arc<AtomicU64>,
) {
    let mut consecutive_failures = 0u32;
    loop {
        match rx.recv_timeout(config.tick) {
            Ok(CompactionCommand::Shutdown) => {
                debug!("compaction worker shutting down");
                return;
            }
            Ok(CompactionCommand::Compact { done }) => {
                let result = compact_round(&versions, &config, &compactions_run);
                if let Err(e) = &result {
                    error!(error = %e, "requested compaction failed");
                }
                let _ = done.send(result);
            }
            Err(RecvTimeoutError::Timeout) => {
                match compact_round(&versions, &config, &compactions_run) {
                    Ok(_) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures += 1;
                        // Exponential backoff, capped: the engine stays fully
                        // available on existing files while we wait.
                        let backoff = config.tick * 2u32.pow(consecutive_failures.min(5));
                        error!(error = %e, failures = consecutive_failures,
                               "background compaction failed, backing off");
                        if rx_shutdown_within(&rx, backoff) {
                            return;
                        }
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Run at most one compaction. Returns whether work was done.
fn compact_round(
    versions: &VersionSet,
    config: &CompactionConfig,
    compactions_run: &AtomicU64,
) -> Result<bool> {
    let version = versions.current();
    match pick_compaction(&version, config.fan_in) {
        None => Ok(false),
        Some(job) => {
            run_compaction(versions, job, config)?;
            compactions_run.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        }
    }
}

/// Sleep for `backoff`, but return early (true) if a shutdown arrives.
fn rx_shutdown_within(rx: &Receiver<CompactionCommand>, backoff: Duration) -> bool {
    match rx.recv_timeout(backoff) {
        Ok(CompactionCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => true,
        Ok(CompactionCommand::Compact { done }) => {
            // Serve the explicit request even while backing off.
            let _ = done.send(Err(crate::error::Error::Io(std::io::Error::other(
                "compaction is backing off after repeated failures",
            ))));
            false
        }
        Err(RecvTimeoutError::Timeout) => false,
    }
}
