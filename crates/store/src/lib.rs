//! # Store - ordered durable key-value store
//!
//! The on-disk home of the persistent ring backend. A store is a directory
//! holding a single append-only log of CRC-checked batch frames plus an
//! ordered in-memory index rebuilt from the log on open.
//!
//! ```text
//! write(batch) -> log append (one frame) -> index update
//!                       |
//!                       |  (log large and mostly dead?)
//!                       v
//!                 compact() -> live set rewritten to data.log.tmp
//!                              fsync + rename over data.log
//! ```
//!
//! ## Crash Safety
//!
//! A batch is encoded as a chain of frames whose last frame commits it, so
//! replay applies all of its operations or none of them, however large the
//! batch. A batch left incomplete by a crash at the tail of the log is
//! discarded on open and the log is truncated back to the end of the last
//! committed batch. An append that fails part-way is truncated away before
//! the error is returned. Compaction writes to a temporary file and renames
//! it into place, so the log is never observed half-rewritten.
//!
//! A compaction failure after a batch is durable does not fail the write. It
//! is logged and automatic compaction stays off until [`Store::compact`]
//! next succeeds.
//!
//! ## Ownership
//!
//! A `Store` owns its directory exclusively for its lifetime. Opening the
//! same directory from two processes at once is not supported.

mod batch;
mod log;

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub use batch::{BatchOp, WriteBatch};
pub use config::StoreConfig;
pub use log::MAX_FRAME_SIZE;

use log::{LogReader, LogWriter};
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the log file within the store directory.
pub const LOG_FILENAME: &str = "data.log";

/// Temporary file used while compacting.
const LOG_TMP_FILENAME: &str = "data.log.tmp";

/// Approximate per-entry framing overhead (op tag + two length prefixes).
const ENTRY_OVERHEAD: u64 = 9;

/// Target size of each batch written during compaction.
const COMPACTION_CHUNK_BYTES: u64 = 4 * 1024 * 1024;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A frame failed CRC validation or could not be decoded.
    #[error("corrupt log frame at offset {offset}")]
    Corrupt { offset: u64 },

    /// A single operation does not fit in one frame.
    #[error("record too large: {size} bytes exceeds the frame limit")]
    RecordTooLarge { size: u64 },

    /// Keys must be non-empty.
    #[error("key must not be empty")]
    EmptyKey,
}

/// Ordered, durable byte-key/byte-value store.
pub struct Store {
    dir: PathBuf,
    log_path: PathBuf,
    writer: LogWriter,
    index: BTreeMap<Vec<u8>, Vec<u8>>,
    config: StoreConfig,
    /// Sequence number of the last batch written.
    seq: u64,
    /// Current size of the log file in bytes.
    log_bytes: u64,
    /// Approximate encoded size of the live entries.
    live_bytes: u64,
    /// Whether writes may trigger [`Store::compact`].
    auto_compact: bool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("seq", &self.seq)
            .field("entries", &self.index.len())
            .field("log_bytes", &self.log_bytes)
            .field("live_bytes", &self.live_bytes)
            .field("sync", &self.config.sync)
            .field("auto_compact", &self.auto_compact)
            .finish()
    }
}

impl Store {
    /// Opens the store in `dir`, creating the directory if needed and
    /// replaying the existing log.
    pub fn open<P: AsRef<Path>>(dir: P, config: &StoreConfig) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let log_path = dir.join(LOG_FILENAME);
        let tmp_path = dir.join(LOG_TMP_FILENAME);
        let mut auto_compact = true;
        if tmp_path.exists() {
            if let Err(e) = fs::remove_file(&tmp_path) {
                warn!(
                    path = %tmp_path.display(),
                    error = %e,
                    "unable to remove stale compaction file; automatic compaction disabled"
                );
                auto_compact = false;
            }
        }

        let mut index = BTreeMap::new();
        let mut seq = 0u64;
        let valid_len = match LogReader::open(&log_path) {
            Ok(mut reader) => reader.replay(|s, ops| {
                seq = seq.max(s);
                for op in ops {
                    apply_op(&mut index, op);
                }
            })?,
            Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };

        // Drop a torn tail so new frames are not appended after garbage.
        if let Ok(meta) = fs::metadata(&log_path) {
            if meta.len() > valid_len {
                warn!(
                    path = %log_path.display(),
                    valid_len,
                    file_len = meta.len(),
                    "truncating torn tail of store log"
                );
                let f = OpenOptions::new().write(true).open(&log_path)?;
                f.set_len(valid_len)?;
                f.sync_all()?;
            }
        }

        let writer = LogWriter::open(&log_path, config.sync, frame_limit(config))?;
        let live_bytes = index.iter().map(|(k, v)| entry_cost(k, v)).sum();

        debug!(
            dir = %dir.display(),
            entries = index.len(),
            seq,
            log_bytes = valid_len,
            "opened store"
        );

        Ok(Self {
            dir,
            log_path,
            writer,
            index,
            config: config.clone(),
            seq,
            log_bytes: valid_len,
            live_bytes,
            auto_compact,
        })
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the sequence number of the last batch written.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns the current size of the log in bytes.
    #[must_use]
    pub fn log_bytes(&self) -> u64 {
        self.log_bytes
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.index.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    /// Applies a batch atomically: the batch is written to the log first and
    /// the index is updated only once the write succeeded.
    ///
    /// Returns an error only if the batch is not durable; in that case
    /// neither the log nor the index holds any of it.
    pub fn write(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        if batch.ops().iter().any(|op| op.key().is_empty()) {
            return Err(StoreError::EmptyKey);
        }

        let seq = self.seq.checked_add(1).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "sequence number overflow (u64::MAX reached)",
            ))
        })?;

        let ops = batch.into_ops();
        let written = self.writer.append(seq, &ops)?;
        self.seq = seq;
        self.log_bytes += written;

        for op in ops {
            if let Some(old) = self.index.get_key_value(op.key()) {
                self.live_bytes = self.live_bytes.saturating_sub(entry_cost(old.0, old.1));
            }
            if let BatchOp::Put { key, value } = &op {
                self.live_bytes += entry_cost(key, value);
            }
            apply_op(&mut self.index, op);
        }

        self.maybe_compact();
        Ok(())
    }

    /// Iterates over every entry in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.index.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Iterates, in ascending key order, over the entries whose key starts
    /// with `prefix`.
    pub fn scan_prefix<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
        self.index
            .range(prefix.to_vec()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Forces buffered log data to disk. Only needed when `sync` is off.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.writer.sync_to_disk()
    }

    /// Rewrites the log so it holds only the live entries.
    ///
    /// # Steps
    ///
    /// 1. Write the live set to `data.log.tmp` in batches of roughly
    ///    [`COMPACTION_CHUNK_BYTES`].
    /// 2. fsync the temporary file.
    /// 3. Rename it over `data.log`; the writer opened on the temporary file
    ///    becomes the log writer.
    ///
    /// On failure the existing log and writer are left untouched.
    pub fn compact(&mut self) -> Result<(), StoreError> {
        let tmp_path = self.dir.join(LOG_TMP_FILENAME);
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let mut written = 0u64;
        let mut w = LogWriter::open(&tmp_path, false, frame_limit(&self.config))?;
        {
            let mut chunk = Vec::new();
            let mut chunk_bytes = 0u64;

            for (k, v) in &self.index {
                chunk_bytes += entry_cost(k, v);
                chunk.push(BatchOp::Put {
                    key: k.clone(),
                    value: v.clone(),
                });
                if chunk_bytes >= COMPACTION_CHUNK_BYTES {
                    written += w.append(self.seq, &chunk)?;
                    chunk.clear();
                    chunk_bytes = 0;
                }
            }
            if !chunk.is_empty() {
                written += w.append(self.seq, &chunk)?;
            }
            w.sync_to_disk()?;
        }

        fs::rename(&tmp_path, &self.log_path)?;
        w.set_sync(self.config.sync);
        self.writer = w;
        self.auto_compact = true;

        debug!(
            dir = %self.dir.display(),
            before = self.log_bytes,
            after = written,
            "compacted store log"
        );
        self.log_bytes = written;
        Ok(())
    }

    fn maybe_compact(&mut self) {
        let threshold = self.config.compaction_threshold as u64;
        if !self.auto_compact
            || threshold == 0
            || self.log_bytes < threshold
            || self.log_bytes <= self.live_bytes * 2
        {
            return;
        }
        if let Err(e) = self.compact() {
            warn!(
                dir = %self.dir.display(),
                error = %e,
                log_bytes = self.log_bytes,
                "automatic compaction failed; disabled until the next successful compact"
            );
            self.auto_compact = false;
        }
    }
}

fn frame_limit(config: &StoreConfig) -> u32 {
    u32::try_from(config.max_frame_bytes)
        .unwrap_or(MAX_FRAME_SIZE)
        .min(MAX_FRAME_SIZE)
}

fn apply_op(index: &mut BTreeMap<Vec<u8>, Vec<u8>>, op: BatchOp) {
    match op {
        BatchOp::Put { key, value } => {
            index.insert(key, value);
        }
        BatchOp::Delete { key } => {
            index.remove(&key);
        }
    }
}

fn entry_cost(key: &[u8], value: &[u8]) -> u64 {
    key.len() as u64 + value.len() as u64 + ENTRY_OVERHEAD
}
