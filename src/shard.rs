//! Source shards stored on the file system.
//!
//! A shard is a time-ordered JSON lines file holding a run of one source's entries. A source is
//! drained into one or more shards of at most `threshold` entries each. Every flush creates a new
//! shard file, so reading the shards of a source in creation order reconstructs the source.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::ser::Serialize;

use crate::buffer::LimitedBuffer;
use crate::entry::{Entry, SourceId};
use crate::error::{MergeError, StorageError};
use crate::jsonl::{self, JsonLinesSource, JsonLinesWriter};
use crate::source::{pull_blocking, pull_suspending, AsyncLogSource, LogSource, SourceErrorPolicy};

/// Default number of entries per shard.
pub const DEFAULT_SHARD_THRESHOLD: usize = 1_000;

/// Shard reader. Yields the shard entries in stored order.
pub type ShardReader<P> = JsonLinesSource<io::BufReader<fs::File>, P>;

/// Shard writing options.
#[derive(Debug, Clone, Copy)]
pub struct ShardOptions {
    /// Maximum number of entries held by a shard.
    pub threshold: usize,
    /// Shard file read/write buffer size.
    pub rw_buf_size: Option<usize>,
}

impl Default for ShardOptions {
    fn default() -> Self {
        ShardOptions {
            threshold: DEFAULT_SHARD_THRESHOLD,
            rw_buf_size: None,
        }
    }
}

/// Time-ordered temporary file with a run of one source's entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    source: SourceId,
    seq: usize,
    path: PathBuf,
    len: usize,
}

impl Shard {
    /// Source the shard entries come from.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Position of the shard among the shards of its source.
    pub fn seq(&self) -> usize {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries stored in the shard.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Opens the shard for reading.
    pub fn open<P>(&self, buf_size: Option<usize>) -> Result<ShardReader<P>, StorageError> {
        Ok(JsonLinesSource::open(&self.path, buf_size)?)
    }
}

/// Buffers the entries of one source and flushes them to shards.
pub struct ShardWriter<'a, P> {
    dir: &'a Path,
    source: SourceId,
    options: ShardOptions,
    buffer: LimitedBuffer<Entry<P>>,
    shards: Vec<Shard>,
}

impl<'a, P: Serialize> ShardWriter<'a, P> {
    /// Creates a shard writer.
    ///
    /// # Arguments
    /// * `dir` - Directory the shard files are created in
    /// * `source` - Source the entries come from
    /// * `options` - Shard threshold and file buffer size
    pub fn new(dir: &'a Path, source: SourceId, options: ShardOptions) -> Self {
        ShardWriter {
            dir,
            source,
            options,
            buffer: LimitedBuffer::new(options.threshold),
            shards: Vec::new(),
        }
    }

    /// Adds an entry, flushing a shard once the threshold is reached.
    pub fn push(&mut self, entry: Entry<P>) -> Result<(), StorageError> {
        self.buffer.push(entry);

        if self.buffer.is_full() {
            self.flush()?;
        }

        return Ok(());
    }

    /// Flushes the remaining entries and returns the shards in creation order.
    /// A source without entries still produces one empty shard.
    pub fn finish(mut self) -> Result<Vec<Shard>, StorageError> {
        if !self.buffer.is_empty() || self.shards.is_empty() {
            self.flush()?;
        }

        return Ok(self.shards);
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        let seq = self.shards.len();
        let path = self.dir.join(format!("shard-{}-{}.jsonl", self.source.index(), seq));
        let entries = self.buffer.take();

        let mut writer = JsonLinesWriter::new(jsonl::create_writer(&path, self.options.rw_buf_size)?);
        for entry in &entries {
            writer.write_entry(entry)?;
        }
        writer.flush()?;

        log::debug!("log source {}: shard {} saved ({} entries)", self.source, seq, entries.len());

        self.shards.push(Shard {
            source: self.source,
            seq,
            path,
            len: entries.len(),
        });

        return Ok(());
    }
}

/// Drains a blocking source into shards. Returns the shards in creation order.
///
/// Shards already flushed when an error occurs stay in `dir`; the caller owns their cleanup.
///
/// # Arguments
/// * `source` - Log source to be drained
/// * `source_id` - Source identifier
/// * `dir` - Directory the shard files are created in
/// * `options` - Shard threshold and file buffer size
/// * `policy` - What to do when the source fails
pub fn write_shards<S>(
    source: &mut S,
    source_id: SourceId,
    dir: &Path,
    options: ShardOptions,
    policy: SourceErrorPolicy,
) -> Result<Vec<Shard>, MergeError>
where
    S: LogSource,
    S::Payload: Serialize,
{
    log::debug!("draining log source {} to shards", source_id);

    let mut writer = ShardWriter::new(dir, source_id, options);
    while let Some(entry) = pull_blocking(source, source_id, policy)? {
        writer.push(entry)?;
    }

    return Ok(writer.finish()?);
}

/// Drains a suspending source into shards. Returns the shards in creation order.
///
/// Pulls suspend, shard files are written synchronously.
pub async fn write_shards_async<S>(
    source: &mut S,
    source_id: SourceId,
    dir: &Path,
    options: ShardOptions,
    policy: SourceErrorPolicy,
) -> Result<Vec<Shard>, MergeError>
where
    S: AsyncLogSource,
    S::Payload: Serialize,
{
    log::debug!("draining async log source {} to shards", source_id);

    let mut writer = ShardWriter::new(dir, source_id, options);
    while let Some(entry) = pull_suspending(source, source_id, policy).await? {
        writer.push(entry)?;
    }

    return Ok(writer.finish()?);
}
