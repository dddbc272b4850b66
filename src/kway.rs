//! Linear k-way shard merger.

use std::mem;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::ser::Serialize;

use crate::entry::Entry;
use crate::error::StorageError;
use crate::shard::{Shard, ShardReader};
use crate::store::{ResultStore, ResultStoreWriter};

/// Shard read position plus one buffered lookahead entry.
struct MergeCursor<P> {
    reader: ShardReader<P>,
    head: Entry<P>,
}

/// Cursor merger implementation.
/// Merges ordered shards into a single ordered stream.
///
/// Every step scans the buffered heads of all live cursors, so the time complexity is *m* \* *k*
/// where *m* is the number of entries and *k* the number of shards. On equal timestamps the cursor
/// opened first wins, which keeps the output stable with respect to the shard order.
pub struct CursorMerger<P> {
    cursors: Vec<MergeCursor<P>>,
}

impl<P: DeserializeOwned> CursorMerger<P> {
    /// Opens one cursor per shard, pre-loaded with its first entry. Empty shards are retired at once.
    ///
    /// # Arguments
    /// * `shards` - Shards ordered by source and creation order
    /// * `buf_size` - Shard file read buffer size
    pub fn open<'a, I>(shards: I, buf_size: Option<usize>) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = &'a Shard>,
    {
        let mut cursors = Vec::new();

        for shard in shards {
            let mut reader = shard.open(buf_size)?;
            if let Some(head) = reader.read_entry()? {
                cursors.push(MergeCursor { reader, head });
            }
        }

        return Ok(CursorMerger { cursors });
    }

    /// Number of cursors not yet exhausted.
    pub fn live_cursors(&self) -> usize {
        self.cursors.len()
    }

    fn select_min(&self) -> Option<usize> {
        let mut selected: Option<usize> = None;

        for (idx, cursor) in self.cursors.iter().enumerate() {
            match selected {
                Some(min) if self.cursors[min].head.timestamp <= cursor.head.timestamp => {}
                _ => selected = Some(idx),
            }
        }

        return selected;
    }
}

impl<P: DeserializeOwned> Iterator for CursorMerger<P> {
    type Item = Result<Entry<P>, StorageError>;

    /// Returns the next entry of the shards in chronological order.
    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.select_min()?;

        let entry = match self.cursors[idx].reader.read_entry() {
            Ok(Some(next)) => mem::replace(&mut self.cursors[idx].head, next),
            // removal keeps the remaining cursors in shard order
            Ok(None) => self.cursors.remove(idx).head,
            Err(err) => {
                // the stream ends at the first failure
                self.cursors.clear();
                return Some(Err(err));
            }
        };

        return Some(Ok(entry));
    }
}

/// Merges the shards into a new result store created at `dest`.
///
/// # Arguments
/// * `shards` - Shards ordered by source and creation order
/// * `dest` - Result store file path
/// * `buf_size` - Shard and store file read/write buffer size
pub fn merge_shards<P>(shards: &[Shard], dest: &Path, buf_size: Option<usize>) -> Result<ResultStore, StorageError>
where
    P: Serialize + DeserializeOwned,
{
    let merger = CursorMerger::<P>::open(shards, buf_size)?;
    log::debug!("merging {} shards ({} not empty)", shards.len(), merger.live_cursors());

    let mut writer = ResultStoreWriter::create(dest, buf_size)?;
    for entry in merger {
        writer.append(&entry?)?;
    }
    let store = writer.finish()?;

    log::debug!("shards merged into {} ({} entries)", store.path().display(), store.len());

    return Ok(store);
}
