//! Merged result store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::ser::Serialize;

use crate::consumer::Consumer;
use crate::entry::Entry;
use crate::error::{MergeError, StorageError};
use crate::jsonl::{self, JsonLinesSource, JsonLinesWriter};

/// Append-only file of globally ordered entries. Written once by the external merger, read once
/// by the replayer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultStore {
    path: PathBuf,
    len: u64,
}

impl ResultStore {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored entries.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Opens the store for reading. Yields the entries in stored order.
    pub fn entries<P: DeserializeOwned>(
        &self,
        buf_size: Option<usize>,
    ) -> Result<JsonLinesSource<io::BufReader<fs::File>, P>, StorageError> {
        Ok(JsonLinesSource::open(&self.path, buf_size)?)
    }

    /// Streams the stored entries to the consumer one at a time, then signals completion.
    /// Returns the number of replayed entries.
    ///
    /// # Arguments
    /// * `consumer` - Merged stream consumer
    /// * `buf_size` - Store file read buffer size
    pub fn replay<P, K>(&self, consumer: &mut K, buf_size: Option<usize>) -> Result<u64, MergeError>
    where
        P: DeserializeOwned,
        K: Consumer<P>,
    {
        let mut replayed = 0;
        let mut reader = self.entries::<P>(buf_size)?;

        while let Some(entry) = reader.read_entry()? {
            consumer.emit(entry).map_err(MergeError::consumer)?;
            replayed += 1;
        }
        consumer.complete().map_err(MergeError::consumer)?;

        log::debug!("result store replayed ({} entries)", replayed);

        return Ok(replayed);
    }
}

/// Result store writer.
pub struct ResultStoreWriter {
    path: PathBuf,
    writer: JsonLinesWriter<io::BufWriter<fs::File>>,
}

impl ResultStoreWriter {
    /// Creates a new, empty store file. Fails if the file already exists.
    pub fn create(path: &Path, buf_size: Option<usize>) -> Result<Self, StorageError> {
        let writer = jsonl::create_writer(path, buf_size)?;

        return Ok(ResultStoreWriter {
            path: path.to_path_buf(),
            writer: JsonLinesWriter::new(writer),
        });
    }

    pub fn append<P: Serialize>(&mut self, entry: &Entry<P>) -> Result<(), StorageError> {
        self.writer.write_entry(entry)
    }

    /// Flushes the store and makes it available for reading.
    pub fn finish(mut self) -> Result<ResultStore, StorageError> {
        self.writer.flush()?;

        return Ok(ResultStore {
            path: self.path,
            len: self.writer.written(),
        });
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use chrono::{TimeZone, Utc};
    use rstest::*;

    use super::ResultStoreWriter;
    use crate::entry::Entry;
    use crate::error::MergeError;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    #[rstest]
    fn test_replay(tmp_dir: tempfile::TempDir) {
        let saved = Vec::from_iter((0..5).map(|secs| Entry::new(Utc.timestamp_opt(secs, 0).unwrap(), secs)));
        let path = tmp_dir.path().join("merged.jsonl");

        let mut writer = ResultStoreWriter::create(&path, None).unwrap();
        for entry in &saved {
            writer.append(entry).unwrap();
        }
        let store = writer.finish().unwrap();
        assert_eq!(store.len(), 5);

        let before = fs::read(store.path()).unwrap();

        let mut replayed: Vec<Entry<i64>> = Vec::new();
        assert_eq!(store.replay(&mut replayed, Some(16)).unwrap(), 5);
        assert_eq!(replayed, saved);

        // replaying never touches the store
        assert_eq!(fs::read(store.path()).unwrap(), before);
        let mut again: Vec<Entry<i64>> = Vec::new();
        store.replay(&mut again, None).unwrap();
        assert_eq!(again, saved);
    }

    #[rstest]
    fn test_store_is_written_once(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("merged.jsonl");

        let writer = ResultStoreWriter::create(&path, None).unwrap();
        assert!(writer.finish().unwrap().is_empty());
        assert!(ResultStoreWriter::create(&path, None).is_err());
    }

    #[rstest]
    fn test_replay_corrupted_store(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("merged.jsonl");
        let mut writer = ResultStoreWriter::create(&path, None).unwrap();
        writer.append(&Entry::new(Utc.timestamp_opt(1, 0).unwrap(), 1)).unwrap();
        let store = writer.finish().unwrap();

        let mut contents = fs::read_to_string(store.path()).unwrap();
        contents.push_str("{\"timestamp\":\"yesterday\",\"payload\":2}\n");
        fs::write(store.path(), contents).unwrap();

        let mut replayed: Vec<Entry<i64>> = Vec::new();
        let result = store.replay(&mut replayed, None);

        assert!(matches!(result, Err(MergeError::Storage(_))));
        assert_eq!(replayed.len(), 1);
    }
}
