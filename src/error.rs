//! Merge errors.

use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};
use std::io;

use crate::entry::SourceId;

/// Boxed error produced by a log source or a consumer.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Shard or result store error.
#[derive(Debug)]
pub enum StorageError {
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Common I/O error.
    Io(io::Error),
    /// Entry serialization error.
    Serialization(serde_json::Error),
    /// A stored line cannot be parsed back into an entry.
    Deserialization {
        /// 1-based line number.
        line: u64,
        error: serde_json::Error,
    },
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            StorageError::TempDir(err) => err,
            StorageError::Io(err) => err,
            StorageError::Serialization(err) => err,
            StorageError::Deserialization { error, .. } => error,
        })
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            StorageError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            StorageError::Io(err) => write!(f, "I/O operation failed: {}", err),
            StorageError::Serialization(err) => write!(f, "entry serialization error: {}", err),
            StorageError::Deserialization { line, error } => {
                write!(f, "entry deserialization error at line {}: {}", line, error)
            }
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

/// Merge error.
#[derive(Debug)]
pub enum MergeError {
    /// A log source failed to yield its next entry.
    Source { source_id: SourceId, error: BoxError },
    /// Shard or result store failure. Fatal to the current merge run.
    Storage(StorageError),
    /// The consumer refused an entry or the completion signal.
    Consumer(BoxError),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
}

impl MergeError {
    pub(crate) fn source_read<E>(source_id: SourceId, error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        MergeError::Source {
            source_id,
            error: Box::new(error),
        }
    }

    pub(crate) fn consumer<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        MergeError::Consumer(Box::new(error))
    }

    /// Returns the failed source identifier if the error was caused by a log source.
    pub fn source_id(&self) -> Option<SourceId> {
        match self {
            MergeError::Source { source_id, .. } => Some(*source_id),
            _ => None,
        }
    }
}

impl Error for MergeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            MergeError::Source { error, .. } => Some(error.as_ref()),
            MergeError::Storage(err) => Some(err),
            MergeError::Consumer(err) => Some(err.as_ref()),
            MergeError::ThreadPoolBuildError(err) => Some(err),
        }
    }
}

impl Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            MergeError::Source { source_id, error } => write!(f, "log source {} read error: {}", source_id, error),
            MergeError::Storage(err) => write!(f, "storage error: {}", err),
            MergeError::Consumer(err) => write!(f, "consumer error: {}", err),
            MergeError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
        }
    }
}

impl From<StorageError> for MergeError {
    fn from(err: StorageError) -> Self {
        MergeError::Storage(err)
    }
}
