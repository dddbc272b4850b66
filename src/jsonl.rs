//! JSON lines entry format.
//!
//! Shards, the result store and file based sources keep one serialized [`Entry`] per line:
//!
//! ```text
//! {"timestamp":"2023-11-14T22:13:20Z","payload":{"msg":"started"}}
//! {"timestamp":"2023-11-14T22:13:21Z","payload":{"msg":"ready"}}
//! ```

use std::fs;
use std::io::{self, prelude::*};
use std::marker::PhantomData;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::ser::Serialize;

use crate::consumer::Consumer;
use crate::entry::Entry;
use crate::error::StorageError;
use crate::source::LogSource;

/// Opens a file for buffered reading.
pub(crate) fn open_reader(path: &Path, buf_size: Option<usize>) -> io::Result<io::BufReader<fs::File>> {
    let file = fs::File::open(path)?;

    return Ok(match buf_size {
        Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
        None => io::BufReader::new(file),
    });
}

/// Creates a new file for buffered writing. Fails if the file already exists.
pub(crate) fn create_writer(path: &Path, buf_size: Option<usize>) -> io::Result<io::BufWriter<fs::File>> {
    let file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;

    return Ok(match buf_size {
        Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
        None => io::BufWriter::new(file),
    });
}

/// Reads entries one per line.
pub struct JsonLinesSource<R, P = serde_json::Value> {
    reader: R,
    line: String,
    line_number: u64,
    exhausted: bool,

    payload_type: PhantomData<P>,
}

impl<P> JsonLinesSource<io::BufReader<fs::File>, P> {
    /// Opens a JSON lines file.
    ///
    /// # Arguments
    /// * `path` - File to read entries from
    /// * `buf_size` - Read buffer size. If the parameter is [`None`] the default `std::io` buffer size is used.
    pub fn open(path: &Path, buf_size: Option<usize>) -> io::Result<Self> {
        Ok(JsonLinesSource::new(open_reader(path, buf_size)?))
    }
}

impl<R: BufRead, P> JsonLinesSource<R, P> {
    pub fn new(reader: R) -> Self {
        JsonLinesSource {
            reader,
            line: String::new(),
            line_number: 0,
            exhausted: false,
            payload_type: PhantomData,
        }
    }

    /// Number of lines read so far.
    pub fn lines_read(&self) -> u64 {
        self.line_number
    }
}

impl<R: BufRead, P: DeserializeOwned> JsonLinesSource<R, P> {
    /// Reads the next entry. Returns `None` at the end of the input.
    pub fn read_entry(&mut self) -> Result<Option<Entry<P>>, StorageError> {
        if self.exhausted {
            return Ok(None);
        }

        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                self.exhausted = true;
                return Ok(None);
            }
            self.line_number += 1;

            let line = self.line.trim();
            // blank lines carry no entry
            if line.is_empty() {
                continue;
            }

            return match serde_json::from_str(line) {
                Ok(entry) => Ok(Some(entry)),
                Err(error) => Err(StorageError::Deserialization {
                    line: self.line_number,
                    error,
                }),
            };
        }
    }
}

impl<R: BufRead, P: DeserializeOwned> Iterator for JsonLinesSource<R, P> {
    type Item = Result<Entry<P>, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_entry().transpose()
    }
}

impl<R: BufRead, P: DeserializeOwned> LogSource for JsonLinesSource<R, P> {
    type Payload = P;
    type Error = StorageError;

    fn pull(&mut self) -> Result<Option<Entry<P>>, StorageError> {
        self.read_entry()
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Writes entries one per line.
pub struct JsonLinesWriter<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesWriter { writer, written: 0 }
    }

    pub fn write_entry<P: Serialize>(&mut self, entry: &Entry<P>) -> Result<(), StorageError> {
        serde_json::to_writer(&mut self.writer, entry).map_err(StorageError::Serialization)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;

        return Ok(());
    }

    /// Number of entries written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        Ok(self.writer.flush()?)
    }
}

/// Consumer printing merged entries as JSON lines.
pub struct JsonLinesConsumer<W: Write> {
    writer: JsonLinesWriter<W>,
}

impl<W: Write> JsonLinesConsumer<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesConsumer {
            writer: JsonLinesWriter::new(writer),
        }
    }

    pub fn written(&self) -> u64 {
        self.writer.written()
    }
}

impl<W: Write, P: Serialize> Consumer<P> for JsonLinesConsumer<W> {
    type Error = StorageError;

    fn emit(&mut self, entry: Entry<P>) -> Result<(), StorageError> {
        self.writer.write_entry(&entry)
    }

    fn complete(&mut self) -> Result<(), StorageError> {
        self.writer.flush()
    }
}
