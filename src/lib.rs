//! `log-merge` merges independently time-ordered log sources into a single chronologically ordered stream.
//!
//! Every source yields its entries oldest first, one at a time. The merge picks, at every step, the source
//! holding the globally earliest unconsumed entry and emits entries in non-decreasing timestamp order,
//! exactly once each. Entries with equal timestamps are emitted in source order, so the output is
//! deterministic.
//!
//! # Overview
//!
//! `log-merge` supports two strategies sharing the same contract:
//!
//! * **In-memory merge:**
//!   sources are merged directly through a min-priority frontier of source heads. A source keeps
//!   being drained without touching the frontier for as long as its entries stay the earliest ones.
//! * **External merge:**
//!   every source is first drained to bounded-size temporary shards (in parallel), then the shards are merged
//!   by a linear k-way merge into a result store which is finally replayed to the consumer. Memory use is bounded
//!   by the shard threshold, temporary data is removed when the merge run ends.
//!
//! Blocking ([`LogSource`]) and suspending ([`AsyncLogSource`]) sources are supported by both strategies.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//! use std::path;
//!
//! use log_merge::{JsonLinesConsumer, JsonLinesSource, LogMergerBuilder, Strategy};
//!
//! fn main() {
//!     let sources = ["app.jsonl", "db.jsonl"]
//!         .into_iter()
//!         .map(|name| JsonLinesSource::<_, serde_json::Value>::open(path::Path::new(name), None).unwrap());
//!     let mut consumer = JsonLinesConsumer::new(io::BufWriter::new(fs::File::create("merged.jsonl").unwrap()));
//!
//!     let merger = LogMergerBuilder::new()
//!         .with_strategy(Strategy::External)
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_shard_threshold(10_000)
//!         .build()
//!         .unwrap();
//!
//!     merger.merge(sources, &mut consumer).unwrap();
//! }
//! ```

pub mod buffer;
pub mod consumer;
pub mod entry;
pub mod error;
pub mod frontier;
pub mod jsonl;
pub mod kway;
pub mod log_merger;
pub mod merger;
pub mod shard;
pub mod source;
pub mod store;

pub use consumer::Consumer;
pub use entry::{Entry, SourceId};
pub use error::{MergeError, StorageError};
pub use frontier::{Frontier, FrontierNode};
pub use jsonl::{JsonLinesConsumer, JsonLinesSource};
pub use kway::CursorMerger;
pub use log_merger::{LogMerger, LogMergerBuilder, Strategy};
pub use merger::FrontierMerger;
pub use shard::{Shard, ShardOptions, ShardWriter};
pub use source::{AsyncLogSource, IterSource, LogSource, SourceErrorPolicy};
pub use store::ResultStore;
