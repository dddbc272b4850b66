//! Log merger.

use std::path::Path;

use futures_util::future;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::ser::Serialize;

use crate::consumer::Consumer;
use crate::entry::SourceId;
use crate::error::{MergeError, StorageError};
use crate::kway;
use crate::merger;
use crate::shard::{self, Shard, ShardOptions, DEFAULT_SHARD_THRESHOLD};
use crate::source::{AsyncLogSource, LogSource, SourceErrorPolicy};

const RESULT_STORE_NAME: &str = "merged.jsonl";

/// Merge strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Merge directly from the sources through the frontier. Memory use is one entry per source.
    #[default]
    InMemory,
    /// Shard every source to temporary files first, then k-way merge the shards into a result
    /// store and replay it.
    External,
}

/// Log merger builder. Provides methods for [`LogMerger`] initialization.
#[derive(Clone)]
pub struct LogMergerBuilder {
    /// Merge strategy.
    strategy: Strategy,
    /// Number of threads to be used to shard sources in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Shard file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum number of entries per shard.
    shard_threshold: usize,
    /// What to do when a source fails.
    source_error_policy: SourceErrorPolicy,
}

impl LogMergerBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        LogMergerBuilder::default()
    }

    /// Builds a [`LogMerger`] instance using provided configuration.
    pub fn build(self) -> Result<LogMerger, MergeError> {
        LogMerger::new(
            self.strategy,
            self.threads_number,
            self.tmp_dir.as_deref(),
            ShardOptions {
                threshold: self.shard_threshold,
                rw_buf_size: self.rw_buf_size,
            },
            self.source_error_policy,
        )
    }

    /// Sets merge strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> LogMergerBuilder {
        self.strategy = strategy;
        return self;
    }

    /// Sets number of threads to be used to shard sources in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> LogMergerBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> LogMergerBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets shard and result store read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> LogMergerBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets maximum number of entries per shard. Values below one are raised to one.
    pub fn with_shard_threshold(mut self, threshold: usize) -> LogMergerBuilder {
        self.shard_threshold = threshold.max(1);
        return self;
    }

    /// Sets what to do when a source fails.
    pub fn with_source_error_policy(mut self, policy: SourceErrorPolicy) -> LogMergerBuilder {
        self.source_error_policy = policy;
        return self;
    }
}

impl Default for LogMergerBuilder {
    fn default() -> Self {
        LogMergerBuilder {
            strategy: Strategy::default(),
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            shard_threshold: DEFAULT_SHARD_THRESHOLD,
            source_error_policy: SourceErrorPolicy::default(),
        }
    }
}

/// Log merger.
pub struct LogMerger {
    /// Merge strategy.
    strategy: Strategy,
    /// Sharding thread pool.
    thread_pool: rayon::ThreadPool,
    /// Parent directory of the per-run temporary directories.
    tmp_dir: Option<Box<Path>>,
    /// Shard writing options.
    shard_options: ShardOptions,
    /// What to do when a source fails.
    source_error_policy: SourceErrorPolicy,
}

impl LogMerger {
    /// Creates a new log merger instance.
    ///
    /// # Arguments
    /// * `strategy` - Merge strategy used by [`LogMerger::merge`] and [`LogMerger::merge_async`]
    /// * `threads_number` - Number of threads to be used to shard sources in parallel. If the parameter is
    ///   [`None`] threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If parameter is [`None`] default OS
    ///   temporary directory will be used.
    /// * `shard_options` - Shard threshold and read/write buffer size.
    /// * `source_error_policy` - What to do when a source fails.
    pub fn new(
        strategy: Strategy,
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        shard_options: ShardOptions,
        source_error_policy: SourceErrorPolicy,
    ) -> Result<Self, MergeError> {
        return Ok(LogMerger {
            strategy,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: tmp_path.map(Box::from),
            shard_options,
            source_error_policy,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, MergeError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| MergeError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Creates the temporary directory of a single merge run. Shards and the result store live in it
    /// and are removed with it, whatever the outcome of the run.
    fn init_run_directory(&self) -> Result<tempfile::TempDir, StorageError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("log-merge-");

        let run_dir = if let Some(tmp_path) = &self.tmp_dir {
            builder.tempdir_in(tmp_path)
        } else {
            builder.tempdir()
        }
        .map_err(|err| StorageError::TempDir(err))?;

        log::info!("using {} as a temporary directory", run_dir.path().display());

        return Ok(run_dir);
    }

    fn close_run_directory(run_dir: tempfile::TempDir) {
        let path = run_dir.path().to_path_buf();
        if let Err(err) = run_dir.close() {
            log::warn!("temporary directory {} not removed: {}", path.display(), err);
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Merges the sources using the configured strategy.
    /// Returns the number of entries emitted to the consumer.
    ///
    /// # Arguments
    /// * `sources` - Log sources, each ordered by timestamp
    /// * `consumer` - Merged stream consumer
    pub fn merge<S, I, K>(&self, sources: I, consumer: &mut K) -> Result<u64, MergeError>
    where
        I: IntoIterator<Item = S>,
        S: LogSource + Send,
        S::Payload: Serialize + DeserializeOwned,
        K: Consumer<S::Payload>,
    {
        match self.strategy {
            Strategy::InMemory => self.merge_in_memory(sources, consumer),
            Strategy::External => self.merge_external(sources, consumer),
        }
    }

    /// Merges the sources in memory through the frontier.
    pub fn merge_in_memory<S, I, K>(&self, sources: I, consumer: &mut K) -> Result<u64, MergeError>
    where
        I: IntoIterator<Item = S>,
        S: LogSource,
        K: Consumer<S::Payload>,
    {
        let mut sources = Vec::from_iter(sources);
        log::info!("merging {} log sources in memory", sources.len());

        merger::merge_blocking(&mut sources, consumer, self.source_error_policy)
    }

    /// Merges the sources through temporary shards. Sources are sharded in parallel on the
    /// merger thread pool.
    pub fn merge_external<S, I, K>(&self, sources: I, consumer: &mut K) -> Result<u64, MergeError>
    where
        I: IntoIterator<Item = S>,
        S: LogSource + Send,
        S::Payload: Serialize + DeserializeOwned,
        K: Consumer<S::Payload>,
    {
        let mut sources = Vec::from_iter(sources);
        log::info!(
            "merging {} log sources through shards (threshold: {})",
            sources.len(),
            self.shard_options.threshold
        );

        let run_dir = self.init_run_directory()?;
        let dir = run_dir.path();
        let options = self.shard_options;
        let policy = self.source_error_policy;

        let shards: Result<Vec<Vec<Shard>>, MergeError> = self.thread_pool.install(|| {
            sources
                .par_iter_mut()
                .enumerate()
                .map(|(idx, source)| shard::write_shards(source, SourceId(idx), dir, options, policy))
                .collect()
        });
        let shards = Vec::from_iter(shards?.into_iter().flatten());

        let replayed = self.merge_and_replay::<S::Payload, K>(&shards, dir, consumer)?;
        Self::close_run_directory(run_dir);

        return Ok(replayed);
    }

    /// Merges suspending sources using the configured strategy.
    /// Returns the number of entries emitted to the consumer.
    ///
    /// Dropping the returned future stops pulling from the sources and removes the temporary data.
    pub async fn merge_async<S, I, K>(&self, sources: I, consumer: &mut K) -> Result<u64, MergeError>
    where
        I: IntoIterator<Item = S>,
        S: AsyncLogSource,
        S::Payload: Serialize + DeserializeOwned,
        K: Consumer<S::Payload>,
    {
        let mut sources = Vec::from_iter(sources);

        match self.strategy {
            Strategy::InMemory => {
                log::info!("merging {} async log sources in memory", sources.len());
                merger::merge_async(&mut sources, consumer, self.source_error_policy).await
            }
            Strategy::External => {
                log::info!(
                    "merging {} async log sources through shards (threshold: {})",
                    sources.len(),
                    self.shard_options.threshold
                );

                let run_dir = self.init_run_directory()?;
                let dir = run_dir.path();
                let options = self.shard_options;
                let policy = self.source_error_policy;

                let shards = future::join_all(
                    sources
                        .iter_mut()
                        .enumerate()
                        .map(|(idx, source)| shard::write_shards_async(source, SourceId(idx), dir, options, policy)),
                )
                .await;
                let shards: Result<Vec<Vec<Shard>>, MergeError> = shards.into_iter().collect();
                let shards = Vec::from_iter(shards?.into_iter().flatten());

                let replayed = self.merge_and_replay::<S::Payload, K>(&shards, dir, consumer)?;
                Self::close_run_directory(run_dir);

                Ok(replayed)
            }
        }
    }

    fn merge_and_replay<P, K>(&self, shards: &[Shard], dir: &Path, consumer: &mut K) -> Result<u64, MergeError>
    where
        P: Serialize + DeserializeOwned,
        K: Consumer<P>,
    {
        log::debug!("external sort preparation done ({} shards)", shards.len());

        let buf_size = self.shard_options.rw_buf_size;
        let store = kway::merge_shards::<P>(shards, &dir.join(RESULT_STORE_NAME), buf_size)?;

        return store.replay(consumer, buf_size);
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{self, ErrorKind};
    use std::path::Path;

    use chrono::{TimeZone, Utc};
    use rand::seq::SliceRandom;
    use rand::Rng;
    use rstest::*;

    use super::{LogMerger, LogMergerBuilder, Strategy};
    use crate::consumer::Consumer;
    use crate::entry::{Entry, SourceId};
    use crate::error::MergeError;
    use crate::source::{IterSource, LogSource, SourceErrorPolicy};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn build_merger(tmp_dir: &Path, strategy: Strategy, threshold: usize) -> LogMerger {
        LogMergerBuilder::new()
            .with_strategy(strategy)
            .with_shard_threshold(threshold)
            .with_threads_number(2)
            .with_tmp_dir(tmp_dir)
            .build()
            .unwrap()
    }

    fn sources_of(data: &[Vec<i64>]) -> Vec<IterSource<std::vec::IntoIter<Entry<(usize, usize)>>>> {
        Vec::from_iter(data.iter().enumerate().map(|(src, stamps)| {
            IterSource::new(Vec::from_iter(
                stamps
                    .iter()
                    .enumerate()
                    .map(|(pos, secs)| Entry::new(Utc.timestamp_opt(*secs, 0).unwrap(), (src, pos))),
            ))
        }))
    }

    struct FailingSource {
        pulls: usize,
    }

    impl LogSource for FailingSource {
        type Payload = (usize, usize);
        type Error = io::Error;

        fn pull(&mut self) -> Result<Option<Entry<(usize, usize)>>, io::Error> {
            self.pulls += 1;
            if self.pulls > 3 {
                return Err(io::Error::new(ErrorKind::Other, "test error"));
            }
            Ok(Some(Entry::new(Utc.timestamp_opt(self.pulls as i64, 0).unwrap(), (0, self.pulls))))
        }

        fn is_exhausted(&self) -> bool {
            false
        }
    }

    #[rstest]
    #[case(Strategy::InMemory, 1_000)]
    #[case(Strategy::External, 1)]
    #[case(Strategy::External, 3)]
    #[case(Strategy::External, 1_000)]
    fn test_log_merger(tmp_dir: tempfile::TempDir, #[case] strategy: Strategy, #[case] threshold: usize) {
        let mut rng = rand::thread_rng();
        let data = Vec::from_iter((0..6).map(|_| {
            let len = rng.gen_range(0..40);
            let mut stamps = Vec::from_iter((0..len).map(|_| rng.gen_range(0..60)));
            stamps.sort();
            stamps
        }));

        let mut expected = Vec::from_iter(data.iter().enumerate().flat_map(|(src, stamps)| {
            stamps.iter().enumerate().map(move |(pos, secs)| (*secs, src, pos))
        }));
        expected.sort();

        let mut output = Vec::new();
        let merged = build_merger(tmp_dir.path(), strategy, threshold)
            .merge(sources_of(&data), &mut output)
            .unwrap();

        let actual = Vec::from_iter(
            output
                .iter()
                .map(|entry| (entry.timestamp.timestamp(), entry.payload.0, entry.payload.1)),
        );
        assert_eq!(actual, expected);
        assert_eq!(merged as usize, expected.len());
    }

    #[rstest]
    fn test_strategies_are_equivalent(tmp_dir: tempfile::TempDir) {
        let mut data = vec![vec![1, 1, 2, 8, 8, 9], vec![], vec![1, 2, 2, 2], vec![0, 8], vec![2]];
        data.shuffle(&mut rand::thread_rng());

        let mut in_memory = Vec::new();
        build_merger(tmp_dir.path(), Strategy::InMemory, 1_000)
            .merge(sources_of(&data), &mut in_memory)
            .unwrap();

        for threshold in [1, 2, 5, 1_000] {
            let mut external = Vec::new();
            build_merger(tmp_dir.path(), Strategy::External, threshold)
                .merge(sources_of(&data), &mut external)
                .unwrap();

            assert_eq!(external, in_memory, "threshold={}", threshold);
        }
    }

    #[rstest]
    fn test_temporary_data_removed(tmp_dir: tempfile::TempDir) {
        let data = vec![vec![1, 3, 5], vec![2, 4]];

        let mut output = Vec::new();
        build_merger(tmp_dir.path(), Strategy::External, 1)
            .merge(sources_of(&data), &mut output)
            .unwrap();
        assert_eq!(output.len(), 5);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);

        let sources: Vec<Box<dyn LogSource<Payload = (usize, usize), Error = io::Error> + Send>> =
            vec![Box::new(FailingSource { pulls: 0 })];
        let mut output = Vec::new();
        let result = build_merger(tmp_dir.path(), Strategy::External, 1).merge(sources, &mut output);

        assert_eq!(result.unwrap_err().source_id(), Some(SourceId(0)));
        assert!(output.is_empty());
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    #[case(Strategy::InMemory)]
    #[case(Strategy::External)]
    fn test_skip_failed_source(tmp_dir: tempfile::TempDir, #[case] strategy: Strategy) {
        let healthy = IterSource::new(vec![
            Entry::new(Utc.timestamp_opt(0, 0).unwrap(), (1, 0)),
            Entry::new(Utc.timestamp_opt(10, 0).unwrap(), (1, 1)),
        ]);
        let sources: Vec<Box<dyn LogSource<Payload = (usize, usize), Error = io::Error> + Send>> =
            vec![Box::new(FailingSource { pulls: 0 }), Box::new(InfallibleAsIo(healthy))];

        let mut output = Vec::new();
        let merged = LogMergerBuilder::new()
            .with_strategy(strategy)
            .with_shard_threshold(2)
            .with_tmp_dir(tmp_dir.path())
            .with_source_error_policy(SourceErrorPolicy::Skip)
            .build()
            .unwrap()
            .merge(sources, &mut output)
            .unwrap();

        assert_eq!(merged, 5);
        let stamps = Vec::from_iter(output.iter().map(|entry| entry.timestamp.timestamp()));
        assert_eq!(stamps, vec![0, 1, 2, 3, 10]);
    }

    /// Consumer refusing every entry after the first `capacity` ones.
    struct RejectingConsumer {
        capacity: usize,
        accepted: Vec<Entry<(usize, usize)>>,
    }

    impl Consumer<(usize, usize)> for RejectingConsumer {
        type Error = io::Error;

        fn emit(&mut self, entry: Entry<(usize, usize)>) -> Result<(), io::Error> {
            if self.accepted.len() == self.capacity {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "consumer closed"));
            }
            self.accepted.push(entry);
            Ok(())
        }

        fn complete(&mut self) -> Result<(), io::Error> {
            Ok(())
        }
    }

    #[rstest]
    fn test_temporary_data_removed_on_consumer_error(tmp_dir: tempfile::TempDir) {
        let data = vec![vec![1, 3, 5], vec![2, 4]];
        let mut consumer = RejectingConsumer {
            capacity: 2,
            accepted: Vec::new(),
        };

        let result = build_merger(tmp_dir.path(), Strategy::External, 1).merge(sources_of(&data), &mut consumer);

        assert!(matches!(result, Err(MergeError::Consumer(_))));
        assert_eq!(consumer.accepted.len(), 2);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    /// Suspending source yielding `ready` entries and then never resolving.
    struct StallingSource {
        ready: usize,
        pulls: usize,
    }

    impl crate::source::AsyncLogSource for StallingSource {
        type Payload = (usize, usize);
        type Error = io::Error;

        async fn pull_async(&mut self) -> Result<Option<Entry<(usize, usize)>>, io::Error> {
            if self.pulls == self.ready {
                std::future::pending::<()>().await;
            }
            self.pulls += 1;
            Ok(Some(Entry::new(Utc.timestamp_opt(self.pulls as i64, 0).unwrap(), (0, self.pulls))))
        }

        fn is_exhausted(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_temporary_data_removed_on_cancel() {
        let tmp_dir = tempfile::tempdir_in("./").unwrap();
        let merger = build_merger(tmp_dir.path(), Strategy::External, 1);
        let sources = vec![StallingSource { ready: 3, pulls: 0 }];

        let mut output = Vec::new();
        let mut merge = Box::pin(merger.merge_async(sources, &mut output));
        assert!(futures_util::poll!(merge.as_mut()).is_pending());

        let run_dirs = Vec::from_iter(fs::read_dir(tmp_dir.path()).unwrap().map(|entry| entry.unwrap().path()));
        assert_eq!(run_dirs.len(), 1);
        assert_eq!(fs::read_dir(&run_dirs[0]).unwrap().count(), 3);

        drop(merge);
        assert!(output.is_empty());
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_builder_strategy() {
        assert_eq!(LogMergerBuilder::new().build().unwrap().strategy(), Strategy::InMemory);

        let merger = LogMergerBuilder::new().with_strategy(Strategy::External).build().unwrap();
        assert_eq!(merger.strategy(), Strategy::External);
    }

    async fn check_merge_async(strategy: Strategy) {
        let tmp_dir = tempfile::tempdir_in("./").unwrap();
        let data = vec![vec![], vec![10], vec![5, 20]];

        let mut output = Vec::new();
        let merged = build_merger(tmp_dir.path(), strategy, 1)
            .merge_async(sources_of(&data), &mut output)
            .await
            .unwrap();

        assert_eq!(merged, 3);
        let stamps = Vec::from_iter(output.iter().map(|entry| entry.timestamp.timestamp()));
        assert_eq!(stamps, vec![5, 10, 20]);
    }

    #[tokio::test]
    async fn test_merge_async_in_memory() {
        check_merge_async(Strategy::InMemory).await;
    }

    #[tokio::test]
    async fn test_merge_async_external() {
        check_merge_async(Strategy::External).await;
    }

    /// Adapts an infallible source to the `io::Error` error type.
    struct InfallibleAsIo<S>(S);

    impl<S: LogSource<Error = std::convert::Infallible>> LogSource for InfallibleAsIo<S> {
        type Payload = S::Payload;
        type Error = io::Error;

        fn pull(&mut self) -> Result<Option<Entry<S::Payload>>, io::Error> {
            Ok(self.0.pull().unwrap_or_else(|never| match never {}))
        }

        fn is_exhausted(&self) -> bool {
            self.0.is_exhausted()
        }
    }
}
