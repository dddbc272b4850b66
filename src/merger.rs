//! In-memory frontier merger.
//!
//! The merger keeps the head timestamp of every source in a [`Frontier`] and emits entries as soon
//! as their global order is certain. After emitting the head of a source, the source is drained
//! ahead of the frontier for as long as its entries stay earlier than the frontier minimum, so a
//! locally dense source does not pay a heap round-trip per entry.
//!
//! "Earlier" is the `(timestamp, source)` order: on equal timestamps the source listed first
//! wins, which is the same rule the external merger applies.
//!
//! [`FrontierMerger`] does no I/O itself. It tells its driver which source to pull next and
//! which entry to emit, so the blocking ([`merge_blocking`]) and the suspending
//! ([`merge_async`]) drivers share the same algorithm.

use std::mem;

use futures_util::future;

use crate::consumer::Consumer;
use crate::entry::{Entry, SourceId};
use crate::error::MergeError;
use crate::frontier::{Frontier, FrontierNode};
use crate::source::{pull_blocking, pull_suspending, AsyncLogSource, LogSource, SourceErrorPolicy};

enum SourceState<P> {
    /// The pending head is held here and its timestamp is in the frontier.
    AtFrontier(Entry<P>),
    /// The source is drained ahead of the frontier.
    Draining,
    Exhausted,
}

/// Next action requested by the merger from its driver.
#[derive(Debug, PartialEq)]
pub enum Step<P> {
    /// Emit the entry to the consumer.
    Emit(Entry<P>),
    /// Pull the next entry of the source and pass it to [`FrontierMerger::pulled`].
    Pull(SourceId),
    /// All sources are exhausted.
    Done,
}

/// Frontier merge state machine.
pub struct FrontierMerger<P> {
    frontier: Frontier,
    sources: Vec<SourceState<P>>,
    draining: Option<SourceId>,
    ready: Option<Entry<P>>,
    emitted: u64,
}

impl<P> FrontierMerger<P> {
    /// Creates a merger seeded with the first entry of every source.
    /// A source without a first entry is exhausted and never enters the frontier.
    ///
    /// # Arguments
    /// * `heads` - First entry of each source, in source order
    pub fn new<I>(heads: I) -> Self
    where
        I: IntoIterator<Item = Option<Entry<P>>>,
    {
        let heads = heads.into_iter();
        let mut frontier = Frontier::with_capacity(heads.size_hint().0);

        let sources = Vec::from_iter(heads.enumerate().map(|(idx, head)| match head {
            Some(entry) => {
                frontier.insert(FrontierNode::new(entry.timestamp, SourceId(idx)));
                SourceState::AtFrontier(entry)
            }
            None => SourceState::Exhausted,
        }));

        return FrontierMerger {
            frontier,
            sources,
            draining: None,
            ready: None,
            emitted: 0,
        };
    }

    /// Number of entries handed out through [`Step::Emit`].
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Returns the next action.
    pub fn step(&mut self) -> Step<P> {
        if let Some(entry) = self.ready.take() {
            return self.emit(entry);
        }

        if let Some(source) = self.draining {
            return Step::Pull(source);
        }

        while let Some(node) = self.frontier.remove_min() {
            let state = &mut self.sources[node.source.index()];
            let entry = match mem::replace(state, SourceState::Draining) {
                SourceState::AtFrontier(entry) => entry,
                other => {
                    log::warn!("frontier node of log source {} has no pending head", node.source);
                    *state = other;
                    continue;
                }
            };

            // nodes leave the frontier in order and a source owns at most one node
            debug_assert!(
                self.frontier
                    .peek_min()
                    .map_or(true, |min| precedes(&entry, node.source, &min)),
                "frontier returned {:?} out of order",
                node
            );

            self.draining = Some(node.source);
            return self.emit(entry);
        }

        return Step::Done;
    }

    /// Passes the result of a [`Step::Pull`] back to the merger.
    /// `None` means the source is exhausted.
    pub fn pulled(&mut self, source: SourceId, entry: Option<Entry<P>>) {
        debug_assert_eq!(self.draining, Some(source), "unexpected pull of log source {}", source);

        let entry = match entry {
            Some(entry) => entry,
            None => {
                self.sources[source.index()] = SourceState::Exhausted;
                self.draining = None;
                return;
            }
        };

        let ahead = match self.frontier.peek_min() {
            Some(min) => precedes(&entry, source, &min),
            None => true,
        };

        if ahead {
            self.ready = Some(entry);
        } else {
            self.frontier.insert(FrontierNode::new(entry.timestamp, source));
            self.sources[source.index()] = SourceState::AtFrontier(entry);
            self.draining = None;
        }
    }

    fn emit(&mut self, entry: Entry<P>) -> Step<P> {
        self.emitted += 1;
        Step::Emit(entry)
    }
}

/// Checks if an entry of `source` is strictly earlier than the frontier node.
fn precedes<P>(entry: &Entry<P>, source: SourceId, node: &FrontierNode) -> bool {
    (entry.timestamp, source) < (node.head, node.source)
}

/// Merges blocking sources in memory, emitting entries to the consumer in chronological order.
/// Returns the number of emitted entries.
///
/// # Arguments
/// * `sources` - Log sources, each ordered by timestamp
/// * `consumer` - Merged stream consumer
/// * `policy` - What to do when a source fails
pub fn merge_blocking<S, K>(sources: &mut [S], consumer: &mut K, policy: SourceErrorPolicy) -> Result<u64, MergeError>
where
    S: LogSource,
    K: Consumer<S::Payload>,
{
    let mut heads = Vec::with_capacity(sources.len());
    for (idx, source) in sources.iter_mut().enumerate() {
        heads.push(pull_blocking(source, SourceId(idx), policy)?);
    }

    let mut merger = FrontierMerger::new(heads);
    loop {
        match merger.step() {
            Step::Emit(entry) => consumer.emit(entry).map_err(MergeError::consumer)?,
            Step::Pull(id) => {
                let entry = pull_blocking(&mut sources[id.index()], id, policy)?;
                merger.pulled(id, entry);
            }
            Step::Done => break,
        }
    }
    consumer.complete().map_err(MergeError::consumer)?;

    log::debug!("in-memory merge done ({} entries)", merger.emitted());

    return Ok(merger.emitted());
}

/// Merges suspending sources in memory. The first entry of every source is pulled concurrently,
/// later pulls of a source are sequential.
/// Returns the number of emitted entries.
///
/// # Arguments
/// * `sources` - Log sources, each ordered by timestamp
/// * `consumer` - Merged stream consumer
/// * `policy` - What to do when a source fails
pub async fn merge_async<S, K>(sources: &mut [S], consumer: &mut K, policy: SourceErrorPolicy) -> Result<u64, MergeError>
where
    S: AsyncLogSource,
    K: Consumer<S::Payload>,
{
    let heads = future::join_all(
        sources
            .iter_mut()
            .enumerate()
            .map(|(idx, source)| pull_suspending(source, SourceId(idx), policy)),
    )
    .await;
    let heads: Result<Vec<_>, MergeError> = heads.into_iter().collect();

    let mut merger = FrontierMerger::new(heads?);
    loop {
        match merger.step() {
            Step::Emit(entry) => consumer.emit(entry).map_err(MergeError::consumer)?,
            Step::Pull(id) => {
                let entry = pull_suspending(&mut sources[id.index()], id, policy).await?;
                merger.pulled(id, entry);
            }
            Step::Done => break,
        }
    }
    consumer.complete().map_err(MergeError::consumer)?;

    log::debug!("in-memory merge done ({} entries)", merger.emitted());

    return Ok(merger.emitted());
}
