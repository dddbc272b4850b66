//! Log source capabilities.
//!
//! A log source yields its entries one at a time, oldest first. Sources are either blocking
//! ([`LogSource`]) or suspending ([`AsyncLogSource`]). Every blocking source is a suspending one
//! as well, so the asynchronous engines accept both.

use std::convert::Infallible;
use std::error::Error;
use std::future::{self, Future};

use crate::entry::{Entry, SourceId};
use crate::error::MergeError;

/// Blocking log source.
pub trait LogSource {
    type Payload;
    type Error: Error + Send + Sync + 'static;

    /// Pulls the next entry. Returns `None` when the source is exhausted.
    fn pull(&mut self) -> Result<Option<Entry<Self::Payload>>, Self::Error>;

    /// Checks if the source has no more entries.
    fn is_exhausted(&self) -> bool;
}

/// Suspending log source. A pull may suspend the calling task while data becomes available.
///
/// Pulls of a single source are always issued sequentially.
pub trait AsyncLogSource {
    type Payload;
    type Error: Error + Send + Sync + 'static;

    /// Pulls the next entry. Resolves to `None` when the source is exhausted.
    fn pull_async(&mut self) -> impl Future<Output = Result<Option<Entry<Self::Payload>>, Self::Error>>;

    /// Checks if the source has no more entries.
    fn is_exhausted(&self) -> bool;
}

impl<S: LogSource> AsyncLogSource for S {
    type Payload = S::Payload;
    type Error = S::Error;

    fn pull_async(&mut self) -> impl Future<Output = Result<Option<Entry<Self::Payload>>, Self::Error>> {
        future::ready(self.pull())
    }

    fn is_exhausted(&self) -> bool {
        LogSource::is_exhausted(self)
    }
}

impl<S: LogSource + ?Sized> LogSource for Box<S> {
    type Payload = S::Payload;
    type Error = S::Error;

    fn pull(&mut self) -> Result<Option<Entry<S::Payload>>, S::Error> {
        (**self).pull()
    }

    fn is_exhausted(&self) -> bool {
        LogSource::is_exhausted(&**self)
    }
}

/// What to do when a source fails to yield its next entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceErrorPolicy {
    /// Stop the merge and surface the error to the caller.
    #[default]
    Abort,
    /// Log the error and treat the source as exhausted.
    Skip,
}

impl SourceErrorPolicy {
    pub(crate) fn handle<T, E>(self, source_id: SourceId, err: E) -> Result<Option<T>, MergeError>
    where
        E: Error + Send + Sync + 'static,
    {
        match self {
            SourceErrorPolicy::Abort => Err(MergeError::source_read(source_id, err)),
            SourceErrorPolicy::Skip => {
                log::warn!("skipping the rest of log source {}: {}", source_id, err);
                Ok(None)
            }
        }
    }
}

pub(crate) fn pull_blocking<S: LogSource>(
    source: &mut S,
    source_id: SourceId,
    policy: SourceErrorPolicy,
) -> Result<Option<Entry<S::Payload>>, MergeError> {
    if LogSource::is_exhausted(source) {
        return Ok(None);
    }

    match source.pull() {
        Ok(entry) => Ok(entry),
        Err(err) => policy.handle(source_id, err),
    }
}

pub(crate) async fn pull_suspending<S: AsyncLogSource>(
    source: &mut S,
    source_id: SourceId,
    policy: SourceErrorPolicy,
) -> Result<Option<Entry<S::Payload>>, MergeError> {
    if AsyncLogSource::is_exhausted(source) {
        return Ok(None);
    }

    match source.pull_async().await {
        Ok(entry) => Ok(entry),
        Err(err) => policy.handle(source_id, err),
    }
}

/// Log source over an iterator of already ordered entries.
pub struct IterSource<I: Iterator> {
    inner: I,
    exhausted: bool,
}

impl<I: Iterator> IterSource<I> {
    pub fn new<T>(entries: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        IterSource {
            inner: entries.into_iter(),
            exhausted: false,
        }
    }
}

impl<I, P> LogSource for IterSource<I>
where
    I: Iterator<Item = Entry<P>>,
{
    type Payload = P;
    type Error = Infallible;

    fn pull(&mut self) -> Result<Option<Entry<P>>, Infallible> {
        if self.exhausted {
            return Ok(None);
        }

        let entry = self.inner.next();
        self.exhausted = entry.is_none();

        return Ok(entry);
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
