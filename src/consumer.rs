//! Merged output consumer.

use std::convert::Infallible;
use std::error::Error;

use crate::entry::Entry;

/// Consumer of the merged stream. Receives entries in global chronological order, then a single
/// completion signal.
///
/// Returning an error from [`Consumer::emit`] stops the merge: no further source is pulled.
pub trait Consumer<P> {
    type Error: Error + Send + Sync + 'static;

    fn emit(&mut self, entry: Entry<P>) -> Result<(), Self::Error>;

    fn complete(&mut self) -> Result<(), Self::Error>;
}

/// Collects merged entries.
impl<P> Consumer<P> for Vec<Entry<P>> {
    type Error = Infallible;

    fn emit(&mut self, entry: Entry<P>) -> Result<(), Infallible> {
        self.push(entry);
        Ok(())
    }

    fn complete(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

impl<P, K: Consumer<P> + ?Sized> Consumer<P> for &mut K {
    type Error = K::Error;

    fn emit(&mut self, entry: Entry<P>) -> Result<(), Self::Error> {
        (**self).emit(entry)
    }

    fn complete(&mut self) -> Result<(), Self::Error> {
        (**self).complete()
    }
}
