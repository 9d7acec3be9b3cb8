//! Remote update source seam: the fetch contract, request/error types, and
//! the opaque update record.

pub mod envelope;
pub mod error;
pub mod request;
pub mod update;

pub use envelope::decode_updates_response;
pub use error::SourceError;
pub use request::FetchRequest;
pub use update::{batch_high_water, RawUpdate, Update, UpdateId};

use core::future::Future;
use core::pin::Pin;

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Pull-based API that returns the next ordered batch of updates.
///
/// A single call may block up to [`FetchRequest::timeout`] waiting for new data and may
/// legitimately return an empty batch. Returned updates must be ordered by increasing
/// [`UpdateId`].
pub trait UpdateSource: Send + Sync + 'static {
    type Update: Update;

    fn fetch_updates<'a>(&'a self, request: &'a FetchRequest)
        -> SourceFuture<'a, Vec<Self::Update>>;
}
