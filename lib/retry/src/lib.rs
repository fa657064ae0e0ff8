//! Optimistic concurrency for read-modify-write sequences against a remote,
//! versioned object store.
//!
//! A write carrying a stale resource version is rejected by the store as a
//! conflict. [`Retrier`] re-runs the whole fetch, mutate and write sequence
//! when that happens, bounded by a [`RetryPolicy`]. Every other failure is
//! returned on first occurrence.

mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
mod policy;
mod retrier;
mod store;

pub use error::{Classify, Error, ErrorKind};
pub use policy::RetryPolicy;
pub use retrier::Retrier;
pub use store::{Versioned, VersionedStore};

pub use backoff::{Backoff, Constant, ExponentialBackoff, Jitter};
pub use tokio_util::sync::CancellationToken;
