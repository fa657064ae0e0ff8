use std::fmt::{Debug, Display};

use async_trait::async_trait;

use crate::Classify;

/// An object carrying the opaque version token observed when it was read.
pub trait Versioned {
    fn resource_version(&self) -> Option<&str>;
}

/// A remote object store offering reads and compare-and-swap writes.
///
/// `write` must reject an object whose resource version is not the current
/// one with an error classified as [`crate::ErrorKind::Conflict`].
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Identity of an object, e.g. its name within a namespace.
    type Key: Debug + Send + Sync + ?Sized;

    type Object: Versioned + Send;

    type Error: Classify + Display + Send;

    /// Returns the current object and its version token.
    async fn fetch(&self, key: &Self::Key) -> Result<Self::Object, Self::Error>;

    /// Commits `object` if its version token is still current, and returns
    /// the stored object carrying the new token.
    async fn write(&self, object: Self::Object) -> Result<Self::Object, Self::Error>;
}
