//! Abstract interface for the object stores that hold ensemble backups.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error as StdError;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for `Store` errors.
pub trait StoreError: Debug + StdError + Send + Sync {}

/// A key-value object store with asynchronous operations.
///
/// Keys may contain `/` separators; implementations treat them as an opaque
/// hierarchy (the filesystem store maps them to directories). Writes replace
/// any existing value for the key.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// The error type returned by this store.
    type Error: StoreError;

    /// Deletes a key. Deleting a missing key is not an error.
    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<(), Self::Error>;

    /// Retrieves the value associated with a key.
    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error>;

    /// Retrieves all keys in the store, including nested ones.
    async fn keys(&self) -> Result<Vec<String>, Self::Error>;

    /// Stores a key-value pair.
    async fn put<K: Into<String> + Send>(&self, key: K, bytes: Bytes) -> Result<(), Self::Error>;
}
