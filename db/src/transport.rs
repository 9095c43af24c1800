//! Remote transport abstraction.
//!
//! A [`SyncClient`] moves opaque entry bytes between this client and a
//! remote datastore. The database never hands it decoded entries: encoding,
//! encryption and checksumming happen before bytes reach the client, so a
//! transport cannot observe plaintext when encryption is on.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use canopy_engine::Timestamp;

use crate::error::Result;

/// Batches of entry bytes pushed by the remote.
pub type EntryStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Response to a successful write or rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    /// The commit timestamp the server assigned to the whole batch
    pub commit_timestamp: Timestamp,
}

/// Transport to one remote datastore collection.
///
/// Errors that stem from the connection itself must be reported as
/// [`DbError::Network`](crate::DbError::Network); sync loops retry those
/// with backoff and treat everything else as fatal.
#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Fetch all entry bytes committed strictly after `since`.
    ///
    /// With `wait_until_nonempty` set the server may hold the request open
    /// until entries newer than `since` exist; transports that cannot wait
    /// return the empty batch immediately. A rewrite that happened after
    /// `since` is reported in-band: the returned bytes then start with a
    /// head entry.
    async fn read(
        &self,
        datastore: &str,
        since: Timestamp,
        wait_until_nonempty: bool,
    ) -> Result<Vec<u8>>;

    /// Append a batch of entry bytes.
    async fn write(&self, datastore: &str, bytes: Vec<u8>) -> Result<WriteResponse>;

    /// Replace the datastore contents with `bytes` wholesale.
    async fn rewrite(&self, datastore: &str, bytes: Vec<u8>) -> Result<WriteResponse>;

    /// Delete the remote datastore.
    async fn destroy(&self, datastore: &str) -> Result<()>;

    /// Open a server-push stream of entry-byte batches committed after
    /// `since`. Clients that cannot stream may return
    /// [`DbError::Network`](crate::DbError::Network) so callers fall back
    /// to polling [`read`](SyncClient::read).
    async fn open_stream(&self, datastore: &str, since: Timestamp) -> Result<EntryStream>;
}
