//! Database configuration.

use std::sync::Arc;
use std::time::Duration;

use canopy_engine::EncryptionKey;

use crate::transport::SyncClient;

/// How a database keeps itself in sync with its remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Long-poll [`SyncClient::read`], pausing `interval` between cycles
    Poll { interval: Duration },
    /// Hold a server-push stream open via [`SyncClient::open_stream`]
    Stream,
}

/// Remote sync settings.
#[derive(Clone)]
pub struct SyncConfig {
    /// Transport to the remote datastore
    pub client: Arc<dyn SyncClient>,
    pub mode: SyncMode,
    /// First retry delay after a network error; doubles per failure
    pub initial_backoff: Duration,
    /// Retry delay ceiling
    pub max_backoff: Duration,
}

impl SyncConfig {
    pub fn new(client: Arc<dyn SyncClient>) -> Self {
        Self {
            client,
            mode: SyncMode::Poll {
                interval: Duration::from_secs(5),
            },
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("mode", &self.mode)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .finish_non_exhaustive()
    }
}

/// Per-database settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Encrypt entry payloads on the wire and at rest on the remote
    pub encryption_key: Option<EncryptionKey>,
    /// Stamp CRC32C checksums on serialized entries
    pub add_checksums: bool,
    /// Verify checksums on deserialized entries
    pub verify_checksums: bool,
    /// Remote sync; `None` keeps the database local-only
    pub sync: Option<SyncConfig>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseConfig {
    /// Checksums on, no encryption, no sync.
    pub fn new() -> Self {
        Self {
            encryption_key: None,
            add_checksums: true,
            verify_checksums: true,
            sync: None,
        }
    }

    pub fn with_encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = Some(sync);
        self
    }
}
