//! Background sync loops.
//!
//! A database with a [`SyncConfig`] runs one background task that keeps
//! local and remote state converging: push pending revisions, then either
//! long-poll for new remote commits or hold a server-push stream open.
//! Network errors are retried with exponential backoff; every other error
//! stops the loop. Cancellation (via [`Database::close`]) wins every race.

use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::{SyncConfig, SyncMode};
use crate::database::Database;
use crate::error::DbError;

/// Exponential retry delay: `initial`, doubling per failure up to `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait now; subsequent calls double it.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

pub(crate) fn spawn(db: Database, config: SyncConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(db, config))
}

async fn run(db: Database, config: SyncConfig) {
    let cancel = db.cancel_token();
    let mut backoff = Backoff::new(config.initial_backoff, config.max_backoff);
    let result = match config.mode {
        SyncMode::Poll { interval } => {
            run_poll(&db, &config, &cancel, &mut backoff, interval).await
        }
        SyncMode::Stream => run_stream(&db, &config, &cancel, &mut backoff).await,
    };
    match result {
        Ok(()) => tracing::debug!(db = %db.name(), "sync loop stopped"),
        Err(error) => tracing::error!(db = %db.name(), %error, "sync loop failed"),
    }
}

/// One push-then-pull cycle through the dispatcher, used to flush state
/// before a stream (re)connect. `Ok(true)` means keep going.
async fn sync_once(db: &Database) -> Result<bool, DbError> {
    match db.push().await {
        Ok(_) => {}
        Err(DbError::Closed) => return Ok(false),
        Err(error) => return Err(error),
    }
    match db.pull().await {
        Ok(merged) => {
            if !merged.is_empty() {
                tracing::debug!(db = %db.name(), entries = merged.len(), "merged remote commits");
            }
            Ok(true)
        }
        Err(DbError::Closed) => Ok(false),
        Err(error) => Err(error),
    }
}

/// One push-then-long-poll cycle. The read is issued directly against the
/// client, off the dispatcher, so a server holding the request open never
/// blocks local writes; batches merge through the same path the stream
/// loop uses. `Ok(true)` means keep going.
async fn poll_once(
    db: &Database,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<bool, DbError> {
    match db.push().await {
        Ok(_) => {}
        Err(DbError::Closed) => return Ok(false),
        Err(error) => return Err(error),
    }
    let since = match db.server_metadata().await {
        Ok(meta) => meta.last_modified,
        Err(DbError::Closed) => return Ok(false),
        Err(error) => return Err(error),
    };
    let bytes = tokio::select! {
        _ = cancel.cancelled() => return Ok(false),
        result = config.client.read(db.name(), since, true) => result?,
    };
    if bytes.is_empty() {
        return Ok(true);
    }
    match db.apply_remote_bytes(bytes).await {
        Ok(merged) => {
            if !merged.is_empty() {
                tracing::debug!(db = %db.name(), entries = merged.len(), "merged remote commits");
            }
            Ok(true)
        }
        Err(DbError::Closed) => Ok(false),
        Err(error) => Err(error),
    }
}

async fn run_poll(
    db: &Database,
    config: &SyncConfig,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
    interval: Duration,
) -> Result<(), DbError> {
    loop {
        match poll_once(db, config, cancel).await {
            Ok(true) => {
                backoff.reset();
                if !wait(cancel, interval).await {
                    return Ok(());
                }
            }
            Ok(false) => return Ok(()),
            Err(error) if error.is_retryable() => {
                let delay = backoff.next_delay();
                tracing::warn!(db = %db.name(), %error, ?delay, "sync failed, backing off");
                if !wait(cancel, delay).await {
                    return Ok(());
                }
            }
            Err(error) => return Err(error),
        }
    }
}

async fn run_stream(
    db: &Database,
    config: &SyncConfig,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
) -> Result<(), DbError> {
    loop {
        // Flush pending local writes before (re)connecting so the stream
        // starts from a pushed state.
        match sync_once(db).await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(error) if error.is_retryable() => {
                let delay = backoff.next_delay();
                tracing::warn!(db = %db.name(), %error, ?delay, "sync failed, backing off");
                if !wait(cancel, delay).await {
                    return Ok(());
                }
                continue;
            }
            Err(error) => return Err(error),
        }

        let since = match db.server_metadata().await {
            Ok(meta) => meta.last_modified,
            Err(DbError::Closed) => return Ok(()),
            Err(error) => return Err(error),
        };
        let mut stream = match config.client.open_stream(db.name(), since).await {
            Ok(stream) => stream,
            Err(error) if error.is_retryable() => {
                let delay = backoff.next_delay();
                tracing::warn!(db = %db.name(), %error, ?delay, "stream connect failed, backing off");
                if !wait(cancel, delay).await {
                    return Ok(());
                }
                continue;
            }
            Err(error) => return Err(error),
        };
        tracing::debug!(db = %db.name(), since, "sync stream connected");
        backoff.reset();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                batch = stream.next() => match batch {
                    Some(Ok(bytes)) => match db.apply_remote_bytes(bytes).await {
                        Ok(_) => {}
                        Err(DbError::Closed) => return Ok(()),
                        Err(error) => return Err(error),
                    },
                    Some(Err(error)) if error.is_retryable() => {
                        tracing::warn!(db = %db.name(), %error, "sync stream broke, reconnecting");
                        break;
                    }
                    Some(Err(error)) => return Err(error),
                    // Server closed the stream; reconnect.
                    None => break,
                },
            }
        }

        let delay = backoff.next_delay();
        if !wait(cancel, delay).await {
            return Ok(());
        }
    }
}

/// Sleep unless cancelled first; `false` means cancelled.
async fn wait(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn wait_is_cancellable() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!wait(&cancel, Duration::from_secs(60)).await);
    }
}
