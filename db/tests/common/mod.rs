//! Shared test fixtures: an in-process remote datastore.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use canopy_db::{DbError, EntryStream, Result, SyncClient, Timestamp, WriteResponse};
use canopy_engine::{deserialize_entries, serialize_entries, EncryptionKey, Entry};

/// An in-process remote: commits entries with a monotonic timestamp and
/// pushes them to open streams. Doubles as the inspection point for tests.
pub struct Loopback {
    key: Option<EncryptionKey>,
    state: Mutex<State>,
    offline: AtomicBool,
    long_polls: AtomicUsize,
}

struct State {
    committed: Vec<Entry>,
    next_commit: Timestamp,
    streams: Vec<mpsc::UnboundedSender<Result<Vec<u8>>>>,
}

impl Loopback {
    pub fn new(key: Option<EncryptionKey>) -> Self {
        Self {
            key,
            state: Mutex::new(State {
                committed: Vec::new(),
                next_commit: 1000,
                streams: Vec::new(),
            }),
            offline: AtomicBool::new(false),
            long_polls: AtomicUsize::new(0),
        }
    }

    /// How many reads asked the server to hold until entries exist.
    pub fn long_polls(&self) -> usize {
        self.long_polls.load(Ordering::SeqCst)
    }

    /// Simulate a network outage.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Everything the server has committed, in commit order.
    pub fn committed(&self) -> Vec<Entry> {
        self.state.lock().unwrap().committed.clone()
    }

    /// Commit entries server-side (as if another client wrote them).
    pub fn commit_remote(&self, entries: Vec<Entry>) -> Timestamp {
        let mut state = self.state.lock().unwrap();
        Self::commit_locked(&mut state, entries, self.key.as_ref())
    }

    fn commit_locked(
        state: &mut State,
        mut entries: Vec<Entry>,
        key: Option<&EncryptionKey>,
    ) -> Timestamp {
        let commit = state.next_commit;
        state.next_commit += 1;
        for entry in &mut entries {
            entry.metadata.commit_time = Some(commit);
        }
        state.committed.extend(entries.iter().cloned());
        let bytes = serialize_entries(&entries, key, true).unwrap();
        state.streams.retain(|stream| stream.send(Ok(bytes.clone())).is_ok());
        commit
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(DbError::Network("loopback offline".into()))
        } else {
            Ok(())
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Entry>> {
        deserialize_entries(bytes, self.key.as_ref(), true)
            .map_err(|e| DbError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl SyncClient for Loopback {
    async fn read(
        &self,
        _datastore: &str,
        since: Timestamp,
        wait_until_nonempty: bool,
    ) -> Result<Vec<u8>> {
        self.check_online()?;
        // An in-process server always answers immediately; the flag is
        // only recorded so tests can assert who long-polled.
        if wait_until_nonempty {
            self.long_polls.fetch_add(1, Ordering::SeqCst);
        }
        let state = self.state.lock().unwrap();
        let newer: Vec<Entry> = state
            .committed
            .iter()
            .filter(|entry| entry.metadata.commit_time.unwrap_or(0) > since)
            .cloned()
            .collect();
        if newer.is_empty() {
            return Ok(Vec::new());
        }
        serialize_entries(&newer, self.key.as_ref(), true)
            .map_err(|e| DbError::Rejected(e.to_string()))
    }

    async fn write(&self, _datastore: &str, bytes: Vec<u8>) -> Result<WriteResponse> {
        self.check_online()?;
        let entries = self.decode(&bytes)?;
        let mut state = self.state.lock().unwrap();
        let commit_timestamp = Self::commit_locked(&mut state, entries, self.key.as_ref());
        Ok(WriteResponse { commit_timestamp })
    }

    async fn rewrite(&self, _datastore: &str, bytes: Vec<u8>) -> Result<WriteResponse> {
        self.check_online()?;
        let entries = self.decode(&bytes)?;
        let mut state = self.state.lock().unwrap();
        state.committed.clear();
        let head_commit = state.next_commit;
        let to_commit = std::iter::once(Entry::head(head_commit))
            .chain(entries)
            .collect();
        let commit_timestamp = Self::commit_locked(&mut state, to_commit, self.key.as_ref());
        Ok(WriteResponse { commit_timestamp })
    }

    async fn destroy(&self, _datastore: &str) -> Result<()> {
        self.check_online()?;
        self.state.lock().unwrap().committed.clear();
        Ok(())
    }

    async fn open_stream(&self, _datastore: &str, since: Timestamp) -> Result<EntryStream> {
        self.check_online()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        let backlog: Vec<Entry> = state
            .committed
            .iter()
            .filter(|entry| entry.metadata.commit_time.unwrap_or(0) > since)
            .cloned()
            .collect();
        if !backlog.is_empty() {
            let bytes = serialize_entries(&backlog, self.key.as_ref(), true)
                .map_err(|e| DbError::Rejected(e.to_string()))?;
            let _ = sender.send(Ok(bytes));
        }
        state.streams.push(sender);
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|batch| (batch, receiver))
        });
        Ok(stream.boxed())
    }
}
