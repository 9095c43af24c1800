//! Change subscriptions.
//!
//! Readers register interest in a path and receive [`ChangeEvent`]s over an
//! unbounded channel whenever a commit or a remote merge touches a leaf at,
//! below, or above that path. Routing uses canonical-string prefix checks,
//! so it never parses keys.

use std::collections::HashMap;

use tokio::sync::mpsc;

use canopy_engine::{string_relationship, EntityPath, Entry, PathRelationship, Value};

/// Identifier handed back on registration, used to unsubscribe.
pub type SubscriptionId = u64;

/// What a subscriber receives per change.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// The changed leaf entries related to the subscribed path
    Diff { entries: Vec<Entry> },
    /// The full current value at the subscribed path
    Snapshot { value: Option<Value> },
}

/// Delivery style chosen at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// Receive the raw changed entries
    Diff,
    /// Receive the re-read value at the subscribed path after each change
    Snapshot,
}

#[derive(Debug)]
struct Subscription {
    path: EntityPath,
    path_string: String,
    kind: SubscriptionKind,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

/// A subscription hit by a change set, with the entries that hit it.
#[derive(Debug)]
pub struct AffectedSubscription {
    pub id: SubscriptionId,
    pub kind: SubscriptionKind,
    pub path: EntityPath,
    pub entries: Vec<Entry>,
}

/// All live subscriptions of one database.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    next_id: SubscriptionId,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber at `path`.
    pub fn subscribe(
        &mut self,
        path: EntityPath,
        kind: SubscriptionKind,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.insert(
            id,
            Subscription {
                path_string: path.to_string(),
                path,
                kind,
                sender,
            },
        );
        (id, receiver)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Which subscriptions a change set touches, and with which entries.
    ///
    /// A subscription matches an entry when the entry's key equals, lies
    /// below, or lies above the subscribed path.
    pub fn affected(&self, changed: &[Entry]) -> Vec<AffectedSubscription> {
        let mut affected = Vec::new();
        for (&id, subscription) in &self.subscriptions {
            let entries: Vec<Entry> = changed
                .iter()
                .filter(|entry| {
                    string_relationship(&subscription.path_string, &entry.key)
                        != PathRelationship::None
                })
                .cloned()
                .collect();
            if !entries.is_empty() {
                affected.push(AffectedSubscription {
                    id,
                    kind: subscription.kind,
                    path: subscription.path.clone(),
                    entries,
                });
            }
        }
        affected
    }

    /// Deliver an event; drops the subscription when the receiver is gone.
    pub fn deliver(&mut self, id: SubscriptionId, event: ChangeEvent) {
        if let Some(subscription) = self.subscriptions.get(&id) {
            if subscription.sender.send(event).is_err() {
                self.subscriptions.remove(&id);
            }
        }
    }
}
