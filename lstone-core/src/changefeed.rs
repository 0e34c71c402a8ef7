/// Change feed
///
/// Ordered, in-memory log of change events correlated to versions. The log is
/// bounded (oldest events are evicted) and is not persisted across reopen.
///
/// Two subscription flavours exist: `watch` replays the currently buffered
/// events newer than a timestamp and then ends, `follow` replays and then
/// keeps delivering events appended later until the feed is closed. A
/// follower's channel holds at most `capacity` events; a follower that falls
/// that far behind is disconnected.

use crate::{Record, RecordId, VersionId};
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
    Schema,
    Optimize,
}

/// A single change to the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
    pub version: VersionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    /// Record as it was before the change (updates and deletes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Record>,
    /// Record as it is after the change (inserts and updates)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Record>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ChangeEvent {
    fn new(change_type: ChangeType, version: VersionId, timestamp: DateTime<Utc>) -> Self {
        Self {
            change_type,
            timestamp,
            version,
            record_id: None,
            before: None,
            after: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn insert(version: VersionId, timestamp: DateTime<Utc>, after: Record) -> Self {
        let mut event = Self::new(ChangeType::Insert, version, timestamp);
        event.record_id = Some(after.id);
        event.after = Some(after);
        event
    }

    pub fn update(version: VersionId, timestamp: DateTime<Utc>, before: Record, after: Record) -> Self {
        let mut event = Self::new(ChangeType::Update, version, timestamp);
        event.record_id = Some(after.id);
        event.before = Some(before);
        event.after = Some(after);
        event
    }

    pub fn delete(version: VersionId, timestamp: DateTime<Utc>, before: Record) -> Self {
        let mut event = Self::new(ChangeType::Delete, version, timestamp);
        event.record_id = Some(before.id);
        event.before = Some(before);
        event
    }

    /// Table-level event (schema evolution, optimize)
    pub fn table(change_type: ChangeType, version: VersionId, timestamp: DateTime<Utc>) -> Self {
        Self::new(change_type, version, timestamp)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub struct ChangeFeed {
    events: VecDeque<ChangeEvent>,
    capacity: usize,
    followers: Vec<Sender<ChangeEvent>>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
            followers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append events in order, evicting the oldest beyond capacity and
    /// forwarding each event to live followers
    pub fn append(&mut self, events: Vec<ChangeEvent>) {
        for event in events {
            // Followers whose receiver is gone or whose channel is full are dropped
            self.followers.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Disconnecting change feed follower lagging by {} events", tx.len());
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            });

            self.events.push_back(event);
            while self.events.len() > self.capacity {
                self.events.pop_front();
            }
        }
    }

    /// Buffered events strictly newer than `from`
    pub fn since(&self, from: DateTime<Utc>) -> Vec<ChangeEvent> {
        self.events.iter().filter(|e| e.timestamp > from).cloned().collect()
    }

    /// Buffered events with `from <= version <= to`
    pub fn range(&self, from: VersionId, to: VersionId) -> Vec<ChangeEvent> {
        self.events
            .iter()
            .filter(|e| e.version >= from && e.version <= to)
            .cloned()
            .collect()
    }

    /// Bounded replay: the channel ends after the buffered events
    pub fn watch(&self, from: DateTime<Utc>) -> Receiver<ChangeEvent> {
        let (tx, rx) = channel::unbounded();
        for event in self.since(from) {
            let _ = tx.send(event);
        }
        rx
    }

    /// Replay plus live tail until the receiver is dropped or the feed closes
    pub fn follow(&mut self, from: DateTime<Utc>) -> Receiver<ChangeEvent> {
        // The replay never exceeds the buffered events, so it always fits
        let (tx, rx) = channel::bounded(self.capacity);
        for event in self.since(from) {
            let _ = tx.send(event);
        }
        self.followers.push(tx);
        rx
    }

    pub fn follower_count(&self) -> usize {
        self.followers.len()
    }

    /// End every live subscription
    pub fn close(&mut self) {
        self.followers.clear();
    }
}
