/// Stream registry
///
/// Independently named pub/sub channels for ingestion and CDC pipelines.
/// Streams are fed explicitly by publish calls; they are not wired to table
/// mutation. Each stream owns a bounded channel, so a full buffer blocks the
/// publisher until a subscriber drains it, the caller's context fires, or
/// the stream is stopped.
///
/// Subscribers of one stream share its channel: each event is delivered to
/// exactly one subscriber.

use crate::{Context, Error, Record, Result, VersionId};
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    ChangeData,
    Inserts,
    Updates,
    Deletes,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    Insert,
    Update,
    Delete,
    Schema,
}

/// Stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub stream_type: StreamType,
    /// Channel capacity (0 = table default)
    pub buffer_size: usize,
    pub flush_interval_ms: u64,
    pub partitions: u32,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, stream_type: StreamType) -> Self {
        Self {
            name: name.into(),
            stream_type,
            buffer_size: 0,
            flush_interval_ms: 5000,
            partitions: 1,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: StreamEventType,
    pub version: VersionId,
    pub data: Record,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl StreamEvent {
    /// Insert event for `record`, tagged with the stream it was published to
    pub fn insert(stream: &str, version: VersionId, record: Record) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("stream".to_string(), stream.to_string());
        metadata.insert("source".to_string(), "lakehouse".to_string());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: StreamEventType::Insert,
            version,
            data: record,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub events_published: u64,
    pub events_consumed: u64,
    pub active_subscribers: u64,
    pub last_event_time: Option<DateTime<Utc>>,
    pub bytes_transferred: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub name: String,
    pub stream_type: StreamType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub stats: StreamStats,
}

struct StreamState {
    tx: Option<Sender<StreamEvent>>,
    // Dropped on stop so blocked publishers wake up
    stop_tx: Option<Sender<()>>,
}

pub struct Stream {
    config: StreamConfig,
    created_at: DateTime<Utc>,
    state: Mutex<StreamState>,
    rx: Receiver<StreamEvent>,
    stop_rx: Receiver<()>,
    stats: Arc<Mutex<StreamStats>>,
}

impl Stream {
    fn start(config: StreamConfig) -> Self {
        let (tx, rx) = channel::bounded(config.buffer_size);
        let (stop_tx, stop_rx) = channel::bounded(0);
        Self {
            config,
            created_at: Utc::now(),
            state: Mutex::new(StreamState {
                tx: Some(tx),
                stop_tx: Some(stop_tx),
            }),
            rx,
            stop_rx,
            stats: Arc::new(Mutex::new(StreamStats::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn stream_type(&self) -> StreamType {
        self.config.stream_type
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().tx.is_some()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats.lock().clone()
    }

    pub fn info(&self) -> StreamInfo {
        let stats = self.stats();
        StreamInfo {
            name: self.config.name.clone(),
            stream_type: self.config.stream_type,
            is_active: self.is_active(),
            created_at: self.created_at,
            last_activity: stats.last_event_time,
            stats,
        }
    }

    fn inactive(&self) -> Error {
        Error::InvalidState(format!("stream {} is not active", self.config.name))
    }

    /// Publish events in order, blocking while the buffer is full
    pub fn publish(&self, ctx: &Context, events: Vec<StreamEvent>) -> Result<()> {
        let tx = self.state.lock().tx.clone().ok_or_else(|| self.inactive())?;
        let done = ctx.done();
        let deadline = ctx.deadline_timer();

        for event in events {
            ctx.check()?;
            let size = serde_json::to_vec(&event).map(|b| b.len() as u64).unwrap_or(0);
            let timestamp = event.timestamp;

            select! {
                send(tx, event) -> res => {
                    if res.is_err() {
                        return Err(self.inactive());
                    }
                    let mut stats = self.stats.lock();
                    stats.events_published += 1;
                    stats.bytes_transferred += size;
                    stats.last_event_time = Some(timestamp);
                }
                recv(done) -> _ => return Err(Error::Cancelled),
                recv(deadline) -> _ => return Err(Error::DeadlineExceeded),
                recv(self.stop_rx) -> _ => return Err(self.inactive()),
            }
        }
        Ok(())
    }

    /// Read-only view of the stream's events
    pub fn subscribe(&self) -> Result<Subscription> {
        if !self.is_active() {
            return Err(self.inactive());
        }
        self.stats.lock().active_subscribers += 1;
        Ok(Subscription {
            rx: self.rx.clone(),
            stats: Arc::clone(&self.stats),
        })
    }

    /// Close the channel; buffered events can still be drained by subscribers
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.tx.is_none() {
            return Err(self.inactive());
        }
        state.tx = None;
        state.stop_tx = None;
        info!(stream = %self.config.name, "stream stopped");
        Ok(())
    }
}

/// Receiving end of a stream; counts consumed events
pub struct Subscription {
    rx: Receiver<StreamEvent>,
    stats: Arc<Mutex<StreamStats>>,
}

impl Subscription {
    fn consumed(&self, event: StreamEvent) -> StreamEvent {
        self.stats.lock().events_consumed += 1;
        event
    }

    /// Block for the next event; None once the stream is stopped and drained
    pub fn recv(&self) -> Option<StreamEvent> {
        self.rx.recv().ok().map(|e| self.consumed(e))
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<StreamEvent>> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(self.consumed(event))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::InvalidState("stream is stopped".into()))
            }
        }
    }

    pub fn try_recv(&self) -> Option<StreamEvent> {
        self.rx.try_recv().ok().map(|e| self.consumed(e))
    }
}

impl Iterator for Subscription {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        self.recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut stats = self.stats.lock();
        stats.active_subscribers = stats.active_subscribers.saturating_sub(1);
    }
}

/// Named streams, ordered by name
#[derive(Default)]
pub struct StreamRegistry {
    streams: BTreeMap<String, Arc<Stream>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a stream. A name stays taken once registered, even after the
    /// stream is stopped.
    pub fn start(&mut self, mut config: StreamConfig, default_buffer: usize) -> Result<Arc<Stream>> {
        if config.name.trim().is_empty() {
            return Err(Error::InvalidArgument("stream name must not be empty".into()));
        }
        if self.streams.contains_key(&config.name) {
            return Err(Error::Conflict(format!("stream {} already exists", config.name)));
        }
        if config.buffer_size == 0 {
            config.buffer_size = default_buffer.max(1);
        }

        debug!(stream = %config.name, buffer = config.buffer_size, "starting stream");
        let stream = Arc::new(Stream::start(config));
        self.streams.insert(stream.name().to_string(), Arc::clone(&stream));
        Ok(stream)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Stream>> {
        self.streams
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("stream {}", name)))
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        self.get(name)?.stop()
    }

    /// Active streams ordered by name
    pub fn active(&self) -> Vec<StreamInfo> {
        self.streams
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.info())
            .collect()
    }

    pub fn stop_all(&self) {
        for stream in self.streams.values() {
            let _ = stream.stop();
        }
    }
}
