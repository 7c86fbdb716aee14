//! Decision journal: every pipeline step recorded per session, persisted
//! through an [`EventStore`] and fanned out to live subscribers.

use std::sync::Arc;

use anyhow::Result;
use parley_protocol::SessionId;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, instrument};

mod event;
mod store;

pub use event::{EventRecord, PipelineEvent};
pub use store::{EventStore, FileEventStore, InMemoryEventStore};

#[derive(Clone, Debug)]
pub struct EventStreamHub {
    sender: broadcast::Sender<EventRecord>,
}

impl EventStreamHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn publish(&self, record: EventRecord) {
        let _ = self.sender.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<EventRecord> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

#[derive(Clone)]
pub struct EventJournal {
    store: Arc<dyn EventStore>,
    stream: EventStreamHub,
}

impl EventJournal {
    pub fn new(store: Arc<dyn EventStore>, stream: EventStreamHub) -> Self {
        Self { store, stream }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryEventStore::new()), EventStreamHub::new(256))
    }

    /// Assigns the next sequence for the session, persists, then publishes.
    ///
    /// Callers serialize appends per session; a concurrent append for the
    /// same session fails with a sequence conflict instead of interleaving.
    #[instrument(skip(self, session_id, event), fields(session_id = %session_id, event = event.name()))]
    pub async fn record(&self, session_id: &SessionId, event: PipelineEvent) -> Result<EventRecord> {
        let sequence = self.store.latest_sequence(session_id).await?.saturating_add(1);
        let record = EventRecord::new(session_id.clone(), sequence, event);
        self.store.append(&record).await?;
        self.stream.publish(record.clone());
        debug!(sequence, "event published to stream");
        Ok(record)
    }

    pub async fn read_from(
        &self,
        session_id: &SessionId,
        from_sequence: u64,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        self.store.read_from(session_id, from_sequence, limit).await
    }

    pub async fn latest_sequence(&self, session_id: &SessionId) -> Result<u64> {
        self.store.latest_sequence(session_id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.stream.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<EventRecord> {
        self.stream.subscribe_stream()
    }
}
