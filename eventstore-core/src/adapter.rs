//! The stream store adapter trait (spec §4.A): a narrow, backend-agnostic
//! facade over any ordered, append-only, keyed-stream store. Modeled on the
//! teacher's `EventStore` trait (`eventstore-core::trait_event_store`) —
//! `async_trait`, `Send + Sync + 'static`, one `Result<_, StoreError>` per
//! call.

use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::{EntryId, StoredFields};
use crate::errors::StoreError;

/// Sentinel meaning "strictly after the highest ID present at call time".
pub const LATEST: Option<EntryId> = None;

/// One entry as read back from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub entry_id: EntryId,
    pub fields: StoredFields,
}

#[async_trait]
pub trait StreamStoreAdapter: Send + Sync + 'static {
    /// Appends one entry. `id_hint`, when given, is passed to the backend;
    /// if the backend refuses it (not strictly greater than the current
    /// maximum), the adapter retries with auto-assignment. Returns the
    /// assigned ID, which may differ from the hint.
    async fn append(
        &self,
        topic: &str,
        fields: StoredFields,
        id_hint: Option<EntryId>,
    ) -> Result<EntryId, StoreError>;

    /// Full-history read, oldest first. Empty list if the topic has never
    /// been appended to.
    async fn range(&self, topic: &str) -> Result<Vec<StoredEntry>, StoreError>;

    /// Blocking read for entries with ID strictly greater than `after_id`.
    /// `after_id = None` means [`LATEST`]. Returns an empty list on
    /// timeout — this is not an error.
    async fn tail(
        &self,
        topic: &str,
        after_id: Option<EntryId>,
        block_ms: u64,
    ) -> Result<Vec<StoredEntry>, StoreError>;

    /// Idempotent consumer-group creation.
    async fn group_ensure(&self, topic: &str, group: &str) -> Result<(), StoreError>;

    /// Delivers entries not yet delivered to any consumer in `group`.
    /// `no_ack = true` auto-acknowledges on delivery (spec §4.C's
    /// `group_follow` policy); `no_ack = false` leaves entries pending
    /// until [`StreamStoreAdapter::group_ack`].
    async fn group_read(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
        no_ack: bool,
    ) -> Result<Vec<StoredEntry>, StoreError>;

    /// Marks `ids` acknowledged for `group`.
    async fn group_ack(&self, topic: &str, group: &str, ids: &[EntryId]) -> Result<(), StoreError>;
}

/// Delegating newtype that lets a runtime-chosen `Arc<dyn
/// StreamStoreAdapter>` (e.g. spec §6's `BACKEND=memory|redis` switch) stand
/// in wherever a concrete, `Sized` adapter type parameter is expected —
/// `TopicEngine<A>` and `SubscriptionMultiplexer<A>` are generic over `A:
/// StreamStoreAdapter` (not `?Sized`) so unit tests can name a concrete
/// backend directly, while `eventstore-bin` picks its backend at startup.
#[derive(Clone)]
pub struct DynAdapter(pub Arc<dyn StreamStoreAdapter>);

#[async_trait]
impl StreamStoreAdapter for DynAdapter {
    async fn append(
        &self,
        topic: &str,
        fields: StoredFields,
        id_hint: Option<EntryId>,
    ) -> Result<EntryId, StoreError> {
        self.0.append(topic, fields, id_hint).await
    }

    async fn range(&self, topic: &str) -> Result<Vec<StoredEntry>, StoreError> {
        self.0.range(topic).await
    }

    async fn tail(
        &self,
        topic: &str,
        after_id: Option<EntryId>,
        block_ms: u64,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        self.0.tail(topic, after_id, block_ms).await
    }

    async fn group_ensure(&self, topic: &str, group: &str) -> Result<(), StoreError> {
        self.0.group_ensure(topic, group).await
    }

    async fn group_read(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
        no_ack: bool,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        self.0
            .group_read(topic, group, consumer, block_ms, no_ack)
            .await
    }

    async fn group_ack(&self, topic: &str, group: &str, ids: &[EntryId]) -> Result<(), StoreError> {
        self.0.group_ack(topic, group, ids).await
    }
}
