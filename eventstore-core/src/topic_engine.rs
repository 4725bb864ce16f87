//! Topic engine (spec §4.C): per-topic publish/read operations built on the
//! stream store adapter. Generalizes the teacher's `EventStore` trait impls
//! (`append`/`read_stream`/`subscribe`) to topic/action semantics instead of
//! aggregate/expected-version semantics.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::adapter::{StoredEntry, StreamStoreAdapter};
use crate::codec::{EntryId, StoredFields};
use crate::errors::StoreError;

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

pub struct TopicEngine<A: StreamStoreAdapter> {
    adapter: Arc<A>,
}

impl<A: StreamStoreAdapter> Clone for TopicEngine<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
        }
    }
}

impl<A: StreamStoreAdapter> TopicEngine<A> {
    pub fn new(adapter: Arc<A>) -> Self {
        Self { adapter }
    }

    /// Generates an opaque `event_id`, times the append with the current
    /// wall clock, and appends. Returns only once the entry is durably
    /// visible to subsequent reads (spec §4.C).
    ///
    /// The wall-clock hint is what makes entry IDs timestamp-based on both
    /// backends: without it `XADD key *` would assign Redis's own
    /// millisecond auto-ID, a narrower format than the microsecond IDs the
    /// in-memory backend assigns.
    pub async fn publish(
        &self,
        topic: &str,
        action: &str,
        data: Vec<u8>,
    ) -> Result<EntryId, StoreError> {
        if topic.is_empty() {
            return Err(StoreError::Invalid("topic must not be empty".into()));
        }
        let fields = StoredFields {
            event_id: Uuid::new_v4().to_string(),
            event_action: action.to_string(),
            event_data: data,
        };
        let id_hint = EntryId::new(now_micros(), 0);
        self.adapter.append(topic, fields, Some(id_hint)).await
    }

    /// Full-history read, optionally filtered by action, preserving order.
    /// Empty topic -> empty list, never an error.
    pub async fn get(
        &self,
        topic: &str,
        action_filter: Option<&str>,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        let entries = self.adapter.range(topic).await?;
        Ok(match action_filter {
            Some(action) => entries
                .into_iter()
                .filter(|e| e.fields.event_action == action)
                .collect(),
            None => entries,
        })
    }

    /// Wraps `tail`. The new cursor is the last delivered entry's ID, or
    /// the input cursor if the batch was empty.
    pub async fn follow(
        &self,
        topic: &str,
        cursor: Option<EntryId>,
        block_ms: u64,
    ) -> Result<(Vec<StoredEntry>, Option<EntryId>), StoreError> {
        let entries = self.adapter.tail(topic, cursor, block_ms).await?;
        let new_cursor = entries.last().map(|e| e.entry_id).or(cursor);
        Ok((entries, new_cursor))
    }

    /// Wraps `group_ensure` then `group_read` with `no_ack = true`: the
    /// server does not track acks in this spec, groups are delivery-only
    /// (spec §4.C, §9).
    pub async fn group_follow(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        self.adapter.group_ensure(topic, group).await?;
        self.adapter
            .group_read(topic, group, consumer, block_ms, true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstore_backend_memory::InMemoryStore;

    #[tokio::test]
    async fn publish_then_get_returns_entries_in_order() {
        let engine = TopicEngine::new(InMemoryStore::new());

        engine.publish("t", "a", b"1".to_vec()).await.unwrap();
        engine.publish("t", "b", b"2".to_vec()).await.unwrap();
        engine.publish("t", "a", b"3".to_vec()).await.unwrap();

        let all = engine.get("t", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].entry_id < w[1].entry_id));

        let filtered = engine.get("t", Some("a")).await.unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].fields.event_data, b"1");
        assert_eq!(filtered[1].fields.event_data, b"3");
    }

    #[tokio::test]
    async fn get_on_empty_topic_is_empty_not_error() {
        let engine = TopicEngine::new(InMemoryStore::new());
        let all = engine.get("nope", None).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn get_filtered_by_unused_action_is_empty() {
        let engine = TopicEngine::new(InMemoryStore::new());
        engine.publish("t", "a", b"1".to_vec()).await.unwrap();
        let filtered = engine.get("t", Some("c")).await.unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn follow_advances_cursor_and_is_empty_on_timeout() {
        let engine = TopicEngine::new(InMemoryStore::new());
        let id = engine.publish("t", "a", b"1".to_vec()).await.unwrap();

        let (entries, cursor) = engine.follow("t", None, 50).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(cursor, Some(id));

        let (entries2, cursor2) = engine.follow("t", cursor, 50).await.unwrap();
        assert!(entries2.is_empty());
        assert_eq!(cursor2, cursor);
    }

    #[tokio::test]
    async fn publish_rejects_empty_topic() {
        let engine = TopicEngine::new(InMemoryStore::new());
        let err = engine.publish("", "a", vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }
}
