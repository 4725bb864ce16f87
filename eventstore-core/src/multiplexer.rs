//! Subscription multiplexer (spec §4.D): the server-side state machine that
//! turns one `subscribe` call into a long-lived push stream, blocking for
//! new entries on the topic engine and terminating cleanly on unsubscribe,
//! peer disconnect, or shutdown.
//!
//! Grounded on the cancellation-flag shape of
//! `examples/original_source/event_store_server.py`
//! (`self.subscribers[(topic, peer)] = True/False`) and on the
//! blocking-read-as-suspension-point idiom of `eventually-redis`'s
//! `async_stream::try_stream!` loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::adapter::StreamStoreAdapter;
use crate::codec::EntryId;
use crate::errors::StoreError;
use crate::topic_engine::TopicEngine;
use crate::types::StoreStream;

/// Recommended tuning knob between shutdown latency and idle CPU (spec
/// §4.D). Callers may use a shorter value in tests.
pub const DEFAULT_BLOCK_MS: u64 = 1_000;

/// A notification pushed to a subscriber: the core-level equivalent of the
/// wire `Notification` message, kept free of any `tonic`/`prost` type so
/// marshalling stays confined to the RPC surface (spec §4.E).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event_id: String,
    pub entry_id: EntryId,
    pub event_action: String,
    pub event_data: Vec<u8>,
}

type SubKey = (String, String);

pub struct SubscriptionMultiplexer<A: StreamStoreAdapter> {
    engine: TopicEngine<A>,
    subs: DashMap<SubKey, Arc<AtomicBool>>,
    block_ms: u64,
}

/// Removes a subscription's map entry when the follow loop's generator is
/// dropped, whichever of the three exits in spec §4.D triggered it: the
/// flag flipping false and being observed, the peer disconnecting (the
/// tonic transport drops the stream, which drops this guard without ever
/// observing the flag again), or server shutdown.
struct SubGuard<'a> {
    subs: &'a DashMap<SubKey, Arc<AtomicBool>>,
    key: SubKey,
    flag: Arc<AtomicBool>,
}

impl<'a> Drop for SubGuard<'a> {
    fn drop(&mut self) {
        if let Some(entry) = self.subs.get(&self.key) {
            if Arc::ptr_eq(&entry, &self.flag) {
                drop(entry);
                self.subs.remove(&self.key);
            }
        }
    }
}

impl<A: StreamStoreAdapter> SubscriptionMultiplexer<A> {
    pub fn new(engine: TopicEngine<A>) -> Self {
        Self::with_block_ms(engine, DEFAULT_BLOCK_MS)
    }

    pub fn with_block_ms(engine: TopicEngine<A>, block_ms: u64) -> Self {
        Self {
            engine,
            subs: DashMap::new(),
            block_ms,
        }
    }

    /// Opens a subscription for `(topic, peer)`, optionally joining `group`.
    /// Rejects a duplicate live subscription with `AlreadySubscribed`
    /// (spec §4.D step 1).
    pub fn subscribe(
        self: &Arc<Self>,
        topic: String,
        peer: String,
        group: Option<String>,
    ) -> Result<StoreStream<Notification>, StoreError> {
        if topic.is_empty() {
            return Err(StoreError::Invalid("topic must not be empty".into()));
        }
        let key: SubKey = (topic.clone(), peer.clone());

        let flag = match self.subs.entry(key.clone()) {
            Entry::Occupied(e) => {
                if e.get().load(Ordering::SeqCst) {
                    return Err(StoreError::AlreadySubscribed(format!(
                        "{topic}:{peer} is already subscribed"
                    )));
                }
                e.get().store(true, Ordering::SeqCst);
                e.get().clone()
            }
            Entry::Vacant(v) => {
                let flag = Arc::new(AtomicBool::new(true));
                v.insert(flag.clone());
                flag
            }
        };

        let this = self.clone();
        let stream = async_stream::try_stream! {
            let _guard = SubGuard {
                subs: &this.subs,
                key: key.clone(),
                flag: flag.clone(),
            };

            // Subscriptions see only entries appended at-or-after this
            // point; prior history is obtained via `get` (spec §4.D step 3).
            let mut cursor: Option<EntryId> = None;
            let consumer = peer.clone();

            while flag.load(Ordering::SeqCst) {
                let batch = match &group {
                    Some(group) => this
                        .engine
                        .group_follow(&topic, group, &consumer, this.block_ms)
                        .await?,
                    None => {
                        let (entries, new_cursor) =
                            this.engine.follow(&topic, cursor, this.block_ms).await?;
                        cursor = new_cursor;
                        entries
                    }
                };

                for entry in batch {
                    yield Notification {
                        event_id: entry.fields.event_id,
                        entry_id: entry.entry_id,
                        event_action: entry.fields.event_action,
                        event_data: entry.fields.event_data,
                    };
                }
                // An empty batch just loops: this is how the server notices
                // unsubscribe/cancel (spec §4.D step 4).
            }
        };

        Ok(Box::pin(stream))
    }

    /// Flips the live flag off. Does not wait for the follow loop to
    /// notice — the next block timeout will (spec §4.D `unsubscribe`).
    /// Idempotent: returns `true` even if `(topic, peer)` is absent.
    pub fn unsubscribe(&self, topic: &str, peer: &str) -> bool {
        if let Some(flag) = self.subs.get(&(topic.to_string(), peer.to_string())) {
            flag.store(false, Ordering::SeqCst);
        }
        true
    }

    /// Number of currently-live subscriptions. Exposed for tests and
    /// operational introspection only.
    pub fn active_count(&self) -> usize {
        self.subs
            .iter()
            .filter(|e| e.value().load(Ordering::SeqCst))
            .count()
    }
}
