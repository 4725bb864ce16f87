pub mod adapter;
pub mod codec;
pub mod errors;
pub mod multiplexer;
pub mod topic_engine;
pub mod types;

pub use adapter::{DynAdapter, StoredEntry, StreamStoreAdapter, LATEST};
pub use codec::{EntryId, StoredFields};
pub use errors::StoreError;
pub use multiplexer::{Notification, SubscriptionMultiplexer, DEFAULT_BLOCK_MS};
pub use topic_engine::TopicEngine;
pub use types::{proto, StoreStream};
