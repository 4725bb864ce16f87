//! Redis Streams-backed stream store adapter (spec §4.A, production
//! variant). Talks to Redis via an `aio::ConnectionManager` (auto-reconnect
//! wrapper over a multiplexed connection), the same `redis` crate and
//! multiplexed-connection idiom as `eventually-redis`'s `Builder`
//! (`examples/get-eventually-eventually-rs/eventually-redis/src/lib.rs`),
//! with the actual `XADD`/`XRANGE`/`XREAD`/`XGROUP`/`XREADGROUP`/`XACK`
//! command shapes lifted from `examples/original_source/event_store_core.py`.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};

use eventstore_core::adapter::{StoredEntry, StreamStoreAdapter};
use eventstore_core::codec::{EntryId, StoredFields};
use eventstore_core::errors::StoreError;

fn stream_key(topic: &str) -> String {
    format!("events:{topic}")
}

fn map_redis_err(err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::BackendUnavailable(err.to_string())
    } else {
        StoreError::Internal(anyhow::anyhow!(err))
    }
}

fn decode_stream_id(id: StreamId) -> Result<StoredEntry, StoreError> {
    let entry_id: EntryId = id.id.parse()?;
    let mut owned: Vec<(String, String)> = Vec::with_capacity(id.map.len());
    for (field, value) in id.map {
        let as_string: String = redis::from_redis_value(&value).unwrap_or_default();
        owned.push((field, as_string));
    }
    let borrowed = owned.iter().map(|(k, v)| (k.as_str(), v.as_str()));
    Ok(StoredEntry {
        entry_id,
        fields: StoredFields::from_fields(borrowed),
    })
}

fn decode_reply(reply: StreamReadReply) -> Result<Vec<StoredEntry>, StoreError> {
    let mut out = Vec::new();
    for key in reply.keys {
        for id in key.ids {
            out.push(decode_stream_id(id)?);
        }
    }
    Ok(out)
}

fn decode_range(reply: StreamRangeReply) -> Result<Vec<StoredEntry>, StoreError> {
    reply.ids.into_iter().map(decode_stream_id).collect()
}

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(host: &str, port: u16) -> anyhow::Result<Arc<Self>> {
        let url = format!("redis://{host}:{port}/");
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Arc::new(Self { conn }))
    }
}

#[async_trait]
impl StreamStoreAdapter for RedisStore {
    async fn append(
        &self,
        topic: &str,
        fields: StoredFields,
        id_hint: Option<EntryId>,
    ) -> Result<EntryId, StoreError> {
        let key = stream_key(topic);
        let pairs = fields.to_field_pairs();
        let mut conn = self.conn.clone();

        let hinted: Option<redis::RedisResult<String>> = match id_hint {
            Some(hint) => Some(conn.xadd(&key, hint.to_string(), &pairs).await),
            None => None,
        };

        let assigned = match hinted {
            Some(Ok(id)) => id,
            Some(Err(err)) => {
                tracing::warn!(
                    error = %err,
                    topic,
                    "id hint rejected by backend, retrying with auto-assigned id"
                );
                conn.xadd(&key, "*", &pairs).await.map_err(map_redis_err)?
            }
            None => conn.xadd(&key, "*", &pairs).await.map_err(map_redis_err)?,
        };

        assigned.parse()
    }

    async fn range(&self, topic: &str) -> Result<Vec<StoredEntry>, StoreError> {
        let key = stream_key(topic);
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrange(&key, "-", "+").await.map_err(map_redis_err)?;
        decode_range(reply)
    }

    async fn tail(
        &self,
        topic: &str,
        after_id: Option<EntryId>,
        block_ms: u64,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        let key = stream_key(topic);
        let start = after_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "$".to_string());
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default().block(block_ms as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[&key], &[&start], &opts)
            .await
            .map_err(map_redis_err)?;
        decode_reply(reply)
    }

    async fn group_ensure(&self, topic: &str, group: &str) -> Result<(), StoreError> {
        let key = stream_key(topic);
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn.xgroup_create_mkstream(&key, group, "$").await;
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(map_redis_err(err)),
        }
    }

    async fn group_read(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
        no_ack: bool,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        self.group_ensure(topic, group).await?;
        let key = stream_key(topic);
        let mut conn = self.conn.clone();
        let mut opts = StreamReadOptions::default()
            .block(block_ms as usize)
            .group(group, consumer);
        if no_ack {
            opts = opts.noack();
        }
        let reply: StreamReadReply = conn
            .xread_options(&[&key], &[">"], &opts)
            .await
            .map_err(map_redis_err)?;
        decode_reply(reply)
    }

    async fn group_ack(
        &self,
        topic: &str,
        group: &str,
        ids: &[EntryId],
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let key = stream_key(topic);
        let id_strs: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&key, group, &id_strs)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }
}
