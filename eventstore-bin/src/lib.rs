use std::pin::Pin;
use std::sync::Arc;

use eventstore_core::{DynAdapter, EntryId, StoreError, StoredEntry, StreamStoreAdapter};
use eventstore_core::{SubscriptionMultiplexer, TopicEngine, DEFAULT_BLOCK_MS};
use eventstore_proto::gen::event_store_server::EventStore;
use eventstore_proto::gen::{
    self as proto, GetActionRequest, GetRequest, GetResponse, Notification, PublishRequest,
    PublishResponse, SubscribeRequest, UnsubscribeRequest, UnsubscribeResponse,
};
use serde::Serialize;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};
use tracing::{info, instrument, warn};

pub use eventstore_proto::gen::event_store_server::EventStoreServer;

/// Server-side configuration, read from the environment variables named in
/// spec §6.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_port: u16,
    pub redis_host: String,
    pub redis_port: u16,
    pub max_workers: usize,
    pub backend: String,
}

impl Config {
    pub fn from_env() -> Self {
        fn var_or<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        Self {
            listen_port: var_or("EVENT_STORE_LISTEN_PORT", 50051),
            redis_host: std::env::var("EVENT_STORE_REDIS_HOST")
                .unwrap_or_else(|_| "localhost".to_string()),
            redis_port: var_or("EVENT_STORE_REDIS_PORT", 6379),
            max_workers: var_or("EVENT_STORE_MAX_WORKERS", 10),
            backend: std::env::var("BACKEND").unwrap_or_else(|_| "memory".to_string()),
        }
    }
}

/// Resolves the configured storage backend into the adapter trait object
/// the rest of the service is built on. Mirrors the teacher's
/// `resolve_backend` in shape (`match backend.as_str() { ... }`) with
/// spec §6's two backends in place of memory/postgres.
pub async fn resolve_backend(cfg: &Config) -> anyhow::Result<Arc<dyn StreamStoreAdapter>> {
    match cfg.backend.as_str() {
        "memory" => Ok(eventstore_backend_memory::InMemoryStore::new()),
        "redis" => {
            let store =
                eventstore_backend_redis::RedisStore::connect(&cfg.redis_host, cfg.redis_port)
                    .await?;
            Ok(store)
        }
        other => anyhow::bail!("unsupported BACKEND '{}'. Supported: memory, redis", other),
    }
}

#[derive(Serialize)]
struct WireEntry {
    entry_id: String,
    event_id: String,
    event_action: String,
    event_data: String,
}

fn encode_entries(entries: Vec<StoredEntry>) -> String {
    let wire: Vec<WireEntry> = entries
        .into_iter()
        .map(|e| WireEntry {
            entry_id: e.entry_id.to_string(),
            event_id: e.fields.event_id,
            event_action: e.fields.event_action,
            event_data: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                e.fields.event_data,
            ),
        })
        .collect();
    serde_json::to_string(&wire).unwrap_or_else(|_| "[]".to_string())
}

fn peer_identity<T>(request: &Request<T>) -> String {
    request
        .remote_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub struct Service {
    pub engine: TopicEngine<DynAdapter>,
    pub mux: Arc<SubscriptionMultiplexer<DynAdapter>>,
}

impl Service {
    pub fn new(adapter: Arc<dyn StreamStoreAdapter>) -> Self {
        Self::with_block_ms(adapter, DEFAULT_BLOCK_MS)
    }

    pub fn with_block_ms(adapter: Arc<dyn StreamStoreAdapter>, block_ms: u64) -> Self {
        let engine = TopicEngine::new(Arc::new(DynAdapter(adapter)));
        let mux = Arc::new(SubscriptionMultiplexer::with_block_ms(
            engine.clone(),
            block_ms,
        ));
        Self { engine, mux }
    }
}

#[tonic::async_trait]
impl EventStore for Service {
    #[instrument(name = "rpc.publish", skip(self, request), fields(topic = %request.get_ref().topic))]
    async fn publish(
        &self,
        request: Request<PublishRequest>,
    ) -> Result<Response<PublishResponse>, Status> {
        let req = request.into_inner();
        match self.engine.publish(&req.topic, &req.action, req.data).await {
            Ok(entry_id) => {
                info!(%entry_id, "publish ok");
                Ok(Response::new(PublishResponse {
                    entry_id: entry_id.to_string(),
                }))
            }
            Err(e) => {
                warn!(error = %e, "publish failed");
                Err(e.to_status())
            }
        }
    }

    type SubscribeStream =
        Pin<Box<dyn Stream<Item = Result<Notification, Status>> + Send + 'static>>;

    #[instrument(name = "rpc.subscribe", skip(self, request), fields(
        topic = %request.get_ref().topic,
        group = request.get_ref().group.as_deref().unwrap_or(""),
    ))]
    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let peer = peer_identity(&request);
        let req = request.into_inner();

        let stream = self
            .mux
            .subscribe(req.topic, peer, req.group)
            .map_err(|e| e.to_status())?;

        let mapped = stream.map(|res| {
            res.map(|n| proto::Notification {
                event_id: n.event_id,
                event_ts: n.entry_id.as_notification_ts(),
                event_action: n.event_action,
                event_data: n.event_data,
            })
            .map_err(|e: StoreError| e.to_status())
        });

        Ok(Response::new(Box::pin(mapped)))
    }

    #[instrument(name = "rpc.unsubscribe", skip(self, request), fields(topic = %request.get_ref().topic))]
    async fn unsubscribe(
        &self,
        request: Request<UnsubscribeRequest>,
    ) -> Result<Response<UnsubscribeResponse>, Status> {
        let peer = peer_identity(&request);
        let req = request.into_inner();
        let success = self.mux.unsubscribe(&req.topic, &peer);
        Ok(Response::new(UnsubscribeResponse { success }))
    }

    #[instrument(name = "rpc.get", skip(self, request), fields(topic = %request.get_ref().topic))]
    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let req = request.into_inner();
        let entries = self
            .engine
            .get(&req.topic, None)
            .await
            .map_err(|e| e.to_status())?;
        info!(count = entries.len(), "get ok");
        Ok(Response::new(GetResponse {
            events: encode_entries(entries),
        }))
    }

    #[instrument(name = "rpc.get_action", skip(self, request), fields(
        topic = %request.get_ref().topic,
        action = %request.get_ref().action,
    ))]
    async fn get_action(
        &self,
        request: Request<GetActionRequest>,
    ) -> Result<Response<GetResponse>, Status> {
        let req = request.into_inner();
        let entries = self
            .engine
            .get(&req.topic, Some(&req.action))
            .await
            .map_err(|e| e.to_status())?;
        info!(count = entries.len(), "get_action ok");
        Ok(Response::new(GetResponse {
            events: encode_entries(entries),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn resolve_backend_defaults_to_memory() {
        let prev = std::env::var("BACKEND").ok();
        std::env::remove_var("BACKEND");

        let cfg = Config::from_env();
        assert_eq!(cfg.backend, "memory");
        let store = resolve_backend(&cfg)
            .await
            .expect("memory backend should be supported");
        assert!(Arc::strong_count(&store) >= 1);

        match prev {
            Some(v) => std::env::set_var("BACKEND", v),
            None => std::env::remove_var("BACKEND"),
        }
    }

    #[tokio::test]
    #[serial]
    async fn resolve_backend_unsupported_errors() {
        let prev = std::env::var("BACKEND").ok();
        std::env::set_var("BACKEND", "nope");

        let cfg = Config::from_env();
        let res = resolve_backend(&cfg).await;
        assert!(res.is_err(), "unsupported backend should error");
        let msg = format!("{:#}", res.err().unwrap());
        assert!(msg.contains("unsupported BACKEND"));

        match prev {
            Some(v) => std::env::set_var("BACKEND", v),
            None => std::env::remove_var("BACKEND"),
        }
    }

    #[test]
    fn encode_entries_of_empty_topic_is_json_empty_array() {
        assert_eq!(encode_entries(vec![]), "[]");
    }

    #[test]
    fn encode_entries_round_trips_fields() {
        let entries = vec![StoredEntry {
            entry_id: EntryId::new(1, 0),
            fields: eventstore_core::StoredFields {
                event_id: "e1".into(),
                event_action: "a".into(),
                event_data: b"hi".to_vec(),
            },
        }];
        let json = encode_entries(entries);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["event_id"], "e1");
        assert_eq!(value[0]["event_action"], "a");
        assert_eq!(value[0]["entry_id"], "1-0");
    }
}
