//! Client fan-out (spec §4.F): a thin gRPC client plus per-topic handler
//! dispatch, so a process can register many local handlers against one
//! shared upstream `subscribe` stream per topic instead of opening a
//! connection per handler.
//!
//! Grounded on the teacher's own `sdks/sdk-rs` (unary + streaming call
//! wrappers around a generated `EventStoreClient<Channel>`) generalized
//! with the dispatch loop of `examples/original_source/event_store_client.py`'s
//! `Subscriber(threading.Thread)` class, translated to one `tokio::task` per
//! topic and a mutex-guarded handler list instead of a plain, thread-unsafe
//! list.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result};
use eventstore_proto::gen::event_store_client::EventStoreClient as GrpcClient;
use eventstore_proto::gen::{
    GetActionRequest, GetRequest, Notification, PublishRequest, SubscribeRequest,
    UnsubscribeRequest,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tonic::transport::Channel;
use tracing::error;

/// A subscription handler. Invoked once per delivered [`Notification`] on
/// whichever task runs this topic's dispatch loop, never concurrently with
/// itself.
pub type Handler = Arc<dyn Fn(Notification) + Send + Sync + 'static>;

/// One decoded entry from `get`/`get_action`, mirroring the JSON envelope
/// `eventstore-bin` encodes on the wire (`entry_id`, `event_id`,
/// `event_action`, `event_data` base64).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub entry_id: String,
    pub event_id: String,
    pub event_action: String,
    pub event_data: Vec<u8>,
}

fn decode_events(json: &str) -> Result<Vec<StoredEvent>> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(json).context("malformed get response JSON")?;
    raw.into_iter()
        .map(|v| {
            let data_b64 = v["event_data"].as_str().unwrap_or_default();
            let event_data = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data_b64)
                .unwrap_or_default();
            Ok(StoredEvent {
                entry_id: v["entry_id"].as_str().unwrap_or_default().to_string(),
                event_id: v["event_id"].as_str().unwrap_or_default().to_string(),
                event_action: v["event_action"].as_str().unwrap_or_default().to_string(),
                event_data,
            })
        })
        .collect()
}

struct UpstreamSubscription {
    handlers: Arc<Mutex<Vec<Handler>>>,
    task: JoinHandle<()>,
}

/// One shared gRPC channel, plus at most one live upstream `subscribe` call
/// per topic fanned out to every handler registered on it.
pub struct EventStoreClient {
    grpc: GrpcClient<Channel>,
    subs: Mutex<std::collections::HashMap<String, UpstreamSubscription>>,
}

impl EventStoreClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let grpc = GrpcClient::connect(format!("http://{addr}")).await?;
        Ok(Self {
            grpc,
            subs: Mutex::new(std::collections::HashMap::new()),
        })
    }

    pub async fn publish(&self, topic: &str, action: &str, data: Vec<u8>) -> Result<String> {
        let mut grpc = self.grpc.clone();
        let resp = grpc
            .publish(PublishRequest {
                topic: topic.to_string(),
                action: action.to_string(),
                data,
            })
            .await?
            .into_inner();
        Ok(resp.entry_id)
    }

    pub async fn get(&self, topic: &str) -> Result<Vec<StoredEvent>> {
        let mut grpc = self.grpc.clone();
        let resp = grpc
            .get(GetRequest {
                topic: topic.to_string(),
            })
            .await?
            .into_inner();
        decode_events(&resp.events)
    }

    pub async fn get_action(&self, topic: &str, action: &str) -> Result<Vec<StoredEvent>> {
        let mut grpc = self.grpc.clone();
        let resp = grpc
            .get_action(GetActionRequest {
                topic: topic.to_string(),
                action: action.to_string(),
            })
            .await?
            .into_inner();
        decode_events(&resp.events)
    }

    /// Registers `handler` against `topic`. The first handler on a topic
    /// opens the upstream `subscribe` call and spawns its dispatch loop;
    /// later handlers on the same topic just join the existing one's
    /// fan-out list (spec §4.F: one upstream subscription per topic, not
    /// per handler).
    pub async fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        group: Option<String>,
    ) -> Result<()> {
        let mut subs = self.subs.lock().await;
        if let Some(existing) = subs.get(topic) {
            existing.handlers.lock().await.push(handler);
            return Ok(());
        }

        let mut grpc = self.grpc.clone();
        let mut stream = grpc
            .subscribe(SubscribeRequest {
                topic: topic.to_string(),
                group,
            })
            .await?
            .into_inner();

        let handlers = Arc::new(Mutex::new(vec![handler]));
        let handlers_bg = handlers.clone();
        let topic_owned = topic.to_string();

        let task = tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(notification)) => {
                        let snapshot: Vec<Handler> = handlers_bg.lock().await.clone();
                        for h in snapshot {
                            let notification = notification.clone();
                            if std::panic::catch_unwind(AssertUnwindSafe(|| h(notification))).is_err()
                            {
                                error!(topic = %topic_owned, "subscription handler panicked");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(status) => {
                        error!(topic = %topic_owned, error = %status, "subscription stream error");
                        break;
                    }
                }
            }
        });

        subs.insert(
            topic.to_string(),
            UpstreamSubscription { handlers, task },
        );
        Ok(())
    }

    /// Removes `handler` from `topic`'s fan-out list by identity. When the
    /// list becomes empty the upstream subscription is torn down: the
    /// dispatch task is aborted and the server is told `unsubscribe` so it
    /// stops blocking on this peer's behalf.
    ///
    /// Returns `false` if there was no upstream subscription for `topic` to
    /// begin with, `true` otherwise.
    pub async fn unsubscribe(&self, topic: &str, handler: &Handler) -> Result<bool> {
        let mut subs = self.subs.lock().await;
        let now_empty = match subs.get(topic) {
            Some(sub) => {
                let mut hs = sub.handlers.lock().await;
                hs.retain(|h| !Arc::ptr_eq(h, handler));
                hs.is_empty()
            }
            None => return Ok(false),
        };

        if now_empty {
            if let Some(sub) = subs.remove(topic) {
                sub.task.abort();
            }
            let mut grpc = self.grpc.clone();
            grpc.unsubscribe(UnsubscribeRequest {
                topic: topic.to_string(),
            })
            .await?;
        }
        Ok(true)
    }
}
