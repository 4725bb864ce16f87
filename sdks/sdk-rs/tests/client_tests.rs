use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eventstore_bin::{EventStoreServer, Service};
use eventstore_client::EventStoreClient;
use tokio::task::JoinHandle;
use tonic::transport::Server;
use tower_http::trace::TraceLayer;

async fn spawn_server() -> (String, JoinHandle<anyhow::Result<()>>) {
    let port = portpicker::pick_unused_port().expect("no free port");
    let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let adapter = eventstore_backend_memory::InMemoryStore::new();
    let svc = Service::with_block_ms(adapter, 50);

    let handle = tokio::spawn(async move {
        Server::builder()
            .layer(TraceLayer::new_for_grpc())
            .add_service(EventStoreServer::new(svc))
            .serve(addr)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    });

    // Give the listener a moment to bind before the first connect attempt.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("127.0.0.1:{port}"), handle)
}

#[tokio::test]
async fn publish_and_get_round_trip_through_the_client() {
    let (addr, _jh) = spawn_server().await;
    let client = EventStoreClient::connect(&addr).await.unwrap();

    client
        .publish("orders", "created", b"payload".to_vec())
        .await
        .unwrap();

    let history = client.get("orders").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_action, "created");
    assert_eq!(history[0].event_data, b"payload");
}

#[tokio::test]
async fn multiple_handlers_on_one_topic_all_receive_the_notification() {
    let (addr, _jh) = spawn_server().await;
    let client = Arc::new(EventStoreClient::connect(&addr).await.unwrap());

    let count_a = Arc::new(AtomicUsize::new(0));
    let count_b = Arc::new(AtomicUsize::new(0));

    let ca = count_a.clone();
    let handler_a: eventstore_client::Handler = Arc::new(move |_n| {
        ca.fetch_add(1, Ordering::SeqCst);
    });
    let cb = count_b.clone();
    let handler_b: eventstore_client::Handler = Arc::new(move |_n| {
        cb.fetch_add(1, Ordering::SeqCst);
    });

    client.subscribe("orders", handler_a, None).await.unwrap();
    client.subscribe("orders", handler_b, None).await.unwrap();

    client
        .publish("orders", "created", b"one".to_vec())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(count_a.load(Ordering::SeqCst), 1);
    assert_eq!(count_b.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsubscribing_the_last_handler_tears_down_the_upstream_subscription() {
    let (addr, _jh) = spawn_server().await;
    let client = EventStoreClient::connect(&addr).await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let handler: eventstore_client::Handler = Arc::new(move |_n| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    client
        .subscribe("orders", handler.clone(), None)
        .await
        .unwrap();
    assert!(client.unsubscribe("orders", &handler).await.unwrap());

    client
        .publish("orders", "created", b"after-unsub".to_vec())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unsubscribing_a_topic_with_no_subscription_returns_false() {
    let (addr, _jh) = spawn_server().await;
    let client = EventStoreClient::connect(&addr).await.unwrap();

    let handler: eventstore_client::Handler = Arc::new(|_n| {});
    assert!(!client.unsubscribe("never-subscribed", &handler).await.unwrap());
}

#[tokio::test]
async fn handler_panic_does_not_stop_other_handlers_on_the_same_topic() {
    let (addr, _jh) = spawn_server().await;
    let client = Arc::new(EventStoreClient::connect(&addr).await.unwrap());

    let survived = Arc::new(AtomicUsize::new(0));
    let panicking: eventstore_client::Handler = Arc::new(|_n| panic!("boom"));
    let s = survived.clone();
    let sound: eventstore_client::Handler = Arc::new(move |_n| {
        s.fetch_add(1, Ordering::SeqCst);
    });

    client.subscribe("orders", panicking, None).await.unwrap();
    client.subscribe("orders", sound, None).await.unwrap();

    client
        .publish("orders", "created", b"x".to_vec())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(survived.load(Ordering::SeqCst), 1);
}
