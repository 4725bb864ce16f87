use std::sync::Arc;

use eventstore_client::EventStoreClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let addr = std::env::var("EVENTSTORE_ADDR").unwrap_or_else(|_| "localhost:50051".to_string());
    let client = Arc::new(EventStoreClient::connect(&addr).await?);

    let topic = "orders".to_string();

    let handler: eventstore_client::Handler = Arc::new(|n| {
        println!(
            "[{}] action={} bytes={}",
            n.event_id,
            n.event_action,
            n.event_data.len()
        );
    });

    client.subscribe(&topic, handler, None).await?;

    client
        .publish(&topic, "order_created", b"hello".to_vec())
        .await?;

    let history = client.get(&topic).await?;
    println!("history count: {}", history.len());

    Ok(())
}
