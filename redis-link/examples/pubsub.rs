//! Subscribe to a channel and print deliveries from the message bus
//!
//! Run against a local server:
//!
//! ```text
//! cargo run --example pubsub
//! redis-cli publish news "hello"
//! ```

use redis_link::{Client, ConnectionConfig, LocalBus};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("redis_link=info")),
        )
        .init();

    let bus = Arc::new(LocalBus::new());
    let config = ConnectionConfig::new("redis://127.0.0.1:6379").with_address("demo");
    let client = Client::new(config, bus.clone())?;

    let mut news = bus.listen("demo.news");
    let mut all = bus.listen("demo.news.*");

    client.subscribe(&["news"]).await?;
    client.psubscribe(&["news.*"]).await?;
    let reached = client.publish("news", "first").await?;
    println!("Publishing to 'news' reached {} subscriber(s)", reached);

    for _ in 0..3 {
        tokio::select! {
            Some(message) = news.recv() => {
                println!("news: {}", serde_json::to_string(&message)?);
            }
            Some(message) = all.recv() => {
                println!("pattern: {}", serde_json::to_string(&message)?);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.close().await;
    Ok(())
}
