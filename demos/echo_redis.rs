//! Echo server and client over a Redis pub/sub bus.
//!
//! Needs a reachable Redis server:
//!
//! ```text
//! REDIS_URL=redis://localhost:6379 cargo run --example echo_redis --features bus_redis
//! ```

use std::sync::Arc;
use std::time::Duration;

use mom_transport::{DialOptions, ListenOptions, Message, Result, SocketPtr, TransportBuilder};
use tracing_subscriber::EnvFilter;

async fn echo(sock: SocketPtr) -> Result<()> {
    // ---
    loop {
        let msg = sock.recv().await?;
        if msg.is_close_marker() {
            return sock.close().await;
        }
        sock.send(&msg).await?;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "localhost:6379".to_owned());

    let transport = TransportBuilder::new()
        .bus_type("redis")
        .addr(url)
        .poll_interval(Duration::from_secs(1))
        .build()?;

    // bind a generated inbox so concurrent runs never collide
    let listener = transport.listen("", ListenOptions::default()).await?;
    println!("listening on {}", listener.addr());

    let server = {
        let listener = listener.clone();
        tokio::spawn(async move { listener.accept(Arc::new(echo)).await })
    };

    let client = transport
        .dial(listener.addr().as_str(), DialOptions::default())
        .await?;

    client.send(&Message::from_body("ping").with_header("seq", "1")).await?;
    let reply = client.recv().await?;
    println!(
        "reply {:?} seq={:?}",
        String::from_utf8_lossy(&reply.body),
        reply.header("seq")
    );

    client.close().await?;
    listener.close().await?;
    match server.await {
        Ok(result) => result,
        Err(err) => panic!("accept task failed: {err}"),
    }
}
