//! Echo server and client on the in-process bus.
//!
//! Run with `RUST_LOG=mom_transport=debug cargo run --example echo_memory`.

use std::sync::Arc;

use mom_transport::{DialOptions, ListenOptions, Message, Result, SocketPtr, TransportBuilder};
use tracing_subscriber::EnvFilter;

async fn echo(sock: SocketPtr) -> Result<()> {
    // ---
    loop {
        let msg = sock.recv().await?;
        if msg.is_close_marker() {
            println!("[server] {} hung up", sock.remote_addr());
            return sock.close().await;
        }
        println!(
            "[server] {} says {:?}",
            sock.remote_addr(),
            String::from_utf8_lossy(&msg.body)
        );
        sock.send(&msg).await?;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let transport = TransportBuilder::new().build()?;

    let listener = transport.listen("demo.echo", ListenOptions::default()).await?;
    let server = {
        let listener = listener.clone();
        tokio::spawn(async move { listener.accept(Arc::new(echo)).await })
    };

    for name in ["alice", "bob"] {
        let client = transport.dial("demo.echo", DialOptions::default()).await?;
        for word in ["hello", "world"] {
            let msg = Message::from_body(format!("{word} from {name}")).with_header("from", name);
            client.send(&msg).await?;
            let reply = client.recv().await?;
            println!(
                "[{name}] echoed {:?}",
                String::from_utf8_lossy(&reply.body)
            );
        }
        client.close().await?;
    }

    listener.close().await?;
    match server.await {
        Ok(result) => result,
        Err(err) => panic!("accept task failed: {err}"),
    }
}
