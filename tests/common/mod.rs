#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mom_transport::{
    // ---
    HandlerPtr,
    MemoryHub,
    Result,
    SocketPtr,
    TransportBuilder,
    TransportPtr,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// Transport on its own hub, with short timeouts suited to tests.
pub fn memory_transport(hub: Arc<MemoryHub>) -> TransportPtr {
    // ---
    TransportBuilder::new()
        .memory_hub(hub)
        .recv_timeout(Duration::from_secs(2))
        .poll_interval(Duration::from_millis(200))
        .build()
        .expect("failed to build memory transport")
}

/// Echo every message back until the peer sends its close marker.
pub async fn echo(sock: SocketPtr) -> Result<()> {
    // ---
    loop {
        let msg = sock.recv().await?;
        if msg.is_close_marker() {
            return sock.close().await;
        }
        sock.send(&msg).await?;
    }
}

pub fn echo_handler() -> HandlerPtr {
    Arc::new(echo)
}

/// Run `accept` on its own task.
pub fn spawn_accept(
    listener: mom_transport::ListenerPtr,
    handler: HandlerPtr,
) -> tokio::task::JoinHandle<Result<()>> {
    // ---
    tokio::spawn(async move { listener.accept(handler).await })
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;
    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
