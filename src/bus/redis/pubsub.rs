//! Redis pub/sub bus implementation using `redis`.
//!
//! ## Concurrency model
//!
//! - A single background **actor task** owns both Redis connections.
//! - The actor is responsible for:
//!   - publishing outbound envelopes via `publish_conn`,
//!   - registering and dropping channel subscriptions via `pubsub_sink`,
//!   - polling `pubsub_stream` for incoming messages,
//!   - clean shutdown of both connections.
//! - All interaction with the Redis client is serialized through this actor.
//!
//! ## Two connections required
//!
//! A connection in pub/sub mode cannot issue `PUBLISH`, so two connections
//! are maintained:
//!
//! - `publish_conn`: `MultiplexedConnection`, used only for `PUBLISH`
//! - `pubsub_sink` / `pubsub_stream`: split from `aio::PubSub`, used for
//!   `SUBSCRIBE`/`UNSUBSCRIBE` and for receiving messages respectively
//!
//! ## Wire format
//!
//! Redis pub/sub has no reply-address field, so the whole [`Envelope`]
//! (address, reply address, payload) is serialized as JSON and published on
//! the channel named by its address.
//!
//! ## Delivery
//!
//! Incoming messages are fanned out to every local subscription of the
//! channel. Delivery is best-effort and non-durable. When the pub/sub stream
//! ends the actor drops every local inbox, so readers observe
//! [`TransportError::Closed`], and stops; later calls fail with a bus error.

use futures_util::StreamExt;

use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_trace,
    Bus,
    BusConnector,
    BusPtr,
    ConnectOptions,
    Envelope,
    Result,
    Subscription,
    SubscriptionHandle,
    TransportError,
};

/// URL scheme of the Redis bus.
pub const REDIS_SCHEME: &str = "redis";

/// Server URL used when none is configured.
pub const REDIS_DEFAULT_URL: &str = "redis://127.0.0.1:6379";

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<(u64, mpsc::UnboundedSender<Envelope>)>>>>;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        env: Envelope,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        topic: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        topic: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

enum ActorStep {
    //
    Continue,
    Stop,
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor.
    async fn handle(self, actor: &mut RedisActor) -> ActorStep {
        // ---
        match self {
            Cmd::Publish { env, resp } => {
                let _ = resp.send(actor.handle_publish(env).await);
                ActorStep::Continue
            }
            Cmd::Subscribe { topic, resp } => {
                let _ = resp.send(actor.handle_subscribe(topic).await);
                ActorStep::Continue
            }
            Cmd::Unsubscribe { topic, resp } => {
                let _ = resp.send(actor.handle_unsubscribe(topic).await);
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                log_debug!("{}: disconnecting redis client", actor.bus_id);
                let _ = resp.send(Ok(()));
                ActorStep::Stop
            }
        }
    }
}

struct RedisActor {
    // ---
    bus_id: String, // for logging only
    publish_conn: MultiplexedConnection,
    pubsub_sink: PubSubSink,
    pubsub_stream: PubSubStream,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribers: SubscriberMap,
}

impl RedisActor {
    // ---

    async fn run(mut self) {
        // ---
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                maybe_msg = self.pubsub_stream.next() => {
                    match maybe_msg {
                        Some(msg) => self.handle_incoming(msg).await,
                        None => {
                            log_error!("{}: pubsub stream ended", self.bus_id);
                            break;
                        }
                    }
                }
            }
        }

        // dropping the senders ends every local inbox
        self.subscribers.write().await.clear();
    }

    async fn handle_publish(&mut self, env: Envelope) -> Result<()> {
        // ---
        let topic = env.address.as_str().to_string();
        let payload = serde_json::to_vec(&env)?;

        redis::cmd("PUBLISH")
            .arg(&topic)
            .arg(payload)
            .query_async::<i64>(&mut self.publish_conn)
            .await
            .map(|_| ())
            .map_err(|err| {
                let msg = format!("{}: publish failed for channel {topic}: {err}", self.bus_id);
                log_error!("{msg}");
                TransportError::Bus(msg)
            })
    }

    async fn handle_subscribe(&mut self, topic: String) -> Result<()> {
        // ---
        self.pubsub_sink.subscribe(&topic).await.map_err(|err| {
            let msg = format!("{}: failed to subscribe to channel {topic}: {err}", self.bus_id);
            log_error!("{msg}");
            TransportError::Bus(msg)
        })?;

        log_debug!("{}: subscribed to channel {topic}", self.bus_id);
        Ok(())
    }

    async fn handle_unsubscribe(&mut self, topic: String) -> Result<()> {
        // ---
        self.pubsub_sink.unsubscribe(&topic).await.map_err(|err| {
            let msg = format!("{}: failed to unsubscribe from channel {topic}: {err}", self.bus_id);
            log_error!("{msg}");
            TransportError::Bus(msg)
        })?;

        log_debug!("{}: unsubscribed from channel {topic}", self.bus_id);
        Ok(())
    }

    /// Decodes an incoming message and fans it out to local subscribers.
    /// Subscribers whose receiver was dropped are evicted.
    async fn handle_incoming(&self, msg: redis::Msg) {
        // ---
        let topic = msg.get_channel_name().to_string();

        let payload: Vec<u8> = match msg.get_payload() {
            Ok(p) => p,
            Err(_err) => {
                log_debug!("{}: unreadable payload on {topic}: {_err}", self.bus_id);
                return;
            }
        };

        let env = match serde_json::from_slice::<Envelope>(&payload) {
            Ok(env) => env,
            Err(_err) => {
                log_debug!("{}: invalid envelope on {topic}: {_err}", self.bus_id);
                return;
            }
        };

        let mut map = self.subscribers.write().await;
        let Some(list) = map.get_mut(&topic) else {
            log_trace!("{}: no local subscribers for {topic}", self.bus_id);
            return;
        };

        list.retain(|(_, tx)| tx.send(env.clone()).is_ok());
    }
} // RedisActor

/// Register a local subscriber. Returns true if it is the topic's first.
async fn add_subscriber(
    map: &SubscriberMap,
    topic: &str,
    id: u64,
    tx: mpsc::UnboundedSender<Envelope>,
) -> bool {
    // ---
    let mut map = map.write().await;
    let list = map.entry(topic.to_string()).or_default();
    list.push((id, tx));
    list.len() == 1
}

/// Drop one local subscriber. Returns true if the topic has none left.
async fn remove_subscriber(map: &SubscriberMap, topic: &str, id: u64) -> bool {
    // ---
    let mut map = map.write().await;
    let Some(list) = map.get_mut(topic) else {
        return false;
    };

    list.retain(|(sub_id, _)| *sub_id != id);
    if list.is_empty() {
        map.remove(topic);
        true
    } else {
        false
    }
}

/// One Redis connection pair implementing [`Bus`].
pub struct RedisBus {
    // ---
    bus_id: String,
    cmd_tx: mpsc::Sender<Cmd>,
    subscribers: SubscriberMap,
    next_sub_id: AtomicU64,
    actor: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RedisBus {
    // ---
    async fn request<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Cmd,
    {
        // ---
        let (tx, rx) = oneshot::channel();

        self.cmd_tx.send(make(tx)).await.map_err(|e| {
            TransportError::Bus(format!("{}: actor command channel closed: {e}", self.bus_id))
        })?;

        rx.await.map_err(|e| {
            TransportError::Bus(format!("{}: actor responder dropped: {e}", self.bus_id))
        })?
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Bus for RedisBus {
    // ---
    fn bus_id(&self) -> &str {
        &self.bus_id
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        self.ensure_open()?;
        self.request(|resp| Cmd::Publish { env, resp }).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        self.ensure_open()?;

        let topic = sub.0.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let sub_id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);

        let first = add_subscriber(&self.subscribers, &topic, sub_id, tx).await;

        if first {
            if let Err(err) = self.request(|resp| Cmd::Subscribe { topic: topic.clone(), resp }).await {
                // others may have joined the topic while SUBSCRIBE was in flight
                remove_subscriber(&self.subscribers, &topic, sub_id).await;
                return Err(err);
            }
        }

        Ok(SubscriptionHandle {
            subscription: sub,
            id: sub_id,
            inbox: rx,
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        let topic = handle.subscription.0.to_string();
        let last = remove_subscriber(&self.subscribers, &topic, handle.id).await;

        if last {
            self.request(|resp| Cmd::Unsubscribe { topic, resp }).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        // the actor may already have stopped on its own
        let _ = self.request(|resp| Cmd::Close { resp }).await;

        if let Some(handle) = self.actor.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Opens [`RedisBus`] connections.
#[derive(Clone, Copy, Debug, Default)]
pub struct RedisConnector;

impl RedisConnector {
    // ---
    async fn connect_one(url: &str) -> Result<(MultiplexedConnection, PubSubSink, PubSubStream)> {
        // ---
        let client = redis::Client::open(url).map_err(|err| {
            TransportError::Bus(format!("redis: failed to open client for {url}: {err}"))
        })?;

        let publish_conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| {
                TransportError::Bus(format!("redis: failed to connect publish connection to {url}: {err}"))
            })?;

        let (pubsub_sink, pubsub_stream) = client
            .get_async_pubsub()
            .await
            .map_err(|err| {
                TransportError::Bus(format!("redis: failed to connect pubsub connection to {url}: {err}"))
            })?
            .split();

        Ok((publish_conn, pubsub_sink, pubsub_stream))
    }
}

/// Rewrite a normalized server URL for the requested security.
///
/// Secure connections use the `rediss://` scheme; skipping certificate
/// verification maps to redis' `#insecure` URL fragment.
fn server_url(server: &str, opts: &ConnectOptions) -> Result<String> {
    // ---
    if !opts.secure {
        return Ok(server.to_string());
    }

    if !cfg!(feature = "bus_redis_tls") {
        return Err(TransportError::NotSupported(
            "secure redis connections need the bus_redis_tls feature".into(),
        ));
    }

    let mut url = match server.strip_prefix("redis://") {
        Some(rest) => format!("rediss://{rest}"),
        None => server.to_string(),
    };

    let insecure = opts.tls.as_ref().is_some_and(|tls| tls.insecure_skip_verify);
    if insecure && !url.contains('#') {
        url.push_str("#insecure");
    }

    Ok(url)
}

#[async_trait::async_trait]
impl BusConnector for RedisConnector {
    // ---
    fn scheme(&self) -> &'static str {
        REDIS_SCHEME
    }

    fn default_url(&self) -> &'static str {
        REDIS_DEFAULT_URL
    }

    /// Tries each configured server in order; the first that connects wins.
    async fn connect(&self, opts: &ConnectOptions) -> Result<BusPtr> {
        // ---
        let mut last_err = TransportError::MissingConfig("redis server address".into());

        for server in &opts.servers {
            let url = server_url(server, opts)?;

            let conns = match tokio::time::timeout(opts.timeout, Self::connect_one(&url)).await {
                Ok(Ok(conns)) => conns,
                Ok(Err(err)) => {
                    log_error!("{err}");
                    last_err = err;
                    continue;
                }
                Err(_elapsed) => {
                    log_error!("redis: connecting to {url} timed out");
                    last_err = TransportError::Timeout;
                    continue;
                }
            };

            let (publish_conn, pubsub_sink, pubsub_stream) = conns;
            let bus_id = format!("redis-{}", NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed));
            let (cmd_tx, cmd_rx) = mpsc::channel(64);
            let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));

            let actor = RedisActor {
                bus_id: bus_id.clone(),
                publish_conn,
                pubsub_sink,
                pubsub_stream,
                cmd_rx,
                subscribers: Arc::clone(&subscribers),
            };
            let handle = tokio::spawn(actor.run());

            log_info!("{bus_id}: connected to Redis at {url}");

            return Ok(Arc::new(RedisBus {
                bus_id,
                cmd_tx,
                subscribers,
                next_sub_id: AtomicU64::new(1),
                actor: Mutex::new(Some(handle)),
                closed: AtomicBool::new(false),
            }));
        }

        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::TlsConfig;
    use std::time::Duration;

    fn options(secure: bool, tls: Option<TlsConfig>) -> ConnectOptions {
        ConnectOptions {
            servers: vec![REDIS_DEFAULT_URL.into()],
            secure,
            tls,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_remove_keeps_concurrent_subscriber() {
        // ---
        let map: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        assert!(add_subscriber(&map, "svc", 1, tx_a).await);
        assert!(!add_subscriber(&map, "svc", 2, tx_b).await);

        // first subscriber's SUBSCRIBE failed
        assert!(!remove_subscriber(&map, "svc", 1).await);

        let ids: Vec<u64> = map.read().await["svc"].iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2]);

        assert!(remove_subscriber(&map, "svc", 2).await);
        assert!(map.read().await.is_empty());
        assert!(!remove_subscriber(&map, "svc", 2).await);
    }

    #[test]
    fn test_plain_url_unchanged() {
        // ---
        let url = server_url("redis://cache:6379", &options(false, None)).unwrap();
        assert_eq!(url, "redis://cache:6379");
    }

    #[cfg(not(feature = "bus_redis_tls"))]
    #[test]
    fn test_secure_needs_tls_feature() {
        // ---
        let err = server_url("redis://cache:6379", &options(true, None)).unwrap_err();
        assert!(matches!(err, TransportError::NotSupported(_)));
    }

    #[cfg(feature = "bus_redis_tls")]
    #[test]
    fn test_secure_url_rewrite() {
        // ---
        let url = server_url("redis://cache:6379", &options(true, None)).unwrap();
        assert_eq!(url, "rediss://cache:6379");

        let tls = TlsConfig {
            insecure_skip_verify: true,
        };
        let url = server_url("redis://cache:6379", &options(true, Some(tls))).unwrap();
        assert_eq!(url, "rediss://cache:6379#insecure");
    }
}
