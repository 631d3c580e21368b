// tests/transport_memory.rs

use bytes::Bytes;
use tokio::time::{timeout, Duration};

use mom_transport::{
    // ---
    Address,
    BusConnector,
    ConnectOptions,
    Envelope,
    MemoryConnector,
    MemoryHub,
    Subscription,
    TransportError,
};

fn options() -> ConnectOptions {
    ConnectOptions {
        servers: vec!["memory://local".into()],
        secure: false,
        tls: None,
        timeout: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn memory_subscribe_then_publish_delivers() {
    // ---
    // Arrange
    // ---
    let connector = MemoryConnector::new(MemoryHub::new());
    let bus = connector.connect(&options()).await.expect("connect failed");

    let address = Address::from("test.address");
    let reply = bus.new_inbox();

    let mut sub = bus
        .subscribe(Subscription::from(&address))
        .await
        .expect("subscribe failed");

    let payload = Bytes::from_static(b"hello");

    // ---
    // Act
    // ---
    bus.publish(Envelope::with_reply(address.clone(), reply.clone(), payload.clone()))
        .await
        .expect("publish failed");

    // ---
    // Assert
    // ---
    let received = sub
        .next_msg(Duration::from_millis(100))
        .await
        .expect("timed out waiting for message");

    assert_eq!(received.payload, payload);
    assert_eq!(received.address, address);
    assert_eq!(received.reply_to, Some(reply));
}

#[tokio::test]
async fn memory_connections_share_a_hub() {
    // ---
    // Arrange
    // ---
    let connector = MemoryConnector::new(MemoryHub::new());
    let server = connector.connect(&options()).await.expect("connect failed");
    let client = connector.connect(&options()).await.expect("connect failed");

    let mut sub = server
        .subscribe(Subscription::from("svc"))
        .await
        .expect("subscribe failed");

    // ---
    // Act
    // ---
    client
        .publish(Envelope::new(Address::from("svc"), Bytes::from_static(b"x")))
        .await
        .expect("publish failed");

    // ---
    // Assert
    // ---
    let received = sub.next_msg(Duration::from_millis(100)).await.expect("no delivery");
    assert_eq!(received.reply_to, None);
}

#[tokio::test]
async fn memory_other_hub_is_isolated() {
    // ---
    // Arrange
    // ---
    let a = MemoryConnector::new(MemoryHub::new()).connect(&options()).await.unwrap();
    let b = MemoryConnector::new(MemoryHub::new()).connect(&options()).await.unwrap();

    let mut sub = a.subscribe(Subscription::from("svc")).await.unwrap();

    // ---
    // Act
    // ---
    b.publish(Envelope::new(Address::from("svc"), Bytes::from_static(b"x")))
        .await
        .unwrap();

    // ---
    // Assert
    // ---
    let err = sub.next_msg(Duration::from_millis(50)).await.unwrap_err();
    assert_eq!(err, TransportError::Timeout);
}

#[tokio::test]
async fn memory_close_ends_own_subscriptions_only() {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();
    let connector = MemoryConnector::new(hub.clone());
    let closing = connector.connect(&options()).await.unwrap();
    let staying = connector.connect(&options()).await.unwrap();

    let mut gone = closing.subscribe(Subscription::from("svc")).await.unwrap();
    let mut kept = staying.subscribe(Subscription::from("svc")).await.unwrap();
    assert_eq!(hub.subscription_count().await, 2);

    // ---
    // Act
    // ---
    closing.close().await.expect("close failed");
    closing.close().await.expect("second close failed");

    // ---
    // Assert
    // ---
    assert_eq!(hub.subscription_count().await, 1);

    let err = timeout(Duration::from_millis(100), gone.next_msg(Duration::from_secs(5)))
        .await
        .expect("closed subscription should end immediately")
        .unwrap_err();
    assert_eq!(err, TransportError::Closed);

    staying
        .publish(Envelope::new(Address::from("svc"), Bytes::from_static(b"still here")))
        .await
        .unwrap();
    let received = kept.next_msg(Duration::from_millis(100)).await.unwrap();
    assert_eq!(received.payload, Bytes::from_static(b"still here"));

    let err = closing
        .publish(Envelope::new(Address::from("svc"), Bytes::new()))
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Closed);
}
