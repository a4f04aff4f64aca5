//! Loopback TCP tests for the transport: handshake, pool admission,
//! ingress filtering, routing and the dial loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use witness_crypto::generate_keypair;
use witness_network::{
    establish, ConnectionContext, ConnectionPool, ContactManager, DialOutcome, Direction, Listener,
    Messenger, NetworkError, Role, ShutdownController, Subscription, TransportConfig,
};
use witness_protocol::{codec, handshake, Message};
use witness_types::{Identity, KeyPair, Timestamp};

struct TestPeer {
    keypair: Arc<KeyPair>,
    pool: ConnectionPool,
    messenger: Messenger,
    ctx: ConnectionContext,
    contacts: ContactManager,
    addr: SocketAddr,
    shutdown: ShutdownController,
    received: mpsc::UnboundedReceiver<Message>,
    _subscription: Subscription,
}

impl TestPeer {
    fn identity(&self) -> Identity {
        self.keypair.identity
    }

    fn ping(&self, body: &[u8]) -> Message {
        self.messenger
            .sign(self.messenger.compose("ping").payload(body.to_vec()))
    }
}

fn fast_config() -> TransportConfig {
    TransportConfig {
        handshake_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_millis(500),
        max_dial_retries: 2,
        dial_backoff: Duration::from_millis(20),
        max_dial_backoff: Duration::from_millis(50),
        ..TransportConfig::default()
    }
}

async fn spawn_peer(name: &str, config: TransportConfig) -> TestPeer {
    let keypair = Arc::new(generate_keypair());
    let pool = ConnectionPool::new();
    let messenger = Messenger::new(
        name,
        Arc::clone(&keypair),
        pool.clone(),
        Duration::from_secs(30),
    );
    let ctx = ConnectionContext {
        keypair: Arc::clone(&keypair),
        pool: pool.clone(),
        inbound: Arc::new(messenger.clone()),
        config: Arc::new(config),
    };
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = ShutdownController::new();
    tokio::spawn(listener.run(ctx.clone(), shutdown.subscribe()));

    let (tx, received) = mpsc::unbounded_channel();
    let subscription = messenger.subscribe("ping", move |message| {
        let _ = tx.send(message.clone());
    });
    let contacts = ContactManager::new(ctx.clone(), shutdown.subscribe());

    TestPeer {
        keypair,
        pool,
        messenger,
        ctx,
        contacts,
        addr,
        shutdown,
        received,
        _subscription: subscription,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn connect_pair(a: &TestPeer, b: &TestPeer) {
    a.contacts.connect(b.addr).expect("dial should start");
    let (pa, pb) = (a.pool.clone(), b.pool.clone());
    let (ia, ib) = (a.identity(), b.identity());
    wait_until(move || pa.contains(&ib) && pb.contains(&ia)).await;
}

async fn next_message(peer: &mut TestPeer) -> Message {
    tokio::time::timeout(Duration::from_secs(5), peer.received.recv())
        .await
        .expect("no message in time")
        .expect("subscription closed")
}

/// A closed port: bind, read the address, release it.
async fn dead_endpoint() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn peers_authenticate_each_other() {
    let a = spawn_peer("a", fast_config()).await;
    let b = spawn_peer("b", fast_config()).await;

    connect_pair(&a, &b).await;

    assert_eq!(a.pool.identities(), vec![b.identity()]);
    assert_eq!(b.pool.identities(), vec![a.identity()]);
    assert_eq!(a.contacts.pinned_identity(&b.addr), Some(b.identity()));
    let outbound = a.pool.find(&b.identity()).unwrap();
    assert_eq!(outbound.direction(), Direction::Outbound);
    assert_eq!(outbound.address(), b.addr);
    assert_eq!(b.pool.find(&a.identity()).unwrap().direction(), Direction::Inbound);
}

#[tokio::test]
async fn self_connect_is_rejected() {
    let a = spawn_peer("a", fast_config()).await;

    let outcome = a.contacts.connect(a.addr).unwrap().await.unwrap();

    assert!(matches!(outcome, DialOutcome::Rejected(_)));
    assert!(a.pool.is_empty());
    assert!(!a.contacts.is_dialing(&a.addr));
}

#[tokio::test]
async fn second_connection_for_same_identity_is_refused() {
    let a = spawn_peer("a", fast_config()).await;
    let b = spawn_peer("b", fast_config()).await;
    connect_pair(&a, &b).await;

    // The first dial is still running, so the endpoint is in flight.
    assert!(a.contacts.connect(b.addr).is_none());

    let stream = TcpStream::connect(b.addr).await.unwrap();
    let result = establish(stream, Role::Dialer { pinned: None }, &a.ctx).await;

    assert!(matches!(result, Err(NetworkError::DuplicateIdentity(id)) if id == b.identity()));
    assert_eq!(a.pool.len(), 1);
    assert_eq!(b.pool.len(), 1);
}

#[tokio::test]
async fn expired_message_is_never_delivered() {
    let a = spawn_peer("a", fast_config()).await;
    let mut b = spawn_peer("b", fast_config()).await;
    connect_pair(&a, &b).await;

    let stale = a.messenger.sign(
        a.messenger
            .compose("ping")
            .expires_at(Timestamp::now().saturating_sub(Duration::from_secs(1)))
            .payload(b"stale".to_vec()),
    );
    assert_eq!(a.messenger.emit(&stale), 1);
    a.messenger.emit(&a.ping(b"fresh"));

    let first = next_message(&mut b).await;
    assert_eq!(first.payload, b"fresh");
    assert_eq!(first.sender.identity(), &a.identity());
}

#[tokio::test]
async fn tampered_message_is_dropped_at_ingress() {
    let a = spawn_peer("a", fast_config()).await;
    let mut b = spawn_peer("b", fast_config()).await;
    connect_pair(&a, &b).await;

    let mut forged = a.ping(b"original");
    forged.payload = b"forged".to_vec();
    a.messenger.emit(&forged);
    a.messenger.emit(&a.ping(b"genuine"));

    assert_eq!(next_message(&mut b).await.payload, b"genuine");
}

#[tokio::test]
async fn targeted_message_reaches_only_its_receiver() {
    let a = spawn_peer("a", fast_config()).await;
    let mut b = spawn_peer("b", fast_config()).await;
    let mut c = spawn_peer("c", fast_config()).await;
    connect_pair(&a, &b).await;
    connect_pair(&a, &c).await;

    let targeted = a.messenger.sign(
        a.messenger
            .compose("ping")
            .receiver(c.identity())
            .payload(b"for c".to_vec()),
    );
    assert_eq!(a.messenger.emit(&targeted), 1);
    assert_eq!(a.messenger.emit(&a.ping(b"for all")), 2);

    assert_eq!(next_message(&mut c).await.payload, b"for c");
    assert_eq!(next_message(&mut c).await.payload, b"for all");
    // Frames on one connection arrive in order, so a misrouted targeted
    // message would show up first here.
    assert_eq!(next_message(&mut b).await.payload, b"for all");
}

#[tokio::test]
async fn undecodable_frame_closes_only_that_connection() {
    let a = spawn_peer("a", fast_config()).await;
    let b = spawn_peer("b", fast_config()).await;
    connect_pair(&a, &b).await;

    let intruder = generate_keypair();
    let intruder_id = intruder.identity;
    let mut raw = TcpStream::connect(b.addr).await.unwrap();
    let peer = handshake::dial(&mut raw, &intruder, None).await.unwrap();
    assert_eq!(peer, b.identity());
    let pool = b.pool.clone();
    wait_until(move || pool.contains(&intruder_id)).await;

    codec::write_frame(&mut raw, &[0xff, 0xff, 0xff]).await.unwrap();

    let pool = b.pool.clone();
    wait_until(move || !pool.contains(&intruder_id)).await;
    assert!(b.pool.contains(&a.identity()));
}

#[tokio::test]
async fn disconnect_removes_peer_from_pool() {
    let a = spawn_peer("a", fast_config()).await;
    let b = spawn_peer("b", fast_config()).await;
    let handle = a.contacts.connect(b.addr).unwrap();
    let (pa, ib) = (a.pool.clone(), b.identity());
    wait_until(move || pa.contains(&ib)).await;

    b.shutdown.shutdown();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, DialOutcome::Disconnected(id) if id == b.identity()));
    assert!(a.pool.is_empty());
    assert!(!a.contacts.is_dialing(&b.addr));
}

#[tokio::test]
async fn dead_endpoint_is_abandoned_after_retry_budget() {
    let a = spawn_peer("a", fast_config()).await;
    let target = dead_endpoint().await;

    let handle = a.contacts.connect(target).unwrap();
    assert!(a.contacts.is_dialing(&target));
    let outcome = handle.await.unwrap();

    assert!(matches!(outcome, DialOutcome::Abandoned { attempts: 3 }));
    assert_eq!(a.contacts.in_flight_count(), 0);
}

#[tokio::test]
async fn shutdown_cancels_dial_backoff() {
    let config = TransportConfig {
        dial_backoff: Duration::from_secs(30),
        max_dial_backoff: Duration::from_secs(30),
        ..fast_config()
    };
    let a = spawn_peer("a", config).await;
    let target = dead_endpoint().await;

    let handle = a.contacts.connect(target).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    a.shutdown.shutdown();

    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("dial loop must observe shutdown")
        .unwrap();
    assert!(matches!(outcome, DialOutcome::Cancelled));
    assert!(a.contacts.connect(target).is_none());
}
