/// Integration tests: spokes over real TCP connections.
///
/// Each test runs its own manager and listener on an ephemeral port and
/// observes hub callbacks through an event channel.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use hubspoke::{
    dial, HubConfig, HubError, Id, JoinDecision, Listener, Manager, RemoteConfig, Spoke, SpokeId,
    ID_SIZE, MAGIC,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Join(SpokeId, Bytes),
    Feedback(SpokeId, Bytes),
    Leave(SpokeId),
}

type Backlog = Arc<Mutex<Vec<Bytes>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

fn fast_config() -> RemoteConfig {
    RemoteConfig::new().keepalive_interval(Duration::from_millis(50))
}

/// Hub config that reports every callback, replays `backlog` on join and
/// refuses spokes whose parameter is `deny`.
fn reporting_config(backlog: &Backlog) -> (HubConfig, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (t1, t2, t3) = (tx.clone(), tx.clone(), tx);
    let backlog = backlog.clone();
    let config = HubConfig::new()
        .on_join(move |spoke, param| {
            let _ = t1.send(Event::Join(spoke, Bytes::copy_from_slice(param)));
            if param == b"deny" {
                JoinDecision::reject()
            } else {
                JoinDecision::accept(backlog.lock().unwrap().clone())
            }
        })
        .on_feedback(move |spoke, data| {
            let _ = t2.send(Event::Feedback(spoke, data));
        })
        .on_leave(move |spoke| {
            let _ = t3.send(Event::Leave(spoke));
        });
    (config, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for hub callback")
        .expect("hub config dropped")
}

async fn recv(spoke: &Spoke) -> Option<Bytes> {
    tokio::time::timeout(WAIT, spoke.receive())
        .await
        .expect("timed out waiting for message")
}

/// Join, exchange messages and feedback, leave.
#[tokio::test]
async fn remote_spoke_roundtrip() {
    init_tracing();
    let manager = Manager::spawn();
    let backlog: Backlog = Arc::new(Mutex::new(vec![Bytes::from("Hello Spoke")]));
    let (config, mut events) = reporting_config(&backlog);
    let hub = manager.new_hub(config);
    let listener = Listener::bind("127.0.0.1:0", manager.handle(), fast_config())
        .await
        .unwrap();

    let spoke = dial(
        listener.local_addr(),
        hub.id(),
        Some(Bytes::from("Hello Hub")),
        &fast_config(),
    )
    .await
    .unwrap();
    assert_eq!(spoke.hub_id(), hub.id());

    // ── Join callback saw the parameter and the spoke's identity ────────
    let Event::Join(joined, param) = next_event(&mut events).await else {
        panic!("expected join");
    };
    assert_eq!(param, Bytes::from("Hello Hub"));
    assert_eq!(joined, spoke.id());

    // ── Backlog, then a live broadcast ───────────────────────────────
    assert_eq!(recv(&spoke).await, Some(Bytes::from("Hello Spoke")));
    hub.send("live");
    assert_eq!(recv(&spoke).await, Some(Bytes::from("live")));

    // ── Feedback arrives in order ───────────────────────────────────
    spoke.feedback("F1");
    spoke.feedback("F2");
    assert_eq!(
        next_event(&mut events).await,
        Event::Feedback(joined, Bytes::from("F1"))
    );
    assert_eq!(
        next_event(&mut events).await,
        Event::Feedback(joined, Bytes::from("F2"))
    );

    // ── Leave fires the callback exactly once ────────────────────────
    spoke.leave();
    spoke.leave();
    assert_eq!(next_event(&mut events).await, Event::Leave(joined));
    assert_eq!(recv(&spoke).await, None);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), events.recv())
            .await
            .is_err(),
        "unexpected callback after leave"
    );

    listener.close().await;
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn nil_parameter_arrives_as_empty() {
    init_tracing();
    let manager = Manager::spawn();
    let (config, mut events) = reporting_config(&Backlog::default());
    let hub = manager.new_hub(config);
    let listener = Listener::bind("127.0.0.1:0", manager.handle(), fast_config())
        .await
        .unwrap();

    let _spoke = dial(listener.local_addr(), hub.id(), None, &fast_config())
        .await
        .unwrap();
    let Event::Join(_, param) = next_event(&mut events).await else {
        panic!("expected join");
    };
    assert!(param.is_empty());
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_join_is_refused() {
    init_tracing();
    let manager = Manager::spawn();
    let (config, mut events) = reporting_config(&Backlog::default());
    let hub = manager.new_hub(config);
    let listener = Listener::bind("127.0.0.1:0", manager.handle(), fast_config())
        .await
        .unwrap();

    let err = dial(
        listener.local_addr(),
        hub.id(),
        Some(Bytes::from("deny")),
        &fast_config(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, HubError::Refused(id) if id == hub.id()), "got {err:?}");

    // The join callback ran, but a refused spoke never gets a leave.
    assert!(matches!(next_event(&mut events).await, Event::Join(..)));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), events.recv())
            .await
            .is_err()
    );
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_hub_is_refused() {
    init_tracing();
    let manager = Manager::spawn();
    let listener = Listener::bind("127.0.0.1:0", manager.handle(), fast_config())
        .await
        .unwrap();

    let missing = Id::new();
    let err = dial(listener.local_addr(), missing, None, &fast_config())
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Refused(id) if id == missing), "got {err:?}");
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn wrong_magic_gets_no_reply() {
    init_tracing();
    let manager = Manager::spawn();
    let listener = Listener::bind("127.0.0.1:0", manager.handle(), fast_config())
        .await
        .unwrap();

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    stream.write_all(b"GET ").await.unwrap();
    let mut reply = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut reply))
        .await
        .expect("server did not close")
        .unwrap();
    assert!(reply.is_empty());
    manager.shutdown().await.unwrap();
}

/// A join that arrives while the publisher holds a lock window sees the
/// message exactly once: from the backlog, not also as a broadcast.
#[tokio::test]
async fn join_during_lock_window_sees_message_once() {
    init_tracing();
    let manager = Manager::spawn();
    let backlog = Backlog::default();
    let (config, _events) = reporting_config(&backlog);
    let hub = manager.new_hub(config);
    let listener = Listener::bind("127.0.0.1:0", manager.handle(), fast_config())
        .await
        .unwrap();
    let addr = listener.local_addr();

    hub.lock().await;
    let hub_id = hub.id();
    let dialing = tokio::spawn(async move { dial(addr, hub_id, None, &fast_config()).await });

    // Let the join reach the manager while the window is open.
    tokio::time::sleep(Duration::from_millis(100)).await;
    backlog.lock().unwrap().push(Bytes::from("msgX"));
    hub.send("msgX");
    hub.unlock();

    let spoke = tokio::time::timeout(WAIT, dialing)
        .await
        .expect("handshake did not finish after unlock")
        .unwrap()
        .unwrap();
    assert_eq!(recv(&spoke).await, Some(Bytes::from("msgX")));

    hub.send("next");
    assert_eq!(recv(&spoke).await, Some(Bytes::from("next")));
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn stopping_hub_ends_remote_spoke() {
    init_tracing();
    let manager = Manager::spawn();
    let (config, mut events) = reporting_config(&Backlog::default());
    let hub = manager.new_hub(config);
    let listener = Listener::bind("127.0.0.1:0", manager.handle(), fast_config())
        .await
        .unwrap();

    let spoke = dial(listener.local_addr(), hub.id(), None, &fast_config())
        .await
        .unwrap();
    let Event::Join(joined, _) = next_event(&mut events).await else {
        panic!("expected join");
    };

    hub.send("last");
    hub.stop();
    assert_eq!(recv(&spoke).await, Some(Bytes::from("last")));
    assert_eq!(recv(&spoke).await, None);
    assert_eq!(next_event(&mut events).await, Event::Leave(joined));
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn idle_connection_survives_on_keepalives() {
    init_tracing();
    let manager = Manager::spawn();
    let (config, _events) = reporting_config(&Backlog::default());
    let hub = manager.new_hub(config);
    let remote = RemoteConfig::new().keepalive_interval(Duration::from_millis(10));
    let listener = Listener::bind("127.0.0.1:0", manager.handle(), remote.clone())
        .await
        .unwrap();

    let spoke = dial(listener.local_addr(), hub.id(), None, &remote)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    spoke.feedback("still here");
    hub.send("after idle");
    assert_eq!(recv(&spoke).await, Some(Bytes::from("after idle")));
    manager.shutdown().await.unwrap();
}

/// Read one byte, failing the test if none arrives in time.
async fn read_byte(stream: &mut TcpStream) -> u8 {
    tokio::time::timeout(WAIT, stream.read_u8())
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
}

/// A server-side connection with nothing to send emits ignore frames.
#[tokio::test]
async fn idle_server_sends_ignore_frames() {
    init_tracing();
    let manager = Manager::spawn();
    let (config, _events) = reporting_config(&Backlog::default());
    let hub = manager.new_hub(config);
    let remote = RemoteConfig::new().keepalive_interval(Duration::from_millis(20));
    let listener = Listener::bind("127.0.0.1:0", manager.handle(), remote)
        .await
        .unwrap();

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    stream.write_all(&MAGIC).await.unwrap();
    stream.write_all(hub.id().as_bytes()).await.unwrap();
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).await.unwrap();
    assert_eq!(magic, MAGIC);
    stream.write_all(&[0x01]).await.unwrap();
    let mut spoke = [0u8; ID_SIZE];
    stream.read_exact(&mut spoke).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    for _ in 0..2 {
        assert_eq!(read_byte(&mut stream).await, 0x03);
    }
    manager.shutdown().await.unwrap();
}

/// A dialed spoke with no feedback to send emits ignore frames.
#[tokio::test]
async fn idle_client_sends_ignore_frames() {
    init_tracing();
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let hub = Id::new();

    let accepting = tokio::spawn(async move {
        let (mut stream, _) = server.accept().await.unwrap();
        let mut hello = [0u8; 4 + ID_SIZE];
        stream.read_exact(&mut hello).await.unwrap();
        assert_eq!(&hello[..4], &MAGIC);
        assert_eq!(&hello[4..], hub.as_bytes());
        stream.write_all(&MAGIC).await.unwrap();
        // Nil join parameter.
        assert_eq!(read_byte(&mut stream).await, 0x01);
        stream.write_all(Id::new().as_bytes()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(read_byte(&mut stream).await);
        }
        seen
    });

    let remote = RemoteConfig::new().keepalive_interval(Duration::from_millis(20));
    let spoke = dial(addr, hub, None, &remote).await.unwrap();
    let seen = accepting.await.unwrap();
    assert_eq!(seen, vec![0x03, 0x03]);
    drop(spoke);
}

#[tokio::test]
async fn large_messages_keep_their_order() {
    init_tracing();
    let manager = Manager::spawn();
    let (config, _events) = reporting_config(&Backlog::default());
    let hub = manager.new_hub(config);
    let listener = Listener::bind("127.0.0.1:0", manager.handle(), fast_config())
        .await
        .unwrap();
    let spoke = dial(listener.local_addr(), hub.id(), None, &fast_config())
        .await
        .unwrap();

    let sizes = [0usize, 1, 0x1F, 0x20, 0x1FFF, 0x2000, 0x20_0000];
    for (i, size) in sizes.iter().enumerate() {
        hub.send(vec![i as u8; *size]);
    }
    for (i, size) in sizes.iter().enumerate() {
        let message = recv(&spoke).await.unwrap();
        assert_eq!(message.len(), *size);
        assert!(message.iter().all(|b| *b == i as u8));
    }
    manager.shutdown().await.unwrap();
}
