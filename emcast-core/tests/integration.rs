//! Integration tests — full handshake lifecycle, relayed flows and
//! shutdown sweeps over real TCP connections on localhost.

use std::sync::Arc;
use std::time::Duration;

use emcast_core::interface::OFFLINE_STATUS;
use emcast_core::{
    EntityKind, FrameShape, FrameStream, Interface, InterfaceFactory, MessageChannel, ProbeFilter,
    Prober, ProbeResponder, RcMode, Registry, encode_frames, net,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ── Helpers ──────────────────────────────────────────────────────

struct Ports {
    messaging: TcpListener,
    data: TcpListener,
    rc: TcpListener,
}

/// Bind the three aggregator-side listeners on OS-assigned ports.
async fn bind_ports() -> Ports {
    Ports {
        messaging: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        data: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        rc: TcpListener::bind("127.0.0.1:0").await.unwrap(),
    }
}

struct ClientSide {
    channel: MessageChannel,
    data: TcpStream,
    rc: TcpStream,
}

/// Run the client half of the handshake: introduce over a tagged
/// channel, wait for the ack, then connect the companion sockets.
async fn client_handshake(ports: &Ports, tag: &str, greeting: &str) -> JoinHandle<ClientSide> {
    let msg_addr = ports.messaging.local_addr().unwrap();
    let data_addr = ports.data.local_addr().unwrap();
    let rc_addr = ports.rc.local_addr().unwrap();
    let tag = tag.as_bytes().to_vec();
    let greeting = greeting.to_string();

    tokio::spawn(async move {
        let stream = TcpStream::connect(msg_addr).await.unwrap();
        let mut channel = MessageChannel::new(stream, tag).unwrap();
        channel.start();
        channel.send(&greeting).await.unwrap();
        let ack = channel.recv(Duration::from_secs(2)).await;
        assert_eq!(ack.as_deref(), Some("HELLO"));
        let data = TcpStream::connect(data_addr).await.unwrap();
        let rc = TcpStream::connect(rc_addr).await.unwrap();
        ClientSide { channel, data, rc }
    })
}

/// Run the aggregator half and return the negotiated interface.
async fn server_handshake(ports: &Ports) -> Interface {
    let (stream, _) = ports.messaging.accept().await.unwrap();
    InterfaceFactory::new()
        .negotiate(stream, &ports.data, &ports.rc)
        .await
        .unwrap()
        .expect("handshake should produce an interface")
}

// ── Handshake lifecycle ──────────────────────────────────────────

#[tokio::test]
async fn emitter_handshake_end_to_end() {
    let ports = bind_ports().await;
    let client = client_handshake(&ports, "emitter-7:", "HELLO;4x6x3").await;
    let interface = server_handshake(&ports).await;
    let _client = client.await.unwrap();

    assert_eq!(interface.kind(), EntityKind::Emitter);
    assert_eq!(interface.id(), "7");
    match interface {
        Interface::Emitter(bundle) => {
            assert_eq!(bundle.shape(), &FrameShape::parse("4x6x3").unwrap());
            assert!(bundle.phase().is_established());
        }
        Interface::Subscriber(_) => panic!("expected an emitter"),
    }
}

#[tokio::test]
async fn subscriber_handshake_end_to_end() {
    let ports = bind_ports().await;
    let client = client_handshake(&ports, "subscriber-s1:", "HELLO;").await;
    let interface = server_handshake(&ports).await;
    let _client = client.await.unwrap();

    assert_eq!(interface.kind(), EntityKind::Subscriber);
    assert_eq!(interface.id(), "s1");
}

#[tokio::test]
async fn garbled_introduction_is_a_hard_error() {
    let ports = bind_ports().await;
    let msg_addr = ports.messaging.local_addr().unwrap();

    let client = tokio::spawn(async move {
        let stream = TcpStream::connect(msg_addr).await.unwrap();
        let mut channel = MessageChannel::new(stream, Vec::new()).unwrap();
        channel.start();
        channel.send("what even is this").await.unwrap();
        // Hold the socket open so the server sees the payload.
        tokio::time::sleep(Duration::from_secs(1)).await;
        channel.teardown().await;
    });

    let (stream, _) = ports.messaging.accept().await.unwrap();
    let result = InterfaceFactory::new()
        .negotiate(stream, &ports.data, &ports.rc)
        .await;
    assert!(result.is_err());
    client.await.unwrap();
}

#[tokio::test]
async fn malformed_shape_is_acked_then_rejected() {
    // The ack follows the separator check, so an emitter announcing a
    // broken shape still sees HELLO before the handshake fails.
    let ports = bind_ports().await;
    let msg_addr = ports.messaging.local_addr().unwrap();

    let client = tokio::spawn(async move {
        let stream = TcpStream::connect(msg_addr).await.unwrap();
        let mut channel = MessageChannel::new(stream, Vec::new()).unwrap();
        channel.start();
        channel.send("emitter-7:HELLO;4x").await.unwrap();
        let ack = channel.recv(Duration::from_secs(2)).await;
        assert_eq!(ack.as_deref(), Some("HELLO"));
        channel.teardown().await;
    });

    let (stream, _) = ports.messaging.accept().await.unwrap();
    let result = InterfaceFactory::new()
        .negotiate(stream, &ports.data, &ports.rc)
        .await;
    assert!(result.is_err());
    client.await.unwrap();
}

// ── Relayed flows ────────────────────────────────────────────────

#[tokio::test]
async fn attached_subscriber_receives_emitter_bytes() {
    let ports = bind_ports().await;
    let emitter_client = client_handshake(&ports, "emitter-e:", "HELLO;2x2").await;
    let emitter_if = server_handshake(&ports).await;
    let emitter_client = emitter_client.await.unwrap();

    let sub_client = client_handshake(&ports, "subscriber-s:", "HELLO;").await;
    let sub_if = server_handshake(&ports).await;
    let mut sub_client = sub_client.await.unwrap();

    let mut registry = Registry::new();
    registry.register(emitter_if).unwrap();
    registry.register(sub_if).unwrap();
    registry.attach_subscriber("s", "e").await.unwrap();

    // Shape announcement reaches the subscriber on attach.
    let shape_msg = sub_client.channel.recv(Duration::from_secs(2)).await;
    assert_eq!(shape_msg.as_deref(), Some("2x2"));

    // Bytes written by the emitter surface on the subscriber's data
    // socket untouched.
    net::write_all(&emitter_client.data, b"frame-bytes")
        .await
        .unwrap();
    let mut buf = [0u8; 64];
    let mut got = Vec::new();
    while got.len() < 11 {
        let n = net::read_chunk(&sub_client.data, &mut buf).await.unwrap();
        assert!(n > 0);
        got.extend_from_slice(&buf[..n]);
    }
    assert_eq!(&got, b"frame-bytes");

    let detached = registry.detach_subscriber("s").await.unwrap();
    assert_eq!(detached, "e");
}

#[tokio::test]
async fn active_rc_mode_relays_subscriber_to_emitter() {
    let ports = bind_ports().await;
    let emitter_client = client_handshake(&ports, "emitter-e:", "HELLO;2x2").await;
    let emitter_if = server_handshake(&ports).await;
    let emitter_client = emitter_client.await.unwrap();

    let sub_client = client_handshake(&ports, "subscriber-s:", "HELLO;").await;
    let sub_if = server_handshake(&ports).await;
    let sub_client = sub_client.await.unwrap();

    let mut registry = Registry::new();
    registry.register(emitter_if).unwrap();
    registry.register(sub_if).unwrap();
    registry
        .subscriber_mut("s")
        .unwrap()
        .set_rc_mode(RcMode::Active);
    registry.attach_subscriber("s", "e").await.unwrap();

    net::write_all(&sub_client.rc, b"<;>;A;").await.unwrap();
    let mut buf = [0u8; 64];
    let n = net::read_chunk(&emitter_client.rc, &mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"<;>;A;");
}

#[tokio::test]
async fn frame_stream_decodes_relayed_batches() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let writer = TcpStream::connect(addr).await.unwrap();
    let (reader, _) = listener.accept().await.unwrap();

    let shape = FrameShape::parse("4x6x3").unwrap();
    let frame_a: Vec<u8> = (0..shape.volume()).map(|i| i as u8).collect();
    let frame_b = vec![9u8; shape.volume()];
    let payload = encode_frames(&[frame_a.clone(), frame_b.clone()]).unwrap();
    net::write_all(&writer, &payload).await.unwrap();

    let mut stream = FrameStream::new(Arc::new(reader), shape);
    let mut frames = Vec::new();
    while frames.len() < 2 {
        frames.extend(stream.next_batch().await.unwrap());
    }
    assert_eq!(frames, vec![frame_a, frame_b]);
}

// ── Shutdown sweep ───────────────────────────────────────────────

#[tokio::test]
async fn sweep_confirms_a_responsive_emitter() {
    let ports = bind_ports().await;
    let client = client_handshake(&ports, "emitter-7:", "HELLO;2x2").await;
    let interface = server_handshake(&ports).await;
    let mut client = client.await.unwrap();

    // Well-behaved emitter: answer shutdown with the offline status.
    let responder = tokio::spawn(async move {
        loop {
            match client.channel.recv(Duration::from_secs(5)).await {
                Some(cmd) if cmd == "shutdown" => {
                    client.channel.send(OFFLINE_STATUS).await.unwrap();
                    client.channel.teardown().await;
                    return;
                }
                Some(_) => {}
                None => return,
            }
        }
    });

    let mut registry = Registry::new();
    registry.register(interface).unwrap();
    let report = registry.shutdown_sweep(Duration::from_secs(2)).await;
    assert_eq!(report, vec!["emitter-7: confirmed (round 1)"]);
    responder.await.unwrap();
}

#[tokio::test]
async fn sweep_empties_a_registry_of_responsive_emitters() {
    let ports = bind_ports().await;
    let mut registry = Registry::new();
    let mut responders = Vec::new();

    for id in ["a", "b", "c"] {
        let client = client_handshake(&ports, &format!("emitter-{id}:"), "HELLO;2x2").await;
        let interface = server_handshake(&ports).await;
        let mut client = client.await.unwrap();
        registry.register(interface).unwrap();

        responders.push(tokio::spawn(async move {
            if let Some(cmd) = client.channel.recv(Duration::from_secs(5)).await {
                assert_eq!(cmd, "shutdown");
                client.channel.send(OFFLINE_STATUS).await.unwrap();
                client.channel.teardown().await;
            }
        }));
    }

    let report = registry.shutdown_sweep(Duration::from_secs(2)).await;
    assert_eq!(report.len(), 3);
    assert!(report.iter().all(|line| line.contains("confirmed")));
    assert!(registry.emitter_ids().is_empty());
    for responder in responders {
        responder.await.unwrap();
    }
}

#[tokio::test]
async fn sweep_drops_a_silent_emitter_after_four_rounds() {
    let ports = bind_ports().await;
    let client = client_handshake(&ports, "emitter-mute:", "HELLO;2x2").await;
    let interface = server_handshake(&ports).await;
    let _client = client.await.unwrap();

    let mut registry = Registry::new();
    registry.register(interface).unwrap();
    let report = registry.shutdown_sweep(Duration::from_millis(50)).await;
    assert_eq!(report.len(), 1);
    assert!(
        report[0].starts_with("emitter-mute: dropped after 4 rounds"),
        "unexpected report: {:?}",
        report[0]
    );
}

// ── Discovery ────────────────────────────────────────────────────

#[tokio::test]
async fn probe_sweep_finds_a_bound_responder() {
    let responder = ProbeResponder::bind(
        "127.0.0.1".parse().unwrap(),
        0,
        EntityKind::Emitter,
        "disco",
    )
    .await
    .unwrap();
    let port = responder.port().unwrap();

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let server = tokio::spawn(async move { responder.run(&token).await });

    let prober = Prober::with_port(port);
    let found = prober
        .sweep("127.0.0.1", ProbeFilter::Only(EntityKind::Emitter))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let tag = found[0].tag.as_ref().expect("responder should be online");
    assert_eq!(tag.id, "disco");

    cancel.cancel();
    server.await.unwrap().unwrap();
}
