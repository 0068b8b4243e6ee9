//! End-to-end tests for the UDP client against a fake simulator.
//!
//! The fake simulator is a plain UDP socket: it asserts on the subscribe
//! requests the client sends and feeds update datagrams back to the
//! client's own port, exactly like the real control channel.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use vayu_link::protocol::control::encode_update;
use vayu_link::{
    ClientOptions, DatarefClient, DatarefKey, DatarefValue, Error, StartPosition, Subscription,
};

const WAIT: Duration = Duration::from_secs(5);

/// Fake simulator endpoint: a socket the client is pointed at statically.
fn sim_socket() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind fake simulator");
    socket
        .set_read_timeout(Some(Duration::from_millis(100)))
        .expect("set timeout");
    let addr = socket.local_addr().expect("local addr");
    (socket, addr)
}

fn static_options(endpoint: SocketAddr) -> ClientOptions {
    ClientOptions {
        endpoint: Some(endpoint),
        ..ClientOptions::default()
    }
}

fn subscriptions(specs: &[&str]) -> Vec<Subscription> {
    specs
        .iter()
        .map(|s| Subscription::new(DatarefKey::parse(s).expect("parse key")))
        .collect()
}

/// A subscribe request as seen by the fake simulator.
#[derive(Debug, PartialEq)]
struct SubscribeSeen {
    interval: i32,
    index: i32,
    name: String,
}

fn parse_subscribe(datagram: &[u8]) -> SubscribeSeen {
    assert_eq!(&datagram[..4], b"RREF", "expected subscribe magic");
    assert_eq!(datagram.len(), 413, "subscribe request length");
    let interval = i32::from_le_bytes(datagram[5..9].try_into().unwrap());
    let index = i32::from_le_bytes(datagram[9..13].try_into().unwrap());
    let name_field = &datagram[13..];
    let end = name_field.iter().position(|&b| b == 0).unwrap_or(name_field.len());
    SubscribeSeen {
        interval,
        index,
        name: String::from_utf8_lossy(&name_field[..end]).into_owned(),
    }
}

/// Collect `count` subscribe requests, returning them sorted by wire-index
/// along with the client's source address.
fn collect_subscribes(sim: &UdpSocket, count: usize) -> (Vec<SubscribeSeen>, SocketAddr) {
    let deadline = Instant::now() + WAIT;
    let mut buf = [0u8; 2048];
    let mut seen = Vec::new();
    let mut client_addr = None;

    while seen.len() < count {
        assert!(Instant::now() < deadline, "timed out waiting for subscribes");
        match sim.recv_from(&mut buf) {
            Ok((len, src)) => {
                let sub = parse_subscribe(&buf[..len]);
                client_addr = Some(src);
                // Resubscribes repeat the same assignment; keep one per index
                if !seen.iter().any(|s: &SubscribeSeen| s.index == sub.index) {
                    seen.push(sub);
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => panic!("fake simulator recv failed: {}", e),
        }
    }

    seen.sort_by_key(|s| s.index);
    (seen, client_addr.expect("client address"))
}

#[test]
fn subscribe_update_get_value() {
    let (sim, sim_addr) = sim_socket();
    let client = DatarefClient::connect(
        subscriptions(&["sim/test/alpha", "sim/test/bravo"]),
        static_options(sim_addr),
    )
    .expect("connect");
    let changes_rx = client.change_stream();

    let (subs, client_addr) = collect_subscribes(&sim, 2);
    assert_eq!(subs[0].name, "sim/test/alpha");
    assert_eq!(subs[0].index, 0);
    assert_eq!(subs[0].interval, 3);
    assert_eq!(subs[1].name, "sim/test/bravo");
    assert_eq!(subs[1].index, 1);

    sim.send_to(&encode_update(&[(0, 12.5), (1, 7.0)]), client_addr)
        .expect("send update");

    let changes = changes_rx.recv_timeout(WAIT).expect("changes delivered");
    assert_eq!(changes.len(), 2);
    assert_eq!(
        changes.get("sim/test/alpha"),
        Some(&DatarefValue::Scalar(12.5))
    );
    assert_eq!(
        changes.get("sim/test/bravo"),
        Some(&DatarefValue::Scalar(7.0))
    );
    assert_eq!(
        client.get_value("sim/test/alpha"),
        Some(DatarefValue::Scalar(12.5))
    );
}

#[test]
fn identical_update_yields_no_second_changeset() {
    let (sim, sim_addr) = sim_socket();
    let client = DatarefClient::connect(
        subscriptions(&["sim/test/alpha"]),
        static_options(sim_addr),
    )
    .expect("connect");
    let changes_rx = client.change_stream();

    let (_, client_addr) = collect_subscribes(&sim, 1);
    let update = encode_update(&[(0, 4.25)]);

    sim.send_to(&update, client_addr).expect("first update");
    let first = changes_rx.recv_timeout(WAIT).expect("first changes");
    assert_eq!(first.len(), 1);

    sim.send_to(&update, client_addr).expect("second update");
    assert!(
        changes_rx.recv_timeout(Duration::from_millis(800)).is_err(),
        "identical update must not produce a second ChangeSet"
    );
    assert_eq!(
        client.get_value("sim/test/alpha"),
        Some(DatarefValue::Scalar(4.25))
    );
}

#[test]
fn rounding_applies_before_change_detection() {
    // Raw 3.04 then 3.06 with precision 1: both round before comparison
    let (sim, sim_addr) = sim_socket();
    let client = DatarefClient::connect(
        subscriptions(&["sim/test/charlie,1"]),
        static_options(sim_addr),
    )
    .expect("connect");
    let changes_rx = client.change_stream();

    let (subs, client_addr) = collect_subscribes(&sim, 1);
    // Precision suffix stays local: the wire name has no `,1`
    assert_eq!(subs[0].name, "sim/test/charlie");

    sim.send_to(&encode_update(&[(0, 3.04)]), client_addr)
        .expect("send 3.04");
    let first = changes_rx.recv_timeout(WAIT).expect("first changes");
    assert_eq!(
        first.get("sim/test/charlie,1"),
        Some(&DatarefValue::Scalar(3.0))
    );

    sim.send_to(&encode_update(&[(0, 3.06)]), client_addr)
        .expect("send 3.06");
    let second = changes_rx.recv_timeout(WAIT).expect("second changes");
    assert_eq!(
        second.get("sim/test/charlie,1"),
        Some(&DatarefValue::Scalar(3.1))
    );
}

#[test]
fn malformed_datagrams_are_dropped_silently() {
    let (sim, sim_addr) = sim_socket();
    let client = DatarefClient::connect(
        subscriptions(&["sim/test/alpha"]),
        static_options(sim_addr),
    )
    .expect("connect");
    let changes_rx = client.change_stream();

    let (_, client_addr) = collect_subscribes(&sim, 1);

    // Wrong magic, then a truncated pair, then garbage
    sim.send_to(b"XXXX\0junk", client_addr).expect("send");
    let mut truncated = encode_update(&[(0, 1.0)]);
    truncated.truncate(truncated.len() - 3);
    sim.send_to(&truncated, client_addr).expect("send");
    sim.send_to(&[0u8; 3], client_addr).expect("send");

    // The stream stays alive: a valid update still comes through
    sim.send_to(&encode_update(&[(0, 9.0)]), client_addr)
        .expect("send valid");
    let changes = changes_rx.recv_timeout(WAIT).expect("valid update applied");
    assert_eq!(
        changes.get("sim/test/alpha"),
        Some(&DatarefValue::Scalar(9.0))
    );
}

#[test]
fn set_value_and_commands_are_fire_and_forget() {
    let (sim, sim_addr) = sim_socket();
    let client = DatarefClient::connect(
        subscriptions(&["sim/test/alpha"]),
        static_options(sim_addr),
    )
    .expect("connect");

    let (_, _) = collect_subscribes(&sim, 1);

    client
        .set_value("sim/test/knob", 42.0)
        .expect("set_value sends");
    client
        .execute_command("sim/test/button")
        .expect("execute sends");
    client
        .start_position(&StartPosition::Ramp {
            airport: "LFPO".into(),
            ramp_index: 4,
        })
        .expect("preset sends");

    let deadline = Instant::now() + WAIT;
    let mut buf = [0u8; 2048];
    let mut saw_set = false;
    let mut saw_cmd = false;
    let mut saw_preset = false;
    while (!saw_set || !saw_cmd || !saw_preset) && Instant::now() < deadline {
        match sim.recv_from(&mut buf) {
            Ok((len, _)) => match &buf[..4] {
                b"DREF" => {
                    assert_eq!(len, 509);
                    let value = f32::from_le_bytes(buf[5..9].try_into().unwrap());
                    assert_eq!(value, 42.0);
                    assert_eq!(&buf[9..22], b"sim/test/knob");
                    saw_set = true;
                }
                b"CMND" => {
                    assert_eq!(len, 505);
                    assert_eq!(&buf[5..20], b"sim/test/button");
                    saw_cmd = true;
                }
                b"PREL" => {
                    assert_eq!(len, 69);
                    assert_eq!(&buf[5..9], &10i32.to_le_bytes());
                    assert_eq!(&buf[13..17], b"LFPO");
                    saw_preset = true;
                }
                b"RREF" => {} // periodic resubscribe noise is fine
                other => panic!("unexpected datagram magic {:?}", other),
            },
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => panic!("recv failed: {}", e),
        }
    }
    assert!(saw_set, "set-value datagram never arrived");
    assert!(saw_cmd, "command datagram never arrived");
    assert!(saw_preset, "position preset never arrived");
}

#[test]
fn shutdown_unsubscribes_every_key() {
    let (sim, sim_addr) = sim_socket();
    let mut client = DatarefClient::connect(
        subscriptions(&["sim/test/alpha", "sim/test/bravo"]),
        static_options(sim_addr),
    )
    .expect("connect");

    let (_, _) = collect_subscribes(&sim, 2);
    client.shutdown();

    let deadline = Instant::now() + WAIT;
    let mut buf = [0u8; 2048];
    let mut cancelled = std::collections::HashSet::new();
    while cancelled.len() < 2 && Instant::now() < deadline {
        match sim.recv_from(&mut buf) {
            Ok((len, _)) => {
                let sub = parse_subscribe(&buf[..len]);
                if sub.interval == 0 {
                    cancelled.insert(sub.index);
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => panic!("recv failed: {}", e),
        }
    }
    assert_eq!(cancelled.len(), 2, "expected interval-0 requests for both keys");
}

#[test]
fn offline_client_reads_unknown_and_never_panics() {
    // No simulator on a private multicast group: discovery keeps cycling
    // while callers see the unknown sentinel and offline errors.
    let client = DatarefClient::connect(
        subscriptions(&["sim/test/alpha"]),
        ClientOptions {
            endpoint: None,
            multicast_group: Ipv4Addr::new(239, 255, 77, 1),
            multicast_port: 49801,
            ..ClientOptions::default()
        },
    )
    .expect("connect without simulator");

    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        assert_eq!(client.get_value("sim/test/alpha"), None);
        assert!(matches!(
            client.set_value("sim/test/alpha", 1.0),
            Err(Error::SimulatorOffline)
        ));
        assert!(client.endpoint().is_none());
        std::thread::sleep(Duration::from_millis(200));
    }
}

/// Beacon datagram as the real simulator multicasts it.
fn encode_beacon(port: u16) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"BECN\0");
    buf.push(1); // major
    buf.push(2); // minor
    buf.extend_from_slice(&1i32.to_le_bytes()); // host id
    buf.extend_from_slice(&120105i32.to_le_bytes()); // build
    buf.extend_from_slice(&1u32.to_le_bytes()); // role
    buf.extend_from_slice(&port.to_le_bytes());
    buf.extend_from_slice(b"testhost\0");
    buf.extend_from_slice(&49010u16.to_le_bytes());
    buf
}

/// Multicast a simulator beacon a few times, covering the discovery poll
/// windows the way the real once-per-second announcement does.
fn announce(group: Ipv4Addr, port: u16, sim_port: u16) {
    let tx = UdpSocket::bind("127.0.0.1:0").expect("beacon sender");
    tx.set_multicast_loop_v4(true).expect("multicast loop");
    let beacon = encode_beacon(sim_port);
    for _ in 0..8 {
        tx.send_to(&beacon, (group, port)).expect("send beacon");
        std::thread::sleep(Duration::from_millis(500));
    }
}

#[test]
fn discovery_and_restart_renegotiate_subscriptions() {
    let group = Ipv4Addr::new(239, 255, 77, 2);
    let port = 49802;

    let client = DatarefClient::connect(
        subscriptions(&["sim/test/alpha", "sim/test/bravo"]),
        ClientOptions {
            endpoint: None,
            multicast_group: group,
            multicast_port: port,
            ..ClientOptions::default()
        },
    )
    .expect("connect with discovery");

    // First simulator instance announces itself
    let (sim1, sim1_addr) = sim_socket();
    let sim1_port = sim1_addr.port();
    let announcer = std::thread::spawn(move || announce(group, port, sim1_port));
    let (subs1, client_addr) = collect_subscribes(&sim1, 2);
    announcer.join().expect("announcer");
    assert_eq!(subs1[0].name, "sim/test/alpha");
    assert_eq!(subs1[1].name, "sim/test/bravo");

    sim1.send_to(&encode_update(&[(0, 1.0), (1, 2.0)]), client_addr)
        .expect("first values");
    let deadline = Instant::now() + WAIT;
    while client.get_value("sim/test/alpha") != Some(DatarefValue::Scalar(1.0)) {
        assert!(Instant::now() < deadline, "first values never cached");
        std::thread::sleep(Duration::from_millis(50));
    }

    // Simulator "restarts" on a new port; the next beacon moves the
    // endpoint and the client renegotiates the identical assignments.
    // Bind the new socket before dropping the old one so the port differs.
    let (sim2, sim2_addr) = sim_socket();
    drop(sim1);
    let sim2_port = sim2_addr.port();
    let announcer = std::thread::spawn(move || announce(group, port, sim2_port));
    let (subs2, client_addr2) = collect_subscribes(&sim2, 2);
    announcer.join().expect("announcer");
    assert_eq!(subs2[0].index, 0);
    assert_eq!(subs2[0].name, "sim/test/alpha");
    assert_eq!(subs2[1].index, 1);
    assert_eq!(subs2[1].name, "sim/test/bravo");

    // Values stayed frozen through the outage, then resume
    assert_eq!(
        client.get_value("sim/test/alpha"),
        Some(DatarefValue::Scalar(1.0))
    );
    sim2.send_to(&encode_update(&[(0, 10.0)]), client_addr2)
        .expect("fresh values");
    let deadline = Instant::now() + WAIT;
    while client.get_value("sim/test/alpha") != Some(DatarefValue::Scalar(10.0)) {
        assert!(Instant::now() < deadline, "fresh values never cached");
        std::thread::sleep(Duration::from_millis(50));
    }
}
