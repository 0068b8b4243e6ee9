//! Dataref client: discovery, subscription, and update processing.
//!
//! # Worker layout
//!
//! Three background threads run alongside caller operations:
//!
//! | Thread      | Duty                                                    |
//! |-------------|---------------------------------------------------------|
//! | `discovery` | waits for beacons, publishes the simulator endpoint     |
//! | `subscribe` | re-sends all subscriptions after every endpoint change  |
//! | `receive`   | decodes update datagrams, applies them, notifies        |
//!
//! Session lifecycle: `DISCOVERING → SUBSCRIBING → STREAMING`, back to
//! `DISCOVERING` on beacon loss. Wire-index assignments are renegotiated by
//! re-sending the full subscription set; the assignments themselves are
//! deterministic, so a reconnect reproduces the same index → key mapping.
//!
//! # Locking
//!
//! Endpoint, resubscribe flag, and the value table live behind one
//! coordinating mutex, so an update is applied atomically with respect to
//! `get_value` readers. The send path has its own lock and is shared by
//! callers and the subscribe worker. No path takes both locks at once.
//!
//! Callers never block on simulator availability: `get_value` is a cache
//! read, and the send operations are fire-and-forget datagrams that fail
//! fast with [`Error::SimulatorOffline`] while undiscovered.

use crate::core::cache::DatarefTable;
use crate::core::types::{ChangeSet, DatarefValue, Subscription};
use crate::discovery::{BeaconListener, DISCOVERY_RETRY, DISCOVERY_TIMEOUT};
use crate::error::{Error, Result};
use crate::notify::{ChangeNotifier, ChangeObserver};
use crate::protocol::beacon::{MULTICAST_GROUP, MULTICAST_PORT};
use crate::protocol::control;
use crate::protocol::StartPosition;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receive poll granularity, bounds how long shutdown can go unobserved
const RECV_POLL: Duration = Duration::from_millis(500);

/// Subscribe worker cadence
const SUBSCRIBE_CADENCE: Duration = Duration::from_secs(1);

/// Client connection options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Requested update frequency per subscribed dataref, per second
    pub refresh_hz: i32,
    /// Static simulator endpoint; set to skip multicast discovery when the
    /// simulator's address is already known
    pub endpoint: Option<SocketAddr>,
    /// Discovery multicast group
    pub multicast_group: Ipv4Addr,
    /// Discovery multicast port
    pub multicast_port: u16,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            refresh_hz: 3,
            endpoint: None,
            multicast_group: MULTICAST_GROUP,
            multicast_port: MULTICAST_PORT,
        }
    }
}

/// Shared mutable state behind the coordinating lock.
struct LinkState {
    endpoint: Option<SocketAddr>,
    resubscribe: bool,
    table: DatarefTable,
}

/// Record a discovered endpoint; arms resubscription when it is new or moved.
fn on_beacon(state: &mut LinkState, addr: SocketAddr) {
    if state.endpoint != Some(addr) {
        log::info!("simulator at {}", addr);
        state.endpoint = Some(addr);
        state.resubscribe = true;
    }
}

/// Record a discovery timeout: endpoint gone, resubscribe once one is back.
fn on_discovery_timeout(state: &mut LinkState) {
    if state.endpoint.is_some() {
        log::info!("simulator lost, resuming discovery");
    }
    state.endpoint = None;
    state.resubscribe = true;
}

struct Shared {
    state: Mutex<LinkState>,
    notifier: ChangeNotifier,
}

/// UDP dataref synchronization client.
///
/// Owns its worker threads; dropping the client (or calling
/// [`DatarefClient::shutdown`]) signals them, joins them, and sends
/// best-effort unsubscribe requests.
pub struct DatarefClient {
    shared: Arc<Shared>,
    sender: Arc<Mutex<UdpSocket>>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl DatarefClient {
    /// Start the client for a fixed set of subscriptions.
    ///
    /// Binds the control socket, spawns the workers, and returns
    /// immediately; values arrive once a simulator is discovered and the
    /// subscription round-trip completes.
    pub fn connect(
        subscriptions: Vec<Subscription>,
        options: ClientOptions,
    ) -> Result<DatarefClient> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        let recv_socket = socket.try_clone()?;
        recv_socket.set_read_timeout(Some(RECV_POLL))?;

        let mut table = DatarefTable::new();
        table.subscribe(subscriptions);
        log::info!("client starting with {} subscriptions", table.len());

        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState {
                endpoint: options.endpoint,
                resubscribe: true,
                table,
            }),
            notifier: ChangeNotifier::new(),
        });
        let sender = Arc::new(Mutex::new(socket));
        let running = Arc::new(AtomicBool::new(true));
        let mut workers = Vec::new();

        if options.endpoint.is_none() {
            let listener =
                BeaconListener::bind_group(options.multicast_group, options.multicast_port)?;
            workers.push(Self::spawn_discovery(
                listener,
                Arc::clone(&shared),
                Arc::clone(&running),
            )?);
        } else {
            log::info!("static endpoint {:?}, discovery disabled", options.endpoint);
        }

        workers.push(Self::spawn_subscriber(
            Arc::clone(&shared),
            Arc::clone(&sender),
            Arc::clone(&running),
            options.refresh_hz,
        )?);
        workers.push(Self::spawn_receiver(
            recv_socket,
            Arc::clone(&shared),
            Arc::clone(&running),
        )?);

        Ok(DatarefClient {
            shared,
            sender,
            running,
            workers,
        })
    }

    fn spawn_discovery(
        listener: BeaconListener,
        shared: Arc<Shared>,
        running: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("discovery".to_string())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    match listener.wait_for_beacon(DISCOVERY_TIMEOUT) {
                        Ok((_, endpoint)) => {
                            on_beacon(&mut shared.state.lock(), endpoint.addr);
                        }
                        Err(Error::Timeout) => {
                            log::debug!("no beacon within timeout");
                            on_discovery_timeout(&mut shared.state.lock());
                        }
                        Err(e) => {
                            log::error!("discovery receive failed: {}", e);
                        }
                    }
                    thread::sleep(DISCOVERY_RETRY);
                }
                log::debug!("discovery thread exiting");
            })?;
        Ok(handle)
    }

    fn spawn_subscriber(
        shared: Arc<Shared>,
        sender: Arc<Mutex<UdpSocket>>,
        running: Arc<AtomicBool>,
        refresh_hz: i32,
    ) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("subscribe".to_string())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    // Snapshot under the state lock, send outside it
                    let pending = {
                        let mut state = shared.state.lock();
                        match state.endpoint {
                            Some(endpoint) if state.resubscribe => {
                                state.resubscribe = false;
                                Some((endpoint, state.table.wire_entries()))
                            }
                            _ => None,
                        }
                    };

                    if let Some((endpoint, entries)) = pending {
                        log::info!("subscribing {} datarefs at {}", entries.len(), endpoint);
                        if let Err(e) =
                            send_subscriptions(&sender, endpoint, &entries, refresh_hz)
                        {
                            log::warn!("subscribe send failed: {}", e);
                            shared.state.lock().resubscribe = true;
                        }
                    }

                    thread::sleep(SUBSCRIBE_CADENCE);
                }
                log::debug!("subscribe thread exiting");
            })?;
        Ok(handle)
    }

    fn spawn_receiver(
        socket: UdpSocket,
        shared: Arc<Shared>,
        running: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("receive".to_string())
            .spawn(move || {
                let mut buf = [0u8; 2048];
                while running.load(Ordering::Relaxed) {
                    let len = match socket.recv_from(&mut buf) {
                        Ok((len, _)) => len,
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            log::error!("receive failed: {}", e);
                            thread::sleep(Duration::from_millis(10));
                            continue;
                        }
                    };

                    let pairs = match control::decode_update(&buf[..len]) {
                        Ok(pairs) => pairs,
                        Err(e) => {
                            log::debug!("dropping malformed datagram: {}", e);
                            continue;
                        }
                    };

                    // Resolve-round-compare-store under the coordinating
                    // lock; fan out after releasing it
                    let changes = shared.state.lock().table.apply_update(&pairs);
                    shared.notifier.notify(&changes);
                }
                log::debug!("receive thread exiting");
            })?;
        Ok(handle)
    }

    /// Last known value for a key, `None` until an update carried it.
    /// Non-blocking cache read.
    pub fn get_value(&self, key: &str) -> Option<DatarefValue> {
        self.shared.state.lock().table.get(key)
    }

    /// Write a dataref on the simulator. Fire-and-forget; the change comes
    /// back through the normal update stream.
    pub fn set_value(&self, name: &str, value: f32) -> Result<()> {
        let msg = control::encode_set_value(name, value)?;
        log::debug!("set {} = {}", name, value);
        self.send(&msg)
    }

    /// Invoke a named simulator command. Fire-and-forget.
    pub fn execute_command(&self, name: &str) -> Result<()> {
        let msg = control::encode_command(name)?;
        log::debug!("execute {}", name);
        self.send(&msg)
    }

    /// Reposition the user aircraft. Fire-and-forget.
    pub fn start_position(&self, position: &StartPosition) -> Result<()> {
        let msg = control::encode_position(position)?;
        log::info!("position preset: {:?}", position);
        self.send(&msg)
    }

    fn send(&self, msg: &[u8]) -> Result<()> {
        let endpoint = self
            .shared
            .state
            .lock()
            .endpoint
            .ok_or(Error::SimulatorOffline)?;
        self.sender.lock().send_to(msg, endpoint)?;
        Ok(())
    }

    /// Deliver the full cache in the next ChangeSet, regardless of change
    /// detection. For downstream consumers that lost their own state.
    pub fn mark_refresh(&self) {
        self.shared.state.lock().table.mark_refresh();
    }

    /// Register a callback observer for change batches.
    pub fn add_observer(&self, observer: Box<dyn ChangeObserver>) {
        self.shared.notifier.add_observer(observer);
    }

    /// Channel of change batches, one [`ChangeSet`] per inbound update that
    /// changed something.
    pub fn change_stream(&self) -> Receiver<ChangeSet> {
        self.shared.notifier.subscribe_channel()
    }

    /// Currently known simulator endpoint, if discovered.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.shared.state.lock().endpoint
    }

    /// Number of subscribed keys
    pub fn subscribed(&self) -> usize {
        self.shared.state.lock().table.len()
    }

    /// Number of keys with a known value
    pub fn known_values(&self) -> usize {
        self.shared.state.lock().table.known()
    }

    /// Stop the workers, join them, and unsubscribe.
    ///
    /// Every worker polls its socket with a bounded timeout, so the join
    /// completes within one poll interval of the flag being set. Sockets are
    /// only reclaimed afterwards, and the interval-0 unsubscribe requests go
    /// out last, best-effort.
    pub fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        log::info!("shutting down, joining workers");
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("worker thread panicked");
            }
        }

        let (endpoint, entries) = {
            let state = self.shared.state.lock();
            (state.endpoint, state.table.wire_entries())
        };
        if let Some(endpoint) = endpoint {
            for (index, name) in entries {
                match control::encode_subscribe(0, index, &name) {
                    Ok(msg) => {
                        if let Err(e) = self.sender.lock().send_to(&msg, endpoint) {
                            log::debug!("unsubscribe send failed: {}", e);
                            break;
                        }
                    }
                    Err(e) => log::debug!("unsubscribe encode failed: {}", e),
                }
            }
        }
        log::info!("client stopped");
    }
}

impl Drop for DatarefClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Send one subscribe request per entry at the given refresh rate.
fn send_subscriptions(
    sender: &Mutex<UdpSocket>,
    endpoint: SocketAddr,
    entries: &[(i32, String)],
    refresh_hz: i32,
) -> Result<()> {
    for (index, name) in entries {
        let msg = control::encode_subscribe(refresh_hz, *index, name)?;
        sender.lock().send_to(&msg, endpoint)?;
    }
    Ok(())
}
