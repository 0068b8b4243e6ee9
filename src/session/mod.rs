//! Session client: directory lookup plus a reconnecting value stream.
//!
//! The automation integration needs structured request/response (name → id
//! resolution) on top of a persistent stream of value batches. One TCP
//! connection carries both, framed per [`wire`].
//!
//! # Connection lifecycle
//!
//! ```text
//! OFFLINE ──connect──▶ RESYNCING ──directory + resubscribe──▶ READY
//!    ▲                                                          │
//!    └───────────────── backoff ◀──────── connection lost ──────┘
//! ```
//!
//! On every (re)connect the client discards all resolved ids, requests a
//! fresh directory, re-resolves its subscriptions, and re-subscribes before
//! declaring itself ready. Cached values are kept through the outage:
//! callers see last-known data while offline and live data resumes on its
//! own. `get_value` never errors; `resolve` answers `Ok(None)` for names
//! the simulator does not currently export.

pub mod messages;
pub mod wire;

use crate::core::types::{ChangeSet, DatarefKey, DatarefValue};
use crate::error::{Error, Result};
use crate::notify::{ChangeNotifier, ChangeObserver};
use crate::session::messages::{SessionReply, SessionRequest};
use crate::session::wire::{read_frame, write_frame, Serializer, WireFormat};
use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Read poll granularity on the stream
const READ_POLL: Duration = Duration::from_millis(500);

/// TCP connect attempt bound
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Which directory table a name lives in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NameKind {
    Dataref,
    Command,
}

/// Session connection options.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Server address, `host:port`
    pub address: String,
    /// Wire format both ends agreed on
    pub format: WireFormat,
    /// First reconnect delay; doubles per failed attempt
    pub initial_backoff: Duration,
    /// Reconnect delay cap
    pub max_backoff: Duration,
    /// How long `resolve` waits for a directory refresh
    pub resolve_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:49100".to_string(),
            format: WireFormat::Json,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            resolve_timeout: Duration::from_secs(2),
        }
    }
}

/// State behind the session lock.
#[derive(Default)]
struct SessionState {
    /// True only after directory + resubscribe completed on the live
    /// connection
    ready: bool,
    datarefs: HashMap<String, u64>,
    commands: HashMap<String, u64>,
    /// Reverse map for routing streamed updates
    dataref_names: HashMap<u64, String>,
    /// Last known values by name; kept across reconnects so callers read
    /// stale data rather than holes
    values: HashMap<String, DatarefValue>,
    /// Names to re-subscribe after every reconnect
    subscriptions: Vec<String>,
    /// Bumped on every directory reply; resolvers wait on this
    directory_epoch: u64,
}

struct SessionShared {
    state: Mutex<SessionState>,
    directory_cv: Condvar,
    writer: Mutex<Option<TcpStream>>,
    serializer: Serializer,
    notifier: ChangeNotifier,
    running: AtomicBool,
}

impl SessionShared {
    /// Serialize and send one request on the live connection.
    fn send_request(&self, request: &SessionRequest) -> Result<()> {
        let payload = self.serializer.serialize(request)?;
        let mut guard = self.writer.lock();
        let stream = guard.as_mut().ok_or(Error::SimulatorOffline)?;
        if let Err(e) = write_frame(stream, &payload) {
            // A dead writer means the reader will reconnect shortly; drop
            // our clone now so later sends fail fast
            *guard = None;
            return Err(e);
        }
        Ok(())
    }
}

/// Reconnecting directory + streaming client.
pub struct SessionClient {
    shared: Arc<SessionShared>,
    options: SessionOptions,
    worker: Option<JoinHandle<()>>,
}

impl SessionClient {
    /// Start the client. Returns immediately; the connection is established
    /// (and re-established) in the background.
    pub fn connect(options: SessionOptions) -> Result<Self> {
        let shared = Arc::new(SessionShared {
            state: Mutex::new(SessionState::default()),
            directory_cv: Condvar::new(),
            writer: Mutex::new(None),
            serializer: Serializer::new(options.format),
            notifier: ChangeNotifier::new(),
            running: AtomicBool::new(true),
        });

        let loop_shared = Arc::clone(&shared);
        let loop_options = options.clone();
        let worker = thread::Builder::new()
            .name("session".to_string())
            .spawn(move || connection_loop(loop_shared, loop_options))?;

        Ok(Self {
            shared,
            options,
            worker: Some(worker),
        })
    }

    /// Resolve a name to its server-assigned id.
    ///
    /// A cache miss triggers one directory refresh and waits, bounded, for
    /// the reply. `Ok(None)` when the name is not in the refreshed
    /// directory or the server is unreachable; never hangs, never errors
    /// for an unknown name.
    pub fn resolve(&self, name: &str, kind: NameKind) -> Result<Option<u64>> {
        let epoch_before = {
            let state = self.shared.state.lock();
            if let Some(&id) = table(&state, kind).get(name) {
                return Ok(Some(id));
            }
            state.directory_epoch
        };

        if self.shared.send_request(&SessionRequest::Directory).is_err() {
            log::info!("directory refresh unreachable, treating `{}` as unavailable", name);
            return Ok(None);
        }

        let mut state = self.shared.state.lock();
        let timed_out = self
            .shared
            .directory_cv
            .wait_while_for(
                &mut state,
                |s| s.directory_epoch == epoch_before,
                self.options.resolve_timeout,
            )
            .timed_out();
        if timed_out {
            log::debug!("directory refresh timed out resolving `{}`", name);
        }
        Ok(table(&state, kind).get(name).copied())
    }

    /// Last known value for a dataref name. Stale while offline or
    /// resyncing, `None` when never received; never an error.
    pub fn get_value(&self, name: &str) -> Option<DatarefValue> {
        self.shared.state.lock().values.get(name).cloned()
    }

    /// Add names to the streamed subscription set.
    ///
    /// Names resolvable right now are subscribed immediately; the rest (and
    /// everything again) are re-resolved and re-subscribed after every
    /// reconnect.
    pub fn subscribe(&self, names: &[&str]) -> Result<()> {
        let ids: Vec<u64> = {
            let mut state = self.shared.state.lock();
            for name in names {
                if !state.subscriptions.iter().any(|s| s == name) {
                    state.subscriptions.push(name.to_string());
                }
            }
            state
                .subscriptions
                .iter()
                .filter_map(|n| state.datarefs.get(n).copied())
                .collect()
        };

        if ids.is_empty() {
            return Ok(());
        }
        match self
            .shared
            .send_request(&SessionRequest::Subscribe { dataref_ids: ids })
        {
            Ok(()) => Ok(()),
            // Offline: the reconnect resync will subscribe for us
            Err(Error::SimulatorOffline) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Write a dataref by name. Fails fast with
    /// [`Error::SimulatorOffline`] while disconnected.
    pub fn set_value(&self, name: &str, value: DatarefValue) -> Result<()> {
        if self.shared.writer.lock().is_none() {
            return Err(Error::SimulatorOffline);
        }
        let id = self
            .resolve(name, NameKind::Dataref)?
            .ok_or_else(|| Error::UnknownName(name.to_string()))?;
        self.shared.send_request(&SessionRequest::SetValue {
            dataref_id: id,
            value,
        })
    }

    /// Activate a command by name, held for `duration` seconds. Fails fast
    /// with [`Error::SimulatorOffline`] while disconnected.
    pub fn execute_command(&self, name: &str, duration: f32) -> Result<()> {
        if self.shared.writer.lock().is_none() {
            return Err(Error::SimulatorOffline);
        }
        let id = self
            .resolve(name, NameKind::Command)?
            .ok_or_else(|| Error::UnknownName(name.to_string()))?;
        self.shared.send_request(&SessionRequest::Execute {
            command_id: id,
            duration,
        })
    }

    /// Whether the connection is up with directory and subscriptions
    /// re-established.
    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().ready
    }

    /// Register a callback observer for streamed change batches.
    pub fn add_observer(&self, observer: Box<dyn ChangeObserver>) {
        self.shared.notifier.add_observer(observer);
    }

    /// Channel of streamed change batches.
    pub fn change_stream(&self) -> Receiver<ChangeSet> {
        self.shared.notifier.subscribe_channel()
    }

    /// Stop the connection worker and join it.
    pub fn shutdown(&mut self) {
        if !self.shared.running.swap(false, Ordering::Relaxed) {
            return;
        }
        self.shared.directory_cv.notify_all();
        *self.shared.writer.lock() = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("session thread panicked");
            }
        }
        log::info!("session client stopped");
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn table(state: &SessionState, kind: NameKind) -> &HashMap<String, u64> {
    match kind {
        NameKind::Dataref => &state.datarefs,
        NameKind::Command => &state.commands,
    }
}

/// Sleep in slices so shutdown is observed mid-backoff.
fn sleep_while_running(shared: &SessionShared, total: Duration) {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while shared.running.load(Ordering::Relaxed) && remaining > Duration::ZERO {
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining -= step;
    }
}

/// Outer connect/reconnect loop with exponential backoff.
fn connection_loop(shared: Arc<SessionShared>, options: SessionOptions) {
    let mut backoff = options.initial_backoff;

    while shared.running.load(Ordering::Relaxed) {
        let stream = match open_stream(&options.address) {
            Ok(stream) => stream,
            Err(e) => {
                log::debug!("session connect to {} failed: {}", options.address, e);
                sleep_while_running(&shared, backoff);
                backoff = (backoff * 2).min(options.max_backoff);
                continue;
            }
        };
        backoff = options.initial_backoff;

        match serve_connection(&shared, stream) {
            Ok(()) => log::info!("session connection closed"),
            Err(e) => log::info!("session connection lost: {}", e),
        }

        *shared.writer.lock() = None;
        shared.state.lock().ready = false;
    }
    log::debug!("session thread exiting");
}

fn open_stream(address: &str) -> Result<TcpStream> {
    let addr = address
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Config(format!("cannot resolve session address `{}`", address)))?;
    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    stream.set_read_timeout(Some(READ_POLL))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Resync then process inbound frames until disconnect or shutdown.
///
/// Inbound processing is one sequential loop: update batches are applied in
/// exactly the order received.
fn serve_connection(shared: &Arc<SessionShared>, mut stream: TcpStream) -> Result<()> {
    log::info!("session connected, resyncing");

    // Ids from the previous session are meaningless now; drop them before
    // anything can resolve against the new connection
    {
        let mut state = shared.state.lock();
        state.ready = false;
        state.datarefs.clear();
        state.commands.clear();
        state.dataref_names.clear();
    }

    *shared.writer.lock() = Some(stream.try_clone()?);
    shared.send_request(&SessionRequest::Directory)?;

    let mut buf = Vec::new();
    while shared.running.load(Ordering::Relaxed) {
        let len = match read_frame(&mut stream, &mut buf)? {
            Some(len) => len,
            None => continue,
        };

        match shared.serializer.deserialize::<SessionReply>(&buf[..len]) {
            Ok(reply) => handle_reply(shared, reply),
            Err(e) => log::warn!("discarding undecodable session frame: {}", e),
        }
    }
    Ok(())
}

fn handle_reply(shared: &Arc<SessionShared>, reply: SessionReply) {
    match reply {
        SessionReply::Directory { datarefs, commands } => {
            let subscription_ids: Vec<u64> = {
                let mut state = shared.state.lock();
                state.dataref_names = datarefs.iter().map(|e| (e.id, e.name.clone())).collect();
                state.datarefs = datarefs.into_iter().map(|e| (e.name, e.id)).collect();
                state.commands = commands.into_iter().map(|e| (e.name, e.id)).collect();
                state.directory_epoch += 1;
                log::info!(
                    "directory: {} datarefs, {} commands",
                    state.datarefs.len(),
                    state.commands.len()
                );

                for name in &state.subscriptions {
                    if !state.datarefs.contains_key(name) {
                        log::warn!("subscription `{}` not in directory", name);
                    }
                }
                state
                    .subscriptions
                    .iter()
                    .filter_map(|n| state.datarefs.get(n).copied())
                    .collect()
            };
            shared.directory_cv.notify_all();

            if !subscription_ids.is_empty() {
                if let Err(e) = shared.send_request(&SessionRequest::Subscribe {
                    dataref_ids: subscription_ids,
                }) {
                    log::warn!("re-subscribe failed: {}", e);
                    return;
                }
            }

            shared.state.lock().ready = true;
            log::info!("session ready");
        }
        SessionReply::Values { updates } => {
            let changes = {
                let mut state = shared.state.lock();
                let mut changes = ChangeSet::new();
                for update in updates {
                    let name = match state.dataref_names.get(&update.id) {
                        Some(name) => name.clone(),
                        None => {
                            log::warn!("value for unknown id {}, skipping", update.id);
                            continue;
                        }
                    };
                    if state.values.get(&name) != Some(&update.value) {
                        match DatarefKey::parse(&name) {
                            Ok(key) => changes.insert(key, update.value.clone()),
                            Err(e) => {
                                log::warn!("directory name `{}` unusable as key: {}", name, e)
                            }
                        }
                    }
                    state.values.insert(name, update.value);
                }
                changes
            };
            shared.notifier.notify(&changes);
        }
    }
}
