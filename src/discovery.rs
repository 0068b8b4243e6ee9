//! Beacon discovery: finding the simulator on the local network.
//!
//! The listener joins the fixed multicast group and waits, bounded, for one
//! well-formed beacon. Datagrams with a wrong magic, version, or host role
//! are logged and discarded without ending the wait. Discovery timing out is
//! the expected steady state whenever no simulator is running; the client's
//! discovery worker just tries again a second later.

use crate::error::{Error, Result};
use crate::protocol::beacon::{Beacon, MULTICAST_GROUP, MULTICAST_PORT};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// How long one discovery attempt waits for a beacon
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause between discovery attempts
pub const DISCOVERY_RETRY: Duration = Duration::from_secs(1);

/// Socket poll granularity inside one attempt, so shutdown is observed
/// promptly even mid-wait
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A discovered simulator: where beacons said to send control datagrams.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscoveredEndpoint {
    pub addr: SocketAddr,
}

/// Multicast listener for discovery beacons.
pub struct BeaconListener {
    socket: UdpSocket,
}

impl BeaconListener {
    /// Join the standard discovery group.
    pub fn bind() -> Result<Self> {
        Self::bind_group(MULTICAST_GROUP, MULTICAST_PORT)
    }

    /// Join a specific group/port (configurable for test rigs).
    pub fn bind_group(group: Ipv4Addr, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        log::info!("listening for beacons on {}:{}", group, port);
        Ok(Self { socket })
    }

    #[cfg(test)]
    fn from_socket(socket: UdpSocket) -> Result<Self> {
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        Ok(Self { socket })
    }

    /// Wait up to `timeout` for one compatible beacon.
    ///
    /// Returns the announced control endpoint: the beacon sender's address
    /// with the port carried inside the beacon. `Error::Timeout` when no
    /// compatible beacon arrived in time.
    pub fn wait_for_beacon(&self, timeout: Duration) -> Result<(Beacon, DiscoveredEndpoint)> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 2048];

        while Instant::now() < deadline {
            let (len, sender) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => return Err(Error::Io(e)),
            };

            let beacon = match Beacon::decode(&buf[..len]) {
                Ok(beacon) => beacon,
                Err(e) => {
                    log::info!("discarding malformed beacon from {}: {}", sender, e);
                    continue;
                }
            };

            if !beacon.is_compatible() {
                log::info!(
                    "discarding beacon from {} (version {}.{}, host id {})",
                    sender,
                    beacon.major_version,
                    beacon.minor_version,
                    beacon.host_id
                );
                continue;
            }

            let addr = SocketAddr::new(sender.ip(), beacon.port);
            return Ok((beacon, DiscoveredEndpoint { addr }));
        }

        Err(Error::Timeout)
    }
}
