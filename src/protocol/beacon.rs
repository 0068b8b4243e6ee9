//! Discovery beacon decoding.
//!
//! A running simulator announces itself by multicasting a beacon datagram
//! once per second:
//!
//! ```text
//! ┌───────────┬───────┬───────┬─────────┬─────────┬───────┬────────┬──────────┬─────────┐
//! │ "BECN\0"  │ major │ minor │ host id │ version │ role  │ port   │ hostname │ 2nd port│
//! │ 5 bytes   │ u8    │ u8    │ i32     │ i32     │ u32   │ u16    │ NUL-term │ u16     │
//! └───────────┴───────┴───────┴─────────┴─────────┴───────┴────────┴──────────┴─────────┘
//! ```
//!
//! The secondary port sits in the last two bytes of the datagram, after the
//! hostname. Only beacons with the expected protocol version (1.2) and host
//! role (the simulator itself, not an external visual) identify a usable
//! endpoint; everything else is discarded by the discovery loop.

use crate::error::{Error, Result};
use std::net::Ipv4Addr;

/// Multicast group the simulator announces on
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 1, 1);

/// Multicast port the simulator announces on
pub const MULTICAST_PORT: u16 = 49707;

/// Beacon magic header
pub const BEACON_MAGIC: &[u8; 5] = b"BECN\0";

/// Accepted beacon protocol major version
pub const BEACON_MAJOR: u8 = 1;

/// Accepted beacon protocol minor version
pub const BEACON_MINOR: u8 = 2;

/// Host-role id of the simulator application itself
pub const HOST_ID_SIMULATOR: i32 = 1;

/// Fixed-layout prefix: magic(5) + major(1) + minor(1) + host(4) +
/// version(4) + role(4) + port(2)
const FIXED_LEN: usize = 21;

/// A decoded discovery beacon.
#[derive(Debug, Clone, PartialEq)]
pub struct Beacon {
    pub major_version: u8,
    pub minor_version: u8,
    pub host_id: i32,
    pub simulator_version: i32,
    pub role: u32,
    /// Control-channel port on the announcing host
    pub port: u16,
    pub hostname: String,
    pub secondary_port: u16,
}

impl Beacon {
    /// Decode a beacon datagram.
    ///
    /// Returns `InvalidPacket` for a short datagram or wrong magic; version
    /// and role checks are left to [`Beacon::is_compatible`] so the caller
    /// can log what it rejected.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        if datagram.len() < FIXED_LEN + 2 {
            return Err(Error::InvalidPacket(format!(
                "beacon too short: {} bytes",
                datagram.len()
            )));
        }
        if &datagram[..5] != BEACON_MAGIC {
            return Err(Error::InvalidPacket("bad beacon magic".into()));
        }

        let major_version = datagram[5];
        let minor_version = datagram[6];
        let host_id = i32::from_le_bytes([datagram[7], datagram[8], datagram[9], datagram[10]]);
        let simulator_version =
            i32::from_le_bytes([datagram[11], datagram[12], datagram[13], datagram[14]]);
        let role = u32::from_le_bytes([datagram[15], datagram[16], datagram[17], datagram[18]]);
        let port = u16::from_le_bytes([datagram[19], datagram[20]]);

        let name_bytes = &datagram[FIXED_LEN..datagram.len() - 2];
        let name_end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_bytes.len());
        let hostname = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

        let tail = &datagram[datagram.len() - 2..];
        let secondary_port = u16::from_le_bytes([tail[0], tail[1]]);

        Ok(Self {
            major_version,
            minor_version,
            host_id,
            simulator_version,
            role,
            port,
            hostname,
            secondary_port,
        })
    }

    /// Whether this beacon announces a simulator we can talk to.
    pub fn is_compatible(&self) -> bool {
        self.major_version == BEACON_MAJOR
            && self.minor_version == BEACON_MINOR
            && self.host_id == HOST_ID_SIMULATOR
    }
}
