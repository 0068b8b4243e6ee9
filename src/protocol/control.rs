//! Control-channel message encoding and update decoding.
//!
//! Request datagrams (client → simulator):
//!
//! ```text
//! Subscribe:  "RREF" pad  interval:i32  wire-index:i32  name[400]
//! Set value:  "DREF" pad  value:f32                     name[500]
//! Execute:    "CMND" pad                                name[500]
//! Preset:     "PREL" pad  kind:i32 acf:i32 airport[8] loc:i32 dir:i32 f64×5
//! ```
//!
//! Update datagrams (simulator → client):
//!
//! ```text
//! "RREF" pad  (wire-index:i32, value:f32)*
//! ```
//!
//! Names are zero-padded into their fixed field; a name that does not fit is
//! a configuration error, never a silent truncation. The subscribe interval
//! is the requested updates-per-second; interval 0 cancels the subscription.

use super::{NAME_FIELD_LEN, SUBSCRIBE_NAME_LEN};
use crate::error::{Error, Result};

const MAGIC_SUBSCRIBE: &[u8; 4] = b"RREF";
const MAGIC_SET_VALUE: &[u8; 4] = b"DREF";
const MAGIC_COMMAND: &[u8; 4] = b"CMND";
const MAGIC_PRESET: &[u8; 4] = b"PREL";

/// Update header: magic(4) + pad(1)
const UPDATE_HEADER_LEN: usize = 5;

/// Width of one (wire-index, value) pair in an update datagram
const PAIR_LEN: usize = 8;

/// Airport identifier field width in preset requests
const AIRPORT_ID_LEN: usize = 8;

/// Pad a name into a fixed-width field, rejecting names that do not fit.
fn put_name(buf: &mut Vec<u8>, name: &str, width: usize) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() > width {
        return Err(Error::NameTooLong {
            name: name.to_string(),
            limit: width,
        });
    }
    buf.extend_from_slice(bytes);
    buf.resize(buf.len() + (width - bytes.len()), 0);
    Ok(())
}

/// Encode a subscribe request for one dataref.
///
/// `interval` is the requested update frequency per second; 0 unsubscribes.
pub fn encode_subscribe(interval: i32, wire_index: i32, name: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(13 + SUBSCRIBE_NAME_LEN);
    buf.extend_from_slice(MAGIC_SUBSCRIBE);
    buf.push(0);
    buf.extend_from_slice(&interval.to_le_bytes());
    buf.extend_from_slice(&wire_index.to_le_bytes());
    put_name(&mut buf, name, SUBSCRIBE_NAME_LEN)?;
    Ok(buf)
}

/// Encode a set-value request.
pub fn encode_set_value(name: &str, value: f32) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(9 + NAME_FIELD_LEN);
    buf.extend_from_slice(MAGIC_SET_VALUE);
    buf.push(0);
    buf.extend_from_slice(&value.to_le_bytes());
    put_name(&mut buf, name, NAME_FIELD_LEN)?;
    Ok(buf)
}

/// Encode a command-execute request.
pub fn encode_command(name: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(5 + NAME_FIELD_LEN);
    buf.extend_from_slice(MAGIC_COMMAND);
    buf.push(0);
    put_name(&mut buf, name, NAME_FIELD_LEN)?;
    Ok(buf)
}

/// Where to place the user aircraft with a position-preset request.
#[derive(Debug, Clone, PartialEq)]
pub enum StartPosition {
    /// On a runway threshold, by runway index and direction within the
    /// airport's runway table
    Runway {
        airport: String,
        runway_index: i32,
        runway_direction: i32,
    },
    /// At a parking ramp, by ramp index within the airport's ramp table
    Ramp { airport: String, ramp_index: i32 },
}

/// Preset kind discriminants on the wire
const PRESET_KIND_RAMP: i32 = 10;
const PRESET_KIND_RUNWAY: i32 = 11;

/// Encode a position-preset request.
///
/// The trailing five doubles are (latitude, longitude, elevation, heading,
/// speed); location presets leave them at the simulator's defaults except
/// the heading flag.
pub fn encode_position(position: &StartPosition) -> Result<Vec<u8>> {
    let (kind, airport, location_index, direction) = match position {
        StartPosition::Runway {
            airport,
            runway_index,
            runway_direction,
        } => (PRESET_KIND_RUNWAY, airport, *runway_index, *runway_direction),
        StartPosition::Ramp {
            airport,
            ramp_index,
        } => (PRESET_KIND_RAMP, airport, *ramp_index, 0),
    };

    let mut buf = Vec::with_capacity(13 + AIRPORT_ID_LEN + 8 + 40);
    buf.extend_from_slice(MAGIC_PRESET);
    buf.push(0);
    buf.extend_from_slice(&kind.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes()); // user aircraft
    put_name(&mut buf, airport, AIRPORT_ID_LEN)?;
    buf.extend_from_slice(&location_index.to_le_bytes());
    buf.extend_from_slice(&direction.to_le_bytes());
    for v in [0.0f64, 0.0, 0.0, 1.0, 0.0] {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    Ok(buf)
}

/// Decode a value-update datagram into its (wire-index, value) pairs.
///
/// Rejects datagrams shorter than the header, wrong magic, and payloads
/// that are not an exact multiple of the pair width: a truncated pair means
/// the datagram is malformed, and accepting the leading pairs would let a
/// corrupt packet update the cache.
pub fn decode_update(datagram: &[u8]) -> Result<Vec<(i32, f32)>> {
    if datagram.len() < UPDATE_HEADER_LEN {
        return Err(Error::InvalidPacket(format!(
            "update too short: {} bytes",
            datagram.len()
        )));
    }
    if &datagram[..4] != MAGIC_SUBSCRIBE {
        return Err(Error::InvalidPacket("bad update magic".into()));
    }

    let payload = &datagram[UPDATE_HEADER_LEN..];
    if payload.len() % PAIR_LEN != 0 {
        return Err(Error::InvalidPacket(format!(
            "update payload of {} bytes is not a whole number of pairs",
            payload.len()
        )));
    }

    let mut pairs = Vec::with_capacity(payload.len() / PAIR_LEN);
    for chunk in payload.chunks_exact(PAIR_LEN) {
        let index = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let value = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        pairs.push((index, value));
    }
    Ok(pairs)
}

/// Encode a value-update datagram. Used by tests and protocol fakes; the
/// live simulator is the only producer in the field.
pub fn encode_update(pairs: &[(i32, f32)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(UPDATE_HEADER_LEN + pairs.len() * PAIR_LEN);
    buf.extend_from_slice(MAGIC_SUBSCRIBE);
    buf.push(0);
    for (index, value) in pairs {
        buf.extend_from_slice(&index.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}
