//! Framing and serialization for the session connection.
//!
//! Every message travels as a length-prefixed frame:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Big-endian u32   │ JSON or Postcard binary  │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! Two wire formats sit behind one [`Serializer`]: JSON for debuggability
//! and cross-language clients, Postcard for compact binary streaming. Both
//! ends must agree on the format; the frame layer does not negotiate it.
//!
//! Oversized frames close the connection; an undecodable payload is logged
//! and discarded while the connection stays open.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Maximum accepted frame payload (1 MB)
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Supported wire formats
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum WireFormat {
    /// Binary format using postcard - fast and compact
    Postcard,
    /// JSON format - human-readable for debugging
    #[default]
    Json,
}

/// Serializer that can handle both formats
#[derive(Clone, Copy)]
pub struct Serializer {
    format: WireFormat,
}

impl Serializer {
    /// Create a new serializer for the given format
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    /// Serialize a message to bytes
    pub fn serialize<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>> {
        match self.format {
            WireFormat::Postcard => {
                postcard::to_allocvec(msg).map_err(|e| Error::Serialization(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::to_vec(msg).map_err(|e| Error::Serialization(e.to_string()))
            }
        }
    }

    /// Deserialize bytes to a message
    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self.format {
            WireFormat::Postcard => {
                postcard::from_bytes(bytes).map_err(|e| Error::Serialization(e.to_string()))
            }
            WireFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
            }
        }
    }
}

/// Write one frame: length prefix plus payload.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame into `buf`, returning its payload length.
///
/// `Ok(None)` when the read timed out before a length prefix arrived, so a
/// polling reader can check its shutdown flag. A timeout mid-frame is an
/// error: the stream is out of sync and the connection must be dropped.
pub fn read_frame<R: Read>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<usize>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            return Ok(None);
        }
        Err(e) => return Err(Error::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::InvalidPacket(format!("frame too large: {} bytes", len)));
    }

    buf.clear();
    buf.resize(len, 0);
    reader.read_exact(buf)?;
    Ok(Some(len))
}
