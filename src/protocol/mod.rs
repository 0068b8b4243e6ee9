//! Stateless codecs for the simulator's binary wire protocol.
//!
//! Two protocol surfaces:
//! - [`beacon`]: the multicast discovery announcement
//! - [`control`]: the UDP control channel (subscribe, set-value, execute,
//!   position preset, value updates)
//!
//! All multi-byte fields are little-endian. Encoders and decoders hold no
//! state; workers own the sockets.

pub mod beacon;
pub mod control;

pub use beacon::Beacon;
pub use control::StartPosition;

/// Name field width in subscribe requests
pub const SUBSCRIBE_NAME_LEN: usize = 400;

/// Name field width in set-value and command-execute requests
pub const NAME_FIELD_LEN: usize = 500;
