//! Error types for vayu-link

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// vayu-link error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed datagram or frame
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Malformed dataref key string
    #[error("Invalid dataref key `{0}`: {1}")]
    InvalidKey(String, String),

    /// Dataref or command name does not fit the fixed wire field
    #[error("Name exceeds {limit}-byte wire field: {name}")]
    NameTooLong {
        /// The offending name
        name: String,
        /// Field width in bytes
        limit: usize,
    },

    /// No simulator endpoint is currently known
    #[error("Simulator offline")]
    SimulatorOffline,

    /// Name not present in the simulator's directory
    #[error("Name unknown to simulator: {0}")]
    UnknownName(String),

    /// Waited too long for a response
    #[error("Communication timeout")]
    Timeout,

    /// Session wire serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration file or value error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
