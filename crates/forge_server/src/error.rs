//! Error types for the dedicated server.

use forge_core::error::{GameError, ProtocolError};
use thiserror::Error;

/// Result type alias using [`ServerError`].
pub type Result<T> = std::result::Result<T, ServerError>;

/// Everything that can stop the server or drop a connection.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket or file failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The simulation failed.
    #[error("Simulation error: {0}")]
    Game(#[from] GameError),

    /// Server configuration could not be parsed.
    #[error("Config parse error in {path}: {message}")]
    Config {
        /// File or origin that failed.
        path: String,
        /// Parser message.
        message: String,
    },

    /// The map names content the catalog does not have.
    #[error("Map references unknown {kind} '{name}'")]
    UnknownMapContent {
        /// `block` or `floor`.
        kind: &'static str,
        /// Name as written.
        name: String,
    },

    /// A frame length prefix exceeds [`MAX_FRAME_LEN`](crate::frame::MAX_FRAME_LEN).
    #[error("Frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    /// A frame body could not be decoded.
    #[error("Malformed frame: {0}")]
    Frame(String),

    /// The peer sent something other than the expected frame.
    #[error("Unexpected frame: expected {expected}, got {got}")]
    UnexpectedFrame {
        /// What the session was waiting for.
        expected: &'static str,
        /// What arrived.
        got: &'static str,
    },

    /// The peer failed the version or registry check.
    #[error("Handshake rejected: {0}")]
    Handshake(#[from] ProtocolError),

    /// The peer did not say hello in time.
    #[error("Handshake timed out")]
    HandshakeTimeout,
}
