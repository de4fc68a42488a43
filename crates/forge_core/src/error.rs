//! Error types for the game simulation.

use thiserror::Error;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Faults raised by the remote-invocation layer.
///
/// These indicate client/server logic drift. They are reported to the
/// networking layer, which treats the offending connection as desynchronized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// No operation is registered under this identifier.
    #[error("Unknown remote operation id {0}")]
    UnknownOperation(u16),

    /// No operation is registered under this name.
    #[error("Unknown remote operation '{0}'")]
    UnknownOperationName(String),

    /// Argument list does not match the declared signature.
    #[error("Argument mismatch for '{operation}': {message}")]
    SignatureMismatch {
        /// Operation name.
        operation: &'static str,
        /// What was wrong.
        message: String,
    },

    /// A call arrived in a form its locality does not permit.
    #[error("Locality violation for '{operation}': {message}")]
    LocalityViolation {
        /// Operation name.
        operation: &'static str,
        /// What was wrong.
        message: String,
    },

    /// A remote message arrived on an instance with no peers.
    #[error("Received remote call while not connected")]
    NotConnected,

    /// A frame could not be decoded.
    #[error("Failed to decode remote message: {0}")]
    Decode(String),

    /// The handler refused a call that arrived from a peer.
    #[error("Remote call '{operation}' rejected: {message}")]
    Rejected {
        /// Operation name.
        operation: &'static str,
        /// Why.
        message: String,
    },

    /// Peer runs an incompatible build.
    #[error("Version mismatch: local build {local}, remote build {remote}")]
    VersionMismatch {
        /// Local build string.
        local: String,
        /// Remote build string.
        remote: String,
    },

    /// Peer has a different remote-operation registry.
    #[error("Remote registry mismatch: local {local:#018x}, remote {remote:#018x}")]
    RegistryMismatch {
        /// Local registry fingerprint.
        local: u64,
        /// Remote registry fingerprint.
        remote: u64,
    },
}

/// Top-level error type for all game simulation errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// Internal consistency was broken. Not recoverable.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A save or snapshot stream is malformed. Aborts the load.
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Remote-invocation fault.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Content id outside the loaded catalog.
    #[error("Unknown {kind} id {id}")]
    UnknownContent {
        /// Content kind ("item", "liquid", "block", ...).
        kind: &'static str,
        /// Offending id.
        id: u32,
    },

    /// Tile position outside the world.
    #[error("Tile ({x}, {y}) is out of bounds")]
    OutOfBounds {
        /// X coordinate.
        x: i32,
        /// Y coordinate.
        y: i32,
    },

    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path to the file that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),

    /// Underlying IO failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GameError {
    /// Whether this error must abort the current tick or load.
    ///
    /// Invariant and corruption faults are fatal. Protocol faults are
    /// connection-level and handled by the networking layer.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_) | Self::Corruption(_))
    }

    /// Whether this is a remote-invocation fault.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(GameError::InvariantViolation("x".into()).is_fatal());
        assert!(GameError::Corruption("x".into()).is_fatal());
        assert!(!GameError::InvalidState("x".into()).is_fatal());

        let protocol: GameError = ProtocolError::UnknownOperation(9).into();
        assert!(protocol.is_protocol());
        assert!(!protocol.is_fatal());
    }
}
