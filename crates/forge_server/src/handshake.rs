//! Join handshake: build version and remote registry must match.

use forge_core::error::ProtocolError;
use forge_core::version::Version;

use crate::frame::Frame;

/// What this server expects from a joining client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Server build.
    pub version: Version,
    /// Server remote registry fingerprint.
    pub fingerprint: u64,
}

impl Handshake {
    /// Expectation for the given registry fingerprint at the current build.
    #[must_use]
    pub fn new(fingerprint: u64) -> Self {
        Self {
            version: Version::current(),
            fingerprint,
        }
    }

    /// The hello a compatible client sends.
    #[must_use]
    pub fn hello(&self) -> Frame {
        Frame::Hello {
            version: self.version.clone(),
            fingerprint: self.fingerprint,
        }
    }

    /// Check a client's hello.
    ///
    /// Revisions may differ; build numbers and registries may not.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::VersionMismatch`] or
    /// [`ProtocolError::RegistryMismatch`].
    pub fn verify(&self, version: &Version, fingerprint: u64) -> Result<(), ProtocolError> {
        if !self.version.compatible(version) {
            return Err(ProtocolError::VersionMismatch {
                local: self.version.to_string(),
                remote: version.to_string(),
            });
        }
        if self.fingerprint != fingerprint {
            return Err(ProtocolError::RegistryMismatch {
                local: self.fingerprint,
                remote: fingerprint,
            });
        }
        Ok(())
    }
}
