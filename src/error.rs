use crate::DeviceAddress;
use std::collections::BTreeSet;

/// Errors that can occur while encrypting, decrypting or managing keys.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// A cryptographic operation failed: corrupted ciphertext, bad MAC or an
    /// unknown key id. Not retryable with the same input.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// A protocol rule was violated.
    #[error("Protocol Violation: {0}")]
    Protocol(String),

    /// Session is in an invalid state.
    #[error("Session state error: {0}")]
    Session(String),

    /// Identity key operation failed.
    #[error("Identity key error: {0}")]
    Identity(String),

    /// Pre-key operation failed.
    #[error("Pre-key error: {0}")]
    PreKey(String),

    /// Random number generation failed.
    #[error("Random number generation failed")]
    Random,

    /// Serialization or deserialization failed.
    #[error("Serialization/deserialization failed: {0}")]
    Serde(String),

    /// Looking up the devices of an account failed or timed out.
    #[error("Device resolution failed: {0}")]
    Resolution(String),

    /// Encryption was blocked because these devices have no trust decision yet.
    #[error("Undecided trust for {} device(s)", rejected.len())]
    UndecidedTrust {
        /// Devices that must be decided (or explicitly allowed) before retrying.
        rejected: BTreeSet<DeviceAddress>,
    },

    /// The message was not addressed to this device, or there is no session
    /// and no key exchange to build one.
    #[error("No session with {0}")]
    NoSession(DeviceAddress),

    /// Stored key material could not be decoded.
    #[error("Corrupted key material: {0}")]
    CorruptedKey(String),

    /// A device presented an identity key different from the one on record.
    #[error("Identity key of {0} changed")]
    IdentityChanged(DeviceAddress),

    /// Publishing the bundle or the device list failed.
    #[error("Publishing failed: {0}")]
    Publish(String),

    /// The key/session store failed.
    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Resolution(_) | Self::Publish(_))
    }
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(value: aes_gcm_siv::Error) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(value: prost::DecodeError) -> Self {
        Self::CorruptedKey(value.to_string())
    }
}
