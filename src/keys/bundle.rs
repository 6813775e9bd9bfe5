use crate::{Error, X25519PublicKey};
use ed25519_dalek::{Signature, VerifyingKey};
use std::collections::BTreeMap;

/// Everything a device advertises so that others can start sessions with it.
///
/// Published through the directory; each fetch hands out at most one of the
/// one-time pre-keys as a [`PreKeyBundle`].
#[derive(Clone, Debug)]
pub struct DeviceBundle {
    /// Public identity key for DH operations.
    pub identity: X25519PublicKey,
    /// Public verification key for the identity.
    pub signing_key: VerifyingKey,
    /// Current signed pre-key with its ID.
    pub signed_pre_key: (u32, X25519PublicKey),
    /// Signature over the signed pre-key.
    pub signature: Signature,
    /// All available one-time pre-keys.
    pub one_time_pre_keys: BTreeMap<u32, X25519PublicKey>,
}

impl DeviceBundle {
    /// Picks the bundle handed to one initiator.
    pub fn pre_key_bundle(&self, one_time_pre_key: Option<u32>) -> PreKeyBundle {
        PreKeyBundle {
            identity: self.identity,
            signing_key: self.signing_key,
            signed_pre_key: self.signed_pre_key,
            signature: self.signature,
            one_time_pre_key: one_time_pre_key
                .and_then(|id| self.one_time_pre_keys.get(&id).map(|key| (id, *key))),
        }
    }
}

/// The public keys needed to start a session with one remote device.
#[derive(Clone, Debug)]
pub struct PreKeyBundle {
    pub identity: X25519PublicKey,
    pub signing_key: VerifyingKey,
    pub signed_pre_key: (u32, X25519PublicKey),
    pub signature: Signature,
    pub one_time_pre_key: Option<(u32, X25519PublicKey)>,
}

impl PreKeyBundle {
    /// Verifies that the signed pre-key was signed by the bundle's identity.
    pub fn verify(&self) -> Result<(), Error> {
        self.signing_key
            .verify_strict(self.signed_pre_key.1.as_bytes(), &self.signature)
            .map_err(|err| Error::PreKey(err.to_string()))
    }

    /// Creates a bundle from raw byte arrays.
    pub fn try_from_bytes(
        identity: [u8; 32],
        signing_key: [u8; 32],
        signed_pre_key: (u32, [u8; 32]),
        signature: [u8; 64],
        one_time_pre_key: Option<(u32, [u8; 32])>,
    ) -> Result<Self, Error> {
        Ok(Self {
            identity: X25519PublicKey::from(identity),
            signing_key: VerifyingKey::from_bytes(&signing_key)
                .map_err(|err| Error::CorruptedKey(err.to_string()))?,
            signed_pre_key: (signed_pre_key.0, X25519PublicKey::from(signed_pre_key.1)),
            signature: Signature::from_bytes(&signature),
            one_time_pre_key: one_time_pre_key.map(|(id, key)| (id, X25519PublicKey::from(key))),
        })
    }
}
