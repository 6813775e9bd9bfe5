use crate::keys::generate_random_seed;
use crate::{Error, X25519PublicKey, X25519Secret};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Long-term identity key pair of one device.
///
/// Combines an Ed25519 signing key, used to sign pre-keys, with an X25519
/// key for the key agreement. Both halves are derived from one seed. The
/// identity only changes when the device is re-provisioned.
pub struct IdentityKey {
    signing_key: Box<SigningKey>,
    dh_key: X25519Secret,
}

impl IdentityKey {
    /// Creates a new identity key with randomly generated components.
    pub fn new() -> Result<Self, Error> {
        let mut seed = generate_random_seed()?;
        let signing_key = Box::new(SigningKey::from_bytes(&seed));
        let dh_key = X25519Secret::from(*seed);
        seed.zeroize();

        Ok(Self {
            signing_key,
            dh_key,
        })
    }

    /// Signs a message using the Ed25519 signing key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Returns the public Ed25519 signing key for this identity.
    pub fn signing_key_public(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Returns the public X25519 key for Diffie-Hellman operations.
    pub fn dh_key_public(&self) -> X25519PublicKey {
        self.dh_key.public_key()
    }

    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.dh_key.dh(public_key)
    }

    /// Serializes the identity key to a 64-byte array.
    ///
    /// The first 32 bytes contain the Ed25519 private key,
    /// and the last 32 bytes contain the X25519 private key.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(self.signing_key.as_bytes().as_slice());
        bytes[32..64].copy_from_slice(self.dh_key.as_bytes());

        bytes
    }
}

impl From<[u8; 64]> for IdentityKey {
    fn from(mut bytes: [u8; 64]) -> Self {
        let mut signing_bytes = [0u8; 32];
        signing_bytes.copy_from_slice(&bytes[0..32]);
        let signing_key = Box::new(SigningKey::from_bytes(&signing_bytes));

        let mut dh_bytes = [0u8; 32];
        dh_bytes.copy_from_slice(&bytes[32..64]);
        let dh_key = X25519Secret::from(dh_bytes);

        signing_bytes.zeroize();
        dh_bytes.zeroize();
        bytes.zeroize();

        Self {
            signing_key,
            dh_key,
        }
    }
}

impl Clone for IdentityKey {
    fn clone(&self) -> Self {
        Self::from(self.to_bytes())
    }
}

impl Zeroize for IdentityKey {
    fn zeroize(&mut self) {
        self.dh_key.zeroize();
    }
}

impl ZeroizeOnDrop for IdentityKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_and_verification() {
        let identity_key = IdentityKey::new().unwrap();
        let message = b"This is a test message";

        let signature = identity_key.sign(message);
        let verifying_key = identity_key.signing_key_public();
        assert!(verifying_key.verify_strict(message, &signature).is_ok());
        assert!(
            verifying_key
                .verify_strict(b"This is a modified message", &signature)
                .is_err()
        );
    }

    #[test]
    fn test_serialization_keeps_both_halves() {
        let original = IdentityKey::new().unwrap();
        let restored = IdentityKey::from(original.to_bytes());

        assert_eq!(original.dh_key_public(), restored.dh_key_public());
        assert_eq!(original.signing_key_public(), restored.signing_key_public());
    }
}
