use crate::cipher::KeyTransport;
use crate::keys::fill_random;
use crate::transport::TransportHints;
use crate::{DeviceAddress, Error};
use aes_gcm_siv::aead::{Aead, KeyInit, Payload as AeadPayload};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub(crate) const CONTENT_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Symmetric key of a single message. Generated fresh for every envelope.
pub struct ContentKey(Box<[u8; CONTENT_KEY_LEN]>);

impl ContentKey {
    pub fn generate() -> Result<Self, Error> {
        let mut key = Box::new([0u8; CONTENT_KEY_LEN]);
        fill_random(key.as_mut_slice())?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_KEY_LEN] {
        &self.0
    }

    /// Parses a key unwrapped from a key transport message.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let key: [u8; CONTENT_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("Unwrapped content key has the wrong length".to_string()))?;
        Ok(Self(Box::new(key)))
    }

    /// Encrypts `plaintext` under a fresh nonce, binding `sender` as associated data.
    pub fn seal(&self, plaintext: &[u8], sender: &DeviceAddress) -> Result<Payload, Error> {
        let mut nonce = [0u8; NONCE_LEN];
        fill_random(&mut nonce)?;

        let ciphertext = self.cipher()?.encrypt(
            Nonce::from_slice(&nonce),
            AeadPayload {
                msg: plaintext,
                aad: &sender.to_bytes(),
            },
        )?;

        Ok(Payload { nonce, ciphertext })
    }

    pub fn open(&self, payload: &Payload, sender: &DeviceAddress) -> Result<Vec<u8>, Error> {
        Ok(self.cipher()?.decrypt(
            Nonce::from_slice(&payload.nonce),
            AeadPayload {
                msg: &payload.ciphertext,
                aad: &sender.to_bytes(),
            },
        )?)
    }

    fn cipher(&self) -> Result<Aes256GcmSiv, Error> {
        Aes256GcmSiv::new_from_slice(self.0.as_slice())
            .map_err(|_| Error::Crypto("Invalid content key length".to_string()))
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl ZeroizeOnDrop for ContentKey {}

/// The message body, encrypted once under the content key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// The content key wrapped for one recipient device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientKey {
    pub recipient: DeviceAddress,
    pub transport: KeyTransport,
}

/// Multi-recipient encrypted message: one payload plus one wrapped key per device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub sender: DeviceAddress,
    pub keys: Vec<RecipientKey>,
    pub payload: Payload,
    pub hints: TransportHints,
}

impl Envelope {
    /// The key segment addressed to `device`, if any.
    pub fn key_for(&self, device: &DeviceAddress) -> Option<&KeyTransport> {
        self.keys
            .iter()
            .find(|key| key.recipient == *device)
            .map(|key| &key.transport)
    }

    /// Every device the envelope carries a key for.
    pub fn recipients(&self) -> impl Iterator<Item = &DeviceAddress> {
        self.keys.iter().map(|key| &key.recipient)
    }
}
