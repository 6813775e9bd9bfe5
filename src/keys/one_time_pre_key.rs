use crate::keys::generate_random_seed;
use crate::{Error, X25519PublicKey, X25519Secret};
use std::collections::{BTreeMap, HashMap};
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A one-time pre-key as defined in Signal's X3DH protocol.
///
/// Consumed by the first session built on it; the store removes it once that
/// session has decrypted its first message, so it is never used twice.
#[derive(Clone)]
pub struct OneTimePreKey {
    pre_key: X25519Secret,
    id: u32,
}

impl OneTimePreKey {
    pub fn new(id: u32) -> Result<Self, Error> {
        let seed = generate_random_seed()?;

        Ok(Self {
            pre_key: X25519Secret::from(*seed),
            id,
        })
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.pre_key.public_key()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Diffie-Hellman with the initiator's ephemeral key. Consumes the key.
    pub(crate) fn dh(self, public_key: &X25519PublicKey) -> SharedSecret {
        self.pre_key.dh(public_key)
    }

    /// Serializes the one-time pre-key to a 36-byte array.
    ///
    /// The format is:
    /// - 4 bytes: ID (big-endian u32)
    /// - 32 bytes: X25519 private key
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut result = [0u8; 36];

        result[0..4].copy_from_slice(&self.id.to_be_bytes());
        result[4..].copy_from_slice(self.pre_key.as_bytes());

        result
    }
}

impl From<[u8; 36]> for OneTimePreKey {
    fn from(mut bytes: [u8; 36]) -> Self {
        let mut id_bytes = [0u8; 4];
        id_bytes.copy_from_slice(&bytes[0..4]);

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&bytes[4..]);
        let pre_key = X25519Secret::from(key_bytes);

        key_bytes.zeroize();
        bytes.zeroize();

        Self {
            pre_key,
            id: u32::from_be_bytes(id_bytes),
        }
    }
}

impl Zeroize for OneTimePreKey {
    fn zeroize(&mut self) {
        self.pre_key.zeroize();
        self.id = 0;
    }
}

impl ZeroizeOnDrop for OneTimePreKey {}

/// Pool of one-time pre-keys with automatic ID management.
pub struct OneTimePreKeyStore {
    pub(crate) keys: HashMap<u32, OneTimePreKey>,
    pub(crate) next_id: u32,
}

impl OneTimePreKeyStore {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first_id: u32) -> Self {
        Self {
            keys: HashMap::new(),
            next_id: first_id,
        }
    }

    /// Generates `count` new keys and returns their public halves.
    pub fn generate_keys(&mut self, count: usize) -> Result<BTreeMap<u32, X25519PublicKey>, Error> {
        let mut keys = BTreeMap::new();
        for _ in 0..count {
            let id = self.next_id;
            let key = OneTimePreKey::new(id)?;
            keys.insert(id, key.public_key());
            self.keys.insert(id, key);
            self.next_id = self.next_id.wrapping_add(1);
        }

        Ok(keys)
    }

    /// Tops the pool up to `target` keys, returning how many were generated.
    pub fn replenish(&mut self, target: usize) -> Result<usize, Error> {
        let needed = target.saturating_sub(self.keys.len());
        self.generate_keys(needed)?;
        Ok(needed)
    }

    /// Public halves of every key in the pool.
    pub fn public_keys(&self) -> BTreeMap<u32, X25519PublicKey> {
        self.keys
            .iter()
            .map(|(id, key)| (*id, key.public_key()))
            .collect()
    }

    pub fn get(&self, id: u32) -> Option<&OneTimePreKey> {
        self.keys.get(&id)
    }

    /// Removes a key from the pool for good.
    pub fn remove(&mut self, id: u32) -> bool {
        match self.keys.remove(&id) {
            Some(mut key) => {
                key.zeroize();
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn next_id(&self) -> u32 {
        self.next_id
    }
}

impl Default for OneTimePreKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Zeroize for OneTimePreKeyStore {
    fn zeroize(&mut self) {
        for (_, key) in self.keys.iter_mut() {
            key.zeroize();
        }
        self.keys.clear();
    }
}

impl ZeroizeOnDrop for OneTimePreKeyStore {}
