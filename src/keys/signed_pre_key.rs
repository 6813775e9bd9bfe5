use crate::keys::generate_random_seed;
use crate::{Error, IdentityKey, X25519PublicKey, X25519Secret};
use ed25519_dalek::Signature;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A medium-term signed pre-key as defined in Signal's X3DH protocol.
///
/// Signed pre-keys are signed with the identity key and rotated periodically.
/// Ids increase monotonically per device, so a newer key always has a larger id.
#[derive(Clone)]
pub struct SignedPreKey {
    pre_key: X25519Secret,
    id: u32,
    created_at: SystemTime,
}

impl SignedPreKey {
    /// Creates a new signed pre-key with the given ID.
    pub fn new(id: u32) -> Result<Self, Error> {
        let seed = generate_random_seed()?;

        Ok(Self {
            pre_key: X25519Secret::from(*seed),
            id,
            created_at: SystemTime::now(),
        })
    }

    /// Returns the public component of this signed pre-key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.pre_key.public_key()
    }

    pub(crate) fn key_pair(&self) -> X25519Secret {
        self.pre_key.clone()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// When this key was generated.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.pre_key.dh(public_key)
    }

    /// Signs the public half with the identity key.
    pub fn signature(&self, identity_key: &IdentityKey) -> Signature {
        identity_key.sign(self.public_key().as_bytes())
    }

    /// Serializes the signed pre-key to a 44-byte array.
    ///
    /// The format is:
    /// - 4 bytes: ID (big-endian u32)
    /// - 8 bytes: creation time in seconds since the unix epoch (big-endian u64)
    /// - 32 bytes: X25519 private key
    pub fn to_bytes(&self) -> [u8; 44] {
        let created = self
            .created_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut result = [0u8; 44];
        result[0..4].copy_from_slice(&self.id.to_be_bytes());
        result[4..12].copy_from_slice(&created.to_be_bytes());
        result[12..].copy_from_slice(self.pre_key.as_bytes());

        result
    }
}

impl From<[u8; 44]> for SignedPreKey {
    fn from(mut bytes: [u8; 44]) -> Self {
        let mut id_bytes = [0u8; 4];
        id_bytes.copy_from_slice(&bytes[0..4]);

        let mut created_bytes = [0u8; 8];
        created_bytes.copy_from_slice(&bytes[4..12]);
        let created_at = UNIX_EPOCH + Duration::from_secs(u64::from_be_bytes(created_bytes));

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&bytes[12..]);
        let pre_key = X25519Secret::from(key_bytes);

        key_bytes.zeroize();
        bytes.zeroize();

        Self {
            pre_key,
            id: u32::from_be_bytes(id_bytes),
            created_at,
        }
    }
}

impl Zeroize for SignedPreKey {
    fn zeroize(&mut self) {
        self.pre_key.zeroize();
        self.id = 0;
    }
}

impl ZeroizeOnDrop for SignedPreKey {}

/// Signed pre-keys of the local device.
///
/// Exactly one key is current. Superseded keys stay available for decryption
/// until their scheduled expiry passes and [`SignedPreKeyStore::purge`] drops them.
pub struct SignedPreKeyStore {
    pub(crate) keys: HashMap<u32, SignedPreKey>,
    pub(crate) expiries: HashMap<u32, SystemTime>,
    pub(crate) current: u32,
    pub(crate) next_id: u32,
}

impl SignedPreKeyStore {
    /// Creates a store holding a single current key with id 1.
    pub fn new() -> Result<Self, Error> {
        Self::starting_at(1)
    }

    /// Creates a store whose first key gets `first_id`.
    ///
    /// Re-provisioned devices keep counting upwards so peers never see an id reused.
    pub fn starting_at(first_id: u32) -> Result<Self, Error> {
        let mut keys = HashMap::new();
        keys.insert(first_id, SignedPreKey::new(first_id)?);

        Ok(Self {
            keys,
            expiries: HashMap::new(),
            current: first_id,
            next_id: first_id.wrapping_add(1),
        })
    }

    /// Generates the next key without making it current.
    pub fn create(&mut self) -> Result<&SignedPreKey, Error> {
        let id = self.next_id;
        let key = SignedPreKey::new(id)?;
        self.next_id = self.next_id.wrapping_add(1);

        let key = self.keys.entry(id).or_insert(key);
        Ok(&*key)
    }

    /// Makes `id` the current key and returns the id it replaced.
    pub fn promote(&mut self, id: u32) -> Result<Option<u32>, Error> {
        if !self.keys.contains_key(&id) {
            return Err(Error::PreKey(format!("Unknown signed pre-key {id}")));
        }

        self.expiries.remove(&id);
        let previous = std::mem::replace(&mut self.current, id);

        Ok((previous != id).then_some(previous))
    }

    pub fn current(&self) -> Result<&SignedPreKey, Error> {
        self.keys
            .get(&self.current)
            .ok_or_else(|| Error::CorruptedKey("Current signed pre-key is missing".to_string()))
    }

    pub fn get(&self, id: u32) -> Option<&SignedPreKey> {
        self.keys.get(&id)
    }

    /// Schedules a superseded key for deletion at `at`.
    pub fn expire(&mut self, id: u32, at: SystemTime) -> Result<(), Error> {
        if id == self.current {
            return Err(Error::PreKey(
                "The current signed pre-key cannot expire".to_string(),
            ));
        }
        if self.keys.contains_key(&id) {
            self.expiries.insert(id, at);
        }

        Ok(())
    }

    /// Drops every superseded key whose expiry is not later than `now`.
    pub fn purge(&mut self, now: SystemTime) -> Vec<u32> {
        let expired: Vec<u32> = self
            .expiries
            .iter()
            .filter(|(id, at)| **id != self.current && **at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.expiries.remove(id);
            if let Some(mut key) = self.keys.remove(id) {
                key.zeroize();
            }
        }

        expired
    }

    /// Ids of every retained key, oldest first.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.keys.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn next_id(&self) -> u32 {
        self.next_id
    }
}

impl Zeroize for SignedPreKeyStore {
    fn zeroize(&mut self) {
        for (_, key) in self.keys.iter_mut() {
            key.zeroize();
        }
        self.keys.clear();
        self.expiries.clear();
    }
}

impl ZeroizeOnDrop for SignedPreKeyStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_pre_key_serialization() {
        let original_key = SignedPreKey::new(21).unwrap();
        let deserialized_key = SignedPreKey::from(original_key.to_bytes());

        assert_eq!(deserialized_key.id(), 21);
        assert_eq!(deserialized_key.public_key(), original_key.public_key());
        assert_eq!(
            deserialized_key
                .created_at()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs(),
            original_key
                .created_at()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs()
        );
    }

    #[test]
    fn test_signature_verifies_with_identity() {
        let identity_key = IdentityKey::new().unwrap();
        let pre_key = SignedPreKey::new(13).unwrap();

        let signature = pre_key.signature(&identity_key);
        assert!(
            identity_key
                .signing_key_public()
                .verify_strict(pre_key.public_key().as_bytes(), &signature)
                .is_ok()
        );
    }

    #[test]
    fn test_create_does_not_change_current() {
        let mut store = SignedPreKeyStore::new().unwrap();
        let created = store.create().unwrap().id();

        assert_eq!(store.current().unwrap().id(), 1);
        assert_eq!(created, 2);
        assert_eq!(store.promote(created).unwrap(), Some(1));
        assert_eq!(store.current().unwrap().id(), 2);
        assert_eq!(store.promote(created).unwrap(), None);
    }

    #[test]
    fn test_purge_only_drops_expired_superseded_keys() {
        let mut store = SignedPreKeyStore::new().unwrap();
        let second = store.create().unwrap().id();
        store.promote(second).unwrap();

        let now = SystemTime::now();
        store.expire(1, now + Duration::from_secs(60)).unwrap();
        assert!(store.purge(now).is_empty());
        assert!(store.get(1).is_some());

        assert_eq!(store.purge(now + Duration::from_secs(61)), vec![1]);
        assert!(store.get(1).is_none());
        assert!(store.expire(second, now).is_err());
    }
}
