use super::Store;
use crate::{
    AccountId, DeviceAddress, Error, IdentityKey, OneTimePreKey, OneTimePreKeyStore,
    SessionRecord, SignedPreKey, SignedPreKeyStore, TrustRecord, X25519PublicKey,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use zeroize::Zeroize;

struct Inner {
    identity: IdentityKey,
    signed_pre_keys: SignedPreKeyStore,
    one_time_pre_keys: OneTimePreKeyStore,
    /// Sessions are kept encoded, as a persistent store would hold them.
    sessions: HashMap<DeviceAddress, Vec<u8>>,
    trust: HashMap<DeviceAddress, TrustRecord>,
}

/// In-memory [`Store`], for tests and short-lived clients.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Provisions a fresh identity with one signed pre-key and
    /// `one_time_pre_keys` one-time pre-keys.
    pub fn new(one_time_pre_keys: usize) -> Result<Self, Error> {
        let mut pool = OneTimePreKeyStore::new();
        pool.replenish(one_time_pre_keys)?;

        Ok(Self {
            inner: Mutex::new(Inner {
                identity: IdentityKey::new()?,
                signed_pre_keys: SignedPreKeyStore::new()?,
                one_time_pre_keys: pool,
                sessions: HashMap::new(),
                trust: HashMap::new(),
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::Store("Store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn identity_key(&self) -> Result<IdentityKey, Error> {
        Ok(self.lock()?.identity.clone())
    }

    fn current_signed_pre_key(&self) -> Result<SignedPreKey, Error> {
        self.lock()?.signed_pre_keys.current().cloned()
    }

    fn signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKey>, Error> {
        Ok(self.lock()?.signed_pre_keys.get(id).cloned())
    }

    fn create_signed_pre_key(&self) -> Result<SignedPreKey, Error> {
        self.lock()?.signed_pre_keys.create().cloned()
    }

    fn promote_signed_pre_key(&self, id: u32) -> Result<Option<u32>, Error> {
        self.lock()?.signed_pre_keys.promote(id)
    }

    fn expire_signed_pre_key(&self, id: u32, at: SystemTime) -> Result<(), Error> {
        self.lock()?.signed_pre_keys.expire(id, at)
    }

    fn purge_expired_signed_pre_keys(&self, now: SystemTime) -> Result<Vec<u32>, Error> {
        Ok(self.lock()?.signed_pre_keys.purge(now))
    }

    fn signed_pre_key_ids(&self) -> Result<Vec<u32>, Error> {
        Ok(self.lock()?.signed_pre_keys.ids())
    }

    fn one_time_pre_key(&self, id: u32) -> Result<Option<OneTimePreKey>, Error> {
        Ok(self.lock()?.one_time_pre_keys.get(id).cloned())
    }

    fn remove_one_time_pre_key(&self, id: u32) -> Result<bool, Error> {
        Ok(self.lock()?.one_time_pre_keys.remove(id))
    }

    fn replenish_one_time_pre_keys(&self, target: usize) -> Result<usize, Error> {
        self.lock()?.one_time_pre_keys.replenish(target)
    }

    fn one_time_pre_keys_public(&self) -> Result<BTreeMap<u32, X25519PublicKey>, Error> {
        Ok(self.lock()?.one_time_pre_keys.public_keys())
    }

    fn contains_session(&self, device: &DeviceAddress) -> Result<bool, Error> {
        Ok(self.lock()?.sessions.contains_key(device))
    }

    fn load_session(&self, device: &DeviceAddress) -> Result<Option<SessionRecord>, Error> {
        let inner = self.lock()?;
        inner
            .sessions
            .get(device)
            .map(|bytes| SessionRecord::deserialize(bytes))
            .transpose()
    }

    fn save_session(&self, device: &DeviceAddress, record: &SessionRecord) -> Result<(), Error> {
        let bytes = record.serialize();
        if let Some(mut previous) = self.lock()?.sessions.insert(device.clone(), bytes) {
            previous.zeroize();
        }

        Ok(())
    }

    fn delete_session(&self, device: &DeviceAddress) -> Result<bool, Error> {
        Ok(match self.lock()?.sessions.remove(device) {
            Some(mut bytes) => {
                bytes.zeroize();
                true
            }
            None => false,
        })
    }

    fn delete_all_sessions(&self, account: &AccountId) -> Result<usize, Error> {
        let mut inner = self.lock()?;
        let before = inner.sessions.len();
        inner
            .sessions
            .retain(|device, _| device.account() != account);

        Ok(before - inner.sessions.len())
    }

    fn session_devices(&self, account: &AccountId) -> Result<Vec<DeviceAddress>, Error> {
        let mut devices: Vec<_> = self
            .lock()?
            .sessions
            .keys()
            .filter(|device| device.account() == account)
            .cloned()
            .collect();
        devices.sort();

        Ok(devices)
    }

    fn trust_record(&self, device: &DeviceAddress) -> Result<Option<TrustRecord>, Error> {
        Ok(self.lock()?.trust.get(device).copied())
    }

    fn update_trust_record(
        &self,
        device: &DeviceAddress,
        update: &mut dyn FnMut(&mut TrustRecord),
    ) -> Result<TrustRecord, Error> {
        let mut inner = self.lock()?;
        let record = inner.trust.entry(device.clone()).or_default();
        update(record);

        Ok(*record)
    }

    fn reprovision(&self, one_time_pre_keys: usize) -> Result<(), Error> {
        let mut inner = self.lock()?;

        let signed_pre_keys = SignedPreKeyStore::starting_at(inner.signed_pre_keys.next_id())?;
        let mut pool = OneTimePreKeyStore::starting_at(inner.one_time_pre_keys.next_id());
        pool.replenish(one_time_pre_keys)?;

        inner.identity = IdentityKey::new()?;
        inner.signed_pre_keys = signed_pre_keys;
        inner.one_time_pre_keys = pool;
        for (_, mut bytes) in inner.sessions.drain() {
            bytes.zeroize();
        }

        Ok(())
    }
}
