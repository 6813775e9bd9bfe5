//! Key and session storage used by the messenger.

mod memory;
pub use memory::MemoryStore;

use crate::{
    AccountId, DeviceAddress, Error, IdentityKey, OneTimePreKey, SessionRecord, SignedPreKey,
    TrustRecord, X25519PublicKey,
};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Identity, pre-key, session and trust storage of the local device.
///
/// Calls are synchronous and short; the messenger serializes access to any
/// single session itself, so implementations only need to be internally
/// consistent per call.
pub trait Store: Send + Sync {
    /// The device's long-term identity key pair.
    fn identity_key(&self) -> Result<IdentityKey, Error>;

    fn current_signed_pre_key(&self) -> Result<SignedPreKey, Error>;

    /// A signed pre-key by id, current or superseded but not yet purged.
    fn signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKey>, Error>;

    /// Generates and persists a new signed pre-key without making it current.
    fn create_signed_pre_key(&self) -> Result<SignedPreKey, Error>;

    /// Makes `id` current. Returns the id of the key it superseded.
    fn promote_signed_pre_key(&self, id: u32) -> Result<Option<u32>, Error>;

    /// Schedules a superseded signed pre-key for deletion at `at`.
    fn expire_signed_pre_key(&self, id: u32, at: SystemTime) -> Result<(), Error>;

    /// Deletes superseded keys whose expiry is not later than `now`.
    fn purge_expired_signed_pre_keys(&self, now: SystemTime) -> Result<Vec<u32>, Error>;

    /// Ids of every retained signed pre-key.
    fn signed_pre_key_ids(&self) -> Result<Vec<u32>, Error>;

    fn one_time_pre_key(&self, id: u32) -> Result<Option<OneTimePreKey>, Error>;

    /// Removes a consumed one-time pre-key. Returns whether it was present.
    fn remove_one_time_pre_key(&self, id: u32) -> Result<bool, Error>;

    /// Generates keys until the pool holds `target`; returns how many were added.
    fn replenish_one_time_pre_keys(&self, target: usize) -> Result<usize, Error>;

    fn one_time_pre_keys_public(&self) -> Result<BTreeMap<u32, X25519PublicKey>, Error>;

    fn contains_session(&self, device: &DeviceAddress) -> Result<bool, Error>;

    fn load_session(&self, device: &DeviceAddress) -> Result<Option<SessionRecord>, Error>;

    fn save_session(&self, device: &DeviceAddress, record: &SessionRecord) -> Result<(), Error>;

    /// Deletes the session with `device`. Returns whether one existed.
    fn delete_session(&self, device: &DeviceAddress) -> Result<bool, Error>;

    /// Deletes the sessions with every device of `account`.
    fn delete_all_sessions(&self, account: &AccountId) -> Result<usize, Error>;

    /// Devices of `account` we hold a session with.
    fn session_devices(&self, account: &AccountId) -> Result<Vec<DeviceAddress>, Error>;

    fn trust_record(&self, device: &DeviceAddress) -> Result<Option<TrustRecord>, Error>;

    /// Applies `update` to the record of `device` and stores the result as
    /// one atomic step, starting from the default record when there is none.
    /// Returns the stored record.
    fn update_trust_record(
        &self,
        device: &DeviceAddress,
        update: &mut dyn FnMut(&mut TrustRecord),
    ) -> Result<TrustRecord, Error>;

    /// Replaces the identity and every pre-key, dropping all sessions.
    ///
    /// Signed pre-key ids keep increasing across re-provisioning.
    fn reprovision(&self, one_time_pre_keys: usize) -> Result<(), Error>;
}
