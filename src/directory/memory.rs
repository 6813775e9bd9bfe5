use super::{DeviceAdvertisement, Directory, RoomInfo};
use crate::{AccountId, DeviceAddress, DeviceBundle, Error, PreKeyBundle};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct State {
    devices: HashMap<AccountId, Vec<DeviceAdvertisement>>,
    bundles: HashMap<DeviceAddress, DeviceBundle>,
    failing_accounts: HashSet<AccountId>,
    fail_publish: bool,
    latency: Option<Duration>,
    publish_count: usize,
    capable_resources: HashSet<String>,
    rooms: HashMap<String, RoomInfo>,
    pubsub_servers: HashSet<String>,
}

/// Shared in-memory [`Directory`].
///
/// Clones share state, so every device in a test can publish to and fetch
/// from the same directory. Lookups can be made to fail or stall.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<State>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces one entry of an account's device list.
    pub fn advertise(&self, account: &AccountId, advertisement: DeviceAdvertisement) {
        let mut state = self.state();
        let devices = state.devices.entry(account.clone()).or_default();
        devices.retain(|device| device.device_id != advertisement.device_id);
        devices.push(advertisement);
    }

    /// Makes lookups of `account` fail.
    pub fn fail_account(&self, account: &AccountId) {
        self.state().failing_accounts.insert(account.clone());
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.state().fail_publish = fail;
    }

    /// Delays every device list lookup.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    pub fn add_capable_resource(&self, resource: &str) {
        self.state().capable_resources.insert(resource.to_string());
    }

    pub fn set_room(&self, room: &str, info: RoomInfo) {
        self.state().rooms.insert(room.to_string(), info);
    }

    pub fn add_pubsub_server(&self, domain: &str) {
        self.state().pubsub_servers.insert(domain.to_string());
    }

    /// The bundle last published for `device`.
    pub fn bundle(&self, device: &DeviceAddress) -> Option<DeviceBundle> {
        self.state().bundles.get(device).cloned()
    }

    /// Successful bundle publications so far.
    pub fn publish_count(&self) -> usize {
        self.state().publish_count
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn list_devices(&self, account: &AccountId) -> Result<Vec<DeviceAdvertisement>, Error> {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let state = self.state();
        if state.failing_accounts.contains(account) {
            return Err(Error::Resolution(format!("Lookup of {account} failed")));
        }

        Ok(state.devices.get(account).cloned().unwrap_or_default())
    }

    async fn fetch_bundle(&self, device: &DeviceAddress) -> Result<PreKeyBundle, Error> {
        let mut state = self.state();
        if state.failing_accounts.contains(device.account()) {
            return Err(Error::Resolution(format!("Bundle fetch for {device} failed")));
        }

        let bundle = state
            .bundles
            .get_mut(device)
            .ok_or_else(|| Error::PreKey(format!("No bundle published for {device}")))?;

        // Each one-time pre-key is handed out once.
        let one_time_pre_key = bundle.one_time_pre_keys.keys().next().copied();
        let pre_key_bundle = bundle.pre_key_bundle(one_time_pre_key);
        if let Some(id) = one_time_pre_key {
            bundle.one_time_pre_keys.remove(&id);
        }

        Ok(pre_key_bundle)
    }

    async fn publish_bundle(
        &self,
        device: &DeviceAddress,
        bundle: &DeviceBundle,
    ) -> Result<(), Error> {
        let mut state = self.state();
        if state.fail_publish {
            return Err(Error::Publish(format!("Bundle of {device} rejected")));
        }

        state.bundles.insert(device.clone(), bundle.clone());
        state.publish_count += 1;
        if let Some(advertisement) = state
            .devices
            .get_mut(device.account())
            .and_then(|devices| {
                devices
                    .iter_mut()
                    .find(|advertisement| advertisement.device_id == device.device_id())
            })
        {
            advertisement.has_bundle = true;
        }

        Ok(())
    }

    async fn publish_device_list(
        &self,
        account: &AccountId,
        devices: &[DeviceAdvertisement],
    ) -> Result<(), Error> {
        let mut state = self.state();
        if state.fail_publish {
            return Err(Error::Publish(format!("Device list of {account} rejected")));
        }

        state.devices.insert(account.clone(), devices.to_vec());
        Ok(())
    }

    async fn resource_supports_encryption(&self, resource: &str) -> Result<bool, Error> {
        Ok(self.state().capable_resources.contains(resource))
    }

    async fn room_info(&self, room: &str) -> Result<RoomInfo, Error> {
        self.state()
            .rooms
            .get(room)
            .copied()
            .ok_or_else(|| Error::Resolution(format!("Unknown room {room}")))
    }

    async fn server_supports_pubsub(&self, domain: &str) -> Result<bool, Error> {
        Ok(self.state().pubsub_servers.contains(domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdentityKey, OneTimePreKey, SignedPreKey};
    use std::collections::BTreeMap;

    fn published_bundle() -> DeviceBundle {
        let identity = IdentityKey::new().unwrap();
        let spk = SignedPreKey::new(1).unwrap();
        let one_time_pre_keys: BTreeMap<_, _> = (1..=2)
            .map(|id| {
                let key = OneTimePreKey::new(id).unwrap();
                (id, key.public_key())
            })
            .collect();

        DeviceBundle {
            identity: identity.dh_key_public(),
            signing_key: identity.signing_key_public(),
            signed_pre_key: (spk.id(), spk.public_key()),
            signature: spk.signature(&identity),
            one_time_pre_keys,
        }
    }

    #[tokio::test]
    async fn test_one_time_pre_keys_are_handed_out_once() {
        let directory = MemoryDirectory::new();
        let device = DeviceAddress::new("bob@example.org", 1);
        directory
            .publish_bundle(&device, &published_bundle())
            .await
            .unwrap();

        let first = directory.fetch_bundle(&device).await.unwrap();
        let second = directory.fetch_bundle(&device).await.unwrap();
        let third = directory.fetch_bundle(&device).await.unwrap();

        assert_eq!(first.one_time_pre_key.map(|(id, _)| id), Some(1));
        assert_eq!(second.one_time_pre_key.map(|(id, _)| id), Some(2));
        assert!(third.one_time_pre_key.is_none());
        assert!(third.verify().is_ok());
    }

    #[tokio::test]
    async fn test_failing_account() {
        let directory = MemoryDirectory::new();
        let account = AccountId::from("bob@example.org");
        directory.advertise(&account, DeviceAdvertisement::active(1));
        directory.fail_account(&account);

        assert!(matches!(
            directory.list_devices(&account).await,
            Err(Error::Resolution(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_previous_bundle() {
        let directory = MemoryDirectory::new();
        let device = DeviceAddress::new("bob@example.org", 1);
        let bundle = published_bundle();
        directory.publish_bundle(&device, &bundle).await.unwrap();

        directory.set_publish_failure(true);
        assert!(
            directory
                .publish_bundle(&device, &published_bundle())
                .await
                .is_err()
        );
        assert_eq!(
            directory.bundle(&device).map(|published| published.identity),
            Some(bundle.identity)
        );
        assert_eq!(directory.publish_count(), 1);
    }
}
