//! The multi-device encryption manager.

mod decrypt;
mod encrypt;
mod locks;
mod rotation;

pub use decrypt::{
    ClearTextMessage, Decryption, HistoricalMessage, HistoryDecryption, HistoryFailure,
    HistoryReport,
};
pub use encrypt::{DeviceFailure, EncryptOptions, Encryption};

use crate::cipher::{RatchetCipher, SessionCipher};
use crate::directory::{DeviceAdvertisement, Directory};
use crate::resolver::DeviceResolver;
use crate::store::{MemoryStore, Store};
use crate::trust::{TrustGate, TrustState};
use crate::{DeviceAddress, DeviceBundle, Error, MessengerConfig, SignedPreKey, fingerprint};
use locks::SessionLocks;
use rotation::RotationState;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;

/// End-to-end encryption manager of one local device.
///
/// Owned by the caller, usually next to its connection. Collaborators are
/// passed in at construction: a [`Store`] for keys and sessions, a
/// [`Directory`] for device lists and bundles, and a [`SessionCipher`] that
/// wraps content keys per device.
pub struct Messenger {
    local: DeviceAddress,
    config: MessengerConfig,
    store: Arc<dyn Store>,
    directory: Arc<dyn Directory>,
    cipher: Arc<dyn SessionCipher>,
    resolver: DeviceResolver,
    trust: TrustGate,
    locks: SessionLocks,
    /// Guards the current signed pre-key while a rotation or publish is in flight.
    rotation: tokio::sync::Mutex<RotationState>,
    /// The published bundle no longer matches the store.
    bundle_dirty: AtomicBool,
}

impl Messenger {
    pub fn new(
        local: DeviceAddress,
        config: MessengerConfig,
        store: Arc<dyn Store>,
        directory: Arc<dyn Directory>,
        cipher: Arc<dyn SessionCipher>,
    ) -> Self {
        let resolver = DeviceResolver::new(
            directory.clone(),
            config.staleness.clone(),
            config.resolve_timeout,
        );

        Self {
            local,
            trust: TrustGate::new(store.clone()),
            resolver,
            config,
            store,
            directory,
            cipher,
            locks: SessionLocks::default(),
            rotation: tokio::sync::Mutex::new(RotationState::default()),
            bundle_dirty: AtomicBool::new(true),
        }
    }

    /// A freshly provisioned device keeping its keys in memory.
    pub fn with_memory_store(
        local: DeviceAddress,
        config: MessengerConfig,
        directory: Arc<dyn Directory>,
    ) -> Result<Self, Error> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(config.max_one_time_pre_keys)?);
        let cipher = Arc::new(RatchetCipher::new(
            store.clone(),
            &config.protocol_info,
            config.max_skipped_messages,
        ));

        Ok(Self::new(local, config, store, directory, cipher))
    }

    pub fn local(&self) -> &DeviceAddress {
        &self.local
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn trust(&self) -> &TrustGate {
        &self.trust
    }

    pub fn resolver(&self) -> &DeviceResolver {
        &self.resolver
    }

    pub fn trust_state(&self, device: &DeviceAddress) -> Result<TrustState, Error> {
        self.trust.check(device)
    }

    pub fn decide_trust(&self, device: &DeviceAddress, state: TrustState) -> Result<(), Error> {
        self.trust.decide(device, state)
    }

    /// Fingerprint of the local identity key.
    pub fn own_fingerprint(&self) -> Result<String, Error> {
        Ok(fingerprint(&self.store.identity_key()?.dh_key_public()))
    }

    /// Fingerprint of the identity key last seen from `device`.
    pub fn device_fingerprint(&self, device: &DeviceAddress) -> Result<Option<String>, Error> {
        self.trust.fingerprint_of(device)
    }

    /// Deletes the session with `device`; the next message builds a new one.
    pub fn reset_session(&self, device: &DeviceAddress) -> Result<bool, Error> {
        let deleted = self
            .locks
            .with_lock(device, || self.store.delete_session(device))?;
        tracing::info!(%device, deleted, "session reset");

        Ok(deleted)
    }

    /// Whether a bundle publication is outstanding.
    pub fn bundle_needs_publishing(&self) -> bool {
        self.bundle_dirty.load(Ordering::SeqCst)
    }

    /// Publishes the bundle and makes sure this device is in the account's device list.
    ///
    /// The one-time pre-key pool is topped up first when it ran low.
    #[instrument(skip(self), fields(device = %self.local))]
    pub async fn publish_bundle(&self) -> Result<(), Error> {
        let _rotation = self.rotation.lock().await;
        let current = self.store.current_signed_pre_key()?;
        self.publish_locked(&current).await
    }

    /// Publishes only when the bundle was never published or a one-time pre-key was used up.
    pub async fn publish_if_needed(&self) -> Result<bool, Error> {
        if !self.bundle_needs_publishing() {
            return Ok(false);
        }

        self.publish_bundle().await?;
        Ok(true)
    }

    /// Publishes a bundle advertising `signed_pre_key`. The caller holds the rotation lock.
    async fn publish_locked(&self, signed_pre_key: &SignedPreKey) -> Result<(), Error> {
        let pool = self.store.one_time_pre_keys_public()?.len();
        if pool < self.config.min_one_time_pre_keys {
            let added = self
                .store
                .replenish_one_time_pre_keys(self.config.max_one_time_pre_keys)?;
            tracing::info!(added, "replenished one-time pre-keys");
        }

        let identity = self.store.identity_key()?;
        let bundle = DeviceBundle {
            identity: identity.dh_key_public(),
            signing_key: identity.signing_key_public(),
            signed_pre_key: (signed_pre_key.id(), signed_pre_key.public_key()),
            signature: signed_pre_key.signature(&identity),
            one_time_pre_keys: self.store.one_time_pre_keys_public()?,
        };

        self.bundle_dirty.store(false, Ordering::SeqCst);
        if let Err(error) = self.directory.publish_bundle(&self.local, &bundle).await {
            self.bundle_dirty.store(true, Ordering::SeqCst);
            tracing::warn!(%error, "bundle publication failed");
            return Err(error);
        }
        tracing::debug!(signed_pre_key = signed_pre_key.id(), "bundle published");

        self.ensure_listed().await
    }

    async fn ensure_listed(&self) -> Result<(), Error> {
        let mut devices = self.directory.list_devices(self.local.account()).await?;
        let listed = devices
            .iter()
            .any(|device| device.device_id == self.local.device_id() && !device.withdrawn);
        if listed {
            return Ok(());
        }

        devices.retain(|device| device.device_id != self.local.device_id());
        devices.push(DeviceAdvertisement::active(self.local.device_id()));
        self.directory
            .publish_device_list(self.local.account(), &devices)
            .await
    }

    /// Republishes the account's device list with only this device on it.
    #[instrument(skip(self), fields(device = %self.local))]
    pub async fn purge_devices(&self) -> Result<(), Error> {
        self.directory
            .publish_device_list(
                self.local.account(),
                &[DeviceAdvertisement::active(self.local.device_id())],
            )
            .await?;
        tracing::info!("device list purged");

        Ok(())
    }

    /// Replaces the identity and every pre-key, drops all sessions and publishes.
    ///
    /// Peers see a new identity and have to make a new trust decision.
    #[instrument(skip(self), fields(device = %self.local))]
    pub async fn regenerate(&self) -> Result<(), Error> {
        let mut rotation = self.rotation.lock().await;
        self.locks
            .with_all_locked(|| self.store.reprovision(self.config.max_one_time_pre_keys))?;
        rotation.pending = None;
        self.bundle_dirty.store(true, Ordering::SeqCst);
        tracing::info!("identity regenerated");

        let current = self.store.current_signed_pre_key()?;
        self.publish_locked(&current).await
    }

    /// Whether a connected client resource supports this encryption scheme.
    pub async fn resource_supports_encryption(&self, resource: &str) -> Result<bool, Error> {
        self.directory.resource_supports_encryption(resource).await
    }

    /// Encrypted group chat needs real account ids and a closed member list.
    pub async fn room_supports_encryption(&self, room: &str) -> Result<bool, Error> {
        let info = self.directory.room_info(room).await?;
        Ok(info.non_anonymous && info.members_only)
    }

    /// Whether `domain` can host the bundles of its accounts.
    pub async fn server_supports_encryption(&self, domain: &str) -> Result<bool, Error> {
        self.directory.server_supports_pubsub(domain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountId, MemoryDirectory, RoomInfo};

    fn messenger(directory: &MemoryDirectory) -> Messenger {
        Messenger::with_memory_store(
            DeviceAddress::new("alice@example.org", 1),
            MessengerConfig {
                min_one_time_pre_keys: 2,
                max_one_time_pre_keys: 4,
                ..MessengerConfig::default()
            },
            Arc::new(directory.clone()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_lists_device_and_clears_dirty_flag() {
        let directory = MemoryDirectory::new();
        let alice = messenger(&directory);
        assert!(alice.bundle_needs_publishing());

        assert!(alice.publish_if_needed().await.unwrap());
        assert!(!alice.publish_if_needed().await.unwrap());

        let listed = directory
            .list_devices(&AccountId::from("alice@example.org"))
            .await
            .unwrap();
        assert_eq!(listed, vec![DeviceAdvertisement {
            last_active: listed[0].last_active,
            ..DeviceAdvertisement::active(1)
        }]);
        assert_eq!(
            directory.bundle(alice.local()).unwrap().one_time_pre_keys.len(),
            4
        );
    }

    #[tokio::test]
    async fn test_failed_publish_stays_dirty() {
        let directory = MemoryDirectory::new();
        let alice = messenger(&directory);
        directory.set_publish_failure(true);

        let err = alice.publish_bundle().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(alice.bundle_needs_publishing());
    }

    #[tokio::test]
    async fn test_regenerate_changes_fingerprint() {
        let directory = MemoryDirectory::new();
        let alice = messenger(&directory);
        let before = alice.own_fingerprint().unwrap();

        alice.regenerate().await.unwrap();

        assert_ne!(alice.own_fingerprint().unwrap(), before);
        assert_eq!(
            directory.bundle(alice.local()).map(|bundle| fingerprint(&bundle.identity)),
            Some(alice.own_fingerprint().unwrap())
        );
    }

    #[tokio::test]
    async fn test_purge_devices_keeps_only_local_device() {
        let directory = MemoryDirectory::new();
        let alice = messenger(&directory);
        let account = AccountId::from("alice@example.org");
        directory.advertise(&account, DeviceAdvertisement::active(2));
        directory.advertise(&account, DeviceAdvertisement::active(3));

        alice.purge_devices().await.unwrap();

        let listed = directory.list_devices(&account).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].device_id, alice.local().device_id());
    }

    #[tokio::test]
    async fn test_capability_checks() {
        let directory = MemoryDirectory::new();
        let alice = messenger(&directory);
        directory.add_capable_resource("bob@example.org/phone");
        directory.add_pubsub_server("example.org");
        directory.set_room("open@rooms.example.org", RoomInfo {
            non_anonymous: true,
            members_only: false,
        });
        directory.set_room("private@rooms.example.org", RoomInfo {
            non_anonymous: true,
            members_only: true,
        });

        assert!(
            alice
                .resource_supports_encryption("bob@example.org/phone")
                .await
                .unwrap()
        );
        assert!(
            !alice
                .resource_supports_encryption("bob@example.org/web")
                .await
                .unwrap()
        );
        assert!(alice.server_supports_encryption("example.org").await.unwrap());
        assert!(
            !alice
                .room_supports_encryption("open@rooms.example.org")
                .await
                .unwrap()
        );
        assert!(
            alice
                .room_supports_encryption("private@rooms.example.org")
                .await
                .unwrap()
        );
    }
}
