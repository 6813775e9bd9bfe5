//! Device directory and capability discovery.

mod memory;
pub use memory::MemoryDirectory;

use crate::{AccountId, DeviceAddress, DeviceBundle, DeviceId, Error, PreKeyBundle};
use async_trait::async_trait;
use std::time::SystemTime;

/// One entry of an account's advertised device list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceAdvertisement {
    pub device_id: DeviceId,
    /// The device announced it no longer takes part.
    pub withdrawn: bool,
    /// Whether the device has published a bundle.
    pub has_bundle: bool,
    /// Last time the device was seen active, when the directory knows.
    pub last_active: Option<SystemTime>,
}

impl DeviceAdvertisement {
    /// An active device that has published its bundle.
    pub fn active(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            withdrawn: false,
            has_bundle: true,
            last_active: Some(SystemTime::now()),
        }
    }
}

/// Configuration of a group chat room, as far as encryption cares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoomInfo {
    /// Members can see each other's real account ids.
    pub non_anonymous: bool,
    pub members_only: bool,
}

/// Directory of devices and bundles, plus capability discovery.
#[async_trait]
pub trait Directory: Send + Sync {
    /// The device list advertised by `account`. Unknown accounts have none.
    async fn list_devices(&self, account: &AccountId) -> Result<Vec<DeviceAdvertisement>, Error>;

    /// A bundle for starting a session with `device`, with at most one one-time pre-key.
    async fn fetch_bundle(&self, device: &DeviceAddress) -> Result<PreKeyBundle, Error>;

    async fn publish_bundle(&self, device: &DeviceAddress, bundle: &DeviceBundle)
    -> Result<(), Error>;

    /// Replaces the device list advertised for `account`.
    async fn publish_device_list(
        &self,
        account: &AccountId,
        devices: &[DeviceAdvertisement],
    ) -> Result<(), Error>;

    /// Whether a connected client resource announced support for the scheme.
    async fn resource_supports_encryption(&self, resource: &str) -> Result<bool, Error>;

    async fn room_info(&self, room: &str) -> Result<RoomInfo, Error>;

    /// Whether `domain` hosts the publish-subscribe service bundles live in.
    async fn server_supports_pubsub(&self, domain: &str) -> Result<bool, Error>;
}
