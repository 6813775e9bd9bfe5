use crate::directory::{DeviceAdvertisement, Directory};
use crate::{AccountId, DeviceAddress, Error, StalenessPolicy};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, instrument};

/// Turns account ids into the device addresses to encrypt to.
///
/// A failed lookup fails the whole resolution: silently leaving out an
/// account's devices would hide recipients from the caller.
#[derive(Clone)]
pub struct DeviceResolver {
    directory: Arc<dyn Directory>,
    policy: StalenessPolicy,
    timeout: Duration,
}

impl DeviceResolver {
    pub fn new(directory: Arc<dyn Directory>, policy: StalenessPolicy, timeout: Duration) -> Self {
        Self {
            directory,
            policy,
            timeout,
        }
    }

    /// Resolves with the configured timeout.
    pub async fn resolve(
        &self,
        accounts: &BTreeSet<AccountId>,
    ) -> Result<BTreeSet<DeviceAddress>, Error> {
        self.resolve_within(accounts, self.timeout).await
    }

    /// Resolves every account, failing with [`Error::Resolution`] once `timeout` expires.
    #[instrument(skip(self, accounts), fields(accounts = accounts.len()))]
    pub async fn resolve_within(
        &self,
        accounts: &BTreeSet<AccountId>,
        timeout: Duration,
    ) -> Result<BTreeSet<DeviceAddress>, Error> {
        tokio::time::timeout(timeout, self.lookup_all(accounts))
            .await
            .map_err(|_| Error::Resolution(format!("Device lookup timed out after {timeout:?}")))?
    }

    async fn lookup_all(
        &self,
        accounts: &BTreeSet<AccountId>,
    ) -> Result<BTreeSet<DeviceAddress>, Error> {
        let now = SystemTime::now();
        let mut devices = BTreeSet::new();

        for account in accounts {
            let advertised = self
                .directory
                .list_devices(account)
                .await
                .map_err(|err| match err {
                    Error::Resolution(reason) => Error::Resolution(reason),
                    other => Error::Resolution(format!("Lookup of {account} failed: {other}")),
                })?;

            let before = devices.len();
            devices.extend(
                advertised
                    .iter()
                    .filter(|advertisement| self.is_current(advertisement, now))
                    .map(|advertisement| DeviceAddress::new(account.clone(), advertisement.device_id)),
            );
            debug!(
                %account,
                advertised = advertised.len(),
                kept = devices.len() - before,
                "resolved devices"
            );
        }

        Ok(devices)
    }

    fn is_current(&self, advertisement: &DeviceAdvertisement, now: SystemTime) -> bool {
        if advertisement.withdrawn {
            return false;
        }
        if self.policy.require_bundle && !advertisement.has_bundle {
            return false;
        }

        match (self.policy.max_inactivity, advertisement.last_active) {
            (Some(max), Some(last_active)) => now
                .duration_since(last_active)
                .map_or(true, |inactive| inactive <= max),
            _ => true,
        }
    }
}
