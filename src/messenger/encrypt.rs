use super::Messenger;
use crate::cipher::KeyTransport;
use crate::envelope::{ContentKey, Envelope, RecipientKey};
use crate::transport::Transport;
use crate::{AccountId, DeviceAddress, Error};
use std::collections::BTreeSet;
use tracing::instrument;

/// Per-call encryption options.
#[derive(Clone, Debug, Default)]
pub struct EncryptOptions {
    /// Undecided devices the caller approved for this call only.
    pub allow_undecided: BTreeSet<DeviceAddress>,
}

impl EncryptOptions {
    pub fn allowing(devices: impl IntoIterator<Item = DeviceAddress>) -> Self {
        Self {
            allow_undecided: devices.into_iter().collect(),
        }
    }
}

/// A device left out of an envelope, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceFailure {
    pub device: DeviceAddress,
    pub error: Error,
}

/// An envelope together with the devices it could not be addressed to.
#[derive(Clone, Debug)]
pub struct Encryption {
    pub envelope: Envelope,
    /// Devices whose key could not be wrapped. Delivery to the rest is unaffected.
    pub failures: Vec<DeviceFailure>,
    /// Devices skipped because they are marked untrusted.
    pub untrusted: BTreeSet<DeviceAddress>,
}

impl Messenger {
    /// Encrypts `plaintext` for every current device of `recipients`.
    ///
    /// With self-sync enabled the other devices of the local account are
    /// included as well. Fails with [`Error::UndecidedTrust`] when a device
    /// without a trust decision is not allowed in `options`; nothing is
    /// encrypted in that case.
    #[instrument(skip_all, fields(sender = %self.local, recipients = recipients.len()))]
    pub async fn encrypt_for(
        &self,
        recipients: &[AccountId],
        plaintext: &[u8],
        options: &EncryptOptions,
    ) -> Result<Encryption, Error> {
        let mut accounts: BTreeSet<AccountId> = recipients.iter().cloned().collect();
        if self.config.self_sync {
            accounts.insert(self.local.account().clone());
        }

        let mut devices = self.resolver.resolve(&accounts).await?;
        devices.remove(&self.local);

        let verdict = self
            .trust
            .require_trusted(&devices, &options.allow_undecided)?;
        for device in &verdict.untrusted {
            tracing::debug!(%device, "skipping untrusted device");
        }

        let content_key = ContentKey::generate()?;
        let payload = content_key.seal(plaintext, &self.local)?;

        let mut keys = Vec::with_capacity(verdict.accepted.len());
        let mut failures = Vec::new();
        for device in verdict.accepted {
            match self.wrap_for(&device, &content_key).await {
                Ok(transport) => keys.push(RecipientKey {
                    recipient: device,
                    transport,
                }),
                Err(error) => {
                    tracing::warn!(%device, %error, "leaving device out of envelope");
                    failures.push(DeviceFailure { device, error });
                }
            }
        }
        tracing::debug!(keys = keys.len(), failed = failures.len(), "envelope assembled");

        Ok(Encryption {
            envelope: Envelope {
                sender: self.local.clone(),
                keys,
                payload,
                hints: self.config.hints.clone(),
            },
            failures,
            untrusted: verdict.untrusted,
        })
    }

    /// Encrypts for a single account.
    pub async fn encrypt_to(
        &self,
        recipient: &AccountId,
        plaintext: &[u8],
        options: &EncryptOptions,
    ) -> Result<Encryption, Error> {
        self.encrypt_for(std::slice::from_ref(recipient), plaintext, options)
            .await
    }

    /// Encrypts and hands the envelope to `transport`.
    pub async fn send(
        &self,
        recipients: &[AccountId],
        plaintext: &[u8],
        options: &EncryptOptions,
        transport: &dyn Transport,
    ) -> Result<Encryption, Error> {
        let encryption = self.encrypt_for(recipients, plaintext, options).await?;
        transport.deliver(recipients, &encryption.envelope).await?;

        Ok(encryption)
    }

    /// Wraps the content key for one device, fetching its bundle on first contact.
    async fn wrap_for(
        &self,
        device: &DeviceAddress,
        content_key: &ContentKey,
    ) -> Result<KeyTransport, Error> {
        let bundle = if self.store.contains_session(device)? {
            None
        } else {
            let bundle = self.directory.fetch_bundle(device).await?;
            bundle.verify()?;
            self.trust.observe_identity(device, &bundle.identity)?;
            Some(bundle)
        };

        self.locks.with_lock(device, || {
            self.cipher.wrap_key(device, bundle.as_ref(), content_key)
        })
    }
}
