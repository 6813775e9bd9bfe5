use crate::store::Store;
use crate::{DeviceAddress, Error, X25519PublicKey, fingerprint};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Trust decision for one remote device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TrustState {
    Trusted,
    Untrusted,
    /// Never decided. Every device starts here.
    #[default]
    Undecided,
}

impl fmt::Display for TrustState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trusted => "trusted",
            Self::Untrusted => "untrusted",
            Self::Undecided => "undecided",
        };
        f.write_str(name)
    }
}

/// Stored trust decision, together with the identity key it was made for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrustRecord {
    pub state: TrustState,
    pub identity: Option<X25519PublicKey>,
}

/// Outcome of [`TrustGate::require_trusted`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustVerdict {
    /// Devices that may be encrypted to.
    pub accepted: BTreeSet<DeviceAddress>,
    /// Devices excluded because they are marked untrusted.
    pub untrusted: BTreeSet<DeviceAddress>,
}

/// Policy gate over the trust records kept in the [`Store`].
///
/// The gate never upgrades a record on its own: a device only becomes trusted
/// through [`TrustGate::decide`], and a changed identity key drops it back to
/// undecided.
#[derive(Clone)]
pub struct TrustGate {
    store: Arc<dyn Store>,
}

impl TrustGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Current trust state of `device`, [`TrustState::Undecided`] when never seen.
    pub fn check(&self, device: &DeviceAddress) -> Result<TrustState, Error> {
        Ok(self
            .store
            .trust_record(device)?
            .map(|record| record.state)
            .unwrap_or_default())
    }

    /// Records a trust decision; later calls see it immediately.
    pub fn decide(&self, device: &DeviceAddress, state: TrustState) -> Result<(), Error> {
        self.store
            .update_trust_record(device, &mut |record| record.state = state)?;

        debug!(%device, %state, "trust decided");
        Ok(())
    }

    /// Splits `devices` into the ones encryption may proceed to and the untrusted ones.
    ///
    /// Fails with [`Error::UndecidedTrust`] naming every undecided device that
    /// is not in `allow_undecided`. Untrusted devices are never accepted, even
    /// when allowed.
    pub fn require_trusted(
        &self,
        devices: &BTreeSet<DeviceAddress>,
        allow_undecided: &BTreeSet<DeviceAddress>,
    ) -> Result<TrustVerdict, Error> {
        let mut verdict = TrustVerdict::default();
        let mut rejected = BTreeSet::new();

        for device in devices {
            match self.check(device)? {
                TrustState::Trusted => {
                    verdict.accepted.insert(device.clone());
                }
                TrustState::Untrusted => {
                    verdict.untrusted.insert(device.clone());
                }
                TrustState::Undecided if allow_undecided.contains(device) => {
                    verdict.accepted.insert(device.clone());
                }
                TrustState::Undecided => {
                    rejected.insert(device.clone());
                }
            }
        }

        if !rejected.is_empty() {
            return Err(Error::UndecidedTrust { rejected });
        }

        Ok(verdict)
    }

    /// Remembers the identity key a device presented.
    ///
    /// The first key seen is recorded. A different key later resets the record
    /// to undecided and fails with [`Error::IdentityChanged`].
    pub fn observe_identity(
        &self,
        device: &DeviceAddress,
        identity: &X25519PublicKey,
    ) -> Result<(), Error> {
        let mut previous = None;
        self.store.update_trust_record(device, &mut |record| {
            match record.identity {
                Some(known) if known == *identity => {}
                Some(_) => {
                    previous = Some(record.state);
                    *record = TrustRecord {
                        state: TrustState::Undecided,
                        identity: Some(*identity),
                    };
                }
                None => record.identity = Some(*identity),
            }
        })?;

        match previous {
            Some(previous) => {
                warn!(%device, %previous, "identity key changed");
                Err(Error::IdentityChanged(device.clone()))
            }
            None => Ok(()),
        }
    }

    /// Fingerprint of the identity key recorded for `device`.
    pub fn fingerprint_of(&self, device: &DeviceAddress) -> Result<Option<String>, Error> {
        Ok(self
            .store
            .trust_record(device)?
            .and_then(|record| record.identity)
            .map(|identity| fingerprint(&identity)))
    }
}
