use super::Messenger;
use crate::envelope::Envelope;
use crate::trust::TrustState;
use crate::{DeviceAddress, Error, fingerprint};
use std::iter::Enumerate;
use std::sync::atomic::Ordering;
use tracing::instrument;

/// A decrypted message and where it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClearTextMessage {
    pub plaintext: Vec<u8>,
    pub sender: DeviceAddress,
    /// Trust state of the sender when the message was decrypted.
    pub trust: TrustState,
    /// Fingerprint of the sender's identity key.
    pub fingerprint: String,
}

/// Outcome of decrypting one envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decryption {
    Decrypted(ClearTextMessage),
    /// The envelope has no key for this device, or no session with the
    /// sender exists and it carries no key exchange.
    NotForMe(DeviceAddress),
    Failed(Error),
}

impl Decryption {
    /// `NotForMe` becomes [`Error::NoSession`].
    pub fn into_result(self) -> Result<ClearTextMessage, Error> {
        match self {
            Self::Decrypted(message) => Ok(message),
            Self::NotForMe(sender) => Err(Error::NoSession(sender)),
            Self::Failed(error) => Err(error),
        }
    }
}

/// One archived envelope together with the device it arrived from.
#[derive(Clone, Debug)]
pub struct HistoricalMessage {
    pub sender: DeviceAddress,
    pub envelope: Envelope,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryFailure {
    /// Position of the entry in the input sequence.
    pub index: usize,
    pub sender: DeviceAddress,
    pub error: Error,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryReport {
    pub failures: Vec<HistoryFailure>,
    pub not_for_me: usize,
}

/// Lazy decryption of archived envelopes.
///
/// Yields every message that decrypts. Entries that fail are recorded and
/// skipped, so a corrupt entry never stops the rest from being recovered.
pub struct HistoryDecryption<'a, I> {
    messenger: &'a Messenger,
    entries: Enumerate<I>,
    report: HistoryReport,
}

impl<I> HistoryDecryption<'_, I> {
    /// Failures of the entries consumed so far.
    pub fn failures(&self) -> &[HistoryFailure] {
        &self.report.failures
    }

    pub fn not_for_me(&self) -> usize {
        self.report.not_for_me
    }

    pub fn into_report(self) -> HistoryReport {
        self.report
    }
}

impl<I: Iterator<Item = HistoricalMessage>> Iterator for HistoryDecryption<'_, I> {
    type Item = ClearTextMessage;

    fn next(&mut self) -> Option<Self::Item> {
        for (index, entry) in self.entries.by_ref() {
            match self.messenger.decrypt(&entry.sender, &entry.envelope) {
                Decryption::Decrypted(message) => return Some(message),
                Decryption::NotForMe(_) => self.report.not_for_me += 1,
                Decryption::Failed(error) => self.report.failures.push(HistoryFailure {
                    index,
                    sender: entry.sender,
                    error,
                }),
            }
        }

        None
    }
}

impl Messenger {
    /// Decrypts an envelope received from `sender`.
    ///
    /// The first message of a new session builds that session. Undecided
    /// senders are decrypted too; check [`ClearTextMessage::trust`].
    #[instrument(skip_all, fields(sender = %sender))]
    pub fn decrypt(&self, sender: &DeviceAddress, envelope: &Envelope) -> Decryption {
        match self.try_decrypt(sender, envelope) {
            Ok(Some(message)) => Decryption::Decrypted(message),
            Ok(None) => {
                tracing::debug!("envelope has no key for this device");
                Decryption::NotForMe(sender.clone())
            }
            Err(Error::NoSession(device)) => {
                tracing::debug!("no session and no key exchange");
                Decryption::NotForMe(device)
            }
            Err(error) => {
                tracing::warn!(%error, "decryption failed");
                Decryption::Failed(error)
            }
        }
    }

    /// Decrypts archived envelopes lazily, in order.
    pub fn decrypt_historical<I>(&self, entries: I) -> HistoryDecryption<'_, I::IntoIter>
    where
        I: IntoIterator<Item = HistoricalMessage>,
    {
        HistoryDecryption {
            messenger: self,
            entries: entries.into_iter().enumerate(),
            report: HistoryReport::default(),
        }
    }

    fn try_decrypt(
        &self,
        sender: &DeviceAddress,
        envelope: &Envelope,
    ) -> Result<Option<ClearTextMessage>, Error> {
        if envelope.sender != *sender {
            return Err(Error::Protocol(format!(
                "Envelope from {} arrived as {sender}",
                envelope.sender
            )));
        }
        let Some(transport) = envelope.key_for(&self.local) else {
            return Ok(None);
        };

        let unwrapped = self
            .locks
            .with_lock(sender, || self.cipher.unwrap_key(sender, transport))?;

        if let Some(id) = unwrapped.consumed_one_time_pre_key {
            tracing::debug!(id, "one-time pre-key consumed");
            self.bundle_dirty.store(true, Ordering::SeqCst);
        }

        match self.trust.observe_identity(sender, &unwrapped.identity) {
            Ok(()) => {}
            Err(Error::IdentityChanged(device)) => {
                tracing::warn!(%device, "sender identity changed, trust reset to undecided");
            }
            Err(error) => return Err(error),
        }

        let plaintext = unwrapped.key.open(&envelope.payload, sender)?;

        Ok(Some(ClearTextMessage {
            plaintext,
            sender: sender.clone(),
            trust: self.trust.check(sender)?,
            fingerprint: fingerprint(&unwrapped.identity),
        }))
    }
}
