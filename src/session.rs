use crate::{DoubleRatchet, Error, RatchetMessage, X25519PublicKey};
use base64::Engine;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X3DH material an initiator attaches to its messages until the peer answers.
///
/// The recipient uses it to build the inbound half of the session. Once the
/// peer has replied the session is marked established and the header is
/// dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreKeyHeader {
    /// Initiator's identity key.
    pub identity: X25519PublicKey,
    /// ID of the recipient's signed pre-key used in the agreement.
    pub signed_pre_key_id: u32,
    /// ID of the recipient's one-time pre-key, if one was available.
    pub one_time_pre_key_id: Option<u32>,
    /// Initiator's ephemeral key.
    pub base_key: X25519PublicKey,
}

/// A pairwise ratchet session with one remote device.
pub struct Session {
    pub(crate) ratchet: DoubleRatchet,
    pub(crate) remote_identity: X25519PublicKey,
    pub(crate) base_key: X25519PublicKey,
    pub(crate) pending_pre_key: Option<PreKeyHeader>,
}

impl Session {
    pub(crate) fn new(
        ratchet: DoubleRatchet,
        remote_identity: X25519PublicKey,
        base_key: X25519PublicKey,
        pending_pre_key: Option<PreKeyHeader>,
    ) -> Self {
        Self {
            ratchet,
            remote_identity,
            base_key,
            pending_pre_key,
        }
    }

    /// Identity key of the remote device this session was agreed with.
    pub fn remote_identity(&self) -> X25519PublicKey {
        self.remote_identity
    }

    /// Pre-key header still to be sent along, if the peer has not replied yet.
    pub fn pending_pre_key(&self) -> Option<&PreKeyHeader> {
        self.pending_pre_key.as_ref()
    }

    /// Stable identifier shared by both ends: SHA-256 over the identity
    /// keys, initiator first, and the X3DH base key.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.ratchet.state.ad.as_slice());
        hasher.update(self.base_key.as_bytes());

        base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<RatchetMessage, Error> {
        self.ratchet.encrypt(plaintext)
    }

    /// Decrypts a message; the first successful reply clears the pending header.
    pub fn decrypt(&mut self, message: &RatchetMessage) -> Result<Vec<u8>, Error> {
        let plaintext = self.ratchet.decrypt(message)?;
        if self.pending_pre_key.is_some() {
            self.mark_established();
        }

        Ok(plaintext)
    }

    pub fn mark_established(&mut self) {
        self.pending_pre_key = None;
    }
}

impl Zeroize for Session {
    fn zeroize(&mut self) {
        self.ratchet.zeroize();
        self.pending_pre_key = None;
    }
}

impl ZeroizeOnDrop for Session {}

/// Superseded states kept per device, newest first.
const ARCHIVED_SESSIONS_MAX: usize = 40;

/// Every session state held with one remote device.
///
/// When both devices start a session with each other at the same time, each
/// side ends up with two states: the one it initiated and the one the peer
/// initiated. The record keeps superseded states so messages on either of
/// them still decrypt, and promotes whichever state last decrypted.
pub struct SessionRecord {
    current: Session,
    previous: Vec<Session>,
}

impl SessionRecord {
    pub fn new(session: Session) -> Self {
        Self {
            current: session,
            previous: Vec::new(),
        }
    }

    pub(crate) fn from_parts(current: Session, previous: Vec<Session>) -> Self {
        Self { current, previous }
    }

    /// The state new messages are encrypted with.
    pub fn current(&self) -> &Session {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Session {
        &mut self.current
    }

    /// Superseded states, newest first.
    pub fn previous(&self) -> &[Session] {
        &self.previous
    }

    /// Makes `session` current and archives the state it replaces.
    pub fn promote(&mut self, session: Session) {
        let superseded = std::mem::replace(&mut self.current, session);
        self.previous.insert(0, superseded);
        self.previous.truncate(ARCHIVED_SESSIONS_MAX);
    }

    /// Whether any state was agreed with this X3DH base key.
    pub fn has_base_key(&self, base_key: &X25519PublicKey) -> bool {
        self.current.base_key == *base_key
            || self.previous.iter().any(|session| session.base_key == *base_key)
    }

    /// Decrypts with the first state that accepts `message`.
    ///
    /// With `base_key` set only states agreed with that base key are tried.
    /// A superseded state that decrypts becomes current again. States that
    /// fail are left untouched.
    pub fn decrypt(
        &mut self,
        message: &RatchetMessage,
        base_key: Option<&X25519PublicKey>,
    ) -> Result<(Vec<u8>, X25519PublicKey), Error> {
        let matches = |session: &Session| base_key.is_none_or(|key| session.base_key == *key);

        let mut failure = None;
        if matches(&self.current) {
            match self.current.decrypt(message) {
                Ok(plaintext) => return Ok((plaintext, self.current.remote_identity)),
                Err(error) => failure = Some(error),
            }
        }

        for index in 0..self.previous.len() {
            if !matches(&self.previous[index]) {
                continue;
            }
            match self.previous[index].decrypt(message) {
                Ok(plaintext) => {
                    let session = self.previous.remove(index);
                    let identity = session.remote_identity;
                    self.promote(session);
                    return Ok((plaintext, identity));
                }
                Err(error) => failure = Some(error),
            }
        }

        Err(failure.unwrap_or_else(|| {
            Error::Session("No session state matches the message".to_string())
        }))
    }
}
