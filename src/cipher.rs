use crate::envelope::ContentKey;
use crate::store::Store;
use crate::{
    DeviceAddress, DoubleRatchet, Error, PreKeyBundle, PreKeyHeader, RatchetMessage, Session,
    SessionRecord, X3DH, X25519PublicKey, x3dh,
};
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroize;

/// A content key wrapped for one device.
///
/// Carries the X3DH header until the recipient has answered, so the first
/// messages of a session can build it on the receiving side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyTransport {
    pub pre_key: Option<PreKeyHeader>,
    pub message: RatchetMessage,
}

impl KeyTransport {
    pub fn is_pre_key(&self) -> bool {
        self.pre_key.is_some()
    }
}

/// Result of unwrapping a content key.
pub struct Unwrapped {
    pub key: ContentKey,
    /// Identity key of the sending device, as bound into its session.
    pub identity: X25519PublicKey,
    /// Whether this call created the session.
    pub new_session: bool,
    /// One-time pre-key consumed by the new session.
    pub consumed_one_time_pre_key: Option<u32>,
}

/// Per-device key wrapping on top of pairwise sessions.
///
/// Both calls advance the session with `device`. Callers must not run two
/// calls for the same device at once.
pub trait SessionCipher: Send + Sync {
    /// Wraps `key` for `device`. Without a stored session, `bundle` is used to
    /// create one; with neither, fails with [`Error::NoSession`].
    fn wrap_key(
        &self,
        device: &DeviceAddress,
        bundle: Option<&PreKeyBundle>,
        key: &ContentKey,
    ) -> Result<KeyTransport, Error>;

    /// Unwraps a content key from `device`, creating the session on first contact.
    fn unwrap_key(
        &self,
        device: &DeviceAddress,
        transport: &KeyTransport,
    ) -> Result<Unwrapped, Error>;
}

/// [`SessionCipher`] built on X3DH and the Double Ratchet, persisting sessions in a [`Store`].
pub struct RatchetCipher {
    store: Arc<dyn Store>,
    x3dh: X3DH,
    max_skip: u32,
}

impl RatchetCipher {
    pub fn new(store: Arc<dyn Store>, protocol_info: &[u8], max_skip: u32) -> Self {
        Self {
            store,
            x3dh: X3DH::new(protocol_info),
            max_skip,
        }
    }

    fn outbound_session(&self, bundle: &PreKeyBundle) -> Result<Session, Error> {
        let identity = self.store.identity_key()?;
        let initiation = self.x3dh.initiate(&identity, bundle)?;
        let base_key = initiation.public_key();

        let ratchet = DoubleRatchet::initialize_for_alice(
            initiation.shared_secret(),
            &bundle.signed_pre_key.1,
            self.max_skip,
            x3dh::associated_data(&identity.dh_key_public(), &bundle.identity),
        )?;
        let header = PreKeyHeader {
            identity: identity.dh_key_public(),
            signed_pre_key_id: bundle.signed_pre_key.0,
            one_time_pre_key_id: bundle.one_time_pre_key.map(|(id, _)| id),
            base_key,
        };

        Ok(Session::new(ratchet, bundle.identity, base_key, Some(header)))
    }

    fn inbound_session(&self, header: &PreKeyHeader) -> Result<Session, Error> {
        let identity = self.store.identity_key()?;
        let signed_pre_key = self
            .store
            .signed_pre_key(header.signed_pre_key_id)?
            .ok_or_else(|| {
                Error::PreKey(format!(
                    "Unknown signed pre-key {}",
                    header.signed_pre_key_id
                ))
            })?;
        let one_time_pre_key = match header.one_time_pre_key_id {
            Some(id) => Some(self.store.one_time_pre_key(id)?.ok_or_else(|| {
                Error::PreKey(format!("One-time pre-key {id} is unknown or used"))
            })?),
            None => None,
        };

        let shared_secret = self.x3dh.respond(
            &identity,
            &signed_pre_key,
            one_time_pre_key,
            &header.identity,
            &header.base_key,
        )?;
        let ratchet = DoubleRatchet::initialize_for_bob(
            shared_secret,
            signed_pre_key.key_pair(),
            self.max_skip,
            x3dh::associated_data(&header.identity, &identity.dh_key_public()),
        );

        Ok(Session::new(ratchet, header.identity, header.base_key, None))
    }
}

impl SessionCipher for RatchetCipher {
    fn wrap_key(
        &self,
        device: &DeviceAddress,
        bundle: Option<&PreKeyBundle>,
        key: &ContentKey,
    ) -> Result<KeyTransport, Error> {
        let mut record = match (self.store.load_session(device)?, bundle) {
            (Some(record), _) => record,
            (None, Some(bundle)) => {
                debug!(%device, "creating outbound session");
                SessionRecord::new(self.outbound_session(bundle)?)
            }
            (None, None) => return Err(Error::NoSession(device.clone())),
        };

        let session = record.current_mut();
        let message = session.encrypt(key.as_bytes())?;
        let transport = KeyTransport {
            pre_key: session.pending_pre_key().copied(),
            message,
        };
        self.store.save_session(device, &record)?;

        Ok(transport)
    }

    fn unwrap_key(
        &self,
        device: &DeviceAddress,
        transport: &KeyTransport,
    ) -> Result<Unwrapped, Error> {
        let existing = self.store.load_session(device)?;
        let header = transport.pre_key.as_ref();

        let (record, mut plaintext, identity, new_session) = match (existing, header) {
            (Some(mut record), Some(header)) if record.has_base_key(&header.base_key) => {
                let (plaintext, identity) =
                    record.decrypt(&transport.message, Some(&header.base_key))?;
                (record, plaintext, identity, false)
            }
            (existing, Some(header)) => {
                debug!(%device, "creating inbound session");
                let mut session = self.inbound_session(header)?;
                let plaintext = session.decrypt(&transport.message)?;
                let identity = session.remote_identity();
                // A simultaneous first contact leaves our own outbound
                // state in the record; the peer may still answer on it.
                let record = match existing {
                    Some(mut record) => {
                        record.promote(session);
                        record
                    }
                    None => SessionRecord::new(session),
                };
                (record, plaintext, identity, true)
            }
            (Some(mut record), None) => {
                let (plaintext, identity) = record.decrypt(&transport.message, None)?;
                (record, plaintext, identity, false)
            }
            (None, None) => return Err(Error::NoSession(device.clone())),
        };

        let key = ContentKey::from_slice(&plaintext);
        plaintext.zeroize();
        let key = key?;

        self.store.save_session(device, &record)?;

        let consumed_one_time_pre_key = match (header, new_session) {
            (Some(header), true) => header.one_time_pre_key_id,
            _ => None,
        };
        if let Some(id) = consumed_one_time_pre_key {
            self.store.remove_one_time_pre_key(id)?;
        }

        Ok(Unwrapped {
            key,
            identity,
            new_session,
            consumed_one_time_pre_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceBundle, MemoryStore};

    struct Device {
        address: DeviceAddress,
        store: Arc<MemoryStore>,
        cipher: RatchetCipher,
    }

    fn device(account: &str) -> Device {
        let store = Arc::new(MemoryStore::new(3).unwrap());
        Device {
            address: DeviceAddress::new(account, 1),
            cipher: RatchetCipher::new(store.clone(), b"Cipher-Test", 20),
            store,
        }
    }

    fn bundle(device: &Device) -> PreKeyBundle {
        let identity = device.store.identity_key().unwrap();
        let spk = device.store.current_signed_pre_key().unwrap();
        let one_time_pre_keys = device.store.one_time_pre_keys_public().unwrap();
        let first = one_time_pre_keys.keys().next().copied();

        DeviceBundle {
            identity: identity.dh_key_public(),
            signing_key: identity.signing_key_public(),
            signed_pre_key: (spk.id(), spk.public_key()),
            signature: spk.signature(&identity),
            one_time_pre_keys,
        }
        .pre_key_bundle(first)
    }

    #[test]
    fn test_first_contact_creates_sessions_on_both_sides() {
        let alice = device("alice@example.org");
        let bob = device("bob@example.org");
        let key = ContentKey::generate().unwrap();

        let transport = alice
            .cipher
            .wrap_key(&bob.address, Some(&bundle(&bob)), &key)
            .unwrap();
        assert!(transport.is_pre_key());

        let unwrapped = bob.cipher.unwrap_key(&alice.address, &transport).unwrap();
        assert_eq!(unwrapped.key.as_bytes(), key.as_bytes());
        assert!(unwrapped.new_session);
        assert_eq!(
            unwrapped.identity,
            alice.store.identity_key().unwrap().dh_key_public()
        );

        let consumed = unwrapped.consumed_one_time_pre_key.unwrap();
        assert!(bob.store.one_time_pre_key(consumed).unwrap().is_none());
    }

    #[test]
    fn test_reply_drops_pre_key_header() {
        let alice = device("alice@example.org");
        let bob = device("bob@example.org");
        let key = ContentKey::generate().unwrap();

        let first = alice
            .cipher
            .wrap_key(&bob.address, Some(&bundle(&bob)), &key)
            .unwrap();
        bob.cipher.unwrap_key(&alice.address, &first).unwrap();

        let reply = bob.cipher.wrap_key(&alice.address, None, &key).unwrap();
        assert!(!reply.is_pre_key());
        alice.cipher.unwrap_key(&bob.address, &reply).unwrap();

        let next = alice.cipher.wrap_key(&bob.address, None, &key).unwrap();
        assert!(!next.is_pre_key());
        bob.cipher.unwrap_key(&alice.address, &next).unwrap();
    }

    #[test]
    fn test_failed_unwrap_keeps_one_time_pre_key() {
        let alice = device("alice@example.org");
        let bob = device("bob@example.org");
        let key = ContentKey::generate().unwrap();
        let before = bob.store.one_time_pre_keys_public().unwrap().len();

        let mut transport = alice
            .cipher
            .wrap_key(&bob.address, Some(&bundle(&bob)), &key)
            .unwrap();
        transport.message.ciphertext[0] ^= 1;

        assert!(bob.cipher.unwrap_key(&alice.address, &transport).is_err());
        assert_eq!(bob.store.one_time_pre_keys_public().unwrap().len(), before);
        assert!(!bob.store.contains_session(&alice.address).unwrap());
    }

    #[test]
    fn test_simultaneous_first_contact() {
        let alice = device("alice@example.org");
        let bob = device("bob@example.org");
        let key = ContentKey::generate().unwrap();

        let to_bob = alice
            .cipher
            .wrap_key(&bob.address, Some(&bundle(&bob)), &key)
            .unwrap();
        let to_alice = bob
            .cipher
            .wrap_key(&alice.address, Some(&bundle(&alice)), &key)
            .unwrap();

        assert!(bob.cipher.unwrap_key(&alice.address, &to_bob).unwrap().new_session);
        assert!(alice.cipher.unwrap_key(&bob.address, &to_alice).unwrap().new_session);

        for _ in 0..3 {
            let next = alice.cipher.wrap_key(&bob.address, None, &key).unwrap();
            let unwrapped = bob.cipher.unwrap_key(&alice.address, &next).unwrap();
            assert_eq!(unwrapped.key.as_bytes(), key.as_bytes());

            let next = bob.cipher.wrap_key(&alice.address, None, &key).unwrap();
            let unwrapped = alice.cipher.unwrap_key(&bob.address, &next).unwrap();
            assert_eq!(unwrapped.key.as_bytes(), key.as_bytes());
        }
    }

    #[test]
    fn test_without_session_or_bundle() {
        let alice = device("alice@example.org");
        let bob = device("bob@example.org");
        let key = ContentKey::generate().unwrap();

        assert_eq!(
            alice.cipher.wrap_key(&bob.address, None, &key).err(),
            Some(Error::NoSession(bob.address.clone()))
        );
    }
}
