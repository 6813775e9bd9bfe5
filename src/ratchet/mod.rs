mod chain;
mod message;
mod state;

pub(crate) use chain::Chain;
pub use message::{MessageHeader, RatchetMessage};
pub(crate) use state::RatchetState;

use crate::keys::generate_random_seed;
use crate::{Error, X25519PublicKey, X25519Secret, X3DHSharedSecret};
use aes_gcm_siv::aead::{Aead, KeyInit, Payload};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use std::collections::HashMap;
use x25519_dalek::SharedSecret;
use zeroize::Zeroize;

const NONCE_SIZE: usize = 12;

/// Skipped message keys, indexed by the remote ratchet key and message number.
pub(crate) type SkippedKeys = HashMap<([u8; 32], u32), Box<[u8; 32]>>;

/// Double Ratchet state of one session.
///
/// Provides forward secrecy (old message keys are deleted once used) and
/// break-in recovery (every reply turns the Diffie-Hellman ratchet).
/// Out-of-order delivery is handled by keeping up to `max_skip` skipped keys
/// per chain.
#[derive(Clone)]
pub struct DoubleRatchet {
    pub(crate) state: RatchetState,
    pub(crate) skipped_message_keys: SkippedKeys,
    pub(crate) max_skip: u32,
}

impl Zeroize for DoubleRatchet {
    fn zeroize(&mut self) {
        self.state.zeroize();
        for (_, mut key) in self.skipped_message_keys.drain() {
            key.zeroize();
        }
    }
}

impl Drop for DoubleRatchet {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl DoubleRatchet {
    /// Current ratchet public key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.state.dh_pair.public_key()
    }

    /// Initializes the ratchet of the party that ran the initiating half of X3DH.
    pub fn initialize_for_alice(
        shared_secret: X3DHSharedSecret,
        bob_public_key: &X25519PublicKey,
        max_skipped_messages: u32,
        ad: Box<[u8; 64]>,
    ) -> Result<Self, Error> {
        let seed = generate_random_seed()?;
        let dh_pair = X25519Secret::from(*seed);

        let (root_key, chain_key) = kdf_rk(&shared_secret.0, dh_pair.dh(bob_public_key))?;

        Ok(Self {
            state: RatchetState {
                ad,
                dh_pair,
                remote_dh_public: Some(*bob_public_key),
                root_key,
                sending_chain: Some(Chain::new(chain_key)),
                receiving_chain: None,
                previous_sending_chain_length: 0,
            },
            skipped_message_keys: HashMap::new(),
            max_skip: max_skipped_messages,
        })
    }

    /// Initializes the responder's ratchet with its signed pre-key pair.
    ///
    /// The responder can only send after it has received the first message.
    pub fn initialize_for_bob(
        shared_secret: X3DHSharedSecret,
        dh_pair: X25519Secret,
        max_skipped_messages: u32,
        ad: Box<[u8; 64]>,
    ) -> Self {
        Self {
            state: RatchetState {
                ad,
                dh_pair,
                remote_dh_public: None,
                root_key: shared_secret.0.clone(),
                sending_chain: None,
                receiving_chain: None,
                previous_sending_chain_length: 0,
            },
            skipped_message_keys: HashMap::new(),
            max_skip: max_skipped_messages,
        }
    }

    pub fn can_send(&self) -> bool {
        self.state.sending_chain.is_some()
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<RatchetMessage, Error> {
        let public_key = self.public_key();
        let chain = self
            .state
            .sending_chain
            .as_mut()
            .ok_or_else(|| Error::Session("No sending chain yet".to_string()))?;

        let header = MessageHeader {
            public_key,
            previous_chain_length: self.state.previous_sending_chain_length,
            message_number: chain.index,
        };
        let message_key = chain.next_key()?;

        let ciphertext = seal(&message_key, plaintext, &self.associated_data(&header))?;

        Ok(RatchetMessage { header, ciphertext })
    }

    /// Decrypts a message, advancing the ratchet only if decryption succeeds.
    pub fn decrypt(&mut self, message: &RatchetMessage) -> Result<Vec<u8>, Error> {
        let mut next = self.clone();
        let plaintext = next.decrypt_in_place(message)?;
        *self = next;

        Ok(plaintext)
    }

    fn decrypt_in_place(&mut self, message: &RatchetMessage) -> Result<Vec<u8>, Error> {
        let header = message.header;
        let ad = self.associated_data(&header);

        let skipped = (header.public_key.to_bytes(), header.message_number);
        if let Some(mut message_key) = self.skipped_message_keys.remove(&skipped) {
            let plaintext = open(&message_key, &message.ciphertext, &ad);
            message_key.zeroize();
            return plaintext;
        }

        if self.state.remote_dh_public != Some(header.public_key) {
            self.skip_message_keys(header.previous_chain_length)?;
            self.dh_ratchet(&header.public_key)?;
        }

        self.skip_message_keys(header.message_number)?;

        let chain = self
            .state
            .receiving_chain
            .as_mut()
            .ok_or_else(|| Error::Session("No receiving chain".to_string()))?;
        if header.message_number < chain.index {
            return Err(Error::Crypto("Duplicate or expired message".to_string()));
        }

        let mut message_key = chain.next_key()?;
        let plaintext = open(&message_key, &message.ciphertext, &ad);
        message_key.zeroize();

        plaintext
    }

    /// Stores the keys of messages `index..until` of the receiving chain.
    fn skip_message_keys(&mut self, until: u32) -> Result<(), Error> {
        let Some(remote) = self.state.remote_dh_public else {
            return Ok(());
        };
        let Some(chain) = self.state.receiving_chain.as_mut() else {
            return Ok(());
        };

        if chain.index.saturating_add(self.max_skip) < until {
            return Err(Error::Protocol("Too many skipped messages".to_string()));
        }

        while chain.index < until {
            let index = chain.index;
            let message_key = chain.next_key()?;
            self.skipped_message_keys
                .insert((remote.to_bytes(), index), message_key);
        }

        Ok(())
    }

    /// Turns the Diffie-Hellman ratchet after seeing a new remote ratchet key.
    fn dh_ratchet(&mut self, remote: &X25519PublicKey) -> Result<(), Error> {
        let state = &mut self.state;

        state.previous_sending_chain_length =
            state.sending_chain.as_ref().map_or(0, |chain| chain.index);
        state.remote_dh_public = Some(*remote);

        let (root_key, receiving_key) = kdf_rk(&state.root_key, state.dh_pair.dh(remote))?;
        state.root_key = root_key;
        state.receiving_chain = Some(Chain::new(receiving_key));

        let seed = generate_random_seed()?;
        state.dh_pair = X25519Secret::from(*seed);

        let (root_key, sending_key) = kdf_rk(&state.root_key, state.dh_pair.dh(remote))?;
        state.root_key = root_key;
        state.sending_chain = Some(Chain::new(sending_key));

        Ok(())
    }

    fn associated_data(&self, header: &MessageHeader) -> Vec<u8> {
        let mut ad = Vec::with_capacity(64 + message::HEADER_LEN);
        ad.extend_from_slice(self.state.ad.as_slice());
        ad.extend_from_slice(&header.to_bytes());
        ad
    }
}

/// Root key KDF: returns the new root key and a chain key.
fn kdf_rk(
    root_key: &[u8; 32],
    dh_output: SharedSecret,
) -> Result<(Box<[u8; 32]>, Box<[u8; 32]>), Error> {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key), dh_output.as_bytes());

    let mut okm = [0u8; 64];
    hkdf.expand(b"Cohort-Ratchet-Root", &mut okm)
        .map_err(|_| Error::Crypto("HKDF expansion failed for root key".to_string()))?;

    let mut new_root_key = Box::new([0u8; 32]);
    let mut chain_key = Box::new([0u8; 32]);
    new_root_key.copy_from_slice(&okm[..32]);
    chain_key.copy_from_slice(&okm[32..]);
    okm.zeroize();

    Ok((new_root_key, chain_key))
}

/// Derives the AES key and nonce for one message key.
fn message_cipher(key: &[u8; 32]) -> Result<(Aes256GcmSiv, [u8; NONCE_SIZE]), Error> {
    let hkdf = Hkdf::<Sha256>::new(None, key);

    let mut derived = [0u8; 32 + NONCE_SIZE];
    hkdf.expand(b"Cohort-Ratchet-Message", &mut derived)
        .map_err(|_| Error::Crypto("HKDF expansion failed for message key".to_string()))?;

    let cipher = Aes256GcmSiv::new_from_slice(&derived[..32])
        .map_err(|_| Error::Crypto("Invalid message key length".to_string()))?;
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&derived[32..]);
    derived.zeroize();

    Ok((cipher, nonce))
}

fn seal(key: &[u8; 32], plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>, Error> {
    let (cipher, nonce) = message_cipher(key)?;

    cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: ad,
            },
        )
        .map_err(|_| Error::Crypto("Message encryption failed".to_string()))
}

fn open(key: &[u8; 32], ciphertext: &[u8], ad: &[u8]) -> Result<Vec<u8>, Error> {
    let (cipher, nonce) = message_cipher(key)?;

    cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad: ad,
            },
        )
        .map_err(|_| Error::Crypto("Message decryption failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SignedPreKey;

    fn create_ratchets() -> (DoubleRatchet, DoubleRatchet) {
        let bob_spk = SignedPreKey::new(1).unwrap();
        let shared_secret = generate_random_seed().unwrap();
        let ad = Box::new([5u8; 64]);

        let alice = DoubleRatchet::initialize_for_alice(
            X3DHSharedSecret(shared_secret.clone()),
            &bob_spk.public_key(),
            20,
            ad.clone(),
        )
        .unwrap();
        let bob = DoubleRatchet::initialize_for_bob(
            X3DHSharedSecret(shared_secret),
            bob_spk.key_pair(),
            20,
            ad,
        );

        (alice, bob)
    }

    #[test]
    fn test_basic_communication() {
        let (mut alice, mut bob) = create_ratchets();
        assert!(!bob.can_send());

        let encrypted = alice.encrypt(b"Hello, Bob!").unwrap();
        assert_eq!(bob.decrypt(&encrypted).unwrap(), b"Hello, Bob!");

        let response = bob.encrypt(b"Hello, Alice!").unwrap();
        assert_eq!(alice.decrypt(&response).unwrap(), b"Hello, Alice!");
    }

    #[test]
    fn test_out_of_order_messages() {
        let (mut alice, mut bob) = create_ratchets();

        let messages: Vec<_> = (0..5)
            .map(|i| alice.encrypt(format!("Message {i}").as_bytes()).unwrap())
            .collect();

        for i in [0, 2, 4, 1, 3] {
            let decrypted = bob.decrypt(&messages[i]).unwrap();
            assert_eq!(decrypted, format!("Message {i}").as_bytes());
        }
    }

    #[test]
    fn test_messages_from_previous_chain_after_ratchet() {
        let (mut alice, mut bob) = create_ratchets();

        let first = alice.encrypt(b"first").unwrap();
        let late = alice.encrypt(b"late").unwrap();
        bob.decrypt(&first).unwrap();

        let reply = bob.encrypt(b"reply").unwrap();
        alice.decrypt(&reply).unwrap();

        // Alice is on a new chain now; Bob still gets the late message.
        let newer = alice.encrypt(b"newer").unwrap();
        assert_eq!(bob.decrypt(&newer).unwrap(), b"newer");
        assert_eq!(bob.decrypt(&late).unwrap(), b"late");
    }

    #[test]
    fn test_ratchet_key_rotates() {
        let (mut alice, mut bob) = create_ratchets();
        let initial = alice.public_key();

        for i in 0..3 {
            let to_bob = alice.encrypt(format!("a{i}").as_bytes()).unwrap();
            bob.decrypt(&to_bob).unwrap();
            let to_alice = bob.encrypt(format!("b{i}").as_bytes()).unwrap();
            alice.decrypt(&to_alice).unwrap();
        }

        assert_ne!(initial, alice.public_key());
    }

    #[test]
    fn test_replay_is_rejected() {
        let (mut alice, mut bob) = create_ratchets();

        let message = alice.encrypt(b"once").unwrap();
        bob.decrypt(&message).unwrap();
        assert!(bob.decrypt(&message).is_err());
    }

    #[test]
    fn test_failed_decrypt_leaves_state_untouched() {
        let (mut alice, mut bob) = create_ratchets();

        let mut tampered = alice.encrypt(b"first").unwrap();
        let genuine = tampered.clone();
        tampered.ciphertext[0] ^= 0xff;

        assert!(bob.decrypt(&tampered).is_err());
        assert_eq!(bob.decrypt(&genuine).unwrap(), b"first");
    }

    #[test]
    fn test_tampered_header_is_rejected() {
        let (mut alice, mut bob) = create_ratchets();

        bob.decrypt(&alice.encrypt(b"zero").unwrap()).unwrap();
        let mut message = alice.encrypt(b"one").unwrap();
        message.header.previous_chain_length = 7;

        assert!(bob.decrypt(&message).is_err());
    }

    #[test]
    fn test_too_many_skipped_messages() {
        let (mut alice, mut bob) = create_ratchets();
        bob.max_skip = 2;

        let messages: Vec<_> = (0..5)
            .map(|i| alice.encrypt(format!("Message {i}").as_bytes()).unwrap())
            .collect();

        bob.decrypt(&messages[0]).unwrap();
        assert!(bob.decrypt(&messages[4]).is_err());
        assert!(bob.decrypt(&messages[3]).is_ok());
    }

    #[test]
    fn test_large_and_empty_messages() {
        let (mut alice, mut bob) = create_ratchets();

        let large = vec![b'A'; 100 * 1024];
        assert_eq!(bob.decrypt(&alice.encrypt(&large).unwrap()).unwrap(), large);
        assert!(bob.decrypt(&alice.encrypt(b"").unwrap()).unwrap().is_empty());
    }
}
