use crate::keys::generate_random_seed;
use crate::{Error, IdentityKey, OneTimePreKey, PreKeyBundle, SignedPreKey};
use crate::{X25519PublicKey, X25519Secret};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SALT: &[u8] = b"Cohort-X3DH-Salt";

/// A shared secret derived from X3DH key agreement.
pub struct X3DHSharedSecret(pub(crate) Box<[u8; 32]>);

impl Drop for X3DHSharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl ZeroizeOnDrop for X3DHSharedSecret {}

/// Result of the initiator's half of the agreement.
///
/// The ephemeral public key travels to the responder inside the first
/// messages; the shared secret seeds the initiator's ratchet.
pub struct X3DHInitiation {
    shared_secret: X3DHSharedSecret,
    ephemeral_public: X25519PublicKey,
}

impl X3DHInitiation {
    pub fn public_key(&self) -> X25519PublicKey {
        self.ephemeral_public
    }

    pub fn shared_secret(self) -> X3DHSharedSecret {
        self.shared_secret
    }
}

/// Associated data bound into every ratchet message of a session:
/// initiator identity followed by responder identity.
pub(crate) fn associated_data(
    initiator: &X25519PublicKey,
    responder: &X25519PublicKey,
) -> Box<[u8; 64]> {
    let mut ad = Box::new([0u8; 64]);
    ad[0..32].copy_from_slice(initiator.as_bytes());
    ad[32..64].copy_from_slice(responder.as_bytes());
    ad
}

/// Extended Triple Diffie-Hellman key agreement.
///
/// Lets a device start a session with a remote device that is offline, using
/// only the bundle that device published.
pub struct X3DH {
    info: Vec<u8>,
}

impl X3DH {
    /// `info` is the HKDF context; different applications derive different secrets.
    pub fn new(info: &[u8]) -> Self {
        Self {
            info: info.to_vec(),
        }
    }

    /// Initiator side: verifies the bundle, then derives the shared secret.
    pub fn initiate(
        &self,
        identity: &IdentityKey,
        bundle: &PreKeyBundle,
    ) -> Result<X3DHInitiation, Error> {
        bundle.verify()?;

        let mut seed = generate_random_seed()?;
        let ephemeral = X25519Secret::from(*seed);
        seed.zeroize();

        let signed_pre_key = bundle.signed_pre_key.1;
        // DH1 = DH(IKa, SPKb)
        let dh1 = identity.dh(&signed_pre_key);
        // DH2 = DH(EKa, IKb)
        let dh2 = ephemeral.dh(&bundle.identity);
        // DH3 = DH(EKa, SPKb)
        let dh3 = ephemeral.dh(&signed_pre_key);
        // DH4 = DH(EKa, OPKb)
        let dh4 = bundle
            .one_time_pre_key
            .map(|(_, one_time_pre_key)| ephemeral.dh(&one_time_pre_key));

        let shared_secret = self.derive(dh1, dh2, dh3, dh4)?;

        Ok(X3DHInitiation {
            shared_secret,
            ephemeral_public: ephemeral.public_key(),
        })
    }

    /// Responder side: repeats the initiator's DH computations with the private halves.
    pub fn respond(
        &self,
        identity: &IdentityKey,
        signed_pre_key: &SignedPreKey,
        one_time_pre_key: Option<OneTimePreKey>,
        initiator_identity: &X25519PublicKey,
        initiator_ephemeral: &X25519PublicKey,
    ) -> Result<X3DHSharedSecret, Error> {
        let dh1 = signed_pre_key.dh(initiator_identity);
        let dh2 = identity.dh(initiator_ephemeral);
        let dh3 = signed_pre_key.dh(initiator_ephemeral);
        let dh4 = one_time_pre_key.map(|key| key.dh(initiator_ephemeral));

        self.derive(dh1, dh2, dh3, dh4)
    }

    fn derive(
        &self,
        dh1: SharedSecret,
        dh2: SharedSecret,
        dh3: SharedSecret,
        dh4: Option<SharedSecret>,
    ) -> Result<X3DHSharedSecret, Error> {
        // IKM = DH1 || DH2 || DH3 || DH4 (if available)
        let mut key_material = Vec::with_capacity(128);
        key_material.extend_from_slice(dh1.as_bytes());
        key_material.extend_from_slice(dh2.as_bytes());
        key_material.extend_from_slice(dh3.as_bytes());
        if let Some(dh4) = &dh4 {
            key_material.extend_from_slice(dh4.as_bytes());
        }

        let hkdf = Hkdf::<Sha256>::new(Some(SALT), &key_material);
        key_material.zeroize();

        let mut shared_secret = Box::new([0u8; 32]);
        hkdf.expand(&self.info, shared_secret.as_mut_slice())
            .map_err(|_| Error::Crypto("HKDF expansion failed".to_string()))?;

        Ok(X3DHSharedSecret(shared_secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceBundle;
    use std::collections::BTreeMap;

    fn bob_bundle(
        bob: &IdentityKey,
        spk: &SignedPreKey,
        otpk: Option<&OneTimePreKey>,
    ) -> PreKeyBundle {
        DeviceBundle {
            identity: bob.dh_key_public(),
            signing_key: bob.signing_key_public(),
            signed_pre_key: (spk.id(), spk.public_key()),
            signature: spk.signature(bob),
            one_time_pre_keys: otpk
                .map(|key| BTreeMap::from([(key.id(), key.public_key())]))
                .unwrap_or_default(),
        }
        .pre_key_bundle(otpk.map(|key| key.id()))
    }

    #[test]
    fn test_x3dh_key_agreement() {
        let alice = IdentityKey::new().unwrap();
        let bob = IdentityKey::new().unwrap();
        let spk = SignedPreKey::new(1).unwrap();
        let otpk = OneTimePreKey::new(1).unwrap();
        let bundle = bob_bundle(&bob, &spk, Some(&otpk));

        let x3dh = X3DH::new(b"Test-Protocol-Info");
        let initiation = x3dh.initiate(&alice, &bundle).unwrap();
        let bob_secret = x3dh
            .respond(
                &bob,
                &spk,
                Some(otpk),
                &alice.dh_key_public(),
                &initiation.public_key(),
            )
            .unwrap();

        assert_eq!(initiation.shared_secret().0, bob_secret.0);
    }

    #[test]
    fn test_x3dh_agreement_without_one_time_key() {
        let alice = IdentityKey::new().unwrap();
        let bob = IdentityKey::new().unwrap();
        let spk = SignedPreKey::new(1).unwrap();
        let bundle = bob_bundle(&bob, &spk, None);

        let x3dh = X3DH::new(b"Test-Protocol-Info");
        let initiation = x3dh.initiate(&alice, &bundle).unwrap();
        let bob_secret = x3dh
            .respond(&bob, &spk, None, &alice.dh_key_public(), &initiation.public_key())
            .unwrap();

        assert_eq!(initiation.shared_secret().0, bob_secret.0);
    }

    #[test]
    fn test_protocol_info_separates_secrets() {
        let alice = IdentityKey::new().unwrap();
        let bob = IdentityKey::new().unwrap();
        let spk = SignedPreKey::new(1).unwrap();
        let bundle = bob_bundle(&bob, &spk, None);

        let first = X3DH::new(b"Protocol-Info-1").initiate(&alice, &bundle).unwrap();
        let bob_secret = X3DH::new(b"Protocol-Info-2")
            .respond(&bob, &spk, None, &alice.dh_key_public(), &first.public_key())
            .unwrap();

        assert_ne!(first.shared_secret().0, bob_secret.0);
    }

    #[test]
    fn test_forged_bundle_is_rejected() {
        let alice = IdentityKey::new().unwrap();
        let bob = IdentityKey::new().unwrap();
        let spk = SignedPreKey::new(1).unwrap();
        let mut bundle = bob_bundle(&bob, &spk, None);
        bundle.signing_key = IdentityKey::new().unwrap().signing_key_public();

        assert!(X3DH::new(b"info").initiate(&alice, &bundle).is_err());
    }
}
