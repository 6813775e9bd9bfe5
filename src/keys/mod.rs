mod bundle;
pub use bundle::*;
mod identity_key;
pub use identity_key::*;
mod one_time_pre_key;
pub use one_time_pre_key::*;
mod signed_pre_key;
pub use signed_pre_key::*;

use crate::{Error, X25519PublicKey};
use rand::TryRngCore;
use rand::rngs::OsRng;

/// Generates a cryptographically secure random 32-byte seed.
pub(crate) fn generate_random_seed() -> Result<Box<[u8; 32]>, Error> {
    let mut seed = Box::new([0u8; 32]);
    OsRng
        .try_fill_bytes(seed.as_mut_slice())
        .map_err(|_| Error::Random)?;
    Ok(seed)
}

/// Fills `buffer` from the operating system RNG.
pub(crate) fn fill_random(buffer: &mut [u8]) -> Result<(), Error> {
    OsRng.try_fill_bytes(buffer).map_err(|_| Error::Random)
}

/// Human comparable fingerprint of an identity key.
///
/// Lowercase hex of the public key in eight blocks of eight characters, the
/// form users read out to each other when verifying a device.
pub fn fingerprint(identity: &X25519PublicKey) -> String {
    let encoded = hex::encode(identity.as_bytes());
    encoded
        .as_bytes()
        .chunks(8)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_format() {
        let identity = IdentityKey::new().unwrap();
        let fp = fingerprint(&identity.dh_key_public());

        let blocks: Vec<_> = fp.split(' ').collect();
        assert_eq!(blocks.len(), 8);
        assert!(blocks.iter().all(|block| block.len() == 8));
        assert_eq!(fp.replace(' ', ""), hex::encode(identity.dh_key_public().as_bytes()));
    }

    #[test]
    fn test_random_seeds_differ() {
        assert_ne!(generate_random_seed().unwrap(), generate_random_seed().unwrap());
    }
}
