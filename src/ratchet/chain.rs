use crate::Error;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Symmetric-key ratchet chain. `index` is the number of the next message key.
#[derive(Clone)]
pub(crate) struct Chain {
    pub(crate) chain_key: Box<[u8; 32]>,
    pub(crate) index: u32,
}

impl Chain {
    pub(crate) fn new(chain_key: Box<[u8; 32]>) -> Self {
        Self {
            chain_key,
            index: 0,
        }
    }

    pub(crate) fn with_index(chain_key: Box<[u8; 32]>, index: u32) -> Self {
        Self { chain_key, index }
    }

    /// Advances the chain and returns the message key for the old index.
    pub(crate) fn next_key(&mut self) -> Result<Box<[u8; 32]>, Error> {
        let next_chain_key = self.mac(0x02)?;
        let message_key = self.mac(0x01)?;

        self.chain_key.copy_from_slice(&next_chain_key);
        self.index = self
            .index
            .checked_add(1)
            .ok_or_else(|| Error::Session("Chain exhausted".to_string()))?;

        let mut key = Box::new([0u8; 32]);
        key.copy_from_slice(&message_key);
        Ok(key)
    }

    fn mac(&self, constant: u8) -> Result<[u8; 32], Error> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.chain_key.as_slice())
            .map_err(|_| Error::Crypto("HMAC initialization failed".to_string()))?;
        mac.update(&[constant]);

        let mut output = [0u8; 32];
        output.copy_from_slice(&mac.finalize().into_bytes());
        Ok(output)
    }
}

impl Zeroize for Chain {
    fn zeroize(&mut self) {
        self.chain_key.zeroize();
        self.index = 0;
    }
}
