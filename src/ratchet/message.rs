use crate::{Error, X25519PublicKey};

pub(crate) const HEADER_LEN: usize = 40;

/// Header of a ratchet message: sender's ratchet key, length of the previous
/// sending chain and number of this message in the current chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub public_key: X25519PublicKey,
    pub previous_chain_length: u32,
    pub message_number: u32,
}

impl MessageHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..32].copy_from_slice(self.public_key.as_bytes());
        bytes[32..36].copy_from_slice(&self.previous_chain_length.to_be_bytes());
        bytes[36..40].copy_from_slice(&self.message_number.to_be_bytes());

        bytes
    }
}

impl From<[u8; HEADER_LEN]> for MessageHeader {
    fn from(bytes: [u8; HEADER_LEN]) -> Self {
        let mut dh_bytes = [0u8; 32];
        dh_bytes.copy_from_slice(&bytes[0..32]);

        let mut pn_bytes = [0u8; 4];
        pn_bytes.copy_from_slice(&bytes[32..36]);

        let mut n_bytes = [0u8; 4];
        n_bytes.copy_from_slice(&bytes[36..40]);

        Self {
            public_key: X25519PublicKey::from(dh_bytes),
            previous_chain_length: u32::from_be_bytes(pn_bytes),
            message_number: u32::from_be_bytes(n_bytes),
        }
    }
}

/// An encrypted message in the Double Ratchet protocol.
///
/// The header travels in the clear but is authenticated as associated data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RatchetMessage {
    pub header: MessageHeader,
    pub ciphertext: Vec<u8>,
}

impl RatchetMessage {
    /// Format: [header (40 bytes)][ciphertext]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        result.extend_from_slice(&self.header.to_bytes());
        result.extend_from_slice(&self.ciphertext);

        result
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Protocol("Invalid message format".to_string()));
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&bytes[..HEADER_LEN]);

        Ok(Self {
            header: MessageHeader::from(header),
            ciphertext: bytes[HEADER_LEN..].to_vec(),
        })
    }
}
