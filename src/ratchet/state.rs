use crate::ratchet::chain::Chain;
use crate::{X25519PublicKey, X25519Secret};
use zeroize::Zeroize;

#[derive(Clone)]
pub(crate) struct RatchetState {
    /// Identity keys of both parties, bound into every message.
    pub(crate) ad: Box<[u8; 64]>,

    pub(crate) dh_pair: X25519Secret,
    pub(crate) remote_dh_public: Option<X25519PublicKey>,

    pub(crate) root_key: Box<[u8; 32]>,
    pub(crate) sending_chain: Option<Chain>,
    pub(crate) receiving_chain: Option<Chain>,

    pub(crate) previous_sending_chain_length: u32,
}

impl Zeroize for RatchetState {
    fn zeroize(&mut self) {
        self.dh_pair.zeroize();
        self.root_key.zeroize();

        if let Some(chain) = self.sending_chain.as_mut() {
            chain.zeroize();
        }
        if let Some(chain) = self.receiving_chain.as_mut() {
            chain.zeroize();
        }
    }
}
