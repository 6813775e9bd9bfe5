use crate::{AccountId, Envelope, Error};
use async_trait::async_trait;

/// Delivery hints attached to every envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportHints {
    /// Plain body shown by clients that cannot decrypt.
    pub fallback_body: Option<String>,
    /// Ask the server to archive the message even though it has no plain body.
    pub request_storage: bool,
    /// Mark the message as end-to-end encrypted for clients that inspect it.
    pub announce_encryption: bool,
}

impl Default for TransportHints {
    fn default() -> Self {
        Self {
            fallback_body: Some(
                "This message is end-to-end encrypted and cannot be displayed by this client."
                    .to_string(),
            ),
            request_storage: true,
            announce_encryption: true,
        }
    }
}

/// Delivers assembled envelopes. Wire encoding is up to the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, recipients: &[AccountId], envelope: &Envelope) -> Result<(), Error>;
}
