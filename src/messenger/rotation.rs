use super::Messenger;
use crate::Error;
use std::time::SystemTime;
use tracing::instrument;

#[derive(Debug, Default)]
pub(crate) struct RotationState {
    /// Signed pre-key generated by an interrupted rotation, reused on retry.
    pub(crate) pending: Option<u32>,
}

impl Messenger {
    /// Replaces the current signed pre-key.
    ///
    /// The new key is published first and only then made current; the
    /// superseded key stays usable for the configured grace period. When
    /// publishing fails the old key stays current and advertised, and the
    /// next call retries with the same new key. Returns the id of the new
    /// current key.
    #[instrument(skip(self), fields(device = %self.local))]
    pub async fn rotate_signed_pre_key(&self) -> Result<u32, Error> {
        let mut rotation = self.rotation.lock().await;
        self.rotate_locked(&mut rotation).await
    }

    /// Rotates when the current signed pre-key is older than the rotation interval.
    ///
    /// The age is checked under the rotation lock, so concurrent callers
    /// rotate once.
    #[instrument(skip(self), fields(device = %self.local))]
    pub async fn rotate_if_due(&self) -> Result<Option<u32>, Error> {
        let mut rotation = self.rotation.lock().await;

        let current = self.store.current_signed_pre_key()?;
        let age = SystemTime::now()
            .duration_since(current.created_at())
            .unwrap_or_default();
        if age < self.config.signed_pre_key_rotation_interval {
            return Ok(None);
        }

        self.rotate_locked(&mut rotation).await.map(Some)
    }

    async fn rotate_locked(&self, rotation: &mut RotationState) -> Result<u32, Error> {
        let pending = match rotation.pending {
            Some(id) => self.store.signed_pre_key(id)?,
            None => None,
        };
        let next = match pending {
            Some(key) => {
                tracing::debug!(id = key.id(), "retrying pending signed pre-key");
                key
            }
            None => self.store.create_signed_pre_key()?,
        };
        rotation.pending = Some(next.id());

        self.publish_locked(&next).await?;

        let previous = self.store.promote_signed_pre_key(next.id())?;
        rotation.pending = None;

        let now = SystemTime::now();
        if let Some(previous) = previous {
            let expiry = now
                .checked_add(self.config.signed_pre_key_grace_period)
                .ok_or_else(|| Error::PreKey("Grace period out of range".to_string()))?;
            self.store.expire_signed_pre_key(previous, expiry)?;
        }
        let purged = self.store.purge_expired_signed_pre_keys(now)?;

        tracing::info!(
            id = next.id(),
            ?previous,
            purged = purged.len(),
            "signed pre-key rotated"
        );
        Ok(next.id())
    }

    /// Deletes superseded signed pre-keys whose grace period is over.
    pub async fn prune_signed_pre_keys(&self) -> Result<Vec<u32>, Error> {
        let _rotation = self.rotation.lock().await;
        let purged = self
            .store
            .purge_expired_signed_pre_keys(SystemTime::now())?;
        if !purged.is_empty() {
            tracing::info!(?purged, "expired signed pre-keys deleted");
        }

        Ok(purged)
    }
}
