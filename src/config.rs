use crate::TransportHints;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Which advertised devices the resolver treats as stale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StalenessPolicy {
    /// Devices inactive for longer are dropped. `None` keeps them regardless.
    pub max_inactivity: Option<Duration>,
    /// Drop devices that have not published a bundle.
    pub require_bundle: bool,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            max_inactivity: Some(90 * DAY),
            require_bundle: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MessengerConfig {
    pub max_skipped_messages: u32,
    pub signed_pre_key_rotation_interval: Duration,
    /// How long a superseded signed pre-key stays usable after rotation.
    pub signed_pre_key_grace_period: Duration,
    pub min_one_time_pre_keys: usize,
    pub max_one_time_pre_keys: usize,
    /// HKDF context of the key agreement.
    pub protocol_info: Vec<u8>,
    /// Also encrypt to the other devices of the local account.
    pub self_sync: bool,
    pub resolve_timeout: Duration,
    pub staleness: StalenessPolicy,
    pub hints: TransportHints,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            max_skipped_messages: 100,
            signed_pre_key_rotation_interval: 7 * DAY,
            signed_pre_key_grace_period: 30 * DAY,
            min_one_time_pre_keys: 20,
            max_one_time_pre_keys: 100,
            protocol_info: b"Cohort-E2E-v1".to_vec(),
            self_sync: true,
            resolve_timeout: Duration::from_secs(10),
            staleness: StalenessPolicy::default(),
            hints: TransportHints::default(),
        }
    }
}
