//! Engine tuning.

use std::time::Duration;

use crate::media::TrackPolicy;

/// Default wait before a disconnected transport is restarted.
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(3);

/// Default number of consecutive ICE restarts before escalating.
pub const DEFAULT_MAX_ICE_RESTARTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationConfig {
    /// How long a link may stay `disconnected` before an ICE restart.
    pub disconnect_grace: Duration,
    /// Consecutive ICE restarts allowed before asking the peer to rebuild
    /// the link.
    pub max_ice_restarts: u32,
    pub track_policy: TrackPolicy,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            max_ice_restarts: DEFAULT_MAX_ICE_RESTARTS,
            track_policy: TrackPolicy::default(),
        }
    }
}
