//! Premium capability gating.
//!
//! The session only sees [`CapabilityProvider`]; whoever learns about
//! purchases (the host bridge, a test) drives a [`PremiumStatus`].

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Capabilities unlocked by the active tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TierFlags {
    /// Second thickness, welding position, tips, alternatives and history.
    pub advanced: bool,
}

impl TierFlags {
    pub fn basic() -> Self {
        Self { advanced: false }
    }

    pub fn advanced() -> Self {
        Self { advanced: true }
    }
}

pub trait CapabilityProvider: Send + Sync {
    fn current_tier(&self) -> TierFlags;

    /// Receiver notified on every tier change. Dropping it unsubscribes.
    fn subscribe(&self) -> watch::Receiver<TierFlags>;
}

/// Tier derived from a single premium flag.
#[derive(Debug)]
pub struct PremiumStatus {
    tx: watch::Sender<TierFlags>,
}

impl PremiumStatus {
    pub fn new(premium: bool) -> Self {
        let (tx, _rx) = watch::channel(TierFlags { advanced: premium });
        Self { tx }
    }

    pub fn is_premium(&self) -> bool {
        self.tx.borrow().advanced
    }

    pub fn set_premium(&self, premium: bool) {
        let previous = self.tx.send_replace(TierFlags { advanced: premium });
        if previous.advanced != premium {
            info!("Premium status changed: {}", premium);
        }
    }
}

impl Default for PremiumStatus {
    fn default() -> Self {
        Self::new(false)
    }
}

impl CapabilityProvider for PremiumStatus {
    fn current_tier(&self) -> TierFlags {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<TierFlags> {
        self.tx.subscribe()
    }
}
