//! Per-discovery decision: connect, reject or ignore.

use serde::{Deserialize, Serialize};

use crate::blacklist::Blacklist;
use crate::types::DiscoveredDevice;

/// Outcome of inspecting one discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Keep scanning without acting on this discovery.
    Ignore,
    /// Known wrong device: the transport should stop offering it.
    RejectPermanently,
    /// Attempt a connection now.
    Connect,
}

/// Discovery policy.
///
/// The blacklist always wins. After that, an optional signal-strength floor
/// can turn weak discoveries into [`Decision::Ignore`]; by default there is
/// none and the first non-blacklisted discovery is connected to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryFilter {
    min_rssi: Option<i16>,
}

impl DiscoveryFilter {
    /// Filter with no ignore conditions.
    #[must_use]
    pub const fn new() -> Self {
        Self { min_rssi: None }
    }

    /// Ignore discoveries reporting a signal weaker than `min_rssi` dBm.
    ///
    /// Discoveries without an RSSI reading are not ignored.
    #[must_use]
    pub const fn with_min_rssi(mut self, min_rssi: i16) -> Self {
        self.min_rssi = Some(min_rssi);
        self
    }

    /// Decide what to do with `device`.
    #[must_use]
    pub fn decide(&self, device: &DiscoveredDevice, blacklist: &Blacklist) -> Decision {
        if blacklist.contains(&device.id) {
            return Decision::RejectPermanently;
        }

        match (self.min_rssi, device.rssi) {
            (Some(floor), Some(rssi)) if rssi < floor => Decision::Ignore,
            _ => Decision::Connect,
        }
    }
}
