//! Devices already proven to be the wrong peripheral.
//!
//! The blacklist only grows for the lifetime of a session. There is no
//! removal: a device is cleared of suspicion only by starting a new session.

use std::collections::HashSet;

use crate::types::DeviceId;

/// Session-scoped set of rejected device identifiers.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    devices: HashSet<DeviceId>,
}

impl Blacklist {
    /// An empty blacklist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` has been rejected.
    #[must_use]
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains(id)
    }

    /// Record `id` as rejected. Adding an id twice is a no-op.
    ///
    /// Returns `true` if the id was not present before.
    pub fn add(&mut self, id: DeviceId) -> bool {
        self.devices.insert(id)
    }

    /// Number of rejected devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether nothing has been rejected yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Iterate over rejected identifiers in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceId> {
        self.devices.iter()
    }
}
