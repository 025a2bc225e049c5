// ── Transmitter ownership index ──
//
// Maps device identity to the transmitter that relays it. Maintained by
// whatever component builds the ownership tree; devices only ever perform an
// O(1) lookup against it.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::model::{EntityId, Transmitter};

/// Concurrent device → transmitter index.
///
/// Holds transmitter records by id, plus a secondary index from each device
/// id to its transmitter id. A device is relayed by at most one transmitter;
/// attaching it elsewhere moves it.
#[derive(Default)]
pub struct TransmitterIndex {
    transmitters: DashMap<EntityId, Arc<Transmitter>>,
    device_to_transmitter: DashMap<EntityId, EntityId>,
}

impl TransmitterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a transmitter and index all of its devices.
    /// Devices that the previous version listed but this one does not are
    /// unindexed.
    pub fn upsert(&self, transmitter: Transmitter) {
        if let Some(previous) = self.transmitters.get(&transmitter.id).map(|t| Arc::clone(&t)) {
            for device in &previous.devices {
                if !transmitter.devices.contains(device) {
                    self.device_to_transmitter
                        .remove_if(device, |_, owner| *owner == transmitter.id);
                }
            }
        }

        for device in &transmitter.devices {
            if let Some(old_owner) = self
                .device_to_transmitter
                .insert(device.clone(), transmitter.id.clone())
                .filter(|old| *old != transmitter.id)
            {
                self.detach_from_record(&old_owner, device);
            }
        }

        tracing::trace!(transmitter = %transmitter.id, devices = transmitter.devices.len(), "transmitter indexed");
        self.transmitters
            .insert(transmitter.id.clone(), Arc::new(transmitter));
    }

    /// Remove a transmitter and every index entry pointing at it.
    pub fn remove(&self, transmitter_id: &EntityId) -> Option<Arc<Transmitter>> {
        let (_, removed) = self.transmitters.remove(transmitter_id)?;
        for device in &removed.devices {
            self.device_to_transmitter
                .remove_if(device, |_, owner| owner == transmitter_id);
        }
        Some(removed)
    }

    /// Replace the whole tree. Transmitters absent from `tree` are removed
    /// after the incoming ones are upserted, so lookups never observe an
    /// empty index mid-refresh.
    pub fn rebuild(&self, tree: impl IntoIterator<Item = Transmitter>) {
        let mut incoming = HashSet::new();
        for transmitter in tree {
            incoming.insert(transmitter.id.clone());
            self.upsert(transmitter);
        }

        let stale: Vec<EntityId> = self
            .transmitters
            .iter()
            .filter(|entry| !incoming.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            self.remove(&id);
        }
    }

    /// The transmitter relaying `device_id`, if any.
    pub fn transmitter_for(&self, device_id: &EntityId) -> Option<Arc<Transmitter>> {
        let owner = self.device_to_transmitter.get(device_id)?.clone();
        self.transmitters.get(&owner).map(|t| Arc::clone(&t))
    }

    pub fn get(&self, transmitter_id: &EntityId) -> Option<Arc<Transmitter>> {
        self.transmitters.get(transmitter_id).map(|t| Arc::clone(&t))
    }

    pub fn len(&self) -> usize {
        self.transmitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transmitters.is_empty()
    }

    /// Drop `device` from the device list of a transmitter that lost it.
    fn detach_from_record(&self, transmitter_id: &EntityId, device: &EntityId) {
        if let Some(mut entry) = self.transmitters.get_mut(transmitter_id) {
            let record = Arc::make_mut(entry.value_mut());
            record.devices.retain(|d| d != device);
        }
    }
}
