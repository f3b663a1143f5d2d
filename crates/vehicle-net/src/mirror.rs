//! Replicated vehicle mirrors
//!
//! Non-authoritative nodes keep a read-only copy of each vehicle's seat
//! snapshot. Snapshots are revisioned: older or repeated ones are ignored,
//! and a jump of more than one revision means events were missed.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use vehicle_core::{PlayerId, SeatIndex, SeatSnapshot, VehicleId};

/// Outcome of offering a snapshot to a mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorUpdate {
    /// Snapshot accepted; `resynced` is set when it replaced an unsynced
    /// or out-of-date view rather than following the previous revision
    Applied { resynced: bool },
    /// Same or older revision, ignored
    Stale,
    /// Revision skipped ahead; the event that carried it was dropped
    Gap { expected: u64, received: u64 },
}

#[derive(Debug)]
struct MirrorState {
    snapshot: SeatSnapshot,
    synced: bool,
}

/// Read-only copy of one vehicle's replicated state
#[derive(Debug)]
pub struct ReplicatedVehicle {
    vehicle: VehicleId,
    state: RwLock<MirrorState>,
}

impl ReplicatedVehicle {
    pub fn new(vehicle: VehicleId) -> Self {
        Self {
            vehicle,
            state: RwLock::new(MirrorState {
                snapshot: SeatSnapshot::unknown(vehicle),
                synced: false,
            }),
        }
    }

    pub fn vehicle(&self) -> VehicleId {
        self.vehicle
    }

    /// Offer the snapshot carried by an event.
    ///
    /// Only the direct successor of the current revision is accepted, so
    /// every edge is dispatched exactly once and in order.
    pub fn apply_event(&self, snapshot: &SeatSnapshot) -> MirrorUpdate {
        let mut state = self.state.write();
        if snapshot.vehicle != self.vehicle {
            return MirrorUpdate::Stale;
        }
        if !state.synced {
            state.snapshot = snapshot.clone();
            state.synced = true;
            return MirrorUpdate::Applied { resynced: true };
        }

        let current = state.snapshot.revision;
        if snapshot.revision <= current {
            MirrorUpdate::Stale
        } else if snapshot.revision == current + 1 {
            state.snapshot = snapshot.clone();
            MirrorUpdate::Applied { resynced: false }
        } else {
            MirrorUpdate::Gap {
                expected: current + 1,
                received: snapshot.revision,
            }
        }
    }

    /// Offer a full snapshot (spawn, join, sync response)
    pub fn apply_snapshot(&self, snapshot: &SeatSnapshot) -> MirrorUpdate {
        let mut state = self.state.write();
        if snapshot.vehicle != self.vehicle {
            return MirrorUpdate::Stale;
        }
        if state.synced && snapshot.revision <= state.snapshot.revision {
            return MirrorUpdate::Stale;
        }
        state.snapshot = snapshot.clone();
        state.synced = true;
        MirrorUpdate::Applied { resynced: true }
    }

    pub fn is_synced(&self) -> bool {
        self.state.read().synced
    }

    pub fn snapshot(&self) -> SeatSnapshot {
        self.state.read().snapshot.clone()
    }

    pub fn revision(&self) -> u64 {
        self.state.read().snapshot.revision
    }

    pub fn has_available_seat(&self) -> bool {
        self.state.read().snapshot.has_available_seat()
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.state.read().snapshot.contains(player)
    }

    pub fn seat_of(&self, player: PlayerId) -> Option<SeatIndex> {
        self.state.read().snapshot.seats.seat_of(player)
    }

    pub fn driver(&self) -> Option<PlayerId> {
        self.state.read().snapshot.driver
    }

    pub fn is_driver(&self, player: PlayerId) -> bool {
        self.driver() == Some(player)
    }

    /// Occupants other than `except`
    pub fn occupants_except(&self, except: PlayerId) -> Vec<PlayerId> {
        self.state
            .read()
            .snapshot
            .seats
            .occupants()
            .map(|(_, player)| player)
            .filter(|player| *player != except)
            .collect()
    }
}

/// All mirrors known to one node
#[derive(Clone, Default)]
pub struct MirrorSet {
    vehicles: Arc<DashMap<VehicleId, Arc<ReplicatedVehicle>>>,
}

impl MirrorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&self, vehicle: VehicleId) -> Arc<ReplicatedVehicle> {
        self.vehicles
            .entry(vehicle)
            .or_insert_with(|| Arc::new(ReplicatedVehicle::new(vehicle)))
            .value()
            .clone()
    }

    pub fn get(&self, vehicle: VehicleId) -> Option<Arc<ReplicatedVehicle>> {
        self.vehicles.get(&vehicle).map(|r| r.value().clone())
    }

    pub fn remove(&self, vehicle: VehicleId) -> Option<Arc<ReplicatedVehicle>> {
        self.vehicles.remove(&vehicle).map(|(_, mirror)| mirror)
    }

    /// Vehicle the player sits in, if any
    pub fn vehicle_of(&self, player: PlayerId) -> Option<VehicleId> {
        self.vehicles
            .iter()
            .find(|r| r.value().contains(player))
            .map(|r| *r.key())
    }

    pub fn is_seated_anywhere(&self, player: PlayerId) -> bool {
        self.vehicle_of(player).is_some()
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vehicle_core::{SeatTable, VehicleOwner};

    fn snapshot(revision: u64, driver: Option<PlayerId>) -> SeatSnapshot {
        SeatSnapshot {
            vehicle: VehicleId(1),
            revision,
            seats: SeatTable::with_occupants(2, driver.map(|p| (0, p))),
            driver,
            owner: VehicleOwner::for_driver(driver),
        }
    }

    #[test]
    fn test_first_snapshot_syncs() {
        let mirror = ReplicatedVehicle::new(VehicleId(1));
        assert!(!mirror.is_synced());
        assert!(!mirror.has_available_seat());

        assert_eq!(
            mirror.apply_event(&snapshot(4, None)),
            MirrorUpdate::Applied { resynced: true }
        );
        assert!(mirror.is_synced());
        assert_eq!(mirror.revision(), 4);
    }

    #[test]
    fn test_stale_and_duplicate_ignored() {
        let mirror = ReplicatedVehicle::new(VehicleId(1));
        mirror.apply_snapshot(&snapshot(3, None));

        assert_eq!(mirror.apply_event(&snapshot(3, None)), MirrorUpdate::Stale);
        assert_eq!(mirror.apply_event(&snapshot(2, None)), MirrorUpdate::Stale);
        assert_eq!(mirror.apply_snapshot(&snapshot(3, None)), MirrorUpdate::Stale);
        assert_eq!(
            mirror.apply_event(&snapshot(4, None)),
            MirrorUpdate::Applied { resynced: false }
        );
    }

    #[test]
    fn test_gap_is_reported_and_not_applied() {
        let mirror = ReplicatedVehicle::new(VehicleId(1));
        mirror.apply_snapshot(&snapshot(1, None));

        assert_eq!(
            mirror.apply_event(&snapshot(5, None)),
            MirrorUpdate::Gap {
                expected: 2,
                received: 5
            }
        );
        assert_eq!(mirror.revision(), 1);

        // a full snapshot closes the gap
        assert_eq!(
            mirror.apply_snapshot(&snapshot(5, None)),
            MirrorUpdate::Applied { resynced: true }
        );
    }

    #[test]
    fn test_other_vehicle_is_ignored() {
        let mirror = ReplicatedVehicle::new(VehicleId(2));
        assert_eq!(mirror.apply_snapshot(&snapshot(1, None)), MirrorUpdate::Stale);
        assert!(!mirror.is_synced());
    }

    #[test]
    fn test_mirror_set_finds_seated_player() {
        let mirrors = MirrorSet::new();
        mirrors.get_or_insert(VehicleId(1)).apply_snapshot(&snapshot(1, Some(PlayerId(3))));
        mirrors.get_or_insert(VehicleId(2));

        assert_eq!(mirrors.vehicle_of(PlayerId(3)), Some(VehicleId(1)));
        assert!(!mirrors.is_seated_anywhere(PlayerId(4)));
        assert!(mirrors.get(VehicleId(1)).unwrap().is_driver(PlayerId(3)));

        mirrors.remove(VehicleId(1));
        assert!(!mirrors.is_seated_anywhere(PlayerId(3)));
        assert_eq!(mirrors.len(), 1);
    }
}
