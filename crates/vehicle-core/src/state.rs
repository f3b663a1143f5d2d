//! Replicated vehicle state
//!
//! `SeatTable` and `AuthorityTracker` are never mutated separately: the only
//! writer is `VehicleState::assign`, which keeps the driver seat, the
//! tracked driver and the vehicle owner in lockstep.

use crate::types::{PlayerId, SeatIndex, VehicleId, VehicleOwner, DRIVER_SEAT};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// A single seat slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Seat {
    /// Ordinal of the seat anchor (0 = driver)
    pub index: SeatIndex,
    /// Current occupant, `None` when empty
    pub occupant: Option<PlayerId>,
}

impl Seat {
    pub fn is_empty(&self) -> bool {
        self.occupant.is_none()
    }
}

/// Fixed-length ordered list of seats
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SeatTable {
    seats: Vec<Seat>,
}

impl SeatTable {
    /// Create `count` empty seats
    pub fn new(count: SeatIndex) -> Self {
        Self {
            seats: (0..count)
                .map(|index| Seat {
                    index,
                    occupant: None,
                })
                .collect(),
        }
    }

    /// Table of `count` seats with the given occupants placed
    pub fn with_occupants(
        count: SeatIndex,
        occupants: impl IntoIterator<Item = (SeatIndex, PlayerId)>,
    ) -> Self {
        let mut table = Self::new(count);
        for (index, player) in occupants {
            table.set(index, Some(player));
        }
        table
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    /// Occupant of a seat (`None` if empty or out of range)
    pub fn occupant(&self, index: SeatIndex) -> Option<PlayerId> {
        self.seats.get(index as usize).and_then(|seat| seat.occupant)
    }

    /// Seat currently held by `player`
    pub fn seat_of(&self, player: PlayerId) -> Option<SeatIndex> {
        self.seats
            .iter()
            .find(|seat| seat.occupant == Some(player))
            .map(|seat| seat.index)
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.seat_of(player).is_some()
    }

    /// Lowest-index empty seat
    pub fn first_empty(&self) -> Option<SeatIndex> {
        self.seats.iter().find(|seat| seat.is_empty()).map(|seat| seat.index)
    }

    pub fn has_available_seat(&self) -> bool {
        self.first_empty().is_some()
    }

    pub fn occupied_count(&self) -> usize {
        self.seats.iter().filter(|seat| !seat.is_empty()).count()
    }

    pub fn occupants(&self) -> impl Iterator<Item = (SeatIndex, PlayerId)> + '_ {
        self.seats
            .iter()
            .filter_map(|seat| seat.occupant.map(|player| (seat.index, player)))
    }

    /// First empty seat after `from`, wrapping around, never `from` itself
    pub fn next_free_after(&self, from: SeatIndex) -> Option<SeatIndex> {
        let count = self.seats.len();
        (1..count)
            .map(|offset| (from as usize + offset) % count)
            .find(|&i| self.seats[i].is_empty())
            .map(|i| i as SeatIndex)
    }

    /// True when no player appears in two seats
    pub fn has_unique_occupants(&self) -> bool {
        let mut seen: Vec<PlayerId> = self.occupants().map(|(_, player)| player).collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        seen.len() == total
    }

    fn set(&mut self, index: SeatIndex, occupant: Option<PlayerId>) {
        if let Some(seat) = self.seats.get_mut(index as usize) {
            seat.occupant = occupant;
        }
    }
}

/// Mirrors the occupant of the driver seat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthorityTracker {
    driver: Option<PlayerId>,
}

impl AuthorityTracker {
    pub fn driver(&self) -> Option<PlayerId> {
        self.driver
    }

    pub fn has_driver(&self) -> bool {
        self.driver.is_some()
    }
}

/// Authoritative state of one vehicle
#[derive(Debug, Clone)]
pub struct VehicleState {
    vehicle: VehicleId,
    seats: SeatTable,
    authority: AuthorityTracker,
    owner: VehicleOwner,
    revision: u64,
}

impl VehicleState {
    pub fn new(vehicle: VehicleId, seat_count: SeatIndex) -> Self {
        Self {
            vehicle,
            seats: SeatTable::new(seat_count),
            authority: AuthorityTracker::default(),
            owner: VehicleOwner::Host,
            revision: 0,
        }
    }

    pub fn seats(&self) -> &SeatTable {
        &self.seats
    }

    pub fn authority(&self) -> &AuthorityTracker {
        &self.authority
    }

    pub fn owner(&self) -> VehicleOwner {
        self.owner
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn driver(&self) -> Option<PlayerId> {
        self.authority.driver()
    }

    /// Write one seat; a driver seat write also moves authority and ownership.
    ///
    /// Returns true when the vehicle owner changed.
    pub(crate) fn assign(&mut self, index: SeatIndex, occupant: Option<PlayerId>) -> bool {
        self.seats.set(index, occupant);
        if index != DRIVER_SEAT {
            return false;
        }
        self.authority.driver = occupant;
        let owner = VehicleOwner::for_driver(occupant);
        let changed = owner != self.owner;
        self.owner = owner;
        changed
    }

    /// Mark the end of one mutation
    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
    }

    /// Check every replicated-state invariant
    pub fn is_consistent(&self) -> bool {
        self.authority.driver == self.seats.occupant(DRIVER_SEAT)
            && self.owner == VehicleOwner::for_driver(self.authority.driver)
            && self.seats.has_unique_occupants()
    }

    pub fn snapshot(&self) -> SeatSnapshot {
        SeatSnapshot {
            vehicle: self.vehicle,
            revision: self.revision,
            seats: self.seats.clone(),
            driver: self.authority.driver,
            owner: self.owner,
        }
    }
}

/// Read-only replicated view of a vehicle, shipped in every broadcast
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SeatSnapshot {
    pub vehicle: VehicleId,
    pub revision: u64,
    pub seats: SeatTable,
    pub driver: Option<PlayerId>,
    pub owner: VehicleOwner,
}

impl SeatSnapshot {
    /// Placeholder view before the first replicated state arrives
    pub fn unknown(vehicle: VehicleId) -> Self {
        Self {
            vehicle,
            revision: 0,
            seats: SeatTable::new(0),
            driver: None,
            owner: VehicleOwner::Host,
        }
    }

    pub fn has_available_seat(&self) -> bool {
        self.seats.has_available_seat()
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.seats.contains(player)
    }

    pub fn is_driver(&self, player: PlayerId) -> bool {
        self.driver == Some(player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table_is_empty() {
        let table = SeatTable::new(4);
        assert_eq!(table.len(), 4);
        assert_eq!(table.first_empty(), Some(0));
        assert_eq!(table.occupied_count(), 0);
        assert!(table.seats().iter().enumerate().all(|(i, s)| s.index as usize == i));
    }

    #[test]
    fn test_next_free_after_wraps() {
        let mut state = VehicleState::new(VehicleId(1), 3);
        state.assign(0, Some(PlayerId(1)));
        state.assign(2, Some(PlayerId(2)));

        assert_eq!(state.seats().next_free_after(2), Some(1));
        assert_eq!(state.seats().next_free_after(0), Some(1));

        state.assign(1, Some(PlayerId(3)));
        assert_eq!(state.seats().next_free_after(2), None);
    }

    #[test]
    fn test_single_seat_has_no_alternate() {
        let table = SeatTable::new(1);
        assert_eq!(table.next_free_after(0), None);
    }

    #[test]
    fn test_driver_seat_moves_authority_and_owner() {
        let mut state = VehicleState::new(VehicleId(1), 2);
        assert!(state.assign(0, Some(PlayerId(7))));
        assert_eq!(state.driver(), Some(PlayerId(7)));
        assert_eq!(state.owner(), VehicleOwner::Player(PlayerId(7)));
        assert!(state.is_consistent());

        assert!(!state.assign(1, Some(PlayerId(8))));
        assert_eq!(state.driver(), Some(PlayerId(7)));

        assert!(state.assign(0, None));
        assert_eq!(state.owner(), VehicleOwner::Host);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_duplicate_occupant_is_inconsistent() {
        let mut state = VehicleState::new(VehicleId(1), 2);
        state.assign(0, Some(PlayerId(7)));
        state.assign(1, Some(PlayerId(7)));
        assert!(!state.is_consistent());
    }
}
