//! Vehicle seat controller - authoritative seat state machine
//!
//! Runs on the host only. Every mutator checks its precondition and applies
//! its change inside one write-lock critical section, so the driver seat,
//! the tracked driver and the vehicle owner are always observed together.
//! Failed preconditions are not errors: a request that lost a race simply
//! does nothing.

use crate::error::SeatError;
use crate::services::{PlayerBody, PlayerRegistry, SessionService, Services, VehicleBody};
use crate::state::{SeatSnapshot, VehicleState};
use crate::types::{PlayerId, SeatIndex, Vec3, VehicleId, VehicleOwner, DRIVER_SEAT};
use parking_lot::RwLock;
use std::sync::Arc;

/// What kind of mutation produced a `SeatChange`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatChangeKind {
    Admitted,
    Removed,
    Reseated,
    Cleared,
}

/// Result of one successful mutation
#[derive(Debug, Clone)]
pub struct SeatChange {
    pub kind: SeatChangeKind,
    pub player: PlayerId,
    /// Seat vacated by the player
    pub from: Option<SeatIndex>,
    /// Seat now held by the player
    pub to: Option<SeatIndex>,
    pub previous_driver: Option<PlayerId>,
    pub driver: Option<PlayerId>,
    /// Vehicle velocity read just before the driver seat changed hands
    pub captured_velocity: Option<Vec3>,
    /// State right after the mutation
    pub snapshot: SeatSnapshot,
}

impl SeatChange {
    pub fn driver_changed(&self) -> bool {
        self.previous_driver != self.driver
    }

    /// The player now holds the driver seat and did not before
    pub fn became_driver(&self) -> bool {
        self.driver == Some(self.player) && self.previous_driver != Some(self.player)
    }

    /// The player held the driver seat and no longer does
    pub fn left_driver_seat(&self) -> bool {
        self.previous_driver == Some(self.player) && self.driver != Some(self.player)
    }

    fn seat(&self) -> SeatIndex {
        self.to.or(self.from).unwrap_or(DRIVER_SEAT)
    }
}

/// Owns the seat table and authority of one vehicle
pub struct VehicleSeatController {
    id: VehicleId,
    state: RwLock<VehicleState>,
    session: Arc<dyn SessionService>,
    players: Arc<dyn PlayerRegistry>,
    body: Arc<dyn VehicleBody>,
}

impl VehicleSeatController {
    /// Create the seat table of a freshly spawned vehicle (host only)
    pub fn spawn(id: VehicleId, seat_count: SeatIndex, services: &Services) -> Result<Self, SeatError> {
        if !services.is_authority() {
            return Err(SeatError::NotAuthority);
        }
        if seat_count == 0 {
            return Err(SeatError::NoSeats);
        }

        let body = services.physics.vehicle_body(id);
        body.set_owner(VehicleOwner::Host);

        tracing::info!("Spawned {} with {} seats", id, seat_count);

        Ok(Self {
            id,
            state: RwLock::new(VehicleState::new(id, seat_count)),
            session: services.session.clone(),
            players: services.players.clone(),
            body,
        })
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn body(&self) -> &Arc<dyn VehicleBody> {
        &self.body
    }

    // ---- readers ----

    pub fn snapshot(&self) -> SeatSnapshot {
        self.state.read().snapshot()
    }

    pub fn seat_count(&self) -> usize {
        self.state.read().seats().len()
    }

    pub fn driver(&self) -> Option<PlayerId> {
        self.state.read().driver()
    }

    pub fn has_driver(&self) -> bool {
        self.state.read().authority().has_driver()
    }

    pub fn is_driver(&self, player: PlayerId) -> bool {
        self.driver() == Some(player)
    }

    pub fn owner(&self) -> VehicleOwner {
        self.state.read().owner()
    }

    pub fn is_in_vehicle(&self, player: PlayerId) -> bool {
        self.state.read().seats().contains(player)
    }

    pub fn seat_of(&self, player: PlayerId) -> Option<SeatIndex> {
        self.state.read().seats().seat_of(player)
    }

    pub fn has_available_seat(&self) -> bool {
        self.state.read().seats().has_available_seat()
    }

    // ---- admission ----

    fn check_admit(&self, state: &VehicleState, player: PlayerId) -> Result<SeatIndex, SeatError> {
        if !self.session.is_authority() {
            return Err(SeatError::NotAuthority);
        }
        if let Some(seat) = state.seats().seat_of(player) {
            return Err(SeatError::AlreadySeated(player, seat));
        }
        state.seats().first_empty().ok_or(SeatError::VehicleFull)
    }

    pub fn can_admit(&self, player: PlayerId) -> bool {
        self.check_admit(&self.state.read(), player).is_ok()
    }

    /// Seat `player` in the lowest empty seat
    pub fn admit(&self, player: PlayerId) -> Option<SeatChange> {
        let (change, handle) = {
            let mut state = self.state.write();
            let seat = match self.check_admit(&state, player) {
                Ok(seat) => seat,
                Err(e) => {
                    tracing::debug!("{}: admit {} ignored: {}", self.id, player, e);
                    return None;
                }
            };
            let handle = match self.resolve_player(player) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::error!("{}: {}; admit rejected", self.id, e);
                    return None;
                }
            };

            let previous_driver = state.driver();
            let captured_velocity = (seat == DRIVER_SEAT).then(|| self.body.velocity());
            self.write_seat(&mut state, seat, Some(player));
            state.bump_revision();
            debug_assert!(state.is_consistent());

            let change = SeatChange {
                kind: SeatChangeKind::Admitted,
                player,
                from: None,
                to: Some(seat),
                previous_driver,
                driver: state.driver(),
                captured_velocity,
                snapshot: state.snapshot(),
            };
            (change, handle)
        };

        handle.attach_to_seat(self.id, change.seat());
        tracing::info!("{}: parented {} to seat {}", self.id, player, change.seat());
        Some(change)
    }

    // ---- removal ----

    fn check_remove(&self, state: &VehicleState, player: PlayerId) -> Result<SeatIndex, SeatError> {
        if !self.session.is_authority() {
            return Err(SeatError::NotAuthority);
        }
        state.seats().seat_of(player).ok_or(SeatError::NotInVehicle(player))
    }

    pub fn can_remove(&self, player: PlayerId) -> bool {
        self.check_remove(&self.state.read(), player).is_ok()
    }

    /// Vacate the seat held by `player`
    pub fn remove(&self, player: PlayerId) -> Option<SeatChange> {
        self.remove_with_velocity(player, None)
    }

    /// Vacate the seat held by `player`. A departing driver's `forwarded`
    /// velocity wins over the host's copy of the vehicle body, which lags
    /// while a remote player simulates it.
    pub fn remove_with_velocity(&self, player: PlayerId, forwarded: Option<Vec3>) -> Option<SeatChange> {
        let (change, handle) = {
            let mut state = self.state.write();
            let seat = match self.check_remove(&state, player) {
                Ok(seat) => seat,
                Err(e) => {
                    tracing::debug!("{}: remove {} ignored: {}", self.id, player, e);
                    return None;
                }
            };
            let handle = match self.resolve_player(player) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::error!("{}: {}; remove rejected", self.id, e);
                    return None;
                }
            };

            let previous_driver = state.driver();
            // read before the owner flips back to the host
            let captured_velocity = (seat == DRIVER_SEAT).then(|| self.driver_velocity(forwarded));
            self.write_seat(&mut state, seat, None);
            state.bump_revision();
            debug_assert!(state.is_consistent());

            let change = SeatChange {
                kind: SeatChangeKind::Removed,
                player,
                from: Some(seat),
                to: None,
                previous_driver,
                driver: state.driver(),
                captured_velocity,
                snapshot: state.snapshot(),
            };
            (change, handle)
        };

        handle.detach_from_seat(self.id);
        if let Some(velocity) = change.captured_velocity {
            handle.set_velocity(velocity);
        }
        tracing::info!("{}: unparented {} from seat {:?}", self.id, player, change.from);
        Some(change)
    }

    // ---- reseat ----

    fn check_change_seat(
        &self,
        state: &VehicleState,
        player: PlayerId,
    ) -> Result<(SeatIndex, SeatIndex), SeatError> {
        if !self.session.is_authority() {
            return Err(SeatError::NotAuthority);
        }
        let current = state
            .seats()
            .seat_of(player)
            .ok_or(SeatError::NotInVehicle(player))?;
        let target = state
            .seats()
            .next_free_after(current)
            .ok_or(SeatError::NoAlternateSeat)?;
        Ok((current, target))
    }

    pub fn can_change_seat(&self, player: PlayerId) -> bool {
        self.check_change_seat(&self.state.read(), player).is_ok()
    }

    /// Move `player` to the next empty seat after its own, wrapping around
    pub fn change_seat(&self, player: PlayerId) -> Option<SeatChange> {
        self.change_seat_with_velocity(player, None)
    }

    /// Reseat `player`; `forwarded` is used only when it leaves the driver seat
    pub fn change_seat_with_velocity(&self, player: PlayerId, forwarded: Option<Vec3>) -> Option<SeatChange> {
        let (change, handle) = {
            let mut state = self.state.write();
            let (current, target) = match self.check_change_seat(&state, player) {
                Ok(seats) => seats,
                Err(e) => {
                    tracing::debug!("{}: change seat for {} ignored: {}", self.id, player, e);
                    return None;
                }
            };
            let handle = match self.resolve_player(player) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::error!("{}: {}; change seat rejected", self.id, e);
                    return None;
                }
            };

            let previous_driver = state.driver();
            let captured_velocity = if current == DRIVER_SEAT {
                Some(self.driver_velocity(forwarded))
            } else {
                (target == DRIVER_SEAT).then(|| self.body.velocity())
            };
            self.write_seat(&mut state, current, None);
            self.write_seat(&mut state, target, Some(player));
            state.bump_revision();
            debug_assert!(state.is_consistent());

            let change = SeatChange {
                kind: SeatChangeKind::Reseated,
                player,
                from: Some(current),
                to: Some(target),
                previous_driver,
                driver: state.driver(),
                captured_velocity,
                snapshot: state.snapshot(),
            };
            (change, handle)
        };

        handle.attach_to_seat(self.id, change.seat());
        tracing::info!(
            "{}: moved {} from seat {:?} to seat {:?}",
            self.id,
            player,
            change.from,
            change.to
        );
        Some(change)
    }

    // ---- lifecycle ----

    /// Clear the seat of a player whose connection dropped
    pub fn handle_disconnect(&self, player: PlayerId) -> Option<SeatChange> {
        let mut state = self.state.write();
        if let Err(e) = self.check_remove(&state, player) {
            tracing::debug!("{}: disconnect cleanup for {} skipped: {}", self.id, player, e);
            return None;
        }
        let seat = state.seats().seat_of(player)?;

        let previous_driver = state.driver();
        self.write_seat(&mut state, seat, None);
        state.bump_revision();
        debug_assert!(state.is_consistent());

        tracing::info!("{}: cleared seat {} of disconnected {}", self.id, seat, player);

        Some(SeatChange {
            kind: SeatChangeKind::Cleared,
            player,
            from: Some(seat),
            to: None,
            previous_driver,
            driver: state.driver(),
            captured_velocity: None,
            snapshot: state.snapshot(),
        })
    }

    /// Evict every occupant before the vehicle is destroyed
    pub fn despawn(&self) -> Vec<PlayerId> {
        let evicted: Vec<(SeatIndex, PlayerId)> = {
            let mut state = self.state.write();
            let occupants: Vec<_> = state.seats().occupants().collect();
            for (seat, _) in &occupants {
                self.write_seat(&mut state, *seat, None);
            }
            if !occupants.is_empty() {
                state.bump_revision();
                debug_assert!(state.is_consistent());
            }
            occupants
        };

        for (_, player) in &evicted {
            if let Some(handle) = self.players.resolve(*player) {
                handle.detach_from_seat(self.id);
            }
        }

        tracing::info!("Despawned {} ({} occupants evicted)", self.id, evicted.len());
        evicted.into_iter().map(|(_, player)| player).collect()
    }

    // ---- internals ----

    fn resolve_player(&self, player: PlayerId) -> Result<Arc<dyn PlayerBody>, SeatError> {
        self.players.resolve(player).ok_or(SeatError::PlayerNotFound(player))
    }

    fn driver_velocity(&self, forwarded: Option<Vec3>) -> Vec3 {
        match forwarded {
            Some(velocity) => velocity.sanitized(),
            None => self.body.velocity(),
        }
    }

    /// Seat write that forwards an ownership change to the vehicle body
    fn write_seat(&self, state: &mut VehicleState, seat: SeatIndex, occupant: Option<PlayerId>) {
        if state.assign(seat, occupant) {
            self.body.set_owner(state.owner());
            tracing::debug!("{}: ownership -> {:?}", self.id, state.owner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FixedSession, InMemoryWorld};

    const HOST: PlayerId = PlayerId(0);
    const A: PlayerId = PlayerId(1);
    const B: PlayerId = PlayerId(2);
    const C: PlayerId = PlayerId(3);

    fn setup(seats: SeatIndex) -> (VehicleSeatController, InMemoryWorld) {
        let world = InMemoryWorld::new();
        for player in [HOST, A, B, C] {
            world.register(player);
        }
        let services = Services::new(
            Arc::new(FixedSession::host(HOST)),
            Arc::new(world.clone()),
            Arc::new(world.clone()),
        );
        let controller = VehicleSeatController::spawn(VehicleId(1), seats, &services).unwrap();
        (controller, world)
    }

    #[test]
    fn test_spawn_requires_authority() {
        let world = InMemoryWorld::new();
        let services = Services::new(
            Arc::new(FixedSession::new(A, HOST)),
            Arc::new(world.clone()),
            Arc::new(world),
        );
        let result = VehicleSeatController::spawn(VehicleId(1), 2, &services);
        assert_eq!(result.err(), Some(SeatError::NotAuthority));
    }

    #[test]
    fn test_spawn_requires_seats() {
        let world = InMemoryWorld::new();
        let services = Services::new(
            Arc::new(FixedSession::host(HOST)),
            Arc::new(world.clone()),
            Arc::new(world),
        );
        let result = VehicleSeatController::spawn(VehicleId(1), 0, &services);
        assert_eq!(result.err(), Some(SeatError::NoSeats));
    }

    #[test]
    fn test_admit_first_player_becomes_driver() {
        let (controller, world) = setup(3);

        let change = controller.admit(A).unwrap();
        assert_eq!(change.to, Some(0));
        assert!(change.became_driver());
        assert_eq!(controller.driver(), Some(A));
        assert_eq!(controller.owner(), VehicleOwner::Player(A));
        assert_eq!(world.vehicle(VehicleId(1)).owner(), VehicleOwner::Player(A));
        assert_eq!(world.player(A).unwrap().seat(), Some((VehicleId(1), 0)));
        assert_eq!(change.snapshot.revision, 1);
    }

    #[test]
    fn test_admit_fills_lowest_empty_seat() {
        let (controller, _) = setup(3);
        controller.admit(A).unwrap();
        let change = controller.admit(B).unwrap();
        assert_eq!(change.to, Some(1));
        assert!(!change.became_driver());
        assert_eq!(controller.driver(), Some(A));
    }

    #[test]
    fn test_admit_twice_is_noop() {
        let (controller, _) = setup(3);
        controller.admit(A).unwrap();
        assert!(!controller.can_admit(A));
        assert!(controller.admit(A).is_none());
        assert_eq!(controller.snapshot().revision, 1);
    }

    #[test]
    fn test_full_vehicle_rejects_admission() {
        let (controller, _) = setup(2);
        controller.admit(A).unwrap();
        controller.admit(B).unwrap();

        let before = controller.snapshot();
        assert!(!controller.can_admit(C));
        assert!(controller.admit(C).is_none());
        assert_eq!(controller.snapshot(), before);
    }

    #[test]
    fn test_racing_admits_for_last_seat() {
        let (controller, _) = setup(2);
        controller.admit(A).unwrap();

        // both saw a free seat before either request arrived
        assert!(controller.can_admit(B));
        assert!(controller.can_admit(C));

        let first = controller.admit(B);
        let second = controller.admit(C);
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(!controller.is_in_vehicle(C));
    }

    #[test]
    fn test_admit_unknown_player_does_not_mutate() {
        let (controller, _) = setup(2);
        let ghost = PlayerId(99);
        assert!(controller.can_admit(ghost));
        assert!(controller.admit(ghost).is_none());
        assert!(!controller.is_in_vehicle(ghost));
        assert_eq!(controller.driver(), None);
        assert_eq!(controller.snapshot().revision, 0);
        assert_eq!(
            controller.resolve_player(ghost).err(),
            Some(SeatError::PlayerNotFound(ghost))
        );
    }

    #[test]
    fn test_remove_driver_captures_velocity() {
        let (controller, world) = setup(2);
        controller.admit(A).unwrap();
        let v = Vec3::new(12.0, 0.0, -3.0);
        world.vehicle(VehicleId(1)).set_velocity(v);

        let change = controller.remove(A).unwrap();
        assert!(change.left_driver_seat());
        assert_eq!(change.captured_velocity, Some(v));
        assert_eq!(controller.driver(), None);
        assert_eq!(controller.owner(), VehicleOwner::Host);
        assert_eq!(world.vehicle(VehicleId(1)).owner(), VehicleOwner::Host);

        let body = world.player(A).unwrap();
        assert_eq!(body.seat(), None);
        assert_eq!(body.velocity(), v);
    }

    #[test]
    fn test_remove_driver_prefers_forwarded_velocity() {
        let (controller, world) = setup(2);
        controller.admit(A).unwrap();
        // host copy is stale while A simulates the vehicle
        world.vehicle(VehicleId(1)).set_velocity(Vec3::new(9.0, 0.0, 0.0));
        let driven = Vec3::new(30.0, 0.0, -4.0);

        let change = controller.remove_with_velocity(A, Some(driven)).unwrap();
        assert_eq!(change.captured_velocity, Some(driven));
        assert_eq!(world.player(A).unwrap().velocity(), driven);
    }

    #[test]
    fn test_remove_passenger_ignores_forwarded_velocity() {
        let (controller, world) = setup(2);
        controller.admit(A).unwrap();
        controller.admit(B).unwrap();

        let change = controller
            .remove_with_velocity(B, Some(Vec3::new(50.0, 0.0, 0.0)))
            .unwrap();
        assert_eq!(change.captured_velocity, None);
        assert_eq!(world.player(B).unwrap().velocity(), Vec3::ZERO);
    }

    #[test]
    fn test_remove_passenger_keeps_driver() {
        let (controller, _) = setup(2);
        controller.admit(A).unwrap();
        controller.admit(B).unwrap();

        let change = controller.remove(B).unwrap();
        assert_eq!(change.from, Some(1));
        assert_eq!(change.captured_velocity, None);
        assert!(!change.driver_changed());
        assert_eq!(controller.driver(), Some(A));
    }

    #[test]
    fn test_remove_absent_player_is_noop() {
        let (controller, _) = setup(2);
        assert!(!controller.can_remove(A));
        assert!(controller.remove(A).is_none());
    }

    #[test]
    fn test_change_seat_wraps_around() {
        let (controller, _) = setup(3);
        controller.admit(A).unwrap(); // seat 0
        controller.admit(C).unwrap(); // seat 1
        controller.admit(B).unwrap(); // seat 2
        controller.remove(C).unwrap(); // [A, _, B]

        let change = controller.change_seat(B).unwrap();
        assert_eq!(change.from, Some(2));
        assert_eq!(change.to, Some(1));
        assert!(!change.became_driver());
        assert_eq!(controller.driver(), Some(A));
        assert_eq!(change.captured_velocity, None);
    }

    #[test]
    fn test_change_seat_into_driver_seat() {
        let (controller, world) = setup(2);
        controller.admit(A).unwrap();
        controller.admit(B).unwrap();
        controller.remove(A).unwrap(); // [_, B]
        let v = Vec3::new(0.0, 5.0, 0.0);
        world.vehicle(VehicleId(1)).set_velocity(v);

        let change = controller.change_seat(B).unwrap();
        assert_eq!(change.to, Some(0));
        assert!(change.became_driver());
        assert_eq!(change.captured_velocity, Some(v));
        assert_eq!(controller.owner(), VehicleOwner::Player(B));
        assert_eq!(world.player(B).unwrap().seat(), Some((VehicleId(1), 0)));
    }

    #[test]
    fn test_driver_change_seat_releases_ownership() {
        let (controller, _) = setup(2);
        controller.admit(A).unwrap();

        let change = controller.change_seat(A).unwrap();
        assert_eq!(change.to, Some(1));
        assert!(change.left_driver_seat());
        assert!(change.captured_velocity.is_some());
        assert_eq!(controller.driver(), None);
        assert_eq!(controller.owner(), VehicleOwner::Host);
    }

    #[test]
    fn test_driver_change_seat_uses_forwarded_velocity() {
        let (controller, _) = setup(2);
        controller.admit(A).unwrap();
        let driven = Vec3::new(0.0, 0.0, 14.0);

        let change = controller.change_seat_with_velocity(A, Some(driven)).unwrap();
        assert_eq!(change.captured_velocity, Some(driven));
    }

    #[test]
    fn test_change_seat_without_alternate_is_noop() {
        let (controller, _) = setup(2);
        controller.admit(A).unwrap();
        controller.admit(B).unwrap();
        assert!(!controller.can_change_seat(A));
        assert!(controller.change_seat(A).is_none());
        assert!(!controller.can_change_seat(C));
    }

    #[test]
    fn test_disconnect_clears_driver() {
        let (controller, world) = setup(2);
        controller.admit(A).unwrap();
        controller.admit(B).unwrap();

        let change = controller.handle_disconnect(A).unwrap();
        assert_eq!(change.kind, SeatChangeKind::Cleared);
        assert_eq!(change.from, Some(0));
        assert_eq!(controller.driver(), None);
        assert_eq!(controller.owner(), VehicleOwner::Host);
        assert_eq!(world.vehicle(VehicleId(1)).owner(), VehicleOwner::Host);
        assert_eq!(controller.seat_of(B), Some(1));
        assert!(controller.handle_disconnect(A).is_none());
    }

    #[test]
    fn test_disconnect_passenger() {
        let (controller, _) = setup(3);
        controller.admit(A).unwrap();
        controller.admit(B).unwrap();

        controller.handle_disconnect(B).unwrap();
        assert!(!controller.is_in_vehicle(B));
        assert_eq!(controller.driver(), Some(A));
    }

    #[test]
    fn test_handoff_keeps_vehicle_velocity() {
        let (controller, world) = setup(2);
        let body = world.vehicle(VehicleId(1));
        controller.admit(A).unwrap();
        let v = Vec3::new(30.0, 0.0, 4.0);
        body.set_velocity(v);

        controller.remove(A).unwrap();
        let change = controller.admit(B).unwrap();

        assert!(change.became_driver());
        assert_eq!(body.velocity(), v);
        assert_eq!(change.captured_velocity, Some(v));
    }

    #[test]
    fn test_despawn_evicts_everyone() {
        let (controller, world) = setup(3);
        controller.admit(A).unwrap();
        controller.admit(B).unwrap();

        let mut evicted = controller.despawn();
        evicted.sort();
        assert_eq!(evicted, vec![A, B]);
        assert_eq!(controller.driver(), None);
        assert_eq!(world.player(A).unwrap().seat(), None);
        assert_eq!(world.player(B).unwrap().seat(), None);
    }

    #[test]
    fn test_non_authority_cannot_mutate() {
        let world = InMemoryWorld::new();
        world.register(A);
        let session = Arc::new(FixedSession::host(HOST));
        let services = Services::new(session, Arc::new(world.clone()), Arc::new(world.clone()));
        let controller = VehicleSeatController::spawn(VehicleId(1), 2, &services).unwrap();

        // same table, but viewed through a client session
        let client = VehicleSeatController {
            id: controller.id,
            state: RwLock::new(controller.state.read().clone()),
            session: Arc::new(FixedSession::new(A, HOST)),
            players: Arc::new(world.clone()),
            body: controller.body.clone(),
        };
        assert!(!client.can_admit(A));
        assert!(client.admit(A).is_none());
        assert!(client.handle_disconnect(A).is_none());
    }
}
