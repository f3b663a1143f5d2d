//! Vehicle network controller - authoritative request relay
//!
//! Validates a request with the seat controller's guard, applies it, then
//! publishes the outcome. Every broadcast carries the post-mutation
//! snapshot; a `DriverHandoff` is addressed to the new driver only.

use std::sync::Arc;
use tokio::sync::broadcast;
use vehicle_core::{
    PlayerId, SeatChange, SeatSnapshot, Vec3, VehicleBroadcast, VehicleId, VehicleRequest,
    VehicleSeatController,
};

/// Who should receive an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Player(PlayerId),
}

impl Audience {
    pub fn includes(&self, player: PlayerId) -> bool {
        match self {
            Audience::All => true,
            Audience::Player(target) => *target == player,
        }
    }
}

/// A broadcast tagged with its audience
#[derive(Debug, Clone)]
pub struct Outbound {
    pub audience: Audience,
    pub message: VehicleBroadcast,
}

/// Request relay for one vehicle, run on the authority
pub struct VehicleNetworkController {
    seats: Arc<VehicleSeatController>,
    outbound: broadcast::Sender<Outbound>,
}

impl VehicleNetworkController {
    pub fn new(seats: VehicleSeatController, outbound: broadcast::Sender<Outbound>) -> Self {
        Self {
            seats: Arc::new(seats),
            outbound,
        }
    }

    pub fn id(&self) -> VehicleId {
        self.seats.id()
    }

    pub fn seats(&self) -> &Arc<VehicleSeatController> {
        &self.seats
    }

    pub fn snapshot(&self) -> SeatSnapshot {
        self.seats.snapshot()
    }

    /// Dispatch one request from `sender`; returns true if state changed
    pub fn handle_request(&self, sender: PlayerId, request: &VehicleRequest) -> bool {
        match request {
            VehicleRequest::Enter => self.enter(sender),
            VehicleRequest::Exit { velocity } => self.exit(sender, *velocity),
            VehicleRequest::ChangeSeat { velocity } => self.change_seat(sender, *velocity),
            VehicleRequest::Sync => {
                self.sync(sender);
                false
            }
        }
    }

    pub fn enter(&self, player: PlayerId) -> bool {
        if !self.seats.can_admit(player) {
            tracing::debug!("{}: enter from {} dropped", self.id(), player);
            return false;
        }
        let Some(change) = self.seats.admit(player) else {
            return false;
        };

        self.publish(
            Audience::All,
            VehicleBroadcast::Entered {
                player,
                seat: change.to.unwrap_or_default(),
                snapshot: change.snapshot.clone(),
            },
        );
        self.hand_off(&change);
        true
    }

    /// `velocity` is what the exiting driver last simulated
    pub fn exit(&self, player: PlayerId, velocity: Option<Vec3>) -> bool {
        if !self.seats.can_remove(player) {
            tracing::debug!("{}: exit from {} dropped", self.id(), player);
            return false;
        }
        let Some(change) = self.seats.remove_with_velocity(player, velocity) else {
            return false;
        };

        self.publish(
            Audience::All,
            VehicleBroadcast::Exited {
                player,
                seat: change.from.unwrap_or_default(),
                velocity: change.captured_velocity,
                snapshot: change.snapshot.clone(),
            },
        );
        self.take_back(&change);
        true
    }

    pub fn change_seat(&self, player: PlayerId, velocity: Option<Vec3>) -> bool {
        if !self.seats.can_change_seat(player) {
            tracing::debug!("{}: change seat from {} dropped", self.id(), player);
            return false;
        }
        let Some(change) = self.seats.change_seat_with_velocity(player, velocity) else {
            return false;
        };

        self.publish(
            Audience::All,
            VehicleBroadcast::SeatChanged {
                player,
                from: change.from.unwrap_or_default(),
                to: change.to.unwrap_or_default(),
                snapshot: change.snapshot.clone(),
            },
        );
        self.take_back(&change);
        self.hand_off(&change);
        true
    }

    /// Send the current snapshot to `player` only
    pub fn sync(&self, player: PlayerId) {
        tracing::debug!("{}: sync for {}", self.id(), player);
        self.publish(
            Audience::Player(player),
            VehicleBroadcast::Snapshot(self.seats.snapshot()),
        );
    }

    /// Clear the seat of a dropped player
    pub fn handle_disconnect(&self, player: PlayerId) -> bool {
        let Some(change) = self.seats.handle_disconnect(player) else {
            return false;
        };
        self.publish(
            Audience::All,
            VehicleBroadcast::PlayerCleared {
                player,
                snapshot: change.snapshot,
            },
        );
        true
    }

    /// Evict everyone and announce the vehicle is gone
    pub fn despawn(&self) -> Vec<PlayerId> {
        let evicted = self.seats.despawn();
        self.publish(Audience::All, VehicleBroadcast::Despawned { vehicle: self.id() });
        evicted
    }

    /// Publish a full snapshot to everyone
    pub fn announce(&self) {
        self.publish(Audience::All, VehicleBroadcast::Snapshot(self.seats.snapshot()));
    }

    /// New driver continues from the velocity captured before the swap
    fn hand_off(&self, change: &SeatChange) {
        if !change.became_driver() {
            return;
        }
        let velocity = change
            .captured_velocity
            .unwrap_or_else(|| self.seats.body().velocity());
        tracing::debug!("{}: handoff to {} at {:?}", self.id(), change.player, velocity);
        self.publish(
            Audience::Player(change.player),
            VehicleBroadcast::DriverHandoff {
                vehicle: self.id(),
                velocity,
            },
        );
    }

    /// The host resumes simulating the vehicle a driver just left
    fn take_back(&self, change: &SeatChange) {
        if !change.left_driver_seat() {
            return;
        }
        if let Some(velocity) = change.captured_velocity {
            self.seats.body().set_velocity(velocity);
        }
    }

    fn publish(&self, audience: Audience, message: VehicleBroadcast) {
        // Err only means nobody is listening yet
        let _ = self.outbound.send(Outbound { audience, message });
    }
}
