//! Collaborator interfaces
//!
//! The seat protocol never reaches for global state. Session, player and
//! physics access are handed in at construction through these traits.

use crate::types::{PlayerId, SeatIndex, Vec3, VehicleId, VehicleOwner};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Connection identity and authority information
pub trait SessionService: Send + Sync {
    /// Player controlled by this process
    fn local_player(&self) -> PlayerId;

    /// Player id of the host (the single authority)
    fn host_player(&self) -> PlayerId;

    /// Whether this process may mutate replicated vehicle state
    fn is_authority(&self) -> bool {
        self.local_player() == self.host_player()
    }

    /// Stream of players whose connection dropped
    fn subscribe_disconnects(&self) -> broadcast::Receiver<PlayerId>;
}

/// A player's independently simulated body
pub trait PlayerBody: Send + Sync {
    fn id(&self) -> PlayerId;

    /// Parent the player's transform under a seat anchor
    fn attach_to_seat(&self, vehicle: VehicleId, seat: SeatIndex);

    /// Unparent the player from whatever seat anchor holds it
    fn detach_from_seat(&self, vehicle: VehicleId);

    fn velocity(&self) -> Vec3;

    fn set_velocity(&self, velocity: Vec3);

    /// Toggle the standalone movement collider
    fn set_collider_enabled(&self, enabled: bool);

    fn collider_enabled(&self) -> bool;

    fn translate(&self, offset: Vec3);
}

/// Resolves player ids to bodies
pub trait PlayerRegistry: Send + Sync {
    fn resolve(&self, player: PlayerId) -> Option<Arc<dyn PlayerBody>>;

    /// Spawn (or return) the body for a newly connected player
    fn register(&self, player: PlayerId) -> Arc<dyn PlayerBody>;

    fn unregister(&self, player: PlayerId) -> Option<Arc<dyn PlayerBody>>;
}

/// A vehicle's rigid body
pub trait VehicleBody: Send + Sync {
    fn velocity(&self) -> Vec3;

    fn set_velocity(&self, velocity: Vec3);

    /// Hand write authority over the body to another node
    fn set_owner(&self, owner: VehicleOwner);
}

/// Access to vehicle bodies by id
pub trait PhysicsHost: Send + Sync {
    fn vehicle_body(&self, vehicle: VehicleId) -> Arc<dyn VehicleBody>;
}

/// Bundle of collaborators passed to controllers
#[derive(Clone)]
pub struct Services {
    pub session: Arc<dyn SessionService>,
    pub players: Arc<dyn PlayerRegistry>,
    pub physics: Arc<dyn PhysicsHost>,
}

impl Services {
    pub fn new(
        session: Arc<dyn SessionService>,
        players: Arc<dyn PlayerRegistry>,
        physics: Arc<dyn PhysicsHost>,
    ) -> Self {
        Self {
            session,
            players,
            physics,
        }
    }

    pub fn local_player(&self) -> PlayerId {
        self.session.local_player()
    }

    pub fn is_authority(&self) -> bool {
        self.session.is_authority()
    }
}
