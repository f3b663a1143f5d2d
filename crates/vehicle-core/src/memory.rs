//! In-memory collaborators
//!
//! Stand-ins for the game's physics host, player manager and session used by
//! the node binary and by tests. Bodies only record what was applied to them.

use crate::services::{PhysicsHost, PlayerBody, PlayerRegistry, SessionService, VehicleBody};
use crate::types::{PlayerId, SeatIndex, Vec3, VehicleId, VehicleOwner};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Session with a fixed local/host identity
pub struct FixedSession {
    local: PlayerId,
    host: PlayerId,
    disconnects: broadcast::Sender<PlayerId>,
}

impl FixedSession {
    pub fn new(local: PlayerId, host: PlayerId) -> Self {
        let (disconnects, _) = broadcast::channel(64);
        Self {
            local,
            host,
            disconnects,
        }
    }

    /// Session of the host process itself
    pub fn host(host: PlayerId) -> Self {
        Self::new(host, host)
    }

    /// Publish a disconnect to subscribers
    pub fn notify_disconnect(&self, player: PlayerId) {
        let _ = self.disconnects.send(player);
    }
}

impl SessionService for FixedSession {
    fn local_player(&self) -> PlayerId {
        self.local
    }

    fn host_player(&self) -> PlayerId {
        self.host
    }

    fn subscribe_disconnects(&self) -> broadcast::Receiver<PlayerId> {
        self.disconnects.subscribe()
    }
}

#[derive(Debug, Clone, Default)]
struct PlayerBodyState {
    seat: Option<(VehicleId, SeatIndex)>,
    velocity: Vec3,
    position: Vec3,
    collider_enabled: bool,
}

/// Player body that records seat parenting, velocity and collider state
pub struct MemoryPlayerBody {
    id: PlayerId,
    state: RwLock<PlayerBodyState>,
}

impl MemoryPlayerBody {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            state: RwLock::new(PlayerBodyState {
                collider_enabled: true,
                ..Default::default()
            }),
        }
    }

    /// Seat anchor the body is parented to
    pub fn seat(&self) -> Option<(VehicleId, SeatIndex)> {
        self.state.read().seat
    }

    pub fn position(&self) -> Vec3 {
        self.state.read().position
    }
}

impl PlayerBody for MemoryPlayerBody {
    fn id(&self) -> PlayerId {
        self.id
    }

    fn attach_to_seat(&self, vehicle: VehicleId, seat: SeatIndex) {
        self.state.write().seat = Some((vehicle, seat));
    }

    fn detach_from_seat(&self, vehicle: VehicleId) {
        let mut state = self.state.write();
        if matches!(state.seat, Some((attached, _)) if attached == vehicle) {
            state.seat = None;
        }
    }

    fn velocity(&self) -> Vec3 {
        self.state.read().velocity
    }

    fn set_velocity(&self, velocity: Vec3) {
        self.state.write().velocity = velocity;
    }

    fn set_collider_enabled(&self, enabled: bool) {
        self.state.write().collider_enabled = enabled;
    }

    fn collider_enabled(&self) -> bool {
        self.state.read().collider_enabled
    }

    fn translate(&self, offset: Vec3) {
        let mut state = self.state.write();
        state.position = state.position.add(offset);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct VehicleBodyState {
    velocity: Vec3,
    owner: VehicleOwner,
}

/// Vehicle rigid body
#[derive(Default)]
pub struct MemoryVehicleBody {
    state: RwLock<VehicleBodyState>,
}

impl MemoryVehicleBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> VehicleOwner {
        self.state.read().owner
    }
}

impl VehicleBody for MemoryVehicleBody {
    fn velocity(&self) -> Vec3 {
        self.state.read().velocity
    }

    fn set_velocity(&self, velocity: Vec3) {
        self.state.write().velocity = velocity;
    }

    fn set_owner(&self, owner: VehicleOwner) {
        self.state.write().owner = owner;
    }
}

/// Player registry and physics host backed by concurrent maps
#[derive(Clone, Default)]
pub struct InMemoryWorld {
    players: Arc<DashMap<PlayerId, Arc<MemoryPlayerBody>>>,
    vehicles: Arc<DashMap<VehicleId, Arc<MemoryVehicleBody>>>,
}

impl InMemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete body, for inspection
    pub fn player(&self, player: PlayerId) -> Option<Arc<MemoryPlayerBody>> {
        self.players.get(&player).map(|r| r.value().clone())
    }

    /// Concrete vehicle body, created on first access
    pub fn vehicle(&self, vehicle: VehicleId) -> Arc<MemoryVehicleBody> {
        self.vehicles
            .entry(vehicle)
            .or_insert_with(|| Arc::new(MemoryVehicleBody::new()))
            .value()
            .clone()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

impl PlayerRegistry for InMemoryWorld {
    fn resolve(&self, player: PlayerId) -> Option<Arc<dyn PlayerBody>> {
        self.players
            .get(&player)
            .map(|r| r.value().clone() as Arc<dyn PlayerBody>)
    }

    fn register(&self, player: PlayerId) -> Arc<dyn PlayerBody> {
        self.players
            .entry(player)
            .or_insert_with(|| {
                tracing::debug!("Spawned body for {}", player);
                Arc::new(MemoryPlayerBody::new(player))
            })
            .value()
            .clone()
    }

    fn unregister(&self, player: PlayerId) -> Option<Arc<dyn PlayerBody>> {
        self.players
            .remove(&player)
            .map(|(_, body)| body as Arc<dyn PlayerBody>)
    }
}

impl PhysicsHost for InMemoryWorld {
    fn vehicle_body(&self, vehicle: VehicleId) -> Arc<dyn VehicleBody> {
        self.vehicle(vehicle)
    }
}
