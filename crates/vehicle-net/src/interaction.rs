//! Vehicle interaction controller - local intent in, local side effects out
//!
//! One per (node, vehicle). Requests are checked against the replicated
//! mirror and forwarded to the authority; nothing is mutated locally until
//! the authority's broadcast comes back. Broadcasts are applied to the
//! mirror first and side effects run only for revisions the mirror accepts,
//! so each transition fires once.

use crate::config::InteractionConfig;
use crate::error::Result;
use crate::link::AuthorityLink;
use crate::mirror::{MirrorSet, MirrorUpdate, ReplicatedVehicle};
use crate::scheduler::ColliderScheduler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use vehicle_core::{
    InteractionKind, PlayerId, PlayerRegistry, SeatIndex, Services, Vec3, VehicleBody,
    VehicleBroadcast, VehicleId, VehicleRequest,
};

/// Local player entered or left a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionEvent {
    pub vehicle: VehicleId,
    pub player: PlayerId,
    pub kind: InteractionKind,
}

pub struct VehicleInteractionController {
    vehicle: VehicleId,
    local: PlayerId,
    mirror: Arc<ReplicatedVehicle>,
    mirrors: MirrorSet,
    link: Arc<dyn AuthorityLink>,
    players: Arc<dyn PlayerRegistry>,
    body: Arc<dyn VehicleBody>,
    scheduler: Arc<ColliderScheduler>,
    events: broadcast::Sender<InteractionEvent>,
    in_vehicle: AtomicBool,
    sync_pending: AtomicBool,
    exit_seat_distance: f32,
}

impl VehicleInteractionController {
    pub fn new(
        vehicle: VehicleId,
        services: &Services,
        link: Arc<dyn AuthorityLink>,
        mirrors: &MirrorSet,
        scheduler: Arc<ColliderScheduler>,
        events: broadcast::Sender<InteractionEvent>,
        config: &InteractionConfig,
    ) -> Self {
        Self {
            vehicle,
            local: services.local_player(),
            mirror: mirrors.get_or_insert(vehicle),
            mirrors: mirrors.clone(),
            link,
            players: services.players.clone(),
            body: services.physics.vehicle_body(vehicle),
            scheduler,
            events,
            in_vehicle: AtomicBool::new(false),
            sync_pending: AtomicBool::new(false),
            exit_seat_distance: config.exit_seat_distance,
        }
    }

    pub fn vehicle(&self) -> VehicleId {
        self.vehicle
    }

    pub fn mirror(&self) -> &Arc<ReplicatedVehicle> {
        &self.mirror
    }

    pub fn is_local_in_vehicle(&self) -> bool {
        self.in_vehicle.load(Ordering::SeqCst)
    }

    pub fn is_local_driver(&self) -> bool {
        self.mirror.is_driver(self.local)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InteractionEvent> {
        self.events.subscribe()
    }

    // ---- requests ----

    /// Ask for a seat. `Ok(false)` when the local guard blocked the request.
    pub async fn request_enter(&self) -> Result<bool> {
        if self.is_local_in_vehicle() {
            tracing::debug!("{}: already inside, enter not sent", self.vehicle);
            return Ok(false);
        }
        if !self.mirror.has_available_seat() {
            tracing::debug!("{}: no free seat, enter not sent", self.vehicle);
            return Ok(false);
        }
        self.link.submit(self.vehicle, VehicleRequest::Enter).await?;
        Ok(true)
    }

    pub async fn request_exit(&self) -> Result<bool> {
        if !self.is_local_in_vehicle() {
            tracing::debug!("{}: not inside, exit not sent", self.vehicle);
            return Ok(false);
        }
        let velocity = self.driver_velocity();
        self.link
            .submit(self.vehicle, VehicleRequest::Exit { velocity })
            .await?;
        Ok(true)
    }

    pub async fn request_change_seat(&self) -> Result<bool> {
        if !self.is_local_in_vehicle() {
            tracing::debug!("{}: not inside, seat change not sent", self.vehicle);
            return Ok(false);
        }
        let velocity = self.driver_velocity();
        self.link
            .submit(self.vehicle, VehicleRequest::ChangeSeat { velocity })
            .await?;
        Ok(true)
    }

    /// Ask for a fresh snapshot; at most one request is outstanding
    pub async fn request_sync(&self) -> Result<bool> {
        if self.sync_pending.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        if let Err(e) = self.link.submit(self.vehicle, VehicleRequest::Sync).await {
            self.sync_pending.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(true)
    }

    /// The owner holds the authoritative velocity; forward it on the way out
    fn driver_velocity(&self) -> Option<Vec3> {
        self.is_local_driver()
            .then(|| self.body.velocity().sanitized())
    }

    // ---- broadcasts ----

    /// Apply a broadcast from the authority
    pub async fn apply(&self, message: &VehicleBroadcast) -> Result<()> {
        if message.vehicle() != self.vehicle {
            return Ok(());
        }

        match message {
            VehicleBroadcast::DriverHandoff { velocity, .. } => {
                tracing::debug!("{}: taking over at {:?}", self.vehicle, velocity);
                self.body.set_velocity(*velocity);
                return Ok(());
            }
            VehicleBroadcast::Despawned { .. } => {
                self.on_despawned();
                return Ok(());
            }
            VehicleBroadcast::Snapshot(snapshot) => {
                self.sync_pending.store(false, Ordering::SeqCst);
                let previous = self.mirror.occupants_except(self.local);
                if let MirrorUpdate::Applied { .. } = self.mirror.apply_snapshot(snapshot) {
                    self.reconcile(&previous);
                }
                return Ok(());
            }
            _ => {}
        }

        let Some(snapshot) = message.snapshot() else {
            return Ok(());
        };
        let previous = self.mirror.occupants_except(self.local);
        match self.mirror.apply_event(snapshot) {
            MirrorUpdate::Stale => {
                tracing::debug!(
                    "{}: ignored revision {} (have {})",
                    self.vehicle,
                    snapshot.revision,
                    self.mirror.revision()
                );
            }
            MirrorUpdate::Gap { expected, received } => {
                tracing::warn!(
                    "{}: expected revision {}, got {}; resyncing",
                    self.vehicle,
                    expected,
                    received
                );
                self.request_sync().await?;
            }
            MirrorUpdate::Applied { resynced } => {
                self.dispatch(message);
                if resynced {
                    self.reconcile(&previous);
                }
            }
        }
        Ok(())
    }

    fn dispatch(&self, message: &VehicleBroadcast) {
        match message {
            VehicleBroadcast::Entered { player, seat, .. } => {
                tracing::debug!("{}: {} took seat {}", self.vehicle, player, seat);
                self.on_entered(*player, *seat);
            }
            VehicleBroadcast::Exited {
                player,
                seat,
                velocity,
                ..
            } => {
                tracing::debug!("{}: {} left seat {}", self.vehicle, player, seat);
                self.on_exited(*player, *velocity);
            }
            VehicleBroadcast::SeatChanged { player, from, to, .. } => {
                tracing::debug!("{}: {} moved {} -> {}", self.vehicle, player, from, to);
                self.attach(*player, *to);
            }
            VehicleBroadcast::PlayerCleared { player, .. } => {
                self.scheduler.cancel(*player);
                self.detach(*player);
                if *player == self.local {
                    self.in_vehicle.store(false, Ordering::SeqCst);
                }
            }
            _ => {}
        }
    }

    fn on_entered(&self, player: PlayerId, seat: SeatIndex) {
        self.scheduler.cancel(player);
        self.attach(player, seat);
        self.set_collider(player, false);
        if player == self.local && !self.in_vehicle.swap(true, Ordering::SeqCst) {
            self.emit(player, InteractionKind::Entered);
        }
    }

    /// `velocity` is the momentum a departing driver keeps
    fn on_exited(&self, player: PlayerId, velocity: Option<Vec3>) {
        if player == self.local {
            if !self.in_vehicle.swap(false, Ordering::SeqCst) {
                return;
            }
            if let Some(body) = self.players.resolve(player) {
                body.detach_from_seat(self.vehicle);
                if let Some(velocity) = velocity {
                    body.set_velocity(velocity);
                }
                body.translate(Vec3::UP.scale(self.exit_seat_distance));
            }
            self.schedule_reenable(player);
            self.emit(player, InteractionKind::Exited);
        } else {
            self.detach(player);
            if !self.mirrors.is_seated_anywhere(player) {
                self.scheduler.cancel(player);
                self.set_collider(player, true);
            }
        }
    }

    /// Bring the local flag, seat parenting and colliders in line with a
    /// full snapshot. `previous` holds the remote occupants seen before it.
    fn reconcile(&self, previous: &[PlayerId]) {
        match self.mirror.seat_of(self.local) {
            Some(seat) => self.on_entered(self.local, seat),
            None => self.on_exited(self.local, None),
        }
        for player in self.mirror.occupants_except(self.local) {
            if let Some(seat) = self.mirror.seat_of(player) {
                self.on_entered(player, seat);
            }
        }
        for &player in previous {
            if !self.mirror.contains(player) {
                self.on_exited(player, None);
            }
        }
    }

    /// The vehicle is gone; everyone inside is out. Call after the mirror
    /// has been removed from the node's mirror set.
    pub fn on_despawned(&self) {
        self.on_exited(self.local, None);
        for player in self.mirror.occupants_except(self.local) {
            self.on_exited(player, None);
        }
    }

    fn schedule_reenable(&self, player: PlayerId) {
        let players = self.players.clone();
        let mirrors = self.mirrors.clone();
        self.scheduler.schedule(player, move || {
            if mirrors.is_seated_anywhere(player) {
                tracing::debug!("{} is seated again, collider stays off", player);
                return;
            }
            if let Some(body) = players.resolve(player) {
                body.set_collider_enabled(true);
            }
        });
    }

    fn attach(&self, player: PlayerId, seat: SeatIndex) {
        if let Some(body) = self.players.resolve(player) {
            body.attach_to_seat(self.vehicle, seat);
        }
    }

    fn detach(&self, player: PlayerId) {
        if let Some(body) = self.players.resolve(player) {
            body.detach_from_seat(self.vehicle);
        }
    }

    fn set_collider(&self, player: PlayerId, enabled: bool) {
        match self.players.resolve(player) {
            Some(body) => body.set_collider_enabled(enabled),
            None => tracing::debug!("{}: no body for {}", self.vehicle, player),
        }
    }

    fn emit(&self, player: PlayerId, kind: InteractionKind) {
        tracing::info!("{} {} {}", player, kind, self.vehicle);
        let _ = self.events.send(InteractionEvent {
            vehicle: self.vehicle,
            player,
            kind,
        });
    }
}
