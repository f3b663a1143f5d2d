//! Player node - per-process fan-out of authority broadcasts
//!
//! Every process (host included) runs one node. It keeps an interaction
//! controller per known vehicle, created when the vehicle is first heard of
//! and dropped on `Despawned`, and routes each broadcast to it.

use crate::authority::AuthorityNode;
use crate::config::InteractionConfig;
use crate::error::Result;
use crate::interaction::{InteractionEvent, VehicleInteractionController};
use crate::link::AuthorityLink;
use crate::mirror::MirrorSet;
use crate::scheduler::ColliderScheduler;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use vehicle_core::{PlayerId, Services, VehicleBroadcast, VehicleId};

/// Input to a node
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Vehicle(VehicleBroadcast),
    PlayerJoined(PlayerId),
    PlayerLeft(PlayerId),
    /// Connection to the host is gone
    HostLost,
}

/// Background task feeding a node; aborted when dropped
pub struct NodeTask {
    handle: JoinHandle<()>,
}

impl NodeTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the feed to end (host lost or channel closed)
    pub async fn finished(&mut self) {
        let _ = (&mut self.handle).await;
    }
}

impl Drop for NodeTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct PlayerNode {
    services: Services,
    link: Arc<dyn AuthorityLink>,
    mirrors: MirrorSet,
    controllers: DashMap<VehicleId, Arc<VehicleInteractionController>>,
    scheduler: Arc<ColliderScheduler>,
    events: broadcast::Sender<InteractionEvent>,
    config: InteractionConfig,
}

impl PlayerNode {
    pub fn new(services: Services, link: Arc<dyn AuthorityLink>, config: InteractionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        services.players.register(services.local_player());

        Self {
            scheduler: Arc::new(ColliderScheduler::new(config.collider_reenable_delay)),
            services,
            link,
            mirrors: MirrorSet::new(),
            controllers: DashMap::new(),
            events,
            config,
        }
    }

    pub fn local_player(&self) -> PlayerId {
        self.services.local_player()
    }

    /// Interaction events for every vehicle; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> broadcast::Receiver<InteractionEvent> {
        self.events.subscribe()
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<Arc<VehicleInteractionController>> {
        self.controllers.get(&id).map(|r| r.value().clone())
    }

    pub fn vehicles(&self) -> Vec<VehicleId> {
        let mut ids: Vec<_> = self.controllers.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    /// Vehicle the local player currently sits in
    pub fn current_vehicle(&self) -> Option<VehicleId> {
        self.mirrors.vehicle_of(self.local_player())
    }

    pub fn scheduler(&self) -> &Arc<ColliderScheduler> {
        &self.scheduler
    }

    pub async fn request_enter(&self, vehicle: VehicleId) -> Result<bool> {
        match self.vehicle(vehicle) {
            Some(controller) => controller.request_enter().await,
            None => Ok(false),
        }
    }

    pub async fn request_exit(&self, vehicle: VehicleId) -> Result<bool> {
        match self.vehicle(vehicle) {
            Some(controller) => controller.request_exit().await,
            None => Ok(false),
        }
    }

    pub async fn request_change_seat(&self, vehicle: VehicleId) -> Result<bool> {
        match self.vehicle(vehicle) {
            Some(controller) => controller.request_change_seat().await,
            None => Ok(false),
        }
    }

    /// Ask the authority to resend every known vehicle
    pub async fn resync_all(&self) -> Result<()> {
        for id in self.vehicles() {
            if let Some(controller) = self.vehicle(id) {
                controller.request_sync().await?;
            }
        }
        Ok(())
    }

    fn controller_for(&self, id: VehicleId) -> Arc<VehicleInteractionController> {
        self.controllers
            .entry(id)
            .or_insert_with(|| {
                tracing::debug!("Tracking {}", id);
                Arc::new(VehicleInteractionController::new(
                    id,
                    &self.services,
                    self.link.clone(),
                    &self.mirrors,
                    self.scheduler.clone(),
                    self.events.clone(),
                    &self.config,
                ))
            })
            .value()
            .clone()
    }

    /// Handle one input; returns false once the host is gone
    pub async fn handle(&self, event: NodeEvent) -> Result<bool> {
        match event {
            NodeEvent::Vehicle(VehicleBroadcast::Despawned { vehicle }) => {
                self.mirrors.remove(vehicle);
                if let Some((_, controller)) = self.controllers.remove(&vehicle) {
                    controller.on_despawned();
                }
                tracing::info!("{} despawned", vehicle);
            }
            NodeEvent::Vehicle(message @ VehicleBroadcast::DriverHandoff { .. }) => {
                // only meaningful for a vehicle we already track
                if let Some(controller) = self.vehicle(message.vehicle()) {
                    controller.apply(&message).await?;
                }
            }
            NodeEvent::Vehicle(message) => {
                self.controller_for(message.vehicle()).apply(&message).await?;
            }
            NodeEvent::PlayerJoined(player) => {
                self.services.players.register(player);
            }
            NodeEvent::PlayerLeft(player) => {
                self.scheduler.cancel(player);
                if player != self.local_player() {
                    self.services.players.unregister(player);
                }
            }
            NodeEvent::HostLost => {
                tracing::warn!("Host connection lost");
                self.scheduler.cancel_all();
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Consume events until the channel closes or the host is lost
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<NodeEvent>) {
        while let Some(event) = events.recv().await {
            match self.handle(event).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => tracing::warn!("Node event failed: {}", e),
            }
        }
    }

    /// Feed this node from a remote connection
    pub fn attach_remote(self: &Arc<Self>, events: mpsc::Receiver<NodeEvent>) -> NodeTask {
        NodeTask {
            handle: tokio::spawn(self.clone().run(events)),
        }
    }

    /// Feed the host's own node straight from the authority
    pub fn attach_local(self: &Arc<Self>, authority: &AuthorityNode) -> NodeTask {
        let mut outbound = authority.subscribe();
        let initial = authority.snapshots();
        let node = self.clone();
        let local = self.local_player();

        let handle = tokio::spawn(async move {
            for snapshot in initial {
                let _ = node
                    .handle(NodeEvent::Vehicle(VehicleBroadcast::Snapshot(snapshot)))
                    .await;
            }
            loop {
                match outbound.recv().await {
                    Ok(out) => {
                        if !out.audience.includes(local) {
                            continue;
                        }
                        if let Err(e) = node.handle(NodeEvent::Vehicle(out.message)).await {
                            tracing::warn!("Local node event failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Local node lagged {} broadcasts; resyncing", n);
                        if let Err(e) = node.resync_all().await {
                            tracing::warn!("Resync failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        NodeTask { handle }
    }
}
