//! Authority node - the single writer of every vehicle's seat state
//!
//! Requests and disconnects from all connections land in one FIFO queue,
//! drained by one task. Whichever of a racing request and disconnect is
//! queued first wins; the other becomes a no-op.

use crate::config::AuthorityConfig;
use crate::error::{NetError, Result};
use crate::network::{Outbound, VehicleNetworkController};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Notify};
use vehicle_core::{
    PlayerId, RequestEnvelope, SeatError, SeatIndex, SeatSnapshot, Services, VehicleId,
    VehicleRequest, VehicleSeatController,
};

/// One unit of work for the authority loop
#[derive(Debug, Clone)]
pub enum AuthorityInput {
    Request(RequestEnvelope),
    Disconnect(PlayerId),
}

/// Counters exposed on the status endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthorityStats {
    pub vehicles: usize,
    pub requests_processed: u64,
    pub requests_applied: u64,
    pub requests_dropped: u64,
    pub disconnects_handled: u64,
}

/// Cloneable handle for feeding the authority queue
#[derive(Clone)]
pub struct AuthorityQueue {
    tx: mpsc::Sender<AuthorityInput>,
}

impl AuthorityQueue {
    /// Queue a request on behalf of `sender`
    pub async fn submit(
        &self,
        vehicle: VehicleId,
        sender: PlayerId,
        request: VehicleRequest,
    ) -> Result<()> {
        let envelope = RequestEnvelope {
            vehicle,
            sender,
            request: request.sanitized(),
        };
        self.tx
            .send(AuthorityInput::Request(envelope))
            .await
            .map_err(|_| NetError::AuthorityClosed)
    }

    pub async fn disconnect(&self, player: PlayerId) -> Result<()> {
        self.tx
            .send(AuthorityInput::Disconnect(player))
            .await
            .map_err(|_| NetError::AuthorityClosed)
    }
}

/// Host-side registry of vehicles plus the request loop that mutates them
pub struct AuthorityNode {
    services: Services,
    vehicles: DashMap<VehicleId, Arc<VehicleNetworkController>>,
    outbound: broadcast::Sender<Outbound>,
    queue_tx: mpsc::Sender<AuthorityInput>,
    queue_rx: Mutex<Option<mpsc::Receiver<AuthorityInput>>>,
    shutdown: Notify,
    stats: RwLock<AuthorityStats>,
}

impl AuthorityNode {
    /// Create the authority; fails on a node that is not the host
    pub fn new(services: Services, config: AuthorityConfig) -> Result<Self> {
        if !services.is_authority() {
            return Err(SeatError::NotAuthority.into());
        }
        let (outbound, _) = broadcast::channel(config.broadcast_capacity.max(1));
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));

        Ok(Self {
            services,
            vehicles: DashMap::new(),
            outbound,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            shutdown: Notify::new(),
            stats: RwLock::new(AuthorityStats::default()),
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn queue(&self) -> AuthorityQueue {
        AuthorityQueue {
            tx: self.queue_tx.clone(),
        }
    }

    /// Receive every outbound broadcast; filter by audience on the way out
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound.subscribe()
    }

    /// Spawn a vehicle and announce its empty seat table
    pub fn spawn_vehicle(
        &self,
        id: VehicleId,
        seats: SeatIndex,
    ) -> std::result::Result<Arc<VehicleNetworkController>, SeatError> {
        if self.vehicles.contains_key(&id) {
            return Err(SeatError::VehicleExists(id));
        }
        let controller = VehicleSeatController::spawn(id, seats, &self.services)?;
        let network = Arc::new(VehicleNetworkController::new(controller, self.outbound.clone()));
        self.vehicles.insert(id, network.clone());
        self.stats.write().vehicles = self.vehicles.len();

        network.announce();
        Ok(network)
    }

    /// Remove a vehicle, evicting its occupants
    pub fn despawn_vehicle(&self, id: VehicleId) -> std::result::Result<Vec<PlayerId>, SeatError> {
        let (_, network) = self
            .vehicles
            .remove(&id)
            .ok_or(SeatError::VehicleNotFound(id))?;
        self.stats.write().vehicles = self.vehicles.len();
        Ok(network.despawn())
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<Arc<VehicleNetworkController>> {
        self.vehicles.get(&id).map(|r| r.value().clone())
    }

    pub fn vehicle_ids(&self) -> Vec<VehicleId> {
        let mut ids: Vec<_> = self.vehicles.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    /// Current snapshot of every vehicle, by id
    pub fn snapshots(&self) -> Vec<SeatSnapshot> {
        self.vehicle_ids()
            .into_iter()
            .filter_map(|id| self.vehicle(id).map(|v| v.snapshot()))
            .collect()
    }

    pub fn stats(&self) -> AuthorityStats {
        self.stats.read().clone()
    }

    /// Apply one queued input. Only the authority loop should call this.
    pub fn process(&self, input: AuthorityInput) {
        match input {
            AuthorityInput::Request(envelope) => {
                let Some(vehicle) = self.vehicle(envelope.vehicle) else {
                    tracing::debug!(
                        "Request from {} for unknown {} dropped",
                        envelope.sender,
                        envelope.vehicle
                    );
                    let mut stats = self.stats.write();
                    stats.requests_processed += 1;
                    stats.requests_dropped += 1;
                    return;
                };
                let applied = vehicle.handle_request(envelope.sender, &envelope.request);

                let mut stats = self.stats.write();
                stats.requests_processed += 1;
                if applied {
                    stats.requests_applied += 1;
                } else if !matches!(envelope.request, VehicleRequest::Sync) {
                    stats.requests_dropped += 1;
                }
            }
            AuthorityInput::Disconnect(player) => {
                let vehicles: Vec<_> = self.vehicles.iter().map(|r| r.value().clone()).collect();
                let cleared = vehicles
                    .iter()
                    .filter(|vehicle| vehicle.handle_disconnect(player))
                    .count();
                self.services.players.unregister(player);
                self.stats.write().disconnects_handled += 1;
                tracing::info!("Cleaned up {} ({} seats cleared)", player, cleared);
            }
        }
    }

    /// Stop `run` once the input it is handling is done. Inputs still
    /// queued are dropped.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Drain the queue until `shutdown` is called. The node keeps a sender
    /// of its own, so the queue never closes while it is alive.
    ///
    /// Session disconnects are forwarded into the same queue so they are
    /// ordered with requests.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut rx = self.queue_rx.lock().take().ok_or(NetError::AlreadyRunning)?;

        let mut disconnects = self.services.session.subscribe_disconnects();
        let queue = self.queue();
        let forwarder = tokio::spawn(async move {
            loop {
                match disconnects.recv().await {
                    Ok(player) => {
                        if queue.disconnect(player).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Missed {} disconnect notifications", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        tracing::info!("Authority running with {} vehicles", self.vehicles.len());

        loop {
            tokio::select! {
                input = rx.recv() => match input {
                    Some(input) => self.process(input),
                    None => break,
                },
                _ = self.shutdown.notified() => {
                    tracing::info!("Authority stopping");
                    break;
                }
            }
        }

        forwarder.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Audience;
    use vehicle_core::{FixedSession, InMemoryWorld, PlayerRegistry, VehicleBroadcast};

    const HOST: PlayerId = PlayerId(0);
    const A: PlayerId = PlayerId(1);

    fn host_services(world: &InMemoryWorld) -> (Services, Arc<FixedSession>) {
        let session = Arc::new(FixedSession::host(HOST));
        let services = Services::new(session.clone(), Arc::new(world.clone()), Arc::new(world.clone()));
        (services, session)
    }

    #[test]
    fn test_requires_authority() {
        let world = InMemoryWorld::new();
        let services = Services::new(
            Arc::new(FixedSession::new(A, HOST)),
            Arc::new(world.clone()),
            Arc::new(world),
        );
        assert!(matches!(
            AuthorityNode::new(services, AuthorityConfig::default()),
            Err(NetError::Seat(SeatError::NotAuthority))
        ));
    }

    #[test]
    fn test_spawn_announces_and_rejects_duplicates() {
        let world = InMemoryWorld::new();
        let (services, _) = host_services(&world);
        let node = AuthorityNode::new(services, AuthorityConfig::default()).unwrap();
        let mut rx = node.subscribe();

        node.spawn_vehicle(VehicleId(1), 2).unwrap();
        let out = rx.try_recv().unwrap();
        assert_eq!(out.audience, Audience::All);
        assert!(matches!(out.message, VehicleBroadcast::Snapshot(_)));

        assert_eq!(
            node.spawn_vehicle(VehicleId(1), 2).err(),
            Some(SeatError::VehicleExists(VehicleId(1)))
        );
        assert_eq!(node.stats().vehicles, 1);
    }

    #[test]
    fn test_unknown_vehicle_request_is_dropped() {
        let world = InMemoryWorld::new();
        world.register(A);
        let (services, _) = host_services(&world);
        let node = AuthorityNode::new(services, AuthorityConfig::default()).unwrap();

        node.process(AuthorityInput::Request(RequestEnvelope {
            vehicle: VehicleId(9),
            sender: A,
            request: VehicleRequest::Enter,
        }));
        let stats = node.stats();
        assert_eq!(stats.requests_processed, 1);
        assert_eq!(stats.requests_dropped, 1);
    }

    #[test]
    fn test_despawn_evicts_and_forgets() {
        let world = InMemoryWorld::new();
        world.register(A);
        let (services, _) = host_services(&world);
        let node = AuthorityNode::new(services, AuthorityConfig::default()).unwrap();
        node.spawn_vehicle(VehicleId(1), 2).unwrap();
        node.process(AuthorityInput::Request(RequestEnvelope {
            vehicle: VehicleId(1),
            sender: A,
            request: VehicleRequest::Enter,
        }));

        assert_eq!(node.despawn_vehicle(VehicleId(1)).unwrap(), vec![A]);
        assert!(node.vehicle(VehicleId(1)).is_none());
        assert_eq!(
            node.despawn_vehicle(VehicleId(1)).err(),
            Some(SeatError::VehicleNotFound(VehicleId(1)))
        );
    }

    #[tokio::test]
    async fn test_queue_is_processed_in_order() {
        let world = InMemoryWorld::new();
        world.register(A);
        let (services, session) = host_services(&world);
        let node = Arc::new(AuthorityNode::new(services, AuthorityConfig::default()).unwrap());
        node.spawn_vehicle(VehicleId(1), 2).unwrap();
        let mut rx = node.subscribe();

        let runner = tokio::spawn(node.clone().run());
        let queue = node.queue();
        queue.submit(VehicleId(1), A, VehicleRequest::Enter).await.unwrap();
        queue
            .submit(VehicleId(1), A, VehicleRequest::Exit { velocity: None })
            .await
            .unwrap();
        queue.submit(VehicleId(1), A, VehicleRequest::Enter).await.unwrap();

        let mut kinds = Vec::new();
        while kinds.len() < 3 {
            match rx.recv().await.unwrap().message {
                VehicleBroadcast::Entered { .. } => kinds.push("entered"),
                VehicleBroadcast::Exited { .. } => kinds.push("exited"),
                _ => {}
            }
        }
        assert_eq!(kinds, vec!["entered", "exited", "entered"]);

        // disconnect via the session is routed through the same queue
        session.notify_disconnect(A);
        loop {
            if let VehicleBroadcast::PlayerCleared { player, snapshot } = rx.recv().await.unwrap().message {
                assert_eq!(player, A);
                assert_eq!(snapshot.driver, None);
                break;
            }
        }
        assert!(world.player(A).is_none());

        runner.abort();
    }

    #[tokio::test]
    async fn test_shutdown_ends_run() {
        let world = InMemoryWorld::new();
        world.register(A);
        let (services, _) = host_services(&world);
        let node = Arc::new(AuthorityNode::new(services, AuthorityConfig::default()).unwrap());
        node.spawn_vehicle(VehicleId(1), 2).unwrap();
        let mut rx = node.subscribe();

        let runner = tokio::spawn(node.clone().run());
        node.queue()
            .submit(VehicleId(1), A, VehicleRequest::Enter)
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap().message,
            VehicleBroadcast::Entered { player: A, .. }
        ));

        node.shutdown();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), runner)
            .await
            .expect("run did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let world = InMemoryWorld::new();
        let (services, _) = host_services(&world);
        let node = Arc::new(AuthorityNode::new(services, AuthorityConfig::default()).unwrap());

        let runner = tokio::spawn(node.clone().run());
        tokio::task::yield_now().await;
        assert!(matches!(node.clone().run().await, Err(NetError::AlreadyRunning)));
        runner.abort();
    }
}
