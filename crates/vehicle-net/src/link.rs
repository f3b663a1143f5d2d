//! Path from a node's local player to the authority

use crate::authority::AuthorityQueue;
use crate::error::Result;
use async_trait::async_trait;
use vehicle_core::{PlayerId, VehicleId, VehicleRequest};

/// Submits requests to the authority on behalf of the local player
#[async_trait]
pub trait AuthorityLink: Send + Sync {
    /// Player the requests are sent for
    fn local_player(&self) -> PlayerId;

    async fn submit(&self, vehicle: VehicleId, request: VehicleRequest) -> Result<()>;
}

/// Link used by the host's own player: straight into the authority queue
pub struct LocalLink {
    player: PlayerId,
    queue: AuthorityQueue,
}

impl LocalLink {
    pub fn new(player: PlayerId, queue: AuthorityQueue) -> Self {
        Self { player, queue }
    }
}

#[async_trait]
impl AuthorityLink for LocalLink {
    fn local_player(&self) -> PlayerId {
        self.player
    }

    async fn submit(&self, vehicle: VehicleId, request: VehicleRequest) -> Result<()> {
        self.queue.submit(vehicle, self.player, request).await
    }
}
