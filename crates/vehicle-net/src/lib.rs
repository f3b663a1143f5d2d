//! Vehicle Net - authority loop, replication and relay
//!
//! Architecture:
//! - The host runs one `AuthorityNode`; every request and disconnect goes
//!   through its FIFO queue and mutates a `VehicleSeatController`
//! - Outcomes are broadcast with the full seat snapshot attached
//! - Every process runs a `PlayerNode` that mirrors vehicles and turns
//!   broadcasts into local side effects (colliders, events, handoff)
//! - Remote players reach the host over a WebSocket relay

pub mod authority;
pub mod config;
pub mod error;
pub mod interaction;
pub mod link;
pub mod mirror;
pub mod network;
pub mod node;
pub mod scheduler;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

pub use authority::{AuthorityInput, AuthorityNode, AuthorityQueue, AuthorityStats};
pub use config::{AuthorityConfig, InteractionConfig, RelayConfig};
pub use error::NetError;
pub use interaction::{InteractionEvent, VehicleInteractionController};
pub use link::{AuthorityLink, LocalLink};
pub use mirror::{MirrorSet, MirrorUpdate, ReplicatedVehicle};
pub use network::{Audience, Outbound, VehicleNetworkController};
pub use node::{NodeEvent, NodeTask, PlayerNode};
pub use scheduler::ColliderScheduler;
pub use session::{ConnectedPlayer, HostSession, SessionEvent, HOST_PLAYER};
pub use transport::{RelayClient, RelayServer, RelayStats};
