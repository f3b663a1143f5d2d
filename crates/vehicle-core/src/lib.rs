//! Vehicle Core - seat ownership and driver authority
//!
//! This crate holds the host-authoritative part of the vehicle protocol:
//! - Seat table, authority tracker and vehicle owner kept in lockstep
//! - Seat controller with guarded admit / remove / reseat / disconnect
//! - Wire messages shared by every node
//! - Collaborator traits (session, players, physics) and in-memory stand-ins

pub mod controller;
pub mod error;
pub mod memory;
pub mod messages;
pub mod services;
pub mod state;
pub mod types;


pub use controller::{SeatChange, SeatChangeKind, VehicleSeatController};
pub use error::SeatError;
pub use memory::{FixedSession, InMemoryWorld, MemoryPlayerBody, MemoryVehicleBody};
pub use messages::{RequestEnvelope, VehicleBroadcast, VehicleRequest, WireMessage};
pub use services::{PhysicsHost, PlayerBody, PlayerRegistry, Services, SessionService, VehicleBody};
pub use state::{AuthorityTracker, Seat, SeatSnapshot, SeatTable, VehicleState};
pub use types::{InteractionKind, PlayerId, SeatIndex, Vec3, VehicleId, VehicleOwner, DRIVER_SEAT};
