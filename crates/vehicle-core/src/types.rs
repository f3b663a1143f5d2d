//! Core identifiers and value types shared by every node

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seat ordinal inside a vehicle (0 is the driver seat)
pub type SeatIndex = u16;

/// The distinguished seat whose occupant drives and owns the vehicle
pub const DRIVER_SEAT: SeatIndex = 0;

/// Connection identifier, stable for a session
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player-{}", self.0)
    }
}

/// Identifier of one spawned vehicle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct VehicleId(pub u64);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vehicle-{}", self.0)
    }
}

/// Which node holds write authority over a vehicle's transform and physics
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum VehicleOwner {
    /// Nobody is driving; the host simulates the vehicle
    #[default]
    Host,
    /// The driver simulates the vehicle
    Player(PlayerId),
}

impl VehicleOwner {
    /// Owner implied by the occupant of the driver seat
    pub fn for_driver(driver: Option<PlayerId>) -> Self {
        match driver {
            Some(player) => VehicleOwner::Player(player),
            None => VehicleOwner::Host,
        }
    }

    pub fn player(&self) -> Option<PlayerId> {
        match self {
            VehicleOwner::Host => None,
            VehicleOwner::Player(player) => Some(*player),
        }
    }
}

/// 3D vector used for velocities and positional offsets
#[derive(
    Debug, Clone, Copy, PartialEq, Default,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const UP: Vec3 = Vec3 { x: 0.0, y: 1.0, z: 0.0 };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean length
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn scale(&self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn add(&self, other: Vec3) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    /// Replace non-finite components with zero (borsh refuses NaN)
    pub fn sanitized(&self) -> Self {
        let clean = |v: f32| if v.is_finite() { v } else { 0.0 };
        Self::new(clean(self.x), clean(self.y), clean(self.z))
    }
}

/// Local transition reported to presentation subscribers
#[derive(
    Debug, Clone, Copy, PartialEq, Eq,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum InteractionKind {
    Entered,
    Exited,
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionKind::Entered => write!(f, "entered"),
            InteractionKind::Exited => write!(f, "exited"),
        }
    }
}
