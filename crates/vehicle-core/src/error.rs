//! Seat controller errors
//!
//! Most variants describe a failed precondition. Those are expected when
//! requests race each other and are turned into silent no-ops by the
//! controller; only construction errors reach callers as `Err`.

use crate::types::{PlayerId, SeatIndex, VehicleId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeatError {
    #[error("This node is not the authority")]
    NotAuthority,

    #[error("Vehicle must have at least one seat")]
    NoSeats,

    #[error("Vehicle {0} already exists")]
    VehicleExists(VehicleId),

    #[error("Vehicle {0} not found")]
    VehicleNotFound(VehicleId),

    #[error("Player {0} already occupies seat {1}")]
    AlreadySeated(PlayerId, SeatIndex),

    #[error("Vehicle is full")]
    VehicleFull,

    #[error("Player {0} is not in the vehicle")]
    NotInVehicle(PlayerId),

    #[error("No alternate empty seat")]
    NoAlternateSeat,

    #[error("Player {0} could not be resolved")]
    PlayerNotFound(PlayerId),
}
