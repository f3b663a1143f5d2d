//! Request / broadcast messages exchanged between nodes

use crate::state::SeatSnapshot;
use crate::types::{PlayerId, SeatIndex, Vec3, VehicleId};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Request a node sends to the authority
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum VehicleRequest {
    /// Claim the first free seat
    Enter,
    /// Leave the vehicle; the driver forwards the vehicle velocity it simulated
    Exit { velocity: Option<Vec3> },
    /// Move to the next free seat
    ChangeSeat { velocity: Option<Vec3> },
    /// Ask for the current snapshot (late join or revision gap)
    Sync,
}

impl VehicleRequest {
    /// Copy with non-finite velocity components zeroed
    pub fn sanitized(&self) -> Self {
        match self {
            VehicleRequest::Exit { velocity } => VehicleRequest::Exit {
                velocity: velocity.map(|v| v.sanitized()),
            },
            VehicleRequest::ChangeSeat { velocity } => VehicleRequest::ChangeSeat {
                velocity: velocity.map(|v| v.sanitized()),
            },
            other => other.clone(),
        }
    }
}

/// A request as seen by the authority, stamped with the sender's identity
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub vehicle: VehicleId,
    /// Filled in by the transport, never trusted from the payload
    pub sender: PlayerId,
    pub request: VehicleRequest,
}

/// Result the authority publishes after handling a request
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum VehicleBroadcast {
    /// Full replicated state (spawn, sync response)
    Snapshot(SeatSnapshot),
    Entered {
        player: PlayerId,
        seat: SeatIndex,
        snapshot: SeatSnapshot,
    },
    Exited {
        player: PlayerId,
        seat: SeatIndex,
        /// Momentum a departing driver carries onto its own body
        velocity: Option<Vec3>,
        snapshot: SeatSnapshot,
    },
    SeatChanged {
        player: PlayerId,
        from: SeatIndex,
        to: SeatIndex,
        snapshot: SeatSnapshot,
    },
    /// Seat freed because the occupant's connection dropped
    PlayerCleared {
        player: PlayerId,
        snapshot: SeatSnapshot,
    },
    /// Directed at a new driver: start simulating from this velocity
    DriverHandoff { vehicle: VehicleId, velocity: Vec3 },
    Despawned { vehicle: VehicleId },
}

impl VehicleBroadcast {
    pub fn vehicle(&self) -> VehicleId {
        match self {
            VehicleBroadcast::Snapshot(snapshot) => snapshot.vehicle,
            VehicleBroadcast::Entered { snapshot, .. }
            | VehicleBroadcast::Exited { snapshot, .. }
            | VehicleBroadcast::SeatChanged { snapshot, .. }
            | VehicleBroadcast::PlayerCleared { snapshot, .. } => snapshot.vehicle,
            VehicleBroadcast::DriverHandoff { vehicle, .. }
            | VehicleBroadcast::Despawned { vehicle } => *vehicle,
        }
    }

    /// Replicated state carried by the message, if any
    pub fn snapshot(&self) -> Option<&SeatSnapshot> {
        match self {
            VehicleBroadcast::Snapshot(snapshot)
            | VehicleBroadcast::Entered { snapshot, .. }
            | VehicleBroadcast::Exited { snapshot, .. }
            | VehicleBroadcast::SeatChanged { snapshot, .. }
            | VehicleBroadcast::PlayerCleared { snapshot, .. } => Some(snapshot),
            VehicleBroadcast::DriverHandoff { .. } | VehicleBroadcast::Despawned { .. } => None,
        }
    }
}

/// Frames exchanged over the relay connection
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum WireMessage {
    /// Host accepted the connection
    Welcome {
        player: PlayerId,
        host: PlayerId,
        players: Vec<PlayerId>,
    },
    /// Host refused the connection
    Rejected { reason: String },
    /// Client to host
    Request {
        vehicle: VehicleId,
        request: VehicleRequest,
    },
    /// Host to client
    Broadcast(VehicleBroadcast),
    PlayerJoined(PlayerId),
    PlayerLeft(PlayerId),
    Heartbeat,
}

impl WireMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, borsh::io::Error> {
        borsh::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SeatTable;
    use crate::types::VehicleOwner;

    #[test]
    fn test_entered_frame_decodes() {
        let snapshot = SeatSnapshot {
            vehicle: VehicleId(2),
            revision: 5,
            seats: SeatTable::new(3),
            driver: None,
            owner: VehicleOwner::Host,
        };
        let frame = WireMessage::Broadcast(VehicleBroadcast::Entered {
            player: PlayerId(4),
            seat: 1,
            snapshot,
        });

        let bytes = frame.to_bytes().unwrap();
        let decoded = WireMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, frame);
        match decoded {
            WireMessage::Broadcast(msg) => {
                assert_eq!(msg.vehicle(), VehicleId(2));
                assert_eq!(msg.snapshot().map(|s| s.revision), Some(5));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_nan_velocity_is_sanitized_before_encoding() {
        let request = VehicleRequest::Exit {
            velocity: Some(Vec3::new(f32::NAN, 1.0, 0.0)),
        };
        let frame = WireMessage::Request {
            vehicle: VehicleId(1),
            request: request.sanitized(),
        };
        let decoded = WireMessage::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(
            decoded,
            WireMessage::Request {
                vehicle: VehicleId(1),
                request: VehicleRequest::Exit {
                    velocity: Some(Vec3::new(0.0, 1.0, 0.0))
                },
            }
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(WireMessage::from_bytes(&[0xff, 0x00, 0x13]).is_err());
    }
}
