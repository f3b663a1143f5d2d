//! Node Configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vehicle_core::{SeatIndex, VehicleId};
use vehicle_net::{AuthorityConfig, InteractionConfig, RelayConfig};

/// A vehicle the host spawns at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSpec {
    pub id: u64,
    pub seats: SeatIndex,
}

impl VehicleSpec {
    pub fn vehicle_id(&self) -> VehicleId {
        VehicleId(self.id)
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Relay (WebSocket) bind address
    pub relay_addr: String,
    /// Status HTTP bind address
    pub status_addr: String,
    /// Vehicles spawned by the host
    pub vehicles: Vec<VehicleSpec>,
    /// Session cap, host included
    pub max_players: usize,
    pub collider_reenable_delay_ms: u64,
    /// How far a player is lifted off the seat on exit
    pub exit_seat_distance: f32,
    pub queue_capacity: usize,
    pub broadcast_capacity: usize,
    pub heartbeat_interval_ms: u64,
    /// Events buffered between a client connection and its node
    pub client_event_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            relay_addr: "127.0.0.1:7777".to_string(),
            status_addr: "127.0.0.1:7778".to_string(),
            vehicles: vec![VehicleSpec { id: 1, seats: 4 }, VehicleSpec { id: 2, seats: 2 }],
            max_players: 7,
            collider_reenable_delay_ms: 3000,
            exit_seat_distance: 1.0,
            queue_capacity: 256,
            broadcast_capacity: 1024,
            heartbeat_interval_ms: 5000,
            client_event_capacity: 1024,
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn authority(&self) -> AuthorityConfig {
        AuthorityConfig {
            queue_capacity: self.queue_capacity,
            broadcast_capacity: self.broadcast_capacity,
        }
    }

    pub fn interaction(&self) -> InteractionConfig {
        InteractionConfig {
            collider_reenable_delay: Duration::from_millis(self.collider_reenable_delay_ms),
            exit_seat_distance: self.exit_seat_distance,
            ..Default::default()
        }
    }

    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            event_capacity: self.client_event_capacity,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.max_players, 7);
        assert_eq!(
            config.interaction().collider_reenable_delay,
            Duration::from_millis(3000)
        );
        assert_eq!(config.interaction().exit_seat_distance, 1.0);
        assert_eq!(config.vehicles.len(), 2);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"max_players": 3, "vehicles": [{"id": 9, "seats": 6}]}"#).unwrap();
        assert_eq!(config.max_players, 3);
        assert_eq!(config.vehicles, vec![VehicleSpec { id: 9, seats: 6 }]);
        assert_eq!(config.vehicles[0].vehicle_id(), VehicleId(9));
        assert_eq!(config.relay_addr, "127.0.0.1:7777");
        assert_eq!(config.authority().queue_capacity, 256);
    }

    #[test]
    fn test_client_event_capacity_reaches_relay() {
        let config: NodeConfig = serde_json::from_str(r#"{"client_event_capacity": 16}"#).unwrap();
        assert_eq!(config.relay().event_capacity, 16);
        assert_eq!(NodeConfig::default().relay().event_capacity, 1024);
    }

    #[test]
    fn test_load_missing_file() {
        let err = NodeConfig::load(Path::new("/nonexistent/node.json")).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
