//! Runtime settings for the networking layer

use std::time::Duration;

/// Authority loop settings
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// Capacity of the FIFO request queue
    pub queue_capacity: usize,
    /// Capacity of the outbound broadcast channel
    pub broadcast_capacity: usize,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            broadcast_capacity: 1024,
        }
    }
}

/// Per-node interaction settings
#[derive(Debug, Clone)]
pub struct InteractionConfig {
    /// How long a player who left a seat stays without a movement collider
    pub collider_reenable_delay: Duration,
    /// Upward nudge applied to a player leaving a seat
    pub exit_seat_distance: f32,
    /// Capacity of the interaction event channel
    pub event_capacity: usize,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            collider_reenable_delay: Duration::from_millis(3000),
            exit_seat_distance: 1.0,
            event_capacity: 64,
        }
    }
}

/// Relay server settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Interval between keep-alive frames
    pub heartbeat_interval: Duration,
    /// Capacity of each client's outgoing request buffer
    pub outbox_capacity: usize,
    /// Capacity of the event queue between a client connection and its node
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            outbox_capacity: 128,
            event_capacity: 1024,
        }
    }
}
