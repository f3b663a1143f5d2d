//! Host session - connection identities and disconnect notifications
//!
//! The host owns player id allocation. Ids are never reused within a
//! session, so a late message from a dropped connection can never be
//! mistaken for a newer player.

use crate::error::{NetError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use vehicle_core::{PlayerId, SessionService};

/// Id the host's own player always gets
pub const HOST_PLAYER: PlayerId = PlayerId(0);

/// A connected player
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedPlayer {
    pub id: PlayerId,
    pub connected_at: DateTime<Utc>,
    /// Peer address, `None` for the host itself
    pub remote: Option<String>,
}

/// Membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Joined(PlayerId),
    Left(PlayerId),
}

/// Session as seen by the host process
pub struct HostSession {
    max_players: usize,
    players: RwLock<BTreeMap<PlayerId, ConnectedPlayer>>,
    next_id: AtomicU64,
    disconnects: broadcast::Sender<PlayerId>,
    events: broadcast::Sender<SessionEvent>,
}

impl HostSession {
    /// Create a session that already contains the host player
    pub fn new(max_players: usize) -> Self {
        let (disconnects, _) = broadcast::channel(256);
        let (events, _) = broadcast::channel(256);

        let mut players = BTreeMap::new();
        players.insert(
            HOST_PLAYER,
            ConnectedPlayer {
                id: HOST_PLAYER,
                connected_at: Utc::now(),
                remote: None,
            },
        );

        Self {
            max_players: max_players.max(1),
            players: RwLock::new(players),
            next_id: AtomicU64::new(HOST_PLAYER.0 + 1),
            disconnects,
            events,
        }
    }

    /// Admit a new connection and allocate its player id
    pub fn connect(&self, remote: Option<String>) -> Result<PlayerId> {
        let id = {
            let mut players = self.players.write();
            if players.len() >= self.max_players {
                return Err(NetError::SessionFull {
                    max: self.max_players,
                });
            }
            let id = PlayerId(self.next_id.fetch_add(1, Ordering::SeqCst));
            players.insert(
                id,
                ConnectedPlayer {
                    id,
                    connected_at: Utc::now(),
                    remote,
                },
            );
            id
        };

        tracing::info!("{} joined ({} connected)", id, self.player_count());
        let _ = self.events.send(SessionEvent::Joined(id));
        Ok(id)
    }

    /// Drop a connection; returns false if it was unknown or is the host
    pub fn disconnect(&self, player: PlayerId) -> bool {
        if player == HOST_PLAYER {
            return false;
        }
        if self.players.write().remove(&player).is_none() {
            return false;
        }

        tracing::info!("{} left ({} connected)", player, self.player_count());
        let _ = self.disconnects.send(player);
        let _ = self.events.send(SessionEvent::Left(player));
        true
    }

    /// Connected player ids in join order
    pub fn players(&self) -> Vec<PlayerId> {
        self.players.read().keys().copied().collect()
    }

    pub fn connected(&self) -> Vec<ConnectedPlayer> {
        self.players.read().values().cloned().collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.read().len()
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

impl SessionService for HostSession {
    fn local_player(&self) -> PlayerId {
        HOST_PLAYER
    }

    fn host_player(&self) -> PlayerId {
        HOST_PLAYER
    }

    fn subscribe_disconnects(&self) -> broadcast::Receiver<PlayerId> {
        self.disconnects.subscribe()
    }
}
