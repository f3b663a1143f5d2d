//! Status HTTP Server
//!
//! Read-only JSON view of the host's vehicles and session.

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use vehicle_core::{SeatSnapshot, VehicleId};
use vehicle_net::{AuthorityNode, AuthorityStats, ConnectedPlayer, HostSession, RelayServer, RelayStats};

/// Shared state for status handlers
pub struct StatusContext {
    pub authority: Arc<AuthorityNode>,
    pub session: Arc<HostSession>,
    pub relay: Arc<RelayServer>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub players: usize,
    pub max_players: usize,
    pub vehicles: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Serialize)]
pub struct Stats {
    pub authority: AuthorityStats,
    pub relay: RelayStats,
    pub players: Vec<ConnectedPlayer>,
}

/// Status HTTP server
pub struct StatusServer {
    context: Arc<StatusContext>,
}

impl StatusServer {
    pub fn new(context: Arc<StatusContext>) -> Self {
        Self { context }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/health", get(handle_health))
            .route("/vehicles", get(handle_vehicles))
            .route("/vehicles/:id", get(handle_vehicle))
            .route("/stats", get(handle_stats))
            .layer(cors)
            .with_state(self.context)
    }

    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Status server listening on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn handle_health(State(ctx): State<Arc<StatusContext>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        players: ctx.session.player_count(),
        max_players: ctx.session.max_players(),
        vehicles: ctx.authority.vehicle_ids().len(),
        uptime_secs: (Utc::now() - ctx.started_at).num_seconds(),
    })
}

async fn handle_vehicles(State(ctx): State<Arc<StatusContext>>) -> Json<Vec<SeatSnapshot>> {
    Json(ctx.authority.snapshots())
}

async fn handle_vehicle(
    State(ctx): State<Arc<StatusContext>>,
    Path(id): Path<u64>,
) -> Result<Json<SeatSnapshot>, (StatusCode, Json<Value>)> {
    match ctx.authority.vehicle(VehicleId(id)) {
        Some(vehicle) => Ok(Json(vehicle.snapshot())),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("vehicle {} not found", id) })),
        )),
    }
}

async fn handle_stats(State(ctx): State<Arc<StatusContext>>) -> Json<Stats> {
    Json(Stats {
        authority: ctx.authority.stats(),
        relay: ctx.relay.stats(),
        players: ctx.session.connected(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vehicle_core::{InMemoryWorld, PlayerId, Services};
    use vehicle_net::{AuthorityConfig, RelayConfig};

    fn context() -> Arc<StatusContext> {
        let world = InMemoryWorld::new();
        let session = Arc::new(HostSession::new(4));
        let services = Services::new(session.clone(), Arc::new(world.clone()), Arc::new(world));
        services.players.register(PlayerId(0));
        let authority = Arc::new(AuthorityNode::new(services, AuthorityConfig::default()).unwrap());
        authority.spawn_vehicle(VehicleId(1), 4).unwrap();
        authority.spawn_vehicle(VehicleId(2), 2).unwrap();
        let relay = Arc::new(RelayServer::new(
            authority.clone(),
            session.clone(),
            RelayConfig::default(),
        ));

        Arc::new(StatusContext {
            authority,
            session,
            relay,
            started_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_health() {
        let Json(health) = handle_health(State(context())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.players, 1);
        assert_eq!(health.max_players, 4);
        assert_eq!(health.vehicles, 2);
    }

    #[tokio::test]
    async fn test_vehicle_lookup() {
        let ctx = context();
        ctx.authority.vehicle(VehicleId(2)).unwrap().enter(PlayerId(0));

        let Json(all) = handle_vehicles(State(ctx.clone())).await;
        assert_eq!(all.len(), 2);

        let Json(snapshot) = handle_vehicle(State(ctx.clone()), Path(2)).await.unwrap();
        assert_eq!(snapshot.driver, Some(PlayerId(0)));

        let (status, Json(body)) = handle_vehicle(State(ctx), Path(99)).await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "vehicle 99 not found");
    }

    #[tokio::test]
    async fn test_stats_serialize() {
        let Json(stats) = handle_stats(State(context())).await;
        assert_eq!(stats.authority.vehicles, 2);
        assert_eq!(stats.players.len(), 1);

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["relay"]["connections_accepted"], 0);
    }
}
