//! Line commands read from stdin

use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use vehicle_core::VehicleId;
use vehicle_net::PlayerNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Enter(VehicleId),
    Exit(VehicleId),
    Seat(VehicleId),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ParseError(String);

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let vehicle = |arg: Option<&str>| -> Result<VehicleId, ParseError> {
            let raw = arg.ok_or_else(|| ParseError(format!("{} needs a vehicle id", verb)))?;
            raw.parse::<u64>()
                .map(VehicleId)
                .map_err(|_| ParseError(format!("bad vehicle id: {}", raw)))
        };

        match verb.as_str() {
            "enter" | "e" => Ok(Command::Enter(vehicle(words.next())?)),
            "exit" | "x" => Ok(Command::Exit(vehicle(words.next())?)),
            "seat" | "s" => Ok(Command::Seat(vehicle(words.next())?)),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "quit" | "q" => Ok(Command::Quit),
            other => Err(ParseError(format!("unknown command: {}", other))),
        }
    }
}

/// Run one command; returns false on quit
pub async fn execute(node: &PlayerNode, command: Command) -> bool {
    let sent = match command {
        Command::Enter(vehicle) => node.request_enter(vehicle).await,
        Command::Exit(vehicle) => node.request_exit(vehicle).await,
        Command::Seat(vehicle) => node.request_change_seat(vehicle).await,
        Command::Status => {
            print_status(node);
            return true;
        }
        Command::Help => {
            tracing::info!("Commands: enter <id>, exit <id>, seat <id>, status, quit");
            return true;
        }
        Command::Quit => return false,
    };

    match sent {
        Ok(true) => {}
        Ok(false) => tracing::info!("{:?} not sent (blocked locally or unknown vehicle)", command),
        Err(e) => tracing::warn!("{:?} failed: {}", command, e),
    }
    true
}

fn print_status(node: &PlayerNode) {
    tracing::info!(
        "{} in {}",
        node.local_player(),
        node.current_vehicle()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "no vehicle".to_string())
    );
    for id in node.vehicles() {
        if let Some(controller) = node.vehicle(id) {
            let snapshot = controller.mirror().snapshot();
            tracing::info!(
                "  {} rev {} driver {:?} seats {:?}",
                id,
                snapshot.revision,
                snapshot.driver,
                snapshot.seats
            );
        }
    }
}

/// Read commands from stdin until quit or EOF
pub async fn run(node: &PlayerNode) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(command) => {
                if !execute(node, command).await {
                    break;
                }
            }
            Err(e) => tracing::warn!("{}", e),
        }
    }
    Ok(())
}
