//! WebSocket relay between the host and remote players
//!
//! The host runs `RelayServer`; each remote process connects with
//! `RelayClient`. Frames are borsh-encoded `WireMessage`s. The server
//! stamps every request with the connection's own player id, so a client
//! can never act on behalf of someone else.

use crate::authority::{AuthorityNode, AuthorityQueue};
use crate::config::RelayConfig;
use crate::error::{NetError, Result};
use crate::link::AuthorityLink;
use crate::network::Outbound;
use crate::node::NodeEvent;
use crate::session::{HostSession, SessionEvent};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message, WebSocketStream};
use vehicle_core::{PlayerId, SessionService, VehicleBroadcast, VehicleId, VehicleRequest, WireMessage};

/// Relay counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub resyncs: u64,
}

/// Relay server (run by the host)
pub struct RelayServer {
    authority: Arc<AuthorityNode>,
    session: Arc<HostSession>,
    config: RelayConfig,
    stats: Arc<RwLock<RelayStats>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayServer {
    pub fn new(authority: Arc<AuthorityNode>, session: Arc<HostSession>, config: RelayConfig) -> Self {
        Self {
            authority,
            session,
            config,
            stats: Arc::new(RwLock::new(RelayStats::default())),
            accept_task: Mutex::new(None),
        }
    }

    /// Bind and start accepting players; returns the bound address
    pub async fn start(&self, addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Relay listening on {}", local_addr);

        let ctx = ConnectionContext {
            authority: self.authority.clone(),
            queue: self.authority.queue(),
            session: self.session.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
        };

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!("Connection from {}", peer_addr);
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer_addr, ctx).await {
                                tracing::warn!("Connection {} error: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        });
        *self.accept_task.lock() = Some(task);

        Ok(local_addr)
    }

    pub fn stats(&self) -> RelayStats {
        self.stats.read().clone()
    }

    /// Stop accepting; existing connections are left alone
    pub fn stop(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Clone)]
struct ConnectionContext {
    authority: Arc<AuthorityNode>,
    queue: AuthorityQueue,
    session: Arc<HostSession>,
    config: RelayConfig,
    stats: Arc<RwLock<RelayStats>>,
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

async fn send_frame(sink: &mut WsSink, msg: &WireMessage) -> Result<()> {
    let data = msg.to_bytes().map_err(|e| NetError::Codec(e.to_string()))?;
    sink.send(Message::Binary(data)).await?;
    Ok(())
}

async fn send_snapshots(sink: &mut WsSink, authority: &AuthorityNode) -> Result<usize> {
    let snapshots = authority.snapshots();
    let count = snapshots.len();
    for snapshot in snapshots {
        send_frame(sink, &WireMessage::Broadcast(VehicleBroadcast::Snapshot(snapshot))).await?;
    }
    Ok(count)
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, ctx: ConnectionContext) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let player = match ctx.session.connect(Some(peer_addr.to_string())) {
        Ok(player) => player,
        Err(e) => {
            ctx.stats.write().connections_rejected += 1;
            tracing::info!("Rejected {}: {}", peer_addr, e);
            send_frame(&mut ws_sender, &WireMessage::Rejected { reason: e.to_string() }).await?;
            let _ = ws_sender.send(Message::Close(None)).await;
            return Ok(());
        }
    };
    ctx.authority.services().players.register(player);
    ctx.stats.write().connections_accepted += 1;

    // subscribe before the initial snapshots so nothing falls in between
    let mut outbound = ctx.authority.subscribe();
    let mut membership = ctx.session.subscribe_events();

    let welcome = WireMessage::Welcome {
        player,
        host: ctx.session.host_player(),
        players: ctx.session.players(),
    };
    let handshake = async {
        send_frame(&mut ws_sender, &welcome).await?;
        send_snapshots(&mut ws_sender, &ctx.authority).await
    };
    if let Err(e) = handshake.await {
        ctx.session.disconnect(player);
        return Err(e);
    }

    // Forward broadcasts addressed to this player
    let stats = ctx.stats.clone();
    let authority = ctx.authority.clone();
    let heartbeat = ctx.config.heartbeat_interval.max(Duration::from_millis(10));
    let send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        loop {
            let frame = tokio::select! {
                received = outbound.recv() => match received {
                    Ok(Outbound { audience, message }) => {
                        if !audience.includes(player) {
                            continue;
                        }
                        WireMessage::Broadcast(message)
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("{} lagged {} broadcasts; resending snapshots", player, n);
                        stats.write().resyncs += 1;
                        if send_snapshots(&mut ws_sender, &authority).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = membership.recv() => match event {
                    Ok(SessionEvent::Joined(other)) if other != player => WireMessage::PlayerJoined(other),
                    Ok(SessionEvent::Left(other)) if other != player => WireMessage::PlayerLeft(other),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = ticker.tick() => WireMessage::Heartbeat,
            };

            match send_frame(&mut ws_sender, &frame).await {
                Ok(()) => stats.write().frames_sent += 1,
                Err(NetError::Codec(e)) => tracing::warn!("Dropped frame for {}: {}", player, e),
                Err(_) => break,
            }
        }
    });

    // Requests from this player
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                ctx.stats.write().frames_received += 1;
                match WireMessage::from_bytes(&data) {
                    Ok(WireMessage::Request { vehicle, request }) => {
                        tracing::debug!("{} -> {:?} on {}", player, request, vehicle);
                        if ctx.queue.submit(vehicle, player, request).await.is_err() {
                            tracing::warn!("Authority queue closed");
                            break;
                        }
                    }
                    Ok(WireMessage::Heartbeat) => {}
                    Ok(other) => {
                        tracing::debug!("Ignoring {:?} from {}", other, player);
                    }
                    Err(e) => {
                        tracing::warn!("Undecodable frame from {}: {}", player, e);
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error from {}: {}", player, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup
    send_task.abort();
    ctx.session.disconnect(player);
    tracing::info!("{} disconnected", player);

    Ok(())
}

/// Relay client (run by remote players)
pub struct RelayClient {
    player: PlayerId,
    host: PlayerId,
    peers: Vec<PlayerId>,
    outbox: mpsc::Sender<WireMessage>,
    closed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayClient {
    /// Connect and complete the handshake.
    ///
    /// Returns the client plus the stream of events for this player's node.
    pub async fn connect(host_addr: &str, config: &RelayConfig) -> Result<(Self, mpsc::Receiver<NodeEvent>)> {
        let url = format!("ws://{}", host_addr);
        let (ws_stream, _) = connect_async(&url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (player, host, peers) = loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Binary(data))) => {
                    match WireMessage::from_bytes(&data).map_err(|e| NetError::Codec(e.to_string()))? {
                        WireMessage::Welcome { player, host, players } => break (player, host, players),
                        WireMessage::Rejected { reason } => return Err(NetError::Rejected(reason)),
                        _ => return Err(NetError::Handshake),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(NetError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        };
        tracing::info!("Joined {} as {}", host_addr, player);

        let (event_tx, event_rx) = mpsc::channel::<NodeEvent>(config.event_capacity.max(1));
        let (outbox, mut outbox_rx) = mpsc::channel::<WireMessage>(config.outbox_capacity.max(1));
        let closed = Arc::new(AtomicBool::new(false));

        for peer in peers.iter().copied().filter(|p| *p != player) {
            let _ = event_tx.send(NodeEvent::PlayerJoined(peer)).await;
        }

        // Spawn receiver task
        let receiver_closed = closed.clone();
        let receiver = tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let event = match WireMessage::from_bytes(&data) {
                            Ok(WireMessage::Broadcast(message)) => NodeEvent::Vehicle(message),
                            Ok(WireMessage::PlayerJoined(p)) => NodeEvent::PlayerJoined(p),
                            Ok(WireMessage::PlayerLeft(p)) => NodeEvent::PlayerLeft(p),
                            Ok(WireMessage::Heartbeat) => {
                                tracing::trace!("Heartbeat from host");
                                continue;
                            }
                            Ok(other) => {
                                tracing::debug!("Ignoring {:?}", other);
                                continue;
                            }
                            Err(e) => {
                                tracing::warn!("Undecodable frame from host: {}", e);
                                continue;
                            }
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::warn!("Host closed connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            receiver_closed.store(true, Ordering::SeqCst);
            let _ = event_tx.send(NodeEvent::HostLost).await;
        });

        // Spawn sender task
        let sender_closed = closed.clone();
        let sender = tokio::spawn(async move {
            while let Some(msg) = outbox_rx.recv().await {
                let data = match msg.to_bytes() {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::warn!("Dropped outgoing frame: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Binary(data)).await.is_err() {
                    break;
                }
            }
            sender_closed.store(true, Ordering::SeqCst);
            let _ = ws_sender.send(Message::Close(None)).await;
        });

        Ok((
            Self {
                player,
                host,
                peers,
                outbox,
                closed,
                tasks: vec![receiver, sender],
            },
            event_rx,
        ))
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn host(&self) -> PlayerId {
        self.host
    }

    /// Players connected when this client joined, itself included
    pub fn peers(&self) -> &[PlayerId] {
        &self.peers
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the connection; the host treats this as a disconnect
    pub fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl AuthorityLink for RelayClient {
    fn local_player(&self) -> PlayerId {
        self.player
    }

    async fn submit(&self, vehicle: VehicleId, request: VehicleRequest) -> Result<()> {
        if self.is_closed() {
            return Err(NetError::ConnectionClosed);
        }
        let msg = WireMessage::Request {
            vehicle,
            request: request.sanitized(),
        };
        self.outbox.send(msg).await.map_err(|_| NetError::ConnectionClosed)
    }
}
