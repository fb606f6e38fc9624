//! Backend network layer handling UDP traffic with players and the relay, and
//! the tick loop coordinating portals and sessions

use crate::activation::ActivationTracker;
use crate::commands;
use crate::config::ServerConfig;
use crate::manager::PortalManager;
use crate::session::{Avatar, Delivery, PlayerSessionStore, SessionHandle};
use crate::storage::PortalStorage;
use crate::traversal::{run_traversals, TraversalPlan};
use crate::world::{ForceLoadTracker, MemoryWorld};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    DisconnectNotice, Packet, PlayerMotion, RelayMessage, SelectionMirrorRequest, Vec3, WorldHandle,
    MAX_DATAGRAM_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use uuid::Uuid;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where players without a known position appear.
const SPAWN_POINT: Vec3 = Vec3 {
    x: 0.5,
    y: 64.0,
    z: 0.5,
};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    PlayerTimeout { handle: SessionHandle },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<SessionHandle>,
    },
}

/// A backend server: hosts worlds and portals, serves players, and talks to
/// other backends through the relay
pub struct Server {
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<PlayerSessionStore>>,
    portals: PortalManager,
    activation: ActivationTracker,
    storage: PortalStorage,
    spawn_world: WorldHandle,
    relay_addr: Option<SocketAddr>,
    relay_linked: bool,
    config: ServerConfig,
    tick: u64,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    /// Binds the socket, creates the configured worlds and loads the portal file
    pub async fn new(config: ServerConfig) -> Result<Self, BoxError> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!(
            "Server {} listening on {}",
            config.server_name,
            socket.local_addr()?
        );

        let relay_addr = match &config.relay_addr {
            Some(relay) => Some(
                tokio::net::lookup_host(relay.as_str())
                    .await?
                    .next()
                    .ok_or_else(|| format!("Could not resolve relay address {}", relay))?,
            ),
            None => None,
        };

        let mut worlds = MemoryWorld::new();
        let mut hosted = Vec::new();
        for name in &config.worlds {
            hosted.push(worlds.create_world(name.clone()));
        }
        let spawn_world = hosted
            .into_iter()
            .next()
            .ok_or("At least one world has to be hosted")?;

        let mut portals = PortalManager::new(worlds, ForceLoadTracker::new());
        let storage = PortalStorage::new(&config.portals_file);
        storage.load_into(&mut portals)?;

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            sessions: Arc::new(RwLock::new(PlayerSessionStore::new(
                config.max_players,
                config.warn_on_missing_selection,
            ))),
            portals,
            activation: ActivationTracker::new(config.activation_distance, config.view_distance),
            storage,
            spawn_world,
            relay_addr,
            relay_linked: false,
            config,
            tick: 0,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender for stopping the server from outside the run loop
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn portals(&self) -> &PortalManager {
        &self.portals
    }

    pub fn portals_mut(&mut self) -> &mut PortalManager {
        &mut self.portals
    }

    pub fn spawn_world(&self) -> &WorldHandle {
        &self.spawn_world
    }

    pub fn sessions(&self) -> Arc<RwLock<PlayerSessionStore>> {
        Arc::clone(&self.sessions)
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let sessions = Arc::clone(&self.sessions);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let player_addrs: Vec<(SessionHandle, SocketAddr)> = {
                            let sessions = sessions.read().await;
                            sessions
                                .sessions()
                                .map(|session| (session.handle, session.addr))
                                .collect()
                        };

                        for (handle, addr) in player_addrs {
                            if Some(handle) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to session {}: {}", handle, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors player timeouts
    async fn spawn_timeout_checker(&self) {
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.player_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let sessions = sessions.read().await;
                    sessions.check_timeouts(timeout)
                };

                for handle in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::PlayerTimeout { handle }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), BoxError> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    async fn send_packet(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket {
            packet: packet.clone(),
            addr,
        }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    async fn broadcast_packet(&self, packet: &Packet, exclude: Option<SessionHandle>) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket {
            packet: packet.clone(),
            exclude,
        }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn send_to_relay(&self, packet: Packet) {
        match self.relay_addr {
            Some(relay) => self.send_packet(&packet, relay).await,
            None => warn!("No relay is configured, dropping {:?}", packet),
        }
    }

    async fn session_handle(&self, addr: SocketAddr) -> Option<SessionHandle> {
        self.sessions.read().await.find_by_addr(addr)
    }

    /// Dispatches a packet either to the relay handler or the player handler
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if Some(addr) == self.relay_addr {
            self.handle_relay_packet(packet).await;
            return;
        }

        match packet {
            Packet::Join {
                client_version,
                player_id,
            } => {
                self.handle_join(client_version, player_id, addr).await;
            }

            Packet::Move { motion } => {
                let mut sessions = self.sessions.write().await;
                let handle = sessions.find_by_addr(addr);
                match handle.and_then(|handle| sessions.session_mut(handle)) {
                    Some(session) => {
                        session.avatar.motion = motion;
                        session.touch();
                    }
                    None => debug!("Movement from unknown address {}", addr),
                }
            }

            Packet::Command(command) => {
                let Some(handle) = self.session_handle(addr).await else {
                    warn!("Command from unknown address {}", addr);
                    return;
                };

                let result = {
                    let mut sessions = self.sessions.write().await;
                    if let Some(session) = sessions.session_mut(handle) {
                        session.touch();
                    }
                    commands::execute(&mut sessions, &mut self.portals, handle, command)
                };

                let response = match result {
                    Ok(message) => Packet::CommandResult {
                        success: true,
                        message,
                    },
                    Err(e) => {
                        if !e.is_user_facing() {
                            warn!("Command of session {} failed: {}", handle, e);
                        }
                        Packet::CommandResult {
                            success: false,
                            message: e.to_string(),
                        }
                    }
                };
                self.send_packet(&response, addr).await;
            }

            Packet::Heartbeat => {
                let mut sessions = self.sessions.write().await;
                let handle = sessions.find_by_addr(addr);
                if let Some(session) = handle.and_then(|handle| sessions.session_mut(handle)) {
                    session.touch();
                }
            }

            Packet::Leave => {
                if let Some(handle) = self.session_handle(addr).await {
                    self.sessions.write().await.disconnect(handle);
                }
            }

            _ => {
                warn!("Unexpected packet type from player at {}", addr);
            }
        }
    }

    async fn handle_join(&mut self, client_version: u32, player_id: Uuid, addr: SocketAddr) {
        info!(
            "Player {} joining from {} (version: {})",
            player_id, addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            let response = Packet::Disconnected {
                reason: format!(
                    "Unsupported protocol version {}, expected {}",
                    client_version, PROTOCOL_VERSION
                ),
            };
            self.send_packet(&response, addr).await;
            return;
        }

        let outcome = {
            let mut sessions = self.sessions.write().await;
            // A new join from the same address replaces whoever was there
            if let Some(existing) = sessions.find_by_addr(addr) {
                info!("Removing existing session {} from {}", existing, addr);
                sessions.disconnect(existing);
            }

            let spawn = Avatar::new(self.spawn_world.clone(), PlayerMotion::at(SPAWN_POINT));
            sessions.connect(player_id, addr, spawn, self.portals.worlds())
        };

        let response = match outcome {
            Some(outcome) => Packet::Joined {
                world_name: outcome.avatar.world.name,
                motion: outcome.avatar.motion,
            },
            None => Packet::Disconnected {
                reason: "Server full".to_string(),
            },
        };
        self.send_packet(&response, addr).await;
    }

    async fn handle_relay_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Registered => {
                if !self.relay_linked {
                    info!("Registered with relay as {}", self.config.server_name);
                }
                self.relay_linked = true;
            }

            Packet::Deliver {
                source_server,
                message,
            } => {
                self.handle_relay_message(source_server, message).await;
            }

            Packet::Notice(DisconnectNotice) => {
                // Sent when the relay stops or no longer knows us
                if self.relay_linked {
                    warn!("Relay dropped the link, cross-server portals are unavailable until it returns");
                    let packet = Packet::CommandResult {
                        success: false,
                        message: "Portals to other servers are unavailable".to_string(),
                    };
                    self.broadcast_packet(&packet, None).await;
                }
                self.relay_linked = false;
            }

            other => {
                warn!("Unexpected packet from relay: {:?}", other);
            }
        }
    }

    /// Messages other backends addressed to this one
    async fn handle_relay_message(&mut self, source_server: String, message: RelayMessage) {
        match message {
            RelayMessage::Teleport(request) => {
                let player_id = request.player_id;
                let applied = {
                    let mut sessions = self.sessions.write().await;
                    match sessions.handle_teleport(request, self.portals.worlds()) {
                        Delivery::Applied(handle) => sessions
                            .session(handle)
                            .map(|session| (session.addr, session.avatar.clone())),
                        Delivery::Stored => None,
                    }
                };

                if let Some((addr, avatar)) = applied {
                    debug!("Teleported online player {} from {}", player_id, source_server);
                    let packet = Packet::Teleported {
                        world_name: avatar.world.name,
                        motion: avatar.motion,
                    };
                    self.send_packet(&packet, addr).await;
                }
            }

            RelayMessage::MirrorSelection(request) => {
                self.accept_selection(&source_server, request).await;
            }

            RelayMessage::GetSelection {
                request_id,
                player_id,
            } => {
                let selection = self
                    .sessions
                    .read()
                    .await
                    .destination_selection(&player_id, &self.config.server_name);

                let packet = Packet::Forward {
                    target_server: source_server,
                    message: RelayMessage::SelectionResponse {
                        request_id,
                        player_id,
                        selection,
                    },
                };
                self.send_to_relay(packet).await;
            }

            RelayMessage::SelectionResponse {
                player_id,
                selection: Some(selection),
                ..
            } => {
                let request = SelectionMirrorRequest {
                    player_id,
                    selection,
                };
                self.accept_selection(&source_server, request).await;
            }

            RelayMessage::SelectionResponse {
                player_id,
                selection: None,
                ..
            } => {
                debug!("{} has no selection for player {}", source_server, player_id);
            }
        }
    }

    async fn accept_selection(&mut self, source_server: &str, request: SelectionMirrorRequest) {
        let notify = {
            let mut sessions = self.sessions.write().await;
            match sessions.handle_selection_mirror(request) {
                Delivery::Applied(handle) => sessions.session(handle).map(|session| session.addr),
                Delivery::Stored => None,
            }
        };

        if let Some(addr) = notify {
            let packet = Packet::CommandResult {
                success: true,
                message: format!("Received destination selected on {}", source_server),
            };
            self.send_packet(&packet, addr).await;
        }
    }

    async fn register_with_relay(&self) {
        if self.relay_addr.is_some() {
            self.send_to_relay(Packet::Register {
                client_version: PROTOCOL_VERSION,
                server_name: self.config.server_name.clone(),
            })
            .await;
        }
    }

    /// Keeps the registration alive, re-registering after the relay restarted
    async fn heartbeat(&self) {
        if self.relay_addr.is_none() {
            return;
        }
        if self.relay_linked {
            self.send_to_relay(Packet::Heartbeat).await;
        } else {
            self.register_with_relay().await;
        }
    }

    /// Runs activation, portal updates and traversal, then sends whatever the
    /// traversals produced
    async fn tick(&mut self) {
        self.tick += 1;

        let routed = {
            let mut sessions = self.sessions.write().await;
            let observers = ActivationTracker::observers(&sessions);
            self.activation.apply(&mut self.portals, &observers);

            let removed = self.portals.update();
            if !removed.is_empty() {
                debug!("Tick {}: {} portals removed themselves", self.tick, removed.len());
            }

            let plans = run_traversals(
                &mut sessions,
                &self.portals,
                self.config.portal_cooldown_ticks,
            );
            plans
                .into_iter()
                .filter_map(|plan| {
                    sessions
                        .session(plan.handle())
                        .map(|session| (session.addr, session.player_id, plan))
                })
                .collect::<Vec<_>>()
        };

        for (addr, player_id, plan) in routed {
            match plan {
                TraversalPlan::Local { avatar, .. } => {
                    let packet = Packet::Teleported {
                        world_name: avatar.world.name,
                        motion: avatar.motion,
                    };
                    self.send_packet(&packet, addr).await;
                }

                TraversalPlan::External {
                    target_server,
                    request,
                    ..
                } => {
                    if self.relay_addr.is_none() {
                        warn!(
                            "Player {} entered a portal to {} but no relay is configured",
                            player_id, target_server
                        );
                        continue;
                    }

                    if let Some(request) = request {
                        self.send_to_relay(Packet::Forward {
                            target_server: target_server.clone(),
                            message: RelayMessage::Teleport(request),
                        })
                        .await;
                    }
                    self.send_to_relay(Packet::SwitchServer {
                        player_id,
                        target_server: target_server.clone(),
                    })
                    .await;
                    self.send_packet(
                        &Packet::Transfer {
                            server_name: target_server,
                        },
                        addr,
                    )
                    .await;
                }

                TraversalPlan::Fired { portal_id, .. } => {
                    debug!("Portal {} fired for player {}", portal_id, player_id);
                }
            }
        }

        if self.tick % 200 == 0 {
            let player_count = self.sessions.read().await.len();
            if player_count > 0 {
                debug!(
                    "Tick {}: {} players, {} portals",
                    self.tick,
                    player_count,
                    self.portals.len()
                );
            }
        }
    }

    /// Tells players and the relay that this backend is going away, then saves
    /// the portals. Packets are sent directly since the sender task may already
    /// be gone once this returns.
    async fn shutdown(&mut self) {
        info!("Server {} shutting down", self.config.server_name);

        let players: Vec<SocketAddr> = {
            let sessions = self.sessions.read().await;
            sessions.sessions().map(|session| session.addr).collect()
        };
        let goodbye = Packet::Disconnected {
            reason: "Server shutting down".to_string(),
        };
        for addr in players {
            if let Err(e) = Self::send_packet_impl(&self.socket, &goodbye, addr).await {
                error!("Failed to notify player at {}: {}", addr, e);
            }
        }

        if let Some(relay) = self.relay_addr {
            let notice = Packet::Notice(DisconnectNotice);
            if let Err(e) = Self::send_packet_impl(&self.socket, &notice, relay).await {
                error!("Failed to notify relay: {}", e);
            }
        }

        if let Err(e) = self.storage.save(&self.portals.all_portals()) {
            error!("Failed to save portals: {}", e);
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), BoxError> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;
        self.register_with_relay().await;

        let mut tick_interval = interval(self.config.tick_duration);
        let mut heartbeat_interval = interval(self.config.heartbeat_interval);

        info!("Server {} started successfully", self.config.server_name);

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::PlayerTimeout { handle }) => {
                            if let Some(session) = self.sessions.write().await.disconnect(handle) {
                                info!("Player {} timed out", session.player_id);
                            }
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            self.shutdown().await;
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick().await;
                },

                _ = heartbeat_interval.tick() => {
                    self.heartbeat().await;
                },
            }
        }

        Ok(())
    }
}
