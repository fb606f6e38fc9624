//! Relay network layer routing messages between backend servers

use crate::config::RelayConfig;
use crate::registry::ServerRegistry;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    DisconnectNotice, Packet, RelayMessage, SelectionMirrorRequest, MAX_DATAGRAM_SIZE,
    PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Messages sent from network tasks to the main relay loop
#[derive(Debug)]
pub enum RelayEvent {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ServerTimeout { name: String },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// A selection query sent on behalf of a player switching servers
#[derive(Debug, Clone, PartialEq)]
struct PendingLookup {
    player_id: Uuid,
    source_server: String,
    target_server: String,
}

impl PendingLookup {
    fn involves(&self, server_name: &str) -> bool {
        self.source_server == server_name || self.target_server == server_name
    }
}

pub struct Relay {
    socket: Arc<UdpSocket>,
    registry: Arc<RwLock<ServerRegistry>>,
    pending_lookups: HashMap<u64, PendingLookup>,
    next_request_id: u64,
    config: RelayConfig,

    // Communication channels
    event_tx: mpsc::UnboundedSender<RelayEvent>,
    event_rx: mpsc::UnboundedReceiver<RelayEvent>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Relay {
    pub async fn new(config: RelayConfig) -> Result<Self, BoxError> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Relay listening on {}", socket.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Relay {
            socket,
            registry: Arc::new(RwLock::new(ServerRegistry::new())),
            pending_lookups: HashMap::new(),
            next_request_id: 1,
            config,
            event_tx,
            event_rx,
            outbound_tx,
            outbound_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<RelayEvent> {
        self.event_tx.clone()
    }

    pub fn registry(&self) -> Arc<RwLock<ServerRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) = event_tx.send(RelayEvent::PacketReceived { packet, addr })
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
        let mut outbound_rx = std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that evicts backends that stopped heartbeating
    async fn spawn_timeout_checker(&self) {
        let registry = Arc::clone(&self.registry);
        let event_tx = self.event_tx.clone();
        let timeout = self.config.server_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = registry.write().await.check_timeouts(timeout);
                for name in timed_out {
                    if let Err(e) = event_tx.send(RelayEvent::ServerTimeout { name }) {
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

    async fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Hands `message` to `target_server` on behalf of `source_server`
    async fn deliver(&self, source_server: &str, target_server: &str, message: RelayMessage) {
        let target = self.registry.read().await.addr_of(target_server);
        match target {
            Some(addr) => {
                let packet = Packet::Deliver {
                    source_server: source_server.to_string(),
                    message,
                };
                self.send_packet(packet, addr).await;
            }
            None => warn!(
                "Dropping message from {} to unknown backend {}",
                source_server, target_server
            ),
        }
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if let Packet::Register {
            client_version,
            server_name,
        } = packet
        {
            if client_version != PROTOCOL_VERSION {
                warn!(
                    "Backend {} at {} speaks protocol {}, expected {}",
                    server_name, addr, client_version, PROTOCOL_VERSION
                );
                return;
            }
            let previous = self.registry.read().await.name_by_addr(addr);
            if let Some(previous) = previous.filter(|previous| *previous != server_name) {
                self.forget_lookups(&previous);
            }
            self.registry.write().await.register(&server_name, addr);
            self.send_packet(Packet::Registered, addr).await;
            return;
        }

        let source = {
            let mut registry = self.registry.write().await;
            registry.heartbeat(addr);
            registry.name_by_addr(addr)
        };
        let Some(source) = source else {
            // The backend thinks it is linked; tell it otherwise so it registers again
            debug!("Packet from unregistered address {}", addr);
            self.send_packet(Packet::Notice(DisconnectNotice), addr).await;
            return;
        };

        match packet {
            Packet::Heartbeat => {}

            Packet::Forward {
                target_server,
                message,
            } => {
                self.handle_forward(source, target_server, message).await;
            }

            Packet::SwitchServer {
                player_id,
                target_server,
            } => {
                self.handle_switch(source, player_id, target_server, addr)
                    .await;
            }

            Packet::Notice(DisconnectNotice) => {
                self.registry.write().await.deregister(&source);
                self.forget_lookups(&source);
            }

            other => {
                warn!("Unexpected packet from backend {}: {:?}", source, other);
            }
        }
    }

    async fn handle_forward(&mut self, source: String, target_server: String, message: RelayMessage) {
        // Answers to our own selection queries become mirror requests
        if let RelayMessage::SelectionResponse {
            request_id,
            player_id,
            selection,
        } = &message
        {
            if let Some(lookup) = self.pending_lookups.remove(request_id) {
                match selection {
                    Some(selection) => {
                        let request = SelectionMirrorRequest {
                            player_id: *player_id,
                            selection: selection.clone(),
                        };
                        self.deliver(
                            &source,
                            &lookup.target_server,
                            RelayMessage::MirrorSelection(request),
                        )
                        .await;
                    }
                    None => debug!(
                        "{} has no selection to mirror for player {}",
                        source, lookup.player_id
                    ),
                }
                return;
            }
        }

        self.deliver(&source, &target_server, message).await;
    }

    async fn handle_switch(
        &mut self,
        source: String,
        player_id: Uuid,
        target_server: String,
        source_addr: SocketAddr,
    ) {
        if self.registry.read().await.server(&target_server).is_none() {
            warn!(
                "Player {} switching from {} to unknown backend {}",
                player_id, source, target_server
            );
            return;
        }

        info!("Player {} switching from {} to {}", player_id, source, target_server);

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending_lookups.insert(
            request_id,
            PendingLookup {
                player_id,
                source_server: source,
                target_server: target_server.clone(),
            },
        );

        // Ask the old backend for the destination the player selected there
        let packet = Packet::Deliver {
            source_server: target_server,
            message: RelayMessage::GetSelection {
                request_id,
                player_id,
            },
        };
        self.send_packet(packet, source_addr).await;
    }

    /// Drops selection queries that can no longer be answered or delivered
    fn forget_lookups(&mut self, server_name: &str) {
        let before = self.pending_lookups.len();
        self.pending_lookups
            .retain(|_, lookup| !lookup.involves(server_name));
        let dropped = before - self.pending_lookups.len();
        if dropped > 0 {
            debug!("Dropped {} selection queries involving {}", dropped, server_name);
        }
    }

    /// Handles one event from the network tasks. Returns false on shutdown.
    async fn handle_event(&mut self, event: RelayEvent) -> bool {
        match event {
            RelayEvent::PacketReceived { packet, addr } => {
                self.handle_packet(packet, addr).await;
            }
            RelayEvent::ServerTimeout { name } => {
                self.forget_lookups(&name);
            }
            RelayEvent::Shutdown => return false,
        }
        true
    }

    /// Tells every backend the relay is going away. Sent directly since the
    /// sender task does not outlive the run loop.
    async fn shutdown(&mut self) {
        info!("Relay shutting down");
        let server_addrs = self.registry.read().await.server_addrs();
        let notice = Packet::Notice(DisconnectNotice);
        for (name, addr) in server_addrs {
            if let Err(e) = Self::send_packet_impl(&self.socket, &notice, addr).await {
                error!("Failed to notify backend {}: {}", name, e);
            }
        }
    }

    /// Main relay loop
    pub async fn run(&mut self) -> Result<(), BoxError> {
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        info!("Relay started successfully");

        while let Some(event) = self.event_rx.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }

        self.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn start_relay() -> (SocketAddr, mpsc::UnboundedSender<RelayEvent>, tokio::task::JoinHandle<()>) {
        let config = RelayConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let mut relay = Relay::new(config).await.unwrap();
        let addr = relay.local_addr().unwrap();
        let shutdown = relay.shutdown_handle();
        let task = tokio::spawn(async move {
            relay.run().await.unwrap();
        });
        (addr, shutdown, task)
    }

    async fn send(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) {
        socket.send_to(&serialize(packet).unwrap(), addr).await.unwrap();
    }

    async fn recv(socket: &UdpSocket) -> Packet {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
            .await
            .expect("Timed out waiting for a packet")
            .unwrap();
        deserialize(&buffer[..len]).unwrap()
    }

    async fn register(name: &str, relay: SocketAddr) -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = Packet::Register {
            client_version: PROTOCOL_VERSION,
            server_name: name.to_string(),
        };
        send(&socket, &packet, relay).await;
        assert_eq!(recv(&socket).await, Packet::Registered);
        socket
    }

    async fn idle_relay() -> Relay {
        let config = RelayConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        Relay::new(config).await.unwrap()
    }

    fn backend_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// Registers `survival` and `creative` and starts `count` switches
    /// from survival to creative
    async fn relay_with_switches(count: usize) -> Relay {
        let mut relay = idle_relay().await;
        for (name, port) in [("survival", 30001), ("creative", 30002)] {
            let packet = Packet::Register {
                client_version: PROTOCOL_VERSION,
                server_name: name.to_string(),
            };
            relay.handle_packet(packet, backend_addr(port)).await;
        }
        for _ in 0..count {
            let packet = Packet::SwitchServer {
                player_id: Uuid::new_v4(),
                target_server: "creative".to_string(),
            };
            relay.handle_packet(packet, backend_addr(30001)).await;
        }
        relay
    }

    #[tokio::test]
    async fn test_lookups_dropped_when_source_leaves() {
        let mut relay = relay_with_switches(100).await;
        assert_eq!(relay.pending_lookups.len(), 100);
        assert_eq!(relay.registry.read().await.len(), 2);
        assert!(relay
            .pending_lookups
            .values()
            .all(|lookup| lookup.source_server == "survival"));

        relay
            .handle_packet(Packet::Notice(DisconnectNotice), backend_addr(30001))
            .await;
        assert!(relay.pending_lookups.is_empty());
        assert!(relay.registry.read().await.server("survival").is_none());
        assert!(relay.registry.read().await.server("creative").is_some());
    }

    #[tokio::test]
    async fn test_lookups_dropped_when_target_leaves() {
        let mut relay = relay_with_switches(10).await;

        relay
            .handle_packet(Packet::Notice(DisconnectNotice), backend_addr(30002))
            .await;
        assert!(relay.pending_lookups.is_empty());
    }

    #[test]
    fn test_lookups_dropped_when_source_times_out() {
        tokio_test::block_on(async {
            let mut relay = relay_with_switches(100).await;

            let running = relay
                .handle_event(RelayEvent::ServerTimeout {
                    name: "creative".to_string(),
                })
                .await;
            assert!(running);
            assert!(relay.pending_lookups.is_empty());

            let mut relay = relay_with_switches(100).await;
            relay
                .handle_event(RelayEvent::ServerTimeout {
                    name: "survival".to_string(),
                })
                .await;
            assert!(relay.pending_lookups.is_empty());

            assert!(!relay.handle_event(RelayEvent::Shutdown).await);
        });
    }

    #[tokio::test]
    async fn test_lookups_dropped_when_address_changes_name() {
        let mut relay = relay_with_switches(5).await;

        let packet = Packet::Register {
            client_version: PROTOCOL_VERSION,
            server_name: "lobby".to_string(),
        };
        relay.handle_packet(packet, backend_addr(30001)).await;
        assert!(relay.pending_lookups.is_empty());
    }

    #[tokio::test]
    async fn test_answered_lookup_is_removed() {
        let mut relay = relay_with_switches(2).await;
        let (&request_id, lookup) = relay.pending_lookups.iter().next().unwrap();
        let player_id = lookup.player_id;

        let packet = Packet::Forward {
            target_server: "creative".to_string(),
            message: RelayMessage::SelectionResponse {
                request_id,
                player_id,
                selection: None,
            },
        };
        relay.handle_packet(packet, backend_addr(30001)).await;
        assert_eq!(relay.pending_lookups.len(), 1);
        assert!(!relay.pending_lookups.contains_key(&request_id));
    }

    #[test]
    fn test_relay_event_creation() {
        let msg = RelayEvent::ServerTimeout {
            name: "survival".to_string(),
        };

        match msg {
            RelayEvent::ServerTimeout { name } => assert_eq!(name, "survival"),
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_forward_is_delivered_with_source() {
        let (relay, shutdown, task) = start_relay().await;
        let survival = register("survival", relay).await;
        let creative = register("creative", relay).await;

        let message = RelayMessage::GetSelection {
            request_id: 7,
            player_id: Uuid::new_v4(),
        };
        let packet = Packet::Forward {
            target_server: "creative".to_string(),
            message: message.clone(),
        };
        send(&survival, &packet, relay).await;

        match recv(&creative).await {
            Packet::Deliver {
                source_server,
                message: delivered,
            } => {
                assert_eq!(source_server, "survival");
                assert_eq!(delivered, message);
            }
            other => panic!("Wrong packet type: {:?}", other),
        }

        shutdown.send(RelayEvent::Shutdown).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_sender_is_told_to_register() {
        let (relay, shutdown, task) = start_relay().await;
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        send(&stranger, &Packet::Heartbeat, relay).await;
        assert_eq!(recv(&stranger).await, Packet::Notice(DisconnectNotice));

        shutdown.send(RelayEvent::Shutdown).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_notifies_backends() {
        let (relay, shutdown, task) = start_relay().await;
        let survival = register("survival", relay).await;

        shutdown.send(RelayEvent::Shutdown).unwrap();
        assert_eq!(recv(&survival).await, Packet::Notice(DisconnectNotice));
        task.await.unwrap();
    }
}
