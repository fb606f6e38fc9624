//! Scripted player for poking at a running backend: joins, builds a two-way
//! portal pair with wand commands and walks through it.

use bincode::{deserialize, serialize};
use clap::Parser;
use shared::{BlockPos, Packet, PlayerCommand, PlayerMotion, Vec3, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend address to connect to
    #[arg(short, long, default_value = "127.0.0.1:25600")]
    server: SocketAddr,

    /// Player identity, random when omitted
    #[arg(long)]
    player_id: Option<Uuid>,
}

async fn send(socket: &UdpSocket, packet: &Packet, server: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    println!("Sending {:?}", packet);
    socket.send_to(&serialize(packet)?, server).await?;
    Ok(())
}

/// Prints whatever arrives within a short window.
async fn drain(socket: &UdpSocket) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    while let Ok(Ok((len, _))) = timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await {
        match deserialize::<Packet>(&buf[..len]) {
            Ok(packet) => println!("Received {:?}", packet),
            Err(e) => println!("Failed to deserialize response: {}", e),
        }
    }
}

async fn command(socket: &UdpSocket, command: PlayerCommand, server: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    send(socket, &Packet::Command(command), server).await?;
    drain(socket).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Probe socket bound to {}", socket.local_addr()?);

    let player_id = args.player_id.unwrap_or_else(Uuid::new_v4);
    send(
        &socket,
        &Packet::Join {
            client_version: PROTOCOL_VERSION,
            player_id,
        },
        args.server,
    )
    .await?;

    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await??;
    match deserialize::<Packet>(&buf[..len])? {
        Packet::Joined { world_name, motion } => {
            println!("Joined {} at {}", world_name, motion.position);
        }
        other => {
            println!("Expected Joined but got: {:?}", other);
            return Ok(());
        }
    }

    // Origin window north of spawn, destination further east, both 2x3
    for (first, position) in [(true, BlockPos::new(0, 64, 5)), (false, BlockPos::new(1, 66, 5))] {
        command(&socket, PlayerCommand::SelectCorner { first, position }, args.server).await?;
    }
    command(&socket, PlayerCommand::SelectOrigin, args.server).await?;

    for (first, position) in [(true, BlockPos::new(20, 64, 5)), (false, BlockPos::new(21, 66, 5))] {
        command(&socket, PlayerCommand::SelectCorner { first, position }, args.server).await?;
    }
    command(&socket, PlayerCommand::SelectDestination, args.server).await?;
    command(
        &socket,
        PlayerCommand::Link {
            two_way: true,
            invert: false,
        },
        args.server,
    )
    .await?;

    // Walk from spawn into the origin window
    for step in 0..=10 {
        let z = 0.5 + step as f64 * 0.5;
        let motion = PlayerMotion::at(Vec3::new(1.0, 64.0, z));
        send(&socket, &Packet::Move { motion }, args.server).await?;
        sleep(Duration::from_millis(100)).await;
    }
    drain(&socket).await;

    send(&socket, &Packet::Leave, args.server).await?;
    println!("Probe finished");

    Ok(())
}
