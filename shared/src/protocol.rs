//! Wire protocol between players, backend servers and the relay.
//!
//! Every datagram is one bincode-encoded [`Packet`]. Messages that one backend
//! addresses to another travel as [`RelayMessage`]s wrapped in
//! [`Packet::Forward`] on the way in and [`Packet::Deliver`] on the way out.

use crate::position::{PortalPosition, PortalSize};
use crate::world::BlockPos;
use crate::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Player -> backend
    Join {
        client_version: u32,
        player_id: Uuid,
    },
    Move {
        motion: PlayerMotion,
    },
    Command(PlayerCommand),
    Leave,

    // Backend -> player
    Joined {
        world_name: String,
        motion: PlayerMotion,
    },
    Teleported {
        world_name: String,
        motion: PlayerMotion,
    },
    Transfer {
        server_name: String,
    },
    CommandResult {
        success: bool,
        message: String,
    },
    Disconnected {
        reason: String,
    },

    // Backend <-> relay
    Register {
        client_version: u32,
        server_name: String,
    },
    Registered,
    Heartbeat,
    Forward {
        target_server: String,
        message: RelayMessage,
    },
    Deliver {
        source_server: String,
        message: RelayMessage,
    },
    SwitchServer {
        player_id: Uuid,
        target_server: String,
    },
    Notice(DisconnectNotice),
}

/// Backend-to-backend messages carried by the relay.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum RelayMessage {
    Teleport(TeleportRequest),
    MirrorSelection(SelectionMirrorRequest),
    GetSelection {
        request_id: u64,
        player_id: Uuid,
    },
    SelectionResponse {
        request_id: u64,
        player_id: Uuid,
        selection: Option<ExternalSelectionInfo>,
    },
}

/// Where and how a player should appear on the destination backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TeleportRequest {
    pub player_id: Uuid,
    pub dest_world_id: Option<Uuid>,
    pub dest_world_name: String,
    pub dest_x: f64,
    pub dest_y: f64,
    pub dest_z: f64,
    pub dest_yaw: f32,
    pub dest_pitch: f32,
    pub dest_vel_x: f64,
    pub dest_vel_y: f64,
    pub dest_vel_z: f64,
    pub is_flying: bool,
    pub is_gliding: bool,
}

impl TeleportRequest {
    pub fn new(
        player_id: Uuid,
        dest_world_id: Option<Uuid>,
        dest_world_name: impl Into<String>,
        motion: &PlayerMotion,
    ) -> Self {
        Self {
            player_id,
            dest_world_id,
            dest_world_name: dest_world_name.into(),
            dest_x: motion.position.x,
            dest_y: motion.position.y,
            dest_z: motion.position.z,
            dest_yaw: motion.yaw,
            dest_pitch: motion.pitch,
            dest_vel_x: motion.velocity.x,
            dest_vel_y: motion.velocity.y,
            dest_vel_z: motion.velocity.z,
            is_flying: motion.flying,
            is_gliding: motion.gliding,
        }
    }

    pub fn motion(&self) -> PlayerMotion {
        PlayerMotion {
            position: Vec3::new(self.dest_x, self.dest_y, self.dest_z),
            yaw: self.dest_yaw,
            pitch: self.dest_pitch,
            velocity: Vec3::new(self.dest_vel_x, self.dest_vel_y, self.dest_vel_z),
            flying: self.is_flying,
            gliding: self.is_gliding,
        }
    }
}

/// A destination selection made on one backend, handed to another one.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExternalSelectionInfo {
    /// Centre of the selected window, marked external with the owning server
    pub position: PortalPosition,
    pub size: PortalSize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SelectionMirrorRequest {
    pub player_id: Uuid,
    pub selection: ExternalSelectionInfo,
}

/// Sent by a process that is going away. Carries nothing beyond its existence.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisconnectNotice;

/// Position, orientation and movement state of a player.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct PlayerMotion {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub velocity: Vec3,
    pub flying: bool,
    pub gliding: bool,
}

impl PlayerMotion {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

/// Portal editing actions a player can take.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum PlayerCommand {
    SelectCorner { first: bool, position: BlockPos },
    SelectOrigin,
    SelectDestination,
    Link { two_way: bool, invert: bool },
    LinkExternal { invert: bool },
    RemoveNearest { remove_destination: bool },
    Rename { name: Option<String> },
    SetAllowNonPlayerTeleportation { allow: bool },
    SetSeeThrough { enabled: bool },
}
