//! Types shared by backend servers, the relay and player clients.
//!
//! Everything that crosses a process boundary lives here: the addressable
//! [`PortalPosition`], the world accessor seam used to resolve it, the error
//! taxonomy and the [`Packet`] enum that goes over the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};

pub mod error;
pub mod position;
pub mod protocol;
pub mod world;

pub use error::PortalError;
pub use position::{LinkTarget, PortalDirection, PortalPosition, PortalSize};
pub use protocol::{
    DisconnectNotice, ExternalSelectionInfo, Packet, PlayerCommand, PlayerMotion, RelayMessage,
    SelectionMirrorRequest, TeleportRequest,
};
pub use world::{Block, BlockPos, Location, Material, WorldAccess, WorldHandle};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Double precision world-space vector.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance(&self, other: &Vec3) -> f64 {
        (*self - *other).length()
    }

    /// Rotates around the vertical axis by a number of clockwise quarter turns
    /// (the same sense in which yaw grows).
    pub fn rotate_quarter_turns(&self, turns: u8) -> Vec3 {
        match turns % 4 {
            0 => *self,
            1 => Vec3::new(-self.z, self.y, self.x),
            2 => Vec3::new(-self.x, self.y, -self.z),
            _ => Vec3::new(self.z, self.y, -self.x),
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}
