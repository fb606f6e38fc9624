//! The seam between the portal core and the host game's world.
//!
//! The core only ever needs to look a world up (by id, then by name), and to
//! read or write the material of a single block. Everything else about the
//! world is owned by the host.

use crate::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A loaded world as seen by the local process.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct WorldHandle {
    pub id: Uuid,
    pub name: String,
}

impl WorldHandle {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Integer block coordinates.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The block containing the given point.
    pub fn containing(point: &Vec3) -> Self {
        Self {
            x: point.x.floor() as i32,
            y: point.y.floor() as i32,
            z: point.z.floor() as i32,
        }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.x, self.y, self.z)
    }
}

/// A point inside a resolved world.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Location {
    pub world: WorldHandle,
    pub position: Vec3,
}

impl Location {
    pub fn new(world: WorldHandle, position: Vec3) -> Self {
        Self { world, position }
    }

    /// Straight-line distance, or `None` when the two points are in different worlds.
    pub fn distance(&self, other: &Location) -> Option<f64> {
        if self.world.id != other.world.id {
            return None;
        }
        Some(self.position.distance(&other.position))
    }

    pub fn block_pos(&self) -> BlockPos {
        BlockPos::containing(&self.position)
    }

    /// Same world and exactly the same coordinates.
    pub fn same_point(&self, other: &Location) -> bool {
        self.world.id == other.world.id && self.position == other.position
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Material {
    #[default]
    Air,
    Portal,
    Obsidian,
    Stone,
}

/// Read/write access to the worlds hosted by this process.
pub trait WorldAccess {
    fn world_by_id(&self, id: Uuid) -> Option<WorldHandle>;

    fn world_by_name(&self, name: &str) -> Option<WorldHandle>;

    fn material_at(&self, world: &WorldHandle, pos: BlockPos) -> Material;

    fn set_material(&mut self, world: &WorldHandle, pos: BlockPos, material: Material);

    /// Looks the world up by id first and falls back to the name, so a renamed
    /// world still resolves but a recreated one is found through its name.
    fn resolve_world(&self, id: Option<Uuid>, name: Option<&str>) -> Option<WorldHandle> {
        id.and_then(|id| self.world_by_id(id))
            .or_else(|| name.and_then(|name| self.world_by_name(name)))
    }
}

/// A single block of a local world.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub world: WorldHandle,
    pub pos: BlockPos,
}

impl Block {
    pub fn material(&self, worlds: &dyn WorldAccess) -> Material {
        worlds.material_at(&self.world, self.pos)
    }

    pub fn set_material(&self, worlds: &mut dyn WorldAccess, material: Material) {
        worlds.set_material(&self.world, self.pos, material);
    }
}
