//! In-process stand-ins for the host game's world and chunk loader.

use log::{debug, trace, warn};
use shared::{BlockPos, Location, Material, WorldAccess, WorldHandle};
use std::collections::HashMap;
use uuid::Uuid;

const CHUNK_SIZE: i32 = 16;

/// Keeps a region around a location loaded and simulating.
pub trait RegionLoader {
    fn forceload(&mut self, location: &Location);

    fn unforceload(&mut self, location: &Location);
}

/// Worlds and block materials held in memory.
#[derive(Debug, Default)]
pub struct MemoryWorld {
    worlds: HashMap<Uuid, WorldHandle>,
    blocks: HashMap<(Uuid, BlockPos), Material>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a world with a fresh id and returns its handle.
    pub fn create_world(&mut self, name: impl Into<String>) -> WorldHandle {
        let handle = WorldHandle::new(Uuid::new_v4(), name);
        debug!("Created world {} ({})", handle.name, handle.id);
        self.worlds.insert(handle.id, handle.clone());
        handle
    }

    /// Unloads a world. Its blocks are kept so reloading restores them.
    pub fn unload_world(&mut self, id: &Uuid) -> Option<WorldHandle> {
        self.worlds.remove(id)
    }

    pub fn load_world(&mut self, handle: WorldHandle) {
        self.worlds.insert(handle.id, handle);
    }

    pub fn worlds(&self) -> Vec<WorldHandle> {
        self.worlds.values().cloned().collect()
    }
}

impl WorldAccess for MemoryWorld {
    fn world_by_id(&self, id: Uuid) -> Option<WorldHandle> {
        self.worlds.get(&id).cloned()
    }

    fn world_by_name(&self, name: &str) -> Option<WorldHandle> {
        self.worlds.values().find(|w| w.name == name).cloned()
    }

    fn material_at(&self, world: &WorldHandle, pos: BlockPos) -> Material {
        self.blocks
            .get(&(world.id, pos))
            .copied()
            .unwrap_or_default()
    }

    fn set_material(&mut self, world: &WorldHandle, pos: BlockPos, material: Material) {
        trace!("Setting {} in {} to {:?}", pos, world.name, material);
        if material == Material::Air {
            self.blocks.remove(&(world.id, pos));
        } else {
            self.blocks.insert((world.id, pos), material);
        }
    }
}

/// Reference-counted force loads per chunk, so overlapping portals don't
/// release each other's chunks.
#[derive(Debug, Default)]
pub struct ForceLoadTracker {
    chunks: HashMap<(Uuid, i32, i32), u32>,
}

impl ForceLoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn chunk_of(location: &Location) -> (Uuid, i32, i32) {
        let block = location.block_pos();
        (
            location.world.id,
            block.x.div_euclid(CHUNK_SIZE),
            block.z.div_euclid(CHUNK_SIZE),
        )
    }

    pub fn is_forceloaded(&self, location: &Location) -> bool {
        self.chunks.contains_key(&Self::chunk_of(location))
    }

    pub fn loaded_chunks(&self) -> usize {
        self.chunks.len()
    }
}

impl RegionLoader for ForceLoadTracker {
    fn forceload(&mut self, location: &Location) {
        let chunk = Self::chunk_of(location);
        let count = self.chunks.entry(chunk).or_insert(0);
        *count += 1;
        trace!("Forceloaded chunk {:?} ({} holders)", chunk, count);
    }

    fn unforceload(&mut self, location: &Location) {
        let chunk = Self::chunk_of(location);
        match self.chunks.get_mut(&chunk) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.chunks.remove(&chunk);
                trace!("Released chunk {:?}", chunk);
            }
            None => warn!("Unforceload of chunk {:?} that was never loaded", chunk),
        }
    }
}
