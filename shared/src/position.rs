//! Addressable portal endpoints.
//!
//! A [`PortalPosition`] is the exact centre of a portal window plus the
//! direction it faces. It is either local (a world on this process) or
//! external (hosted by another backend, reachable only through the relay).

use crate::error::PortalError;
use crate::world::{Block, BlockPos, Location, WorldAccess, WorldHandle};
use crate::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

/// Direction a portal window faces.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortalDirection {
    North,
    South,
    East,
    West,
}

impl PortalDirection {
    pub fn opposite(self) -> Self {
        match self {
            Self::North => Self::South,
            Self::South => Self::North,
            Self::East => Self::West,
            Self::West => Self::East,
        }
    }

    /// Yaw of an entity looking out of the portal, in degrees.
    pub fn yaw(self) -> f32 {
        match self {
            Self::South => 0.0,
            Self::West => 90.0,
            Self::North => 180.0,
            Self::East => 270.0,
        }
    }

    /// Unit vector pointing out of the window.
    pub fn normal(self) -> Vec3 {
        match self {
            Self::North => Vec3::new(0.0, 0.0, -1.0),
            Self::South => Vec3::new(0.0, 0.0, 1.0),
            Self::East => Vec3::new(1.0, 0.0, 0.0),
            Self::West => Vec3::new(-1.0, 0.0, 0.0),
        }
    }

    /// Whether the window lies in a plane of constant x.
    pub fn is_x_plane(self) -> bool {
        matches!(self, Self::East | Self::West)
    }

    /// Clockwise quarter turns needed to go from facing `self` to facing `other`.
    pub fn quarter_turns_to(self, other: PortalDirection) -> u8 {
        let delta = (other.yaw() - self.yaw()).rem_euclid(360.0);
        (delta / 90.0).round() as u8 % 4
    }
}

/// Width and height of a portal window, in blocks.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PortalSize {
    pub width: f64,
    pub height: f64,
}

impl PortalSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for PortalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Fields that are only known once two selections get linked.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct LinkTarget {
    /// Backend hosting this position, `None` for local positions
    pub server_name: Option<String>,
    /// Resolve the destination as wherever the travelling player last stood
    pub last_player_pos: bool,
}

#[derive(Debug, Clone)]
pub struct PortalPosition {
    direction: PortalDirection,
    x: f64,
    y: f64,
    z: f64,
    world_id: Option<Uuid>,
    world_name: Option<String>,
    link: LinkTarget,
    // Looking worlds up is comparatively expensive, so a resolved location is kept
    location_cache: OnceLock<Location>,
}

impl PortalPosition {
    pub fn new(
        center: Vec3,
        direction: PortalDirection,
        world_id: Option<Uuid>,
        world_name: Option<String>,
    ) -> Self {
        Self {
            direction,
            x: center.x,
            y: center.y,
            z: center.z,
            world_id,
            world_name,
            link: LinkTarget::default(),
            location_cache: OnceLock::new(),
        }
    }

    /// A position inside a world of this process.
    pub fn local(location: &Location, direction: PortalDirection) -> Self {
        Self::new(
            location.position,
            direction,
            Some(location.world.id),
            Some(location.world.name.clone()),
        )
    }

    /// A position on another backend. There is no world id since ids are only
    /// meaningful to the process that owns the world.
    pub fn external(
        center: Vec3,
        direction: PortalDirection,
        server_name: impl Into<String>,
        world_name: impl Into<String>,
        last_player_pos: bool,
    ) -> Self {
        let mut position = Self::new(center, direction, None, Some(world_name.into()));
        position.link = LinkTarget {
            server_name: Some(server_name.into()),
            last_player_pos,
        };
        position
    }

    pub fn direction(&self) -> PortalDirection {
        self.direction
    }

    pub fn vector(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn block_pos(&self) -> BlockPos {
        BlockPos::containing(&self.vector())
    }

    pub fn world_id(&self) -> Option<Uuid> {
        self.world_id
    }

    pub fn world_name(&self) -> Option<&str> {
        self.world_name.as_deref()
    }

    pub fn server_name(&self) -> Option<&str> {
        self.link.server_name.as_deref()
    }

    pub fn link(&self) -> &LinkTarget {
        &self.link
    }

    pub fn set_server_name(&mut self, server_name: Option<String>) {
        self.link.server_name = server_name;
        self.location_cache = OnceLock::new();
    }

    pub fn set_last_player_pos(&mut self, last_player_pos: bool) {
        self.link.last_player_pos = last_player_pos;
    }

    pub fn is_external(&self) -> bool {
        self.link.server_name.is_some()
    }

    pub fn is_last_player_position(&self) -> bool {
        self.link.last_player_pos
    }

    /// Same position facing the other way.
    pub fn inverted(&self) -> Self {
        let mut position = self.clone();
        position.direction = self.direction.opposite();
        position
    }

    /// The world this position is in. `None` for external positions and for
    /// local positions whose world is not currently loaded.
    pub fn world(&self, worlds: &dyn WorldAccess) -> Option<WorldHandle> {
        if self.is_external() {
            return None;
        }
        if let Some(cached) = self.location_cache.get() {
            return Some(cached.world.clone());
        }
        worlds.resolve_world(self.world_id, self.world_name.as_deref())
    }

    /// Resolved location of the window centre. Only successful lookups are
    /// cached so an unloaded world can still resolve later.
    pub fn location(&self, worlds: &dyn WorldAccess) -> Option<Location> {
        if let Some(cached) = self.location_cache.get() {
            return Some(cached.clone());
        }

        let world = self.world(worlds)?;
        let location = Location::new(world, self.vector());
        Some(self.location_cache.get_or_init(|| location).clone())
    }

    /// The block at the centre of the window.
    pub fn block(&self, worlds: &dyn WorldAccess) -> Result<Block, PortalError> {
        if self.is_external() {
            return Err(PortalError::invalid_operation(
                "Cannot get the block of an external position",
            ));
        }

        let location = self.location(worlds).ok_or_else(|| {
            PortalError::WorldUnavailable(self.world_name.clone().unwrap_or_default())
        })?;
        Ok(Block {
            pos: location.block_pos(),
            world: location.world,
        })
    }
}

impl PartialEq for PortalPosition {
    fn eq(&self, other: &Self) -> bool {
        self.direction == other.direction
            && self.x == other.x
            && self.y == other.y
            && self.z == other.z
            && self.world_id == other.world_id
            && self.world_name == other.world_name
            && self.link == other.link
    }
}

impl fmt::Display for PortalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x: {:.2}, y: {:.2}, z: {:.2}, worldName: {}",
            self.x,
            self.y,
            self.z,
            self.world_name.as_deref().unwrap_or("none")
        )?;
        if let Some(server) = self.server_name() {
            write!(f, ", server: {}", server)?;
        }
        Ok(())
    }
}

/// Key-value form of a position. Optional keys were added over time, so
/// records written by older versions leave them out.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortalPositionRecord {
    #[serde(default)]
    world_id: Option<Uuid>,
    #[serde(default)]
    world_name: Option<String>,
    x: f64,
    y: f64,
    z: f64,
    direction: PortalDirection,
    #[serde(default)]
    server_name: Option<String>,
    #[serde(default)]
    last_player_pos: bool,
}

impl From<PortalPositionRecord> for PortalPosition {
    fn from(record: PortalPositionRecord) -> Self {
        let mut position = PortalPosition::new(
            Vec3::new(record.x, record.y, record.z),
            record.direction,
            record.world_id,
            record.world_name,
        );
        position.link = LinkTarget {
            server_name: record.server_name,
            last_player_pos: record.last_player_pos,
        };
        position
    }
}

impl From<PortalPosition> for PortalPositionRecord {
    fn from(position: PortalPosition) -> Self {
        Self {
            world_id: position.world_id,
            world_name: position.world_name,
            x: position.x,
            y: position.y,
            z: position.z,
            direction: position.direction,
            server_name: position.link.server_name,
            last_player_pos: position.link.last_player_pos,
        }
    }
}

impl Serialize for PortalPosition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PortalPositionRecord::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PortalPosition {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        PortalPositionRecord::deserialize(deserializer).map(PortalPosition::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Material;
    use std::cell::Cell;
    use std::collections::HashMap;

    /// Worlds keyed by id that counts how often a lookup happens.
    #[derive(Default)]
    struct TestWorlds {
        worlds: Vec<WorldHandle>,
        blocks: HashMap<(Uuid, BlockPos), Material>,
        lookups: Cell<u32>,
    }

    impl TestWorlds {
        fn with(worlds: Vec<WorldHandle>) -> Self {
            Self {
                worlds,
                ..Default::default()
            }
        }
    }

    impl WorldAccess for TestWorlds {
        fn world_by_id(&self, id: Uuid) -> Option<WorldHandle> {
            self.lookups.set(self.lookups.get() + 1);
            self.worlds.iter().find(|w| w.id == id).cloned()
        }

        fn world_by_name(&self, name: &str) -> Option<WorldHandle> {
            self.lookups.set(self.lookups.get() + 1);
            self.worlds.iter().find(|w| w.name == name).cloned()
        }

        fn material_at(&self, world: &WorldHandle, pos: BlockPos) -> Material {
            self.blocks
                .get(&(world.id, pos))
                .copied()
                .unwrap_or_default()
        }

        fn set_material(&mut self, world: &WorldHandle, pos: BlockPos, material: Material) {
            self.blocks.insert((world.id, pos), material);
        }
    }

    fn overworld() -> WorldHandle {
        WorldHandle::new(Uuid::new_v4(), "overworld")
    }

    #[test]
    fn test_external_iff_server_name() {
        let world = overworld();
        let mut local = PortalPosition::local(
            &Location::new(world, Vec3::new(1.5, 65.0, 3.5)),
            PortalDirection::North,
        );
        assert!(!local.is_external());
        assert_eq!(local.server_name(), None);

        local.set_server_name(Some("lobby".to_string()));
        assert!(local.is_external());

        let external = PortalPosition::external(
            Vec3::new(0.0, 70.0, 0.0),
            PortalDirection::East,
            "survival",
            "world",
            false,
        );
        assert!(external.is_external());
        assert_eq!(external.server_name(), Some("survival"));
    }

    #[test]
    fn test_block_of_external_position_fails() {
        let worlds = TestWorlds::with(vec![overworld()]);
        let external = PortalPosition::external(
            Vec3::new(0.0, 70.0, 0.0),
            PortalDirection::East,
            "survival",
            "overworld",
            false,
        );

        let result = external.block(&worlds);
        assert!(matches!(result, Err(PortalError::InvalidOperation(_))));
        assert_eq!(external.world(&worlds), None);
    }

    #[test]
    fn test_block_of_local_position() {
        let world = overworld();
        let mut worlds = TestWorlds::with(vec![world.clone()]);
        let position = PortalPosition::local(
            &Location::new(world.clone(), Vec3::new(1.5, 65.5, -3.5)),
            PortalDirection::South,
        );

        let block = position.block(&worlds).unwrap();
        assert_eq!(block.pos, BlockPos::new(1, 65, -4));
        assert_eq!(block.world, world);

        block.set_material(&mut worlds, Material::Portal);
        assert_eq!(block.material(&worlds), Material::Portal);
    }

    #[test]
    fn test_world_resolution_prefers_id() {
        let w1 = overworld();
        let worlds = TestWorlds::with(vec![w1.clone()]);

        let position = PortalPosition::new(
            Vec3::new(0.0, 0.0, 0.0),
            PortalDirection::North,
            Some(w1.id),
            Some("dummy".to_string()),
        );
        assert_eq!(position.world(&worlds), Some(w1));
    }

    #[test]
    fn test_world_resolution_falls_back_to_name() {
        let w1 = overworld();
        let worlds = TestWorlds::with(vec![w1.clone()]);

        let by_name = PortalPosition::new(
            Vec3::new(0.0, 0.0, 0.0),
            PortalDirection::North,
            None,
            Some("overworld".to_string()),
        );
        assert_eq!(by_name.world(&worlds), Some(w1.clone()));

        // Recreated world: stale id, same name
        let stale_id = PortalPosition::new(
            Vec3::new(0.0, 0.0, 0.0),
            PortalDirection::North,
            Some(Uuid::new_v4()),
            Some("overworld".to_string()),
        );
        assert_eq!(stale_id.world(&worlds), Some(w1));
    }

    #[test]
    fn test_world_resolution_none_when_unresolvable() {
        let worlds = TestWorlds::with(vec![overworld()]);
        let position = PortalPosition::new(
            Vec3::new(0.0, 0.0, 0.0),
            PortalDirection::North,
            Some(Uuid::new_v4()),
            Some("dummy".to_string()),
        );

        assert_eq!(position.world(&worlds), None);
        assert_eq!(position.location(&worlds), None);
        assert!(matches!(
            position.block(&worlds),
            Err(PortalError::WorldUnavailable(_))
        ));
    }

    #[test]
    fn test_location_is_cached_after_resolution() {
        let world = overworld();
        let worlds = TestWorlds::with(vec![world.clone()]);
        let position = PortalPosition::new(
            Vec3::new(4.0, 5.0, 6.0),
            PortalDirection::West,
            Some(world.id),
            Some(world.name.clone()),
        );

        let first = position.location(&worlds).unwrap();
        let lookups = worlds.lookups.get();
        let second = position.location(&worlds).unwrap();

        assert_eq!(first, second);
        assert_eq!(worlds.lookups.get(), lookups);
    }

    #[test]
    fn test_unloaded_world_is_not_cached() {
        let world = overworld();
        let mut worlds = TestWorlds::with(vec![]);
        let position = PortalPosition::new(
            Vec3::new(4.0, 5.0, 6.0),
            PortalDirection::West,
            Some(world.id),
            Some(world.name.clone()),
        );

        assert_eq!(position.location(&worlds), None);
        worlds.worlds.push(world.clone());
        assert_eq!(position.location(&worlds).map(|l| l.world), Some(world));
    }

    #[test]
    fn test_equality_covers_every_field() {
        let world = overworld();
        let base = PortalPosition::local(
            &Location::new(world, Vec3::new(1.0, 2.0, 3.0)),
            PortalDirection::North,
        );

        assert_eq!(base, base.clone());
        assert_ne!(base, base.inverted());

        let mut linked = base.clone();
        linked.set_last_player_pos(true);
        assert_ne!(base, linked);

        let mut external = base.clone();
        external.set_server_name(Some("hub".to_string()));
        assert_ne!(base, external);
    }

    #[test]
    fn test_equality_ignores_cache() {
        let world = overworld();
        let worlds = TestWorlds::with(vec![world.clone()]);
        let a = PortalPosition::local(
            &Location::new(world, Vec3::new(1.0, 2.0, 3.0)),
            PortalDirection::North,
        );
        let b = a.clone();
        a.location(&worlds);
        assert_eq!(a, b);
    }

    #[test]
    fn test_json_round_trip() {
        let world = overworld();
        let local = PortalPosition::local(
            &Location::new(world, Vec3::new(10.5, 64.0, -20.5)),
            PortalDirection::East,
        );
        let external = PortalPosition::external(
            Vec3::new(0.5, 80.0, 0.5),
            PortalDirection::South,
            "skyblock",
            "void",
            true,
        );

        for position in [local, external] {
            let json = serde_json::to_string(&position).unwrap();
            let restored: PortalPosition = serde_json::from_str(&json).unwrap();
            assert_eq!(restored, position);
        }
    }

    #[test]
    fn test_bincode_round_trip() {
        let external = PortalPosition::external(
            Vec3::new(0.5, 80.0, 0.5),
            PortalDirection::West,
            "skyblock",
            "void",
            false,
        );
        let bytes = bincode::serialize(&external).unwrap();
        let restored: PortalPosition = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, external);
    }

    #[test]
    fn test_legacy_record_defaults() {
        let json = r#"{"worldName":"world","x":1.0,"y":2.0,"z":3.0,"direction":"NORTH"}"#;
        let position: PortalPosition = serde_json::from_str(json).unwrap();

        assert!(!position.is_last_player_position());
        assert_eq!(position.server_name(), None);
        assert_eq!(position.world_id(), None);
        assert_eq!(position.world_name(), Some("world"));
        assert!(!position.is_external());
    }

    #[test]
    fn test_persisted_keys() {
        let position = PortalPosition::external(
            Vec3::new(1.0, 2.0, 3.0),
            PortalDirection::North,
            "lobby",
            "world",
            true,
        );
        let value = serde_json::to_value(&position).unwrap();

        assert_eq!(value["serverName"], "lobby");
        assert_eq!(value["lastPlayerPos"], true);
        assert_eq!(value["worldName"], "world");
        assert_eq!(value["direction"], "NORTH");
    }

    #[test]
    fn test_quarter_turns_between_directions() {
        assert_eq!(PortalDirection::South.quarter_turns_to(PortalDirection::South), 0);
        assert_eq!(PortalDirection::South.quarter_turns_to(PortalDirection::West), 1);
        assert_eq!(PortalDirection::East.quarter_turns_to(PortalDirection::South), 1);
        assert_eq!(PortalDirection::North.quarter_turns_to(PortalDirection::South), 2);
        assert_eq!(PortalDirection::West.quarter_turns_to(PortalDirection::South), 3);
    }
}
