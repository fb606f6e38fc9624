//! A single directed portal and its activation state machine.
//!
//! A two-way link is two `Portal`s, one per direction. Neither knows about the
//! other; the paired direction is found by location through
//! [`crate::manager::PortalManager::find_paired_portal`].
//!
//! Two independent axes of state are tracked:
//! - activation: someone is close enough that the destination must be kept
//!   loaded and the portal has to be ready to move them
//! - view activation: someone is close enough to be looking through it

use crate::world::RegionLoader;
use log::{debug, trace};
use shared::{Location, Material, PortalError, PortalPosition, PortalSize, WorldAccess};
use uuid::Uuid;

/// Counter value of a portal that is not activated.
pub const NOT_ACTIVATED: i32 = -1;

/// Names with side effects that an in-place rename does not trigger.
const RESERVED_NAMES: [&str; 1] = ["dinnerbone"];

/// How often, in view ticks, the visible block snapshot is rebuilt.
const BLOCK_REFRESH_INTERVAL: i32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameKind {
    PlainRename,
    /// Remove the portal and register a copy under a new identity
    FullReplace,
}

/// Decides how a rename from `current` to `requested` has to be carried out.
pub fn classify_rename(current: Option<&str>, requested: Option<&str>) -> RenameKind {
    let reserved = |name: Option<&str>| {
        name.is_some_and(|name| {
            RESERVED_NAMES
                .iter()
                .any(|reserved| reserved.eq_ignore_ascii_case(name))
        })
    };

    if reserved(current) || reserved(requested) {
        RenameKind::FullReplace
    } else {
        RenameKind::PlainRename
    }
}

/// Result of the per-tick validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalHealth {
    Valid,
    /// The physical markers are gone and the portal should remove itself
    Invalid,
}

/// Bookkeeping for the block snapshot a renderer builds while the portal is
/// being looked through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewableBlocks {
    refreshes: u32,
    last_refresh: Option<i32>,
}

impl ViewableBlocks {
    fn update(&mut self, ticks_since_view_activated: i32) {
        if ticks_since_view_activated % BLOCK_REFRESH_INTERVAL == 0 {
            self.refreshes += 1;
            self.last_refresh = Some(ticks_since_view_activated);
        }
    }

    fn reset(&mut self) {
        self.refreshes = 0;
        self.last_refresh = None;
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes
    }

    pub fn last_refresh(&self) -> Option<i32> {
        self.last_refresh
    }
}

#[derive(Debug, Clone)]
pub struct Portal {
    id: Uuid,
    owner_id: Option<Uuid>,
    name: Option<String>,
    origin_pos: PortalPosition,
    dest_pos: PortalPosition,
    size: PortalSize,
    is_custom: bool,
    allows_non_player_teleportation: bool,
    relocate_player: bool,

    ticks_since_activated: i32,
    ticks_since_view_activated: i32,
    viewable_blocks: ViewableBlocks,
    forced_region: Option<Location>,
}

impl Portal {
    pub fn new(
        origin_pos: PortalPosition,
        dest_pos: PortalPosition,
        size: PortalSize,
        is_custom: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: None,
            name: None,
            origin_pos,
            dest_pos,
            size,
            is_custom,
            allows_non_player_teleportation: true,
            relocate_player: true,
            ticks_since_activated: NOT_ACTIVATED,
            ticks_since_view_activated: NOT_ACTIVATED,
            viewable_blocks: ViewableBlocks::default(),
            forced_region: None,
        }
    }

    /// A portal created by a player or an administrator.
    pub fn custom(origin_pos: PortalPosition, dest_pos: PortalPosition, size: PortalSize) -> Self {
        Self::new(origin_pos, dest_pos, size, true)
    }

    /// A portal spawned by lighting a frame, held alive by its portal blocks.
    pub fn auto_spawned(
        origin_pos: PortalPosition,
        dest_pos: PortalPosition,
        size: PortalSize,
    ) -> Self {
        Self::new(origin_pos, dest_pos, size, false)
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_owner(mut self, owner_id: Option<Uuid>) -> Self {
        self.owner_id = owner_id;
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_allows_non_player_teleportation(mut self, allow: bool) -> Self {
        self.allows_non_player_teleportation = allow;
        self
    }

    pub fn with_relocate_player(mut self, relocate_player: bool) -> Self {
        self.relocate_player = relocate_player;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner_id(&self) -> Option<Uuid> {
        self.owner_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn origin_pos(&self) -> &PortalPosition {
        &self.origin_pos
    }

    pub fn dest_pos(&self) -> &PortalPosition {
        &self.dest_pos
    }

    pub fn size(&self) -> PortalSize {
        self.size
    }

    pub fn is_custom(&self) -> bool {
        self.is_custom
    }

    pub fn is_auto_spawned(&self) -> bool {
        !self.is_custom
    }

    pub fn is_cross_server(&self) -> bool {
        self.dest_pos.is_external()
    }

    pub fn allows_non_player_teleportation(&self) -> bool {
        self.allows_non_player_teleportation
    }

    pub fn set_allows_non_player_teleportation(&mut self, allow: bool) {
        self.allows_non_player_teleportation = allow;
    }

    pub fn relocates_player(&self) -> bool {
        self.relocate_player
    }

    /// Renames in place. Auto-spawned portals cannot carry a name.
    pub fn set_name(&mut self, name: Option<String>) -> Result<(), PortalError> {
        if self.is_auto_spawned() {
            return Err(PortalError::invalid_operation(
                "Cannot set the name of an auto-spawned portal",
            ));
        }
        self.name = name;
        Ok(())
    }

    /// Copy of this portal under a fresh identity with a different name.
    pub fn replacement(&self, name: Option<String>) -> Portal {
        Portal::new(
            self.origin_pos.clone(),
            self.dest_pos.clone(),
            self.size,
            self.is_custom,
        )
        .with_owner(self.owner_id)
        .with_name(name)
        .with_allows_non_player_teleportation(self.allows_non_player_teleportation)
        .with_relocate_player(self.relocate_player)
    }

    /// Suffix of the permission node guarding this portal.
    pub fn permission_path(&self) -> String {
        if self.is_custom {
            match &self.name {
                Some(name) => format!(".custom.{}", name),
                None => String::new(),
            }
        } else {
            format!(
                ".nether.{}",
                self.origin_pos.world_name().unwrap_or_default()
            )
        }
    }

    pub fn is_activated(&self) -> bool {
        self.ticks_since_activated != NOT_ACTIVATED
    }

    pub fn is_view_active(&self) -> bool {
        self.ticks_since_view_activated != NOT_ACTIVATED
    }

    pub fn ticks_since_activated(&self) -> i32 {
        self.ticks_since_activated
    }

    pub fn ticks_since_view_activated(&self) -> i32 {
        self.ticks_since_view_activated
    }

    pub fn viewable_blocks(&self) -> &ViewableBlocks {
        &self.viewable_blocks
    }

    /// Keeps the destination loaded so anything sent through keeps simulating.
    pub fn on_activate(&mut self, worlds: &dyn WorldAccess, regions: &mut dyn RegionLoader) {
        debug!("Portal {} was activated", self.id);
        if self.forced_region.is_none() {
            if let Some(location) = self.dest_pos.location(worlds) {
                regions.forceload(&location);
                self.forced_region = Some(location);
            }
        }
        self.ticks_since_activated = 0;
    }

    pub fn on_deactivate(&mut self, regions: &mut dyn RegionLoader) {
        debug!("Portal {} was deactivated", self.id);
        if let Some(location) = self.forced_region.take() {
            regions.unforceload(&location);
        }
        self.viewable_blocks.reset();
        self.ticks_since_activated = NOT_ACTIVATED;
    }

    pub fn on_view_activate(&mut self) {
        trace!("Portal {} was view-activated", self.id);
        self.ticks_since_view_activated = 0;
    }

    pub fn on_view_deactivate(&mut self) {
        trace!("Portal {} was view-deactivated", self.id);
        self.ticks_since_view_activated = NOT_ACTIVATED;
    }

    /// Runs every tick while registered.
    pub fn on_update(&mut self, worlds: &dyn WorldAccess) -> PortalHealth {
        if !self.is_still_valid(worlds) {
            return PortalHealth::Invalid;
        }

        if self.is_activated() {
            self.ticks_since_activated += 1;
        }
        PortalHealth::Valid
    }

    /// Runs every tick while view-active.
    pub fn on_view_update(&mut self) {
        if !self.is_view_active() {
            return;
        }
        self.viewable_blocks.update(self.ticks_since_view_activated);
        self.ticks_since_view_activated += 1;
    }

    /// Custom portals never remove themselves. Auto-spawned ones need portal
    /// blocks at both ends; an end that cannot be checked (external, or in an
    /// unloaded world) counts as intact.
    pub fn is_still_valid(&self, worlds: &dyn WorldAccess) -> bool {
        if self.is_custom {
            return true;
        }

        let intact = |position: &PortalPosition| match position.block(worlds) {
            Ok(block) => block.material(worlds) == Material::Portal,
            Err(_) => true,
        };
        intact(&self.origin_pos) && intact(&self.dest_pos)
    }

    /// Region this portal currently holds loaded.
    pub fn forced_region(&self) -> Option<&Location> {
        self.forced_region.as_ref()
    }
}
