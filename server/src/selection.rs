//! Wand selections: two opposite corners of a portal window.

use crate::manager::{LinkOptions, PortalManager};
use crate::world::RegionLoader;
use shared::{
    BlockPos, ExternalSelectionInfo, Location, PortalDirection, PortalError, PortalPosition,
    PortalSize, Vec3, WorldAccess, WorldHandle,
};
use uuid::Uuid;

/// Two corner blocks of a flat window. The corners are inclusive, so a
/// selection of one block is a 1x1 window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortalSelection {
    position_a: Option<(WorldHandle, BlockPos)>,
    position_b: Option<(WorldHandle, BlockPos)>,
    inverted: bool,
}

struct Bounds {
    world: WorldHandle,
    min: BlockPos,
    max: BlockPos,
}

impl Bounds {
    /// A window spanning z lies in a plane of constant x and faces east.
    fn natural_direction(&self) -> PortalDirection {
        if self.min.x == self.max.x && self.min.z != self.max.z {
            PortalDirection::East
        } else {
            PortalDirection::North
        }
    }
}

impl PortalSelection {
    pub fn from_corners(world: &WorldHandle, a: BlockPos, b: BlockPos) -> Self {
        Self {
            position_a: Some((world.clone(), a)),
            position_b: Some((world.clone(), b)),
            inverted: false,
        }
    }

    pub fn set_position_a(&mut self, world: &WorldHandle, pos: BlockPos) {
        self.position_a = Some((world.clone(), pos));
    }

    pub fn set_position_b(&mut self, world: &WorldHandle, pos: BlockPos) {
        self.position_b = Some((world.clone(), pos));
    }

    pub fn invert_direction(&mut self) {
        self.inverted = !self.inverted;
    }

    fn bounds(&self) -> Result<Bounds, PortalError> {
        let (world_a, a) = self
            .position_a
            .as_ref()
            .ok_or_else(|| PortalError::invalid_selection("The first corner is not set"))?;
        let (world_b, b) = self
            .position_b
            .as_ref()
            .ok_or_else(|| PortalError::invalid_selection("The second corner is not set"))?;

        if world_a.id != world_b.id {
            return Err(PortalError::invalid_selection(
                "The corners are in different worlds",
            ));
        }
        if a.x != b.x && a.z != b.z {
            return Err(PortalError::invalid_selection(format!(
                "The corners {} and {} are not in line",
                a, b
            )));
        }

        Ok(Bounds {
            world: world_a.clone(),
            min: BlockPos::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: BlockPos::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        })
    }

    pub fn validate(&self) -> Result<(), PortalError> {
        self.bounds().map(|_| ())
    }

    pub fn is_valid(&self) -> bool {
        self.bounds().is_ok()
    }

    pub fn world(&self) -> Option<&WorldHandle> {
        self.position_a.as_ref().map(|(world, _)| world)
    }

    pub fn direction(&self) -> Result<PortalDirection, PortalError> {
        let direction = self.bounds()?.natural_direction();
        Ok(if self.inverted {
            direction.opposite()
        } else {
            direction
        })
    }

    pub fn portal_size(&self) -> Result<PortalSize, PortalError> {
        let bounds = self.bounds()?;
        let width = if bounds.natural_direction().is_x_plane() {
            bounds.max.z - bounds.min.z + 1
        } else {
            bounds.max.x - bounds.min.x + 1
        };
        let height = bounds.max.y - bounds.min.y + 1;
        Ok(PortalSize::new(width as f64, height as f64))
    }

    fn center(bounds: &Bounds) -> Vec3 {
        let middle = |min: i32, max: i32| (min + max + 1) as f64 / 2.0;
        let y = middle(bounds.min.y, bounds.max.y);
        if bounds.natural_direction().is_x_plane() {
            Vec3::new(
                bounds.min.x as f64 + 0.5,
                y,
                middle(bounds.min.z, bounds.max.z),
            )
        } else {
            Vec3::new(
                middle(bounds.min.x, bounds.max.x),
                y,
                bounds.min.z as f64 + 0.5,
            )
        }
    }

    /// Centre of the window in its world, facing the selected direction.
    pub fn portal_position(&self) -> Result<PortalPosition, PortalError> {
        let bounds = self.bounds()?;
        let center = Self::center(&bounds);
        Ok(PortalPosition::local(
            &Location::new(bounds.world, center),
            self.direction()?,
        ))
    }
}

/// Per-player selection state: the corners being edited plus the origin and
/// destination picked from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionManager {
    current: PortalSelection,
    origin: Option<PortalSelection>,
    destination: Option<PortalSelection>,
    external_destination: Option<ExternalSelectionInfo>,
}

impl SelectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position_a(&mut self, world: &WorldHandle, pos: BlockPos) {
        self.current.set_position_a(world, pos);
    }

    pub fn set_position_b(&mut self, world: &WorldHandle, pos: BlockPos) {
        self.current.set_position_b(world, pos);
    }

    pub fn current(&self) -> &PortalSelection {
        &self.current
    }

    pub fn try_select_origin(&mut self) -> Result<(), PortalError> {
        self.current.validate()?;
        self.origin = Some(self.current.clone());
        Ok(())
    }

    pub fn try_select_destination(&mut self) -> Result<(), PortalError> {
        self.current.validate()?;
        self.destination = Some(self.current.clone());
        Ok(())
    }

    pub fn origin_selection(&self) -> Option<&PortalSelection> {
        self.origin.as_ref()
    }

    pub fn dest_selection(&self) -> Option<&PortalSelection> {
        self.destination.as_ref()
    }

    /// Destination selected on another backend and mirrored here.
    pub fn set_external_selection(&mut self, selection: ExternalSelectionInfo) {
        self.external_destination = Some(selection);
    }

    pub fn external_selection(&self) -> Option<&ExternalSelectionInfo> {
        self.external_destination.as_ref()
    }

    /// Links origin to destination. Returns the ids of the registered portals,
    /// the forward one first.
    pub fn try_create_from_selection<W: WorldAccess, R: RegionLoader>(
        &self,
        manager: &mut PortalManager<W, R>,
        owner: Option<Uuid>,
        two_way: bool,
        invert: bool,
    ) -> Result<Vec<Uuid>, PortalError> {
        let origin = self
            .origin
            .as_ref()
            .ok_or_else(|| PortalError::invalid_selection("No origin has been selected"))?;
        let destination = self
            .destination
            .as_ref()
            .ok_or_else(|| PortalError::invalid_selection("No destination has been selected"))?;

        manager.create_from_coordinates(
            origin,
            destination,
            LinkOptions {
                two_way,
                invert,
                owner,
                ..Default::default()
            },
        )
    }

    /// Links the local origin to a destination mirrored from another backend.
    pub fn try_create_from_external_selection<W: WorldAccess, R: RegionLoader>(
        &self,
        manager: &mut PortalManager<W, R>,
        owner: Option<Uuid>,
        invert: bool,
    ) -> Result<Uuid, PortalError> {
        let origin = self
            .origin
            .as_ref()
            .ok_or_else(|| PortalError::invalid_selection("No origin has been selected"))?;
        let external = self.external_destination.as_ref().ok_or_else(|| {
            PortalError::invalid_selection("No destination has been selected on another server")
        })?;

        manager.create_external(
            origin,
            external,
            LinkOptions {
                invert,
                owner,
                ..Default::default()
            },
        )
    }

    /// The destination selection as another backend will see it.
    pub fn external_info(&self, server_name: &str) -> Option<ExternalSelectionInfo> {
        let destination = self.destination.as_ref()?;
        let position = destination.portal_position().ok()?;
        let world_name = destination.world()?.name.clone();

        Some(ExternalSelectionInfo {
            position: PortalPosition::external(
                position.vector(),
                position.direction(),
                server_name,
                world_name,
                false,
            ),
            size: destination.portal_size().ok()?,
        })
    }
}
