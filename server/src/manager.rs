//! Registry of every portal hosted by this backend.
//!
//! The manager owns the portals together with the world accessor and the
//! region loader they act on. Removal lives here rather than on [`Portal`]
//! because a portal holds no reference back to its registry; the cascade to
//! the paired direction is resolved by location.
//!
//! # Removal cascade
//!
//! Removing a portal always clears the portal blocks at its origin when it was
//! auto-spawned. With `remove_other_direction` set and a local destination,
//! every portal registered at the destination is removed as well, and an
//! auto-spawned portal also clears the blocks at its destination. Custom
//! portals never touch blocks.

use crate::portal::{classify_rename, Portal, PortalHealth, RenameKind};
use crate::selection::PortalSelection;
use crate::world::{ForceLoadTracker, MemoryWorld, RegionLoader};
use log::{debug, info, warn};
use shared::{ExternalSelectionInfo, Location, Material, PortalError, PortalPosition, WorldAccess};
use std::collections::HashMap;
use uuid::Uuid;

/// Radius within which players can edit the nearest portal.
pub const MODIFY_DISTANCE: f64 = 20.0;

/// Options for linking two windows into portals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkOptions {
    /// Also register the portal going back
    pub two_way: bool,
    /// Flip the facing of the destination
    pub invert: bool,
    pub name: Option<String>,
    pub owner: Option<Uuid>,
}

pub struct PortalManager<W = MemoryWorld, R = ForceLoadTracker> {
    portals: HashMap<Uuid, Portal>,
    worlds: W,
    regions: R,
}

impl<W: WorldAccess, R: RegionLoader> PortalManager<W, R> {
    pub fn new(worlds: W, regions: R) -> Self {
        Self {
            portals: HashMap::new(),
            worlds,
            regions,
        }
    }

    pub fn worlds(&self) -> &W {
        &self.worlds
    }

    pub fn worlds_mut(&mut self) -> &mut W {
        &mut self.worlds
    }

    pub fn regions(&self) -> &R {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.portals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portals.is_empty()
    }

    /// Registers a portal, replacing any portal with the same id.
    pub fn register_portal(&mut self, portal: Portal) -> Uuid {
        let id = portal.id();
        debug!(
            "Registering portal {} at {} -> {}",
            id,
            portal.origin_pos(),
            portal.dest_pos()
        );
        if let Some(mut previous) = self.portals.insert(id, portal) {
            warn!("Portal {} was registered twice, replacing the old one", id);
            self.shut_down(&mut previous);
        }
        id
    }

    pub fn portal_by_id(&self, id: &Uuid) -> Option<&Portal> {
        self.portals.get(id)
    }

    pub fn portals_named(&self, name: &str) -> Vec<&Portal> {
        self.portals
            .values()
            .filter(|portal| portal.name() == Some(name))
            .collect()
    }

    /// Snapshot copy, safe to keep while the registry changes.
    pub fn all_portals(&self) -> Vec<Portal> {
        self.portals.values().cloned().collect()
    }

    pub fn portals(&self) -> impl Iterator<Item = &Portal> {
        self.portals.values()
    }

    pub fn portal_ids(&self) -> Vec<Uuid> {
        self.portals.keys().copied().collect()
    }

    /// The portal whose origin is closest to `location`, within `max_distance`.
    /// Only portals in the same world are considered.
    pub fn find_closest_portal(&self, location: &Location, max_distance: f64) -> Option<&Portal> {
        self.portals
            .values()
            .filter_map(|portal| {
                let origin = portal.origin_pos().location(&self.worlds)?;
                let distance = origin.distance(location)?;
                (distance <= max_distance).then_some((portal, distance))
            })
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(portal, _)| portal)
    }

    /// The portal going the other way, if the link is two-way.
    pub fn find_paired_portal(&self, portal: &Portal) -> Option<&Portal> {
        if portal.is_cross_server() {
            return None;
        }
        let destination = portal.dest_pos().location(&self.worlds)?;

        self.portals.values().find(|candidate| {
            candidate.id() != portal.id()
                && candidate
                    .origin_pos()
                    .location(&self.worlds)
                    .is_some_and(|origin| origin.same_point(&destination))
        })
    }

    fn shut_down(&mut self, portal: &mut Portal) {
        if portal.is_view_active() {
            portal.on_view_deactivate();
        }
        if portal.is_activated() {
            portal.on_deactivate(&mut self.regions);
        }
    }

    /// Takes a portal out of the registry without touching any blocks.
    fn deregister(&mut self, id: &Uuid) -> Option<Portal> {
        let mut portal = self.portals.remove(id)?;
        self.shut_down(&mut portal);
        Some(portal)
    }

    fn clear_marker(&mut self, position: &PortalPosition) {
        match position.block(&self.worlds) {
            Ok(block) => block.set_material(&mut self.worlds, Material::Air),
            Err(e) => debug!("Not clearing portal blocks at {}: {}", position, e),
        }
    }

    /// Removes a portal. See the module docs for the cascade.
    pub fn remove_portal(&mut self, id: &Uuid, remove_other_direction: bool) -> Option<Portal> {
        let portal = self.deregister(id)?;
        info!("Removed portal {}", id);

        if portal.is_auto_spawned() {
            self.clear_marker(portal.origin_pos());
        }

        if remove_other_direction && !portal.is_cross_server() {
            if let Some(destination) = portal.dest_pos().location(&self.worlds) {
                self.remove_portals_at(&destination);
            }
            if portal.is_auto_spawned() {
                self.clear_marker(portal.dest_pos());
            }
        }

        Some(portal)
    }

    /// Removes every portal whose origin is exactly at `location`.
    pub fn remove_portals_at(&mut self, location: &Location) -> Vec<Portal> {
        let ids: Vec<Uuid> = self
            .portals
            .values()
            .filter(|portal| {
                portal
                    .origin_pos()
                    .location(&self.worlds)
                    .is_some_and(|origin| origin.same_point(location))
            })
            .map(|portal| portal.id())
            .collect();

        ids.iter()
            .filter_map(|id| self.remove_portal(id, false))
            .collect()
    }

    /// Links two selections, registering the reverse portal too for two-way
    /// links. Returns the registered ids, forward first.
    pub fn create_from_coordinates(
        &mut self,
        origin: &PortalSelection,
        destination: &PortalSelection,
        options: LinkOptions,
    ) -> Result<Vec<Uuid>, PortalError> {
        let size = origin.portal_size()?;
        let dest_size = destination.portal_size()?;
        if size != dest_size {
            return Err(PortalError::DifferentSizes {
                origin: size,
                destination: dest_size,
            });
        }

        let mut destination = destination.clone();
        if options.invert {
            destination.invert_direction();
        }
        let origin_pos = origin.portal_position()?;
        let dest_pos = destination.portal_position()?;

        let mut ids = Vec::new();
        if options.two_way {
            let reverse = Portal::custom(dest_pos.clone(), origin_pos.clone(), size)
                .with_owner(options.owner)
                .with_name(options.name.clone());
            ids.push(reverse.id());
            self.register_portal(reverse);
        }

        let forward = Portal::custom(origin_pos, dest_pos, size)
            .with_owner(options.owner)
            .with_name(options.name);
        ids.insert(0, forward.id());
        self.register_portal(forward);

        Ok(ids)
    }

    /// Links a local selection to a window selected on another backend.
    pub fn create_external(
        &mut self,
        origin: &PortalSelection,
        external: &ExternalSelectionInfo,
        options: LinkOptions,
    ) -> Result<Uuid, PortalError> {
        let size = origin.portal_size()?;
        if size != external.size {
            return Err(PortalError::DifferentSizes {
                origin: size,
                destination: external.size,
            });
        }
        if !external.position.is_external() {
            return Err(PortalError::invalid_operation(
                "The mirrored destination is not marked as external",
            ));
        }

        let dest_pos = if options.invert {
            external.position.inverted()
        } else {
            external.position.clone()
        };

        let portal = Portal::custom(origin.portal_position()?, dest_pos, size)
            .with_owner(options.owner)
            .with_name(options.name);
        Ok(self.register_portal(portal))
    }

    /// Removes the portal nearest to `location` within [`MODIFY_DISTANCE`].
    pub fn remove_nearest(
        &mut self,
        location: &Location,
        remove_destination: bool,
    ) -> Result<Portal, PortalError> {
        let id = self
            .find_closest_portal(location, MODIFY_DISTANCE)
            .map(|portal| portal.id())
            .ok_or_else(|| {
                PortalError::not_found(format!("No portal within {} blocks", MODIFY_DISTANCE))
            })?;

        self.remove_portal(&id, remove_destination)
            .ok_or_else(|| PortalError::not_found(format!("Portal {}", id)))
    }

    /// Removes every portal with the given name. Returns how many were removed.
    pub fn remove_by_name(&mut self, name: &str) -> Result<usize, PortalError> {
        let ids: Vec<Uuid> = self
            .portals_named(name)
            .into_iter()
            .map(|portal| portal.id())
            .collect();

        if ids.is_empty() {
            return Err(PortalError::not_found(format!(
                "No portals are named {}",
                name
            )));
        }

        for id in &ids {
            self.remove_portal(id, false);
        }
        Ok(ids.len())
    }

    /// Renames a portal. Reserved names replace the portal with a copy under
    /// a new id. Returns the id of the portal now carrying the name.
    pub fn rename_portal(&mut self, id: &Uuid, name: Option<String>) -> Result<Uuid, PortalError> {
        let portal = self
            .portals
            .get_mut(id)
            .ok_or_else(|| PortalError::not_found(format!("Portal {}", id)))?;

        match classify_rename(portal.name(), name.as_deref()) {
            RenameKind::PlainRename => {
                portal.set_name(name)?;
                Ok(*id)
            }
            RenameKind::FullReplace => {
                let replacement = portal.replacement(name);
                self.deregister(id);
                debug!("Replaced portal {} with {}", id, replacement.id());
                Ok(self.register_portal(replacement))
            }
        }
    }

    pub fn set_allows_non_player_teleportation(
        &mut self,
        id: &Uuid,
        allow: bool,
    ) -> Result<(), PortalError> {
        let portal = self
            .portals
            .get_mut(id)
            .ok_or_else(|| PortalError::not_found(format!("Portal {}", id)))?;
        portal.set_allows_non_player_teleportation(allow);
        Ok(())
    }

    pub fn activate(&mut self, id: &Uuid) {
        if let Some(portal) = self.portals.get_mut(id) {
            if !portal.is_activated() {
                portal.on_activate(&self.worlds, &mut self.regions);
            }
        }
    }

    pub fn deactivate(&mut self, id: &Uuid) {
        if let Some(portal) = self.portals.get_mut(id) {
            if portal.is_activated() {
                portal.on_deactivate(&mut self.regions);
            }
        }
    }

    pub fn view_activate(&mut self, id: &Uuid) {
        if let Some(portal) = self.portals.get_mut(id) {
            if !portal.is_view_active() {
                portal.on_view_activate();
            }
        }
    }

    pub fn view_deactivate(&mut self, id: &Uuid) {
        if let Some(portal) = self.portals.get_mut(id) {
            if portal.is_view_active() {
                portal.on_view_deactivate();
            }
        }
    }

    /// Runs one tick for every portal. Portals whose blocks are gone remove
    /// themselves together with their other direction. Returns removed ids.
    pub fn update(&mut self) -> Vec<Uuid> {
        let mut invalid = Vec::new();
        for portal in self.portals.values_mut() {
            if portal.on_update(&self.worlds) == PortalHealth::Invalid {
                invalid.push(portal.id());
                continue;
            }
            portal.on_view_update();
        }

        let mut removed = Vec::new();
        for id in invalid {
            if let Some(portal) = self.remove_portal(&id, true) {
                info!("Portal {} lost its portal blocks", portal.id());
                removed.push(portal.id());
            }
        }
        removed
    }
}
