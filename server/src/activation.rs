//! Proximity driven activation of portals.
//!
//! Each tick the tracker looks at where players stand and moves every portal
//! between the activated and view-active states accordingly.

use crate::manager::PortalManager;
use crate::session::PlayerSessionStore;
use crate::world::RegionLoader;
use shared::{Location, WorldAccess};
use uuid::Uuid;

/// A player as far as activation is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct Observer {
    pub location: Location,
    pub see_through: bool,
}

/// State transitions applied during one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivationChanges {
    pub activated: Vec<Uuid>,
    pub deactivated: Vec<Uuid>,
    pub view_activated: Vec<Uuid>,
    pub view_deactivated: Vec<Uuid>,
}

impl ActivationChanges {
    pub fn is_empty(&self) -> bool {
        self.activated.is_empty()
            && self.deactivated.is_empty()
            && self.view_activated.is_empty()
            && self.view_deactivated.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationTracker {
    activation_distance: f64,
    view_distance: f64,
}

impl ActivationTracker {
    pub fn new(activation_distance: f64, view_distance: f64) -> Self {
        Self {
            activation_distance,
            view_distance,
        }
    }

    pub fn observers(store: &PlayerSessionStore) -> Vec<Observer> {
        store
            .sessions()
            .map(|session| Observer {
                location: session.avatar.location(),
                see_through: session.preferences.see_through_portals,
            })
            .collect()
    }

    /// Activates portals with an observer in range and deactivates the rest.
    /// View activation only counts observers that see through portals.
    pub fn apply<W: WorldAccess, R: RegionLoader>(
        &self,
        manager: &mut PortalManager<W, R>,
        observers: &[Observer],
    ) -> ActivationChanges {
        let mut changes = ActivationChanges::default();

        for id in manager.portal_ids() {
            let Some(portal) = manager.portal_by_id(&id) else {
                continue;
            };
            let origin = portal.origin_pos().location(manager.worlds());
            let (was_active, was_view_active) = (portal.is_activated(), portal.is_view_active());

            let in_range = |distance: f64, see_through_only: bool| {
                origin.as_ref().is_some_and(|origin| {
                    observers.iter().any(|observer| {
                        (!see_through_only || observer.see_through)
                            && observer
                                .location
                                .distance(origin)
                                .is_some_and(|d| d <= distance)
                    })
                })
            };
            let should_activate = in_range(self.activation_distance, false);
            let should_view = in_range(self.view_distance, true);

            match (was_active, should_activate) {
                (false, true) => {
                    manager.activate(&id);
                    changes.activated.push(id);
                }
                (true, false) => {
                    manager.deactivate(&id);
                    changes.deactivated.push(id);
                }
                _ => {}
            }

            match (was_view_active, should_view) {
                (false, true) => {
                    manager.view_activate(&id);
                    changes.view_activated.push(id);
                }
                (true, false) => {
                    manager.view_deactivate(&id);
                    changes.view_deactivated.push(id);
                }
                _ => {}
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::Portal;
    use crate::world::{ForceLoadTracker, MemoryWorld};
    use shared::{PortalDirection, PortalPosition, PortalSize, Vec3, WorldHandle};

    fn setup() -> (PortalManager, WorldHandle, Uuid) {
        let mut worlds = MemoryWorld::new();
        let overworld = worlds.create_world("world");
        let nether = worlds.create_world("world_nether");
        let mut manager = PortalManager::new(worlds, ForceLoadTracker::new());

        let portal = Portal::custom(
            PortalPosition::local(
                &Location::new(overworld.clone(), Vec3::new(0.5, 65.0, 0.5)),
                PortalDirection::North,
            ),
            PortalPosition::local(
                &Location::new(nether, Vec3::new(0.5, 65.0, 0.5)),
                PortalDirection::North,
            ),
            PortalSize::new(2.0, 3.0),
        );
        let id = manager.register_portal(portal);
        (manager, overworld, id)
    }

    fn observer(world: &WorldHandle, z: f64, see_through: bool) -> Observer {
        Observer {
            location: Location::new(world.clone(), Vec3::new(0.5, 65.0, z)),
            see_through,
        }
    }

    #[test]
    fn test_activation_follows_distance() {
        let (mut manager, overworld, id) = setup();
        let tracker = ActivationTracker::new(10.0, 5.0);

        let changes = tracker.apply(&mut manager, &[observer(&overworld, 8.5, true)]);
        assert_eq!(changes.activated, vec![id]);
        assert!(changes.view_activated.is_empty());
        assert!(manager.portal_by_id(&id).unwrap().is_activated());
        assert_eq!(manager.regions().loaded_chunks(), 1);

        let changes = tracker.apply(&mut manager, &[observer(&overworld, 3.5, true)]);
        assert!(changes.activated.is_empty());
        assert_eq!(changes.view_activated, vec![id]);

        let changes = tracker.apply(&mut manager, &[]);
        assert_eq!(changes.deactivated, vec![id]);
        assert_eq!(changes.view_deactivated, vec![id]);
        assert_eq!(manager.regions().loaded_chunks(), 0);
    }

    #[test]
    fn test_view_requires_see_through_preference() {
        let (mut manager, overworld, id) = setup();
        let tracker = ActivationTracker::new(10.0, 5.0);

        tracker.apply(&mut manager, &[observer(&overworld, 1.5, false)]);
        let portal = manager.portal_by_id(&id).unwrap();
        assert!(portal.is_activated());
        assert!(!portal.is_view_active());
    }

    #[test]
    fn test_observer_in_other_world_is_ignored() {
        let (mut manager, _, id) = setup();
        let elsewhere = WorldHandle::new(Uuid::new_v4(), "elsewhere");
        let tracker = ActivationTracker::new(10.0, 5.0);

        let changes = tracker.apply(&mut manager, &[observer(&elsewhere, 0.5, true)]);
        assert!(changes.is_empty());
        assert!(!manager.portal_by_id(&id).unwrap().is_activated());
    }
}
