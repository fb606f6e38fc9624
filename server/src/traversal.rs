//! Moving players who walk into a portal window.

use crate::manager::PortalManager;
use crate::portal::Portal;
use crate::session::{Avatar, PlayerSessionStore, SessionHandle};
use crate::world::RegionLoader;
use log::{debug, info, warn};
use shared::{PlayerMotion, PortalPosition, PortalSize, TeleportRequest, Vec3, WorldAccess};
use uuid::Uuid;

/// Half the depth of the volume in front of and behind a window that counts
/// as inside it.
const WINDOW_HALF_DEPTH: f64 = 0.5;

/// What a tick of traversal did to one player.
#[derive(Debug, Clone, PartialEq)]
pub enum TraversalPlan {
    /// Moved within this backend
    Local {
        handle: SessionHandle,
        portal_id: Uuid,
        avatar: Avatar,
    },
    /// Has to continue on another backend
    External {
        handle: SessionHandle,
        portal_id: Uuid,
        target_server: String,
        /// `None` when the player resumes wherever they last stood there
        request: Option<TeleportRequest>,
    },
    /// The portal does not relocate players
    Fired {
        handle: SessionHandle,
        portal_id: Uuid,
    },
}

impl TraversalPlan {
    pub fn handle(&self) -> SessionHandle {
        match self {
            Self::Local { handle, .. } | Self::External { handle, .. } | Self::Fired { handle, .. } => {
                *handle
            }
        }
    }
}

/// Whether `point` is inside the window of a portal whose centre and facing
/// are given by `position`.
pub fn window_contains(position: &PortalPosition, size: PortalSize, point: Vec3) -> bool {
    let offset = point - position.vector();
    let (across, depth) = if position.direction().is_x_plane() {
        (offset.z, offset.x)
    } else {
        (offset.x, offset.z)
    };

    depth.abs() <= WINDOW_HALF_DEPTH
        && across.abs() <= size.width / 2.0
        && offset.y.abs() <= size.height / 2.0
}

/// Maps a player's motion relative to the origin window onto the destination
/// window, turning it by the angle between the two facings.
pub fn map_motion(origin: &PortalPosition, destination: &PortalPosition, motion: &PlayerMotion) -> PlayerMotion {
    let turns = origin.direction().quarter_turns_to(destination.direction());
    let offset = (motion.position - origin.vector()).rotate_quarter_turns(turns);

    PlayerMotion {
        position: destination.vector() + offset,
        yaw: (motion.yaw + 90.0 * turns as f32).rem_euclid(360.0),
        pitch: motion.pitch,
        velocity: motion.velocity.rotate_quarter_turns(turns),
        flying: motion.flying,
        gliding: motion.gliding,
    }
}

fn portal_at<'a, W: WorldAccess, R: RegionLoader>(
    manager: &'a PortalManager<W, R>,
    avatar: &Avatar,
) -> Option<&'a Portal> {
    manager.portals().find(|portal| {
        portal
            .origin_pos()
            .world(manager.worlds())
            .is_some_and(|world| world.id == avatar.world.id)
            && window_contains(portal.origin_pos(), portal.size(), avatar.motion.position)
    })
}

/// Moves every player standing in a portal window. Players that were moved
/// are ignored by portals for `cooldown_ticks` ticks.
pub fn run_traversals<W: WorldAccess, R: RegionLoader>(
    store: &mut PlayerSessionStore,
    manager: &PortalManager<W, R>,
    cooldown_ticks: u32,
) -> Vec<TraversalPlan> {
    let mut plans = Vec::new();

    for session in store.sessions_mut() {
        if session.portal_cooldown > 0 {
            session.portal_cooldown -= 1;
            continue;
        }

        let Some(portal) = portal_at(manager, &session.avatar) else {
            continue;
        };
        session.portal_cooldown = cooldown_ticks;

        if !portal.relocates_player() {
            debug!("Portal {} fired for player {}", portal.id(), session.player_id);
            plans.push(TraversalPlan::Fired {
                handle: session.handle,
                portal_id: portal.id(),
            });
            continue;
        }

        let dest = portal.dest_pos();
        let motion = map_motion(portal.origin_pos(), dest, &session.avatar.motion);

        if let Some(target_server) = dest.server_name() {
            let request = (!dest.is_last_player_position()).then(|| {
                TeleportRequest::new(
                    session.player_id,
                    None,
                    dest.world_name().unwrap_or_default(),
                    &motion,
                )
            });
            info!(
                "Player {} is travelling through portal {} to {}",
                session.player_id,
                portal.id(),
                target_server
            );
            plans.push(TraversalPlan::External {
                handle: session.handle,
                portal_id: portal.id(),
                target_server: target_server.to_string(),
                request,
            });
            continue;
        }

        match dest.world(manager.worlds()) {
            Some(world) => {
                session.avatar = Avatar::new(world, motion);
                debug!(
                    "Player {} went through portal {} to {}",
                    session.player_id,
                    portal.id(),
                    session.avatar.motion.position
                );
                plans.push(TraversalPlan::Local {
                    handle: session.handle,
                    portal_id: portal.id(),
                    avatar: session.avatar.clone(),
                });
            }
            None => warn!(
                "Destination world of portal {} is not loaded, player {} stays",
                portal.id(),
                session.player_id
            ),
        }
    }

    plans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{ForceLoadTracker, MemoryWorld};
    use assert_approx_eq::assert_approx_eq;
    use shared::{Location, PortalDirection, WorldHandle};
    use std::net::SocketAddr;

    struct Fixture {
        manager: PortalManager,
        store: PlayerSessionStore,
        overworld: WorldHandle,
        nether: WorldHandle,
    }

    fn fixture() -> Fixture {
        let mut worlds = MemoryWorld::new();
        let overworld = worlds.create_world("world");
        let nether = worlds.create_world("world_nether");
        Fixture {
            manager: PortalManager::new(worlds, ForceLoadTracker::new()),
            store: PlayerSessionStore::new(10, true),
            overworld,
            nether,
        }
    }

    fn position(world: &WorldHandle, center: Vec3, direction: PortalDirection) -> PortalPosition {
        PortalPosition::local(&Location::new(world.clone(), center), direction)
    }

    fn join(fixture: &mut Fixture, at: Vec3) -> SessionHandle {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let spawn = Avatar::new(fixture.overworld.clone(), PlayerMotion::at(at));
        fixture
            .store
            .connect(Uuid::new_v4(), addr, spawn, fixture.manager.worlds())
            .unwrap()
            .handle
    }

    #[test]
    fn test_window_contains() {
        let world = WorldHandle::new(Uuid::new_v4(), "world");
        let size = PortalSize::new(2.0, 3.0);

        let north = position(&world, Vec3::new(1.0, 65.5, 0.5), PortalDirection::North);
        assert!(window_contains(&north, size, Vec3::new(1.5, 64.5, 0.7)));
        assert!(!window_contains(&north, size, Vec3::new(2.5, 64.5, 0.5)));
        assert!(!window_contains(&north, size, Vec3::new(1.0, 64.5, 1.5)));

        let east = position(&world, Vec3::new(5.5, 65.5, 0.0), PortalDirection::East);
        assert!(window_contains(&east, size, Vec3::new(5.5, 65.0, -0.9)));
        assert!(!window_contains(&east, size, Vec3::new(4.5, 65.0, 0.0)));
    }

    #[test]
    fn test_map_motion_rotates_between_facings() {
        let world = WorldHandle::new(Uuid::new_v4(), "world");
        let origin = position(&world, Vec3::new(0.0, 64.0, 0.0), PortalDirection::South);
        let destination = position(&world, Vec3::new(100.0, 70.0, 100.0), PortalDirection::West);

        let motion = PlayerMotion {
            position: Vec3::new(0.0, 64.5, 0.25),
            yaw: 0.0,
            pitch: 5.0,
            velocity: Vec3::new(0.0, 0.0, 0.5),
            flying: false,
            gliding: true,
        };
        let mapped = map_motion(&origin, &destination, &motion);

        assert_approx_eq!(mapped.position.x, 99.75);
        assert_approx_eq!(mapped.position.y, 70.5);
        assert_approx_eq!(mapped.position.z, 100.0);
        assert_approx_eq!(mapped.velocity.x, -0.5);
        assert_approx_eq!(mapped.yaw as f64, 90.0);
        assert!(mapped.gliding);
    }

    #[test]
    fn test_local_traversal_moves_player() {
        let mut fixture = fixture();
        let portal = Portal::custom(
            position(&fixture.overworld, Vec3::new(1.0, 65.5, 0.5), PortalDirection::North),
            position(&fixture.nether, Vec3::new(10.0, 70.5, 10.5), PortalDirection::North),
            PortalSize::new(2.0, 3.0),
        );
        let portal_id = fixture.manager.register_portal(portal);
        let handle = join(&mut fixture, Vec3::new(1.0, 64.5, 0.5));

        let plans = run_traversals(&mut fixture.store, &fixture.manager, 20);
        assert_eq!(plans.len(), 1);
        match &plans[0] {
            TraversalPlan::Local {
                handle: moved,
                portal_id: used,
                avatar,
            } => {
                assert_eq!(*moved, handle);
                assert_eq!(*used, portal_id);
                assert_eq!(avatar.world, fixture.nether);
                assert_approx_eq!(avatar.motion.position.x, 10.0);
                assert_approx_eq!(avatar.motion.position.y, 69.5);
            }
            other => panic!("Expected a local traversal, got {:?}", other),
        }

        // Cooling down, and no portal at the destination anyway
        assert!(run_traversals(&mut fixture.store, &fixture.manager, 20).is_empty());
    }

    #[test]
    fn test_external_traversal_builds_request() {
        let mut fixture = fixture();
        let dest = PortalPosition::external(
            Vec3::new(0.5, 80.5, 0.5),
            PortalDirection::North,
            "survival",
            "world",
            false,
        );
        fixture.manager.register_portal(Portal::custom(
            position(&fixture.overworld, Vec3::new(1.0, 65.5, 0.5), PortalDirection::North),
            dest,
            PortalSize::new(2.0, 3.0),
        ));
        let handle = join(&mut fixture, Vec3::new(1.0, 64.5, 0.5));
        let player_id = fixture.store.session(handle).unwrap().player_id;

        let plans = run_traversals(&mut fixture.store, &fixture.manager, 20);
        match &plans[..] {
            [TraversalPlan::External {
                target_server,
                request: Some(request),
                ..
            }] => {
                assert_eq!(target_server, "survival");
                assert_eq!(request.player_id, player_id);
                assert_eq!(request.dest_world_id, None);
                assert_eq!(request.dest_world_name, "world");
                assert_approx_eq!(request.dest_y, 79.5);
            }
            other => panic!("Expected an external traversal, got {:?}", other),
        }
    }

    #[test]
    fn test_last_player_position_skips_request() {
        let mut fixture = fixture();
        let dest = PortalPosition::external(
            Vec3::new(0.5, 80.5, 0.5),
            PortalDirection::North,
            "survival",
            "world",
            true,
        );
        fixture.manager.register_portal(Portal::custom(
            position(&fixture.overworld, Vec3::new(1.0, 65.5, 0.5), PortalDirection::North),
            dest,
            PortalSize::new(2.0, 3.0),
        ));
        join(&mut fixture, Vec3::new(1.0, 64.5, 0.5));

        let plans = run_traversals(&mut fixture.store, &fixture.manager, 20);
        assert!(matches!(
            &plans[..],
            [TraversalPlan::External { request: None, .. }]
        ));
    }

    #[test]
    fn test_non_relocating_portal_only_fires() {
        let mut fixture = fixture();
        fixture.manager.register_portal(
            Portal::custom(
                position(&fixture.overworld, Vec3::new(1.0, 65.5, 0.5), PortalDirection::North),
                position(&fixture.nether, Vec3::new(10.0, 70.5, 10.5), PortalDirection::North),
                PortalSize::new(2.0, 3.0),
            )
            .with_relocate_player(false),
        );
        let handle = join(&mut fixture, Vec3::new(1.0, 64.5, 0.5));

        let plans = run_traversals(&mut fixture.store, &fixture.manager, 20);
        assert!(matches!(&plans[..], [TraversalPlan::Fired { .. }]));
        assert_eq!(
            fixture.store.session(handle).unwrap().avatar.world,
            fixture.overworld
        );
    }
}
