//! Portal editing commands issued by players.
//!
//! Commands only touch the player's own selection and the portal manager,
//! never the tables of pending relay requests.

use crate::manager::{PortalManager, MODIFY_DISTANCE};
use crate::session::{PlayerSessionStore, SessionHandle};
use crate::world::RegionLoader;
use shared::{PlayerCommand, PortalError, WorldAccess};

/// Runs a command for the player of `handle`. The `Ok` message is shown to
/// the player.
pub fn execute<W: WorldAccess, R: RegionLoader>(
    store: &mut PlayerSessionStore,
    portals: &mut PortalManager<W, R>,
    handle: SessionHandle,
    command: PlayerCommand,
) -> Result<String, PortalError> {
    let session = store
        .session_mut(handle)
        .ok_or_else(|| PortalError::not_found(format!("Session {}", handle)))?;
    let player_id = session.player_id;
    let location = session.avatar.location();

    match command {
        PlayerCommand::SelectCorner { first, position } => {
            let world = session.avatar.world.clone();
            if first {
                session.selection.set_position_a(&world, position);
            } else {
                session.selection.set_position_b(&world, position);
            }
            let corner = if first { "First" } else { "Second" };
            Ok(format!("{} corner set to {}", corner, position))
        }

        PlayerCommand::SelectOrigin => {
            session.selection.try_select_origin()?;
            Ok("Origin selected".to_string())
        }

        PlayerCommand::SelectDestination => {
            session.selection.try_select_destination()?;
            Ok("Destination selected".to_string())
        }

        PlayerCommand::Link { two_way, invert } => {
            let ids = session.selection.try_create_from_selection(
                portals,
                Some(player_id),
                two_way,
                invert,
            )?;
            Ok(format!("Linked {} portal(s)", ids.len()))
        }

        PlayerCommand::LinkExternal { invert } => {
            session
                .selection
                .try_create_from_external_selection(portals, Some(player_id), invert)?;
            Ok("Linked portal to the other server".to_string())
        }

        PlayerCommand::RemoveNearest { remove_destination } => {
            let removed = portals.remove_nearest(&location, remove_destination)?;
            Ok(format!("Removed portal {}", removed.id()))
        }

        PlayerCommand::Rename { name } => {
            let id = nearest(portals, &location)?;
            if portals.portal_by_id(&id).is_some_and(|portal| portal.is_auto_spawned()) {
                return Err(PortalError::invalid_selection("Nether portals cannot be named"));
            }
            portals.rename_portal(&id, name)?;
            Ok("Portal renamed".to_string())
        }

        PlayerCommand::SetAllowNonPlayerTeleportation { allow } => {
            let id = nearest(portals, &location)?;
            portals.set_allows_non_player_teleportation(&id, allow)?;
            Ok(format!("Non-player teleportation set to {}", allow))
        }

        PlayerCommand::SetSeeThrough { enabled } => {
            session.preferences.see_through_portals = enabled;
            Ok(format!("Seeing through portals set to {}", enabled))
        }
    }
}

fn nearest<W: WorldAccess, R: RegionLoader>(
    portals: &PortalManager<W, R>,
    location: &shared::Location,
) -> Result<uuid::Uuid, PortalError> {
    portals
        .find_closest_portal(location, MODIFY_DISTANCE)
        .map(|portal| portal.id())
        .ok_or_else(|| {
            PortalError::not_found(format!("No portal within {} blocks", MODIFY_DISTANCE))
        })
}
