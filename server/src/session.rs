//! Player sessions and reconciliation of relay requests with player presence
//!
//! This module owns every table keyed by player identity on a backend:
//! - Live sessions of connected players (by handle, with identity lookup)
//! - Teleports that arrived before the player did
//! - Selections mirrored from another backend before the player arrived
//! - Selections kept after a player logged out, restored when they return
//!
//! Relay messages and player presence race each other: a teleport request for
//! a player switching servers usually arrives before that player connects. The
//! store resolves the race by parking whatever arrives early and draining it on
//! connect. Pending entries never expire; an entry for a player who never shows
//! up stays until the process restarts.

use crate::selection::SelectionManager;
use log::{debug, info, warn};
use shared::{
    ExternalSelectionInfo, Location, PlayerMotion, SelectionMirrorRequest, TeleportRequest,
    WorldAccess, WorldHandle,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Identifies one connection of a player. A reconnect gets a new handle.
pub type SessionHandle = u32;

/// Per-player toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    /// Render what is on the other side of portals for this player
    pub see_through_portals: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            see_through_portals: true,
        }
    }
}

/// Where a player is and how they are moving.
#[derive(Debug, Clone, PartialEq)]
pub struct Avatar {
    pub world: WorldHandle,
    pub motion: PlayerMotion,
}

impl Avatar {
    pub fn new(world: WorldHandle, motion: PlayerMotion) -> Self {
        Self { world, motion }
    }

    pub fn location(&self) -> Location {
        Location::new(self.world.clone(), self.motion.position)
    }
}

/// Runtime state of a connected player
///
/// A session lives exactly as long as the connection. Only its selection
/// survives a disconnect, moved into the store's retained table.
#[derive(Debug)]
pub struct PlayerSession {
    /// Connection handle assigned by the store
    pub handle: SessionHandle,
    /// Stable identity of the player across servers and reconnects
    pub player_id: Uuid,
    /// Network address for sending responses
    pub addr: SocketAddr,
    pub avatar: Avatar,
    pub selection: SelectionManager,
    pub preferences: Preferences,
    /// Last time we received any packet from this player
    pub last_seen: Instant,
    /// Ticks left before portals can move this player again
    pub portal_cooldown: u32,
}

impl PlayerSession {
    fn new(handle: SessionHandle, player_id: Uuid, addr: SocketAddr, avatar: Avatar) -> Self {
        Self {
            handle,
            player_id,
            addr,
            avatar,
            selection: SelectionManager::new(),
            preferences: Preferences::default(),
            last_seen: Instant::now(),
            portal_cooldown: 0,
        }
    }

    /// Marks the player as active.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Checks if the player has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Moves the player, keeping the world when the requested one is not
    /// loaded here.
    fn apply_teleport(&mut self, request: &TeleportRequest, worlds: &dyn WorldAccess) {
        match worlds.resolve_world(request.dest_world_id, Some(&request.dest_world_name)) {
            Some(world) => self.avatar.world = world,
            None => warn!(
                "Teleport of player {} names unknown world {}, staying in {}",
                self.player_id, request.dest_world_name, self.avatar.world.name
            ),
        }
        self.avatar.motion = request.motion();
        debug!(
            "Player {} teleported to {} in {}",
            self.player_id, self.avatar.motion.position, self.avatar.world.name
        );
    }
}

/// Result of a player connecting
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub handle: SessionHandle,
    /// Where the player appears after pending requests were applied
    pub avatar: Avatar,
    /// A session of the same player that was closed to make room for this one
    pub replaced: Option<SessionHandle>,
    pub restored_selection: bool,
    pub applied_teleport: bool,
    pub applied_selection: bool,
}

/// What happened to an inbound relay request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Applied to the live session with this handle
    Applied(SessionHandle),
    /// Parked until the player connects
    Stored,
}

/// Owner of every per-player table on a backend
///
/// All mutation goes through `&mut self`, so the network layer serialises
/// connects, disconnects, relay messages and ticks by holding the store behind
/// a single lock.
pub struct PlayerSessionStore {
    /// Connected players indexed by their session handle
    sessions: HashMap<SessionHandle, PlayerSession>,
    /// Live handle for each connected identity
    handles: HashMap<Uuid, SessionHandle>,
    pending_teleport_on_join: HashMap<Uuid, TeleportRequest>,
    pending_selection_on_join: HashMap<Uuid, ExternalSelectionInfo>,
    retained_selections: HashMap<Uuid, SelectionManager>,
    /// Where each player last stood on this backend
    last_positions: HashMap<Uuid, Avatar>,
    next_handle: SessionHandle,
    max_players: usize,
    warn_on_missing_selection: bool,
}

impl PlayerSessionStore {
    /// Creates an empty store accepting at most `max_players` sessions
    ///
    /// `warn_on_missing_selection` controls whether a destination-selection
    /// query for an unknown player is logged. Such queries are expected when
    /// the proxy does not forward player identities.
    pub fn new(max_players: usize, warn_on_missing_selection: bool) -> Self {
        Self {
            sessions: HashMap::new(),
            handles: HashMap::new(),
            pending_teleport_on_join: HashMap::new(),
            pending_selection_on_join: HashMap::new(),
            retained_selections: HashMap::new(),
            last_positions: HashMap::new(),
            next_handle: 1,
            max_players,
            warn_on_missing_selection,
        }
    }

    /// Opens a session for a connecting player
    ///
    /// Returns `None` when the backend is full. A player that is already
    /// connected loses the old session first. Draining happens in this order:
    /// 1. A retained selection becomes the live selection
    /// 2. A pending teleport moves the player; otherwise they resume at their
    ///    last position on this backend, or at `spawn`
    /// 3. A pending mirrored selection becomes the external destination
    pub fn connect(
        &mut self,
        player_id: Uuid,
        addr: SocketAddr,
        spawn: Avatar,
        worlds: &dyn WorldAccess,
    ) -> Option<JoinOutcome> {
        let replaced = self.handles.get(&player_id).copied();
        if let Some(old) = replaced {
            warn!("Player {} connected twice, closing session {}", player_id, old);
            self.disconnect(old);
        }

        if self.sessions.len() >= self.max_players {
            return None;
        }

        let handle = self.next_handle;
        self.next_handle += 1;

        let start = self.last_positions.remove(&player_id).unwrap_or(spawn);
        let mut session = PlayerSession::new(handle, player_id, addr, start);

        let restored_selection = match self.retained_selections.remove(&player_id) {
            Some(selection) => {
                session.selection = selection;
                true
            }
            None => false,
        };

        let applied_teleport = match self.pending_teleport_on_join.remove(&player_id) {
            Some(request) => {
                session.apply_teleport(&request, worlds);
                true
            }
            None => false,
        };

        let applied_selection = match self.pending_selection_on_join.remove(&player_id) {
            Some(selection) => {
                session.selection.set_external_selection(selection);
                true
            }
            None => false,
        };

        info!("Player {} connected from {} as session {}", player_id, addr, handle);
        let avatar = session.avatar.clone();
        self.sessions.insert(handle, session);
        self.handles.insert(player_id, handle);

        Some(JoinOutcome {
            handle,
            avatar,
            replaced,
            restored_selection,
            applied_teleport,
            applied_selection,
        })
    }

    /// Closes a session
    ///
    /// The selection moves into the retained table and the position is kept
    /// until the next join consumes it. Disconnecting an unknown handle is logged and
    /// otherwise ignored.
    pub fn disconnect(&mut self, handle: SessionHandle) -> Option<PlayerSession> {
        let Some(mut session) = self.sessions.remove(&handle) else {
            warn!("Disconnect of session {} which does not exist", handle);
            return None;
        };

        if self.handles.get(&session.player_id) == Some(&handle) {
            self.handles.remove(&session.player_id);
        }
        self.retained_selections.insert(
            session.player_id,
            std::mem::take(&mut session.selection),
        );
        self.last_positions
            .insert(session.player_id, session.avatar.clone());

        info!("Player {} disconnected (session {})", session.player_id, handle);
        Some(session)
    }

    /// Teleport requested by another backend
    ///
    /// An online player is moved immediately. Otherwise the request waits for
    /// the player to connect; a newer request replaces an older one.
    pub fn handle_teleport(&mut self, request: TeleportRequest, worlds: &dyn WorldAccess) -> Delivery {
        if let Some(session) = self.session_by_player_mut(&request.player_id) {
            session.apply_teleport(&request, worlds);
            return Delivery::Applied(session.handle);
        }

        debug!(
            "Player {} is not online yet, storing teleport to {}",
            request.player_id, request.dest_world_name
        );
        self.pending_teleport_on_join
            .insert(request.player_id, request);
        Delivery::Stored
    }

    /// Destination selection mirrored from another backend
    ///
    /// Merged into the live selection if the player is here, staged for their
    /// join otherwise.
    pub fn handle_selection_mirror(&mut self, request: SelectionMirrorRequest) -> Delivery {
        if let Some(session) = self.session_by_player_mut(&request.player_id) {
            session.selection.set_external_selection(request.selection);
            return Delivery::Applied(session.handle);
        }

        debug!(
            "Player {} is not online yet, staging mirrored selection",
            request.player_id
        );
        self.pending_selection_on_join
            .insert(request.player_id, request.selection);
        Delivery::Stored
    }

    /// The destination a player selected on this backend, as another backend
    /// should see it
    ///
    /// Looks at the live session first, then at the retained selection of a
    /// player who already left for another server.
    pub fn destination_selection(
        &self,
        player_id: &Uuid,
        server_name: &str,
    ) -> Option<ExternalSelectionInfo> {
        let selection = self
            .session_by_player(player_id)
            .map(|session| &session.selection)
            .or_else(|| self.retained_selections.get(player_id));

        match selection {
            Some(selection) => selection.external_info(server_name),
            None => {
                if self.warn_on_missing_selection {
                    warn!(
                        "No selection is known for player {}. Is player identity forwarding enabled on the proxy?",
                        player_id
                    );
                }
                None
            }
        }
    }

    pub fn session(&self, handle: SessionHandle) -> Option<&PlayerSession> {
        self.sessions.get(&handle)
    }

    pub fn session_mut(&mut self, handle: SessionHandle) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(&handle)
    }

    pub fn session_by_player(&self, player_id: &Uuid) -> Option<&PlayerSession> {
        self.handles
            .get(player_id)
            .and_then(|handle| self.sessions.get(handle))
    }

    pub fn session_by_player_mut(&mut self, player_id: &Uuid) -> Option<&mut PlayerSession> {
        let handle = self.handles.get(player_id)?;
        self.sessions.get_mut(handle)
    }

    /// Finds a session by the address its packets come from
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<SessionHandle> {
        self.sessions
            .values()
            .find(|session| session.addr == addr)
            .map(|session| session.handle)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession> {
        self.sessions.values_mut()
    }

    /// Handles of sessions that have been silent for longer than `timeout`
    pub fn check_timeouts(&self, timeout: Duration) -> Vec<SessionHandle> {
        self.sessions
            .values()
            .filter(|session| session.is_timed_out(timeout))
            .map(|session| session.handle)
            .collect()
    }

    pub fn has_pending_teleport(&self, player_id: &Uuid) -> bool {
        self.pending_teleport_on_join.contains_key(player_id)
    }

    pub fn has_pending_selection(&self, player_id: &Uuid) -> bool {
        self.pending_selection_on_join.contains_key(player_id)
    }

    pub fn retained_selection(&self, player_id: &Uuid) -> Option<&SelectionManager> {
        self.retained_selections.get(player_id)
    }

    pub fn has_last_position(&self, player_id: &Uuid) -> bool {
        self.last_positions.contains_key(player_id)
    }

    pub fn last_position_count(&self) -> usize {
        self.last_positions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
