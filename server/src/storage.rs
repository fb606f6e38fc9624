//! JSON persistence of the portal registry.
//!
//! The file holds `{"portals": [...]}`. Every record is decoded on its own so
//! one damaged entry does not take the rest of the file down with it.

use crate::manager::PortalManager;
use crate::portal::Portal;
use crate::world::RegionLoader;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::{PortalError, PortalPosition, PortalSize, WorldAccess};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access portal file: {0}")]
    Io(#[from] io::Error),

    #[error("Portal file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_true() -> bool {
    true
}

/// One portal as written to disk.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortalRecord {
    origin_pos: PortalPosition,
    dest_pos: PortalPosition,
    size: PortalSize,
    /// Custom portals are anchored: they outlive their blocks
    anchored: bool,
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default = "default_true")]
    allows_non_player_teleportation: bool,
    #[serde(default = "default_true")]
    relocate_player: bool,
    #[serde(default, alias = "ownerId")]
    owner: Option<Uuid>,
    #[serde(default)]
    name: Option<String>,
}

impl From<&Portal> for PortalRecord {
    fn from(portal: &Portal) -> Self {
        Self {
            origin_pos: portal.origin_pos().clone(),
            dest_pos: portal.dest_pos().clone(),
            size: portal.size(),
            anchored: portal.is_custom(),
            id: Some(portal.id()),
            allows_non_player_teleportation: portal.allows_non_player_teleportation(),
            relocate_player: portal.relocates_player(),
            owner: portal.owner_id(),
            name: portal.name().map(str::to_string),
        }
    }
}

impl From<PortalRecord> for Portal {
    fn from(record: PortalRecord) -> Self {
        let portal = Portal::new(record.origin_pos, record.dest_pos, record.size, record.anchored)
            .with_owner(record.owner)
            .with_name(record.name)
            .with_allows_non_player_teleportation(record.allows_non_player_teleportation)
            .with_relocate_player(record.relocate_player);

        match record.id {
            Some(id) => portal.with_id(id),
            None => portal,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PortalFile<T> {
    portals: Vec<T>,
}

/// Decodes a single persisted portal.
pub fn decode_portal(value: serde_json::Value) -> Result<Portal, PortalError> {
    serde_json::from_value::<PortalRecord>(value)
        .map(Portal::from)
        .map_err(|e| PortalError::MalformedRecord(e.to_string()))
}

/// Decodes a portal file, skipping records that cannot be read.
pub fn decode_portals(json: &str) -> Result<Vec<Portal>, StorageError> {
    let file: PortalFile<serde_json::Value> = serde_json::from_str(json)?;

    let mut portals = Vec::with_capacity(file.portals.len());
    for (index, value) in file.portals.into_iter().enumerate() {
        match decode_portal(value) {
            Ok(portal) => portals.push(portal),
            Err(e) => warn!("Skipping portal record {}: {}", index, e),
        }
    }
    Ok(portals)
}

pub fn encode_portals(portals: &[Portal]) -> Result<String, StorageError> {
    let file = PortalFile {
        portals: portals.iter().map(PortalRecord::from).collect(),
    };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// The portal file of one backend.
#[derive(Debug, Clone)]
pub struct PortalStorage {
    path: PathBuf,
}

impl PortalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads all portals. A missing file is an empty registry.
    pub fn load(&self) -> Result<Vec<Portal>, StorageError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No portal file at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        decode_portals(&json)
    }

    /// Loads the file into `manager`. Returns how many portals were registered.
    pub fn load_into<W: WorldAccess, R: RegionLoader>(
        &self,
        manager: &mut PortalManager<W, R>,
    ) -> Result<usize, StorageError> {
        let portals = self.load()?;
        let count = portals.len();
        for portal in portals {
            manager.register_portal(portal);
        }
        info!("Loaded {} portals from {}", count, self.path.display());
        Ok(count)
    }

    /// Writes all portals, replacing the file only once the new contents are
    /// complete.
    pub fn save(&self, portals: &[Portal]) -> Result<(), StorageError> {
        let json = encode_portals(portals)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, &self.path)?;
        info!("Saved {} portals to {}", portals.len(), self.path.display());
        Ok(())
    }
}
