//! # Portal Backend Library
//!
//! This library implements a backend server of a portal network. A backend hosts
//! a set of worlds, keeps the registry of portals that connect points in those
//! worlds, and moves players through them. Portals whose destination lives on
//! another backend hand the player over through the relay.
//!
//! ## Core Responsibilities
//!
//! ### Portal Registry
//! Every portal is a one-way link from an origin to a destination with a window
//! size. The registry indexes portals by id, finds the closest portal to a
//! location, and removes portals together with their reverse direction.
//!
//! ### Portal Lifecycle
//! Portals near players are activated, which keeps the region around their
//! destination loaded. Activated portals check once per tick that their blocks
//! are still intact and remove themselves when they are not.
//!
//! ### Player Sessions
//! Tracks connected players, their wand selections and the requests other
//! backends sent for players that have not arrived yet:
//! - A teleport for an offline player is applied when they join
//! - A mirrored destination selection is merged into their selection on join
//! - A player's selection outlives their disconnect so it can be mirrored later
//!
//! ### Cross-Server Reconciliation
//! When a player walks through a portal to another backend, this backend sends
//! the teleport ahead of the player and asks the relay to switch them over. The
//! relay then fetches the selection the player made here and mirrors it onto the
//! target backend.
//!
//! ## Module Organization
//!
//! ### Portal Module (`portal`)
//! A single portal with its activation state machine and block validity checks.
//!
//! ### Manager Module (`manager`)
//! The registry of all portals on this backend, and the operations that create,
//! rename and remove them.
//!
//! ### Selection Module (`selection`)
//! Wand corner selections and their conversion into portal positions.
//!
//! ### Session Module (`session`)
//! Connected players plus the pending request tables described above.
//!
//! ### Activation and Traversal Modules (`activation`, `traversal`)
//! Per-tick distance based activation, and moving players whose position ends
//! up inside a portal window.
//!
//! ### Storage Module (`storage`)
//! JSON persistence of the portal registry.
//!
//! ### Network Module (`network`)
//! UDP traffic with players and the relay, and the tick loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:25600".to_string(),
//!         relay_addr: Some("127.0.0.1:25500".to_string()),
//!         server_name: "survival".to_string(),
//!         ..Default::default()
//!     };
//!
//!     // Creates the worlds, loads portals.json and binds the socket
//!     let mut server = Server::new(config).await?;
//!
//!     // Runs until a Shutdown message arrives, then saves the portals
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! The server uses an event-driven architecture with internal async tasks that handle:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Processes the outgoing packet queue
//! - **Timeout Checker**: Disconnects players that stopped sending packets
//! - **Main Loop**: Handles packets, runs the portal tick and heartbeats the relay

pub mod activation;
pub mod commands;
pub mod config;
pub mod manager;
pub mod network;
pub mod portal;
pub mod selection;
pub mod session;
pub mod storage;
pub mod traversal;
pub mod world;
