//! # Portal Relay Library
//!
//! The relay is the only link between backend servers. Backends register under a
//! name, then address each other by that name; the relay never interprets
//! portal or world data, it only routes.
//!
//! ## Routing
//! - `Register` binds a backend name to the sender's address and is answered
//!   with `Registered`
//! - `Forward { target_server, .. }` is delivered to the target as
//!   `Deliver { source_server, .. }`. Unknown targets are logged and dropped
//! - `SwitchServer` asks the old backend for the destination selection the
//!   player made there. The answer is mirrored onto the new backend. Queries
//!   still in flight are dropped when either backend goes away
//! - `Notice` deregisters the sending backend. On shutdown the relay sends one
//!   to every backend
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use relay::config::RelayConfig;
//! use relay::network::Relay;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut relay = Relay::new(RelayConfig::default()).await?;
//!     relay.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod network;
pub mod registry;
