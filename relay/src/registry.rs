//! Registered backend servers
//!
//! This module tracks:
//! - Which backend name is reachable at which address
//! - When each backend was last heard from, for timeout eviction
//!
//! The registry holds no player, portal or world state. Everything it knows
//! comes from `Register` and `Heartbeat` packets.

use log::{info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A backend known to the relay
#[derive(Debug, Clone)]
pub struct BackendServer {
    /// Name other backends address it by
    pub name: String,
    /// Network address for delivering messages
    pub addr: SocketAddr,
    /// Last time we received any packet from this backend
    pub last_seen: Instant,
}

impl BackendServer {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Checks if the backend has exceeded the heartbeat timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all registered backends
///
/// Names are unique. A backend registering under a name that is already taken
/// replaces the previous registration, which is what happens when a backend
/// restarts on a different port.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: HashMap<String, BackendServer>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend, returning the address it replaced if any
    pub fn register(&mut self, name: &str, addr: SocketAddr) -> Option<SocketAddr> {
        // One address serves one name
        if let Some(previous_name) = self.name_by_addr(addr) {
            if previous_name != name {
                warn!(
                    "Backend at {} re-registered as {} (was {})",
                    addr, name, previous_name
                );
                self.servers.remove(&previous_name);
            }
        }

        let replaced = self
            .servers
            .insert(name.to_string(), BackendServer::new(name, addr))
            .map(|previous| previous.addr)
            .filter(|previous| *previous != addr);

        match replaced {
            Some(previous) => warn!(
                "Backend {} moved from {} to {}",
                name, previous, addr
            ),
            None => info!("Backend {} registered from {}", name, addr),
        }
        replaced
    }

    /// Removes a backend. Returns false if it was already gone.
    pub fn deregister(&mut self, name: &str) -> bool {
        if self.servers.remove(name).is_some() {
            info!("Backend {} deregistered", name);
            true
        } else {
            false
        }
    }

    /// Marks the backend at `addr` as alive. Returns false for unknown addresses.
    pub fn heartbeat(&mut self, addr: SocketAddr) -> bool {
        match self.servers.values_mut().find(|server| server.addr == addr) {
            Some(server) => {
                server.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn server(&self, name: &str) -> Option<&BackendServer> {
        self.servers.get(name)
    }

    pub fn addr_of(&self, name: &str) -> Option<SocketAddr> {
        self.servers.get(name).map(|server| server.addr)
    }

    /// Used to associate incoming packets with a registered backend
    pub fn name_by_addr(&self, addr: SocketAddr) -> Option<String> {
        self.servers
            .values()
            .find(|server| server.addr == addr)
            .map(|server| server.name.clone())
    }

    /// Removes and returns the names of backends that stopped heartbeating
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<String> {
        let timed_out: Vec<String> = self
            .servers
            .values()
            .filter(|server| server.is_timed_out(timeout))
            .map(|server| server.name.clone())
            .collect();

        for name in &timed_out {
            warn!("Backend {} timed out", name);
            self.servers.remove(name);
        }

        timed_out
    }

    /// Addresses of every registered backend, for broadcasts
    pub fn server_addrs(&self) -> Vec<(String, SocketAddr)> {
        self.servers
            .values()
            .map(|server| (server.name.clone(), server.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ServerRegistry::new();
        assert!(registry.register("survival", addr(25601)).is_none());
        assert!(registry.register("creative", addr(25602)).is_none());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.addr_of("survival"), Some(addr(25601)));
        assert_eq!(registry.name_by_addr(addr(25602)), Some("creative".to_string()));
        assert_eq!(registry.addr_of("lobby"), None);
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry = ServerRegistry::new();
        registry.register("survival", addr(25601));

        // Same name from a new address
        assert_eq!(registry.register("survival", addr(25611)), Some(addr(25601)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.addr_of("survival"), Some(addr(25611)));

        // Same address under a new name
        registry.register("creative", addr(25611));
        assert_eq!(registry.len(), 1);
        assert!(registry.server("survival").is_none());

        // Repeated registration is not a move
        assert!(registry.register("creative", addr(25611)).is_none());
    }

    #[test]
    fn test_deregister_and_heartbeat() {
        let mut registry = ServerRegistry::new();
        registry.register("survival", addr(25601));

        assert!(registry.heartbeat(addr(25601)));
        assert!(!registry.heartbeat(addr(25699)));

        assert!(registry.deregister("survival"));
        assert!(!registry.deregister("survival"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_check_timeouts() {
        let mut registry = ServerRegistry::new();
        registry.register("survival", addr(25601));
        registry.register("creative", addr(25602));

        thread::sleep(Duration::from_millis(30));
        registry.heartbeat(addr(25602));

        let timed_out = registry.check_timeouts(Duration::from_millis(20));
        assert_eq!(timed_out, vec!["survival".to_string()]);
        assert_eq!(registry.len(), 1);
        assert!(registry.server("creative").is_some());
    }
}
