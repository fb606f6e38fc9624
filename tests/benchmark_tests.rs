//! Performance benchmarks for the portal registry and the wire protocol

use server::manager::PortalManager;
use server::portal::Portal;
use server::session::{Avatar, PlayerSessionStore};
use server::storage::{decode_portals, encode_portals};
use server::world::{ForceLoadTracker, MemoryWorld};
use shared::{
    Location, PlayerMotion, PortalDirection, PortalPosition, PortalSize, Vec3, WorldHandle,
};
use std::net::SocketAddr;
use std::time::Instant;
use uuid::Uuid;

/// A manager holding `count` custom portals laid out on a grid
fn populated_manager(count: usize) -> (PortalManager, WorldHandle) {
    let mut worlds = MemoryWorld::new();
    let overworld = worlds.create_world("world");
    let nether = worlds.create_world("world_nether");
    let mut manager = PortalManager::new(worlds, ForceLoadTracker::new());

    for i in 0..count {
        let x = (i % 100) as f64 * 8.0;
        let z = (i / 100) as f64 * 8.0;
        let origin = PortalPosition::local(
            &Location::new(overworld.clone(), Vec3::new(x, 65.5, z)),
            PortalDirection::North,
        );
        let dest = PortalPosition::local(
            &Location::new(nether.clone(), Vec3::new(x / 8.0, 65.5, z / 8.0)),
            PortalDirection::South,
        );
        manager.register_portal(Portal::custom(origin, dest, PortalSize::new(2.0, 3.0)));
    }

    (manager, overworld)
}

/// Benchmarks closest portal lookups in a large registry
#[test]
fn benchmark_find_closest_portal() {
    let (manager, overworld) = populated_manager(1_000);

    let iterations = 1_000;
    let start = Instant::now();

    for i in 0..iterations {
        let location = Location::new(overworld.clone(), Vec3::new((i % 800) as f64, 64.0, 40.0));
        let _ = manager.find_closest_portal(&location, 20.0);
    }

    let duration = start.elapsed();
    println!(
        "Closest portal lookup: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // 1000 scans of 1000 portals should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks the per-tick update of activated portals
#[test]
fn benchmark_portal_update_tick() {
    let (mut manager, _) = populated_manager(1_000);
    for id in manager.portal_ids() {
        manager.activate(&id);
    }

    let ticks = 100;
    let start = Instant::now();

    for _ in 0..ticks {
        let removed = manager.update();
        assert!(removed.is_empty());
    }

    let duration = start.elapsed();
    println!(
        "Portal update: {} ticks of {} portals in {:?} ({:.2} μs/tick)",
        ticks,
        manager.len(),
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks encoding and decoding of the persisted portal file
#[test]
fn benchmark_portal_file_round_trip() {
    let (manager, _) = populated_manager(1_000);
    let portals = manager.all_portals();

    let iterations = 10;
    let start = Instant::now();

    for _ in 0..iterations {
        let json = encode_portals(&portals).unwrap();
        let decoded = decode_portals(&json).unwrap();
        assert_eq!(decoded.len(), portals.len());
    }

    let duration = start.elapsed();
    println!(
        "Portal file round trip: {} iterations in {:?} ({:.2} ms/iter)",
        iterations,
        duration,
        duration.as_millis() as f64 / iterations as f64
    );

    // Should complete in under 3 seconds
    assert!(duration.as_millis() < 3000);
}

/// Benchmarks relay packet serialization performance
#[test]
fn benchmark_packet_serialization() {
    use bincode::{deserialize, serialize};
    use shared::{Packet, RelayMessage, TeleportRequest};

    let motion = PlayerMotion::at(Vec3::new(120.5, 64.0, -33.25));
    let packet = Packet::Forward {
        target_server: "creative".to_string(),
        message: RelayMessage::Teleport(TeleportRequest::new(
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            "world_nether",
            &motion,
        )),
    };

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let serialized = serialize(&packet).unwrap();
        let _deserialized: Packet = deserialize(&serialized).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Packet serialization: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Stress tests players joining and leaving
#[test]
fn stress_test_session_churn() {
    let mut worlds = MemoryWorld::new();
    let overworld = worlds.create_world("world");
    let mut store = PlayerSessionStore::new(1_000, false);
    let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let players: Vec<Uuid> = (0..1_000).map(|_| Uuid::new_v4()).collect();

    let start = Instant::now();

    for round in 0..5 {
        let mut handles = Vec::with_capacity(players.len());
        for player_id in &players {
            let spawn = Avatar::new(
                overworld.clone(),
                PlayerMotion::at(Vec3::new(round as f64, 64.0, 0.0)),
            );
            let outcome = store.connect(*player_id, addr, spawn, &worlds).unwrap();
            handles.push(outcome.handle);
        }
        assert_eq!(store.len(), players.len());

        for handle in handles {
            store.disconnect(handle);
        }
        assert!(store.is_empty());
    }

    let duration = start.elapsed();
    println!("Session churn: 5 rounds of {} players in {:?}", players.len(), duration);

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}
