//! Performance benchmarks for critical server systems

use server::character::CharacterInfo;
use server::config::Location;
use server::content::{Content, Terrain, Tile};
use server::map::{Player, Rules};
use server::pathfinding::next_step;
use server::protocol::{FrameParser, PacketRegistry, Requirement, SessionGate, SessionPhase};
use server::world::World;
use shared::packets::{encode_frame, MoveRequest, PingRequest};
use shared::{AccessLevel, Direction, Job, MovementType, Packet, SessionId};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Minimal dispatch target that counts handled requests
#[derive(Default)]
struct Counter {
    pings: u64,
    moves: u64,
}

impl SessionGate for Counter {
    fn phase(&self, _session: SessionId) -> Option<SessionPhase> {
        Some(SessionPhase::InGame)
    }

    fn access_level(&self, _session: SessionId) -> AccessLevel {
        AccessLevel::Player
    }
}

fn counter_registry() -> PacketRegistry<Counter> {
    let mut registry = PacketRegistry::new();
    registry.register(Requirement::Session, |counter: &mut Counter, _, _: PingRequest| {
        counter.pings += 1
    });
    registry.register(Requirement::Player, |counter: &mut Counter, _, _: MoveRequest| {
        counter.moves += 1
    });
    registry
}

/// Benchmarks splitting and dispatching a large receive buffer
#[test]
fn benchmark_frame_parsing() {
    let registry = counter_registry();
    let mut buffer = Vec::new();
    for i in 0..5_000u64 {
        buffer.extend_from_slice(&encode_frame(&PingRequest { timestamp: i }));
        buffer.extend_from_slice(&encode_frame(&MoveRequest {
            direction: Direction::Left,
            movement: MovementType::Run,
            // Delimiter and escape bytes force byte-stuffing
            x: 0x7e7d,
            y: i as u16,
        }));
    }

    let mut counter = Counter::default();
    let start = Instant::now();
    let consumed = FrameParser::parse(&buffer, 1, &registry, &mut counter);
    let duration = start.elapsed();

    println!(
        "Frame parsing: {} frames ({} bytes) in {:?}",
        counter.pings + counter.moves,
        buffer.len(),
        duration
    );

    assert_eq!(consumed, buffer.len());
    assert_eq!(counter.pings, 5_000);
    assert_eq!(counter.moves, 5_000);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks frame encoding
#[test]
fn benchmark_frame_encoding() {
    let iterations = 100_000;
    let start = Instant::now();

    let mut total = 0;
    for i in 0..iterations {
        total += encode_frame(&PingRequest { timestamp: i }).len();
    }

    let duration = start.elapsed();
    println!(
        "Frame encoding: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(total > iterations as usize * PingRequest::ID.len());
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks BFS across a maze-like map
#[test]
fn benchmark_pathfinding() {
    let (width, height) = (100u16, 100u16);
    let mut terrain = Terrain::open(width, height);
    // Vertical walls with a gap alternating between top and bottom
    for x in (4..width).step_by(4) {
        for y in 0..height {
            let gap = if (x / 4) % 2 == 0 { 0 } else { height - 1 };
            if y != gap {
                terrain.set_tile(x, y, Tile::Blocked);
            }
        }
    }

    let iterations = 200;
    let start = Instant::now();
    let mut found = 0;
    for _ in 0..iterations {
        if next_step(&terrain, (0, 50), (width - 1, 50), |x, y| {
            terrain.is_walkable(x, y)
        })
        .is_some()
        {
            found += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Pathfinding: {} searches in {:?} ({:.2} μs/search)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(found, iterations);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks world ticks with one player on every map, so NPCs think and act
#[test]
fn benchmark_world_tick() {
    let mut world = World::new(Arc::new(Content::builtin()), Rules::default(), 5).unwrap();

    let spawns: Vec<Location> = world
        .maps()
        .filter_map(|map| {
            let terrain = map.terrain();
            (0..terrain.height())
                .flat_map(|y| (0..terrain.width()).map(move |x| (x, y)))
                .find(|&(x, y)| terrain.is_walkable(x, y))
                .map(|(x, y)| Location::new(map.name(), x, y))
        })
        .collect();
    assert!(!spawns.is_empty());

    // Receivers stay alive so every broadcast is encoded and queued
    let mut outboxes = Vec::new();
    for (index, location) in spawns.iter().enumerate() {
        let session = index as SessionId + 1;
        let name = format!("Bench{}", session);
        let character = CharacterInfo::new(
            &name,
            &name,
            Job::Warrior,
            1,
            &location.map,
            location.x,
            location.y,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        world.add_player(Player::new(session, character, tx, 0), location);
        outboxes.push(rx);
    }
    assert_eq!(world.player_count(), spawns.len());

    let ticks = 2_000u64;
    let start = Instant::now();
    for tick in 0..ticks {
        world.update(tick * 50);
    }

    let duration = start.elapsed();
    println!(
        "World tick: {} ticks over {} maps in {:?} ({:.2} μs/tick)",
        ticks,
        spawns.len(),
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    assert_eq!(outboxes.len(), spawns.len());
    assert!(duration.as_millis() < 2000);
}
