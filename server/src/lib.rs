//! # RPG Server Library
//!
//! The authoritative server of a tile-based online role-playing game. Clients
//! only send requests; every rule (movement, combat, inventory, experience)
//! is decided here and the outcome is pushed back as commands.
//!
//! ## Architecture Design
//!
//! ### Single Owner Event Loop
//! One task owns the whole [`game::Game`]. Connection pumps and the tick
//! timer feed it messages, which are applied strictly one after another.
//! Handlers therefore mutate maps and sessions without locks, and any two
//! requests observe each other's effects in arrival order.
//!
//! ### TCP Framing
//! Each socket carries byte-stuffed frames terminated by a delimiter (see
//! [`shared::packets`]). The [`protocol::FrameParser`] splits a session's
//! receive buffer into frames and dispatches them through the
//! [`protocol::PacketRegistry`], which also enforces the session phase and
//! access level each request needs.
//!
//! ### Map Partitioning
//! Players live on exactly one [`map::Map`]. Broadcasts, NPC AI and item
//! drops are map-local; cross-map effects such as warps are queued as
//! events and applied by the [`world::World`] after each handler and tick.
//!
//! ## Module Organization
//!
//! ### Sessions (`client_manager`, `protocol`, `handlers`)
//! - Slot pool bounding concurrent connections
//! - Per-session receive buffers and outbound queues
//! - Request routing, gating and the handlers themselves
//!
//! ### Simulation (`world`, `map`, `npc`, `pathfinding`, `combat`, `inventory`)
//! - Map snapshots and map-wide broadcasts
//! - NPC wandering, chasing and attacking
//! - Damage, death, experience and level-ups
//! - Inventories, equipment and ground items
//!
//! ### Storage (`repository`, `assets`, `content`, `character`)
//! - Account, character and ban persistence
//! - Static map, NPC and item catalog
//! - Content-addressed asset downloads
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         address: "127.0.0.1:7000".to_string(),
//!         ..ServerConfig::default()
//!     };
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod character;
pub mod client_manager;
pub mod combat;
pub mod config;
pub mod content;
pub mod game;
pub mod handlers;
pub mod inventory;
pub mod map;
pub mod network;
pub mod npc;
pub mod pathfinding;
pub mod protocol;
pub mod repository;
pub mod utils;
pub mod world;
