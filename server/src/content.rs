//! Static game content: item and NPC templates plus map terrain
//!
//! Content is read once at startup, either from a JSON file or from the
//! built-in catalog, and shared read-only by every map afterwards.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to read content file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse content file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("map {map}: {reason}")]
    InvalidMap { map: String, reason: String },

    #[error("unknown {kind} template {id}")]
    UnknownTemplate { kind: &'static str, id: u32 },

    #[error("npc {npc}: cannot drop {quantity} of item {item}")]
    InvalidLoot { npc: u32, item: u32, quantity: u32 },

    #[error("content defines no maps")]
    NoMaps,
}

/// What an item does when used or equipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ItemKind {
    Weapon { damage: u32 },
    Armor { protection: u32 },
    Helmet { protection: u32 },
    Shield { block_chance: u32 },
    Potion { health: u32, mana: u32, stamina: u32 },
    Key,
    Currency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemTemplate {
    pub id: u32,
    pub name: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub max_durability: u32,
    #[serde(default)]
    pub stackable: bool,
}

/// NPC AI policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Behavior {
    /// Wanders, never targets, cannot be attacked
    Friendly,
    /// Stands still, never targets, cannot be attacked
    Shopkeeper,
    /// Hunts player killers in range and fights back when hit
    Guard,
    /// Hunts any player in range
    AttackOnSight,
    /// Passive until a player hits it
    AttackWhenAttacked,
}

impl Behavior {
    pub fn is_attackable(self) -> bool {
        !matches!(self, Behavior::Friendly | Behavior::Shopkeeper)
    }

    pub fn retaliates(self) -> bool {
        matches!(
            self,
            Behavior::Guard | Behavior::AttackOnSight | Behavior::AttackWhenAttacked
        )
    }

    pub fn wanders(self) -> bool {
        !matches!(self, Behavior::Shopkeeper)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LootEntry {
    pub item: u32,
    pub quantity: u32,
    /// Chance in percent that this entry drops
    pub chance: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcTemplate {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub sprite: u16,
    pub behavior: Behavior,
    pub strength: u32,
    pub defense: u32,
    pub max_health: u32,
    #[serde(default)]
    pub experience: u64,
    /// Tiles within which the NPC notices players
    #[serde(default = "default_sight")]
    pub sight: u16,
    #[serde(default = "default_spawn_delay")]
    pub spawn_delay_ms: u64,
    #[serde(default)]
    pub loot: Vec<LootEntry>,
}

fn default_sight() -> u16 {
    5
}

fn default_spawn_delay() -> u64 {
    10_000
}

impl NpcTemplate {
    /// Protection the NPC applies against incoming player hits
    pub fn protection(&self) -> u32 {
        self.defense / 5
    }

    /// Rolls the loot table once
    pub fn roll_loot(&self, rng: &mut impl Rng) -> Vec<(u32, u32)> {
        self.loot
            .iter()
            .filter(|entry| rng.gen_range(0..100) < entry.chance)
            .map(|entry| (entry.item, entry.quantity))
            .collect()
    }
}

/// Static behavior of one tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tile {
    Walkable,
    Blocked,
    /// Stepping on it moves the player to another location
    Warp { map: String, x: u16, y: u16 },
    /// Passable only while open; opened by a player holding the key item
    Door { key: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarpDefinition {
    pub x: u16,
    pub y: u16,
    pub map: String,
    pub to_x: u16,
    pub to_y: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoorDefinition {
    pub x: u16,
    pub y: u16,
    pub key: u32,
}

/// Map as written in content files
///
/// `rows` uses `.` for walkable and `#` for blocked tiles. Warps and doors are
/// listed separately and overlay the grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapDefinition {
    pub name: String,
    #[serde(default)]
    pub pvp: bool,
    pub rows: Vec<String>,
    #[serde(default)]
    pub warps: Vec<WarpDefinition>,
    #[serde(default)]
    pub doors: Vec<DoorDefinition>,
    /// NPC template per NPC slot
    #[serde(default)]
    pub npcs: Vec<u32>,
}

/// Tile grid of one map
#[derive(Debug, Clone)]
pub struct Terrain {
    width: u16,
    height: u16,
    tiles: Vec<Tile>,
}

impl Terrain {
    pub fn new(width: u16, height: u16, tiles: Vec<Tile>) -> Self {
        assert_eq!(tiles.len(), width as usize * height as usize);
        Self {
            width,
            height,
            tiles,
        }
    }

    /// Open terrain of the given size, handy for tests
    pub fn open(width: u16, height: u16) -> Self {
        Self::new(
            width,
            height,
            vec![Tile::Walkable; width as usize * height as usize],
        )
    }

    pub fn from_definition(definition: &MapDefinition) -> Result<Self, ContentError> {
        let invalid = |reason: String| ContentError::InvalidMap {
            map: definition.name.clone(),
            reason,
        };

        let height = definition.rows.len();
        let width = definition.rows.first().map(|row| row.len()).unwrap_or(0);
        if width == 0 || height == 0 || width > u16::MAX as usize || height > u16::MAX as usize {
            return Err(invalid(format!("bad dimensions {}x{}", width, height)));
        }

        let mut tiles = Vec::with_capacity(width * height);
        for (y, row) in definition.rows.iter().enumerate() {
            if row.len() != width {
                return Err(invalid(format!("row {} has {} tiles", y, row.len())));
            }
            for c in row.chars() {
                tiles.push(match c {
                    '.' => Tile::Walkable,
                    '#' => Tile::Blocked,
                    other => return Err(invalid(format!("unknown tile '{}'", other))),
                });
            }
        }

        let mut terrain = Self::new(width as u16, height as u16, tiles);
        for warp in &definition.warps {
            let index = terrain
                .index(warp.x, warp.y)
                .ok_or_else(|| invalid(format!("warp at {},{} out of bounds", warp.x, warp.y)))?;
            terrain.tiles[index] = Tile::Warp {
                map: warp.map.clone(),
                x: warp.to_x,
                y: warp.to_y,
            };
        }
        for door in &definition.doors {
            let index = terrain
                .index(door.x, door.y)
                .ok_or_else(|| invalid(format!("door at {},{} out of bounds", door.x, door.y)))?;
            terrain.tiles[index] = Tile::Door { key: door.key };
        }
        Ok(terrain)
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    fn index(&self, x: u16, y: u16) -> Option<usize> {
        if x < self.width && y < self.height {
            Some(y as usize * self.width as usize + x as usize)
        } else {
            None
        }
    }

    pub fn tile(&self, x: u16, y: u16) -> Option<&Tile> {
        self.index(x, y).map(|index| &self.tiles[index])
    }

    pub fn set_tile(&mut self, x: u16, y: u16, tile: Tile) {
        if let Some(index) = self.index(x, y) {
            self.tiles[index] = tile;
        }
    }

    /// True for tiles an entity may stand on, ignoring door state
    pub fn is_walkable(&self, x: u16, y: u16) -> bool {
        matches!(
            self.tile(x, y),
            Some(Tile::Walkable) | Some(Tile::Warp { .. })
        )
    }

    /// Neighbor of `(x, y)` one step in `direction`, if inside the grid
    pub fn step(&self, x: u16, y: u16, direction: shared::Direction) -> Option<(u16, u16)> {
        let (dx, dy) = direction.offset();
        let nx = x as i32 + dx;
        let ny = y as i32 + dy;
        if nx < 0 || ny < 0 || nx >= self.width as i32 || ny >= self.height as i32 {
            return None;
        }
        Some((nx as u16, ny as u16))
    }
}

/// The whole read-only content catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    pub items: Vec<ItemTemplate>,
    pub npcs: Vec<NpcTemplate>,
    pub maps: Vec<MapDefinition>,
    #[serde(skip)]
    item_index: HashMap<u32, usize>,
    #[serde(skip)]
    npc_index: HashMap<u32, usize>,
}

impl Content {
    pub fn new(
        items: Vec<ItemTemplate>,
        npcs: Vec<NpcTemplate>,
        maps: Vec<MapDefinition>,
    ) -> Result<Self, ContentError> {
        let mut content = Self {
            items,
            npcs,
            maps,
            item_index: HashMap::new(),
            npc_index: HashMap::new(),
        };
        content.reindex()?;
        Ok(content)
    }

    pub fn load(path: &Path) -> Result<Self, ContentError> {
        let text = std::fs::read_to_string(path)?;
        let mut content: Content = serde_json::from_str(&text)?;
        content.reindex()?;
        Ok(content)
    }

    fn reindex(&mut self) -> Result<(), ContentError> {
        self.item_index = self
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| (item.id, index))
            .collect();
        self.npc_index = self
            .npcs
            .iter()
            .enumerate()
            .map(|(index, npc)| (npc.id, index))
            .collect();

        for map in &self.maps {
            Terrain::from_definition(map)?;
            for &id in &map.npcs {
                if self.npc(id).is_none() {
                    return Err(ContentError::UnknownTemplate { kind: "npc", id });
                }
            }
        }
        for npc in &self.npcs {
            for entry in &npc.loot {
                let Some(item) = self.item(entry.item) else {
                    return Err(ContentError::UnknownTemplate {
                        kind: "item",
                        id: entry.item,
                    });
                };
                // Non-stackable items only ever drop one at a time
                if entry.quantity == 0 || (!item.stackable && entry.quantity > 1) {
                    return Err(ContentError::InvalidLoot {
                        npc: npc.id,
                        item: entry.item,
                        quantity: entry.quantity,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn item(&self, id: u32) -> Option<&ItemTemplate> {
        self.item_index.get(&id).map(|&index| &self.items[index])
    }

    pub fn npc(&self, id: u32) -> Option<&NpcTemplate> {
        self.npc_index.get(&id).map(|&index| &self.npcs[index])
    }

    /// Small catalog used when no content file is configured
    pub fn builtin() -> Self {
        let items = vec![
            ItemTemplate {
                id: 1,
                name: "Gold".to_string(),
                kind: ItemKind::Currency,
                max_durability: 0,
                stackable: true,
            },
            ItemTemplate {
                id: 2,
                name: "Bronze Sword".to_string(),
                kind: ItemKind::Weapon { damage: 4 },
                max_durability: 60,
                stackable: false,
            },
            ItemTemplate {
                id: 3,
                name: "Leather Armor".to_string(),
                kind: ItemKind::Armor { protection: 3 },
                max_durability: 80,
                stackable: false,
            },
            ItemTemplate {
                id: 4,
                name: "Leather Cap".to_string(),
                kind: ItemKind::Helmet { protection: 1 },
                max_durability: 80,
                stackable: false,
            },
            ItemTemplate {
                id: 5,
                name: "Buckler".to_string(),
                kind: ItemKind::Shield { block_chance: 10 },
                max_durability: 50,
                stackable: false,
            },
            ItemTemplate {
                id: 6,
                name: "Red Potion".to_string(),
                kind: ItemKind::Potion {
                    health: 40,
                    mana: 0,
                    stamina: 10,
                },
                max_durability: 0,
                stackable: true,
            },
            ItemTemplate {
                id: 7,
                name: "Gate Key".to_string(),
                kind: ItemKind::Key,
                max_durability: 0,
                stackable: false,
            },
        ];

        let npcs = vec![
            NpcTemplate {
                id: 1,
                name: "Merchant".to_string(),
                sprite: 20,
                behavior: Behavior::Shopkeeper,
                strength: 0,
                defense: 0,
                max_health: 100,
                experience: 0,
                sight: 0,
                spawn_delay_ms: 10_000,
                loot: Vec::new(),
            },
            NpcTemplate {
                id: 2,
                name: "Town Guard".to_string(),
                sprite: 21,
                behavior: Behavior::Guard,
                strength: 30,
                defense: 40,
                max_health: 400,
                experience: 50,
                sight: 6,
                spawn_delay_ms: 30_000,
                loot: Vec::new(),
            },
            NpcTemplate {
                id: 3,
                name: "Wolf".to_string(),
                sprite: 30,
                behavior: Behavior::AttackOnSight,
                strength: 12,
                defense: 5,
                max_health: 60,
                experience: 25,
                sight: 5,
                spawn_delay_ms: 8_000,
                loot: vec![
                    LootEntry {
                        item: 1,
                        quantity: 5,
                        chance: 80,
                    },
                    LootEntry {
                        item: 6,
                        quantity: 1,
                        chance: 25,
                    },
                ],
            },
            NpcTemplate {
                id: 4,
                name: "Deer".to_string(),
                sprite: 31,
                behavior: Behavior::AttackWhenAttacked,
                strength: 4,
                defense: 2,
                max_health: 30,
                experience: 8,
                sight: 3,
                spawn_delay_ms: 6_000,
                loot: Vec::new(),
            },
        ];

        let town_rows = [
            "####################",
            "#..................#",
            "#..................#",
            "#..................#",
            "#..................#",
            "#..................#",
            "#..................#",
            "#..................#",
            "#..................#",
            "#..................#",
            "#..................#",
            "##########.#########",
        ];
        let forest_rows = [
            "#########.##########",
            "#......#...........#",
            "#......#...........#",
            "#......#...........#",
            "#..................#",
            "#..................#",
            "#.......####.......#",
            "#..................#",
            "#..................#",
            "####################",
        ];

        let maps = vec![
            MapDefinition {
                name: "Town".to_string(),
                pvp: false,
                rows: town_rows.iter().map(|row| row.to_string()).collect(),
                warps: vec![WarpDefinition {
                    x: 10,
                    y: 11,
                    map: "Forest".to_string(),
                    to_x: 9,
                    to_y: 1,
                }],
                doors: Vec::new(),
                npcs: vec![1, 2],
            },
            MapDefinition {
                name: "Forest".to_string(),
                pvp: true,
                rows: forest_rows.iter().map(|row| row.to_string()).collect(),
                warps: vec![WarpDefinition {
                    x: 9,
                    y: 0,
                    map: "Town".to_string(),
                    to_x: 10,
                    to_y: 10,
                }],
                doors: vec![DoorDefinition { x: 7, y: 4, key: 7 }],
                npcs: vec![3, 3, 4],
            },
        ];

        // The built-in catalog is consistent by construction
        match Self::new(items, npcs, maps) {
            Ok(content) => content,
            Err(e) => panic!("built-in content is invalid: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Direction;

    #[test]
    fn test_builtin_content_is_consistent() {
        let content = Content::builtin();
        assert!(content.item(2).is_some());
        assert_eq!(content.npc(3).map(|npc| npc.behavior), Some(Behavior::AttackOnSight));
        assert_eq!(content.maps.len(), 2);
    }

    #[test]
    fn test_terrain_overlays_warps_and_doors() {
        let content = Content::builtin();
        let forest = content.maps.iter().find(|m| m.name == "Forest").unwrap();
        let terrain = Terrain::from_definition(forest).unwrap();

        assert_eq!(terrain.width(), 20);
        assert_eq!(terrain.height(), 10);
        assert_eq!(terrain.tile(7, 4), Some(&Tile::Door { key: 7 }));
        assert!(matches!(terrain.tile(9, 0), Some(Tile::Warp { map, .. }) if map == "Town"));
        assert!(!terrain.is_walkable(0, 0));
        assert!(terrain.is_walkable(1, 1));
        assert!(!terrain.is_walkable(7, 4));
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let definition = MapDefinition {
            name: "Broken".to_string(),
            pvp: false,
            rows: vec!["...".to_string(), "..".to_string()],
            warps: Vec::new(),
            doors: Vec::new(),
            npcs: Vec::new(),
        };
        assert!(matches!(
            Terrain::from_definition(&definition),
            Err(ContentError::InvalidMap { .. })
        ));
    }

    #[test]
    fn test_unknown_npc_template_is_rejected() {
        let maps = vec![MapDefinition {
            name: "Empty".to_string(),
            pvp: false,
            rows: vec!["...".to_string()],
            warps: Vec::new(),
            doors: Vec::new(),
            npcs: vec![42],
        }];
        assert!(matches!(
            Content::new(Vec::new(), Vec::new(), maps),
            Err(ContentError::UnknownTemplate { kind: "npc", id: 42 })
        ));
    }

    #[test]
    fn test_content_parses_from_json() {
        let json = r#"{
            "items": [{"id": 1, "name": "Gold", "kind": {"type": "Currency"}, "stackable": true}],
            "npcs": [{"id": 9, "name": "Rat", "behavior": "AttackOnSight",
                      "strength": 2, "defense": 0, "max_health": 5,
                      "loot": [{"item": 1, "quantity": 1, "chance": 100}]}],
            "maps": [{"name": "Cellar", "rows": ["...", ".#."], "npcs": [9]}]
        }"#;
        let mut content: Content = serde_json::from_str(json).unwrap();
        content.reindex().unwrap();
        let rat = content.npc(9).unwrap();
        assert_eq!(rat.sight, 5);
        assert_eq!(rat.spawn_delay_ms, 10_000);
        assert_eq!(content.item(1).map(|i| i.stackable), Some(true));
    }

    #[test]
    fn test_non_stackable_loot_stack_is_rejected() {
        let json = r#"{
            "items": [{"id": 2, "name": "Sword", "kind": {"type": "Weapon", "damage": 3}}],
            "npcs": [{"id": 9, "name": "Rat", "behavior": "AttackOnSight",
                      "strength": 2, "defense": 0, "max_health": 5,
                      "loot": [{"item": 2, "quantity": 3, "chance": 100}]}],
            "maps": [{"name": "Cellar", "rows": ["..."], "npcs": [9]}]
        }"#;
        let path = std::env::temp_dir().join(format!("rpg-loot-{}.json", std::process::id()));
        std::fs::write(&path, json).unwrap();
        let result = Content::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            result,
            Err(ContentError::InvalidLoot {
                npc: 9,
                item: 2,
                quantity: 3
            })
        ));
    }

    #[test]
    fn test_step_stays_inside_grid() {
        let terrain = Terrain::open(3, 3);
        assert_eq!(terrain.step(0, 0, Direction::Left), None);
        assert_eq!(terrain.step(0, 0, Direction::Down), Some((0, 1)));
        assert_eq!(terrain.step(2, 2, Direction::Right), None);
    }

    #[test]
    fn test_guaranteed_loot_always_drops() {
        let content = Content::builtin();
        let mut template = content.npc(3).unwrap().clone();
        for entry in &mut template.loot {
            entry.chance = 100;
        }
        let mut rng = rand::thread_rng();
        assert_eq!(template.roll_loot(&mut rng), vec![(1, 5), (6, 1)]);
    }
}
