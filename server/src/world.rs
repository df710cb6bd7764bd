//! Registry of every map and of which map each session is on

use crate::config::Location;
use crate::content::{Content, ContentError};
use crate::map::{Map, MapEvent, Player, Rules};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Packet, SessionId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub struct World {
    maps: BTreeMap<String, Map>,
    locations: HashMap<SessionId, String>,
    respawn: Location,
}

impl World {
    /// Builds every map of the catalog; each map gets its own generator
    /// derived from `seed`
    pub fn new(content: Arc<Content>, rules: Rules, seed: u64) -> Result<Self, ContentError> {
        let mut seeder = StdRng::seed_from_u64(seed);
        let mut maps = BTreeMap::new();
        for definition in &content.maps {
            let rng = StdRng::seed_from_u64(seeder.gen());
            let map = Map::new(definition, content.clone(), rules.clone(), rng)?;
            maps.insert(definition.name.clone(), map);
        }
        if maps.is_empty() {
            return Err(ContentError::NoMaps);
        }
        info!("World loaded with {} maps", maps.len());
        Ok(Self {
            maps,
            locations: HashMap::new(),
            respawn: rules.respawn,
        })
    }

    pub fn map(&self, name: &str) -> Option<&Map> {
        self.maps.get(name)
    }

    pub fn maps(&self) -> impl Iterator<Item = &Map> {
        self.maps.values()
    }

    /// Map the session's character is on
    pub fn map_of(&self, session: SessionId) -> Option<&Map> {
        self.maps.get(self.locations.get(&session)?)
    }

    pub fn map_of_mut(&mut self, session: SessionId) -> Option<&mut Map> {
        self.maps.get_mut(self.locations.get(&session)?)
    }

    pub fn player(&self, session: SessionId) -> Option<&Player> {
        self.map_of(session)?.player(session)
    }

    pub fn player_mut(&mut self, session: SessionId) -> Option<&mut Player> {
        self.map_of_mut(session)?.player_mut(session)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.maps.values().flat_map(|map| map.players())
    }

    /// Session playing the character called `name`, ignoring case
    pub fn find_player(&self, name: &str) -> Option<SessionId> {
        self.players()
            .find(|p| p.character.name.eq_ignore_ascii_case(name))
            .map(|p| p.session)
    }

    pub fn player_count(&self) -> usize {
        self.locations.len()
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        self.locations.keys().copied().collect()
    }

    /// Puts a player on the map named by `location`
    ///
    /// Unknown maps fall back to the respawn map, then to the first map.
    pub fn add_player(&mut self, mut player: Player, location: &Location) {
        let target = if self.maps.contains_key(&location.map) {
            location.clone()
        } else {
            warn!(
                "{} sent to unknown map {}, using respawn point",
                player.character.name, location.map
            );
            if self.maps.contains_key(&self.respawn.map) {
                self.respawn.clone()
            } else {
                // `new` guarantees at least one map
                let Some(first) = self.maps.keys().next() else {
                    return;
                };
                Location::new(first.clone(), 0, 0)
            }
        };

        player.character.x = target.x;
        player.character.y = target.y;
        let session = player.session;
        if let Some(map) = self.maps.get_mut(&target.map) {
            map.add(player);
            self.locations.insert(session, target.map);
        }
    }

    pub fn remove_player(&mut self, session: SessionId) -> Option<Player> {
        let name = self.locations.remove(&session)?;
        self.maps.get_mut(&name)?.remove(session)
    }

    /// Moves a player to another location, on the same map or a different one
    pub fn transfer(&mut self, session: SessionId, location: &Location) -> bool {
        match self.remove_player(session) {
            Some(player) => {
                self.add_player(player, location);
                true
            }
            None => false,
        }
    }

    /// Sends a packet to every player in the world
    pub fn send_all<P: Packet>(&self, packet: &P) {
        for map in self.maps.values() {
            map.send(packet);
        }
    }

    /// Runs one tick on every map, then applies what the maps queued
    pub fn update(&mut self, now: u64) {
        for map in self.maps.values_mut() {
            map.update(now);
        }
        self.process_events();
    }

    /// Applies cross-map effects queued by request handlers or ticks
    pub fn process_events(&mut self) {
        loop {
            let events: Vec<MapEvent> = self
                .maps
                .values_mut()
                .flat_map(|map| map.take_events())
                .collect();
            if events.is_empty() {
                return;
            }
            for event in events {
                match event {
                    MapEvent::Transfer { player, location } => {
                        debug!("{} transfers to {}", player.character.name, location.map);
                        self.locations.remove(&player.session);
                        self.add_player(*player, &location);
                    }
                    MapEvent::GrantExperience { session, amount } => {
                        if let Some(map) = self.map_of_mut(session) {
                            map.grant_experience(session, amount);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::CharacterInfo;
    use crate::client_manager::Outgoing;
    use shared::packets::{unescape, DespawnPlayerCommand, JoinMapCommand, PlayerPositionCommand};
    use shared::{Direction, Job, MovementType, PacketReader};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn world() -> World {
        World::new(Arc::new(Content::builtin()), Rules::default(), 42).unwrap()
    }

    /// A world whose randomly placed NPCs leave the given tiles free
    fn world_clear_of(tiles: &[(&str, u16, u16)]) -> World {
        (0u64..)
            .map(|seed| World::new(Arc::new(Content::builtin()), Rules::default(), seed).unwrap())
            .find(|world| {
                tiles.iter().all(|&(name, x, y)| {
                    world
                        .map(name)
                        .is_some_and(|map| map.npcs().iter().all(|n| n.position() != (x, y)))
                })
            })
            .unwrap()
    }

    fn player(session: SessionId, name: &str) -> (Player, UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let character = CharacterInfo::new(name, name, Job::Rogue, 2, "Town", 5, 5);
        (Player::new(session, character, tx, 0), rx)
    }

    fn ids(rx: &mut UnboundedReceiver<Outgoing>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(Outgoing::Frame(frame)) = rx.try_recv() {
            let body = unescape(&frame[..frame.len() - 1]).unwrap();
            ids.push(PacketReader::new(&body).read_string().unwrap());
        }
        ids
    }

    #[test]
    fn test_add_and_find_player() {
        let mut world = world_clear_of(&[("Town", 5, 5)]);
        let (hero, _rx) = player(1, "Hero");
        world.add_player(hero, &Location::new("Town", 5, 5));

        assert_eq!(world.player_count(), 1);
        assert_eq!(world.find_player("hero"), Some(1));
        assert_eq!(world.map_of(1).map(|m| m.name()), Some("Town"));
        assert_eq!(world.player(1).map(|p| p.position()), Some((5, 5)));
    }

    #[test]
    fn test_unknown_map_falls_back_to_respawn() {
        let mut world = world();
        let (hero, _rx) = player(1, "Hero");
        world.add_player(hero, &Location::new("Atlantis", 1, 1));
        assert_eq!(world.player(1).map(|p| p.character.map.as_str()), Some("Town"));
    }

    #[test]
    fn test_transfer_between_maps() {
        let mut world = world();
        let (hero, mut hero_rx) = player(1, "Hero");
        let (other, mut other_rx) = player(2, "Other");
        world.add_player(hero, &Location::new("Town", 5, 5));
        world.add_player(other, &Location::new("Town", 6, 5));
        ids(&mut hero_rx);
        ids(&mut other_rx);

        assert!(world.transfer(1, &Location::new("Forest", 2, 2)));
        assert_eq!(world.map_of(1).map(|m| m.name()), Some("Forest"));
        assert_eq!(world.map("Town").map(|m| m.player_count()), Some(1));
        assert_eq!(ids(&mut hero_rx)[0], JoinMapCommand::ID);
        assert!(ids(&mut other_rx).contains(&DespawnPlayerCommand::ID.to_string()));
        assert!(!world.transfer(9, &Location::new("Forest", 2, 2)));
    }

    #[test]
    fn test_warp_tile_moves_player_to_destination() {
        let mut world = world_clear_of(&[("Town", 10, 10), ("Forest", 9, 1)]);
        let (hero, mut rx) = player(1, "Hero");
        // The Town warp to the Forest sits at (10, 11)
        world.add_player(hero, &Location::new("Town", 10, 10));
        ids(&mut rx);

        let outcome = world
            .map_of_mut(1)
            .map(|map| map.move_player(1, Direction::Down, MovementType::Walk, 10, 10, 1_000));
        assert_eq!(outcome, Some(crate::map::MoveOutcome::Warped));
        world.process_events();

        assert_eq!(world.map_of(1).map(|m| m.name()), Some("Forest"));
        assert_eq!(world.player(1).map(|p| p.position()), Some((9, 1)));
        let received = ids(&mut rx);
        assert!(received.contains(&JoinMapCommand::ID.to_string()));
        assert!(!received.contains(&PlayerPositionCommand::ID.to_string()));
    }

    #[test]
    fn test_remove_player_forgets_location() {
        let mut world = world();
        let (hero, _rx) = player(1, "Hero");
        world.add_player(hero, &Location::new("Town", 5, 5));
        assert!(world.remove_player(1).is_some());
        assert!(world.remove_player(1).is_none());
        assert_eq!(world.player_count(), 0);
        assert!(world.sessions().is_empty());
    }

    #[test]
    fn test_same_seed_builds_same_world() {
        let a = world();
        let b = world();
        let positions = |w: &World| -> Vec<(u16, u16)> {
            w.maps().flat_map(|m| m.npcs().iter().map(|n| n.position())).collect()
        };
        assert_eq!(positions(&a), positions(&b));
    }
}
