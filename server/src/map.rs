//! A single simulation cell: its players, NPC slots, item drops and doors
//!
//! Every broadcast goes only to players present on the map. Effects that
//! reach beyond the map (a player leaving through a warp or after death,
//! experience for a partner elsewhere) are queued as [`MapEvent`]s and
//! applied by the [`World`](crate::world::World).

use crate::character::CharacterInfo;
use crate::client_manager::{Outbox, Outgoing};
use crate::combat::{self, REGEN_INTERVAL_MS};
use crate::config::{Location, ServerConfig};
use crate::content::{Content, ContentError, MapDefinition, Terrain, Tile};
use crate::inventory::{self, ItemError, ItemUse};
use crate::npc::{Action, Npc, Sighting};
use crate::pathfinding;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use shared::packets::*;
use shared::{
    ChatChannel, Direction, EquipmentSlot, ItemStack, MovementType, Packet, SessionId, StatKind,
    TargetKind,
};
use std::collections::HashMap;
use std::sync::Arc;

pub const MAX_MAP_ITEMS: usize = 100;
pub const WALK_COOLDOWN_MS: u64 = 200;
pub const RUN_COOLDOWN_MS: u64 = 120;
pub const RUN_STAMINA_COST: u32 = 2;
pub const PLAYER_ATTACK_COOLDOWN_MS: u64 = 1_000;
/// How long a key door stays open
pub const DOOR_OPEN_MS: u64 = 5_000;

/// World-wide combat and death settings every map applies
#[derive(Debug, Clone)]
pub struct Rules {
    pub respawn: Location,
    pub death_exp_penalty_percent: u32,
    pub kill_exp_percent: u32,
}

impl Rules {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            respawn: config.respawn.clone(),
            death_exp_penalty_percent: config.death_exp_penalty_percent,
            kill_exp_percent: config.kill_exp_percent,
        }
    }
}

impl Default for Rules {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// A character while it is in the game
#[derive(Debug)]
pub struct Player {
    pub session: SessionId,
    pub character: CharacterInfo,
    pub outbox: Outbox,
    pub attack_ready_at: u64,
    pub move_ready_at: u64,
    pub regen_at: u64,
    /// Session of the party partner
    pub party: Option<SessionId>,
    /// Session that invited this player and awaits an answer
    pub pending_invite: Option<SessionId>,
    pub player_killer: bool,
}

impl Player {
    pub fn new(session: SessionId, character: CharacterInfo, outbox: Outbox, now: u64) -> Self {
        Self {
            session,
            character,
            outbox,
            attack_ready_at: now,
            move_ready_at: now,
            regen_at: now + REGEN_INTERVAL_MS,
            party: None,
            pending_invite: None,
            player_killer: false,
        }
    }

    pub fn send<P: Packet>(&self, packet: &P) {
        let _ = self.outbox.send(Outgoing::packet(packet));
    }

    pub fn position(&self) -> (u16, u16) {
        (self.character.x, self.character.y)
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.character.snapshot(self.session, self.player_killer)
    }

    pub fn data_command(&self) -> PlayerDataCommand {
        PlayerDataCommand {
            snapshot: self.snapshot(),
            stats: self.character.stats,
            stat_points: self.character.stat_points,
            experience: self.character.experience,
            next_level: combat::next_level(self.character.level),
        }
    }

    pub fn vitals_command(&self) -> PlayerVitalsCommand {
        let character = &self.character;
        PlayerVitalsCommand {
            session: self.session,
            health: character.vitals.health,
            max_health: character.max_health(),
            mana: character.vitals.mana,
            max_mana: character.max_mana(),
            stamina: character.vitals.stamina,
            max_stamina: character.max_stamina(),
        }
    }

    pub fn progress_command(&self) -> ProgressCommand {
        let character = &self.character;
        ProgressCommand {
            level: character.level,
            experience: character.experience,
            next_level: combat::next_level(character.level),
            stat_points: character.stat_points,
            stats: character.stats,
        }
    }

    pub fn send_inventory(&self) {
        self.send(&inventory::inventory_command(&self.character));
        self.send(&inventory::equipment_command(&self.character));
    }

    pub fn alert(&self, message: &str) {
        self.send(&ChatCommand {
            channel: ChatChannel::System,
            from: String::new(),
            message: message.to_string(),
        });
    }
}

/// An item lying on a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapItem {
    pub stack: ItemStack,
    pub x: u16,
    pub y: u16,
}

impl MapItem {
    fn snapshot(&self) -> MapItemSnapshot {
        MapItemSnapshot {
            item: self.stack.item,
            quantity: self.stack.quantity,
            x: self.x,
            y: self.y,
        }
    }
}

#[derive(Debug)]
pub enum MapEvent {
    /// The player already left this map and must be added at `location`
    Transfer {
        player: Box<Player>,
        location: Location,
    },
    /// Experience for a player who may be on another map
    GrantExperience { session: SessionId, amount: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// The mover was resynchronized to its authoritative position
    Rejected,
    /// The mover stepped on a warp and left the map
    Warped,
}

pub struct Map {
    name: String,
    pvp: bool,
    terrain: Terrain,
    content: Arc<Content>,
    rules: Rules,
    players: Vec<Player>,
    npcs: Vec<Npc>,
    items: Vec<Option<MapItem>>,
    /// Open doors and when they close again
    doors: HashMap<(u16, u16), u64>,
    rng: StdRng,
    events: Vec<MapEvent>,
}

impl Map {
    pub fn new(
        definition: &MapDefinition,
        content: Arc<Content>,
        rules: Rules,
        rng: StdRng,
    ) -> Result<Self, ContentError> {
        let terrain = Terrain::from_definition(definition)?;
        let npcs = definition
            .npcs
            .iter()
            .enumerate()
            .map(|(index, &id)| {
                content
                    .npc(id)
                    .cloned()
                    .map(|template| Npc::new(index as u16, template))
                    .ok_or(ContentError::UnknownTemplate { kind: "npc", id })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut map = Self {
            name: definition.name.clone(),
            pvp: definition.pvp,
            terrain,
            content,
            rules,
            players: Vec::new(),
            npcs,
            items: vec![None; MAX_MAP_ITEMS],
            doors: HashMap::new(),
            rng,
            events: Vec::new(),
        };
        map.repopulate(0);
        Ok(map)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pvp(&self) -> bool {
        self.pvp
    }

    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    pub fn npcs(&self) -> &[Npc] {
        &self.npcs
    }

    pub fn items(&self) -> &[Option<MapItem>] {
        &self.items
    }

    pub fn is_door_open(&self, x: u16, y: u16) -> bool {
        self.doors.contains_key(&(x, y))
    }

    fn index_of(&self, session: SessionId) -> Option<usize> {
        self.players.iter().position(|p| p.session == session)
    }

    pub fn player(&self, session: SessionId) -> Option<&Player> {
        self.players.iter().find(|p| p.session == session)
    }

    pub fn player_mut(&mut self, session: SessionId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.session == session)
    }

    pub fn take_events(&mut self) -> Vec<MapEvent> {
        std::mem::take(&mut self.events)
    }

    /// Sends one packet to every player on the map
    pub fn send<P: Packet>(&self, packet: &P) {
        self.send_if(packet, |_| true);
    }

    /// Sends one packet to the players matching `predicate`, encoding it once
    pub fn send_if<P, F>(&self, packet: &P, predicate: F)
    where
        P: Packet,
        F: Fn(&Player) -> bool,
    {
        let frame = Outgoing::packet(packet);
        for player in self.players.iter().filter(|p| predicate(p)) {
            let _ = player.outbox.send(frame.clone());
        }
    }

    fn tiles(&self) -> impl Iterator<Item = (u16, u16)> {
        let (width, height) = (self.terrain.width(), self.terrain.height());
        (0..height).flat_map(move |y| (0..width).map(move |x| (x, y)))
    }

    fn occupied(&self, x: u16, y: u16) -> bool {
        self.players.iter().any(|p| p.position() == (x, y))
            || self
                .npcs
                .iter()
                .any(|n| n.is_alive() && n.position() == (x, y))
    }

    fn npc_can_enter(&self, x: u16, y: u16) -> bool {
        matches!(self.terrain.tile(x, y), Some(Tile::Walkable)) && !self.occupied(x, y)
    }

    fn player_can_stand(&self, x: u16, y: u16) -> bool {
        self.terrain.is_walkable(x, y) && !self.occupied(x, y)
    }

    fn random_free_tile(&mut self) -> Option<(u16, u16)> {
        let free: Vec<(u16, u16)> = self
            .tiles()
            .filter(|&(x, y)| self.npc_can_enter(x, y))
            .collect();
        free.choose(&mut self.rng).copied()
    }

    fn nearest_free_tile(&self, from: (u16, u16)) -> Option<(u16, u16)> {
        let distance = |(x, y): (u16, u16)| {
            (x as i32 - from.0 as i32).unsigned_abs() + (y as i32 - from.1 as i32).unsigned_abs()
        };
        self.tiles()
            .filter(|&(x, y)| matches!(self.terrain.tile(x, y), Some(Tile::Walkable)))
            .filter(|&(x, y)| !self.occupied(x, y))
            .min_by_key(|&(x, y)| (distance((x, y)), y, x))
    }

    /// Places a player on the map and exchanges snapshots
    ///
    /// The newcomer receives the map header, its own data, every other
    /// player, every live NPC, every item drop and the open doors. The others
    /// receive only the newcomer's spawn.
    pub fn add(&mut self, mut player: Player) {
        let wanted = player.position();
        let (x, y) = if self.player_can_stand(wanted.0, wanted.1) {
            wanted
        } else {
            self.nearest_free_tile(wanted).unwrap_or(wanted)
        };
        player.character.map = self.name.clone();
        player.character.x = x;
        player.character.y = y;

        player.send(&JoinMapCommand {
            map: self.name.clone(),
            width: self.terrain.width(),
            height: self.terrain.height(),
            pvp: self.pvp,
        });
        player.send(&player.data_command());
        player.send(&player.vitals_command());
        player.send_inventory();
        for other in &self.players {
            player.send(&SpawnPlayerCommand {
                snapshot: other.snapshot(),
            });
        }
        for npc in self.npcs.iter().filter(|n| n.is_alive()) {
            player.send(&SpawnNpcCommand {
                snapshot: npc.snapshot(),
            });
        }
        for (index, item) in self.items.iter().enumerate() {
            if let Some(item) = item {
                player.send(&MapItemCommand {
                    index: index as u16,
                    item: Some(item.snapshot()),
                });
            }
        }
        for &(x, y) in self.doors.keys() {
            player.send(&DoorCommand { x, y, open: true });
        }

        self.send(&SpawnPlayerCommand {
            snapshot: player.snapshot(),
        });
        debug!(
            "{} joined {} at {},{}",
            player.character.name, self.name, x, y
        );
        self.players.push(player);
    }

    /// Takes a player off the map and tells the others
    pub fn remove(&mut self, session: SessionId) -> Option<Player> {
        let index = self.index_of(session)?;
        let player = self.players.remove(index);
        self.send(&DespawnPlayerCommand { session });
        Some(player)
    }

    fn transfer_out(&mut self, session: SessionId, location: Location) {
        if let Some(player) = self.remove(session) {
            self.events.push(MapEvent::Transfer {
                player: Box::new(player),
                location,
            });
        }
    }

    /// Validates a step and returns the destination plus effective movement
    fn validate_move(
        &mut self,
        index: usize,
        direction: Direction,
        movement: MovementType,
        claimed: (u16, u16),
        now: u64,
    ) -> Option<(u16, u16, MovementType)> {
        let player = &self.players[index];
        if player.position() != claimed || now < player.move_ready_at {
            return None;
        }
        let (x, y) = self.terrain.step(claimed.0, claimed.1, direction)?;

        let locked_door = match self.terrain.tile(x, y)? {
            Tile::Walkable | Tile::Warp { .. } => None,
            Tile::Blocked => return None,
            Tile::Door { .. } if self.is_door_open(x, y) => None,
            Tile::Door { key } => Some(*key),
        };
        if self.occupied(x, y) {
            return None;
        }
        if let Some(key) = locked_door {
            if !inventory::has_item(&player.character, key) {
                return None;
            }
            self.doors.insert((x, y), now + DOOR_OPEN_MS);
            self.send(&DoorCommand { x, y, open: true });
        }

        let player = &self.players[index];
        let movement = match movement {
            MovementType::Run if player.character.vitals.stamina >= RUN_STAMINA_COST => {
                MovementType::Run
            }
            _ => MovementType::Walk,
        };
        Some((x, y, movement))
    }

    /// Moves a player one tile if the server agrees with the client
    pub fn move_player(
        &mut self,
        session: SessionId,
        direction: Direction,
        movement: MovementType,
        x: u16,
        y: u16,
        now: u64,
    ) -> MoveOutcome {
        let Some(index) = self.index_of(session) else {
            return MoveOutcome::Rejected;
        };
        self.players[index].character.direction = direction;

        let Some((x, y, movement)) = self.validate_move(index, direction, movement, (x, y), now)
        else {
            let player = &self.players[index];
            let (x, y) = player.position();
            player.send(&PlayerPositionCommand { x, y, direction });
            return MoveOutcome::Rejected;
        };

        let player = &mut self.players[index];
        player.character.x = x;
        player.character.y = y;
        player.move_ready_at = now
            + match movement {
                MovementType::Walk => WALK_COOLDOWN_MS,
                MovementType::Run => RUN_COOLDOWN_MS,
            };
        if movement == MovementType::Run {
            player.character.vitals.stamina -= RUN_STAMINA_COST;
            player.send(&player.vitals_command());
        }

        self.send_if(
            &PlayerMoveCommand {
                session,
                x,
                y,
                direction,
                movement,
            },
            |p| p.session != session,
        );

        if let Some(Tile::Warp { map, x, y }) = self.terrain.tile(x, y).cloned() {
            self.transfer_out(session, Location::new(map, x, y));
            return MoveOutcome::Warped;
        }
        MoveOutcome::Moved
    }

    pub fn face(&mut self, session: SessionId, direction: Direction) -> bool {
        let Some(player) = self.player_mut(session) else {
            return false;
        };
        player.character.direction = direction;
        self.send_if(&PlayerDirCommand { session, direction }, |p| {
            p.session != session
        });
        true
    }

    /// Swings at whatever stands on the tile the player faces
    pub fn attack(&mut self, session: SessionId, now: u64) -> bool {
        let Some(index) = self.index_of(session) else {
            return false;
        };
        let player = &mut self.players[index];
        if now < player.attack_ready_at {
            return false;
        }
        player.attack_ready_at = now + PLAYER_ATTACK_COOLDOWN_MS;
        let (x, y) = player.position();
        let direction = player.character.direction;

        self.send_if(&PlayerAttackCommand { session }, |p| p.session != session);

        let Some(target) = self.terrain.step(x, y, direction) else {
            return true;
        };
        if let Some(victim) = self.players.iter().position(|p| p.position() == target) {
            if self.pvp {
                self.hit_player(index, victim);
            }
        } else if let Some(npc) = self
            .npcs
            .iter()
            .position(|n| n.is_alive() && n.position() == target)
        {
            if self.npcs[npc].behavior().is_attackable() {
                self.hit_npc(index, npc, now);
            }
        }
        true
    }

    fn wear_weapon(&mut self, index: usize) {
        let player = &mut self.players[index];
        if combat::consume_weapon(&mut player.character) {
            player.send_inventory();
        }
    }

    fn hit_player(&mut self, attacker: usize, victim: usize) {
        let attacker_session = self.players[attacker].session;
        let victim_session = self.players[victim].session;
        let power = combat::attack_power(&self.players[attacker].character, &self.content);

        let equipment = self.players[victim].character.equipment;
        let hit = combat::strike_player(
            &mut self.players[victim].character,
            &self.content,
            power,
            &mut self.rng,
        );
        if !hit.blocked {
            self.wear_weapon(attacker);
        }

        if !self.players[victim].player_killer && !self.players[attacker].player_killer {
            self.players[attacker].player_killer = true;
            let snapshot = self.players[attacker].snapshot();
            self.send(&SpawnPlayerCommand { snapshot });
        }

        self.send(&DamageCommand {
            target: TargetKind::Player,
            index: victim_session,
            amount: hit.damage,
            blocked: hit.blocked,
        });
        if hit.damage > 0 {
            let vitals = self.players[victim].vitals_command();
            self.send(&vitals);
            if self.players[victim].character.equipment != equipment {
                self.players[victim].send_inventory();
            }
        }

        if !self.players[victim].character.is_alive() {
            let experience =
                combat::kill_experience(&self.players[victim].character, self.rules.kill_exp_percent);
            info!(
                "{} killed {} on {}",
                self.players[attacker].character.name, self.players[victim].character.name, self.name
            );
            self.kill_player(victim);
            self.award_experience(attacker_session, experience);
        }
    }

    fn hit_npc(&mut self, attacker: usize, npc: usize, now: u64) {
        let session = self.players[attacker].session;
        let power = combat::attack_power(&self.players[attacker].character, &self.content);
        let protection = self.npcs[npc].template.protection();
        let hit = combat::roll_hit(power, protection, 0, &mut self.rng);
        self.wear_weapon(attacker);

        self.send(&DamageCommand {
            target: TargetKind::Npc,
            index: npc as u16,
            amount: hit.damage,
            blocked: false,
        });

        if !self.npcs[npc].take_damage(hit.damage, now) {
            self.npcs[npc].provoke(session);
            if hit.damage > 0 {
                let npc = &self.npcs[npc];
                self.send(&NpcVitalsCommand {
                    index: npc.index,
                    health: npc.health,
                    max_health: npc.template.max_health,
                });
            }
            return;
        }

        self.send(&NpcDeadCommand { index: npc as u16 });
        let (x, y) = self.npcs[npc].position();
        let loot = self.npcs[npc].template.roll_loot(&mut self.rng);
        for (item, quantity) in loot {
            let durability = self
                .content
                .item(item)
                .map(|template| template.max_durability)
                .unwrap_or(0);
            self.spawn_item(
                x,
                y,
                ItemStack {
                    item,
                    quantity,
                    durability,
                },
            );
        }
        let experience = self.npcs[npc].template.experience;
        self.award_experience(session, experience);
    }

    /// Applies the death penalty and sends the player to the respawn point
    fn kill_player(&mut self, index: usize) {
        let player = &mut self.players[index];
        let session = player.session;
        let penalty = combat::apply_death_penalty(
            &mut player.character,
            &self.rules.respawn,
            self.rules.death_exp_penalty_percent,
        );
        player.player_killer = false;
        player.alert("You have died.");
        player.send_inventory();
        player.send(&player.progress_command());
        info!(
            "{} died on {} and lost {} experience",
            player.character.name, penalty.map, penalty.lost_experience
        );

        for stack in penalty.dropped {
            self.spawn_item(penalty.x, penalty.y, stack);
        }
        let respawn = self.rules.respawn.clone();
        self.transfer_out(session, respawn);
    }

    /// Kill experience, split evenly with a party partner
    fn award_experience(&mut self, session: SessionId, amount: u64) {
        if amount == 0 {
            return;
        }
        let partner = self.player(session).and_then(|p| p.party);
        let Some(partner) = partner else {
            self.grant_experience(session, amount);
            return;
        };
        let share = amount / 2;
        self.grant_experience(session, share);
        if self.index_of(partner).is_some() {
            self.grant_experience(partner, share);
        } else {
            self.events.push(MapEvent::GrantExperience {
                session: partner,
                amount: share,
            });
        }
    }

    pub fn grant_experience(&mut self, session: SessionId, amount: u64) {
        let Some(player) = self.player_mut(session) else {
            return;
        };
        let levels = combat::grant_experience(&mut player.character, amount);
        player.send(&player.progress_command());
        if levels > 0 {
            info!(
                "{} reached level {}",
                player.character.name, player.character.level
            );
            let vitals = player.vitals_command();
            self.send(&vitals);
        }
    }

    /// Puts an item on a tile; `None` when every item slot is taken
    pub fn spawn_item(&mut self, x: u16, y: u16, stack: ItemStack) -> Option<u16> {
        let Some(index) = self.items.iter().position(Option::is_none) else {
            debug!("{}: no free item slot for item {}", self.name, stack.item);
            return None;
        };
        let item = MapItem { stack, x, y };
        self.items[index] = Some(item);
        self.send(&MapItemCommand {
            index: index as u16,
            item: Some(item.snapshot()),
        });
        Some(index as u16)
    }

    pub fn drop_item(
        &mut self,
        session: SessionId,
        slot: u8,
        quantity: u32,
    ) -> Result<(), ItemError> {
        let Some(index) = self.index_of(session) else {
            return Ok(());
        };
        let player = &mut self.players[index];
        let stack = inventory::take_item(&mut player.character, slot as usize, quantity)?;
        let (x, y) = player.position();
        player.send_inventory();

        if self.spawn_item(x, y, stack).is_none() {
            let player = &mut self.players[index];
            inventory::give_item(
                &mut player.character,
                &self.content,
                stack.item,
                stack.quantity,
                Some(stack.durability),
            )?;
            player.send_inventory();
            player.alert("There is no room to drop that here.");
        }
        Ok(())
    }

    /// Picks up the first item on the player's tile
    pub fn pickup(&mut self, session: SessionId) -> bool {
        let Some(index) = self.index_of(session) else {
            return false;
        };
        let position = self.players[index].position();
        let Some((slot, item)) = self
            .items
            .iter()
            .enumerate()
            .find_map(|(slot, item)| match item {
                Some(item) if (item.x, item.y) == position => Some((slot, *item)),
                _ => None,
            })
        else {
            return false;
        };

        let player = &mut self.players[index];
        match inventory::give_items(
            &mut player.character,
            &self.content,
            item.stack.item,
            item.stack.quantity,
            Some(item.stack.durability),
        ) {
            Ok(given) => {
                player.send_inventory();
                let left = item.stack.quantity - given;
                if left > 0 {
                    player.alert("Your inventory is full.");
                }
                let remaining = self.items[slot].as_mut().and_then(|ground| {
                    ground.stack.quantity = left;
                    (left > 0).then(|| ground.snapshot())
                });
                if remaining.is_none() {
                    self.items[slot] = None;
                }
                self.send(&MapItemCommand {
                    index: slot as u16,
                    item: remaining,
                });
                true
            }
            Err(ItemError::InventoryFull) => {
                player.alert("Your inventory is full.");
                false
            }
            Err(e) => {
                debug!("{}: pickup of item {} failed: {}", self.name, item.stack.item, e);
                false
            }
        }
    }

    pub fn use_item(&mut self, session: SessionId, slot: u8) -> Result<(), ItemError> {
        let Some(index) = self.index_of(session) else {
            return Ok(());
        };
        let player = &mut self.players[index];
        match inventory::use_item(&mut player.character, &self.content, slot as usize)? {
            ItemUse::Consumed => {
                player.send_inventory();
                let vitals = player.vitals_command();
                self.send(&vitals);
            }
            ItemUse::Equipped(_) | ItemUse::Unequipped(_) => {
                player.send(&inventory::equipment_command(&player.character));
            }
        }
        Ok(())
    }

    pub fn unequip(&mut self, session: SessionId, slot: EquipmentSlot) -> bool {
        let Some(player) = self.player_mut(session) else {
            return false;
        };
        let changed = inventory::unequip(&mut player.character, slot);
        if changed {
            player.send(&inventory::equipment_command(&player.character));
        }
        changed
    }

    pub fn train_stat(&mut self, session: SessionId, stat: StatKind) -> bool {
        let Some(player) = self.player_mut(session) else {
            return false;
        };
        if !combat::train_stat(&mut player.character, stat) {
            return false;
        }
        player.send(&player.progress_command());
        let vitals = player.vitals_command();
        self.send(&vitals);
        true
    }

    /// Respawns every NPC slot on a random free tile
    pub fn repopulate(&mut self, now: u64) {
        for index in 0..self.npcs.len() {
            self.respawn_npc(index, now);
        }
    }

    fn respawn_npc(&mut self, index: usize, now: u64) {
        match self.random_free_tile() {
            Some((x, y)) => {
                self.npcs[index].respawn(x, y, now);
                let snapshot = self.npcs[index].snapshot();
                self.send(&SpawnNpcCommand { snapshot });
            }
            // Retry after another spawn delay
            None => self.npcs[index].kill(now),
        }
    }

    /// Advances the map by one tick; maps without players do nothing
    pub fn update(&mut self, now: u64) {
        if self.players.is_empty() {
            return;
        }
        self.close_doors(now);
        self.regenerate_players(now);
        for index in 0..self.npcs.len() {
            self.update_npc(index, now);
        }
    }

    fn close_doors(&mut self, now: u64) {
        let expired: Vec<(u16, u16)> = self
            .doors
            .iter()
            .filter(|&(_, &close_at)| now >= close_at)
            .map(|(&position, _)| position)
            .collect();
        for (x, y) in expired {
            self.doors.remove(&(x, y));
            self.send(&DoorCommand { x, y, open: false });
        }
    }

    fn regenerate_players(&mut self, now: u64) {
        for index in 0..self.players.len() {
            let player = &mut self.players[index];
            if now < player.regen_at {
                continue;
            }
            player.regen_at = now + REGEN_INTERVAL_MS;
            if combat::regenerate(&mut player.character) {
                let vitals = player.vitals_command();
                self.send(&vitals);
            }
        }
    }

    fn update_npc(&mut self, index: usize, now: u64) {
        let sightings: Vec<Sighting> = self
            .players
            .iter()
            .map(|p| Sighting {
                session: p.session,
                x: p.character.x,
                y: p.character.y,
                alive: p.character.is_alive(),
                player_killer: p.player_killer,
            })
            .collect();

        match self.npcs[index].think(now, &sightings, &mut self.rng) {
            Action::Idle => {}
            Action::Respawn => self.respawn_npc(index, now),
            Action::Wander => {
                if let Some(&direction) = Direction::ALL.choose(&mut self.rng) {
                    self.step_npc(index, direction);
                }
            }
            Action::StepToward { x, y } => {
                let from = self.npcs[index].position();
                let step = pathfinding::next_step(&self.terrain, from, (x, y), |x, y| {
                    self.npc_can_enter(x, y)
                });
                if let Some(direction) = step {
                    self.step_npc(index, direction);
                }
            }
            Action::Attack { target } => self.npc_attack(index, target),
        }

        if self.npcs[index].regenerate(now) {
            let npc = &self.npcs[index];
            self.send(&NpcVitalsCommand {
                index: npc.index,
                health: npc.health,
                max_health: npc.template.max_health,
            });
        }
    }

    fn step_npc(&mut self, index: usize, direction: Direction) {
        let (x, y) = self.npcs[index].position();
        let Some((x, y)) = self.terrain.step(x, y, direction) else {
            return;
        };
        if !self.npc_can_enter(x, y) {
            return;
        }
        let npc = &mut self.npcs[index];
        npc.x = x;
        npc.y = y;
        npc.direction = direction;
        let command = NpcMoveCommand {
            index: npc.index,
            x,
            y,
            direction,
        };
        self.send(&command);
    }

    fn npc_attack(&mut self, index: usize, target: SessionId) {
        let Some(victim) = self.index_of(target) else {
            return;
        };
        self.send(&NpcAttackCommand {
            index: self.npcs[index].index,
        });

        let power = self.npcs[index].template.strength;
        let equipment = self.players[victim].character.equipment;
        let hit = combat::strike_player(
            &mut self.players[victim].character,
            &self.content,
            power,
            &mut self.rng,
        );
        self.send(&DamageCommand {
            target: TargetKind::Player,
            index: target,
            amount: hit.damage,
            blocked: hit.blocked,
        });
        if hit.damage > 0 {
            let vitals = self.players[victim].vitals_command();
            self.send(&vitals);
            if self.players[victim].character.equipment != equipment {
                self.players[victim].send_inventory();
            }
        }

        if !self.players[victim].character.is_alive() {
            self.npcs[index].lose_target();
            self.kill_player(victim);
        }
    }
}
