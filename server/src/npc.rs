//! NPC slots and their behavior state machine
//!
//! The state machine is pure: [`Npc::think`] looks at what the NPC can see
//! and returns an [`Action`] for the map to carry out. Transitions are named
//! methods so they can be exercised without a map or a tick loop.
//!
//! ```text
//! Dead --(spawn delay elapsed)--> Wandering --(player in sight)--> Targeting
//! Targeting --(adjacent)--> Attacking --(target lost)--> Wandering
//! any --(health reaches 0)--> Dead
//! ```

use crate::combat::REGEN_INTERVAL_MS;
use crate::content::{Behavior, NpcTemplate};
use rand::Rng;
use shared::packets::NpcSnapshot;
use shared::{Direction, SessionId};

/// Time between two NPC swings
pub const NPC_ATTACK_COOLDOWN_MS: u64 = 1_000;

/// Chance per tick that an idle NPC takes a random step
pub const WANDER_CHANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpcState {
    Dead { respawn_at: u64 },
    Wandering,
    Targeting { target: SessionId },
    Attacking { target: SessionId },
}

/// A player as seen by an NPC deciding what to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sighting {
    pub session: SessionId,
    pub x: u16,
    pub y: u16,
    pub alive: bool,
    pub player_killer: bool,
}

/// What the map should do for an NPC this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Idle,
    Respawn,
    Wander,
    StepToward { x: u16, y: u16 },
    Attack { target: SessionId },
}

#[derive(Debug, Clone)]
pub struct Npc {
    pub index: u16,
    pub template: NpcTemplate,
    pub state: NpcState,
    pub health: u32,
    pub x: u16,
    pub y: u16,
    pub direction: Direction,
    pub attack_ready_at: u64,
    pub regen_at: u64,
}

fn distance(a: (u16, u16), b: (u16, u16)) -> u32 {
    (a.0 as i32 - b.0 as i32).unsigned_abs() + (a.1 as i32 - b.1 as i32).unsigned_abs()
}

impl Npc {
    /// A fresh slot, dead until its first respawn
    pub fn new(index: u16, template: NpcTemplate) -> Self {
        Self {
            index,
            template,
            state: NpcState::Dead { respawn_at: 0 },
            health: 0,
            x: 0,
            y: 0,
            direction: Direction::Down,
            attack_ready_at: 0,
            regen_at: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn behavior(&self) -> Behavior {
        self.template.behavior
    }

    pub fn position(&self) -> (u16, u16) {
        (self.x, self.y)
    }

    pub fn target(&self) -> Option<SessionId> {
        match self.state {
            NpcState::Targeting { target } | NpcState::Attacking { target } => Some(target),
            _ => None,
        }
    }

    pub fn kill(&mut self, now: u64) {
        self.health = 0;
        self.state = NpcState::Dead {
            respawn_at: now + self.template.spawn_delay_ms,
        };
    }

    pub fn ready_to_respawn(&self, now: u64) -> bool {
        matches!(self.state, NpcState::Dead { respawn_at } if now >= respawn_at)
    }

    pub fn respawn(&mut self, x: u16, y: u16, now: u64) {
        self.health = self.template.max_health;
        self.x = x;
        self.y = y;
        self.direction = Direction::Down;
        self.state = NpcState::Wandering;
        self.attack_ready_at = now;
        self.regen_at = now + REGEN_INTERVAL_MS;
    }

    /// Starts chasing `target`
    pub fn engage(&mut self, target: SessionId) {
        if self.is_alive() {
            self.state = NpcState::Targeting { target };
        }
    }

    /// Reaction to being hit by `attacker`
    pub fn provoke(&mut self, attacker: SessionId) {
        if self.behavior().retaliates() && self.state == NpcState::Wandering {
            self.engage(attacker);
        }
    }

    pub fn lose_target(&mut self) {
        if self.is_alive() {
            self.state = NpcState::Wandering;
        }
    }

    /// Applies damage; returns true when it was lethal
    pub fn take_damage(&mut self, amount: u32, now: u64) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.health = self.health.saturating_sub(amount);
        if self.health == 0 {
            self.kill(now);
            return true;
        }
        false
    }

    /// Closest player this NPC's archetype wants to fight
    fn acquire(&self, players: &[Sighting]) -> Option<SessionId> {
        let wants = |player: &Sighting| match self.behavior() {
            Behavior::AttackOnSight => true,
            Behavior::Guard => player.player_killer,
            _ => false,
        };
        let sight = self.template.sight as u32;
        players
            .iter()
            .filter(|player| player.alive && wants(player))
            .filter(|player| distance(self.position(), (player.x, player.y)) <= sight)
            .min_by_key(|player| (distance(self.position(), (player.x, player.y)), player.session))
            .map(|player| player.session)
    }

    /// Advances the state machine by one tick
    pub fn think(&mut self, now: u64, players: &[Sighting], rng: &mut impl Rng) -> Action {
        if let NpcState::Dead { .. } = self.state {
            return if self.ready_to_respawn(now) {
                Action::Respawn
            } else {
                Action::Idle
            };
        }

        if self.state == NpcState::Wandering {
            match self.acquire(players) {
                Some(target) => self.engage(target),
                None if self.behavior().wanders() && rng.gen_bool(WANDER_CHANCE) => {
                    return Action::Wander
                }
                None => return Action::Idle,
            }
        }

        let Some(target) = self.target() else {
            return Action::Idle;
        };
        let limit = self.template.sight as u32 * 2;
        let sighting = players.iter().find(|player| player.session == target);
        let Some(sighting) = sighting.filter(|player| {
            player.alive && distance(self.position(), (player.x, player.y)) <= limit
        }) else {
            self.lose_target();
            return Action::Idle;
        };

        let target_position = (sighting.x, sighting.y);
        if let Some(direction) = Direction::between(self.position(), target_position) {
            self.direction = direction;
            self.state = NpcState::Attacking { target };
            if now >= self.attack_ready_at {
                self.attack_ready_at = now + NPC_ATTACK_COOLDOWN_MS;
                return Action::Attack { target };
            }
            return Action::Idle;
        }

        self.state = NpcState::Targeting { target };
        Action::StepToward {
            x: sighting.x,
            y: sighting.y,
        }
    }

    /// One regeneration pulse while not fighting; returns true when health changed
    pub fn regenerate(&mut self, now: u64) -> bool {
        if now < self.regen_at {
            return false;
        }
        self.regen_at = now + REGEN_INTERVAL_MS;
        if self.state != NpcState::Wandering || self.health >= self.template.max_health {
            return false;
        }
        let amount = (self.template.max_health / 10).max(1);
        self.health = (self.health + amount).min(self.template.max_health);
        true
    }

    pub fn snapshot(&self) -> NpcSnapshot {
        NpcSnapshot {
            index: self.index,
            template: self.template.id,
            name: self.template.name.clone(),
            sprite: self.template.sprite,
            x: self.x,
            y: self.y,
            direction: self.direction,
            health: self.health,
            max_health: self.template.max_health,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn npc(template: u32) -> Npc {
        let content = Content::builtin();
        let mut npc = Npc::new(0, content.npc(template).unwrap().clone());
        npc.respawn(5, 5, 0);
        npc
    }

    fn wolf() -> Npc {
        npc(3)
    }

    fn sighting(session: SessionId, x: u16, y: u16) -> Sighting {
        Sighting {
            session,
            x,
            y,
            alive: true,
            player_killer: false,
        }
    }

    #[test]
    fn test_respawn_waits_for_spawn_delay() {
        let mut npc = wolf();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(npc.take_damage(1_000, 100));
        assert!(!npc.is_alive());
        assert_eq!(npc.state, NpcState::Dead { respawn_at: 8_100 });

        assert_eq!(npc.think(8_099, &[], &mut rng), Action::Idle);
        assert_eq!(npc.think(8_100, &[], &mut rng), Action::Respawn);
        npc.respawn(2, 3, 8_100);
        assert!(npc.is_alive());
        assert_eq!(npc.health, npc.template.max_health);
        assert_eq!(npc.state, NpcState::Wandering);
    }

    #[test]
    fn test_aggressive_npc_targets_player_in_sight() {
        let mut npc = wolf();
        let mut rng = StdRng::seed_from_u64(3);
        let players = [sighting(4, 8, 5), sighting(2, 5, 9)];

        let action = npc.think(0, &players, &mut rng);
        assert_eq!(action, Action::StepToward { x: 8, y: 5 });
        assert_eq!(npc.state, NpcState::Targeting { target: 4 });
    }

    #[test]
    fn test_player_out_of_sight_is_ignored() {
        let mut npc = wolf();
        let mut rng = StdRng::seed_from_u64(3);
        let players = [sighting(1, 15, 15)];
        for _ in 0..20 {
            let action = npc.think(0, &players, &mut rng);
            assert!(matches!(action, Action::Idle | Action::Wander));
            assert_eq!(npc.state, NpcState::Wandering);
        }
    }

    #[test]
    fn test_adjacent_target_is_attacked_on_cooldown() {
        let mut npc = wolf();
        let mut rng = StdRng::seed_from_u64(3);
        let players = [sighting(1, 5, 6)];

        assert_eq!(npc.think(0, &players, &mut rng), Action::Attack { target: 1 });
        assert_eq!(npc.state, NpcState::Attacking { target: 1 });
        assert_eq!(npc.direction, Direction::Down);
        assert_eq!(npc.think(500, &players, &mut rng), Action::Idle);
        assert_eq!(npc.think(1_000, &players, &mut rng), Action::Attack { target: 1 });
    }

    #[test]
    fn test_target_lost_when_too_far_or_gone() {
        let mut npc = wolf();
        let mut rng = StdRng::seed_from_u64(3);
        npc.engage(1);

        assert_eq!(npc.think(0, &[sighting(1, 5, 16)], &mut rng), Action::Idle);
        assert_eq!(npc.state, NpcState::Wandering);

        npc.engage(1);
        npc.think(0, &[], &mut rng);
        assert_eq!(npc.state, NpcState::Wandering);

        npc.engage(1);
        let mut dead = sighting(1, 5, 6);
        dead.alive = false;
        npc.think(0, &[dead], &mut rng);
        assert_eq!(npc.state, NpcState::Wandering);
    }

    #[test]
    fn test_chase_continues_beyond_sight_within_double_range() {
        let mut npc = wolf();
        let mut rng = StdRng::seed_from_u64(3);
        npc.engage(1);
        let action = npc.think(0, &[sighting(1, 5, 13)], &mut rng);
        assert_eq!(action, Action::StepToward { x: 5, y: 13 });
    }

    #[test]
    fn test_guard_only_hunts_player_killers() {
        let mut guard = npc(2);
        let mut rng = StdRng::seed_from_u64(3);
        let innocent = sighting(1, 6, 5);
        guard.think(0, &[innocent], &mut rng);
        assert_eq!(guard.target(), None);

        let mut killer = sighting(2, 5, 7);
        killer.player_killer = true;
        guard.think(0, &[innocent, killer], &mut rng);
        assert_eq!(guard.target(), Some(2));
    }

    #[test]
    fn test_passive_npc_retaliates_only_when_hit() {
        let mut deer = npc(4);
        let mut rng = StdRng::seed_from_u64(3);
        let players = [sighting(1, 5, 6)];
        deer.think(0, &players, &mut rng);
        assert_eq!(deer.target(), None);

        deer.provoke(1);
        assert_eq!(deer.think(0, &players, &mut rng), Action::Attack { target: 1 });
    }

    #[test]
    fn test_shopkeeper_never_moves_or_targets() {
        let mut merchant = npc(1);
        let mut rng = StdRng::seed_from_u64(3);
        let players = [sighting(1, 5, 6)];
        for tick in 0..100 {
            assert_eq!(merchant.think(tick * 50, &players, &mut rng), Action::Idle);
        }
        merchant.provoke(1);
        assert_eq!(merchant.target(), None);
    }

    #[test]
    fn test_regeneration_only_while_wandering() {
        let mut npc = wolf();
        npc.health = 10;
        assert!(!npc.regenerate(1_000));
        assert!(npc.regenerate(REGEN_INTERVAL_MS));
        assert_eq!(npc.health, 16);

        npc.engage(1);
        assert!(!npc.regenerate(REGEN_INTERVAL_MS * 2));
    }
}
