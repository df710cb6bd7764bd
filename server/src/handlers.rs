//! Request handlers and the route table binding them to packet identifiers

use crate::character::{Account, CharacterInfo};
use crate::config::Location;
use crate::game::Game;
use crate::inventory::ItemError;
use crate::protocol::{PacketRegistry, Requirement};
use crate::utils::{hash_password, is_valid_name, name_key};
use log::{debug, info, warn};
use shared::packets::*;
use shared::{
    AccessLevel, ChatChannel, ItemStack, SessionId, MAX_CHARACTERS, MAX_CHAT_LENGTH,
    PROTOCOL_VERSION,
};

const MIN_PASSWORD_LENGTH: usize = 4;

/// Builds the route table for every request the server understands
pub fn build_registry() -> PacketRegistry<Game> {
    let mut registry = PacketRegistry::new();

    registry.register(Requirement::Session, handle_ping);
    registry.register(Requirement::Session, handle_asset_request);
    registry.register(Requirement::Session, handle_cancel_asset);

    registry.register(Requirement::Guest, handle_register);
    registry.register(Requirement::Guest, handle_login);

    registry.register(Requirement::Account, handle_create_character);
    registry.register(Requirement::Account, handle_delete_character);
    registry.register(Requirement::Account, handle_use_character);

    registry.register(Requirement::Player, handle_logout);
    registry.register(Requirement::Player, handle_move);
    registry.register(Requirement::Player, handle_face);
    registry.register(Requirement::Player, handle_attack);
    registry.register(Requirement::Player, handle_chat);
    registry.register(Requirement::Player, handle_use_item);
    registry.register(Requirement::Player, handle_unequip);
    registry.register(Requirement::Player, handle_drop_item);
    registry.register(Requirement::Player, handle_pickup);
    registry.register(Requirement::Player, handle_train_stat);
    registry.register(Requirement::Player, handle_party_invite);
    registry.register(Requirement::Player, handle_party_accept);
    registry.register(Requirement::Player, handle_party_leave);

    registry.register(Requirement::Access(AccessLevel::Moderator), handle_kick);
    registry.register(Requirement::Access(AccessLevel::Mapper), handle_warp);
    registry.register(Requirement::Access(AccessLevel::Mapper), handle_respawn_map);
    registry.register(Requirement::Access(AccessLevel::Developer), handle_spawn_item);
    registry.register(Requirement::Access(AccessLevel::Administrator), handle_ban);
    registry.register(Requirement::Access(AccessLevel::Administrator), handle_set_access);

    registry.on_bad_packet(|game: &mut Game, session, id| {
        if let Some(client) = game.clients.get(session) {
            debug!("Unrouted packet {} from {}", id, client.addr);
        }
    });
    registry
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

fn handle_ping(game: &mut Game, session: SessionId, packet: PingRequest) {
    game.clients.send(
        session,
        &PongCommand {
            timestamp: packet.timestamp,
        },
    );
}

fn handle_asset_request(game: &mut Game, session: SessionId, packet: AssetRequest) {
    let asset = game.assets.as_ref().and_then(|store| store.get(&packet.hash));
    let (Some(asset), Some(client)) = (asset, game.clients.get(session)) else {
        game.clients
            .send(session, &AssetUnavailableCommand { hash: packet.hash });
        return;
    };
    let outbox = client.outbox();
    game.transfers.start(session, asset, outbox);
}

fn handle_cancel_asset(game: &mut Game, session: SessionId, packet: CancelAssetRequest) {
    if !game.transfers.cancel(session, packet.handle) {
        debug!("Session {} cancelled unknown transfer {}", session, packet.handle);
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

fn handle_register(game: &mut Game, session: SessionId, packet: RegisterRequest) {
    if !is_valid_name(&packet.name) {
        game.notify(session, "Account names are 3 to 20 letters, digits or spaces.");
        return;
    }
    if packet.password.len() < MIN_PASSWORD_LENGTH {
        game.notify(session, "Your password is too short.");
        return;
    }

    let key = name_key(&packet.name);
    let account = Account {
        name: packet.name.clone(),
        password_hash: hash_password(&key, &packet.password),
        characters: Vec::new(),
    };
    match game.accounts.create(&key, &account) {
        Ok(true) => {
            info!("Account {} registered from session {}", packet.name, session);
            game.notify(session, "Your account has been created.");
        }
        Ok(false) => game.notify(session, "That account name is taken."),
        Err(e) => {
            warn!("Failed to create account {}: {}", packet.name, e);
            game.notify(session, "The account could not be created.");
        }
    }
}

fn handle_login(game: &mut Game, session: SessionId, packet: LoginRequest) {
    if packet.version != PROTOCOL_VERSION {
        game.notify(session, "Your client is outdated, please update.");
        game.clients.close(session);
        return;
    }

    let key = name_key(&packet.name);
    let account = match game.accounts.get(&key) {
        Ok(account) => account,
        Err(e) => {
            warn!("Failed to load account {}: {}", key, e);
            None
        }
    };
    let valid = account.is_some_and(|a| a.password_hash == hash_password(&key, &packet.password));
    if !valid {
        game.notify(session, "Wrong account name or password.");
        return;
    }
    if game.clients.find_by_account(&key).is_some() {
        game.notify(session, "That account is already logged in.");
        return;
    }

    if let Some(client) = game.clients.get_mut(session) {
        info!("Session {} logged in as {}", session, key);
        client.account = Some(key);
        client.send(&LoginOkCommand { session });
    }
    game.send_character_list(session);
}

fn session_account(game: &Game, session: SessionId) -> Option<Account> {
    let key = game.clients.get(session)?.account.clone()?;
    match game.accounts.get(&key) {
        Ok(account) => account,
        Err(e) => {
            warn!("Failed to load account {}: {}", key, e);
            None
        }
    }
}

fn owns_character(account: &Account, name: &str) -> bool {
    account
        .characters
        .iter()
        .any(|owned| name_key(owned) == name_key(name))
}

fn handle_create_character(game: &mut Game, session: SessionId, packet: CreateCharacterRequest) {
    let Some(mut account) = session_account(game, session) else {
        return;
    };
    if account.characters.len() >= MAX_CHARACTERS {
        game.notify(session, "You cannot create more characters.");
        return;
    }
    if !is_valid_name(&packet.name) {
        game.notify(session, "Character names are 3 to 20 letters, digits or spaces.");
        return;
    }

    let key = name_key(&account.name);
    let start = &game.config.start;
    let mut character = CharacterInfo::new(
        &packet.name,
        &key,
        packet.job,
        packet.sprite,
        &start.map,
        start.x,
        start.y,
    );
    if game.config.is_administrator(&key) {
        character.access = AccessLevel::Administrator;
    }

    match game.characters.create(&name_key(&packet.name), &character) {
        Ok(true) => {}
        Ok(false) => {
            game.notify(session, "That character name is taken.");
            return;
        }
        Err(e) => {
            warn!("Failed to create character {}: {}", packet.name, e);
            return;
        }
    }
    account.characters.push(character.name.clone());
    if let Err(e) = game.accounts.save(&key, &account) {
        warn!("Failed to save account {}: {}", key, e);
    }
    info!("{} created character {}", key, character.name);
    game.send_character_list(session);
}

fn handle_delete_character(game: &mut Game, session: SessionId, packet: DeleteCharacterRequest) {
    let Some(mut account) = session_account(game, session) else {
        return;
    };
    if !owns_character(&account, &packet.name) {
        game.hack_attempt(session, "deleting a character of another account");
        return;
    }
    account
        .characters
        .retain(|owned| name_key(owned) != name_key(&packet.name));
    let key = name_key(&account.name);
    if let Err(e) = game.accounts.save(&key, &account) {
        warn!("Failed to save account {}: {}", key, e);
    }
    if let Err(e) = game.characters.delete(&name_key(&packet.name)) {
        warn!("Failed to delete character {}: {}", packet.name, e);
    }
    info!("{} deleted character {}", key, packet.name);
    game.send_character_list(session);
}

fn handle_use_character(game: &mut Game, session: SessionId, packet: UseCharacterRequest) {
    let Some(account) = session_account(game, session) else {
        return;
    };
    if !owns_character(&account, &packet.name) {
        game.hack_attempt(session, "selecting a character of another account");
        return;
    }
    let Some(character) = game.load_character(&packet.name) else {
        game.notify(session, "That character could not be loaded.");
        return;
    };
    game.enter_game(session, character);
}

fn handle_logout(game: &mut Game, session: SessionId, _packet: LogoutRequest) {
    game.leave_game(session);
    game.send_character_list(session);
}

// ---------------------------------------------------------------------------
// In game
// ---------------------------------------------------------------------------

fn handle_move(game: &mut Game, session: SessionId, packet: MoveRequest) {
    let now = game.now();
    if let Some(map) = game.world.map_of_mut(session) {
        map.move_player(
            session,
            packet.direction,
            packet.movement,
            packet.x,
            packet.y,
            now,
        );
    }
}

fn handle_face(game: &mut Game, session: SessionId, packet: FaceRequest) {
    if let Some(map) = game.world.map_of_mut(session) {
        map.face(session, packet.direction);
    }
}

fn handle_attack(game: &mut Game, session: SessionId, _packet: AttackRequest) {
    let now = game.now();
    if let Some(map) = game.world.map_of_mut(session) {
        map.attack(session, now);
    }
}

fn handle_chat(game: &mut Game, session: SessionId, packet: ChatRequest) {
    let message: String = packet.message.trim().chars().take(MAX_CHAT_LENGTH).collect();
    if message.is_empty() {
        return;
    }
    let Some(from) = game.world.player(session).map(|p| p.character.name.clone()) else {
        return;
    };
    let command = ChatCommand {
        channel: packet.channel,
        from,
        message,
    };
    match packet.channel {
        ChatChannel::Map => {
            if let Some(map) = game.world.map_of(session) {
                map.send(&command);
            }
        }
        ChatChannel::Global => game.world.send_all(&command),
        ChatChannel::System => debug!("Session {} tried to speak on the system channel", session),
    }
}

/// Alerts the player, or treats the failure as tampering
fn item_failure(game: &mut Game, session: SessionId, error: ItemError) {
    if error.is_hack_attempt() {
        game.hack_attempt(session, &error.to_string());
    } else {
        game.notify(session, &format!("You can't do that: {}.", error));
    }
}

fn handle_use_item(game: &mut Game, session: SessionId, packet: UseItemRequest) {
    let result = match game.world.map_of_mut(session) {
        Some(map) => map.use_item(session, packet.slot),
        None => return,
    };
    if let Err(e) = result {
        item_failure(game, session, e);
    }
}

fn handle_unequip(game: &mut Game, session: SessionId, packet: UnequipRequest) {
    if let Some(map) = game.world.map_of_mut(session) {
        map.unequip(session, packet.slot);
    }
}

fn handle_drop_item(game: &mut Game, session: SessionId, packet: DropItemRequest) {
    let result = match game.world.map_of_mut(session) {
        Some(map) => map.drop_item(session, packet.slot, packet.quantity),
        None => return,
    };
    if let Err(e) = result {
        item_failure(game, session, e);
    }
}

fn handle_pickup(game: &mut Game, session: SessionId, _packet: PickupItemRequest) {
    if let Some(map) = game.world.map_of_mut(session) {
        map.pickup(session);
    }
}

fn handle_train_stat(game: &mut Game, session: SessionId, packet: TrainStatRequest) {
    let trained = game
        .world
        .map_of_mut(session)
        .is_some_and(|map| map.train_stat(session, packet.stat));
    if !trained {
        game.notify(session, "You have no stat points to spend.");
    }
}

fn handle_party_invite(game: &mut Game, session: SessionId, packet: PartyInviteRequest) {
    let Some(target) = game.world.find_player(&packet.name) else {
        game.notify(session, "That player is not online.");
        return;
    };
    if target == session {
        return;
    }
    let Some(inviter) = game.world.player(session) else {
        return;
    };
    if inviter.party.is_some() {
        game.notify(session, "You are already in a party.");
        return;
    }
    let from = inviter.character.name.clone();

    if !game.world.player(target).is_some_and(|p| p.party.is_none()) {
        game.notify(session, "That player is already in a party.");
        return;
    }
    if let Some(invitee) = game.world.player_mut(target) {
        invitee.pending_invite = Some(session);
        invitee.send(&PartyInviteCommand { from });
    }
}

fn handle_party_accept(game: &mut Game, session: SessionId, _packet: PartyAcceptRequest) {
    let Some(invitee) = game.world.player_mut(session) else {
        return;
    };
    let Some(inviter) = invitee.pending_invite.take() else {
        return;
    };
    if invitee.party.is_some() {
        return;
    }
    let invitee_name = invitee.character.name.clone();

    let inviter_name = match game.world.player(inviter) {
        Some(player) if player.party.is_none() => player.character.name.clone(),
        _ => {
            game.notify(session, "That invitation is no longer valid.");
            return;
        }
    };
    if let Some(player) = game.world.player_mut(inviter) {
        player.party = Some(session);
        player.send(&PartyCommand {
            partner: Some(invitee_name),
        });
    }
    if let Some(invitee) = game.world.player_mut(session) {
        invitee.party = Some(inviter);
        invitee.send(&PartyCommand {
            partner: Some(inviter_name),
        });
    }
}

fn handle_party_leave(game: &mut Game, session: SessionId, _packet: PartyLeaveRequest) {
    game.break_party(session);
}

// ---------------------------------------------------------------------------
// Privileged
// ---------------------------------------------------------------------------

/// Name and access level of the acting player
fn actor(game: &Game, session: SessionId) -> Option<(String, AccessLevel)> {
    let player = game.world.player(session)?;
    Some((player.character.name.clone(), player.character.access))
}

/// Finds a target the actor outranks
fn outranked_target(game: &Game, session: SessionId, name: &str) -> Option<SessionId> {
    let (_, access) = actor(game, session)?;
    let target = game.world.find_player(name)?;
    let target_access = game.world.player(target)?.character.access;
    (target != session && target_access < access).then_some(target)
}

fn handle_warp(game: &mut Game, session: SessionId, packet: WarpRequest) {
    let Some(terrain) = game.world.map(&packet.map).map(|m| m.terrain()) else {
        game.notify(session, "There is no such map.");
        return;
    };
    if packet.x >= terrain.width() || packet.y >= terrain.height() {
        game.notify(session, "That position is outside the map.");
        return;
    }
    let location = Location::new(packet.map, packet.x, packet.y);
    if game.world.transfer(session, &location) {
        info!(target: "audit", "session={} warped to {} {},{}", session, location.map, location.x, location.y);
    }
}

fn handle_respawn_map(game: &mut Game, session: SessionId, _packet: RespawnMapRequest) {
    let now = game.now();
    if let Some(map) = game.world.map_of_mut(session) {
        map.repopulate(now);
        info!(target: "audit", "session={} respawned {}", session, map.name());
    }
}

fn handle_kick(game: &mut Game, session: SessionId, packet: KickRequest) {
    let Some(target) = outranked_target(game, session, &packet.name) else {
        game.notify(session, "You cannot kick that player.");
        return;
    };
    let by = actor(game, session).map(|(name, _)| name).unwrap_or_default();
    info!(target: "audit", "{} kicked {}", by, packet.name);
    game.clients.send(
        target,
        &AlertCommand {
            message: format!("You have been kicked by {}.", by),
        },
    );
    game.clients.close(target);
}

fn handle_ban(game: &mut Game, session: SessionId, packet: BanRequest) {
    let Some(target) = outranked_target(game, session, &packet.name) else {
        game.notify(session, "You cannot ban that player.");
        return;
    };
    let Some(addr) = game.clients.get(target).map(|c| c.addr.ip()) else {
        return;
    };
    let by = actor(game, session).map(|(name, _)| name).unwrap_or_default();
    if let Err(e) = game.bans.add_ban(addr, &by) {
        warn!("Failed to store ban of {}: {}", addr, e);
    }
    info!(target: "audit", "{} banned {} ({})", by, packet.name, addr);
    game.clients.send(
        target,
        &AlertCommand {
            message: format!("You have been banned by {}.", by),
        },
    );
    game.clients.close(target);
}

fn handle_set_access(game: &mut Game, session: SessionId, packet: SetAccessRequest) {
    let Some(target) = outranked_target(game, session, &packet.name) else {
        game.notify(session, "You cannot change that player's access.");
        return;
    };
    let Some(map) = game.world.map_of_mut(target) else {
        return;
    };
    let Some(player) = map.player_mut(target) else {
        return;
    };
    player.character.access = packet.access;
    player.send(&player.data_command());
    let snapshot = player.snapshot();
    map.send_if(&SpawnPlayerCommand { snapshot }, |p| p.session != target);
    info!(target: "audit", "session={} set access of {} to {:?}", session, packet.name, packet.access);
}

fn handle_spawn_item(game: &mut Game, session: SessionId, packet: SpawnItemRequest) {
    let Some(template) = game.content.item(packet.item) else {
        game.notify(session, "There is no such item.");
        return;
    };
    let stack = ItemStack {
        item: packet.item,
        quantity: if template.stackable {
            packet.quantity.max(1)
        } else {
            1
        },
        durability: template.max_durability,
    };
    let Some(map) = game.world.map_of_mut(session) else {
        return;
    };
    let Some((x, y)) = map.player(session).map(|p| p.position()) else {
        return;
    };
    if map.spawn_item(x, y, stack).is_some() {
        info!(target: "audit", "session={} spawned {} x{}", session, stack.item, stack.quantity);
    }
}
