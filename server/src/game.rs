//! The single owner of all mutable server state
//!
//! Only the main loop task touches a [`Game`]. Network events and ticks are
//! applied one after another, so sessions, maps and repositories need no
//! locking.

use crate::assets::{AssetStore, AssetTransfers, DirectoryAssetStore};
use crate::character::{Account, CharacterInfo};
use crate::client_manager::{ClientManager, Outbox, Outgoing, Session, MAX_FRAME_SIZE};
use crate::config::{Location, ServerConfig};
use crate::content::Content;
use crate::map::{Player, Rules};
use crate::protocol::{FrameParser, PacketRegistry, SessionGate, SessionPhase};
use crate::repository::{
    BanList, FileBanList, FileRepository, MemoryBanList, MemoryRepository, Repository,
};
use crate::utils::name_key;
use crate::world::World;
use log::{error, info, warn};
use shared::packets::{AlertCommand, CharacterListCommand, PartyCommand};
use shared::{AccessLevel, SessionId};
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

pub struct Game {
    pub config: ServerConfig,
    pub content: Arc<Content>,
    pub clients: ClientManager,
    pub world: World,
    pub accounts: Box<dyn Repository<Account>>,
    pub characters: Box<dyn Repository<CharacterInfo>>,
    pub bans: Box<dyn BanList>,
    pub assets: Option<Arc<dyn AssetStore>>,
    pub transfers: AssetTransfers,
    started: Instant,
}

impl Game {
    /// Loads content, builds the world and opens the configured storage
    pub fn new(config: ServerConfig) -> Result<Self, Box<dyn Error>> {
        let content = match &config.content_path {
            Some(path) => {
                info!("Loading content from {}", path.display());
                Content::load(path)?
            }
            None => Content::builtin(),
        };
        let content = Arc::new(content);
        let seed = config.seed.unwrap_or_else(rand::random);
        let world = World::new(content.clone(), Rules::from_config(&config), seed)?;

        let (accounts, characters, bans): (
            Box<dyn Repository<Account>>,
            Box<dyn Repository<CharacterInfo>>,
            Box<dyn BanList>,
        ) = match &config.data_dir {
            Some(dir) => {
                info!("Storing accounts under {}", dir.display());
                (
                    Box::new(FileRepository::open(dir.join("accounts"))?),
                    Box::new(FileRepository::open(dir.join("characters"))?),
                    Box::new(FileBanList::load(FileRepository::open(dir.join("bans"))?)?),
                )
            }
            None => {
                warn!("No data directory configured, accounts will not persist");
                (
                    Box::new(MemoryRepository::new()),
                    Box::new(MemoryRepository::new()),
                    Box::new(MemoryBanList::new()),
                )
            }
        };

        let assets = match &config.assets_dir {
            Some(dir) => Some(Arc::new(DirectoryAssetStore::open(dir)?) as Arc<dyn AssetStore>),
            None => None,
        };

        Ok(Self {
            clients: ClientManager::new(config.max_connections),
            config,
            content,
            world,
            accounts,
            characters,
            bans,
            assets,
            transfers: AssetTransfers::new(),
            started: Instant::now(),
        })
    }

    /// Milliseconds since the server started; every timer is measured on this clock
    pub fn now(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Registers a freshly accepted socket; banned addresses are turned away
    pub fn connect(&mut self, session: SessionId, addr: SocketAddr, outbox: Outbox) -> bool {
        if self.bans.is_banned(addr.ip()) {
            info!("Refusing banned address {}", addr);
            let _ = outbox.send(Outgoing::packet(&AlertCommand {
                message: "You are banned from this server.".to_string(),
            }));
            let _ = outbox.send(Outgoing::Close);
            return false;
        }
        self.clients.insert(Session::new(session, addr, outbox))
    }

    /// Appends received bytes to the session buffer and handles every complete frame
    pub fn receive(&mut self, registry: &PacketRegistry<Game>, session: SessionId, data: &[u8]) {
        let mut buffer = match self.clients.get_mut(session) {
            Some(client) if !client.closing => {
                client.buffer.extend_from_slice(data);
                std::mem::take(&mut client.buffer)
            }
            _ => return,
        };

        let consumed = FrameParser::parse(&buffer, session, registry, self);
        buffer.drain(..consumed);

        if let Some(client) = self.clients.get_mut(session) {
            if buffer.len() > MAX_FRAME_SIZE {
                warn!(
                    "Session {} sent {} bytes without a frame delimiter",
                    session,
                    buffer.len()
                );
                buffer.clear();
                client.close();
            }
            client.buffer = buffer;
        }
        self.world.process_events();
    }

    /// Releases everything a closed connection held
    pub fn disconnect(&mut self, session: SessionId) {
        self.leave_game(session);
        self.transfers.cancel_session(session);
        self.clients.remove(session);
    }

    pub fn tick(&mut self) {
        let now = self.now();
        self.world.update(now);
    }

    /// Saves every character and stops outstanding downloads
    pub async fn shutdown(&mut self) {
        info!("Saving {} players", self.world.player_count());
        for session in self.world.sessions() {
            self.leave_game(session);
        }
        self.transfers.shutdown().await;
        let sessions: Vec<SessionId> = self.clients.iter().map(|s| s.id).collect();
        for session in sessions {
            self.clients.send(
                session,
                &AlertCommand {
                    message: "The server is shutting down.".to_string(),
                },
            );
            self.clients.close(session);
        }
    }

    /// Audits a request no honest client sends and drops the connection
    pub fn hack_attempt(&mut self, session: SessionId, reason: &str) {
        let Some(client) = self.clients.get_mut(session) else {
            return;
        };
        warn!(
            target: "audit",
            "session={} addr={} account={} reason={}",
            session,
            client.addr,
            client.account.as_deref().unwrap_or("-"),
            reason
        );
        client.send(&AlertCommand {
            message: "You have been disconnected for sending invalid data.".to_string(),
        });
        client.close();
    }

    /// Shows a message: in the chat log when in game, as a dialog otherwise
    pub fn notify(&self, session: SessionId, message: &str) {
        match self.world.player(session) {
            Some(player) => player.alert(message),
            None => self.clients.send(
                session,
                &AlertCommand {
                    message: message.to_string(),
                },
            ),
        }
    }

    pub fn save_character(&mut self, character: &CharacterInfo) {
        if let Err(e) = self.characters.save(&name_key(&character.name), character) {
            error!("Failed to save {}: {}", character.name, e);
        }
    }

    pub fn load_character(&self, name: &str) -> Option<CharacterInfo> {
        match self.characters.get(&name_key(name)) {
            Ok(character) => character,
            Err(e) => {
                error!("Failed to load {}: {}", name, e);
                None
            }
        }
    }

    pub fn send_character_list(&self, session: SessionId) {
        let Some(account) = self.clients.get(session).and_then(|c| c.account.as_deref()) else {
            return;
        };
        let characters = match self.accounts.get(account) {
            Ok(Some(account)) => account
                .characters
                .iter()
                .filter_map(|name| self.load_character(name))
                .map(|character| character.summary())
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                error!("Failed to load account {}: {}", account, e);
                Vec::new()
            }
        };
        self.clients.send(session, &CharacterListCommand { characters });
    }

    /// Puts a loaded character on its map
    pub fn enter_game(&mut self, session: SessionId, character: CharacterInfo) {
        let now = self.now();
        let Some(client) = self.clients.get_mut(session) else {
            return;
        };
        client.in_game = true;
        let location = Location::new(character.map.clone(), character.x, character.y);
        info!("{} entered the game on session {}", character.name, session);
        let player = Player::new(session, character, client.outbox(), now);
        self.world.add_player(player, &location);
    }

    /// Takes the session's character out of the world and saves it
    pub fn leave_game(&mut self, session: SessionId) {
        self.break_party(session);
        let invited: Vec<SessionId> = self
            .world
            .players()
            .filter(|p| p.pending_invite == Some(session))
            .map(|p| p.session)
            .collect();
        for other in invited {
            if let Some(player) = self.world.player_mut(other) {
                player.pending_invite = None;
            }
        }

        if let Some(client) = self.clients.get_mut(session) {
            client.in_game = false;
        }
        if let Some(player) = self.world.remove_player(session) {
            info!("{} left the game", player.character.name);
            self.save_character(&player.character);
        }
    }

    /// Dissolves the session's party and tells both members
    pub fn break_party(&mut self, session: SessionId) {
        let Some(partner) = self.world.player_mut(session).and_then(|p| p.party.take()) else {
            return;
        };
        if let Some(player) = self.world.player(session) {
            player.send(&PartyCommand { partner: None });
        }
        if let Some(other) = self.world.player_mut(partner) {
            if other.party == Some(session) {
                other.party = None;
                other.send(&PartyCommand { partner: None });
            }
        }
    }
}

impl SessionGate for Game {
    fn phase(&self, session: SessionId) -> Option<SessionPhase> {
        let client = self.clients.get(session)?;
        if client.closing {
            None
        } else if client.in_game {
            Some(SessionPhase::InGame)
        } else if client.account.is_some() {
            Some(SessionPhase::Authenticated)
        } else {
            Some(SessionPhase::Connected)
        }
    }

    fn access_level(&self, session: SessionId) -> AccessLevel {
        self.world
            .player(session)
            .map(|p| p.character.access)
            .unwrap_or_default()
    }
}
