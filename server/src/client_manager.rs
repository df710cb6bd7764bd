//! Session bookkeeping for connected sockets
//!
//! This module owns everything the server knows about a connection apart
//! from the socket itself:
//! - The bounded pool of session slots handed out by the acceptor
//! - Per-session receive buffers awaiting frame parsing
//! - The outbound queue feeding each connection's writer task
//! - Authentication and character-selection progress
//!
//! Slot identities are small integers that are reused after a disconnect,
//! which keeps lookups a plain vector index.

use log::{debug, info};
use shared::packets::encode_frame;
use shared::{Packet, SessionId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Largest unterminated frame a session may accumulate before it is closed
pub const MAX_FRAME_SIZE: usize = 16 * 1024;

/// One item of a connection's outbound queue
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// A complete, delimiter-terminated frame
    Frame(Arc<[u8]>),
    /// Flush what came before and close the socket
    Close,
}

impl Outgoing {
    /// Encodes a packet into a shareable frame
    ///
    /// Broadcasts clone the `Arc`, so a packet sent to a whole map is
    /// serialized once.
    pub fn packet<P: Packet>(packet: &P) -> Self {
        Outgoing::Frame(encode_frame(packet).into())
    }
}

/// Sending half of a connection's outbound queue
pub type Outbox = mpsc::UnboundedSender<Outgoing>;

/// Free-list of session slots shared by the acceptor and the main loop
///
/// Slots run from 1 to the configured maximum. The lowest free slot is
/// handed out first, and a slot is only returned once the main loop has
/// finished cleaning up after the session that held it.
#[derive(Debug)]
pub struct SlotPool {
    free: Vec<SessionId>,
    in_use: Vec<bool>,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(SessionId::MAX as usize);
        Self {
            free: (1..=capacity as SessionId).rev().collect(),
            in_use: vec![false; capacity + 1],
        }
    }

    /// Takes a free slot, or `None` when the server is full
    pub fn acquire(&mut self) -> Option<SessionId> {
        let slot = self.free.pop()?;
        self.in_use[slot as usize] = true;
        Some(slot)
    }

    /// Returns a slot to the pool
    ///
    /// Releasing a slot that is not in use is ignored so a slot can never
    /// be handed to two sessions at once.
    pub fn release(&mut self, slot: SessionId) {
        match self.in_use.get_mut(slot as usize) {
            Some(in_use) if *in_use => {
                *in_use = false;
                self.free.push(slot);
                // Keep the lowest slot on top
                self.free.sort_unstable_by(|a, b| b.cmp(a));
            }
            _ => debug!("Ignoring release of unused slot {}", slot),
        }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

/// A live connection, before or after authentication
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub addr: SocketAddr,
    /// Bytes received but not yet parsed into frames
    pub buffer: Vec<u8>,
    outbox: Outbox,
    /// Account key once logged in
    pub account: Option<String>,
    /// True while the session controls a character on a map
    pub in_game: bool,
    /// Set once a close was requested; later input is ignored
    pub closing: bool,
    pub connected_at: Instant,
}

impl Session {
    pub fn new(id: SessionId, addr: SocketAddr, outbox: Outbox) -> Self {
        Self {
            id,
            addr,
            buffer: Vec::new(),
            outbox,
            account: None,
            in_game: false,
            closing: false,
            connected_at: Instant::now(),
        }
    }

    pub fn send<P: Packet>(&self, packet: &P) {
        let _ = self.outbox.send(Outgoing::packet(packet));
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Queues a close after everything already queued
    pub fn close(&mut self) {
        if !self.closing {
            self.closing = true;
            let _ = self.outbox.send(Outgoing::Close);
        }
    }
}

/// All live sessions, indexed by slot
pub struct ClientManager {
    sessions: Vec<Option<Session>>,
    count: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        let mut sessions = Vec::new();
        sessions.resize_with(max_clients + 1, || None);
        Self { sessions, count: 0 }
    }

    /// Registers a session in its slot
    ///
    /// Returns false if the slot is out of range or still occupied.
    pub fn insert(&mut self, session: Session) -> bool {
        let id = session.id;
        match self.sessions.get_mut(id as usize) {
            Some(entry @ None) => {
                info!("Session {} connected from {}", id, session.addr);
                *entry = Some(session);
                self.count += 1;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.get_mut(id as usize)?.take()?;
        self.count -= 1;
        info!("Session {} disconnected", id);
        Some(session)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(id as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id as usize)?.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().flatten()
    }

    /// Session currently logged into `account`
    pub fn find_by_account(&self, account: &str) -> Option<SessionId> {
        self.iter()
            .find(|s| s.account.as_deref() == Some(account))
            .map(|s| s.id)
    }

    pub fn send<P: Packet>(&self, id: SessionId, packet: &P) {
        if let Some(session) = self.get(id) {
            session.send(packet);
        }
    }

    pub fn close(&mut self, id: SessionId) {
        if let Some(session) = self.get_mut(id) {
            session.close();
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
