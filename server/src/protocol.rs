//! Request routing and stream framing
//!
//! [`PacketRegistry`] maps packet identifiers to typed handlers guarded by a
//! [`Requirement`]. [`FrameParser`] cuts a session's receive buffer into
//! delimiter-terminated frames and feeds each one through the registry.

use log::{debug, warn};
use shared::packets::unescape;
use shared::{AccessLevel, CodecError, Packet, PacketReader, SessionId, DELIMITER};
use std::collections::HashMap;

/// How far a session has progressed through login and character select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connected but not logged in
    Connected,
    /// Logged in, choosing a character
    Authenticated,
    /// Controlling a character on a map
    InGame,
}

/// What a session must satisfy before a request reaches its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Any live session
    Session,
    /// Not yet logged in
    Guest,
    /// Logged in without a character in game
    Account,
    /// In game
    Player,
    /// In game with at least this access level
    Access(AccessLevel),
}

impl Requirement {
    pub fn allows(self, phase: SessionPhase, access: AccessLevel) -> bool {
        match self {
            Requirement::Session => true,
            Requirement::Guest => phase == SessionPhase::Connected,
            Requirement::Account => phase == SessionPhase::Authenticated,
            Requirement::Player => phase == SessionPhase::InGame,
            Requirement::Access(level) => phase == SessionPhase::InGame && access >= level,
        }
    }
}

/// Session state the registry consults before dispatching
pub trait SessionGate {
    /// `None` for unknown or closing sessions; their input is ignored
    fn phase(&self, session: SessionId) -> Option<SessionPhase>;

    fn access_level(&self, session: SessionId) -> AccessLevel;
}

/// Result of routing one frame body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// The session did not meet the route's requirement
    Unauthorized,
    /// No route for this identifier
    Unknown(String),
    /// The identifier or the fields could not be decoded
    Malformed(CodecError),
}

type Handler<C> = Box<dyn Fn(&mut C, SessionId, &mut PacketReader<'_>) -> Result<(), CodecError> + Send>;
type BadPacketHandler<C> = Box<dyn Fn(&mut C, SessionId, &str) + Send>;

struct Route<C> {
    requirement: Requirement,
    handler: Handler<C>,
}

/// Identifier to handler table, built once at startup
pub struct PacketRegistry<C> {
    routes: HashMap<&'static str, Route<C>>,
    bad_packet: Option<BadPacketHandler<C>>,
}

impl<C> Default for PacketRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PacketRegistry<C> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            bad_packet: None,
        }
    }

    /// Routes packet `P` to `handler` for sessions meeting `requirement`
    ///
    /// Registering the same identifier twice replaces the earlier route.
    pub fn register<P, F>(&mut self, requirement: Requirement, handler: F)
    where
        P: Packet + 'static,
        F: Fn(&mut C, SessionId, P) + Send + 'static,
    {
        let handler: Handler<C> = Box::new(move |ctx, session, reader| {
            let packet = P::read(reader)?;
            handler(ctx, session, packet);
            Ok(())
        });
        if self
            .routes
            .insert(P::ID, Route { requirement, handler })
            .is_some()
        {
            warn!("Route for {} registered twice", P::ID);
        }
    }

    /// Called with the identifier of every frame no route exists for
    pub fn on_bad_packet<F>(&mut self, handler: F)
    where
        F: Fn(&mut C, SessionId, &str) + Send + 'static,
    {
        self.bad_packet = Some(Box::new(handler));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.routes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<C: SessionGate> PacketRegistry<C> {
    /// Decodes the identifier of an unescaped body and runs its handler
    pub fn dispatch(&self, ctx: &mut C, session: SessionId, body: &[u8]) -> Dispatch {
        let mut reader = PacketReader::new(body);
        let id = match reader.read_string() {
            Ok(id) => id,
            Err(e) => {
                warn!("Session {}: unreadable packet identifier: {}", session, e);
                return Dispatch::Malformed(e);
            }
        };

        let Some(route) = self.routes.get(id.as_str()) else {
            warn!("Session {}: unknown packet {:?}", session, id);
            if let Some(bad_packet) = &self.bad_packet {
                bad_packet(ctx, session, &id);
            }
            return Dispatch::Unknown(id);
        };

        let allowed = ctx
            .phase(session)
            .is_some_and(|phase| route.requirement.allows(phase, ctx.access_level(session)));
        if !allowed {
            debug!(
                "Session {}: {} dropped, requires {:?}",
                session, id, route.requirement
            );
            return Dispatch::Unauthorized;
        }

        match (route.handler)(ctx, session, &mut reader) {
            Ok(()) => Dispatch::Handled,
            Err(e) => {
                warn!("Session {}: malformed {}: {}", session, id, e);
                Dispatch::Malformed(e)
            }
        }
    }
}

/// Splits a receive buffer into frames
pub struct FrameParser;

impl FrameParser {
    /// Dispatches every complete frame in `buffer`
    ///
    /// Returns how many bytes were consumed; anything after the last
    /// delimiter is an incomplete frame the caller keeps for the next read.
    pub fn parse<C: SessionGate>(
        buffer: &[u8],
        session: SessionId,
        registry: &PacketRegistry<C>,
        ctx: &mut C,
    ) -> usize {
        let mut consumed = 0;
        while let Some(end) = buffer[consumed..].iter().position(|&b| b == DELIMITER) {
            let frame = &buffer[consumed..consumed + end];
            consumed += end + 1;

            if frame.is_empty() {
                continue;
            }
            match unescape(frame) {
                Ok(body) => {
                    registry.dispatch(ctx, session, &body);
                }
                Err(e) => warn!("Session {}: dropping frame: {}", session, e),
            }
        }
        consumed
    }
}
