//! Request and command catalog
//!
//! Every message is a struct implementing [`Packet`]: a stable string
//! identifier plus a fixed field layout. Requests flow client → server,
//! commands server → client. A frame on the wire is the escaped body
//! `<id string><fields…>` followed by [`DELIMITER`](crate::DELIMITER).

use crate::codec::{Blob, CodecError, PacketReader, PacketWriter};
use crate::{
    AccessLevel, ChatChannel, Direction, EquipmentSlot, ItemStack, Job, MovementType, StatKind,
    Stats, TargetKind, DELIMITER, ESCAPE, ESCAPE_MASK,
};

/// A self-identifying, self-serializing protocol message
pub trait Packet: Sized {
    const ID: &'static str;

    fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError>;
    fn write(&self, writer: &mut PacketWriter);
}

macro_rules! packet {
    (
        $(#[$meta:meta])*
        $name:ident = $id:literal { $($(#[$fmeta:meta])* $field:ident : $ty:ty),* $(,)? }
    ) => {
        wire_struct!($(#[$meta])* $name { $($(#[$fmeta])* $field : $ty),* });

        impl Packet for $name {
            const ID: &'static str = $id;

            fn read(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
                <Self as $crate::codec::WireField>::read_field(reader)
            }

            fn write(&self, writer: &mut PacketWriter) {
                $crate::codec::WireField::write_field(self, writer)
            }
        }
    };
}

/// Serializes a packet into an unescaped body: identifier then fields
pub fn encode_body<P: Packet>(packet: &P) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    writer.write_string(P::ID);
    packet.write(&mut writer);
    writer.into_vec()
}

/// Serializes a packet into a complete, delimiter-terminated frame
pub fn encode_frame<P: Packet>(packet: &P) -> Vec<u8> {
    let body = encode_body(packet);
    let mut frame = escape(&body);
    frame.push(DELIMITER);
    frame
}

/// Byte-stuffs a body so it never contains the delimiter
pub fn escape(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 4);
    for &byte in body {
        if byte == DELIMITER || byte == ESCAPE {
            out.push(ESCAPE);
            out.push(byte ^ ESCAPE_MASK);
        } else {
            out.push(byte);
        }
    }
    out
}

/// Reverses [`escape`]
pub fn unescape(frame: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(frame.len());
    let mut bytes = frame.iter().enumerate();
    while let Some((offset, &byte)) = bytes.next() {
        if byte != ESCAPE {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some((_, &next)) if next == DELIMITER ^ ESCAPE_MASK || next == ESCAPE ^ ESCAPE_MASK => {
                out.push(next ^ ESCAPE_MASK)
            }
            _ => return Err(CodecError::InvalidEscape(offset)),
        }
    }
    Ok(out)
}

/// Removes every complete frame from the front of `buffer` and returns
/// their unescaped bodies; a trailing partial frame stays in the buffer
pub fn drain_frames(buffer: &mut Vec<u8>) -> Vec<Result<Vec<u8>, CodecError>> {
    let mut bodies = Vec::new();
    let mut start = 0;
    while let Some(pos) = buffer[start..].iter().position(|&b| b == DELIMITER) {
        let end = start + pos;
        if end > start {
            bodies.push(unescape(&buffer[start..end]));
        }
        start = end + 1;
    }
    buffer.drain(..start);
    bodies
}

/// Decodes an unescaped body as `P`, or `None` when it carries another identifier
pub fn decode_body<P: Packet>(body: &[u8]) -> Result<Option<P>, CodecError> {
    let mut reader = PacketReader::new(body);
    if reader.read_string()? != P::ID {
        return Ok(None);
    }
    P::read(&mut reader).map(Some)
}

// ---------------------------------------------------------------------------
// Snapshot types embedded in commands
// ---------------------------------------------------------------------------

wire_struct!(
    /// What other clients need to draw a player
    PlayerSnapshot {
        session: u16,
        name: String,
        job: Job,
        sprite: u16,
        level: u32,
        x: u16,
        y: u16,
        direction: Direction,
        health: u32,
        max_health: u32,
        access: AccessLevel,
        player_killer: bool,
    }
);

wire_struct!(
    NpcSnapshot {
        index: u16,
        template: u32,
        name: String,
        sprite: u16,
        x: u16,
        y: u16,
        direction: Direction,
        health: u32,
        max_health: u32,
    }
);

wire_struct!(
    CharacterSummary {
        name: String,
        job: Job,
        sprite: u16,
        level: u32,
    }
);

wire_struct!(
    MapItemSnapshot {
        item: u32,
        quantity: u32,
        x: u16,
        y: u16,
    }
);

wire_struct!(
    InventoryEntry {
        slot: u8,
        stack: ItemStack,
    }
);

// ---------------------------------------------------------------------------
// Requests: client → server
// ---------------------------------------------------------------------------

packet!(RegisterRequest = "Register" { name: String, password: String });
packet!(LoginRequest = "Login" { name: String, password: String, version: u16 });
packet!(PingRequest = "Ping" { timestamp: u64 });
packet!(CreateCharacterRequest = "CreateCharacter" { name: String, job: Job, sprite: u16 });
packet!(DeleteCharacterRequest = "DeleteCharacter" { name: String });
packet!(UseCharacterRequest = "UseCharacter" { name: String });
packet!(LogoutRequest = "Logout" {});
packet!(
    /// The client states where it believes the player stands before moving
    MoveRequest = "Move" {
        direction: Direction,
        movement: MovementType,
        x: u16,
        y: u16,
    }
);
packet!(FaceRequest = "Face" { direction: Direction });
packet!(AttackRequest = "Attack" {});
packet!(ChatRequest = "Chat" { channel: ChatChannel, message: String });
packet!(UseItemRequest = "UseItem" { slot: u8 });
packet!(UnequipRequest = "Unequip" { slot: EquipmentSlot });
packet!(DropItemRequest = "DropItem" { slot: u8, quantity: u32 });
packet!(PickupItemRequest = "PickupItem" {});
packet!(TrainStatRequest = "TrainStat" { stat: StatKind });
packet!(PartyInviteRequest = "PartyInvite" { name: String });
packet!(PartyAcceptRequest = "PartyAccept" {});
packet!(PartyLeaveRequest = "PartyLeave" {});
packet!(AssetRequest = "RequestAsset" { hash: String });
packet!(CancelAssetRequest = "CancelAsset" { handle: u32 });

// Privileged
packet!(WarpRequest = "Warp" { map: String, x: u16, y: u16 });
packet!(RespawnMapRequest = "RespawnMap" {});
packet!(KickRequest = "Kick" { name: String });
packet!(BanRequest = "Ban" { name: String });
packet!(SetAccessRequest = "SetAccess" { name: String, access: AccessLevel });
packet!(SpawnItemRequest = "SpawnItem" { item: u32, quantity: u32 });

// ---------------------------------------------------------------------------
// Commands: server → client
// ---------------------------------------------------------------------------

packet!(AlertCommand = "Alert" { message: String });
packet!(PongCommand = "Pong" { timestamp: u64 });
packet!(LoginOkCommand = "LoginOk" { session: u16 });
packet!(CharacterListCommand = "CharacterList" { characters: Vec<CharacterSummary> });
packet!(
    /// First command of every map snapshot
    JoinMapCommand = "JoinMap" {
        map: String,
        width: u16,
        height: u16,
        pvp: bool,
    }
);
packet!(
    /// The receiving client's own identity; never sent about anyone else
    PlayerDataCommand = "PlayerData" {
        snapshot: PlayerSnapshot,
        stats: Stats,
        stat_points: u32,
        experience: u64,
        next_level: u64,
    }
);
packet!(SpawnPlayerCommand = "SpawnPlayer" { snapshot: PlayerSnapshot });
packet!(DespawnPlayerCommand = "DespawnPlayer" { session: u16 });
packet!(SpawnNpcCommand = "SpawnNpc" { snapshot: NpcSnapshot });
packet!(NpcDeadCommand = "NpcDead" { index: u16 });
packet!(
    PlayerMoveCommand = "PlayerMove" {
        session: u16,
        x: u16,
        y: u16,
        direction: Direction,
        movement: MovementType,
    }
);
packet!(
    /// Authoritative position of the receiving player, sent after a rejected move
    PlayerPositionCommand = "PlayerPosition" {
        x: u16,
        y: u16,
        direction: Direction,
    }
);
packet!(PlayerDirCommand = "PlayerDir" { session: u16, direction: Direction });
packet!(NpcMoveCommand = "NpcMove" { index: u16, x: u16, y: u16, direction: Direction });
packet!(PlayerAttackCommand = "PlayerAttack" { session: u16 });
packet!(NpcAttackCommand = "NpcAttack" { index: u16 });
packet!(
    DamageCommand = "Damage" {
        target: TargetKind,
        index: u16,
        amount: u32,
        blocked: bool,
    }
);
packet!(
    PlayerVitalsCommand = "PlayerVitals" {
        session: u16,
        health: u32,
        max_health: u32,
        mana: u32,
        max_mana: u32,
        stamina: u32,
        max_stamina: u32,
    }
);
packet!(NpcVitalsCommand = "NpcVitals" { index: u16, health: u32, max_health: u32 });
packet!(
    ProgressCommand = "Progress" {
        level: u32,
        experience: u64,
        next_level: u64,
        stat_points: u32,
        stats: Stats,
    }
);
packet!(InventoryCommand = "Inventory" { items: Vec<InventoryEntry> });
packet!(
    EquipmentCommand = "Equipment" {
        weapon: Option<u8>,
        armor: Option<u8>,
        helmet: Option<u8>,
        shield: Option<u8>,
    }
);
packet!(MapItemCommand = "MapItem" { index: u16, item: Option<MapItemSnapshot> });
packet!(ChatCommand = "ChatMsg" { channel: ChatChannel, from: String, message: String });
packet!(DoorCommand = "Door" { x: u16, y: u16, open: bool });
packet!(PartyInviteCommand = "PartyInvited" { from: String });
packet!(PartyCommand = "Party" { partner: Option<String> });
packet!(
    AssetChunkCommand = "AssetChunk" {
        handle: u32,
        offset: u64,
        data: Blob,
        last: bool,
    }
);
packet!(AssetUnavailableCommand = "AssetUnavailable" { hash: String });
