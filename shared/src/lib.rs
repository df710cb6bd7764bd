//! Types shared by both ends of the game protocol
//!
//! The [`codec`] module holds the byte-level reader and writer, [`packets`]
//! the catalog of requests and commands. Everything else here is the small set
//! of value types and enums that appear inside packets and persisted
//! characters alike.

use serde::{Deserialize, Serialize};

/// Implements [`codec::WireField`] for a fieldless `#[repr(u8)]` enum
macro_rules! wire_enum {
    ($name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl $name {
            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl $crate::codec::WireField for $name {
            fn read_field(
                reader: &mut $crate::codec::PacketReader<'_>,
            ) -> Result<Self, $crate::codec::CodecError> {
                let value = reader.read_u8()?;
                Self::from_u8(value).ok_or($crate::codec::CodecError::InvalidEnum {
                    kind: stringify!($name),
                    value,
                })
            }

            fn write_field(&self, writer: &mut $crate::codec::PacketWriter) {
                writer.write_u8(*self as u8);
            }
        }
    };
}

/// Declares a plain struct whose wire layout is its fields in order
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$fmeta:meta])* $field:ident : $ty:ty),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            $($(#[$fmeta])* pub $field: $ty,)*
        }

        impl $crate::codec::WireField for $name {
            #[allow(unused_variables)]
            fn read_field(
                reader: &mut $crate::codec::PacketReader<'_>,
            ) -> Result<Self, $crate::codec::CodecError> {
                Ok(Self {
                    $($field: $crate::codec::WireField::read_field(reader)?,)*
                })
            }

            #[allow(unused_variables)]
            fn write_field(&self, writer: &mut $crate::codec::PacketWriter) {
                $($crate::codec::WireField::write_field(&self.$field, writer);)*
            }
        }
    };
}

pub mod codec;
pub mod packets;

pub use codec::{Blob, CodecError, PacketReader, PacketWriter, WireField};
pub use packets::Packet;

/// Version a client must announce when logging in
pub const PROTOCOL_VERSION: u16 = 3;

/// Byte that terminates every frame on the wire
pub const DELIMITER: u8 = 0x7e;
/// Byte that introduces an escaped delimiter or escape inside a frame body
pub const ESCAPE: u8 = 0x7d;
/// Mask applied to an escaped byte
pub const ESCAPE_MASK: u8 = 0x20;

pub const MAX_INVENTORY: usize = 30;
pub const MAX_CHARACTERS: usize = 3;
pub const MAX_LEVEL: u32 = 99;
pub const MAX_NAME_LENGTH: usize = 20;
pub const MAX_CHAT_LENGTH: usize = 200;

/// Slot identity of a connected session
pub type SessionId = u16;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

wire_enum!(Direction { Up = 0, Down = 1, Left = 2, Right = 3 });

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Tile delta of one step in this direction
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    /// Direction of a single orthogonal step from `from` to `to`, if any
    pub fn between(from: (u16, u16), to: (u16, u16)) -> Option<Direction> {
        let dx = to.0 as i32 - from.0 as i32;
        let dy = to.1 as i32 - from.1 as i32;
        Direction::ALL
            .into_iter()
            .find(|direction| direction.offset() == (dx, dy))
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementType {
    Walk = 0,
    Run = 1,
}

wire_enum!(MovementType { Walk = 0, Run = 1 });

/// Privilege ladder; every privileged request names the minimum level
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum AccessLevel {
    #[default]
    Player = 0,
    Moderator = 1,
    Mapper = 2,
    Developer = 3,
    Administrator = 4,
}

wire_enum!(AccessLevel {
    Player = 0,
    Moderator = 1,
    Mapper = 2,
    Developer = 3,
    Administrator = 4,
});

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Job {
    Warrior = 0,
    Mage = 1,
    Rogue = 2,
}

wire_enum!(Job { Warrior = 0, Mage = 1, Rogue = 2 });

impl Job {
    /// Stats a freshly created character of this job starts with
    pub fn base_stats(self) -> Stats {
        match self {
            Job::Warrior => Stats {
                strength: 8,
                defense: 7,
                speed: 4,
                magic: 1,
            },
            Job::Mage => Stats {
                strength: 3,
                defense: 4,
                speed: 5,
                magic: 8,
            },
            Job::Rogue => Stats {
                strength: 6,
                defense: 4,
                speed: 9,
                magic: 1,
            },
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatChannel {
    Map = 0,
    Global = 1,
    System = 2,
}

wire_enum!(ChatChannel { Map = 0, Global = 1, System = 2 });

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquipmentSlot {
    Weapon = 0,
    Armor = 1,
    Helmet = 2,
    Shield = 3,
}

wire_enum!(EquipmentSlot {
    Weapon = 0,
    Armor = 1,
    Helmet = 2,
    Shield = 3,
});

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Strength = 0,
    Defense = 1,
    Speed = 2,
    Magic = 3,
}

wire_enum!(StatKind {
    Strength = 0,
    Defense = 1,
    Speed = 2,
    Magic = 3,
});

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Player = 0,
    Npc = 1,
}

wire_enum!(TargetKind { Player = 0, Npc = 1 });

wire_struct!(
    /// Trainable attributes of a character
    #[derive(Default, Copy, Serialize, Deserialize)]
    Stats {
        strength: u32,
        defense: u32,
        speed: u32,
        magic: u32,
    }
);

impl Stats {
    pub fn get(&self, stat: StatKind) -> u32 {
        match stat {
            StatKind::Strength => self.strength,
            StatKind::Defense => self.defense,
            StatKind::Speed => self.speed,
            StatKind::Magic => self.magic,
        }
    }

    pub fn get_mut(&mut self, stat: StatKind) -> &mut u32 {
        match stat {
            StatKind::Strength => &mut self.strength,
            StatKind::Defense => &mut self.defense,
            StatKind::Speed => &mut self.speed,
            StatKind::Magic => &mut self.magic,
        }
    }
}

wire_struct!(
    /// A quantity of one item kind; durability only matters for equipment
    #[derive(Copy, Serialize, Deserialize)]
    ItemStack {
        item: u32,
        quantity: u32,
        durability: u32,
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_offsets_are_unit_steps() {
        for direction in Direction::ALL {
            let (dx, dy) = direction.offset();
            assert_eq!(dx.abs() + dy.abs(), 1);
        }
    }

    #[test]
    fn test_direction_between_adjacent_tiles() {
        assert_eq!(Direction::between((5, 5), (5, 4)), Some(Direction::Up));
        assert_eq!(Direction::between((5, 5), (6, 5)), Some(Direction::Right));
        assert_eq!(Direction::between((5, 5), (7, 5)), None);
        assert_eq!(Direction::between((5, 5), (5, 5)), None);
    }

    #[test]
    fn test_access_levels_are_ordered() {
        assert!(AccessLevel::Administrator > AccessLevel::Developer);
        assert!(AccessLevel::Moderator > AccessLevel::Player);
        assert_eq!(AccessLevel::default(), AccessLevel::Player);
    }

    #[test]
    fn test_enum_from_unknown_value() {
        assert_eq!(Direction::from_u8(4), None);
        assert_eq!(Job::from_u8(2), Some(Job::Rogue));
    }

    #[test]
    fn test_stats_accessors() {
        let mut stats = Job::Warrior.base_stats();
        *stats.get_mut(StatKind::Speed) += 3;
        assert_eq!(stats.get(StatKind::Speed), 7);
    }
}
