//! Message set exchanged between clients and the room server.
//!
//! Every message is a plain struct with [`Encode`]/[`Decode`] impls and a
//! fixed protocol id. [`Packet`] is the closed union the server dispatches on.

use crate::frame::{Decode, Encode, FrameError, FrameReader, FrameWriter};
use bytes::Bytes;

/// A message type with a fixed protocol id.
pub trait Message: Encode + Decode {
    const PROTOCOL_ID: u16;
}

/// Serializes a message into one complete frame.
pub fn encode_message<M: Message>(message: &M) -> Result<Bytes, FrameError> {
    let mut writer = FrameWriter::new(M::PROTOCOL_ID);
    message.encode(&mut writer);
    writer.finish()
}

pub const KIND_PLAYER: u8 = 0;
pub const KIND_MONSTER: u8 = 1;

/// Animation / attack state as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AnimState {
    #[default]
    Idle = 0,
    Run = 1,
    Attack = 2,
    Hit = 3,
    Death = 4,
}

impl AnimState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Run),
            2 => Some(Self::Attack),
            3 => Some(Self::Hit),
            4 => Some(Self::Death),
            _ => None,
        }
    }
}

macro_rules! record {
    ($(#[$meta:meta])* $name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default)]
        pub struct $name {
            $(pub $field: $ty),*
        }

        impl Encode for $name {
            fn encode(&self, _writer: &mut FrameWriter) {
                $(self.$field.encode(_writer);)*
            }
        }

        impl Decode for $name {
            fn decode(_reader: &mut FrameReader<'_>) -> Result<Self, FrameError> {
                Ok(Self {
                    $($field: <$ty>::decode(_reader)?),*
                })
            }
        }
    };
}

macro_rules! packets {
    ($($name:ident = $id:expr),* $(,)?) => {
        $(
            impl Message for $name {
                const PROTOCOL_ID: u16 = $id;
            }

            impl From<$name> for Packet {
                fn from(message: $name) -> Self {
                    Packet::$name(message)
                }
            }
        )*

        #[derive(Debug, Clone, PartialEq)]
        pub enum Packet {
            $($name($name)),*
        }

        impl Packet {
            pub fn protocol_id(&self) -> u16 {
                match self {
                    $(Packet::$name(_) => $id),*
                }
            }

            /// Decodes one complete frame, dispatching on its protocol id.
            pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
                let mut reader = FrameReader::new(frame)?;
                match reader.header().protocol_id {
                    $(id if id == $id => {
                        let message = $name::decode(&mut reader)?;
                        reader.finish()?;
                        Ok(Packet::$name(message))
                    })*
                    other => Err(FrameError::UnknownProtocol(other)),
                }
            }

            pub fn to_frame(&self) -> Result<Bytes, FrameError> {
                match self {
                    $(Packet::$name(message) => encode_message(message)),*
                }
            }
        }
    };
}

record!(
    /// Snapshot of one entity, sent on enter and spawn.
    EntityInfo {
        id: u32,
        kind: u8,
        name: String,
        x: f32,
        y: f32,
        hp: u16,
    }
);

record!(EnterRoom { player_name: String, room: u16 });
record!(RoomJoined { player_id: u32, room: u16, entities: Vec<EntityInfo> });
record!(Spawn { entities: Vec<EntityInfo> });
record!(Despawn { ids: Vec<u32> });
record!(Move { x: f32, y: f32 });
record!(Moved { id: u32, x: f32, y: f32 });
record!(Chat { text: String });
record!(ChatBroadcast { id: u32, text: String });
record!(Attack { target: u32, attack: u8 });
record!(Animation { id: u32, state: u8, attack: u8 });
record!(Damage { attacker: u32, target: u32, amount: u16, hp: u16 });
record!(LeaveRoom {});

packets! {
    EnterRoom = 1,
    RoomJoined = 2,
    Spawn = 3,
    Despawn = 4,
    Move = 5,
    Moved = 6,
    Chat = 7,
    ChatBroadcast = 8,
    Attack = 9,
    Animation = 10,
    Damage = 11,
    LeaveRoom = 12,
}
