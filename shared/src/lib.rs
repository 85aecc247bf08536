//! # Shared Wire Protocol
//!
//! Everything both ends of a room-server connection agree on: the receive
//! window, the length-prefixed frame codec, and the message set.
//!
//! ## Framing
//! Each message is `u16 total_length` + `u16 protocol_id` + payload. Several
//! messages may arrive in one read, and a single message may be split across
//! reads; [`frame::decode_frames`] handles both and reports how many bytes
//! it consumed so the caller can slide its [`buffer::RecvBuffer`].

pub mod buffer;
pub mod frame;
pub mod packets;

pub use buffer::RecvBuffer;
pub use frame::{decode_frames, Decode, Encode, FrameError, FrameHeader, FrameReader, FrameWriter};
pub use packets::{encode_message, AnimState, EntityInfo, Message, Packet};

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 7777;

/// Capacity of a connection's receive window.
pub const RECV_BUFFER_SIZE: usize = 0x10000;
