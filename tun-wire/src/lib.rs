//! A hand-written subset of the capability-RPC wire format: single-segment
//! messages, struct and list pointers, composite lists, text and data. No
//! multi-segment messages, far pointers, or capability pointers — the codec
//! rejects anything that needs them rather than guessing at their layout.
//!
//! This crate does no logging; every fallible primitive returns a neutral
//! error enum and leaves reporting to the caller.

mod decode;
mod encode;
mod frame;

pub use decode::{CompositeShape, Decoder, DecodeError, ListShape, StructShape};
pub use encode::{EncodeError, Encoder};
pub use frame::{
	decode_message, decode_segment, encode_message, encode_segment, message_size, segment_size, FrameError, PREAMBLE_LEN, PREAMBLE_SIGNATURE,
	PREAMBLE_VERSION, RPC_STREAM_SIGNATURE,
};

/// Element-size tag for byte-sized list elements (used for text and raw data).
pub const SIZE_TAG_BYTE: u8 = 2;
/// Element-size tag marking a composite (struct-shaped) list.
pub const SIZE_TAG_COMPOSITE: u8 = 7;
