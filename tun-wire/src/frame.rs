/// Fixed 6-byte signature that precedes every data-stream message, bit-identical with the
/// edge's expectation.
pub const PREAMBLE_SIGNATURE: [u8; 6] = [0x0A, 0x36, 0xCD, 0x12, 0xA1, 0x3E];

/// The 2-byte ASCII version following the signature.
pub const PREAMBLE_VERSION: [u8; 2] = *b"01";

/// Signature for the sibling RPC-stream framing; not used by this core, kept for reference.
pub const RPC_STREAM_SIGNATURE: [u8; 6] = [0x52, 0xBB, 0x82, 0x5C, 0xDB, 0x65];

/// Length in bytes of the signature + version preamble.
pub const PREAMBLE_LEN: usize = 8;

/// Length in bytes of the single-segment table (count-1 word + one segment-size word).
const SEGMENT_TABLE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
	/// Fewer bytes are present than the preamble plus segment table require.
	Truncated,
	BadSignature,
	BadVersion,
	/// `count - 1` in the segment table was nonzero; multi-segment messages aren't supported.
	MultiSegment,
}

/// Wraps an already-encoded segment body (see [`crate::Encoder::finish`]) with the preamble
/// and single-segment table.
pub fn encode_message(body: &[u8]) -> Vec<u8> {
	debug_assert_eq!(body.len() % 8, 0);

	let seg_words = (body.len() / 8) as u32;

	let mut out = Vec::with_capacity(PREAMBLE_LEN + SEGMENT_TABLE_LEN + body.len());
	out.extend_from_slice(&PREAMBLE_SIGNATURE);
	out.extend_from_slice(&PREAMBLE_VERSION);
	out.extend_from_slice(&0u32.to_le_bytes());
	out.extend_from_slice(&seg_words.to_le_bytes());
	out.extend_from_slice(body);
	out
}

/// Given a prefix of received bytes, returns the exact wire size of the next message if the
/// whole of it is present, or `0` if more data is needed.
///
/// Parses only the segment table, never the message body, so it can run on every delivery
/// without re-decoding already-seen bytes.
pub fn message_size(bytes: &[u8]) -> usize {
	let header_len = PREAMBLE_LEN + SEGMENT_TABLE_LEN;

	if bytes.len() < header_len {
		return 0;
	}

	let count_minus_1 = u32::from_le_bytes(bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4].try_into().unwrap());

	if count_minus_1 != 0 {
		return 0;
	}

	let seg_words = u32::from_le_bytes(bytes[PREAMBLE_LEN + 4..header_len].try_into().unwrap());
	let total = header_len + seg_words as usize * 8;

	if bytes.len() < total {
		return 0;
	}

	total
}

/// Validates the preamble and segment table of `bytes` and returns the segment body slice
/// ready for [`crate::Decoder::new`].
pub fn decode_message(bytes: &[u8]) -> Result<&[u8], FrameError> {
	if bytes.len() < PREAMBLE_LEN {
		return Err(FrameError::Truncated);
	}

	if bytes[..6] != PREAMBLE_SIGNATURE {
		return Err(FrameError::BadSignature);
	}

	if bytes[6..8] != PREAMBLE_VERSION {
		return Err(FrameError::BadVersion);
	}

	let rest = &bytes[PREAMBLE_LEN..];

	if rest.len() < SEGMENT_TABLE_LEN {
		return Err(FrameError::Truncated);
	}

	let count_minus_1 = u32::from_le_bytes(rest[0..4].try_into().unwrap());

	if count_minus_1 != 0 {
		return Err(FrameError::MultiSegment);
	}

	let seg_words = u32::from_le_bytes(rest[4..8].try_into().unwrap());
	let total = SEGMENT_TABLE_LEN + seg_words as usize * 8;

	if rest.len() < total {
		return Err(FrameError::Truncated);
	}

	Ok(&rest[SEGMENT_TABLE_LEN..total])
}

/// Wraps an already-encoded segment body with just the single-segment table — no preamble.
///
/// The control stream carries the capability-RPC codec's own framing but not the data-stream
/// preamble: that signature is scoped to data-stream messages, and the sibling RPC-stream
/// signature is not used by this core either, so registration frames are bare segment tables.
pub fn encode_segment(body: &[u8]) -> Vec<u8> {
	debug_assert_eq!(body.len() % 8, 0);

	let seg_words = (body.len() / 8) as u32;

	let mut out = Vec::with_capacity(SEGMENT_TABLE_LEN + body.len());
	out.extend_from_slice(&0u32.to_le_bytes());
	out.extend_from_slice(&seg_words.to_le_bytes());
	out.extend_from_slice(body);
	out
}

/// Same contract as [`message_size`] but for segment-table-only (preamble-less) framing.
pub fn segment_size(bytes: &[u8]) -> usize {
	if bytes.len() < SEGMENT_TABLE_LEN {
		return 0;
	}

	let count_minus_1 = u32::from_le_bytes(bytes[0..4].try_into().unwrap());

	if count_minus_1 != 0 {
		return 0;
	}

	let seg_words = u32::from_le_bytes(bytes[4..SEGMENT_TABLE_LEN].try_into().unwrap());
	let total = SEGMENT_TABLE_LEN + seg_words as usize * 8;

	if bytes.len() < total {
		return 0;
	}

	total
}

/// Validates the segment table of `bytes` (no preamble) and returns the segment body slice.
pub fn decode_segment(bytes: &[u8]) -> Result<&[u8], FrameError> {
	if bytes.len() < SEGMENT_TABLE_LEN {
		return Err(FrameError::Truncated);
	}

	let count_minus_1 = u32::from_le_bytes(bytes[0..4].try_into().unwrap());

	if count_minus_1 != 0 {
		return Err(FrameError::MultiSegment);
	}

	let seg_words = u32::from_le_bytes(bytes[4..SEGMENT_TABLE_LEN].try_into().unwrap());
	let total = SEGMENT_TABLE_LEN + seg_words as usize * 8;

	if bytes.len() < total {
		return Err(FrameError::Truncated);
	}

	Ok(&bytes[SEGMENT_TABLE_LEN..total])
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{Decoder, Encoder};

	fn sample_message() -> Vec<u8> {
		let mut enc = Encoder::new(4096);
		let ptr = enc.alloc_words(1).unwrap();
		enc.write_text(ptr, "hello").unwrap();
		encode_message(&enc.finish())
	}

	#[test]
	fn preamble_round_trips() {
		let msg = sample_message();
		let body = decode_message(&msg).unwrap();
		let dec = Decoder::new(body);
		assert_eq!(dec.read_text(0).unwrap(), "hello");
	}

	#[test]
	fn any_single_altered_preamble_byte_is_a_framing_error() {
		let msg = sample_message();

		for i in 0..PREAMBLE_LEN {
			let mut corrupt = msg.clone();
			corrupt[i] ^= 0xFF;
			assert!(decode_message(&corrupt).is_err(), "byte {i} should have been detected as corrupt");
		}
	}

	#[test]
	fn size_probe_handles_concatenated_and_truncated_messages() {
		let m1 = sample_message();
		let m2 = sample_message();

		let mut concat = m1.clone();
		concat.extend_from_slice(&m2);

		assert_eq!(message_size(&concat), m1.len());
		assert_eq!(message_size(&concat[..m1.len() - 1]), 0);
	}

	#[test]
	fn segment_framing_round_trips_without_a_preamble() {
		let mut enc = Encoder::new(4096);
		let ptr = enc.alloc_words(1).unwrap();
		enc.write_text(ptr, "hello").unwrap();
		let msg = encode_segment(&enc.finish());

		assert_eq!(segment_size(&msg), msg.len());
		let body = decode_segment(&msg).unwrap();
		let dec = Decoder::new(body);
		assert_eq!(dec.read_text(0).unwrap(), "hello");
	}
}
