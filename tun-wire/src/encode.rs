/// Errors a scratch-buffer overflow or an offset that doesn't fit the wire format can produce.
///
/// Never a panic: an undersized caller buffer is an expected, recoverable condition (§5 calls
/// for stack-sized scratch buffers), not a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
	/// Allocating more words would exceed the buffer's configured capacity.
	BufferFull,
	/// A pointer's target is further than 30 signed words away.
	OffsetOverflow,
	/// A list would need more than 2^29-1 elements, or a struct more than 2^16-1 words of
	/// either section.
	CountOverflow,
}

/// Builds a single-segment capability-RPC message body into a caller-capped buffer.
///
/// All allocations are whole words, so the buffer length is always a multiple of 8 and the
/// body needs no extra padding when handed to [`crate::encode_message`].
pub struct Encoder {
	buf: Vec<u8>,
	cap: usize,
}

fn pack_struct_word(signed_offset: i32, data_words: u16, ptr_words: u16) -> u64 {
	let offset_bits = (signed_offset as u32) & 0x3FFF_FFFF;
	(offset_bits as u64) << 2 | (data_words as u64) << 32 | (ptr_words as u64) << 48
}

fn pack_list_word(signed_offset: i32, size_tag: u8, count: u32) -> u64 {
	let offset_bits = (signed_offset as u32) & 0x3FFF_FFFF;
	1 | (offset_bits as u64) << 2 | (size_tag as u64 & 0x7) << 32 | (count as u64 & 0x1FFF_FFFF) << 35
}

impl Encoder {
	/// `cap` is the hard ceiling on the encoded body size, in bytes (recommended 4 KiB, §5).
	pub fn new(cap: usize) -> Self {
		Self { buf: Vec::with_capacity(cap.min(4096)), cap }
	}

	/// Reserves `words` eight-byte words at the end of the buffer, zeroed, and returns their
	/// byte offset.
	pub fn alloc_words(&mut self, words: u32) -> Result<usize, EncodeError> {
		let bytes = words as usize * 8;

		if self.buf.len() + bytes > self.cap {
			return Err(EncodeError::BufferFull);
		}

		let off = self.buf.len();
		self.buf.resize(off + bytes, 0);
		Ok(off)
	}

	fn put_u64(&mut self, off: usize, word: u64) {
		self.buf[off..off + 8].copy_from_slice(&word.to_le_bytes());
	}

	/// Writes a struct pointer at `ptr_off` targeting the struct at `struct_off`.
	pub fn write_struct_ptr(&mut self, ptr_off: usize, struct_off: usize, data_words: u16, ptr_words: u16) -> Result<(), EncodeError> {
		let signed_offset = signed_word_offset(ptr_off, struct_off)?;
		self.put_u64(ptr_off, pack_struct_word(signed_offset, data_words, ptr_words));
		Ok(())
	}

	/// Zeroes the word at `ptr_off`, encoding a null pointer.
	pub fn write_null(&mut self, ptr_off: usize) {
		self.put_u64(ptr_off, 0);
	}

	/// Writes a list pointer at `ptr_off` targeting the list body at `list_off`. For
	/// `size_tag == 7` (composite), `count` must already be the total body word count
	/// including the tag word.
	pub fn write_list_ptr(&mut self, ptr_off: usize, list_off: usize, size_tag: u8, count: u32) -> Result<(), EncodeError> {
		if count > 0x1FFF_FFFF {
			return Err(EncodeError::CountOverflow);
		}

		let signed_offset = signed_word_offset(ptr_off, list_off)?;
		self.put_u64(ptr_off, pack_list_word(signed_offset, size_tag, count));
		Ok(())
	}

	/// Allocates a composite list body of `n` elements shaped `(data_words, ptr_words)`,
	/// writes its tag word and the list pointer at `ptr_off`, and returns the byte offset of
	/// the first element.
	pub fn write_composite_list(&mut self, ptr_off: usize, n: u32, data_words: u16, ptr_words: u16) -> Result<usize, EncodeError> {
		let stride = data_words as u32 + ptr_words as u32;
		let body_words = 1u32.checked_add(n.checked_mul(stride).ok_or(EncodeError::CountOverflow)?).ok_or(EncodeError::CountOverflow)?;

		let list_off = self.alloc_words(body_words)?;

		// The tag word reuses the struct pointer layout, except its "offset" field holds the
		// element count rather than a relative pointer offset.
		let tag_offset: i32 = n.try_into().map_err(|_| EncodeError::CountOverflow)?;
		self.put_u64(list_off, pack_struct_word(tag_offset, data_words, ptr_words));

		self.write_list_ptr(ptr_off, list_off, crate::SIZE_TAG_COMPOSITE, body_words)?;

		Ok(list_off + 8)
	}

	/// Writes `s` as a NUL-terminated text list and points `ptr_off` at it.
	pub fn write_text(&mut self, ptr_off: usize, s: &str) -> Result<(), EncodeError> {
		let byte_len = s.len() + 1;
		let words = ((byte_len + 7) / 8) as u32;
		let off = self.alloc_words(words)?;

		self.buf[off..off + s.len()].copy_from_slice(s.as_bytes());
		self.buf[off + s.len()] = 0;

		self.write_list_ptr(ptr_off, off, crate::SIZE_TAG_BYTE, byte_len as u32)
	}

	/// Writes `data` as a raw byte list (no trailing NUL) and points `ptr_off` at it.
	pub fn write_data(&mut self, ptr_off: usize, data: &[u8]) -> Result<(), EncodeError> {
		let words = ((data.len() + 7) / 8) as u32;
		let off = self.alloc_words(words)?;

		self.buf[off..off + data.len()].copy_from_slice(data);

		self.write_list_ptr(ptr_off, off, crate::SIZE_TAG_BYTE, data.len() as u32)
	}

	pub fn write_u8(&mut self, off: usize, v: u8) {
		self.buf[off] = v;
	}

	pub fn write_u16(&mut self, off: usize, v: u16) {
		self.buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
	}

	pub fn write_u32(&mut self, off: usize, v: u32) {
		self.buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
	}

	pub fn write_u64(&mut self, off: usize, v: u64) {
		self.put_u64(off, v);
	}

	pub fn write_i64(&mut self, off: usize, v: i64) {
		self.buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
	}

	/// Sets bit `bit` (0 = LSB) of the byte at `byte_off`.
	pub fn set_bit(&mut self, byte_off: usize, bit: u8) {
		self.buf[byte_off] |= 1 << bit;
	}

	pub fn bytes_written(&self) -> usize {
		self.buf.len()
	}

	/// Consumes the encoder, returning the finished (already word-aligned) segment body.
	pub fn finish(self) -> Vec<u8> {
		debug_assert_eq!(self.buf.len() % 8, 0);
		self.buf
	}
}

fn signed_word_offset(ptr_off: usize, target_off: usize) -> Result<i32, EncodeError> {
	let rel = (target_off as i64 - (ptr_off as i64 + 8)) / 8;
	i32::try_from(rel).map_err(|_| EncodeError::OffsetOverflow).and_then(|v| if (-(1 << 29)..(1 << 29)).contains(&v) { Ok(v) } else { Err(EncodeError::OffsetOverflow) })
}
