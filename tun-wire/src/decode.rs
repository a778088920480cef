/// Errors produced while reading a segment. All are recoverable; the codec never panics on
/// untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
	/// A pointer, list body, or struct data/pointer section falls outside the segment.
	OutOfBounds,
	/// The pointer's type tag didn't match what the caller asked for (e.g. a list pointer
	/// where a struct pointer was expected), or was a far/capability pointer.
	WrongType,
	/// A list pointer was expected to be composite (size tag 7) but wasn't.
	NotComposite,
	/// Text or data was read from a list whose element size tag wasn't byte-sized.
	ElementSizeMismatch,
}

/// The shape of a decoded struct pointer: where its data section starts, and how many words
/// each of its two sections span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructShape {
	pub off: usize,
	pub data_words: u16,
	pub ptr_words: u16,
}

/// The shape of a decoded (non-composite) list pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListShape {
	pub off: usize,
	pub size_tag: u8,
	pub count: u32,
}

/// The shape of a decoded composite list: `off` is the byte offset of the first element,
/// immediately after the tag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeShape {
	pub off: usize,
	pub n: u32,
	pub data_words: u16,
	pub ptr_words: u16,
}

impl CompositeShape {
	/// Returns `(data_section_off, ptr_section_off)` for element `i`, bounds-checked against
	/// `n`.
	pub fn element(&self, i: u32) -> Option<(usize, usize)> {
		if i >= self.n {
			return None;
		}

		let stride = 8 * (self.data_words as usize + self.ptr_words as usize);
		let data_off = self.off + i as usize * stride;
		Some((data_off, data_off + 8 * self.data_words as usize))
	}
}

/// A read-only view over a single decoded segment body.
pub struct Decoder<'a> {
	seg: &'a [u8],
}

impl<'a> Decoder<'a> {
	pub fn new(seg: &'a [u8]) -> Self {
		Self { seg }
	}

	fn word_at(&self, off: usize) -> Result<u64, DecodeError> {
		let bytes = self.seg.get(off..off + 8).ok_or(DecodeError::OutOfBounds)?;
		Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
	}

	/// The root struct pointer, at segment word 0.
	pub fn root(&self) -> Result<Option<StructShape>, DecodeError> {
		self.read_struct_ptr(0)
	}

	/// Reads the struct pointer at `ptr_off`. `Ok(None)` means a null pointer (all-zero word).
	pub fn read_struct_ptr(&self, ptr_off: usize) -> Result<Option<StructShape>, DecodeError> {
		let word = self.word_at(ptr_off)?;

		if word == 0 {
			return Ok(None);
		}

		if word & 0x3 != 0 {
			return Err(DecodeError::WrongType);
		}

		let offset = signed_offset(word);
		let data_words = ((word >> 32) & 0xFFFF) as u16;
		let ptr_words = ((word >> 48) & 0xFFFF) as u16;

		let off = target_offset(ptr_off, offset)?;
		let end = off.checked_add(8 * (data_words as usize + ptr_words as usize)).ok_or(DecodeError::OutOfBounds)?;

		if end > self.seg.len() {
			return Err(DecodeError::OutOfBounds);
		}

		Ok(Some(StructShape { off, data_words, ptr_words }))
	}

	/// Reads the list pointer at `ptr_off`. `Ok(None)` means a null pointer.
	pub fn read_list_ptr(&self, ptr_off: usize) -> Result<Option<ListShape>, DecodeError> {
		let word = self.word_at(ptr_off)?;

		if word == 0 {
			return Ok(None);
		}

		if word & 0x3 != 1 {
			return Err(DecodeError::WrongType);
		}

		let offset = signed_offset(word);
		let size_tag = ((word >> 32) & 0x7) as u8;
		let count = ((word >> 35) & 0x1FFF_FFFF) as u32;

		let off = target_offset(ptr_off, offset)?;

		let body_words = if size_tag == crate::SIZE_TAG_COMPOSITE { count as usize } else { element_section_words(size_tag, count) };

		let end = off.checked_add(8 * body_words).ok_or(DecodeError::OutOfBounds)?;

		if end > self.seg.len() {
			return Err(DecodeError::OutOfBounds);
		}

		Ok(Some(ListShape { off, size_tag, count }))
	}

	/// Reads a composite list pointer, also consuming its tag word to recover per-element
	/// shape and count.
	pub fn read_composite_list(&self, ptr_off: usize) -> Result<Option<CompositeShape>, DecodeError> {
		let shape = match self.read_list_ptr(ptr_off)? {
			None => return Ok(None),
			Some(s) => s,
		};

		if shape.size_tag != crate::SIZE_TAG_COMPOSITE {
			return Err(DecodeError::NotComposite);
		}

		let tag = self.word_at(shape.off)?;

		if tag & 0x3 != 0 {
			return Err(DecodeError::WrongType);
		}

		let n = ((tag >> 2) & 0x3FFF_FFFF) as u32;
		let data_words = ((tag >> 32) & 0xFFFF) as u16;
		let ptr_words = ((tag >> 48) & 0xFFFF) as u16;

		let first = shape.off + 8;
		let end = first.checked_add(n as usize * 8 * (data_words as usize + ptr_words as usize)).ok_or(DecodeError::OutOfBounds)?;

		if end > self.seg.len() {
			return Err(DecodeError::OutOfBounds);
		}

		Ok(Some(CompositeShape { off: first, n, data_words, ptr_words }))
	}

	/// Reads a text list at `ptr_off`. A null pointer decodes to an empty string. The
	/// returned slice excludes the trailing NUL.
	pub fn read_text(&self, ptr_off: usize) -> Result<&'a str, DecodeError> {
		let shape = match self.read_list_ptr(ptr_off)? {
			None => return Ok(""),
			Some(s) => s,
		};

		if shape.size_tag != crate::SIZE_TAG_BYTE {
			return Err(DecodeError::ElementSizeMismatch);
		}

		let len = shape.count as usize;
		let bytes = self.seg.get(shape.off..shape.off + len).ok_or(DecodeError::OutOfBounds)?;
		let (content, _nul) = bytes.split_at(len.saturating_sub(1));

		std::str::from_utf8(content).map_err(|_| DecodeError::ElementSizeMismatch)
	}

	/// Reads a raw data list at `ptr_off`. A null pointer decodes to an empty slice.
	pub fn read_data(&self, ptr_off: usize) -> Result<&'a [u8], DecodeError> {
		let shape = match self.read_list_ptr(ptr_off)? {
			None => return Ok(&[]),
			Some(s) => s,
		};

		if shape.size_tag != crate::SIZE_TAG_BYTE {
			return Err(DecodeError::ElementSizeMismatch);
		}

		self.seg.get(shape.off..shape.off + shape.count as usize).ok_or(DecodeError::OutOfBounds)
	}

	fn struct_bounds(&self, s: &StructShape, byte_off: usize, len: usize) -> Result<usize, DecodeError> {
		if byte_off + len > 8 * s.data_words as usize {
			return Err(DecodeError::OutOfBounds);
		}

		Ok(s.off + byte_off)
	}

	pub fn struct_u8(&self, s: &StructShape, byte_off: usize) -> Result<u8, DecodeError> {
		let off = self.struct_bounds(s, byte_off, 1)?;
		Ok(self.seg[off])
	}

	pub fn struct_u16(&self, s: &StructShape, byte_off: usize) -> Result<u16, DecodeError> {
		let off = self.struct_bounds(s, byte_off, 2)?;
		Ok(u16::from_le_bytes(self.seg[off..off + 2].try_into().unwrap()))
	}

	pub fn struct_u32(&self, s: &StructShape, byte_off: usize) -> Result<u32, DecodeError> {
		let off = self.struct_bounds(s, byte_off, 4)?;
		Ok(u32::from_le_bytes(self.seg[off..off + 4].try_into().unwrap()))
	}

	pub fn struct_u64(&self, s: &StructShape, byte_off: usize) -> Result<u64, DecodeError> {
		let off = self.struct_bounds(s, byte_off, 8)?;
		Ok(u64::from_le_bytes(self.seg[off..off + 8].try_into().unwrap()))
	}

	pub fn struct_i64(&self, s: &StructShape, byte_off: usize) -> Result<i64, DecodeError> {
		let off = self.struct_bounds(s, byte_off, 8)?;
		Ok(i64::from_le_bytes(self.seg[off..off + 8].try_into().unwrap()))
	}

	pub fn struct_bit(&self, s: &StructShape, byte_off: usize, bit: u8) -> Result<bool, DecodeError> {
		Ok(self.struct_u8(s, byte_off)? & (1 << bit) != 0)
	}

	/// Same as [`Self::struct_i64`], but a read past the end of `s`'s data section returns
	/// `default` instead of `OutOfBounds` — the struct was legitimately encoded with trailing
	/// default-valued fields omitted, per truncated-struct semantics.
	pub fn struct_i64_or(&self, s: &StructShape, byte_off: usize, default: i64) -> Result<i64, DecodeError> {
		or_default(self.struct_i64(s, byte_off), default)
	}

	/// Same as [`Self::struct_bit`], but a read past the end of `s`'s data section returns
	/// `default` instead of `OutOfBounds`.
	pub fn struct_bit_or(&self, s: &StructShape, byte_off: usize, bit: u8, default: bool) -> Result<bool, DecodeError> {
		or_default(self.struct_bit(s, byte_off, bit), default)
	}

	/// Returns the absolute byte offset of pointer slot `index` within `s`'s pointer section.
	pub fn struct_ptr(&self, s: &StructShape, index: u16) -> Result<usize, DecodeError> {
		if index >= s.ptr_words {
			return Err(DecodeError::OutOfBounds);
		}

		Ok(s.off + 8 * s.data_words as usize + 8 * index as usize)
	}
}

fn or_default<T>(result: Result<T, DecodeError>, default: T) -> Result<T, DecodeError> {
	match result {
		Err(DecodeError::OutOfBounds) => Ok(default),
		other => other,
	}
}

fn signed_offset(word: u64) -> i32 {
	(word as u32 as i32) >> 2
}

fn target_offset(ptr_off: usize, signed_words: i32) -> Result<usize, DecodeError> {
	let abs = ptr_off as i64 + 8 + 8 * signed_words as i64;
	usize::try_from(abs).map_err(|_| DecodeError::OutOfBounds)
}

fn element_section_words(size_tag: u8, count: u32) -> usize {
	let bits_per_element: usize = match size_tag {
		0 => 0,
		1 => 1,
		2 => 8,
		3 => 16,
		4 => 32,
		5 => 64,
		6 => 64, // pointer-sized elements
		_ => 0,
	};

	(count as usize * bits_per_element + 7) / 8
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Encoder;

	#[test]
	fn out_of_bounds_struct_pointer_is_rejected() {
		// Forge a pointer word whose offset field points 1000 words past the segment, which
		// the encoder itself would never construct but a hostile peer could.
		let word: u64 = (1000u64 & 0x3FFF_FFFF) << 2;
		let mut body = word.to_le_bytes().to_vec();
		body.extend_from_slice(&[0u8; 8]);

		let dec = Decoder::new(&body);
		assert_eq!(dec.read_struct_ptr(0).unwrap_err(), DecodeError::OutOfBounds);
	}

	#[test]
	fn wrong_type_tag_is_rejected() {
		let mut enc = Encoder::new(64);
		let ptr = enc.alloc_words(1).unwrap();
		let list_off = enc.alloc_words(1).unwrap();
		enc.write_list_ptr(ptr, list_off, crate::SIZE_TAG_BYTE, 8).unwrap();

		let body = enc.finish();
		let dec = Decoder::new(&body);
		assert_eq!(dec.read_struct_ptr(ptr).unwrap_err(), DecodeError::WrongType);
	}

	#[test]
	fn non_composite_list_rejected_when_composite_required() {
		let mut enc = Encoder::new(64);
		let ptr = enc.alloc_words(1).unwrap();
		enc.write_text(ptr, "hi").unwrap();

		let body = enc.finish();
		let dec = Decoder::new(&body);
		assert_eq!(dec.read_composite_list(ptr).unwrap_err(), DecodeError::NotComposite);
	}
}
