/// A growable byte accumulator with a hard cap, used for per-stream receive buffers.
///
/// Starts at 4 KiB and doubles on growth; pushing past `cap` is rejected rather than
/// growing further, matching the bounded-buffer policy for untrusted peers.
pub struct RecvBuf {
	buf: Vec<u8>,
	cap: usize,
}

const INITIAL: usize = 4 * 1024;

impl RecvBuf {
	pub fn new(cap: usize) -> Self {
		Self { buf: Vec::with_capacity(INITIAL.min(cap)), cap }
	}

	/// Appends `bytes` to the accumulator. Returns `Err` if doing so would exceed the cap.
	pub fn push(&mut self, bytes: &[u8]) -> Result<(), ()> {
		if self.buf.len() + bytes.len() > self.cap {
			return Err(());
		}

		if self.buf.capacity() < self.buf.len() + bytes.len() {
			let want = (self.buf.capacity() * 2).max(INITIAL).min(self.cap);
			self.buf.reserve(want.saturating_sub(self.buf.len()));
		}

		self.buf.extend_from_slice(bytes);
		Ok(())
	}

	/// Drops the first `n` bytes, shifting the remainder to the front.
	pub fn consume(&mut self, n: usize) {
		self.buf.drain(..n);
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.buf
	}

	pub fn len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}
}
