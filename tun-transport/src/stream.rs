use tun_collections::bytes::RecvBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
	Control,
	Data,
	Unknown,
}

/// Per-stream state: a send queue with a write offset, and a receive buffer with a bounded
/// cap. Owned exclusively by the stream entry (§5) — nothing else mutates these fields.
pub struct Stream {
	pub kind: StreamKind,
	send_queue: Vec<u8>,
	send_offset: usize,
	send_final_requested: bool,
	fin_sent: bool,
	pub received_final: bool,
	pub request_handled: bool,
	recv: RecvBuf,
}

impl Stream {
	pub(crate) fn new(kind: StreamKind, recv_cap: usize) -> Self {
		Self {
			kind,
			send_queue: Vec::new(),
			send_offset: 0,
			send_final_requested: false,
			fin_sent: false,
			received_final: false,
			request_handled: false,
			recv: RecvBuf::new(recv_cap),
		}
	}

	/// Appends to the send queue. Returns `Err` once a previous call already set `final`,
	/// since no further send is allowed on that stream.
	pub(crate) fn enqueue_send(&mut self, bytes: &[u8], fin: bool) -> Result<(), ()> {
		if self.send_final_requested {
			return Err(());
		}

		self.send_queue.extend_from_slice(bytes);
		self.send_final_requested = fin;
		Ok(())
	}

	pub(crate) fn pending_send(&self) -> &[u8] {
		&self.send_queue[self.send_offset..]
	}

	/// Whether the fin marker still needs to be handed to the transport.
	pub(crate) fn fin_pending(&self) -> bool {
		self.send_final_requested && !self.fin_sent
	}

	pub(crate) fn mark_fin_sent(&mut self) {
		self.fin_sent = true;
	}

	pub(crate) fn advance_send(&mut self, n: usize) {
		self.send_offset += n;
	}

	/// Whether the prepare-to-send hook should keep being invoked for this stream.
	pub(crate) fn still_active(&self) -> bool {
		self.send_offset < self.send_queue.len() || (self.send_final_requested && !self.fin_sent)
	}

	pub(crate) fn push_recv(&mut self, bytes: &[u8]) -> Result<(), ()> {
		self.recv.push(bytes)
	}

	pub fn recv_buf(&self) -> &[u8] {
		self.recv.as_slice()
	}

	pub fn consume_recv(&mut self, n: usize) {
		self.recv.consume(n);
	}
}
