use std::time::Duration;

use tun_transport::{Event, Session};
use tun_util::error::Result;

/// The subset of [`tun_transport::Session`] the orchestrator drives. Exists so tests can
/// substitute an in-memory fake instead of a real QUIC socket (§9's "arena + integer keys"
/// pattern already keeps the session's public surface this narrow).
pub trait Transport {
	fn open_stream(&mut self, is_control: bool) -> u64;
	fn send(&mut self, stream_id: u64, bytes: &[u8], fin: bool) -> Result<()>;
	fn recv_buf(&self, stream_id: u64) -> Option<&[u8]>;
	fn consume_recv(&mut self, stream_id: u64, n: usize);
	fn request_handled(&self, stream_id: u64) -> bool;
	fn mark_request_handled(&mut self, stream_id: u64);
	fn close(&mut self) -> Result<()>;
	fn step(&mut self, timeout: Option<Duration>) -> Result<Vec<Event>>;
	fn timeout(&self) -> Option<Duration>;
}

impl Transport for Session {
	fn open_stream(&mut self, is_control: bool) -> u64 {
		Session::open_stream(self, is_control)
	}

	fn send(&mut self, stream_id: u64, bytes: &[u8], fin: bool) -> Result<()> {
		Session::send(self, stream_id, bytes, fin)
	}

	fn recv_buf(&self, stream_id: u64) -> Option<&[u8]> {
		self.find_stream(stream_id).map(|s| s.recv_buf())
	}

	fn consume_recv(&mut self, stream_id: u64, n: usize) {
		if let Some(s) = self.find_stream_mut(stream_id) {
			s.consume_recv(n);
		}
	}

	fn request_handled(&self, stream_id: u64) -> bool {
		self.find_stream(stream_id).map(|s| s.request_handled).unwrap_or(false)
	}

	fn mark_request_handled(&mut self, stream_id: u64) {
		if let Some(s) = self.find_stream_mut(stream_id) {
			s.request_handled = true;
		}
	}

	fn close(&mut self) -> Result<()> {
		Session::close(self)
	}

	fn step(&mut self, timeout: Option<Duration>) -> Result<Vec<Event>> {
		Session::step(self, timeout)
	}

	fn timeout(&self) -> Option<Duration> {
		Session::timeout(self)
	}
}
