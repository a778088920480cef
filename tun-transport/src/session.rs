use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use rand::RngCore;
use tun_util::error::Result;

use crate::stream::{Stream, StreamKind};

/// ALPN identifier the edge expects (§6, contract-fixed).
pub const ALPN: &[u8] = b"argotunnel";
/// SNI the edge expects (§6, contract-fixed).
pub const SNI: &str = "quic.cftunnel.com";

const RECV_CAP_CONTROL: usize = 64 * 1024;
const RECV_CAP_DATA: usize = 1024 * 1024;
const DATAGRAM_BUF: usize = 1500;

/// Events the session delivers to the orchestrator. Mirrors the underlying QUIC library's
/// single dispatch callback (§9), wrapped so the orchestrator can be written as a pure event
/// handler instead of implementing a callback trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
	Connected,
	Disconnected,
	StreamOpenedRemote(u64),
	/// New bytes were appended to the stream's receive buffer; see [`Session::find_stream`].
	StreamData(u64),
	/// The peer's final marker was observed on this stream.
	StreamFin(u64),
	StreamReset(u64),
	StopSending(u64),
}

/// Owns one QUIC connection, its streams, and the UDP socket carrying it.
///
/// Invariant: exactly one connection per session; every [`Stream`] entry implicitly
/// references this connection through its `stream_id` key, never through a back-pointer —
/// callers look streams up by id instead (§9's arena-plus-integer-keys pattern).
pub struct Session {
	conn: quiche::Connection,
	socket: UdpSocket,
	peer: SocketAddr,
	streams: HashMap<u64, Stream>,
	next_local_stream_id: u64,
	connected: bool,
	disconnected: bool,
}

fn build_config() -> Result<quiche::Config> {
	let mut config = quiche::Config::new(quiche::PROTOCOL_VERSION).map_err(|err| log::error!("failed to build QUIC config: {err}"))?;

	config.set_application_protos(&[ALPN]).map_err(|err| log::error!("failed to set ALPN: {err}"))?;
	config.set_cc_algorithm(quiche::CongestionControlAlgorithm::BBR);
	config.set_max_idle_timeout(30_000);
	config.set_initial_max_data(10_000_000);
	config.set_initial_max_stream_data_bidi_local(1_000_000);
	config.set_initial_max_stream_data_bidi_remote(1_000_000);
	config.set_initial_max_streams_bidi(128);
	config.set_initial_max_streams_uni(8);
	config.verify_peer(true);

	Ok(config)
}

impl Session {
	/// Dials `edge_addr`. The connection is not established yet; drive [`Session::step`]
	/// until an [`Event::Connected`] arrives.
	pub fn connect(edge_addr: SocketAddr) -> Result<Self> {
		let mut config = build_config()?;

		let local_addr: SocketAddr = if edge_addr.is_ipv6() { "[::]:0".parse().unwrap() } else { "0.0.0.0:0".parse().unwrap() };

		let socket = UdpSocket::bind(local_addr).map_err(|err| log::error!("failed to bind UDP socket: {err}"))?;
		socket.connect(edge_addr).map_err(|err| log::error!("failed to connect UDP socket to {edge_addr}: {err}"))?;
		socket.set_nonblocking(true).map_err(|err| log::error!("failed to set socket non-blocking: {err}"))?;
		let local_addr = socket.local_addr().map_err(|err| log::error!("failed to read local address: {err}"))?;

		let mut scid_bytes = [0u8; quiche::MAX_CONN_ID_LEN];
		rand::thread_rng().fill_bytes(&mut scid_bytes);
		let scid = quiche::ConnectionId::from_ref(&scid_bytes);

		let conn = quiche::connect(Some(SNI), &scid, local_addr, edge_addr, &mut config).map_err(|err| log::error!("failed to start QUIC handshake: {err}"))?;

		let mut session = Self { conn, socket, peer: edge_addr, streams: HashMap::new(), next_local_stream_id: 0, connected: false, disconnected: false };

		session.flush_send()?;
		Ok(session)
	}

	/// Opens a new locally-initiated bidi stream. The first call returns the control stream
	/// (QUIC client-initiated bidi stream id 0); the control/data distinction is otherwise
	/// just a label this session carries for the caller's bookkeeping.
	pub fn open_stream(&mut self, is_control: bool) -> u64 {
		let id = self.next_local_stream_id;
		self.next_local_stream_id += 4;

		let kind = if is_control { StreamKind::Control } else { StreamKind::Data };
		let cap = if is_control { RECV_CAP_CONTROL } else { RECV_CAP_DATA };
		self.streams.insert(id, Stream::new(kind, cap));

		id
	}

	/// Queues `bytes` for `stream_id`, coalescing with anything already queued. Marking
	/// `final` forbids any further send on that stream.
	pub fn send(&mut self, stream_id: u64, bytes: &[u8], fin: bool) -> Result<()> {
		let stream = self.streams.get_mut(&stream_id).ok_or_else(|| log::error!("send() on unknown stream {stream_id}"))?;
		stream.enqueue_send(bytes, fin).map_err(|_| log::error!("send() after stream {stream_id} was already finalized"))
	}

	pub fn find_stream(&self, stream_id: u64) -> Option<&Stream> {
		self.streams.get(&stream_id)
	}

	pub fn find_stream_mut(&mut self, stream_id: u64) -> Option<&mut Stream> {
		self.streams.get_mut(&stream_id)
	}

	/// Initiates graceful shutdown with reason code 0. The control loop keeps running until
	/// [`Event::Disconnected`] is observed.
	pub fn close(&mut self) -> Result<()> {
		match self.conn.close(true, 0, b"") {
			Ok(()) | Err(quiche::Error::Done) => {}
			Err(err) => return Err(log::error!("failed to close QUIC connection: {err}")),
		}

		self.flush_send()
	}

	/// How long [`Session::step`] should wait for socket readiness before it must be called
	/// again regardless (to drive QUIC's internal timers).
	pub fn timeout(&self) -> Option<Duration> {
		self.conn.timeout()
	}

	/// Pumps the connection once: waits for the socket to become readable (up to `timeout`),
	/// processes any datagrams, drains readable/writable streams, and flushes pending sends.
	/// Returns the events observed, in no particular cross-stream order (§5).
	pub fn step(&mut self, timeout: Option<Duration>) -> Result<Vec<Event>> {
		let ready = tun_runtime::wait(&self.socket, tun_runtime::Ready { read: true, write: false }, timeout)?;

		let mut events = Vec::new();

		if ready.read {
			self.drain_socket()?;
		} else {
			self.conn.on_timeout();
		}

		if !self.connected && self.conn.is_established() {
			self.connected = true;
			events.push(Event::Connected);
		}

		self.collect_readable(&mut events)?;
		self.collect_writable()?;
		self.flush_send()?;

		if !self.disconnected && self.conn.is_closed() {
			self.disconnected = true;
			events.push(Event::Disconnected);
		}

		Ok(events)
	}

	fn drain_socket(&mut self) -> Result<()> {
		let mut buf = [0u8; DATAGRAM_BUF];

		loop {
			let n = match self.socket.recv(&mut buf) {
				Ok(n) => n,
				Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
				Err(err) => return Err(log::error!("UDP recv failed: {err}")),
			};

			let info = quiche::RecvInfo { from: self.peer, to: self.socket.local_addr().map_err(|err| log::error!("failed to read local address: {err}"))? };

			if let Err(err) = self.conn.recv(&mut buf[..n], info) {
				log::warn!("dropping malformed QUIC datagram: {err}");
			}
		}
	}

	fn collect_readable(&mut self, events: &mut Vec<Event>) -> Result<()> {
		let readable: Vec<u64> = self.conn.readable().collect();

		for stream_id in readable {
			if !self.streams.contains_key(&stream_id) {
				// Server-initiated bidi streams carry id % 4 == 1; anything else arriving
				// unannounced is a peer protocol violation we simply ignore.
				if stream_id % 4 != 1 {
					continue;
				}

				self.streams.insert(stream_id, Stream::new(StreamKind::Data, RECV_CAP_DATA));
				events.push(Event::StreamOpenedRemote(stream_id));
			}

			let mut buf = [0u8; 4096];

			loop {
				let (n, fin) = match self.conn.stream_recv(stream_id, &mut buf) {
					Ok(v) => v,
					Err(quiche::Error::Done) => break,
					Err(err) => {
						log::warn!("stream {stream_id} reset during read: {err}");
						events.push(Event::StreamReset(stream_id));
						self.streams.remove(&stream_id);
						break;
					}
				};

				if n > 0 {
					let stream = match self.streams.get_mut(&stream_id) {
						Some(s) => s,
						None => break,
					};

					if stream.push_recv(&buf[..n]).is_err() {
						log::error!("stream {stream_id} exceeded its receive buffer cap");
						events.push(Event::StreamReset(stream_id));
						self.streams.remove(&stream_id);
						break;
					}

					events.push(Event::StreamData(stream_id));
				}

				if fin {
					if let Some(stream) = self.streams.get_mut(&stream_id) {
						stream.received_final = true;
					}
					events.push(Event::StreamFin(stream_id));
				}

				if n == 0 && !fin {
					break;
				}
			}
		}

		Ok(())
	}

	fn collect_writable(&mut self) -> Result<()> {
		let writable: Vec<u64> = self.conn.writable().collect();

		for stream_id in writable {
			let Some(stream) = self.streams.get_mut(&stream_id) else { continue };

			if !stream.still_active() {
				continue;
			}

			let data = stream.pending_send().to_vec();
			let fin_now = stream.fin_pending();

			match self.conn.stream_send(stream_id, &data, fin_now) {
				Ok(written) => {
					if let Some(stream) = self.streams.get_mut(&stream_id) {
						stream.advance_send(written);

						if fin_now && written == data.len() {
							stream.mark_fin_sent();
						}
					}
				}
				Err(quiche::Error::Done) => {}
				Err(err) => {
					log::warn!("stream {stream_id} send failed: {err}");
					self.streams.remove(&stream_id);
				}
			}
		}

		Ok(())
	}

	fn flush_send(&mut self) -> Result<()> {
		let mut out = [0u8; DATAGRAM_BUF];

		loop {
			let (written, info) = match self.conn.send(&mut out) {
				Ok(v) => v,
				Err(quiche::Error::Done) => return Ok(()),
				Err(err) => return Err(log::error!("QUIC send failed: {err}")),
			};

			if let Err(err) = self.socket.send_to(&out[..written], info.to) {
				return Err(log::error!("UDP send failed: {err}"));
			}
		}
	}
}
