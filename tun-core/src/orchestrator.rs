use tun_proto::{ClientInfo, ConnectionOptions, RegistrationResult};
use tun_transport::Event;
use tun_util::error::Result;

use crate::config::TunnelConfig;
use crate::format::format_connection_uuid;
use crate::origin::OriginBridge;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Init,
	Connecting,
	Registering,
	Ready,
	Draining,
	Closed,
}

/// The outcome reported once the session leaves `Registering`, successfully or not (§6's
/// exit-semantics contract is built on this).
#[derive(Debug, Clone)]
pub struct SessionResult {
	pub success: bool,
	pub error: String,
	pub should_retry: bool,
	pub retry_after_ns: i64,
}

/// A notable occurrence surfaced to whatever drives the orchestrator's [`step`](Orchestrator::step)
/// loop — a thin wrapper, a test harness, or a CLI.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
	Ready,
	Closed(SessionResult),
	RequestServed { stream_id: u64, status: u16 },
	StreamAbandoned { stream_id: u64, reason: &'static str },
}

/// Connection index this process registers as. Every run of the core owns exactly one slot;
/// HA fan-out across multiple connections is a concern for whatever launches several of these
/// processes, not for the orchestrator itself.
const CONN_INDEX: u8 = 0;

/// Drives registration and per-request dispatch (§4.G). Generic over the transport and origin
/// bridge so tests can substitute an in-memory fake for both (§9's callback-to-event-enum
/// wrapping already makes the transport side of this a pure event handler).
pub struct Orchestrator<T: Transport, O: OriginBridge> {
	transport: T,
	origin: O,
	config: TunnelConfig,
	state: State,
	control_stream: Option<u64>,
	result: Option<SessionResult>,
}

impl<T: Transport, O: OriginBridge> Orchestrator<T, O> {
	/// Wraps an already-dialing transport. The transport is expected to have already begun
	/// connecting (e.g. via `Session::connect`) — this only tracks the state machine and
	/// reacts to the events it reports.
	pub fn new(transport: T, origin: O, config: TunnelConfig) -> Self {
		Self { transport, origin, config, state: State::Connecting, control_stream: None, result: None }
	}

	pub fn state(&self) -> State {
		self.state
	}

	pub fn result(&self) -> Option<&SessionResult> {
		self.result.as_ref()
	}

	/// Exposes the underlying transport, mainly so tests can inject events and inspect what
	/// was sent without the orchestrator needing a test-only backdoor.
	pub fn transport_mut(&mut self) -> &mut T {
		&mut self.transport
	}

	/// Requests graceful shutdown. The loop should keep calling [`step`](Self::step) until it
	/// observes [`State::Closed`].
	pub fn shutdown(&mut self) -> Result<()> {
		self.state = State::Draining;
		self.transport.close()
	}

	/// Pumps the transport once and reacts to whatever it reports. Returns the high-level
	/// events observed, in delivery order.
	pub fn step(&mut self) -> Result<Vec<OrchestratorEvent>> {
		if self.state == State::Closed {
			return Ok(Vec::new());
		}

		let timeout = self.transport.timeout();
		let events = self.transport.step(timeout)?;
		let mut out = Vec::new();

		for event in events {
			self.handle_event(event, &mut out)?;
		}

		Ok(out)
	}

	fn handle_event(&mut self, event: Event, out: &mut Vec<OrchestratorEvent>) -> Result<()> {
		match event {
			Event::Connected => self.begin_registration(out)?,
			Event::Disconnected => self.close_session("transport disconnected", out),
			Event::StreamOpenedRemote(_) => {}
			Event::StreamData(stream_id) => {
				if Some(stream_id) == self.control_stream {
					self.parse_control_stream(out)?;
				} else if self.state == State::Ready {
					self.handle_data_stream(stream_id, false, out);
				}
			}
			Event::StreamFin(stream_id) => {
				if Some(stream_id) == self.control_stream {
					self.parse_control_stream(out)?;
				} else if self.state == State::Ready {
					self.handle_data_stream(stream_id, true, out);
				}
			}
			Event::StreamReset(stream_id) | Event::StopSending(stream_id) => {
				if Some(stream_id) == self.control_stream {
					self.close_session("control stream reset by peer", out);
				}
			}
		}

		Ok(())
	}

	fn begin_registration(&mut self, _out: &mut Vec<OrchestratorEvent>) -> Result<()> {
		if self.state != State::Connecting {
			return Ok(());
		}

		let stream_id = self.transport.open_stream(true);
		self.control_stream = Some(stream_id);

		let creds = &self.config.credentials;
		let options = ConnectionOptions {
			replace_existing: creds.replace_existing,
			compression_quality: creds.compression_quality,
			num_previous_attempts: creds.num_previous_attempts,
			client_info: ClientInfo { client_id: creds.client_id, version: creds.client_version.clone(), architecture: creds.client_arch.clone() },
		};

		let bootstrap = tun_proto::encode_bootstrap().map_err(|err| log::error!("failed to encode Bootstrap: {err:?}"))?;
		let call = tun_proto::encode_call(CONN_INDEX, &creds.account_tag, &creds.tunnel_secret, &creds.tunnel_id, &options).map_err(|err| log::error!("failed to encode Call: {err:?}"))?;

		// Back-to-back writes on the same send queue so the peer observes them in order (§5).
		self.transport.send(stream_id, &bootstrap, false)?;
		self.transport.send(stream_id, &call, false)?;

		self.state = State::Registering;
		Ok(())
	}

	fn parse_control_stream(&mut self, out: &mut Vec<OrchestratorEvent>) -> Result<()> {
		let Some(stream_id) = self.control_stream else { return Ok(()) };

		loop {
			let Some(buf) = self.transport.recv_buf(stream_id) else { return Ok(()) };

			let size = tun_wire::segment_size(buf);
			if size == 0 {
				return Ok(());
			}

			let frame = &buf[..size];

			let body = match tun_wire::decode_segment(frame) {
				Ok(body) => body,
				Err(err) => {
					log::error!("control stream framing error: {err:?}");
					self.close_session("control stream framing error", out);
					return Ok(());
				}
			};

			// Peek the question id before decoding the result body at all: the Bootstrap's own
			// Return (question id 0) carries a capability pointer this codec can't follow, and
			// must be skipped structurally rather than decoded (§4.C, §4.G).
			let question_id = tun_proto::return_question_id(body);
			self.transport.consume_recv(stream_id, size);

			match question_id {
				Ok(Some(0)) => {
					// The Bootstrap's own answer; skipped without decoding its Results payload.
				}
				Ok(Some(_)) => match tun_proto::decode_return(body) {
					Ok(Some(ret)) => {
						self.handle_registration_return(ret.result, out);
						if self.state == State::Closed {
							return Ok(());
						}
					}
					Ok(None) => {
						log::warn!("ignoring non-return message on control stream");
					}
					Err(err) => {
						log::error!("control stream decode error: {err:?}");
						self.close_session("control stream decode error", out);
						return Ok(());
					}
				},
				Ok(None) => {
					log::warn!("ignoring non-return message on control stream");
				}
				Err(err) => {
					log::error!("control stream decode error: {err:?}");
					self.close_session("control stream decode error", out);
					return Ok(());
				}
			}
		}
	}

	fn handle_registration_return(&mut self, result: RegistrationResult, out: &mut Vec<OrchestratorEvent>) {
		if self.state != State::Registering {
			return;
		}

		match result {
			RegistrationResult::Success { connection_uuid, location, remotely_managed } => {
				log::info!("tunnel registered: connection={} location={location} remotely_managed={remotely_managed}", format_connection_uuid(&connection_uuid));
				self.state = State::Ready;
				out.push(OrchestratorEvent::Ready);
			}
			RegistrationResult::Retryable { error, retry_after_ns, should_retry } => {
				log::error!("registration rejected: {error}");
				let result = SessionResult { success: false, error, should_retry, retry_after_ns };
				self.result = Some(result.clone());
				self.state = State::Closed;
				out.push(OrchestratorEvent::Closed(result));
			}
			RegistrationResult::Fatal { error } => {
				log::error!("registration canceled: {error}");
				let result = SessionResult { success: false, error, should_retry: false, retry_after_ns: 0 };
				self.result = Some(result.clone());
				self.state = State::Closed;
				out.push(OrchestratorEvent::Closed(result));
			}
		}
	}

	fn handle_data_stream(&mut self, stream_id: u64, fin: bool, out: &mut Vec<OrchestratorEvent>) {
		if self.transport.request_handled(stream_id) {
			return;
		}

		let Some(buf) = self.transport.recv_buf(stream_id) else { return };

		if buf.len() >= 6 && buf[..6] != tun_wire::PREAMBLE_SIGNATURE {
			self.abandon_stream(stream_id, "bad preamble signature", out);
			return;
		}

		if buf.len() >= 8 && buf[6..8] != tun_wire::PREAMBLE_VERSION {
			self.abandon_stream(stream_id, "bad preamble version", out);
			return;
		}

		let size = tun_wire::message_size(buf);
		if size == 0 {
			if fin {
				self.abandon_stream(stream_id, "stream closed before a complete request arrived", out);
			}
			return;
		}

		let frame = &buf[..size];

		let body = match tun_wire::decode_message(frame) {
			Ok(body) => body,
			Err(err) => {
				log::warn!("stream {stream_id} framing error: {err:?}");
				self.abandon_stream(stream_id, "framing error", out);
				return;
			}
		};

		let req = match tun_proto::decode_connect_request(body) {
			Ok(req) => req,
			Err(err) => {
				log::warn!("stream {stream_id} decode error: {err:?}");
				self.abandon_stream(stream_id, "decode error", out);
				return;
			}
		};

		let total_len = buf.len();
		let body_bytes = buf[size..].to_vec();

		self.transport.mark_request_handled(stream_id);
		self.transport.consume_recv(stream_id, total_len);

		let resp = self.origin.request(&req, &body_bytes);
		let status = resp.status;

		let connect_response = tun_proto::ConnectResponse::success(resp.status, resp.headers);

		let encoded = match tun_proto::encode_connect_response(&connect_response) {
			Ok(bytes) => bytes,
			Err(err) => {
				log::error!("stream {stream_id} failed to encode response: {err:?}");
				return;
			}
		};

		// `encoded` is already preamble-framed (§4.B) via `tun_wire::encode_message`.
		let has_body = !resp.body.is_empty();

		if self.transport.send(stream_id, &encoded, !has_body).is_err() {
			return;
		}

		if has_body {
			let _ = self.transport.send(stream_id, &resp.body, true);
		}

		out.push(OrchestratorEvent::RequestServed { stream_id, status });
	}

	fn abandon_stream(&mut self, stream_id: u64, reason: &'static str, out: &mut Vec<OrchestratorEvent>) {
		self.transport.mark_request_handled(stream_id);
		out.push(OrchestratorEvent::StreamAbandoned { stream_id, reason });
	}

	fn close_session(&mut self, reason: &str, out: &mut Vec<OrchestratorEvent>) {
		if self.state == State::Closed {
			return;
		}

		log::error!("session closing: {reason}");
		let _ = self.transport.close();

		let result = self.result.clone().unwrap_or(SessionResult { success: false, error: reason.to_owned(), should_retry: false, retry_after_ns: 0 });

		self.result = Some(result.clone());
		self.state = State::Closed;
		out.push(OrchestratorEvent::Closed(result));
	}
}
