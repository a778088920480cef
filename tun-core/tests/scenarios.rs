//! End-to-end scenarios from §8 driven against an in-memory fake transport and a fake origin
//! — no real socket or QUIC handshake involved.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tun_core::{config::TunnelCredentials, Orchestrator, OrchestratorEvent, State, Transport, TunnelConfig};
use tun_origin::OriginResponse;
use tun_proto::ConnectRequest;
use tun_transport::Event;
use tun_util::error::Result;
use tun_wire::Encoder;

#[derive(Default)]
struct FakeStream {
	recv: Vec<u8>,
	request_handled: bool,
}

#[derive(Default)]
struct FakeTransport {
	streams: HashMap<u64, FakeStream>,
	sent: HashMap<u64, Vec<u8>>,
	pending: VecDeque<Event>,
	next_stream_id: u64,
	closed: bool,
}

impl FakeTransport {
	fn push(&mut self, event: Event) {
		self.pending.push_back(event);
	}

	/// Simulates the peer opening a remote bidi stream and writing `bytes` to it.
	fn deliver_remote(&mut self, stream_id: u64, bytes: &[u8], fin: bool) {
		let is_new = !self.streams.contains_key(&stream_id);
		let entry = self.streams.entry(stream_id).or_default();
		entry.recv.extend_from_slice(bytes);

		if is_new {
			self.pending.push_back(Event::StreamOpenedRemote(stream_id));
		}

		self.pending.push_back(Event::StreamData(stream_id));

		if fin {
			self.pending.push_back(Event::StreamFin(stream_id));
		}
	}

	fn sent_bytes(&self, stream_id: u64) -> &[u8] {
		self.sent.get(&stream_id).map(|v| v.as_slice()).unwrap_or(&[])
	}
}

impl Transport for FakeTransport {
	fn open_stream(&mut self, _is_control: bool) -> u64 {
		let id = self.next_stream_id;
		self.next_stream_id += 1;
		self.streams.insert(id, FakeStream::default());
		id
	}

	fn send(&mut self, stream_id: u64, bytes: &[u8], _fin: bool) -> Result<()> {
		self.sent.entry(stream_id).or_default().extend_from_slice(bytes);
		Ok(())
	}

	fn recv_buf(&self, stream_id: u64) -> Option<&[u8]> {
		self.streams.get(&stream_id).map(|s| s.recv.as_slice())
	}

	fn consume_recv(&mut self, stream_id: u64, n: usize) {
		if let Some(s) = self.streams.get_mut(&stream_id) {
			s.recv.drain(..n.min(s.recv.len()));
		}
	}

	fn request_handled(&self, stream_id: u64) -> bool {
		self.streams.get(&stream_id).map(|s| s.request_handled).unwrap_or(false)
	}

	fn mark_request_handled(&mut self, stream_id: u64) {
		if let Some(s) = self.streams.get_mut(&stream_id) {
			s.request_handled = true;
		}
	}

	fn close(&mut self) -> Result<()> {
		self.closed = true;
		Ok(())
	}

	fn step(&mut self, _timeout: Option<Duration>) -> Result<Vec<Event>> {
		Ok(self.pending.drain(..).collect())
	}

	fn timeout(&self) -> Option<Duration> {
		None
	}
}

/// Returns canned responses by destination path, falling back to connection refused.
#[derive(Default)]
struct FakeOrigin {
	responses: HashMap<String, OriginResponse>,
}

impl FakeOrigin {
	fn respond(mut self, dest: &str, resp: OriginResponse) -> Self {
		self.responses.insert(dest.to_owned(), resp);
		self
	}
}

impl tun_core::OriginBridge for FakeOrigin {
	fn request(&self, req: &ConnectRequest, _body: &[u8]) -> OriginResponse {
		self.responses.get(&req.destination).cloned().unwrap_or_else(|| OriginResponse {
			status: 502,
			headers: vec![("Content-Type".to_owned(), "text/plain".to_owned())],
			body: b"502 Bad Gateway: connection refused".to_vec(),
		})
	}
}

fn credentials() -> TunnelCredentials {
	TunnelCredentials {
		tunnel_id: [1u8; 16],
		account_tag: "acct".to_owned(),
		tunnel_secret: b"sekret".to_vec(),
		client_id: [0xAA; 16],
		client_version: "v/0.1.0".to_owned(),
		client_arch: "x86_64".to_owned(),
		replace_existing: false,
		compression_quality: 6,
		num_previous_attempts: 0,
	}
}

fn config() -> TunnelConfig {
	TunnelConfig::new("http://127.0.0.1:8080", credentials())
}

fn orchestrator_with(origin: FakeOrigin) -> Orchestrator<FakeTransport, FakeOrigin> {
	Orchestrator::new(FakeTransport::default(), origin, config())
}

/// Drives the transport's `Connected` event through to `Ready`, asserting registration
/// succeeded as in §8 scenario 1.
fn register(orch: &mut Orchestrator<FakeTransport, FakeOrigin>) {
	orch.transport_mut().push(Event::Connected);
	orch.step().unwrap();
	assert_eq!(orch.state(), State::Registering);

	let control_stream = 0;
	let question_id = 1;
	let ret = encode_success_return(question_id, &(0x20..=0x2Fu8).collect::<Vec<_>>(), "SJC", false);
	orch.transport_mut().deliver_remote(control_stream, &ret, false);

	let events = orch.step().unwrap();
	assert!(matches!(events.as_slice(), [OrchestratorEvent::Ready]), "{events:?}");
	assert_eq!(orch.state(), State::Ready);
}

// --- hand-rolled peer-side Return encoder, mirroring tun_proto::registration::decode_return ---

fn encode_message_struct(enc: &mut Encoder, discriminant: u16) -> usize {
	let root_ptr = enc.alloc_words(1).unwrap();
	let msg_off = enc.alloc_words(2).unwrap();
	enc.write_struct_ptr(root_ptr, msg_off, 1, 1).unwrap();
	enc.write_u16(msg_off, discriminant);
	msg_off
}

fn encode_success_return(question_id: u32, connection_uuid: &[u8], location: &str, remotely_managed: bool) -> Vec<u8> {
	let mut enc = Encoder::new(4096);
	let msg_off = encode_message_struct(&mut enc, 3);

	let ret_ptr = msg_off + 8;
	let ret_off = enc.alloc_words(3).unwrap();
	enc.write_struct_ptr(ret_ptr, ret_off, 2, 1).unwrap();
	enc.write_u32(ret_off, question_id);
	enc.write_u16(ret_off + 6, 0);

	let payload_ptr = ret_off + 16;
	let payload_off = enc.alloc_words(2).unwrap();
	enc.write_struct_ptr(payload_ptr, payload_off, 0, 2).unwrap();
	enc.write_null(payload_off + 8);

	let wrapper_ptr = payload_off;
	let wrapper_off = enc.alloc_words(1).unwrap();
	enc.write_struct_ptr(wrapper_ptr, wrapper_off, 0, 1).unwrap();

	let response_ptr = wrapper_off;
	let response_off = enc.alloc_words(2).unwrap();
	enc.write_struct_ptr(response_ptr, response_off, 1, 1).unwrap();
	enc.write_u16(response_off, 1);

	let details_ptr = response_off + 8;
	let details_off = enc.alloc_words(3).unwrap();
	enc.write_struct_ptr(details_ptr, details_off, 1, 2).unwrap();

	if remotely_managed {
		enc.set_bit(details_off, 0);
	}

	enc.write_data(details_off + 8, connection_uuid).unwrap();
	enc.write_text(details_off + 16, location).unwrap();

	tun_wire::encode_segment(&enc.finish())
}

fn encode_exception_return(question_id: u32, reason: &str) -> Vec<u8> {
	let mut enc = Encoder::new(4096);
	let msg_off = encode_message_struct(&mut enc, 3);

	let ret_ptr = msg_off + 8;
	let ret_off = enc.alloc_words(3).unwrap();
	enc.write_struct_ptr(ret_ptr, ret_off, 2, 1).unwrap();
	enc.write_u32(ret_off, question_id);
	enc.write_u16(ret_off + 6, 1);

	let exc_ptr = ret_off + 16;
	let exc_off = enc.alloc_words(1).unwrap();
	enc.write_struct_ptr(exc_ptr, exc_off, 0, 1).unwrap();
	enc.write_text(exc_off, reason).unwrap();

	tun_wire::encode_segment(&enc.finish())
}

/// Encodes a Return for question id 0 whose Payload content pointer is a capability pointer
/// (tag bits `11`), matching what a real peer sends for the Bootstrap's own answer.
fn encode_bootstrap_return() -> Vec<u8> {
	let mut enc = Encoder::new(4096);
	let msg_off = encode_message_struct(&mut enc, 3);

	let ret_ptr = msg_off + 8;
	let ret_off = enc.alloc_words(3).unwrap();
	enc.write_struct_ptr(ret_ptr, ret_off, 2, 1).unwrap();
	enc.write_u32(ret_off, 0);
	enc.write_u16(ret_off + 6, 0);

	let payload_ptr = ret_off + 16;
	let payload_off = enc.alloc_words(2).unwrap();
	enc.write_struct_ptr(payload_ptr, payload_off, 0, 2).unwrap();
	// A bare capability pointer (tag bits `11`, no other payload bits set) as the content.
	enc.write_u64(payload_off + 8, 0x3);

	tun_wire::encode_segment(&enc.finish())
}

fn encode_connect_request_message(kind: u16, dest: &str, metadata: &[(&str, &str)]) -> Vec<u8> {
	let mut enc = Encoder::new(4096);
	let root_ptr = enc.alloc_words(1).unwrap();
	let root_off = enc.alloc_words(2).unwrap();
	enc.write_struct_ptr(root_ptr, root_off, 1, 2).unwrap();
	enc.write_u16(root_off, kind);
	enc.write_text(root_off + 8, dest).unwrap();

	let meta_ptr = root_off + 16;

	if metadata.is_empty() {
		enc.write_composite_list(meta_ptr, 0, 0, 2).unwrap();
	} else {
		let first = enc.write_composite_list(meta_ptr, metadata.len() as u32, 0, 2).unwrap();

		for (i, (k, v)) in metadata.iter().enumerate() {
			let key_ptr = first + i * 16;
			enc.write_text(key_ptr, k).unwrap();
			enc.write_text(key_ptr + 8, v).unwrap();
		}
	}

	tun_wire::encode_message(&enc.finish())
}

/// Decodes the `(error, metadata)` shape of an encoded ConnectResponse body, mirroring
/// `tun_proto::connect`'s private decoder used in its own tests.
fn decode_connect_response_metadata(body: &[u8]) -> HashMap<String, String> {
	let dec = tun_wire::Decoder::new(body);
	let root = dec.root().unwrap().unwrap();

	let mut out = HashMap::new();

	if let Some(meta) = dec.read_composite_list(dec.struct_ptr(&root, 1).unwrap()).unwrap() {
		for i in 0..meta.n {
			let (_, ptr_section) = meta.element(i).unwrap();
			let key = dec.read_text(ptr_section).unwrap().to_owned();
			let value = dec.read_text(ptr_section + 8).unwrap().to_owned();
			out.insert(key, value);
		}
	}

	out
}

#[test]
fn scenario_1_register_then_idle() {
	let mut orch = orchestrator_with(FakeOrigin::default());
	register(&mut orch);

	let sent = orch.transport_mut().sent_bytes(0).to_vec();
	assert!(!sent.is_empty(), "bootstrap+call should have been sent on the control stream");

	let events = orch.step().unwrap();
	assert!(events.is_empty());
	assert_eq!(orch.state(), State::Ready);
}

#[test]
fn scenario_2_single_get_proxied() {
	let origin = FakeOrigin::default().respond(
		"/hello",
		OriginResponse {
			status: 200,
			headers: vec![("Content-Length".to_owned(), "5".to_owned()), ("Content-Type".to_owned(), "text/plain".to_owned())],
			body: b"hello".to_vec(),
		},
	);

	let mut orch = orchestrator_with(origin);
	register(&mut orch);

	// `encode_connect_request_message` already returns a preamble-framed message (§4.B).
	let wire = encode_connect_request_message(0, "/hello", &[("HttpMethod", "GET"), ("HttpHost", "example.invalid")]);

	orch.transport_mut().deliver_remote(10, &wire, true);
	let events = orch.step().unwrap();

	assert!(matches!(events.as_slice(), [OrchestratorEvent::RequestServed { stream_id: 10, status: 200 }]), "{events:?}");

	let sent = orch.transport_mut().sent_bytes(10).to_vec();
	assert!(sent.ends_with(b"hello"));

	let resp_frame_size = tun_wire::message_size(&sent);
	let resp_frame = tun_wire::decode_message(&sent[..resp_frame_size]).unwrap();
	let resp = decode_connect_response_metadata(resp_frame);
	assert_eq!(resp.get("HttpStatus").map(String::as_str), Some("200"));
	assert_eq!(resp.get("HttpHeader:Content-Length").map(String::as_str), Some("5"));
}

#[test]
fn scenario_3_post_with_body() {
	let origin = FakeOrigin::default().respond("/submit", OriginResponse { status: 204, headers: Vec::new(), body: Vec::new() });

	let mut orch = orchestrator_with(origin);
	register(&mut orch);

	let mut wire = encode_connect_request_message(0, "/submit", &[("HttpMethod", "POST"), ("HttpHost", "x.invalid"), ("HttpHeader:Content-Length", "4")]);
	wire.extend_from_slice(b"abcd");

	orch.transport_mut().deliver_remote(11, &wire, true);
	let events = orch.step().unwrap();

	assert!(matches!(events.as_slice(), [OrchestratorEvent::RequestServed { stream_id: 11, status: 204 }]), "{events:?}");
}

#[test]
fn scenario_4_origin_unreachable_yields_502() {
	let mut orch = orchestrator_with(FakeOrigin::default());
	register(&mut orch);

	let wire = encode_connect_request_message(0, "/nope", &[("HttpMethod", "GET")]);

	orch.transport_mut().deliver_remote(12, &wire, true);
	let events = orch.step().unwrap();

	assert!(matches!(events.as_slice(), [OrchestratorEvent::RequestServed { stream_id: 12, status: 502 }]), "{events:?}");
	assert_eq!(orch.state(), State::Ready);

	let sent = orch.transport_mut().sent_bytes(12).to_vec();
	assert!(sent.windows(b"502 Bad Gateway: ".len()).any(|w| w == b"502 Bad Gateway: "));
}

#[test]
fn scenario_5_registration_rejected() {
	let mut orch = orchestrator_with(FakeOrigin::default());

	orch.transport_mut().push(Event::Connected);
	orch.step().unwrap();
	assert_eq!(orch.state(), State::Registering);

	let ret = encode_exception_return(1, "bad credentials");
	orch.transport_mut().deliver_remote(0, &ret, false);

	let events = orch.step().unwrap();
	assert_eq!(orch.state(), State::Closed);

	match events.as_slice() {
		[OrchestratorEvent::Closed(result)] => {
			assert_eq!(result.error, "bad credentials");
			assert!(result.should_retry);
			assert!(!result.success);
		}
		other => panic!("unexpected events: {other:?}"),
	}
}

#[test]
fn scenario_bootstrap_return_is_skipped_not_fatal() {
	let mut orch = orchestrator_with(FakeOrigin::default());

	orch.transport_mut().push(Event::Connected);
	orch.step().unwrap();
	assert_eq!(orch.state(), State::Registering);

	// The peer answers the Bootstrap (question id 0) before the Call (question id 1). Its
	// Payload carries a capability pointer this codec can't decode, so it must be skipped
	// structurally rather than treated as a framing/decode error.
	let bootstrap_ret = encode_bootstrap_return();
	orch.transport_mut().deliver_remote(0, &bootstrap_ret, false);

	let events = orch.step().unwrap();
	assert!(events.is_empty(), "{events:?}");
	assert_eq!(orch.state(), State::Registering);

	let call_ret = encode_success_return(1, &(0x20..=0x2Fu8).collect::<Vec<_>>(), "SJC", false);
	orch.transport_mut().deliver_remote(0, &call_ret, false);

	let events = orch.step().unwrap();
	assert!(matches!(events.as_slice(), [OrchestratorEvent::Ready]), "{events:?}");
	assert_eq!(orch.state(), State::Ready);
}

#[test]
fn scenario_6_malformed_preamble_abandons_stream_not_session() {
	let mut orch = orchestrator_with(FakeOrigin::default());
	register(&mut orch);

	orch.transport_mut().deliver_remote(20, &[0u8; 8], true);
	let events = orch.step().unwrap();

	assert!(matches!(events.as_slice(), [OrchestratorEvent::StreamAbandoned { stream_id: 20, .. }]), "{events:?}");
	assert_eq!(orch.state(), State::Ready);
}
