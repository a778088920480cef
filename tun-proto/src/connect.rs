use tun_wire::{DecodeError, Decoder, EncodeError, Encoder};

/// Maximum metadata entries carried per direction; the 33rd onward is dropped.
pub const MAX_METADATA: usize = 32;
/// Maximum metadata key length in bytes; longer keys are truncated.
pub const MAX_KEY_LEN: usize = 128;
/// Maximum metadata value length in bytes; longer values are truncated.
pub const MAX_VALUE_LEN: usize = 512;

const SCRATCH_CAP: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
	Http,
	WebSocket,
	Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
	pub key: String,
	pub value: String,
}

#[derive(Debug, Clone)]
pub struct ConnectRequest {
	pub kind: ConnectionType,
	pub destination: String,
	pub metadata: Vec<Metadata>,
}

impl ConnectRequest {
	pub fn get(&self, key: &str) -> Option<&str> {
		self.metadata.iter().find(|m| m.key == key).map(|m| m.value.as_str())
	}

	pub fn method(&self) -> Option<&str> {
		self.get("HttpMethod")
	}

	pub fn host(&self) -> Option<&str> {
		self.get("HttpHost")
	}

	/// Forwarded request headers, i.e. every `HttpHeader:<Name>` entry, yielded as `(Name,
	/// value)`.
	pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
		self.metadata.iter().filter_map(|m| m.key.strip_prefix("HttpHeader:").map(|name| (name, m.value.as_str())))
	}
}

#[derive(Debug, Clone, Default)]
pub struct ConnectResponse {
	/// Empty means success.
	pub error: String,
	pub metadata: Vec<Metadata>,
}

impl ConnectResponse {
	pub fn success(status: u16, headers: impl IntoIterator<Item = (String, String)>) -> Self {
		let mut metadata = vec![Metadata { key: "HttpStatus".to_owned(), value: status.to_string() }];
		metadata.extend(headers.into_iter().map(|(name, value)| Metadata { key: format!("HttpHeader:{name}"), value }));
		Self { error: String::new(), metadata }
	}
}

fn truncated(s: &str, max: usize) -> &str {
	if s.len() <= max {
		return s;
	}

	let mut end = max;
	while !s.is_char_boundary(end) {
		end -= 1;
	}
	&s[..end]
}

/// Parses the preamble-stripped body of a ConnectRequest message (§4.D).
pub fn decode_connect_request(body: &[u8]) -> Result<ConnectRequest, DecodeError> {
	let dec = Decoder::new(body);
	let root = dec.root()?.ok_or(DecodeError::WrongType)?;

	let kind = match dec.struct_u16(&root, 0)? {
		0 => ConnectionType::Http,
		1 => ConnectionType::WebSocket,
		2 => ConnectionType::Tcp,
		_ => return Err(DecodeError::WrongType),
	};

	let destination = dec.read_text(dec.struct_ptr(&root, 0)?)?.to_owned();
	let metadata = decode_metadata_list(&dec, dec.struct_ptr(&root, 1)?)?;

	Ok(ConnectRequest { kind, destination, metadata })
}

fn decode_metadata_list(dec: &Decoder, ptr_off: usize) -> Result<Vec<Metadata>, DecodeError> {
	let shape = match dec.read_composite_list(ptr_off)? {
		None => return Ok(Vec::new()),
		Some(s) => s,
	};

	let mut out = Vec::with_capacity((shape.n as usize).min(MAX_METADATA));

	for i in 0..shape.n {
		if out.len() >= MAX_METADATA {
			log::warn!("dropping metadata entry {i}: exceeds the {MAX_METADATA}-entry limit");
			continue;
		}

		let (_, ptr_section) = shape.element(i).expect("i < shape.n");
		let key = dec.read_text(ptr_section)?;
		let value = dec.read_text(ptr_section + 8)?;

		if key.len() > MAX_KEY_LEN {
			log::warn!("truncating oversized metadata key {key:?}");
		}

		if value.len() > MAX_VALUE_LEN {
			log::warn!("truncating oversized metadata value for key {key:?}");
		}

		out.push(Metadata { key: truncated(key, MAX_KEY_LEN).to_owned(), value: truncated(value, MAX_VALUE_LEN).to_owned() });
	}

	Ok(out)
}

/// Encodes a ConnectResponse message (§4.D), truncating/dropping metadata per the bounded
/// limits.
pub fn encode_connect_response(resp: &ConnectResponse) -> Result<Vec<u8>, EncodeError> {
	let mut enc = Encoder::new(SCRATCH_CAP);

	let root_ptr = enc.alloc_words(1)?;
	let root_off = enc.alloc_words(2)?;
	enc.write_struct_ptr(root_ptr, root_off, 0, 2)?;

	enc.write_text(root_off, &resp.error)?;

	let meta_ptr = root_off + 8;

	if resp.metadata.len() > MAX_METADATA {
		log::warn!("dropping {} metadata entries exceeding the {MAX_METADATA}-entry limit", resp.metadata.len() - MAX_METADATA);
	}

	let n = resp.metadata.len().min(MAX_METADATA) as u32;

	if n == 0 {
		enc.write_composite_list(meta_ptr, 0, 0, 2)?;
	} else {
		let first = enc.write_composite_list(meta_ptr, n, 0, 2)?;

		for (i, m) in resp.metadata.iter().take(n as usize).enumerate() {
			let key_ptr = first + i * 16;
			let value_ptr = key_ptr + 8;
			enc.write_text(key_ptr, truncated(&m.key, MAX_KEY_LEN))?;
			enc.write_text(value_ptr, truncated(&m.value, MAX_VALUE_LEN))?;
		}
	}

	Ok(tun_wire::encode_message(&enc.finish()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn connect_request_round_trips_method_and_host() {
		let mut enc = Encoder::new(SCRATCH_CAP);
		let root_ptr = enc.alloc_words(1).unwrap();
		let root_off = enc.alloc_words(2).unwrap();
		enc.write_struct_ptr(root_ptr, root_off, 1, 2).unwrap();
		enc.write_u16(root_off, 0); // http

		enc.write_text(root_off + 8, "/hello").unwrap();

		let meta_ptr = root_off + 16;
		let first = enc.write_composite_list(meta_ptr, 2, 0, 2).unwrap();
		enc.write_text(first, "HttpMethod").unwrap();
		enc.write_text(first + 8, "GET").unwrap();
		enc.write_text(first + 16, "HttpHost").unwrap();
		enc.write_text(first + 24, "example.invalid").unwrap();

		let body = tun_wire::encode_message(&enc.finish());
		let frame = tun_wire::decode_message(&body).unwrap();
		let req = decode_connect_request(frame).unwrap();

		assert_eq!(req.kind, ConnectionType::Http);
		assert_eq!(req.destination, "/hello");
		assert_eq!(req.method(), Some("GET"));
		assert_eq!(req.host(), Some("example.invalid"));
	}

	#[test]
	fn response_round_trips_status_and_headers() {
		let resp = ConnectResponse::success(200, [("Content-Length".to_owned(), "5".to_owned())]);
		let body = encode_connect_response(&resp).unwrap();

		let seg = tun_wire::decode_message(&body).unwrap();
		let dec = Decoder::new(seg);
		let root = dec.root().unwrap().unwrap();
		assert_eq!(dec.read_text(dec.struct_ptr(&root, 0).unwrap()).unwrap(), "");

		let meta = dec.read_composite_list(dec.struct_ptr(&root, 1).unwrap()).unwrap().unwrap();
		assert_eq!(meta.n, 2);
	}

	#[test]
	fn oversized_metadata_list_is_truncated_not_fatal() {
		let metadata = (0..40).map(|i| Metadata { key: format!("HttpHeader:H{i}"), value: "v".to_owned() }).collect();
		let resp = ConnectResponse { error: String::new(), metadata };
		let body = encode_connect_response(&resp).unwrap();

		let seg = tun_wire::decode_message(&body).unwrap();
		let dec = Decoder::new(seg);
		let root = dec.root().unwrap().unwrap();
		let meta = dec.read_composite_list(dec.struct_ptr(&root, 1).unwrap()).unwrap().unwrap();
		assert_eq!(meta.n as usize, MAX_METADATA);
	}
}
