use tun_wire::{DecodeError, Decoder, EncodeError, Encoder};

/// Contract-fixed interface identifier for the registration Call.
pub const INTERFACE_ID: u64 = 0xF716_95EC_7FE8_5497;

const SCRATCH_CAP: usize = 4096;

#[derive(Debug, Clone)]
pub struct ClientInfo {
	pub client_id: [u8; 16],
	pub version: String,
	pub architecture: String,
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
	pub replace_existing: bool,
	pub compression_quality: u8,
	pub num_previous_attempts: u8,
	pub client_info: ClientInfo,
}

/// Outcome of decoding a registration Return, as reported to the orchestrator.
#[derive(Debug, Clone)]
pub enum RegistrationResult {
	Success { connection_uuid: Vec<u8>, location: String, remotely_managed: bool },
	Retryable { error: String, retry_after_ns: i64, should_retry: bool },
	Fatal { error: String },
}

/// A decoded Return frame, question identifier and result together so the caller can skip
/// the Bootstrap's own answer (question id 0) without this crate guessing at that policy.
#[derive(Debug, Clone)]
pub struct Return {
	pub question_id: u32,
	pub result: RegistrationResult,
}

/// Encodes the Bootstrap message: outer Message (discriminant 8) pointing at a Bootstrap
/// struct with question id 0 and a null deprecated-object pointer.
pub fn encode_bootstrap() -> Result<Vec<u8>, EncodeError> {
	let mut enc = Encoder::new(SCRATCH_CAP);

	let root_ptr = enc.alloc_words(1)?;
	let msg_off = enc.alloc_words(2)?;
	enc.write_struct_ptr(root_ptr, msg_off, 1, 1)?;
	enc.write_u16(msg_off, 8);

	let bootstrap_ptr = msg_off + 8;
	let bootstrap_off = enc.alloc_words(2)?;
	enc.write_struct_ptr(bootstrap_ptr, bootstrap_off, 1, 1)?;
	enc.write_u32(bootstrap_off, 0);
	enc.write_null(bootstrap_off + 8);

	Ok(tun_wire::encode_segment(&enc.finish()))
}

/// Encodes the Call message registering `conn_index` on the tunnel identified by
/// `tunnel_id`, authenticated with `account_tag`/`tunnel_secret`.
pub fn encode_call(conn_index: u8, account_tag: &str, tunnel_secret: &[u8], tunnel_id: &[u8; 16], options: &ConnectionOptions) -> Result<Vec<u8>, EncodeError> {
	let mut enc = Encoder::new(SCRATCH_CAP);

	let root_ptr = enc.alloc_words(1)?;
	let msg_off = enc.alloc_words(2)?;
	enc.write_struct_ptr(root_ptr, msg_off, 1, 1)?;
	enc.write_u16(msg_off, 2);

	let call_ptr = msg_off + 8;
	let call_off = enc.alloc_words(6)?;
	enc.write_struct_ptr(call_ptr, call_off, 3, 3)?;
	enc.write_u32(call_off, 1);
	enc.write_u16(call_off + 4, 0);
	enc.write_u16(call_off + 6, 0);
	enc.write_u64(call_off + 8, INTERFACE_ID);

	let call_ptr0 = call_off + 24;
	let call_ptr1 = call_ptr0 + 8;
	let call_ptr2 = call_ptr1 + 8;

	// MessageTarget: which = 1 (promisedAnswer), pointing at the Bootstrap's question.
	let target_off = enc.alloc_words(2)?;
	enc.write_struct_ptr(call_ptr0, target_off, 1, 1)?;
	enc.write_u16(target_off, 1);

	let promised_off = enc.alloc_words(2)?;
	enc.write_struct_ptr(target_off + 8, promised_off, 1, 1)?;
	enc.write_u32(promised_off, 0);
	enc.write_null(promised_off + 8);

	// Payload wrapping the call parameters, no capability table.
	let payload_off = enc.alloc_words(2)?;
	enc.write_struct_ptr(call_ptr1, payload_off, 0, 2)?;
	enc.write_null(payload_off + 8);

	enc.write_null(call_ptr2);

	let params_off = enc.alloc_words(4)?;
	enc.write_struct_ptr(payload_off, params_off, 1, 3)?;
	enc.write_u8(params_off, conn_index);

	let params_ptr0 = params_off + 8;
	let params_ptr1 = params_ptr0 + 8;
	let params_ptr2 = params_ptr1 + 8;

	let auth_off = enc.alloc_words(2)?;
	enc.write_struct_ptr(params_ptr0, auth_off, 0, 2)?;
	enc.write_text(auth_off, account_tag)?;
	enc.write_data(auth_off + 8, tunnel_secret)?;

	enc.write_data(params_ptr1, tunnel_id)?;

	let opts_off = enc.alloc_words(3)?;
	enc.write_struct_ptr(params_ptr2, opts_off, 1, 2)?;

	if options.replace_existing {
		enc.set_bit(opts_off, 0);
	}

	enc.write_u8(opts_off + 1, options.compression_quality);
	enc.write_u8(opts_off + 2, options.num_previous_attempts);

	let opts_ptr0 = opts_off + 8;
	let opts_ptr1 = opts_ptr0 + 8;
	enc.write_null(opts_ptr1);

	let info_off = enc.alloc_words(4)?;
	enc.write_struct_ptr(opts_ptr0, info_off, 0, 4)?;
	enc.write_data(info_off, &options.client_info.client_id)?;
	enc.write_null(info_off + 8); // empty features list
	enc.write_text(info_off + 16, &options.client_info.version)?;
	enc.write_text(info_off + 24, &options.client_info.architecture)?;

	Ok(tun_wire::encode_segment(&enc.finish()))
}

/// Question identifier of a Return frame, read without decoding the result body at all. The
/// Bootstrap's own Return carries a capability pointer as its Payload's content, which this
/// codec can't follow, so callers must check the question id before calling [`decode_return`].
pub fn return_question_id(body: &[u8]) -> Result<Option<u32>, DecodeError> {
	let dec = Decoder::new(body);
	let msg = dec.root()?.ok_or(DecodeError::WrongType)?;

	if dec.struct_u16(&msg, 0)? != 3 {
		return Ok(None);
	}

	let ret = dec.read_struct_ptr(dec.struct_ptr(&msg, 0)?)?.ok_or(DecodeError::WrongType)?;
	Ok(Some(dec.struct_u32(&ret, 0)?))
}

/// Decodes a Return frame. Returns `Ok(None)` if the outer Message's discriminant isn't
/// `3` ("return") at all, which shouldn't occur on a well-formed control stream but is
/// handled as a framing error by the caller rather than a panic here.
pub fn decode_return(body: &[u8]) -> Result<Option<Return>, DecodeError> {
	let dec = Decoder::new(body);
	let msg = dec.root()?.ok_or(DecodeError::WrongType)?;

	if dec.struct_u16(&msg, 0)? != 3 {
		return Ok(None);
	}

	let ret = dec.read_struct_ptr(dec.struct_ptr(&msg, 0)?)?.ok_or(DecodeError::WrongType)?;
	let question_id = dec.struct_u32(&ret, 0)?;
	let which = dec.struct_u16(&ret, 6)?;

	let result = match which {
		0 => decode_results(&dec, &ret)?,
		1 => {
			let exc = dec.read_struct_ptr(dec.struct_ptr(&ret, 0)?)?.ok_or(DecodeError::WrongType)?;
			let reason = dec.read_text(dec.struct_ptr(&exc, 0)?)?.to_owned();
			RegistrationResult::Retryable { error: reason, retry_after_ns: 0, should_retry: true }
		}
		2 => RegistrationResult::Fatal { error: "canceled".to_owned() },
		_ => return Err(DecodeError::WrongType),
	};

	Ok(Some(Return { question_id, result }))
}

fn decode_results(dec: &Decoder, ret: &tun_wire::StructShape) -> Result<RegistrationResult, DecodeError> {
	let payload = dec.read_struct_ptr(dec.struct_ptr(ret, 0)?)?.ok_or(DecodeError::WrongType)?;
	let wrapper = dec.read_struct_ptr(dec.struct_ptr(&payload, 0)?)?.ok_or(DecodeError::WrongType)?;
	let response = dec.read_struct_ptr(dec.struct_ptr(&wrapper, 0)?)?.ok_or(DecodeError::WrongType)?;

	let which = dec.struct_u16(&response, 0)?;
	let variant_ptr = dec.struct_ptr(&response, 0)?;

	match which {
		1 => {
			let details = dec.read_struct_ptr(variant_ptr)?.ok_or(DecodeError::WrongType)?;
			let remotely_managed = dec.struct_bit(&details, 0, 0)?;

			let connection_uuid = dec.read_data(dec.struct_ptr(&details, 0)?)?.to_vec();
			let location = dec.read_text(dec.struct_ptr(&details, 1)?)?.to_owned();

			Ok(RegistrationResult::Success { connection_uuid, location, remotely_managed })
		}
		0 => {
			let err = dec.read_struct_ptr(variant_ptr)?.ok_or(DecodeError::WrongType)?;
			// A ConnectionError truncated before these words is a legitimate default-omitted
			// encoding, not malformed input — `retry_after_ns`/`should_retry` fall back to
			// their zero/false defaults rather than erroring out.
			let retry_after_ns = dec.struct_i64_or(&err, 0, 0)?;
			let should_retry = dec.struct_bit_or(&err, 8, 0, false)?;
			let error = dec.read_text(dec.struct_ptr(&err, 0)?)?.to_owned();

			Ok(RegistrationResult::Retryable { error, retry_after_ns, should_retry })
		}
		_ => Err(DecodeError::WrongType),
	}
}
