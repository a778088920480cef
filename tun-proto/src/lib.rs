//! The registration handshake (§4.C) and per-request data-stream schema (§4.D), built on the
//! [`tun_wire`] codec.

mod connect;
mod registration;

pub use connect::{decode_connect_request, encode_connect_response, ConnectRequest, ConnectResponse, ConnectionType, Metadata, MAX_KEY_LEN, MAX_METADATA, MAX_VALUE_LEN};
pub use registration::{decode_return, encode_bootstrap, encode_call, return_question_id, ClientInfo, ConnectionOptions, RegistrationResult, Return, INTERFACE_ID};
