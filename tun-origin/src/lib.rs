//! Translates one parsed request into a response record by proxying it to a local HTTP/1.1
//! origin over a fresh TCP connection per request (§4.F). Every failure path becomes a `502`
//! response rather than an error return — this bridge never makes the session unhealthy.

mod client;
mod url;

pub use client::{request, OriginResponse, Timeouts};
pub use url::{parse_origin_url, OriginConfig, Scheme};

/// Hard cap on the accumulated response buffer (§5).
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;
