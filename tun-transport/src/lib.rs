//! QUIC session lifecycle (§4.E): connects to the edge, owns the stream table, and drives
//! the single dispatch callback the underlying library exposes into an event enum the
//! orchestrator handles as a pure state machine (§9).

mod session;
mod stream;

pub use session::{Event, Session, ALPN, SNI};
pub use stream::{Stream, StreamKind};
