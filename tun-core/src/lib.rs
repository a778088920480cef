//! Wires the codec, transport, and origin-bridge crates into the single state machine that
//! drives one tunnel connection end to end (§4.G). The public surface is deliberately small:
//! construct a [`TunnelConfig`], hand it and a resolved edge address to [`connect`], then pump
//! [`Orchestrator::step`] in a loop until it reports [`orchestrator::State::Closed`].

pub mod config;
pub mod format;
pub mod orchestrator;
pub mod origin;
pub mod transport;

use std::net::SocketAddr;

use tun_transport::Session;
use tun_util::error::Result;

pub use config::{TunnelConfig, TunnelCredentials};
pub use orchestrator::{Orchestrator, OrchestratorEvent, SessionResult, State};
pub use origin::{HttpOrigin, OriginBridge};
pub use transport::Transport;

/// Convenience constructor for the real stack: dials `edge_addr` over QUIC and wires it to an
/// HTTP origin bridge parsed from `config.origin_url`.
pub fn connect(config: TunnelConfig, edge_addr: SocketAddr) -> Result<Orchestrator<Session, HttpOrigin>> {
	let session = Session::connect(edge_addr)?;
	let origin = HttpOrigin::new(&config.origin_url, config.connect_timeout_ms, config.read_timeout_ms).map_err(|_| log::error!("invalid origin_url: {}", config.origin_url))?;

	Ok(Orchestrator::new(session, origin, config))
}
