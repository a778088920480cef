use tun_origin::{OriginConfig, OriginResponse, Timeouts};
use tun_proto::ConnectRequest;

/// Proxies one already-decoded request to an HTTP origin (§4.F). Exists so tests can swap in
/// a canned origin instead of opening a real TCP connection.
pub trait OriginBridge {
	fn request(&self, req: &ConnectRequest, body: &[u8]) -> OriginResponse;
}

pub struct HttpOrigin {
	config: OriginConfig,
	timeouts: Timeouts,
}

impl HttpOrigin {
	pub fn new(origin_url: &str, connect_timeout_ms: u32, read_timeout_ms: u32) -> Result<Self, ()> {
		let config = tun_origin::parse_origin_url(origin_url)?;
		Ok(Self { config, timeouts: Timeouts { connect_ms: connect_timeout_ms, read_ms: read_timeout_ms } })
	}
}

impl OriginBridge for HttpOrigin {
	fn request(&self, req: &ConnectRequest, body: &[u8]) -> OriginResponse {
		let method = req.method().unwrap_or("GET");
		let headers: Vec<(String, String)> = req.headers().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();

		tun_origin::request(&self.config, self.timeouts, method, &req.destination, &headers, body)
	}
}
