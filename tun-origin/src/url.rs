#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
	Http,
	/// Accepted but treated as `Http` — implementing origin TLS is out of scope (§1, §9 open
	/// question).
	Https,
}

#[derive(Debug, Clone)]
pub struct OriginConfig {
	pub scheme: Scheme,
	pub host: String,
	pub port: u16,
	pub path_prefix: String,
}

/// Parses `origin_url` into `{scheme, host, port, path_prefix}`. Accepts only `http://` and
/// `https://`; `https` is downgraded to plain `http` against the origin (documented
/// limitation, §6).
pub fn parse_origin_url(origin_url: &str) -> Result<OriginConfig, ()> {
	let (scheme, rest) = if let Some(rest) = origin_url.strip_prefix("https://") {
		(Scheme::Https, rest)
	} else if let Some(rest) = origin_url.strip_prefix("http://") {
		(Scheme::Http, rest)
	} else {
		log::error!("origin URL {origin_url:?} has an unsupported scheme");
		return Err(());
	};

	if matches!(scheme, Scheme::Https) {
		log::warn!("origin URL {origin_url:?} uses https; treating the origin connection as plain http");
	}

	let (authority, path_prefix) = match rest.find('/') {
		Some(idx) => (&rest[..idx], &rest[idx..]),
		None => (rest, ""),
	};

	if authority.is_empty() {
		log::error!("origin URL {origin_url:?} is missing a host");
		return Err(());
	}

	let (host, port) = match authority.rsplit_once(':') {
		Some((host, port_str)) => {
			let port = port_str.parse().map_err(|_| log::error!("origin URL {origin_url:?} has an invalid port"))?;
			(host, port)
		}
		None => (authority, 80),
	};

	Ok(OriginConfig { scheme, host: host.to_owned(), port, path_prefix: path_prefix.trim_end_matches('/').to_owned() })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_host_port_and_path_prefix() {
		let cfg = parse_origin_url("http://127.0.0.1:8080/api").unwrap();
		assert_eq!(cfg.host, "127.0.0.1");
		assert_eq!(cfg.port, 8080);
		assert_eq!(cfg.path_prefix, "/api");
	}

	#[test]
	fn defaults_port_to_80() {
		let cfg = parse_origin_url("http://example.invalid").unwrap();
		assert_eq!(cfg.port, 80);
		assert_eq!(cfg.path_prefix, "");
	}

	#[test]
	fn https_is_accepted_and_downgraded() {
		let cfg = parse_origin_url("https://example.invalid").unwrap();
		assert_eq!(cfg.scheme, Scheme::Https);
	}

	#[test]
	fn rejects_unknown_scheme() {
		assert!(parse_origin_url("ftp://example.invalid").is_err());
	}
}
