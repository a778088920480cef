use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tun_runtime::Ready;

use crate::{OriginConfig, MAX_RESPONSE_BYTES};

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
	pub connect_ms: u32,
	pub read_ms: u32,
}

impl Default for Timeouts {
	fn default() -> Self {
		Self { connect_ms: 5_000, read_ms: 30_000 }
	}
}

#[derive(Debug, Clone)]
pub struct OriginResponse {
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: Vec<u8>,
}

impl OriginResponse {
	fn bad_gateway(reason: &str) -> Self {
		let body = format!("502 Bad Gateway: {reason}");
		Self { status: 502, headers: vec![("Content-Type".to_owned(), "text/plain".to_owned())], body: body.into_bytes() }
	}
}

/// Proxies one request to `origin`. `headers` are the forwarded `HttpHeader:*` entries
/// (already excluding `Host`/`Connection`, case-insensitively, by the caller or here).
pub fn request(origin: &OriginConfig, timeouts: Timeouts, method: &str, dest: &str, headers: &[(String, String)], body: &[u8]) -> OriginResponse {
	match try_request(origin, timeouts, method, dest, headers, body) {
		Ok(resp) => resp,
		Err(reason) => {
			log::warn!("origin request failed: {reason}");
			OriginResponse::bad_gateway(&reason)
		}
	}
}

fn try_request(origin: &OriginConfig, timeouts: Timeouts, method: &str, dest: &str, headers: &[(String, String)], body: &[u8]) -> Result<OriginResponse, String> {
	let addr = (origin.host.as_str(), origin.port)
		.to_socket_addrs()
		.map_err(|err| format!("could not resolve {}:{}: {err}", origin.host, origin.port))?
		.next()
		.ok_or_else(|| format!("no addresses for {}:{}", origin.host, origin.port))?;

	let mut stream = TcpStream::connect_timeout(&addr, Duration::from_millis(timeouts.connect_ms as u64)).map_err(|err| format!("connect failed: {err}"))?;

	stream.set_nodelay(true).ok();

	let request = build_request(origin, method, dest, headers, body);
	write_all_with_deadline(&mut stream, &request, Duration::from_millis(timeouts.read_ms as u64))?;

	read_response(&mut stream, Duration::from_millis(timeouts.read_ms as u64))
}

fn build_request(origin: &OriginConfig, method: &str, dest: &str, headers: &[(String, String)], body: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(256 + body.len());

	out.extend_from_slice(format!("{method} {}{dest} HTTP/1.1\r\n", origin.path_prefix).as_bytes());
	out.extend_from_slice(format!("Host: {}\r\n", origin.host).as_bytes());
	out.extend_from_slice(b"Connection: close\r\n");

	for (name, value) in headers {
		if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("connection") {
			continue;
		}

		out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
	}

	if !body.is_empty() {
		out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
	}

	out.extend_from_slice(b"\r\n");
	out.extend_from_slice(body);
	out
}

fn write_all_with_deadline(stream: &mut TcpStream, mut buf: &[u8], timeout: Duration) -> Result<(), String> {
	stream.set_nonblocking(true).map_err(|err| format!("set_nonblocking failed: {err}"))?;

	let deadline = Instant::now() + timeout;

	while !buf.is_empty() {
		let remaining = deadline.checked_duration_since(Instant::now()).ok_or("write timed out")?;
		let ready = tun_runtime::wait(stream, Ready { read: false, write: true }, Some(remaining)).map_err(|_| "poll failed while writing")?;

		if !ready.write {
			return Err("write timed out".to_owned());
		}

		match stream.write(buf) {
			Ok(n) => buf = &buf[n..],
			Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
			Err(err) => return Err(format!("write failed: {err}")),
		}
	}

	Ok(())
}

fn read_response(stream: &mut TcpStream, timeout: Duration) -> Result<OriginResponse, String> {
	let deadline = Instant::now() + timeout;
	let mut buf = Vec::new();
	let mut chunk = [0u8; 4096];

	let (status, headers, mut header_end) = loop {
		if let Some(end) = find_header_end(&buf) {
			if let Some(parsed) = parse_status_and_headers(&buf[..end]) {
				break (parsed.0, parsed.1, end);
			}
			return Err("malformed status line".to_owned());
		}

		if buf.len() > MAX_RESPONSE_BYTES {
			return Err("response headers exceeded the size cap".to_owned());
		}

		let remaining = deadline.checked_duration_since(Instant::now()).ok_or("read timed out")?;
		let ready = tun_runtime::wait(stream, Ready { read: true, write: false }, Some(remaining)).map_err(|_| "poll failed while reading")?;

		if !ready.read {
			return Err("read timed out".to_owned());
		}

		match stream.read(&mut chunk) {
			Ok(0) => return Err("connection closed before headers completed".to_owned()),
			Ok(n) => buf.extend_from_slice(&chunk[..n]),
			Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
			Err(err) => return Err(format!("read failed: {err}")),
		}
	};

	header_end += 4; // skip the blank line

	let content_length = headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("content-length")).and_then(|(_, v)| v.parse::<usize>().ok());

	loop {
		let body_so_far = buf.len() - header_end;

		if let Some(len) = content_length {
			if body_so_far >= len {
				break;
			}
		}

		if buf.len() > MAX_RESPONSE_BYTES {
			return Err("response body exceeded the size cap".to_owned());
		}

		let remaining = match deadline.checked_duration_since(Instant::now()) {
			Some(d) => d,
			None if content_length.is_none() => break, // close-delimited body is allowed to time out into EOF
			None => return Err("read timed out".to_owned()),
		};

		let ready = tun_runtime::wait(stream, Ready { read: true, write: false }, Some(remaining)).map_err(|_| "poll failed while reading")?;

		if !ready.read {
			if content_length.is_none() {
				break;
			}
			return Err("read timed out".to_owned());
		}

		match stream.read(&mut chunk) {
			Ok(0) => break,
			Ok(n) => buf.extend_from_slice(&chunk[..n]),
			Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
			Err(err) => return Err(format!("read failed: {err}")),
		}
	}

	let mut body = buf.split_off(header_end);

	if let Some(len) = content_length {
		body.truncate(len);
	}

	Ok(OriginResponse { status, headers, body })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
	buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status_and_headers(head: &[u8]) -> Option<(u16, Vec<(String, String)>)> {
	let text = std::str::from_utf8(head).ok()?;
	let mut lines = text.split("\r\n");

	let status_line = lines.next()?;
	let mut parts = status_line.splitn(3, ' ');
	let _version = parts.next()?;
	let status: u16 = parts.next()?.parse().ok()?;

	let mut headers = Vec::new();

	for line in lines {
		if line.is_empty() {
			continue;
		}

		let (name, value) = line.split_once(':')?;
		headers.push((name.trim().to_owned(), value.trim().to_owned()));
	}

	Some((status, headers))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_status_line_and_headers() {
		let head = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nContent-Type: text/plain\r\n";
		let (status, headers) = parse_status_and_headers(head).unwrap();
		assert_eq!(status, 200);
		assert_eq!(headers, vec![("Content-Length".to_owned(), "5".to_owned()), ("Content-Type".to_owned(), "text/plain".to_owned())]);
	}

	#[test]
	fn bad_gateway_has_expected_shape() {
		let resp = OriginResponse::bad_gateway("connect failed: refused");
		assert_eq!(resp.status, 502);
		assert_eq!(resp.headers, vec![("Content-Type".to_owned(), "text/plain".to_owned())]);
		assert!(std::str::from_utf8(&resp.body).unwrap().starts_with("502 Bad Gateway: "));
	}

	#[test]
	fn unreachable_origin_produces_502() {
		// Port 0 never accepts connections; connect_timeout should fail promptly.
		let origin = OriginConfig { scheme: crate::Scheme::Http, host: "127.0.0.1".to_owned(), port: 1, path_prefix: String::new() };
		let resp = request(&origin, Timeouts { connect_ms: 200, read_ms: 200 }, "GET", "/", &[], &[]);
		assert_eq!(resp.status, 502);
	}
}
