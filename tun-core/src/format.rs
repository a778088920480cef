/// Formats a connection identifier as canonical `8-4-4-4-12` lowercase hex when `bytes` is
/// exactly 16 long; anything else falls back to a plain hex dump (§8 boundary behavior).
pub fn format_connection_uuid(bytes: &[u8]) -> String {
	if bytes.len() != 16 {
		return bytes.iter().map(|b| format!("{b:02x}")).collect();
	}

	format!(
		"{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
		bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
	)
}
