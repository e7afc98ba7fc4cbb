#![forbid(unsafe_code)]

use std::net::SocketAddr;

/// Parse `quic://host:port` into a socket address.
///
/// The host must be an IP literal; IPv6 hosts are bracketed
/// (`quic://[::1]:18300`).
pub fn parse_quic_bind(s: &str) -> Result<SocketAddr, String> {
	let s = s.trim();
	if s.is_empty() {
		return Err("endpoint must be non-empty (expected quic://host:port)".to_string());
	}

	let rest = s
		.strip_prefix("quic://")
		.ok_or_else(|| format!("invalid endpoint (expected quic://host:port): {s}"))?;

	if rest.contains('/') || rest.contains('?') || rest.contains('#') {
		return Err(format!(
			"invalid endpoint (expected quic://host:port without path/query/fragment): {s}"
		));
	}

	let (host, port) = rest
		.rsplit_once(':')
		.ok_or_else(|| format!("invalid endpoint (missing :port, expected quic://host:port): {s}"))?;

	if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
		return Err(format!(
			"invalid endpoint host (IPv6 must be bracketed like quic://[::1]:18300): {s}"
		));
	}

	match port.trim().parse::<u16>() {
		Ok(0) | Err(_) => return Err(format!("invalid endpoint port (expected 1..=65535): {s}")),
		Ok(_) => {}
	}

	format!("{}:{}", host.trim(), port.trim())
		.parse()
		.map_err(|_| format!("host must be an IP literal (DNS names not supported here): {host}"))
}
