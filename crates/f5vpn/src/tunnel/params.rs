//! Parses the tunnel-parameters XML returned by `connect.php3` (spec.md §4.4
//! "tunnel parameter fetch") and the space-separated `LAN0`/`DNS0` fields
//! nested inside it.

use std::net::Ipv4Addr;

use quick_xml::events::Event;
use quick_xml::Reader;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("could not parse server response XML: {0}")]
	Xml(#[from] quick_xml::Error),
	#[error("missing expected params in server response XML: {0}")]
	MissingParams(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
	pub session_z: String,
	pub tunnel_host: String,
	pub tunnel_port: u16,
	pub dns: String,
	pub lan: String,
}

/// Extracts `/favorite/object/{ur_Z,tunnel_host0,tunnel_port0,DNS0,LAN0}`.
pub fn parse_connection_params(xml: &str) -> Result<ConnectionParams, Error> {
	let mut reader = Reader::from_str(xml);
	reader.config_mut().trim_text(true);

	let mut ur_z = None;
	let mut tunnel_host = None;
	let mut tunnel_port = None;
	let mut dns = None;
	let mut lan = None;
	let mut path: Vec<String> = Vec::new();
	let mut buf = Vec::new();

	loop {
		match reader.read_event_into(&mut buf)? {
			Event::Eof => break,
			Event::Start(e) => path.push(String::from_utf8_lossy(e.name().as_ref()).to_string()),
			Event::Text(e) => {
				let text = e.unescape().unwrap_or_default().to_string();
				match path.last().map(String::as_str) {
					Some("ur_Z") => ur_z = Some(text),
					Some("tunnel_host0") => tunnel_host = Some(text),
					Some("tunnel_port0") => tunnel_port = Some(text),
					Some("DNS0") => dns = Some(text),
					Some("LAN0") => lan = Some(text),
					_ => {}
				}
			}
			Event::End(_) => {
				path.pop();
			}
			_ => {}
		}
		buf.clear();
	}

	Ok(ConnectionParams {
		session_z: ur_z.ok_or(Error::MissingParams("ur_Z"))?,
		tunnel_host: tunnel_host.ok_or(Error::MissingParams("tunnel_host0"))?,
		tunnel_port: tunnel_port
			.ok_or(Error::MissingParams("tunnel_port0"))?
			.parse()
			.map_err(|_| Error::MissingParams("tunnel_port0"))?,
		dns: dns.ok_or(Error::MissingParams("DNS0"))?,
		lan: lan.ok_or(Error::MissingParams("LAN0"))?,
	})
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanRoute {
	pub addr: Ipv4Addr,
	pub prefix_len: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSettings {
	pub lans: Vec<LanRoute>,
	pub nameservers: Vec<Ipv4Addr>,
}

/// Parses the space-separated `addr/netmask` pairs in `LAN0` and the
/// space-separated addresses in `DNS0`. Entries that don't parse as IPv4 are
/// skipped, matching the original's tolerant `inet_pton` failure handling.
pub fn parse_network_settings(lan_segment: &str, nameservers: &str) -> NetworkSettings {
	let lans = lan_segment
		.split_whitespace()
		.filter_map(|tok| {
			let (addr, mask) = tok.split_once('/')?;
			let addr: Ipv4Addr = addr.parse().ok()?;
			let mask: Ipv4Addr = mask.parse().ok()?;
			let prefix_len = 32 - u32::from(mask).trailing_zeros().min(32) as u8;
			Some(LanRoute { addr, prefix_len })
		})
		.collect();

	let nameservers = nameservers.split_whitespace().filter_map(|tok| tok.parse().ok()).collect();

	NetworkSettings { lans, nameservers }
}

#[cfg(test)]
mod tests {
	use super::*;

	const XML: &str = r#"
		<favorite><object>
			<ur_Z>abc123</ur_Z>
			<tunnel_host0>vpn.example.com</tunnel_host0>
			<tunnel_port0>443</tunnel_port0>
			<DNS0>10.0.0.1 10.0.0.2</DNS0>
			<LAN0>10.1.0.0/255.255.0.0 10.2.0.0/255.255.255.0</LAN0>
		</object></favorite>
	"#;

	#[test]
	fn parses_all_fields() {
		let params = parse_connection_params(XML).unwrap();
		assert_eq!(params.session_z, "abc123");
		assert_eq!(params.tunnel_host, "vpn.example.com");
		assert_eq!(params.tunnel_port, 443);
	}

	#[test]
	fn missing_field_is_an_error() {
		let xml = "<favorite><object><ur_Z>x</ur_Z></object></favorite>";
		assert!(matches!(parse_connection_params(xml), Err(Error::MissingParams("tunnel_host0"))));
	}

	#[test]
	fn parses_lans_and_nameservers() {
		let settings = parse_network_settings("10.1.0.0/255.255.0.0 10.2.0.0/255.255.255.0", "8.8.8.8 8.8.4.4");
		assert_eq!(settings.lans.len(), 2);
		assert_eq!(settings.lans[0].addr, Ipv4Addr::new(10, 1, 0, 0));
		assert_eq!(settings.lans[0].prefix_len, 16);
		assert_eq!(settings.lans[1].prefix_len, 24);
		assert_eq!(settings.nameservers, vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)]);
	}

	#[test]
	fn skips_unparseable_tokens() {
		let settings = parse_network_settings("not-an-addr 10.0.0.0/255.0.0.0", "not-an-addr 1.1.1.1");
		assert_eq!(settings.lans.len(), 1);
		assert_eq!(settings.nameservers, vec![Ipv4Addr::new(1, 1, 1, 1)]);
	}
}
