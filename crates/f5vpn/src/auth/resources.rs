//! XML scraping for the two documents the portal hands back after login
//! (spec.md §4.3 "resource list" and "tunnel detail fan-out"): the resource
//! list naming one detail URI template plus one `(param, value)` pair per
//! offered tunnel, and the per-tunnel detail document those pairs are
//! expanded into. The original walks these with libxml2 XPath; `quick-xml`'s
//! streaming reader gets the same handful of fields out of each without
//! building a DOM.

use quick_xml::events::Event;
use quick_xml::Reader;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("could not parse server response XML: {0}")]
	Xml(#[from] quick_xml::Error),
	#[error("could not retrieve detail URI from server response XML")]
	MissingDetailUri,
	#[error("no valid tunnel descriptions found in server XML")]
	NoTunnelEntries,
	#[error("expected field missing in tunnel detail XML: {0}")]
	MissingField(&'static str),
}

/// One `<entry param="...">value</entry>` from the resource list: the query
/// parameter name and value used to fetch that tunnel's detail document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
	pub param: String,
	pub value: String,
}

pub struct ResourceList {
	pub detail_uri: String,
	pub entries: Vec<ResourceEntry>,
}

/// Parses `resource_list.xml`: the `available_rq` opt's `uri` attribute and
/// every `<entry>` under the `network_access` list.
pub fn parse_resource_list(xml: &str) -> Result<ResourceList, Error> {
	let mut reader = Reader::from_str(xml);
	reader.config_mut().trim_text(true);

	let mut detail_uri = None;
	let mut entries = Vec::new();
	let mut path: Vec<String> = Vec::new();
	let mut current_entry_param: Option<String> = None;
	let mut buf = Vec::new();

	loop {
		match reader.read_event_into(&mut buf)? {
			Event::Eof => break,
			Event::Empty(e) => {
				let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
				if name == "opt" {
					let attrs: Vec<(String, String)> = e
						.attributes()
						.filter_map(|a| a.ok())
						.map(|a| {
							let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
							let value = a.unescape_value().unwrap_or_default().to_string();
							(key, value)
						})
						.collect();
					let is_available_rq = attrs.iter().any(|(k, v)| k == "type" && v == "available_rq");
					if is_available_rq {
						if let Some((_, uri)) = attrs.iter().find(|(k, _)| k == "uri") {
							detail_uri = Some(uri.clone());
						}
					}
				}
			}
			Event::Start(e) => {
				let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
				if name == "entry" && path.last().map(String::as_str) == Some("list") {
					let attrs: Vec<(String, String)> = e
						.attributes()
						.filter_map(|a| a.ok())
						.map(|a| {
							let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
							let value = a.unescape_value().unwrap_or_default().to_string();
							(key, value)
						})
						.collect();
					current_entry_param = attrs.into_iter().find(|(k, _)| k == "param").map(|(_, v)| v);
				}

				path.push(name);
			}
			Event::Text(e) => {
				if path.last().map(String::as_str) == Some("entry") {
					if let Some(param) = current_entry_param.take() {
						let value = e.unescape().unwrap_or_default().to_string();
						entries.push(ResourceEntry { param, value });
					}
				}
			}
			Event::End(_) => {
				path.pop();
			}
			_ => {}
		}
		buf.clear();
	}

	let detail_uri = detail_uri.ok_or(Error::MissingDetailUri)?;
	if entries.is_empty() {
		return Err(Error::NoTunnelEntries);
	}
	Ok(ResourceList { detail_uri, entries })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelDescriptor {
	pub id: String,
	pub label: String,
	pub description: String,
	pub autoconnect: bool,
}

/// Parses one tunnel's `/resources/item/{id,caption,description,autolaunch}`
/// detail document.
pub fn parse_tunnel_detail(xml: &str) -> Result<TunnelDescriptor, Error> {
	let mut reader = Reader::from_str(xml);
	reader.config_mut().trim_text(true);

	let mut id = None;
	let mut caption = None;
	let mut description = None;
	let mut autolaunch = false;
	let mut path: Vec<String> = Vec::new();
	let mut buf = Vec::new();

	loop {
		match reader.read_event_into(&mut buf)? {
			Event::Eof => break,
			Event::Start(e) => {
				path.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
			}
			Event::Text(e) => {
				let text = e.unescape().unwrap_or_default().to_string();
				match path.last().map(String::as_str) {
					Some("id") => id = Some(text),
					Some("caption") => caption = Some(text),
					Some("description") => description = Some(text),
					Some("autolaunch") => autolaunch = text.starts_with('1'),
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

	Ok(TunnelDescriptor {
		id: id.ok_or(Error::MissingField("id"))?,
		label: caption.ok_or(Error::MissingField("caption"))?,
		description: description.ok_or(Error::MissingField("description"))?,
		autoconnect: autolaunch,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	const RESOURCE_LIST: &str = r#"
		<res type="resource_list">
			<opts><opt type="available_rq" uri="/vdesk/resinfo.xml"/></opts>
			<lists><list type="network_access">
				<entry param="resourceid">tunnel-1</entry>
				<entry param="resourceid">tunnel-2</entry>
			</list></lists>
		</res>
	"#;

	#[test]
	fn parses_detail_uri_and_entries() {
		let parsed = parse_resource_list(RESOURCE_LIST).unwrap();
		assert_eq!(parsed.detail_uri, "/vdesk/resinfo.xml");
		assert_eq!(parsed.entries.len(), 2);
		assert_eq!(parsed.entries[0].param, "resourceid");
		assert_eq!(parsed.entries[0].value, "tunnel-1");
	}

	#[test]
	fn missing_uri_is_an_error() {
		let xml = r#"<res type="resource_list"><lists><list type="network_access"><entry param="resourceid">t</entry></list></lists></res>"#;
		assert!(matches!(parse_resource_list(xml), Err(Error::MissingDetailUri)));
	}

	#[test]
	fn no_entries_is_an_error() {
		let xml = r#"<res type="resource_list"><opts><opt type="available_rq" uri="/x"/></opts><lists><list type="network_access"></list></lists></res>"#;
		assert!(matches!(parse_resource_list(xml), Err(Error::NoTunnelEntries)));
	}

	#[test]
	fn parses_tunnel_detail() {
		let xml = r#"<resources><item><id>tunnel-1</id><caption>My VPN</caption><description>desc here</description><autolaunch>1</autolaunch></item></resources>"#;
		let detail = parse_tunnel_detail(xml).unwrap();
		assert_eq!(detail.id, "tunnel-1");
		assert_eq!(detail.label, "My VPN");
		assert!(detail.autoconnect);
	}

	#[test]
	fn missing_field_is_an_error() {
		let xml = r#"<resources><item><id>tunnel-1</id></item></resources>"#;
		assert!(matches!(parse_tunnel_detail(xml), Err(Error::MissingField("caption"))));
	}
}
