//! Login-form scraping. The portal's landing page is an ordinary HTML
//! document with one `<form id="auth_form">`; the original SAX-parses it
//! tag-by-tag, accumulating `<label>` text to pair with the following
//! `<input>` (spec.md §4.3 "login form fields"). `tl`'s arena of nodes is
//! produced in document order, so the same label-then-input pairing falls
//! out of a plain recursive walk instead of hand-rolled SAX callbacks.

use tl::{HTMLTag, Node, Parser, VDom};

/// Sanity cap on how many `<input>`s `scrape_login_form` will collect from
/// one form (spec.md §4.3 "a bounded buffer (≥5) suffices for observed
/// portals; fields beyond the bound are dropped"). Real portals top out at
/// a handful of fields; 64 is generous headroom over that while still
/// bounding memory against a pathological or hostile response body.
const MAX_LOGIN_FIELDS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
	Text,
	Password,
	Hidden,
	Other,
}

#[derive(Debug, Clone)]
pub struct FormField {
	pub name: String,
	pub label: String,
	pub value: String,
	pub kind: FieldKind,
}

/// Finds `form#auth_form` in `html` and returns its fields in document
/// order, labels paired with the input immediately following them.
pub fn scrape_login_form(html: &str) -> Vec<FormField> {
	let Ok(dom) = tl::parse(html, tl::ParserOptions::default()) else {
		return Vec::new();
	};
	let parser = dom.parser();

	let Some(form) = find_auth_form(&dom, parser) else {
		return Vec::new();
	};

	let mut fields = Vec::new();
	let mut last_label: Option<String> = None;
	walk(form, parser, &mut last_label, &mut fields);
	fields
}

fn find_auth_form<'a>(dom: &'a VDom<'a>, parser: &'a Parser<'a>) -> Option<&'a HTMLTag<'a>> {
	for node in dom.nodes() {
		if let Some(tag) = node.as_tag() {
			if tag.name().as_bytes() == b"form"
				&& tag
					.attributes()
					.id()
					.map(|id| id.as_bytes() == b"auth_form")
					.unwrap_or(false)
			{
				return Some(tag);
			}
			if let Some(found) = find_in_children(tag, parser) {
				return Some(found);
			}
		}
	}
	None
}

fn find_in_children<'a>(tag: &'a HTMLTag<'a>, parser: &'a Parser<'a>) -> Option<&'a HTMLTag<'a>> {
	for child in tag.children().all(parser) {
		if let Some(child_tag) = child.as_tag() {
			if child_tag.name().as_bytes() == b"form"
				&& child_tag
					.attributes()
					.id()
					.map(|id| id.as_bytes() == b"auth_form")
					.unwrap_or(false)
			{
				return Some(child_tag);
			}
			if let Some(found) = find_in_children(child_tag, parser) {
				return Some(found);
			}
		}
	}
	None
}

fn walk<'a>(tag: &HTMLTag<'a>, parser: &'a Parser<'a>, last_label: &mut Option<String>, fields: &mut Vec<FormField>) {
	for child in tag.children().all(parser) {
		match child {
			Node::Tag(child_tag) => {
				let name = child_tag.name().as_bytes();
				if name == b"label" {
					*last_label = Some(child_tag.inner_text(parser).trim().to_string());
				} else if name == b"input" {
					if fields.len() >= MAX_LOGIN_FIELDS {
						tracing::warn!(cap = MAX_LOGIN_FIELDS, "login form has more fields than the bound; dropping the rest");
						return;
					}
					fields.push(field_from_tag(child_tag, last_label.take()));
				}
				walk(child_tag, parser, last_label, fields);
			}
			Node::Raw(_) | Node::Comment(_) => {}
		}
	}
}

fn field_from_tag(tag: &HTMLTag<'_>, label: Option<String>) -> FormField {
	let attrs = tag.attributes();
	let name = attrs
		.get("name")
		.flatten()
		.map(|b| b.as_utf8_str().to_string())
		.unwrap_or_default();
	let value = attrs
		.get("value")
		.flatten()
		.map(|b| b.as_utf8_str().to_string())
		.unwrap_or_default();
	let kind = match attrs.get("type").flatten().map(|b| b.as_utf8_str()) {
		Some(t) if t == "text" => FieldKind::Text,
		Some(t) if t == "password" => FieldKind::Password,
		Some(t) if t == "hidden" => FieldKind::Hidden,
		_ => FieldKind::Other,
	};
	let label = label.unwrap_or_else(|| name.clone());
	FormField { name, label, value, kind }
}

#[cfg(test)]
mod tests {
	use super::*;

	const LOGIN_HTML: &str = r#"
		<html><body>
		<div class="logon_page">
		<form id="auth_form" method="post">
			<input type="hidden" name="vhost" value="standard">
			<label>Username</label>
			<input type="text" name="username" value="">
			<label>Password</label>
			<input type="password" name="password" value="">
			<input type="submit" name="submit" value="Logon">
		</form>
		</div>
		</body></html>
	"#;

	#[test]
	fn scrapes_fields_with_labels_in_order() {
		let fields = scrape_login_form(LOGIN_HTML);
		assert_eq!(fields.len(), 4);
		assert_eq!(fields[0].name, "vhost");
		assert_eq!(fields[0].kind, FieldKind::Hidden);
		assert_eq!(fields[1].name, "username");
		assert_eq!(fields[1].label, "Username");
		assert_eq!(fields[1].kind, FieldKind::Text);
		assert_eq!(fields[2].name, "password");
		assert_eq!(fields[2].label, "Password");
		assert_eq!(fields[2].kind, FieldKind::Password);
		assert_eq!(fields[3].kind, FieldKind::Other);
	}

	#[test]
	fn missing_form_returns_empty() {
		assert!(scrape_login_form("<html><body>no form here</body></html>").is_empty());
	}

	#[test]
	fn falls_back_to_field_name_when_unlabeled() {
		let html = r#"<form id="auth_form"><input type="text" name="otp" value=""></form>"#;
		let fields = scrape_login_form(html);
		assert_eq!(fields[0].label, "otp");
	}

	#[test]
	fn caps_fields_at_the_bound() {
		let mut html = String::from(r#"<form id="auth_form">"#);
		for i in 0..MAX_LOGIN_FIELDS + 10 {
			html.push_str(&format!(r#"<input type="text" name="f{i}" value="">"#));
		}
		html.push_str("</form>");
		let fields = scrape_login_form(&html);
		assert_eq!(fields.len(), MAX_LOGIN_FIELDS);
		assert_eq!(fields[0].name, "f0");
		assert_eq!(fields[MAX_LOGIN_FIELDS - 1].name, format!("f{}", MAX_LOGIN_FIELDS - 1));
	}
}
