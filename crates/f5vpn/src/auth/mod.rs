//! Authentication: trade portal credentials for a session cookie and the
//! list of tunnels the account may open (spec.md §4.3). Mirrors the
//! original's five-step round trip (portal GET, credentials POST, EPI skip,
//! resource list GET, per-tunnel detail GET) as a short async function
//! instead of a chain of libcurl completion callbacks (spec.md §9).

mod page;
mod resources;

pub use page::{FieldKind, FormField};
pub use resources::TunnelDescriptor;

use url::Url;

use crate::transport;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Transport(#[from] transport::Error),
	#[error("invalid host: {0}")]
	InvalidUrl(#[from] url::ParseError),
	#[error(transparent)]
	Xml(#[from] resources::Error),
	#[error("no login form found on portal page")]
	NoLoginForm,
	#[error("credentials rejected: {0}")]
	CredentialsRejected(String),
	#[error("unexpected recurrence of logon page")]
	UnexpectedLogonPage,
	#[error("could not retrieve session key from cookie jar")]
	MissingSessionKey,
}

/// One authentication attempt against a single portal host. `begin` fetches
/// the login form; the caller fills in the fields it's asked for (usually
/// just username/password — everything else arrives pre-filled as hidden
/// fields) and passes the whole list back to `post_credentials`.
pub struct Session {
	client: transport::Client,
	base: Url,
	login_url: Url,
}

impl Session {
	/// GETs the portal root (following redirects, like logging in through a
	/// browser) and scrapes the login form it lands on.
	pub async fn begin(host: &str) -> Result<(Self, Vec<FormField>), Error> {
		Self::begin_at(&format!("https://{host}")).await
	}

	/// Same flow against an arbitrary portal origin, `base` being a full
	/// `scheme://host[:port]` rather than a bare hostname. Exists so tests
	/// can point this at a plain-HTTP mock server; production callers always
	/// go through [`Self::begin`].
	pub async fn begin_at(base: &str) -> Result<(Self, Vec<FormField>), Error> {
		let client = transport::Client::new()?;
		let base = Url::parse(base)?;

		tracing::debug!(%base, "fetching portal login page");
		let (resp, login_url) = client.get_following_redirects(base.clone(), transport::UA_DEFAULT).await?;
		transport::expect_status(&resp, 200)?;
		let body = resp.text().await.map_err(transport::Error::from)?;

		let fields = page::scrape_login_form(&body);
		if fields.is_empty() {
			return Err(Error::NoLoginForm);
		}

		Ok((Self { client, base, login_url }, fields))
	}

	/// Posts the (user-completed) form fields, follows the EPI-skip and
	/// resource-list steps, and fans the per-tunnel detail requests out
	/// concurrently. Returns the session key and every tunnel offered.
	pub async fn post_credentials(self, fields: &[FormField]) -> Result<(String, Vec<TunnelDescriptor>), Error> {
		let body = encode_fields(fields);

		tracing::debug!(base = %self.base, "posting credentials");
		let resp = self
			.client
			.request(reqwest::Method::POST, self.login_url.clone())
			.header("User-Agent", transport::UA_DEFAULT)
			.header("Content-Type", "application/x-www-form-urlencoded")
			.body(body)
			.send()
			.await
			.map_err(transport::Error::from)?;

		transport::expect_status_one_of(&resp, &[200, 302])?;
		let login_body = resp.text().await.map_err(transport::Error::from)?;

		if login_body.contains("class=\"logon_page\"") {
			return Err(extract_credentials_error(&login_body));
		}

		let epi_url = self.base.join("/my.policy")?;
		let resp = self
			.client
			.request(reqwest::Method::POST, epi_url)
			.header("User-Agent", transport::UA_DEFAULT)
			.header("Content-Type", "application/x-www-form-urlencoded")
			.body("no-inspection-host=1")
			.send()
			.await
			.map_err(transport::Error::from)?;
		transport::expect_status(&resp, 302)?;

		let resource_list_url = self.base.join("/vdesk/resource_list.xml?resourcetype=res")?;
		let resp = self
			.client
			.request(reqwest::Method::GET, resource_list_url.clone())
			.header("User-Agent", transport::UA_DEFAULT)
			.send()
			.await
			.map_err(transport::Error::from)?;
		transport::expect_status(&resp, 200)?;
		let resource_list_body = resp.text().await.map_err(transport::Error::from)?;
		let resource_list = resources::parse_resource_list(&resource_list_body)?;

		let detail_requests = resource_list.entries.iter().map(|entry| {
			let client = self.client.clone();
			let base = self.base.clone();
			let detail_uri = resource_list.detail_uri.clone();
			let entry = entry.clone();
			async move {
				let url = base.join(&format!("{detail_uri}?{}={}", entry.param, entry.value))?;
				tracing::debug!(%url, "requesting tunnel detail");
				let resp = client
					.request(reqwest::Method::GET, url)
					.header("User-Agent", transport::UA_DEFAULT)
					.send()
					.await
					.map_err(transport::Error::from)?;
				transport::expect_status(&resp, 200)?;
				let body = resp.text().await.map_err(transport::Error::from)?;
				resources::parse_tunnel_detail(&body).map_err(Error::from)
			}
		});

		let tunnels = futures::future::join_all(detail_requests)
			.await
			.into_iter()
			.collect::<Result<Vec<_>, Error>>()?;

		let session_key = self
			.client
			.find_cookie(&resource_list_url, "MRHSession")
			.ok_or(Error::MissingSessionKey)?;

		tracing::debug!(base = %self.base, tunnels = tunnels.len(), "authentication complete");
		Ok((session_key, tunnels))
	}
}

fn encode_fields(fields: &[FormField]) -> String {
	let mut out = url::form_urlencoded::Serializer::new(String::new());
	for field in fields.iter().filter(|f| f.kind != FieldKind::Other) {
		out.append_pair(&field.name, &field.value);
	}
	out.finish()
}

/// Mirrors the original's ad-hoc extraction of the pretty error message out
/// of `credentials_table_postheader` when the portal re-renders the logon
/// page with a 200 instead of failing the request outright.
fn extract_credentials_error(body: &str) -> Error {
	let Some(marker) = body.find("credentials_table_postheader") else {
		return Error::UnexpectedLogonPage;
	};
	let tail = &body[marker..];
	let Some(close_tag) = tail.find("</") else {
		return Error::UnexpectedLogonPage;
	};
	let snippet = &tail[..close_tag];
	match snippet.rfind('>') {
		Some(gt) => Error::CredentialsRejected(snippet[gt + 1..].trim().to_string()),
		None => Error::UnexpectedLogonPage,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_message_between_last_angle_bracket_and_close_tag() {
		let body = r#"<div class="logon_page"><span id="credentials_table_postheader">Bad username or password</span></div>"#;
		match extract_credentials_error(body) {
			Error::CredentialsRejected(msg) => assert_eq!(msg, "Bad username or password"),
			other => panic!("unexpected: {other:?}"),
		}
	}

	#[test]
	fn falls_back_when_marker_absent() {
		let body = r#"<div class="logon_page">something else went wrong</div>"#;
		assert!(matches!(extract_credentials_error(body), Error::UnexpectedLogonPage));
	}

	#[test]
	fn encode_fields_skips_other_kind_and_escapes() {
		let fields = vec![
			FormField {
				name: "username".into(),
				label: "Username".into(),
				value: "a b".into(),
				kind: FieldKind::Text,
			},
			FormField {
				name: "submit".into(),
				label: "submit".into(),
				value: "Logon".into(),
				kind: FieldKind::Other,
			},
		];
		assert_eq!(encode_fields(&fields), "username=a+b");
	}
}
