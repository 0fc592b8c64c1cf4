//! Session-id exchange: trade a one-time code for a gateway session id in a
//! single HTTPS round trip (spec.md §4.2).

use reqwest::Method;
use url::Url;

use crate::transport;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Transport(#[from] transport::Error),
	#[error("invalid host: {0}")]
	InvalidUrl(#[from] url::ParseError),
	#[error("Failed to parse X-ACCESS-Session-ID header from response")]
	MissingSessionId,
}

/// Handle for one one-time-code exchange. `begin` performs the whole
/// round trip; by the time it returns, the exchange is either `Ok` with the
/// session id or `Err` — there is no separate "free" step in the async
/// mapping (spec.md §9 "Callbacks versus async functions").
pub struct GetSidSession {
	sid: String,
}

impl GetSidSession {
	pub async fn begin(host: &str, otc: &str) -> Result<Self, Error> {
		Self::begin_at(&format!("https://{host}"), otc).await
	}

	/// Same round trip against an arbitrary portal origin, `base` being a
	/// full `scheme://host[:port]` rather than a bare hostname. Exists so
	/// tests can point this at a plain-HTTP mock server; production callers
	/// always go through [`Self::begin`].
	pub async fn begin_at(base: &str, otc: &str) -> Result<Self, Error> {
		let client = transport::Client::new().map_err(Error::Transport)?;
		let url = Url::parse(base)?.join("/vdesk/get_sessid_for_token.php3")?;

		tracing::debug!(base, "requesting session id for one-time code");

		let resp = client
			.request(Method::GET, url)
			.header("User-Agent", transport::UA_LAUNCHER)
			.header("X-ACCESS-Session-Token", otc)
			.send()
			.await
			.map_err(transport::Error::from)?;

		transport::expect_status(&resp, 200)?;

		let sid = resp
			.headers()
			.get("X-ACCESS-Session-ID")
			.and_then(|v| v.to_str().ok())
			.map(str::to_string)
			.ok_or(Error::MissingSessionId)?;

		tracing::debug!("session id exchange complete");
		Ok(Self { sid })
	}

	pub fn sid(&self) -> &str {
		&self.sid
	}
}
