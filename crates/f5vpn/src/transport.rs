//! Async HTTP multiplexer.
//!
//! The original C implementation binds libcurl's multi-handle socket and
//! timer callbacks into a GLib main loop and dispatches one `completion`
//! callback per request from the loop's fd/timer events (spec.md §4.1). A
//! `reqwest::Client` bound to the caller's `tokio` runtime gives the same
//! contract for free: `execute().await` resolving *is* the completion, and
//! nothing here ever panics — every failure becomes an [`Error`] the caller
//! threads through its own domain error.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::Method;
use url::Url;

pub const UA_DEFAULT: &str =
	"Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/76.0.3809.100 Safari/537.36";
pub const UA_LAUNCHER: &str = "Mozilla/5.0 (Linux) F5Launcher/1.0";

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("transport error: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("unexpected HTTP response code {code} received from {url}")]
	BadStatus { code: u16, url: String },
}

/// One logical HTTP client for the lifetime of an [`crate::auth::Session`] or
/// a single [`crate::sidx`]/[`crate::tunnel`] request. Carries a shared
/// cookie jar (spec.md §4.3 "single persistent cookie jar") and never
/// follows redirects automatically — callers that need the portal's
/// redirect-following GET do so explicitly via [`Client::get_following_redirects`].
#[derive(Clone)]
pub struct Client {
	inner: reqwest::Client,
	jar: Arc<Jar>,
}

impl Client {
	pub fn new() -> Result<Self, Error> {
		let jar = Arc::new(Jar::default());
		let inner = reqwest::Client::builder()
			.cookie_provider(jar.clone())
			.redirect(reqwest::redirect::Policy::none())
			.build()?;
		Ok(Self { inner, jar })
	}

	pub fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
		self.inner.request(method, url)
	}

	/// GETs `url`, following up to 10 redirects the way `CURLOPT_FOLLOWLOCATION`
	/// does, returning the final response together with the URL it was
	/// actually fetched from (the "effective URL" spec.md §4.3 reuses for the
	/// subsequent login POST).
	pub async fn get_following_redirects(
		&self,
		mut url: Url,
		user_agent: &str,
	) -> Result<(reqwest::Response, Url), Error> {
		for _ in 0..10 {
			let resp = self
				.inner
				.get(url.clone())
				.header("User-Agent", user_agent)
				.send()
				.await?;
			if resp.status().is_redirection() {
				if let Some(location) = resp.headers().get(reqwest::header::LOCATION) {
					if let Ok(next) = url.join(location.to_str().unwrap_or_default()) {
						url = next;
						continue;
					}
				}
			}
			return Ok((resp, url));
		}
		Err(Error::BadStatus {
			code: 0,
			url: url.to_string(),
		})
	}

	pub fn cookie_jar(&self) -> &Arc<Jar> {
		&self.jar
	}

	/// Looks up a single cookie by name from the shared jar, mirroring the
	/// original's `CURLINFO_COOKIELIST` scan for `MRHSession` (spec.md §4.3
	/// "Session-key extraction").
	pub fn find_cookie(&self, url: &Url, name: &str) -> Option<String> {
		find_cookie_in(&self.jar, url, name)
	}
}

pub fn find_cookie_in(jar: &Jar, url: &Url, name: &str) -> Option<String> {
	let header = jar.cookies(url)?;
	let header = header.to_str().ok()?;
	header.split("; ").find_map(|kv| {
		let (k, v) = kv.split_once('=')?;
		(k == name).then(|| v.to_string())
	})
}

/// Checks a response's status against the single code the protocol expects,
/// producing the structured [`Error::BadStatus`] spec.md §7 asks for
/// (effective URL + observed code).
pub fn expect_status(resp: &reqwest::Response, expected: u16) -> Result<(), Error> {
	expect_status_one_of(resp, &[expected])
}

pub fn expect_status_one_of(resp: &reqwest::Response, expected: &[u16]) -> Result<(), Error> {
	let code = resp.status().as_u16();
	if expected.contains(&code) {
		return Ok(());
	}
	Err(Error::BadStatus {
		code,
		url: resp.url().to_string(),
	})
}
