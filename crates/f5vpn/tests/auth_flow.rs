//! Exercises `auth::Session` and `sidx::GetSidSession` against a mock portal,
//! standing in for the real F5 appliance's five-step login round trip and
//! the one-time-code exchange (spec.md §4.2, §4.3). `wiremock` only serves
//! plain HTTP, so these drive the crate's `*_at` entry points with an
//! `http://127.0.0.1:{port}` base instead of the `https://` scheme production
//! callers get from `begin`/`connect`; the wire format on the mocked side is
//! otherwise identical.

use f5vpn::auth::{FieldKind, Session};
use f5vpn::sidx::GetSidSession;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN_PAGE: &str = r#"
	<html><body>
	<div class="logon_page">
	<form id="auth_form" method="post" action="/my.policy">
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

const REJECTED_LOGIN_PAGE: &str = r#"
	<div class="logon_page">
	<span id="credentials_table_postheader">Bad username or password</span>
	</div>
"#;

const RESOURCE_LIST: &str = r#"
	<resources>
		<opt type="available_rq" uri="/vdesk/resource_detail.xml"/>
		<list>
			<entry param="res">tunnel1</entry>
		</list>
	</resources>
"#;

const TUNNEL_DETAIL: &str = r#"
	<tunnel>
		<id>tunnel1</id>
		<caption>Corp VPN</caption>
		<description>Primary office network</description>
		<autolaunch>1</autolaunch>
	</tunnel>
"#;

#[tokio::test]
async fn full_login_round_trip_returns_session_key_and_tunnels() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/"))
		.respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
		.mount(&server)
		.await;

	Mock::given(method("POST"))
		.and(path("/"))
		.respond_with(ResponseTemplate::new(200).insert_header("Set-Cookie", "MRHSession=abc123sessionkey; Path=/").set_body_string("ok"))
		.mount(&server)
		.await;

	Mock::given(method("POST"))
		.and(path("/my.policy"))
		.respond_with(ResponseTemplate::new(302).insert_header("Location", "/"))
		.mount(&server)
		.await;

	Mock::given(method("GET"))
		.and(path("/vdesk/resource_list.xml"))
		.and(query_param("resourcetype", "res"))
		.respond_with(ResponseTemplate::new(200).set_body_string(RESOURCE_LIST))
		.mount(&server)
		.await;

	Mock::given(method("GET"))
		.and(path("/vdesk/resource_detail.xml"))
		.and(query_param("res", "tunnel1"))
		.respond_with(ResponseTemplate::new(200).set_body_string(TUNNEL_DETAIL))
		.mount(&server)
		.await;

	let (session, fields) = Session::begin_at(&server.uri()).await.expect("login page fetch");
	assert_eq!(fields.len(), 4);

	let mut fields = fields;
	for field in &mut fields {
		match field.name.as_str() {
			"username" => field.value = "alice".to_string(),
			"password" => field.value = "hunter2".to_string(),
			_ => {}
		}
	}
	assert!(fields.iter().any(|f| f.kind == FieldKind::Password));

	let (session_key, tunnels) = session.post_credentials(&fields).await.expect("credentials accepted");
	assert_eq!(session_key, "abc123sessionkey");
	assert_eq!(tunnels.len(), 1);
	assert_eq!(tunnels[0].id, "tunnel1");
	assert_eq!(tunnels[0].label, "Corp VPN");
	assert!(tunnels[0].autoconnect);
}

#[tokio::test]
async fn rejected_credentials_surface_the_portal_error_message() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/"))
		.respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
		.mount(&server)
		.await;

	Mock::given(method("POST"))
		.and(path("/"))
		.respond_with(ResponseTemplate::new(200).set_body_string(REJECTED_LOGIN_PAGE))
		.mount(&server)
		.await;

	let (session, fields) = Session::begin_at(&server.uri()).await.expect("login page fetch");
	let err = session.post_credentials(&fields).await.expect_err("credentials should be rejected");
	match err {
		f5vpn::auth::Error::CredentialsRejected(msg) => assert_eq!(msg, "Bad username or password"),
		other => panic!("unexpected error: {other:?}"),
	}
}

#[tokio::test]
async fn missing_login_form_is_an_error() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/"))
		.respond_with(ResponseTemplate::new(200).set_body_string("<html><body>not a portal</body></html>"))
		.mount(&server)
		.await;

	let err = match Session::begin_at(&server.uri()).await {
		Ok(_) => panic!("expected no-login-form error"),
		Err(err) => err,
	};
	assert!(matches!(err, f5vpn::auth::Error::NoLoginForm));
}

#[tokio::test]
async fn sidx_exchange_returns_session_id_from_response_header() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/vdesk/get_sessid_for_token.php3"))
		.respond_with(ResponseTemplate::new(200).insert_header("X-ACCESS-Session-ID", "sid-9876"))
		.mount(&server)
		.await;

	let session = GetSidSession::begin_at(&server.uri(), "one-time-code").await.expect("sid exchange");
	assert_eq!(session.sid(), "sid-9876");
}

#[tokio::test]
async fn sidx_exchange_without_header_is_an_error() {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/vdesk/get_sessid_for_token.php3"))
		.respond_with(ResponseTemplate::new(200))
		.mount(&server)
		.await;

	let err = match GetSidSession::begin_at(&server.uri(), "one-time-code").await {
		Ok(_) => panic!("expected missing-session-id error"),
		Err(err) => err,
	};
	assert!(matches!(err, f5vpn::sidx::Error::MissingSessionId));
}
