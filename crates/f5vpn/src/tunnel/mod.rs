//! TLS+PPP tunnel carrier (spec.md §4.4). Once `auth::Session` produces a
//! session key and the caller picks a tunnel id, [`Connection::connect`]
//! fetches the tunnel's connection parameters, opens the `openssl s_client`
//! TLS leg, performs the one-line HTTP-upgrade-style handshake the gateway
//! expects, and launches `pppd` over it. The two subprocesses are spliced
//! together byte-for-byte until either exits on its own or
//! [`Connection::disconnect`] tears them down; either way the teardown
//! interlock task SIGTERMs whichever subprocess outlives the other and
//! [`Connection::wait_closed`] resolves once both have been reaped.

mod params;
mod process;
mod splice;

pub use params::{ConnectionParams, LanRoute, NetworkSettings};

use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::unix::AsyncFd;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use crate::ipc::PluginNotification;
use crate::transport;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Transport(#[from] transport::Error),
	#[error("invalid host: {0}")]
	InvalidUrl(#[from] url::ParseError),
	#[error(transparent)]
	Params(#[from] params::Error),
	#[error(transparent)]
	Process(#[from] process::Error),
	#[error("I/O error setting up the tunnel: {0}")]
	Io(#[source] std::io::Error),
	#[error("pppd exited before reporting an up event")]
	PppdExitedEarly,
	#[error("openssl s_client exited before the tunnel came up")]
	SslExitedEarly,
}

/// One live tunnel. Holds the subprocess pids, the background tasks
/// splicing bytes between them, and the teardown interlock task (spec.md
/// §4.4 "Teardown interlock"): a monitor racing both children's exit,
/// SIGTERMing whichever is still alive the moment the other dies on its
/// own, and resolving [`wait_closed`](Self::wait_closed) once both have
/// been reaped. Dropping the connection without calling
/// [`disconnect`](Self::disconnect) or `wait_closed` first leaves the
/// interlock task to finish reaping on its own — `Drop` cannot `await` it
/// — and only logs a warning if either pid is still non-zero at that point.
pub struct Connection {
	ssl_pid: Arc<AtomicI32>,
	pppd_pid: Arc<AtomicI32>,
	splice_tasks: Vec<JoinHandle<std::io::Result<()>>>,
	closed_rx: Option<oneshot::Receiver<()>>,
	pub local_ip: Ipv4Addr,
	pub remote_ip: Ipv4Addr,
	pub ifname: String,
	pub network: NetworkSettings,
}

impl Connection {
	/// Fetches tunnel parameters for `vpn_z_id`, brings the TLS+PPP carrier
	/// up, and waits for `pppd` to report the negotiated addresses before
	/// returning.
	pub async fn connect(host: &str, session_key: &str, vpn_z_id: &str, plugin_path: &Path) -> Result<Self, Error> {
		Self::connect_at(&format!("https://{host}"), session_key, vpn_z_id, plugin_path).await
	}

	/// Same carrier setup against an arbitrary portal origin, for tests that
	/// need to point the initial parameter fetch at a mock server; the TLS
	/// leg and `pppd` themselves are unaffected since they connect to
	/// whatever `tunnel_host0`/`tunnel_port0` the response names.
	pub async fn connect_at(base: &str, session_key: &str, vpn_z_id: &str, plugin_path: &Path) -> Result<Self, Error> {
		let params = fetch_connection_params(base, session_key, vpn_z_id).await?;
		let network = params::parse_network_settings(&params.lan, &params.dns);

		let endpoint = format!("{}:{}", params.tunnel_host, params.tunnel_port);
		tracing::info!(%endpoint, "opening TLS leg");
		let ssl = process::spawn_openssl_client(&endpoint)?;
		let mut ssl_child = ssl.child;

		let handshake = format!(
			"GET /myvpn?sess={session_key}\n&hdlc_framing=no&ipv4=yes&ipv6=yes&Z={z} HTTP/1.0\r\n\
			 User-Agent: Mozilla/5.0 (compatible; MSIE 10.0; Windows NT 6.1; Trident/6.0; F5 Networks Client)\r\n\
			 Host: {tunnel_host}\r\n\r\n",
			z = params.session_z,
			tunnel_host = params.tunnel_host,
		);
		let ssl_write = AsyncFd::new(ssl.write_fd).map_err(Error::Io)?;
		write_all(&ssl_write, handshake.as_bytes()).await.map_err(Error::Io)?;

		let ssl_read = AsyncFd::new(ssl.read_fd).map_err(Error::Io)?;
		let ip_spec = tokio::select! {
			biased;
			status = ssl_child.wait() => {
				tracing::warn!(?status, "openssl exited before the tunnel handshake completed");
				return Err(Error::SslExitedEarly);
			}
			header = read_http_header(&ssl_read) => header.map_err(Error::Io)?,
		};

		tracing::debug!(%ip_spec, "starting pppd");
		let pppd = process::spawn_pppd(plugin_path, &ip_spec)?;
		let mut pppd_child = pppd.child;

		let (up_tx, up_rx) = oneshot::channel();
		let plugin_read = AsyncFd::new(pppd.plugin_read_fd).map_err(Error::Io)?;
		tokio::spawn(async move {
			if let Ok(note) = read_plugin_notification(&plugin_read).await {
				let _ = up_tx.send(note);
			}
		});

		let pty_for_read = pppd.pty_master;
		let pty_for_write = dup_owned_fd(&pty_for_read).map_err(Error::Io)?;
		let pty_read_async = AsyncFd::new(pty_for_read).map_err(Error::Io)?;
		let pty_write_async = AsyncFd::new(pty_for_write).map_err(Error::Io)?;

		// network -> pppd, pppd -> network.
		let splice_tasks = vec![
			tokio::spawn(splice::pump(ssl_read, pty_write_async)),
			tokio::spawn(splice::pump(pty_read_async, ssl_write)),
		];

		let note = tokio::select! {
			biased;
			status = pppd_child.wait() => {
				tracing::warn!(?status, "pppd exited before reporting an up event");
				return Err(Error::PppdExitedEarly);
			}
			note = up_rx => note.map_err(|_| Error::PppdExitedEarly)?,
		};

		let ssl_pid = Arc::new(AtomicI32::new(ssl_child.id().unwrap_or(0) as i32));
		let pppd_pid = Arc::new(AtomicI32::new(pppd_child.id().unwrap_or(0) as i32));
		let (closed_tx, closed_rx) = oneshot::channel();
		tokio::spawn(run_teardown_interlock(ssl_child, pppd_child, ssl_pid.clone(), pppd_pid.clone(), closed_tx));

		tracing::info!(ifname = note.ifname_str(), "tunnel up");
		Ok(Self {
			ssl_pid,
			pppd_pid,
			splice_tasks,
			closed_rx: Some(closed_rx),
			local_ip: Ipv4Addr::from(note.local_addr.to_ne_bytes()),
			remote_ip: Ipv4Addr::from(note.remote_addr.to_ne_bytes()),
			ifname: note.ifname_str().to_string(),
			network,
		})
	}

	/// Resolves once both subprocesses have been reaped, however that
	/// teardown started — a spontaneous exit of either child (the interlock
	/// task SIGTERMs the survivor itself, spec.md §4.4) or an explicit
	/// [`disconnect`](Self::disconnect). Mirrors the "terminal callback
	/// fires exactly once, with null settings and no error" contract of
	/// spec.md §8 scenario 6 as a single-resolution future instead of a
	/// callback. Idempotent: callers may await it more than once (e.g. once
	/// racing a signal, once inside `disconnect`) and later calls resolve
	/// immediately.
	pub async fn wait_closed(&mut self) {
		if let Some(rx) = self.closed_rx.take() {
			let _ = rx.await;
		}
	}

	/// Sends both live subprocesses `SIGTERM` (mirroring the original's
	/// `f5vpn_disconnect`) and waits for the teardown interlock — and the
	/// splice tasks it feeds — to finish.
	pub async fn disconnect(mut self) -> std::io::Result<()> {
		for pid in [self.ssl_pid.load(Ordering::SeqCst), self.pppd_pid.load(Ordering::SeqCst)] {
			if pid != 0 {
				let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
			}
		}
		self.wait_closed().await;
		for task in self.splice_tasks.drain(..) {
			task.abort();
		}
		Ok(())
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		let ssl_alive = self.ssl_pid.load(Ordering::SeqCst) != 0;
		let pppd_alive = self.pppd_pid.load(Ordering::SeqCst) != 0;
		if ssl_alive || pppd_alive {
			tracing::warn!(ssl_alive, pppd_alive, "Connection dropped without calling disconnect()/wait_closed()");
		}
		// The interlock task (`run_teardown_interlock`) owns both `Child`
		// handles and keeps running detached regardless of this drop, so it
		// still reaps both subprocesses even if nobody ever awaits
		// `wait_closed`.
	}
}

/// Races both children's `wait()`; the moment either exits, SIGTERMs
/// whichever is still alive and waits for it too, then resolves `closed_tx`
/// — the teardown interlock of spec.md §4.4: "if the other child is still
/// live, signal it (SIGTERM). When both are reaped, invoke the user
/// callback one final time."
async fn run_teardown_interlock(mut ssl_child: Child, mut pppd_child: Child, ssl_pid: Arc<AtomicI32>, pppd_pid: Arc<AtomicI32>, closed_tx: oneshot::Sender<()>) {
	tokio::select! {
		status = ssl_child.wait() => {
			tracing::info!(?status, "openssl exited");
			ssl_pid.store(0, Ordering::SeqCst);
			signal_if_alive(&pppd_pid);
			let status = pppd_child.wait().await;
			tracing::info!(?status, "pppd reaped after openssl exit");
			pppd_pid.store(0, Ordering::SeqCst);
		}
		status = pppd_child.wait() => {
			tracing::info!(?status, "pppd exited");
			pppd_pid.store(0, Ordering::SeqCst);
			signal_if_alive(&ssl_pid);
			let status = ssl_child.wait().await;
			tracing::info!(?status, "openssl reaped after pppd exit");
			ssl_pid.store(0, Ordering::SeqCst);
		}
	}
	let _ = closed_tx.send(());
}

fn signal_if_alive(pid: &AtomicI32) {
	let pid = pid.load(Ordering::SeqCst);
	if pid != 0 {
		let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
	}
}

async fn fetch_connection_params(base: &str, session_key: &str, vpn_z_id: &str) -> Result<ConnectionParams, Error> {
	let client = transport::Client::new()?;
	let url = Url::parse(base)?.join(&format!("/vdesk/vpn/connect.php3?resourcename={vpn_z_id}&outform=xml&client_version=1.1"))?;

	let resp = client
		.request(reqwest::Method::GET, url)
		.header("User-Agent", transport::UA_LAUNCHER)
		.header("Cookie", format!("MRHSession={session_key};"))
		.send()
		.await
		.map_err(transport::Error::from)?;
	transport::expect_status(&resp, 200)?;
	let body = resp.text().await.map_err(transport::Error::from)?;
	Ok(params::parse_connection_params(&body)?)
}

async fn write_all(fd: &AsyncFd<OwnedFd>, mut buf: &[u8]) -> std::io::Result<()> {
	while !buf.is_empty() {
		let mut guard = fd.writable().await?;
		let raw = fd.as_raw_fd();
		match guard.try_io(|_| unsafe {
			let n = libc::write(raw, buf.as_ptr() as *const libc::c_void, buf.len());
			if n < 0 {
				Err(std::io::Error::last_os_error())
			} else {
				Ok(n as usize)
			}
		}) {
			Ok(Ok(n)) => buf = &buf[n..],
			Ok(Err(e)) => return Err(e),
			Err(_would_block) => continue,
		}
	}
	Ok(())
}

/// Reads one byte at a time until `\r\n\r\n`, like the original's
/// deliberately inefficient scan — reading in bigger chunks risks reading
/// past the header and into PPP's own data stream. Extracts the client/server
/// IP spec `pppd` wants as its connect-string argument, falling back to the
/// original's dummy defaults when a header is missing.
async fn read_http_header(fd: &AsyncFd<OwnedFd>) -> std::io::Result<String> {
	let mut header = Vec::with_capacity(256);
	let mut byte = [0u8; 1];
	loop {
		let mut guard = fd.readable().await?;
		let raw = fd.as_raw_fd();
		let n = match guard.try_io(|_| unsafe {
			let n = libc::read(raw, byte.as_mut_ptr() as *mut libc::c_void, 1);
			if n < 0 {
				Err(std::io::Error::last_os_error())
			} else {
				Ok(n as usize)
			}
		}) {
			Ok(result) => result?,
			Err(_would_block) => continue,
		};
		if n == 0 {
			break;
		}
		header.push(byte[0]);
		if header.len() >= 4 && &header[header.len() - 4..] == b"\r\n\r\n" {
			break;
		}
	}

	let text = String::from_utf8_lossy(&header);
	let client_ip = extract_header_value(&text, "X-VPN-client-IP: ").unwrap_or_else(|| "0.0.0.0".to_string());
	let server_ip = extract_header_value(&text, "X-VPN-server-IP: ").unwrap_or_else(|| "1.1.1.1".to_string());
	Ok(format!("{client_ip}:{server_ip}"))
}

fn extract_header_value(text: &str, prefix: &str) -> Option<String> {
	let start = text.find(prefix)? + prefix.len();
	let rest = &text[start..];
	let end = rest.find('\r').unwrap_or(rest.len());
	Some(rest[..end].to_string())
}

async fn read_plugin_notification(fd: &AsyncFd<OwnedFd>) -> std::io::Result<PluginNotification> {
	let mut buf = vec![0u8; std::mem::size_of::<PluginNotification>()];
	let mut read = 0;
	while read < buf.len() {
		let mut guard = fd.readable().await?;
		let raw = fd.as_raw_fd();
		let n = match guard.try_io(|_| unsafe {
			let n = libc::read(raw, buf[read..].as_mut_ptr() as *mut libc::c_void, buf.len() - read);
			if n < 0 {
				Err(std::io::Error::last_os_error())
			} else {
				Ok(n as usize)
			}
		}) {
			Ok(result) => result?,
			Err(_would_block) => continue,
		};
		if n == 0 {
			return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "plugin pipe closed before sending a notification"));
		}
		read += n;
	}
	PluginNotification::from_bytes(&buf).ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed plugin notification"))
}

fn dup_owned_fd(fd: &OwnedFd) -> std::io::Result<OwnedFd> {
	let raw = unsafe { libc::dup(fd.as_raw_fd()) };
	if raw < 0 {
		return Err(std::io::Error::last_os_error());
	}
	Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::process::Command;

	#[test]
	fn extracts_header_values() {
		let text = "HTTP/1.0 200 OK\r\nX-VPN-client-IP: 192.168.1.6\r\nX-VPN-server-IP: 1.2.3.4\r\n\r\n";
		assert_eq!(extract_header_value(text, "X-VPN-client-IP: ").as_deref(), Some("192.168.1.6"));
		assert_eq!(extract_header_value(text, "X-VPN-server-IP: ").as_deref(), Some("1.2.3.4"));
	}

	#[test]
	fn missing_header_returns_none() {
		let text = "HTTP/1.0 200 OK\r\n\r\n";
		assert_eq!(extract_header_value(text, "X-VPN-client-IP: "), None);
	}

	/// Stands in for `openssl s_client`/`pppd` with two long-lived `sleep`
	/// processes: killing one out from under the interlock (simulating a
	/// spontaneous subprocess exit, spec.md §8 scenario 6) must SIGTERM the
	/// survivor and resolve `wait_closed` exactly once, with both pids
	/// reaped.
	#[tokio::test]
	async fn killing_one_child_terminates_the_other_and_resolves_wait_closed() {
		let ssl_child = Command::new("sleep").arg("60").kill_on_drop(true).spawn().expect("spawn sleep");
		let pppd_child = Command::new("sleep").arg("60").kill_on_drop(true).spawn().expect("spawn sleep");
		let ssl_raw_pid = ssl_child.id().expect("ssl pid") as i32;
		let pppd_raw_pid = pppd_child.id().expect("pppd pid") as i32;

		let ssl_pid = Arc::new(AtomicI32::new(ssl_raw_pid));
		let pppd_pid = Arc::new(AtomicI32::new(pppd_raw_pid));
		let (closed_tx, closed_rx) = oneshot::channel();
		tokio::spawn(run_teardown_interlock(ssl_child, pppd_child, ssl_pid.clone(), pppd_pid.clone(), closed_tx));

		signal::kill(Pid::from_raw(ssl_raw_pid), Signal::SIGKILL).expect("kill ssl child");

		tokio::time::timeout(std::time::Duration::from_secs(5), closed_rx).await.expect("interlock timed out").expect("closed_tx dropped");

		assert_eq!(ssl_pid.load(Ordering::SeqCst), 0);
		assert_eq!(pppd_pid.load(Ordering::SeqCst), 0);
		assert!(
			signal::kill(Pid::from_raw(pppd_raw_pid), None).is_err(),
			"pppd survivor should have been SIGTERMed and reaped"
		);
	}
}
