//! Subprocess plumbing for the two programs the tunnel carries data
//! through: `openssl s_client` terminates the TLS leg the portal expects,
//! and `pppd` runs PPP over the pty it hands back (spec.md §4.4 "TLS and
//! PPP subprocesses"). Both were `fork`+`exec` over hand-built pipes in the
//! original; we keep the same pipe topology and hand the far ends to
//! `tokio::process::Command` instead of `dup2`-ing them by hand, so the near
//! ends stay available as plain fds for the splice loop.

use std::os::fd::{AsRawFd, OwnedFd};
use std::process::Stdio;

use nix::pty::openpty;
use nix::unistd::pipe;
use tokio::process::{Child, Command};

use crate::ipc::PLUGIN_FD_ENV;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("failed to spawn {program}: {source}")]
	Spawn { program: &'static str, source: std::io::Error },
	#[error("failed to set up pipe/pty: {0}")]
	Nix(#[from] nix::Error),
}

/// `openssl s_client` with its stdin/stdout wired to plain pipes we own the
/// near ends of, matching the original's `launch_ssl_client`.
pub struct SslClient {
	pub child: Child,
	/// Write here to send bytes to the TLS connection.
	pub write_fd: OwnedFd,
	/// Read here to receive bytes the TLS connection decrypted.
	pub read_fd: OwnedFd,
}

pub fn spawn_openssl_client(endpoint: &str) -> Result<SslClient, Error> {
	let (to_child_read, to_child_write) = pipe()?;
	let (from_child_read, from_child_write) = pipe()?;

	let child = Command::new("openssl")
		.args(["s_client", "-quiet", "-verify_quiet", "-verify_return_error", "-connect", endpoint])
		.stdin(Stdio::from(to_child_read))
		.stdout(Stdio::from(from_child_write))
		.stderr(Stdio::null())
		.kill_on_drop(true)
		.spawn()
		.map_err(|source| Error::Spawn { program: "openssl", source })?;

	set_nonblocking(&to_child_write);
	set_nonblocking(&from_child_read);

	Ok(SslClient {
		child,
		write_fd: to_child_write,
		read_fd: from_child_read,
	})
}

/// `pppd` talking PPP over a pty (legacy modem flow-control convention, kept
/// because `pppd` assumes a tty), plus the plugin notification pipe
/// `f5vpn-pppd-plugin` writes its one message to.
pub struct PppdProcess {
	pub child: Child,
	pub pty_master: OwnedFd,
	pub plugin_read_fd: OwnedFd,
}

const PPPD_ARGS: &[&str] = &["local", "nodetach", "noauth", "nocrtscts", "nodefaultroute", "noremoteip", "noproxyarp"];

pub fn spawn_pppd(plugin_path: &std::path::Path, ip_spec: &str) -> Result<PppdProcess, Error> {
	let pty = openpty(None, None)?;
	let (plugin_read, plugin_write) = pipe()?;

	let pty_slave_fd = pty.slave.as_raw_fd();
	let plugin_write_fd = plugin_write.as_raw_fd();

	let mut cmd = Command::new("pppd");
	cmd.args(PPPD_ARGS)
		.arg("plugin")
		.arg(plugin_path)
		.arg(ip_spec)
		.env(PLUGIN_FD_ENV, plugin_write_fd.to_string())
		.stdin(Stdio::null())
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.kill_on_drop(true);

	// Safety: runs in the forked child between fork and exec, before any
	// other thread exists in it; dup2/close on a fd this process owns are
	// both async-signal-safe.
	unsafe {
		cmd.pre_exec(move || {
			if libc::dup2(pty_slave_fd, libc::STDIN_FILENO) < 0 {
				return Err(std::io::Error::last_os_error());
			}
			Ok(())
		});
	}

	let child = cmd.spawn().map_err(|source| Error::Spawn { program: "pppd", source })?;

	drop(pty.slave);
	drop(plugin_write);
	set_nonblocking(&pty.master);
	set_nonblocking(&plugin_read);

	Ok(PppdProcess {
		child,
		pty_master: pty.master,
		plugin_read_fd: plugin_read,
	})
}

fn set_nonblocking(fd: &OwnedFd) {
	let raw = fd.as_raw_fd();
	unsafe {
		let flags = libc::fcntl(raw, libc::F_GETFL, 0);
		libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK);
	}
}
