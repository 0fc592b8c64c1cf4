//! `pppd` notifier plugin (PNP): the `.so` `tunnel::process::spawn_pppd`
//! hands to `pppd --plugin`, which writes one [`f5vpn::ipc::PluginNotification`]
//! down the fd named by [`f5vpn::ipc::PLUGIN_FD_ENV`] the moment `pppd`'s
//! `ip-up` notifier list runs — the signal `tunnel::Connection::connect`
//! blocks on to learn the negotiated addresses and interface name.
//!
//! `pppd` dlopen()s this `.so` itself and resolves `add_notifier`,
//! `ip_up_notifier`, `ipcp_gotoptions` and `ifname` out of its own binary
//! ([`pppd_sys`]), so none of that surface links or runs under `cargo test`;
//! the parts that do ([`build_notification`], [`write_notification`]) are
//! kept free of those externs so they can be.

mod pppd_sys;

use std::os::raw::c_void;
use std::os::unix::io::RawFd;

use once_cell::sync::OnceCell;

use f5vpn::ipc::PluginNotification;
#[cfg(not(test))]
use f5vpn::ipc::PLUGIN_FD_ENV;

#[cfg_attr(test, allow(dead_code))]
static PLUGIN_FD: OnceCell<RawFd> = OnceCell::new();

const RAW_VERSION: &str = env!("F5VPN_PPPD_TARGET_VERSION");

const fn padded_version() -> [u8; 32] {
	let bytes = RAW_VERSION.as_bytes();
	let mut out = [0u8; 32];
	let mut i = 0;
	while i < bytes.len() && i < out.len() - 1 {
		out[i] = bytes[i];
		i += 1;
	}
	out
}

/// `pppd` `strcmp`s this against its own compiled-in version before loading
/// a plugin and refuses the load on a mismatch; `build.rs` forwards
/// `F5VPN_PPPD_TARGET_VERSION` so a build can be pointed at whatever `pppd`
/// it'll actually run against.
#[unsafe(no_mangle)]
pub static pppd_version: [u8; 32] = padded_version();

/// Called once by `pppd` right after it loads the plugin. Reads the fd
/// `tunnel::process::spawn_pppd` passed in `F5VPN_PPPD_PLUGIN_FD` and
/// registers [`ip_up`] on the `ip-up` notifier list, mirroring the
/// original's `plugin_init`.
#[unsafe(no_mangle)]
#[cfg(not(test))]
pub unsafe extern "C" fn plugin_init() {
	if let Ok(fd) = std::env::var(PLUGIN_FD_ENV).unwrap_or_default().parse::<RawFd>() {
		let _ = PLUGIN_FD.set(fd);
	}
	unsafe {
		pppd_sys::add_notifier(&raw mut pppd_sys::ip_up_notifier, ip_up, std::ptr::null_mut());
	}
}

/// `pppd`'s `ip-up` notifier callback: reads the addresses it just
/// negotiated and the interface name it picked, and writes one notification
/// record to the plugin fd. Mirrors the original's `my_ip_up`.
#[cfg(not(test))]
unsafe extern "C" fn ip_up(_arg: *mut c_void, _phase: std::os::raw::c_int) {
	let Some(&fd) = PLUGIN_FD.get() else {
		return;
	};
	let note = unsafe {
		let opts = &pppd_sys::ipcp_gotoptions[0];
		let ifname = std::slice::from_raw_parts(pppd_sys::ifname.as_ptr() as *const u8, pppd_sys::MAXIFNAMELEN);
		build_notification(opts.ouraddr, opts.hisaddr, ifname)
	};
	write_notification(fd, &note);
}

/// Builds the wire record from the raw fields `pppd` exposes. `ifname` may
/// be longer than [`PluginNotification::ifname`] holds (`pppd`'s
/// `MAXIFNAMELEN` is twice `IFNAMSIZ`) or NUL-padded short; either way only
/// the name up to the first NUL survives, truncated to 15 bytes with the
/// 16th always left `0` so the field is NUL-terminated even at the longest
/// allowed name (spec.md §4.5, §8 "PNP interface name longer than 15 bytes
/// is truncated and NUL-terminated").
fn build_notification(ouraddr: u32, hisaddr: u32, ifname: &[u8]) -> PluginNotification {
	let mut name = [0u8; 16];
	let nul_at = ifname.iter().position(|&b| b == 0).unwrap_or(ifname.len());
	let len = nul_at.min(name.len() - 1);
	name[..len].copy_from_slice(&ifname[..len]);
	PluginNotification {
		local_addr: ouraddr,
		remote_addr: hisaddr,
		ifname: name,
	}
}

/// Writes the whole record, retrying on short writes the way the original's
/// bare `write()` call never bothered to (a pipe write under
/// `size_of::<PluginNotification>()` never partial-writes in practice, but
/// nothing guarantees that).
fn write_notification(fd: RawFd, note: &PluginNotification) {
	let bytes = note.as_bytes();
	let mut written = 0;
	while written < bytes.len() {
		let n = unsafe { libc::write(fd, bytes[written..].as_ptr() as *const c_void, bytes.len() - written) };
		if n <= 0 {
			break;
		}
		written += n as usize;
	}
}
