//! Hand-written bindings to the slice of `pppd`'s plugin ABI this crate
//! touches: the `ip_up` notifier list and the negotiated IPCP addresses
//! (`pppd/pppd.h`, `pppd/ipcp.h`). `pppd` never links a plugin against these
//! symbols — it resolves them out of its own binary when it `dlopen()`s the
//! `.so`, the same relocation style `build.rs` tells the linker to allow.
//!
//! `IpcpOptions`'s layout mirrors pppd 2.4.x's `ipcp_options`: eleven
//! single-byte `bool` flags pppd itself defines as `unsigned char`, followed
//! by the two addresses we actually read. A plugin built against a `pppd`
//! whose `ipcp_options` shape has drifted would silently read the wrong
//! bytes here; linking against the real header via `bindgen` at build time
//! would close that gap but needs `pppd`'s development headers on the build
//! host, which this crate cannot assume.

// Every item here is only reachable from `lib.rs`'s `#[cfg(not(test))]`
// glue, since `cargo test` has no `pppd` to dlopen this `.so` and resolve
// these symbols against.
#![cfg_attr(test, allow(dead_code))]

use std::os::raw::{c_char, c_int, c_void};

pub const MAXIFNAMELEN: usize = 32;

#[repr(C)]
pub struct IpcpOptions {
	pub neg_addr: u8,
	pub old_addrs: u8,
	pub req_addr: u8,
	pub default_route: u8,
	pub proxy_arp: u8,
	pub neg_vj: u8,
	pub old_vj: u8,
	pub accept_local: u8,
	pub accept_remote: u8,
	pub req_dns1: u8,
	pub req_dns2: u8,
	_pad: [u8; 1],
	pub ouraddr: u32,
	pub hisaddr: u32,
}

pub type NotifyFunc = unsafe extern "C" fn(*mut c_void, c_int);

#[repr(C)]
pub struct Notifier {
	pub next: *mut Notifier,
	pub func: Option<NotifyFunc>,
	pub arg: *mut c_void,
}

unsafe extern "C" {
	/// `extern char ifname[MAXIFNAMELEN];` — the interface name pppd picked
	/// for this connection, set before notifiers on the `ip-up` list run.
	pub static ifname: [c_char; MAXIFNAMELEN];

	/// `extern ipcp_options ipcp_gotoptions[NUM_PPP];` — index 0 is the
	/// single link this plugin ever runs on (no multilink support).
	pub static ipcp_gotoptions: [IpcpOptions; 1];

	/// `extern struct notifier *ip_up_notifier;`
	pub static mut ip_up_notifier: *mut Notifier;

	/// `void add_notifier(struct notifier **notif, notify_func func, void *arg);`
	pub fn add_notifier(notif: *mut *mut Notifier, func: NotifyFunc, arg: *mut c_void);
}
