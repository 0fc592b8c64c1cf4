use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber reading filter directives from `F5VPN_LOG`,
/// falling back to `info` for this crate family and `warn` for everything
/// else. Call once from a binary's `main`; library code only ever emits
/// `tracing` events and never touches the subscriber.
pub fn init_logging() {
	let filter = EnvFilter::try_from_env("F5VPN_LOG")
		.unwrap_or_else(|_| EnvFilter::new("warn,f5vpn=info,f5vpn_core=info"));

	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(true)
		.try_init();
}
