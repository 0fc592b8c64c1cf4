// pppd resolves `add_notifier`, `ip_up_notifier`, `ipcp_gotoptions` and
// `ifname` out of its own binary's symbol table when it dlopen()s a plugin —
// there's nothing to link against at build time, only undefined references
// to leave for pppd to fill in.
fn main() {
    let version = fwd("F5VPN_PPPD_TARGET_VERSION", "2.4.9");
    println!("cargo:rustc-env=F5VPN_PPPD_TARGET_VERSION={version}");

    let target = std::env::var("TARGET").unwrap_or_default();
    if target.contains("darwin") {
        println!("cargo:rustc-link-arg=-Wl,-undefined,dynamic_lookup");
    } else {
        println!("cargo:rustc-link-arg=-Wl,--allow-shlib-undefined");
    }
}

fn fwd(name: &str, default: &str) -> String {
    println!("cargo:rerun-if-env-changed={name}");
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
