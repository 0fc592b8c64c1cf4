//! Ambient plumbing shared by the `f5vpn` library and its binaries:
//! logging setup and a couple of small ubiquitous helpers.

pub mod logging;

pub use logging::init_logging;
