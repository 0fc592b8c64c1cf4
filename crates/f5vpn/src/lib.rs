//! Client library for F5 Firepass / BIG-IP SSL VPN portals: trading a
//! one-time code or interactive login for a gateway session, then bringing
//! up and tearing down the PPP-over-TLS tunnel that session authorizes.
//!
//! Modules map onto the original C implementation's components one for
//! one: [`transport`] is the shared HTTP plumbing (AHM), [`sidx`] the
//! one-time-code exchange (SIDX), [`auth`] the interactive login flow
//! (AUTH), [`tunnel`] the TLS+PPP carrier (TUN), and [`ipc`] the wire
//! format the `f5vpn-pppd-plugin` crate (PNP) uses to report back up
//! addresses.

pub mod auth;
pub mod ipc;
pub mod sidx;
pub mod transport;
pub mod tunnel;
