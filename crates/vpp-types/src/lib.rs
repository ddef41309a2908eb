//! Typed network primitives shared by the dataplane resync crates.
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses (case-insensitive parsing)
//! - [`IpPrefix`]: an interface address in CIDR notation (`10.0.0.1/24`)

mod ip;
mod mac;

pub use ip::IpPrefix;
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),
}
