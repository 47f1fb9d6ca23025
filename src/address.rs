//! Provides the IPv4 address value type and the inclusive range scanned by a run.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

use serde_derive::Deserialize;

/// A single IPv4 host, stored as its 32-bit value.
///
/// The four segments are named after dotted-quad notation, so `a.b.c.d`
/// maps to [`Address::a`] through [`Address::d`].
///
/// ```rust
/// # use hipscan::address::Address;
/// let addr: Address = "10.20.30.40".parse().unwrap();
/// assert_eq!(addr.segments(), [10, 20, 30, 40]);
/// assert_eq!(addr.value(), 0x0A14_1E28);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Address(u32);

impl Address {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn from_segments(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self(u32::from_be_bytes([a, b, c, d]))
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn segments(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub const fn a(self) -> u8 {
        self.segments()[0]
    }

    pub const fn b(self) -> u8 {
        self.segments()[1]
    }

    pub const fn c(self) -> u8 {
        self.segments()[2]
    }

    pub const fn d(self) -> u8 {
        self.segments()[3]
    }

    /// Whether this address should be probed at all.
    ///
    /// Addresses with a 255 in any of the last three segments look like
    /// broadcast addresses, and a zero last segment is a network address.
    /// Neither is ever a camera.
    pub const fn is_probeable(self) -> bool {
        let [_, b, c, d] = self.segments();
        !(b == 255 || c == 255 || d == 255 || d == 0)
    }

    pub const fn socket(self, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::from_bits(self.0), port)
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Self(ip.to_bits())
    }
}

impl From<Address> for Ipv4Addr {
    fn from(addr: Address) -> Self {
        Self::from_bits(addr.0)
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<Ipv4Addr>()
            .map(Self::from)
            .map_err(|_| format!("Invalid IPv4 address '{s}'"))
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.segments();
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

/// Inclusive range of addresses `start..=end`.
///
/// `start <= end` is checked once when the range is built from user input;
/// everything downstream relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub start: Address,
    pub end: Address,
}

impl ScanRange {
    pub fn new(start: Address, end: Address) -> Result<Self, String> {
        if start > end {
            return Err(format!(
                "Start address {start} is greater than end address {end}"
            ));
        }
        Ok(Self { start, end })
    }

    /// Number of addresses covered, `end - start + 1`.
    ///
    /// `u64` because `0.0.0.0..=255.255.255.255` holds 2^32 addresses.
    pub const fn len(&self) -> u64 {
        (self.end.value() - self.start.value()) as u64 + 1
    }

    pub const fn is_empty(&self) -> bool {
        false
    }

    /// The address `offset` steps past `start`, or `None` past `end`.
    pub fn nth(&self, offset: u64) -> Option<Address> {
        if offset >= self.len() {
            return None;
        }
        // offset < len <= 2^32, so the sum stays within u32 for any valid range
        u32::try_from(u64::from(self.start.value()) + offset)
            .ok()
            .map(Address::new)
    }
}

impl fmt::Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
