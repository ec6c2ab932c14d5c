use core::fmt;

/// A four-octet IPv4 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Ipv4Address(pub [u8; 4]);

/// A sixteen-octet IPv6 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Ipv6Address(pub [u8; 16]);

/// An internetworking address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum IpAddress {
    /// An unspecified address.
    ///
    /// May be used as a placeholder for storage where the address is not assigned yet, and as a
    /// wildcard in bind and listen matching.
    Unspecified,

    /// An IPv4 address.
    Ipv4(Ipv4Address),

    /// An IPv6 address.
    Ipv6(Ipv6Address),
}

/// The address family of a socket, fixed at creation.
///
/// A dual-stack listener on an IPv6 wildcard still receives IPv4 peers, which arrive as
/// v4-mapped v6 addresses. Instead of swapping behavior tables at connect time, the family is a
/// plain tag chosen once from the first concrete address a socket sees and every later address
/// must agree with it.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum AddressFamily {
    /// Native IPv4.
    V4,
    /// An IPv4 peer behind a v6 socket, `::ffff:0:0/96`.
    V6Mapped,
    /// Native IPv6.
    V6Native,
}

/// An opaque identifier of the device a packet arrived on or a socket is bound to.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct InterfaceId(pub u32);

impl Ipv4Address {
    /// The unspecified address, `0.0.0.0`.
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address([0; 4]);

    /// Construct an address from octets.
    pub const fn new(a0: u8, a1: u8, a2: u8, a3: u8) -> Ipv4Address {
        Ipv4Address([a0, a1, a2, a3])
    }

    /// Query whether this is the unspecified address.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 4]
    }

    /// The address as a host-order integer, for hashing.
    pub fn to_network_integer(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl Ipv6Address {
    /// The unspecified address, `::`.
    pub const UNSPECIFIED: Ipv6Address = Ipv6Address([0; 16]);

    /// Query whether this is the unspecified address.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 16]
    }

    /// Query whether the address lies in `::ffff:0:0/96`.
    pub fn is_ipv4_mapped(&self) -> bool {
        self.0[..10] == [0; 10] && self.0[10..12] == [0xff; 2]
    }

    /// Extract the IPv4 address of a v4-mapped address.
    pub fn to_ipv4(&self) -> Option<Ipv4Address> {
        if !self.is_ipv4_mapped() {
            return None;
        }
        let mut octets = [0; 4];
        octets.copy_from_slice(&self.0[12..]);
        Some(Ipv4Address(octets))
    }
}

impl IpAddress {
    /// Query whether the address is a wildcard.
    pub fn is_unspecified(&self) -> bool {
        match self {
            IpAddress::Unspecified => true,
            IpAddress::Ipv4(addr) => addr.is_unspecified(),
            IpAddress::Ipv6(addr) => addr.is_unspecified(),
        }
    }

    /// Whether a bound address admits traffic for a concrete one.
    ///
    /// A wildcard admits everything, otherwise the addresses must be equal. This is the matching
    /// rule used by bind conflict checks and listener scoring.
    pub fn accepts(&self, concrete: &IpAddress) -> bool {
        self.is_unspecified() || self == concrete
    }
}

impl AddressFamily {
    /// Classify a concrete address.
    ///
    /// Wildcards have no family of their own, they defer to the first concrete address.
    pub fn of(addr: &IpAddress) -> Option<AddressFamily> {
        match addr {
            IpAddress::Unspecified => None,
            IpAddress::Ipv4(_) => Some(AddressFamily::V4),
            IpAddress::Ipv6(addr) if addr.is_unspecified() => None,
            IpAddress::Ipv6(addr) if addr.is_ipv4_mapped() => Some(AddressFamily::V6Mapped),
            IpAddress::Ipv6(_) => Some(AddressFamily::V6Native),
        }
    }

    /// Whether an address is usable on a socket of this family.
    ///
    /// Wildcards are always permitted, concrete addresses must classify to the same family.
    pub fn permits(&self, addr: &IpAddress) -> bool {
        match AddressFamily::of(addr) {
            None => true,
            Some(family) => family == *self,
        }
    }
}

impl From<Ipv4Address> for IpAddress {
    fn from(addr: Ipv4Address) -> Self {
        IpAddress::Ipv4(addr)
    }
}

impl From<Ipv6Address> for IpAddress {
    fn from(addr: Ipv6Address) -> Self {
        IpAddress::Ipv6(addr)
    }
}

impl Default for IpAddress {
    fn default() -> Self {
        IpAddress::Unspecified
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Ipv4Address([a, b, c, d]) = self;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Uncompressed form, good enough for diagnostics.
        for (idx, chunk) in self.0.chunks(2).enumerate() {
            if idx != 0 {
                write!(f, ":")?;
            }
            write!(f, "{:x}", u16::from_be_bytes([chunk[0], chunk[1]]))?;
        }
        Ok(())
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpAddress::Unspecified => write!(f, "*"),
            IpAddress::Ipv4(addr) => addr.fmt(f),
            IpAddress::Ipv6(addr) => addr.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPPED: Ipv6Address = Ipv6Address([
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 192, 0, 2, 1,
    ]);

    #[test]
    fn mapped_classification() {
        assert!(MAPPED.is_ipv4_mapped());
        assert_eq!(MAPPED.to_ipv4(), Some(Ipv4Address::new(192, 0, 2, 1)));
        assert_eq!(
            AddressFamily::of(&IpAddress::Ipv6(MAPPED)),
            Some(AddressFamily::V6Mapped));

        let native = Ipv6Address([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert!(!native.is_ipv4_mapped());
        assert_eq!(
            AddressFamily::of(&IpAddress::Ipv6(native)),
            Some(AddressFamily::V6Native));
    }

    #[test]
    fn family_permits() {
        let v4 = IpAddress::Ipv4(Ipv4Address::new(192, 0, 2, 1));
        assert!(AddressFamily::V4.permits(&v4));
        assert!(!AddressFamily::V6Native.permits(&v4));
        assert!(AddressFamily::V6Native.permits(&IpAddress::Unspecified));
        assert!(!AddressFamily::V6Native.permits(&IpAddress::Ipv6(MAPPED)));
    }

    #[test]
    fn wildcard_match() {
        let concrete = IpAddress::Ipv4(Ipv4Address::new(10, 0, 0, 1));
        assert!(IpAddress::Unspecified.accepts(&concrete));
        assert!(concrete.accepts(&concrete));
        assert!(!concrete.accepts(&IpAddress::Ipv4(Ipv4Address::new(10, 0, 0, 2))));
    }
}
