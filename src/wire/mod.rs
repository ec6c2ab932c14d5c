//! Wire-level vocabulary of the connection core.
//!
//! The crate does not parse whole packets. Checksumming and header framing belong to the network
//! layer collaborator, which hands over the already-extracted TCP header fields. What remains
//! here is the vocabulary those fields are expressed in (addresses, sequence numbers, flags) and
//! the codec for the TCP option block, which the handshake engine has to interpret itself.
mod ip;
pub mod tcp;

pub use self::ip::{AddressFamily, InterfaceId, IpAddress, Ipv4Address, Ipv6Address};
pub use self::tcp::{Flags, Repr as TcpRepr, SeqNumber, TcpOption};

use core::fmt;

/// The error type for parsing of header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An option block ended before the length its fields claimed.
    Truncated,

    /// An option was recognized but self-contradictory.
    ///
    /// Example: a maximum-segment-size option whose length byte is not 4.
    Malformed,
}

/// The result type for wire parsing.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated => write!(f, "truncated options"),
            Error::Malformed => write!(f, "malformed options"),
        }
    }
}
