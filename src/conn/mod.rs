//! The connection identification, lifecycle and handshake engine.
//!
//! Relevant material for reading:
//! Main TCP rfc (skip if confident): https://tools.ietf.org/html/rfc793
//! Errata and comments: https://tools.ietf.org/html/rfc1122#section-4.2
//!     Notably still assuming some good-faith on hosts
//! Attack avoidance: https://tools.ietf.org/html/rfc5961
//! Defending against sequence number attacks: https://tools.ietf.org/html/rfc6528
//! RST handling specifically: https://www.snellman.net/blog/archive/2016-02-01-tcp-rst/
//!     OS comparison in particular
//!
//! The [`Endpoint`] owns every table: bind-port ownership, the tuple-keyed connection table, the
//! SYN backlog of half-open requests and the time-wait list. Packet ingress, timer expiry and
//! ICMP feedback all enter through `&mut` methods on it, so the embedding serializes them with
//! whatever exclusion it already has around the endpoint.
//!
//! [`Endpoint`]: struct.Endpoint.html
use core::fmt;

use crate::time::Duration;
use crate::wire::{InterfaceId, IpAddress, TcpRepr};

mod bind;
mod endpoint;
mod halfopen;
mod isn;
mod socket;
mod table;
mod timers;
mod timewait;

pub use self::bind::{BindRequest, BindTable, PortBucket, PortOwner};
pub use self::endpoint::{Endpoint, Storage};
pub use self::halfopen::{HalfOpen, SynBacklog};
pub use self::isn::IsnGenerator;
pub use self::socket::{Outcome, Socket, State, Step};
pub use self::table::{ConnectionTable, ListenEntry, TableSlot};
pub use self::timers::{Timer, TimerLedger};
pub use self::timewait::TimeWait;

/// The result type of connection operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The error type of connection operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The operation was not permitted.
    ///
    /// Returned when a socket is in the wrong state for an operation, or an address does not
    /// agree with the socket's fixed address family.
    Illegal,

    /// The requested local address and port are owned by a conflicting socket.
    AddressInUse,

    /// The action could not be completed because there were not enough resources.
    ///
    /// All storage is handed in at construction, so this is the signal that a table or the
    /// ephemeral port range is at capacity. It would have been legal with more resources.
    Exhausted,

    /// Unable to find a route towards the destination address.
    Unreachable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Illegal => write!(f, "illegal operation"),
            Error::AddressInUse => write!(f, "address in use"),
            Error::Exhausted => write!(f, "resources exhausted"),
            Error::Unreachable => write!(f, "no route to host"),
        }
    }
}

/// A malformed option block makes the whole segment unusable.
impl From<crate::wire::Error> for Error {
    fn from(_: crate::wire::Error) -> Self {
        Error::Illegal
    }
}

/// The identity of a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourTuple {
    /// Our address.
    pub local: IpAddress,
    /// The peer's address.
    pub remote: IpAddress,
    /// Our port.
    pub local_port: u16,
    /// The peer's port.
    pub remote_port: u16,
}

impl FourTuple {
    /// The tuple from the peer's point of view, as recovered from an embedded ICMP segment.
    pub fn flipped(self) -> FourTuple {
        FourTuple {
            local: self.remote,
            remote: self.local,
            local_port: self.remote_port,
            remote_port: self.local_port,
        }
    }
}

/// The index of a socket within its endpoint.
///
/// Useful for storing in other structs to reference the connection at another point in time. Note
/// that the index will be invalidated when the connection itself is closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub(crate) key: crate::managed::Key,
}

/// A fully-described segment crossing the boundary to the network collaborator.
///
/// Inbound, the embedding builds the representation from the parsed header via
/// [`TcpRepr::parse`]; outbound, the collaborator frames and checksums it.
///
/// [`TcpRepr::parse`]: ../wire/tcp/struct.Repr.html#method.parse
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Who is talking to whom. Outbound, `local` is the source.
    pub tuple: FourTuple,
    /// The header fields.
    pub repr: TcpRepr,
}

/// A resolved route towards a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    /// The device the peer is reachable through.
    pub device: InterfaceId,
    /// The path MTU estimate towards the peer.
    pub path_mtu: u32,
    /// The source address elected for the route.
    ///
    /// Consulted when a connecting socket has no concrete local address of its own. Echo the
    /// `local` hint back here when one was given.
    pub local: IpAddress,
}

/// The network-layer collaborator that frames and sends segments.
///
/// Transmission is fire and forget. An error return is advisory, the engine treats every segment
/// as potentially lost anyway and relies on retransmission.
pub trait Transmit {
    /// Hand a fully-described segment to the network layer.
    fn transmit(&mut self, segment: &Segment) -> Result<()>;
}

/// The routing collaborator.
pub trait Router {
    /// Resolve the device and path MTU towards a remote address.
    fn resolve_route(&mut self, local: Option<IpAddress>, remote: IpAddress) -> Result<Route>;
}

/// The classes of network-layer error feedback the engine reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcmpKind {
    /// Fragmentation needed but forbidden. Soft, updates the path MTU estimate.
    PacketTooBig,
    /// The peer or network rejected the segment.
    DestinationUnreachable,
    /// A hop limit expired on the way.
    TimeExceeded,
}

/// Tunable behavior of an endpoint.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Ceiling on half-open requests across all listeners.
    ///
    /// New SYNs beyond it are silently dropped, existing requests are never evicted.
    pub max_half_open: usize,

    /// How often a handshake segment is retransmitted before giving up.
    pub handshake_retries: u8,

    /// The retransmission timeout for the first handshake attempt, doubled per retry.
    pub retransmit_timeout: Duration,

    /// How long a closed tuple lingers in time-wait.
    pub time_wait_timeout: Duration,

    /// The maximum segment size announced in our SYN and SYN-ACK segments.
    pub local_mss: u16,

    /// The receive window announced during the handshake.
    pub local_window: u16,

    /// The window scale shift announced during the handshake, if any.
    pub window_scale: Option<u8>,

    /// Whether to offer selective acknowledgements.
    pub sack_permitted: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_half_open: 256,
            handshake_retries: 5,
            retransmit_timeout: Duration::from_secs(1),
            time_wait_timeout: Duration::from_secs(60),
            local_mss: 1460,
            local_window: 8192,
            window_scale: Some(7),
            sack_permitted: true,
        }
    }
}

/// A handshake outcome surfaced to the embedding.
///
/// Returned from segment ingress and reported through the sink passed to
/// [`Endpoint::poll`](struct.Endpoint.html#method.poll).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Nothing of note happened.
    None,

    /// An active connect completed its handshake.
    Established(SlotKey),

    /// A listener promoted a half-open request into a new connection.
    Accepted {
        /// The listening socket the SYN originally arrived on.
        listener: SlotKey,
        /// The freshly created established socket.
        connection: SlotKey,
    },

    /// The peer answered our connection attempt with a reset. The socket is gone.
    Refused(SlotKey),

    /// A handshake or close ran out of retries. The socket is gone.
    TimedOut(SlotKey),

    /// The connection finished closing, orderly or by reset. The socket is gone.
    Closed(SlotKey),
}

/// Diagnostic counters of an endpoint.
///
/// A stand-in for a metrics layer: cheap to maintain, readable by the embedding, and precise
/// enough to verify load-shedding behavior in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct Counters {
    /// SYNs dropped because the half-open ceiling was reached.
    pub dropped_syns: u64,
    /// Segments and ICMP notifications discarded by a sequence sanity check.
    pub spoof_discards: u64,
    /// Established lookups answered by the one-entry cache.
    pub cache_hits: u64,
    /// Resets sent in answer to stray segments.
    pub stray_resets: u64,
}
