//! A standalone TCP connection management core.
//!
//! This crate contains the connection identification, lifecycle and handshake engine of a TCP
//! implementation: the socket lookup tables, bind-port ownership, the SYN backlog of half-open
//! connections, the handshake state machine, retransmission and timeout scheduling, and the
//! mapping of asynchronous ICMP error feedback onto socket state. It deliberately does *not*
//! contain byte-stream buffering, congestion control arithmetic, checksum computation, routing or
//! any device access. Those are collaborators behind small traits, see [`Transmit`] and
//! [`Router`].
//!
//! ## Design
//!
//! Nothing within `tcpcore` *ever* dynamically allocates memory. Setup code passes preallocated
//! storage in explicitly — see the [`managed`](managed/index.html) module — so that the resource
//! bounds of an endpoint (sockets, half-open requests, time-wait records) are fixed and visible
//! upfront. This keeps per-connection memory bounded even under a SYN flood: a half-open request
//! never materializes a full socket record until the handshake completes.
//!
//! Mutual exclusion is expressed through ownership. Every mutating entry point takes `&mut
//! Endpoint`, so packet ingress, timer expiry and error feedback are serialized by whatever lock
//! (or single-threaded executor shard) the embedding wraps around the endpoint. There is no
//! hidden global state, no interior mutability and no blocking call anywhere in the crate.
//!
//! Time is explicit as well. Callers pass the current [`Instant`](time/struct.Instant.html) into
//! every time-dependent operation and drive expiry by calling
//! [`Endpoint::poll`](conn/struct.Endpoint.html#method.poll); the endpoint answers with the next
//! deadline through `next_poll_at`. No timers run behind the caller's back.
//!
//! [`Transmit`]: conn/trait.Transmit.html
//! [`Router`]: conn/trait.Router.html
#![warn(missing_docs)]
#![warn(unreachable_pub)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

#[macro_use] mod macros;
pub mod conn;
pub mod hash;
pub mod managed;
pub mod time;
pub mod wire;

pub use conn::{Endpoint, Error, Event, Router, Segment, Transmit};
