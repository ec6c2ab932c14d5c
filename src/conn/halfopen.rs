//! The SYN backlog.
//!
//! A received SYN does not materialize a socket record. It creates a [`HalfOpen`] request
//! carrying only what promotion to a real connection needs: the identity tuple, both initial
//! sequence numbers and the negotiated options. The backlog is bounded twice, by its storage and
//! by the configured global ceiling, and new SYNs beyond either bound are dropped rather than
//! evicting older requests.
//!
//! [`HalfOpen`]: struct.HalfOpen.html
use crate::managed::{List, Slice};
use crate::time::Expiration;
use crate::wire::{Flags, InterfaceId, SeqNumber, TcpRepr};

use super::timers::{Timer, TimerLedger};
use super::{Config, FourTuple, SlotKey};

/// A connection request awaiting the final handshake ACK.
#[derive(Clone, Copy, Debug, Default)]
pub struct HalfOpen {
    /// The identity of the connection being opened.
    pub tuple: FourTuple,
    /// The listening socket the SYN arrived on.
    pub listener: SlotKey,
    /// The device the SYN arrived on.
    pub device: Option<InterfaceId>,
    /// The peer's initial sequence number.
    pub irs: SeqNumber,
    /// Our chosen initial sequence number.
    pub iss: SeqNumber,
    /// The maximum segment size the peer announced.
    pub peer_mss: Option<u16>,
    /// The window scale the peer announced, implying it accepts ours.
    pub peer_window_scale: Option<u8>,
    /// Whether both sides permit selective acknowledgements.
    pub sack_permitted: bool,
    /// The peer's most recent timestamp value, echoed in our replies.
    pub peer_timestamp: Option<u32>,
    /// SYN-ACK retransmissions so far.
    pub retries: u8,
    /// The SYN-ACK retransmission deadline.
    pub timer: Timer,
}

impl HalfOpen {
    /// The SYN-ACK answering this request.
    pub fn syn_ack(&self, config: &Config) -> TcpRepr {
        TcpRepr {
            flags: Flags::SYN,
            seq_number: self.iss,
            ack_number: Some(self.irs + 1),
            window_len: config.local_window,
            // Options are offered only when the peer offered them first.
            window_scale: self.peer_window_scale.and(config.window_scale),
            max_seg_size: Some(config.local_mss),
            sack_permitted: self.sack_permitted,
            timestamp: self.peer_timestamp.map(|value| (0, value)),
            payload_len: 0,
        }
    }
}

/// The queue of half-open requests across all listeners.
pub struct SynBacklog<'a> {
    requests: List<'a, HalfOpen>,
    ceiling: usize,
}

impl<'a> SynBacklog<'a> {
    /// Create the backlog over caller-provided storage.
    ///
    /// The effective ceiling is the smaller of `ceiling` and the storage capacity.
    pub fn new(requests: Slice<'a, HalfOpen>, ceiling: usize) -> Self {
        SynBacklog {
            requests: List::new(requests),
            ceiling,
        }
    }
}

impl SynBacklog<'_> {
    /// The number of outstanding requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the backlog holds no requests.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Whether a new SYN must be dropped.
    pub fn at_ceiling(&self) -> bool {
        self.requests.len() >= self.ceiling.min(self.requests.capacity())
    }

    /// Find the request for a tuple.
    pub fn position(&self, tuple: &FourTuple) -> Option<usize> {
        self.requests.iter().position(|request| request.tuple == *tuple)
    }

    /// Access a request by position.
    pub fn get(&self, idx: usize) -> Option<&HalfOpen> {
        self.requests.get(idx)
    }

    /// Access a request mutably by position.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut HalfOpen> {
        self.requests.get_mut(idx)
    }

    /// Admit a request, unless the ceiling or the storage forbids it.
    pub fn push(&mut self, request: HalfOpen) -> Option<&mut HalfOpen> {
        if self.at_ceiling() {
            return None;
        }
        let slot = self.requests.push()?;
        *slot = request;
        Some(slot)
    }

    /// Remove a request by position, returning it.
    ///
    /// The caller has cancelled the request's timer beforehand.
    pub fn remove_at(&mut self, idx: usize) -> Option<HalfOpen> {
        self.requests.remove_at(idx).map(|request| *request)
    }

    /// The number of requests belonging to one listener.
    pub fn count_for(&self, listener: SlotKey) -> usize {
        self.requests.iter()
            .filter(|request| request.listener == listener)
            .count()
    }

    /// Drop every request of a closing listener, cancelling their timers.
    pub fn purge_listener(&mut self, listener: SlotKey, ledger: &mut TimerLedger) {
        let mut idx = 0;
        while idx < self.requests.len() {
            if self.requests[idx].listener == listener {
                ledger.cancel(&mut self.requests[idx].timer);
                self.requests.remove_at(idx);
            } else {
                idx += 1;
            }
        }
    }

    /// Iterate mutably over all requests, for retransmission polling.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut HalfOpen> {
        self.requests.as_mut_slice().iter_mut()
    }

    /// The earliest retransmission deadline of any request.
    pub fn poll_at(&self) -> Expiration {
        self.requests.iter()
            .map(|request| request.timer.poll_at())
            .fold(Expiration::Never, Expiration::min)
    }
}
