//! The per-connection record and its state machine.
//!
//! A [`Socket`] holds identity, sequence bookkeeping and the handshake/teardown state. The
//! transition logic is a pure function from the socket state and an inbound segment to an
//! [`Outcome`]: an optional answer segment plus a step the endpoint translates into table
//! updates, timer changes and events. Keeping the tables out of here makes every transition
//! testable in isolation.
//!
//! [`Socket`]: struct.Socket.html
//! [`Outcome`]: struct.Outcome.html
use crate::wire::{AddressFamily, Flags, InterfaceId, SeqNumber, TcpRepr};

use super::timers::Timer;
use super::{Config, FourTuple, IcmpKind};

/// The lifecycle states of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Marker state for an unintended/uninitialized connection state.
    Closed,

    /// A listening connection.
    ///
    /// Akin to an open server socket. Inbound SYNs are tracked as half-open requests, not here.
    Listen,

    /// An open connection request.
    SynSent,

    /// Connection request we intend to answer, waiting on ack.
    ///
    /// Only reached through a simultaneous open; the passive path keeps requests half-open until
    /// promotion.
    SynReceived,

    /// An open connection.
    Established,

    /// Closed our side of the connection.
    FinWait1,

    /// Closing connection nicely, initiated by us and acknowledged.
    FinWait2,

    /// Closed both sides but we don't know the other knows.
    Closing,

    /// Other side closed its connection.
    CloseWait,

    /// Connection closed after other side closed its already.
    LastAck,
}

impl Default for State {
    fn default() -> Self {
        State::Closed
    }
}

/// The principal per-connection entity.
#[derive(Clone, Copy, Debug, Default)]
pub struct Socket {
    /// The identity of the connection. Partially wildcarded until connected.
    pub tuple: FourTuple,

    /// The address family, fixed by the first concrete address the socket sees.
    pub family: Option<AddressFamily>,

    /// The lifecycle state.
    pub state: State,

    /// The device the socket was explicitly bound to.
    pub device: Option<InterfaceId>,

    /// Whether the socket permits address reuse.
    pub reuse: bool,

    /// Whether the socket owns an entry in the bind table.
    pub bound: bool,

    /// Accepted-but-unclaimed limit of a listener.
    pub listen_backlog: usize,

    /// Our initial sequence number.
    pub iss: SeqNumber,
    /// The peer's initial sequence number.
    pub irs: SeqNumber,
    /// The oldest unacknowledged sequence number we sent.
    pub snd_una: SeqNumber,
    /// The next sequence number we will send.
    pub snd_nxt: SeqNumber,
    /// The next sequence number we expect to receive.
    pub rcv_nxt: SeqNumber,

    /// The maximum segment size the peer announced.
    pub peer_mss: Option<u16>,
    /// The window scale the peer announced.
    pub peer_window_scale: Option<u8>,
    /// Whether both sides permit selective acknowledgements.
    pub sack_permitted: bool,
    /// The peer's most recent timestamp value, echoed in our segments.
    pub peer_timestamp: Option<u32>,

    /// The path MTU estimate towards the peer, zero until a route was resolved.
    pub path_mtu: u32,

    /// The last soft error recorded from network feedback, surfaced on demand.
    pub soft_error: Option<IcmpKind>,

    /// Handshake or teardown retransmissions so far.
    pub retries: u8,

    /// The retransmission deadline.
    pub timer: Timer,
}

/// What an inbound segment did to a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// A segment to answer with, if any.
    pub reply: Option<TcpRepr>,
    /// The bookkeeping step the endpoint has to take.
    pub step: Step,
}

/// The table-and-event consequences of a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// State may have advanced, the record stays as it is.
    None,

    /// The handshake completed, the retransmission timer can be disarmed.
    Established,

    /// The orderly close completed on both sides, replace the record with time-wait.
    EnterTimeWait,

    /// The peer refused the connection attempt, destroy the record.
    Refused,

    /// The connection was torn down by a reset, destroy the record.
    Reset,

    /// The passive close completed, destroy the record without time-wait.
    Finished,

    /// The segment was dropped without touching any state.
    Discard {
        /// Whether the drop was due to a failed sequence sanity check.
        spoof: bool,
    },
}

impl Default for Step {
    fn default() -> Self {
        Step::None
    }
}

impl Outcome {
    fn step(step: Step) -> Self {
        Outcome { reply: None, step }
    }

    fn reply(repr: TcpRepr) -> Self {
        Outcome { reply: Some(repr), step: Step::None }
    }

    fn discard() -> Self {
        Outcome::step(Step::Discard { spoof: false })
    }

    fn spoof() -> Self {
        Outcome::step(Step::Discard { spoof: true })
    }
}

impl Socket {
    /// Whether the state is part of the handshake, where network errors are hard.
    pub fn in_handshake(&self) -> bool {
        match self.state {
            State::SynSent | State::SynReceived => true,
            _ => false,
        }
    }

    /// Whether a reported sequence number belongs to data we sent and still track.
    ///
    /// The sanity check applied to ICMP feedback: the offending sequence must lie within
    /// `[snd_una, snd_nxt)`.
    pub fn in_send_window(&self, seq: SeqNumber) -> bool {
        self.snd_una <= seq && seq < self.snd_nxt
    }

    /// Record the option block of the peer's SYN.
    fn absorb_options(&mut self, repr: &TcpRepr) {
        self.peer_mss = repr.max_seg_size;
        self.peer_window_scale = repr.window_scale;
        self.sack_permitted = self.sack_permitted && repr.sack_permitted;
        self.peer_timestamp = repr.timestamp.map(|(value, _)| value);
    }

    /// The SYN opening an active connect.
    pub fn syn(&self, config: &Config) -> TcpRepr {
        TcpRepr {
            flags: Flags::SYN,
            seq_number: self.iss,
            ack_number: None,
            window_len: config.local_window,
            window_scale: config.window_scale,
            max_seg_size: Some(config.local_mss),
            sack_permitted: config.sack_permitted,
            timestamp: None,
            payload_len: 0,
        }
    }

    /// The SYN-ACK of a simultaneous open.
    fn syn_ack(&self, config: &Config) -> TcpRepr {
        TcpRepr {
            flags: Flags::SYN,
            seq_number: self.iss,
            ack_number: Some(self.rcv_nxt),
            window_len: config.local_window,
            window_scale: self.peer_window_scale.and(config.window_scale),
            max_seg_size: Some(config.local_mss),
            sack_permitted: self.sack_permitted,
            timestamp: self.peer_timestamp.map(|value| (0, value)),
            payload_len: 0,
        }
    }

    /// A bare ACK restating our current position.
    pub fn ack_reply(&self) -> TcpRepr {
        TcpRepr {
            seq_number: self.snd_nxt,
            ack_number: Some(self.rcv_nxt),
            ..TcpRepr::default()
        }
    }

    /// Begin an orderly close, emitting our FIN.
    ///
    /// Returns `None` when the state has no close transition (the endpoint handles listeners and
    /// unconnected sockets separately).
    pub fn begin_close(&mut self) -> Option<TcpRepr> {
        match self.state {
            State::SynReceived | State::Established => self.state = State::FinWait1,
            State::CloseWait => self.state = State::LastAck,
            _ => return None,
        }

        let mut flags = Flags::default();
        flags.set_fin(true);
        let repr = TcpRepr {
            flags,
            seq_number: self.snd_nxt,
            ack_number: Some(self.rcv_nxt),
            ..TcpRepr::default()
        };
        // The FIN occupies one unit of sequence space.
        self.snd_nxt = self.snd_nxt + 1;
        Some(repr)
    }

    /// The RST tearing the connection down on `abort`.
    ///
    /// Only synchronized states answer stray peers; the endpoint skips transmission otherwise.
    pub fn reset_repr(&self) -> TcpRepr {
        let mut flags = Flags::default();
        flags.set_rst(true);
        TcpRepr {
            flags,
            seq_number: self.snd_nxt,
            ack_number: Some(self.rcv_nxt),
            ..TcpRepr::default()
        }
    }

    /// The control segment to re-send when the retransmission timer fires or the path MTU
    /// changed: whatever of ours is still unacknowledged in the current state.
    pub fn retransmit_repr(&self, config: &Config) -> Option<TcpRepr> {
        match self.state {
            State::SynSent => Some(self.syn(config)),
            State::SynReceived => Some(self.syn_ack(config)),
            State::FinWait1 | State::Closing | State::LastAck => {
                let mut flags = Flags::default();
                flags.set_fin(true);
                Some(TcpRepr {
                    flags,
                    seq_number: self.snd_nxt - 1,
                    ack_number: Some(self.rcv_nxt),
                    ..TcpRepr::default()
                })
            }
            _ => None,
        }
    }

    /// Drive the state machine with an inbound segment.
    ///
    /// Covers the synchronized and handshake states of a connected socket. `Closed` and `Listen`
    /// never reach here, the endpoint answers those from the table lookup itself.
    pub fn on_segment(&mut self, repr: &TcpRepr, config: &Config) -> Outcome {
        match self.state {
            State::SynSent => self.on_syn_sent(repr, config),
            State::SynReceived => self.on_syn_received(repr, config),
            State::Established
            | State::CloseWait
            | State::FinWait1
            | State::FinWait2
            | State::Closing
            | State::LastAck => self.on_synchronized(repr, config),
            State::Closed | State::Listen => Outcome::discard(),
        }
    }

    fn on_syn_sent(&mut self, repr: &TcpRepr, config: &Config) -> Outcome {
        // An ACK that does not cover our SYN acks some earlier incarnation.
        if let Some(ack) = repr.ack_number {
            if ack != self.iss + 1 {
                if repr.flags.rst() {
                    return Outcome::spoof();
                }
                let mut flags = Flags::default();
                flags.set_rst(true);
                return Outcome::reply(TcpRepr {
                    flags,
                    seq_number: ack,
                    ack_number: None,
                    ..TcpRepr::default()
                });
            }
        }

        if repr.flags.rst() {
            // Only a reset that acks our SYN refuses the connection.
            return match repr.ack_number {
                Some(_) => Outcome::step(Step::Refused),
                None => Outcome::spoof(),
            };
        }

        if !repr.flags.syn() {
            return Outcome::discard();
        }

        self.irs = repr.seq_number;
        self.rcv_nxt = repr.seq_number + 1;
        self.absorb_options(repr);

        match repr.ack_number {
            Some(ack) => {
                // The SYN-ACK we were waiting for.
                self.snd_una = ack;
                self.state = State::Established;
                Outcome {
                    reply: Some(self.ack_reply()),
                    step: Step::Established,
                }
            }
            None => {
                // A SYN crossing ours in flight, the simultaneous open.
                self.state = State::SynReceived;
                Outcome::reply(self.syn_ack(config))
            }
        }
    }

    fn on_syn_received(&mut self, repr: &TcpRepr, config: &Config) -> Outcome {
        if repr.flags.rst() {
            if repr.seq_number == self.rcv_nxt {
                return Outcome::step(Step::Refused);
            }
            return Outcome::spoof();
        }

        if repr.flags.syn() && repr.seq_number == self.irs {
            // Our SYN-ACK got lost, restate it.
            return Outcome::reply(self.syn_ack(config));
        }

        match repr.ack_number {
            Some(ack) if ack == self.iss + 1 => {
                self.snd_una = ack;
                self.state = State::Established;
                Outcome::step(Step::Established)
            }
            _ => Outcome::discard(),
        }
    }

    fn on_synchronized(&mut self, repr: &TcpRepr, config: &Config) -> Outcome {
        if repr.flags.syn() {
            // A SYN on a live connection is never grounds for teardown, spoofed SYNs would
            // otherwise kill arbitrary connections.
            net_debug!("dropping in-window SYN for synchronized connection");
            return Outcome::spoof();
        }

        if repr.flags.rst() {
            // rfc5961: only an exact sequence match resets, an in-window reset earns a
            // challenge ACK, everything else is discarded.
            return if repr.seq_number == self.rcv_nxt {
                Outcome::step(Step::Reset)
            } else if repr.seq_number.in_window(self.rcv_nxt, usize::from(config.local_window)) {
                Outcome::reply(self.ack_reply())
            } else {
                Outcome::spoof()
            };
        }

        if let Some(ts) = repr.timestamp {
            self.peer_timestamp = Some(ts.0);
        }

        let fin_acked = match repr.ack_number {
            Some(ack) => {
                if !(self.snd_una <= ack && ack <= self.snd_nxt) {
                    return Outcome::spoof();
                }
                self.snd_una = ack;
                ack == self.snd_nxt
            }
            None => false,
        };

        // Out-of-order segments are the data-transfer layer's problem; the lifecycle engine
        // only advances on the expected sequence number.
        let fin_here = repr.flags.fin() && repr.seq_number == self.rcv_nxt;
        if fin_here {
            self.rcv_nxt = self.rcv_nxt + repr.sequence_len();
        }

        match self.state {
            State::Established => {
                if fin_here {
                    self.state = State::CloseWait;
                    return Outcome::reply(self.ack_reply());
                }
                Outcome::step(Step::None)
            }
            State::CloseWait => Outcome::step(Step::None),
            State::FinWait1 => {
                match (fin_acked, fin_here) {
                    (true, true) => Outcome {
                        reply: Some(self.ack_reply()),
                        step: Step::EnterTimeWait,
                    },
                    (true, false) => {
                        self.state = State::FinWait2;
                        Outcome::step(Step::None)
                    }
                    (false, true) => {
                        // Both sides closed at once.
                        self.state = State::Closing;
                        Outcome::reply(self.ack_reply())
                    }
                    (false, false) => Outcome::step(Step::None),
                }
            }
            State::FinWait2 => {
                if fin_here {
                    return Outcome {
                        reply: Some(self.ack_reply()),
                        step: Step::EnterTimeWait,
                    };
                }
                Outcome::step(Step::None)
            }
            State::Closing => {
                if fin_acked {
                    return Outcome::step(Step::EnterTimeWait);
                }
                Outcome::step(Step::None)
            }
            State::LastAck => {
                if fin_acked {
                    return Outcome::step(Step::Finished);
                }
                Outcome::step(Step::None)
            }
            _ => unreachable!("dispatched from synchronized states only"),
        }
    }
}
