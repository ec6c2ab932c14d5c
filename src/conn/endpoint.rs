//! The endpoint, owner of every table.
//!
//! All mutation enters through `&mut` methods: segment ingress, ICMP feedback, timer polling and
//! the user-facing lifecycle calls. The endpoint never allocates, it distributes the storage
//! handed to it at construction among the bind table, the connection table, the SYN backlog, the
//! socket arena and the time-wait list.
//!
//! Ingress dispatch order is fixed. A connected tuple wins (socket or time-wait record), then a
//! matching half-open request, then listener selection for a pure SYN, and whatever remains is a
//! stray segment answered with a reset.
use crate::hash::HashState;
use crate::managed::{Bucket, Slice, Slot, SlotMap};
use crate::time::{Expiration, Instant};
use crate::wire::{AddressFamily, Flags, InterfaceId, IpAddress, SeqNumber, TcpRepr};

use super::bind::{BindRequest, BindTable, PortBucket, PortOwner};
use super::halfopen::{HalfOpen, SynBacklog};
use super::isn::IsnGenerator;
use super::socket::{Socket, State, Step};
use super::table::{ConnectionTable, ListenEntry, TableSlot};
use super::timers::{Timer, TimerLedger};
use super::timewait::TimeWait;
use super::{Config, Counters, Error, Event, FourTuple, IcmpKind, Result, Router, Segment, SlotKey, Transmit};

/// The memory an endpoint lives in.
///
/// Capacities are independent: the tuple-map storage should exceed the socket and time-wait
/// storage combined, with slack for the open addressing to stay fast.
pub struct Storage<'a> {
    /// Socket records.
    pub sockets: Slice<'a, Socket>,
    /// Slot bookkeeping for the socket arena.
    pub socket_slots: Slice<'a, Slot>,
    /// Individual port ownership entries.
    pub port_owners: Slice<'a, PortOwner>,
    /// Per-port bind bookkeeping.
    pub port_buckets: Slice<'a, PortBucket>,
    /// Buckets of the tuple-keyed connection map.
    pub tuples: Slice<'a, Bucket<FourTuple, TableSlot>>,
    /// Listener registrations.
    pub listeners: Slice<'a, ListenEntry>,
    /// Half-open connection requests.
    pub half_open: Slice<'a, HalfOpen>,
    /// Time-wait records.
    pub time_wait: Slice<'a, TimeWait>,
    /// Slot bookkeeping for the time-wait arena.
    pub time_wait_slots: Slice<'a, Slot>,
}

#[cfg(feature = "std")]
impl Storage<'static> {
    /// Heap-allocate storage for the given number of records.
    pub fn with_capacity(sockets: usize, half_open: usize, time_wait: usize) -> Self {
        Storage {
            sockets: Slice::Owned(vec![Socket::default(); sockets]),
            socket_slots: Slice::Owned(vec![Slot::default(); sockets]),
            port_owners: Slice::Owned(vec![PortOwner::default(); sockets]),
            port_buckets: Slice::Owned(vec![PortBucket::default(); sockets]),
            tuples: Slice::Owned(vec![Bucket::Empty; 2 * (sockets + time_wait) + 1]),
            listeners: Slice::Owned(vec![ListenEntry::default(); sockets]),
            half_open: Slice::Owned(vec![HalfOpen::default(); half_open]),
            time_wait: Slice::Owned(vec![TimeWait::default(); time_wait]),
            time_wait_slots: Slice::Owned(vec![Slot::default(); time_wait]),
        }
    }
}

/// The connection engine.
pub struct Endpoint<'a> {
    config: Config,
    isn: IsnGenerator,
    hash: HashState,
    sockets: SlotMap<'a, Socket>,
    binds: BindTable<'a>,
    table: ConnectionTable<'a>,
    backlog: SynBacklog<'a>,
    time_wait: SlotMap<'a, TimeWait>,
    ledger: TimerLedger,
    counters: Counters,
}

/// Frame and send, logging instead of failing.
///
/// Every segment is potentially lost on the wire anyway, a transmit error is no different from
/// the retransmission machinery's point of view.
fn send<T: Transmit>(tx: &mut T, tuple: FourTuple, repr: TcpRepr) {
    if let Err(err) = tx.transmit(&Segment { tuple, repr }) {
        net_debug!("transmit failed: {}", err);
    }
}

impl<'a> Endpoint<'a> {
    /// Create an endpoint over caller-provided storage.
    ///
    /// The secret keys both the initial sequence number generator and the tuple map. It must be
    /// unpredictable to off-path attackers, see rfc6528.
    pub fn new(storage: Storage<'a>, config: Config, secret: HashState) -> Self {
        Endpoint {
            isn: IsnGenerator::new(secret),
            hash: secret,
            sockets: SlotMap::new(storage.sockets, storage.socket_slots),
            binds: BindTable::new(storage.port_owners, storage.port_buckets),
            table: ConnectionTable::new(storage.tuples, storage.listeners, secret),
            backlog: SynBacklog::new(storage.half_open, config.max_half_open),
            time_wait: SlotMap::new(storage.time_wait, storage.time_wait_slots),
            ledger: TimerLedger::default(),
            counters: Counters::default(),
            config,
        }
    }
}

impl Endpoint<'_> {
    /// Create an unbound, unconnected socket record.
    pub fn open(&mut self) -> Result<SlotKey> {
        let (key, socket) = self.sockets.reserve().ok_or(Error::Exhausted)?;
        *socket = Socket::default();
        Ok(SlotKey { key })
    }

    /// Bind a socket to a local address and port.
    ///
    /// The address may be a wildcard but the port must be concrete; connecting an unbound socket
    /// selects an ephemeral port instead. The first concrete address fixes the socket's address
    /// family.
    pub fn bind(
        &mut self,
        sock: SlotKey,
        addr: IpAddress,
        port: u16,
        device: Option<InterfaceId>,
        reuse: bool,
    ) -> Result<()> {
        if port == 0 {
            return Err(Error::Illegal);
        }

        let socket = self.sockets.get_mut(sock.key).ok_or(Error::Illegal)?;
        if socket.state != State::Closed || socket.bound {
            return Err(Error::Illegal);
        }
        match socket.family {
            Some(fixed) if !fixed.permits(&addr) => return Err(Error::Illegal),
            Some(_) => (),
            None => socket.family = AddressFamily::of(&addr),
        }

        let request = BindRequest { addr, port, device, reuse, listener: false };
        self.binds.reserve(sock, &request)?;

        socket.tuple.local = addr;
        socket.tuple.local_port = port;
        socket.device = device;
        socket.reuse = reuse;
        socket.bound = true;
        Ok(())
    }

    /// Turn a bound socket into a listener.
    ///
    /// `backlog` bounds the half-open requests attributable to this listener, on top of the
    /// global ceiling in [`Config`](struct.Config.html).
    pub fn listen(&mut self, sock: SlotKey, backlog: usize) -> Result<()> {
        let socket = self.sockets.get_mut(sock.key).ok_or(Error::Illegal)?;
        if socket.state != State::Closed || !socket.bound {
            return Err(Error::Illegal);
        }

        let (addr, port, device) = (socket.tuple.local, socket.tuple.local_port, socket.device);
        self.table.insert_listener(sock, port, addr, device)?;
        self.binds.mark_listening(sock, port);

        socket.state = State::Listen;
        socket.listen_backlog = backlog;
        Ok(())
    }

    /// Start an active connect, sending the opening SYN.
    ///
    /// An unbound socket gets an ephemeral port. Completion or refusal is reported as an
    /// [`Event`](enum.Event.html) from segment ingress or `poll`.
    pub fn connect<T: Transmit, R: Router>(
        &mut self,
        tx: &mut T,
        router: &mut R,
        now: Instant,
        sock: SlotKey,
        remote: IpAddress,
        remote_port: u16,
    ) -> Result<()> {
        if remote_port == 0 || remote.is_unspecified() {
            return Err(Error::Illegal);
        }
        let remote_family = AddressFamily::of(&remote).ok_or(Error::Illegal)?;

        let (state, bound, local, bound_port, family, device) = match self.sockets.get(sock.key) {
            Some(socket) => (
                socket.state,
                socket.bound,
                socket.tuple.local,
                socket.tuple.local_port,
                socket.family,
                socket.device,
            ),
            None => return Err(Error::Illegal),
        };
        if state != State::Closed {
            return Err(Error::Illegal);
        }
        if let Some(fixed) = family {
            if !fixed.permits(&remote) {
                return Err(Error::Illegal);
            }
        }

        let route = router.resolve_route(
            if local.is_unspecified() { None } else { Some(local) },
            remote)?;

        // Inbound dispatch keys on the wire packet's concrete destination address, a wildcard
        // local could never match the peer's replies. The route elects the source instead.
        let local = if local.is_unspecified() {
            if route.local.is_unspecified() || !remote_family.permits(&route.local) {
                return Err(Error::Unreachable);
            }
            route.local
        } else {
            local
        };

        let fresh_port = !bound;
        let local_port = if bound {
            bound_port
        } else {
            self.ephemeral_port(sock, local, device, remote, remote_port)?
        };

        let tuple = FourTuple { local, remote, local_port, remote_port };
        if let Err(err) = self.table.insert(tuple, TableSlot::Socket(sock)) {
            if fresh_port {
                self.binds.release(sock, local_port);
            }
            // An occupied tuple means some socket or time-wait record already talks to this
            // exact peer from here.
            return Err(match err {
                Error::Illegal => Error::AddressInUse,
                other => other,
            });
        }

        let iss = self.isn.isn(&tuple, now);
        let syn = match self.sockets.get_mut(sock.key) {
            Some(socket) => {
                socket.tuple = tuple;
                socket.family = Some(remote_family);
                socket.state = State::SynSent;
                socket.bound = true;
                socket.iss = iss;
                socket.snd_una = iss;
                socket.snd_nxt = iss + 1;
                socket.sack_permitted = self.config.sack_permitted;
                socket.path_mtu = route.path_mtu;
                socket.retries = 0;
                self.ledger.arm(&mut socket.timer, now + self.config.retransmit_timeout);
                socket.syn(&self.config)
            }
            None => return Err(Error::Illegal),
        };

        send(tx, tuple, syn);
        Ok(())
    }

    /// Begin an orderly close, or destroy an unconnected socket outright.
    ///
    /// Synchronized states send a FIN and continue through the teardown handshake; `Closed`,
    /// `Listen` and `SynSent` sockets have nothing to tear down and are released immediately,
    /// half-open requests of a closing listener included.
    pub fn close<T: Transmit>(&mut self, tx: &mut T, now: Instant, sock: SlotKey) -> Result<()> {
        let state = self.sockets.get(sock.key)
            .map(|socket| socket.state)
            .ok_or(Error::Illegal)?;

        match state {
            State::Closed | State::Listen | State::SynSent => {
                self.destroy_socket(sock, true);
                Ok(())
            }
            State::SynReceived | State::Established | State::CloseWait => {
                let (tuple, fin) = match self.sockets.get_mut(sock.key) {
                    Some(socket) => {
                        let fin = socket.begin_close().ok_or(Error::Illegal)?;
                        socket.retries = 0;
                        self.ledger.arm(&mut socket.timer, now + self.config.retransmit_timeout);
                        (socket.tuple, fin)
                    }
                    None => return Err(Error::Illegal),
                };
                send(tx, tuple, fin);
                Ok(())
            }
            // Already closing.
            _ => Err(Error::Illegal),
        }
    }

    /// Tear a connection down immediately.
    ///
    /// Synchronized peers are told with a RST, everything local is released either way and no
    /// time-wait record is left behind.
    pub fn abort<T: Transmit>(&mut self, tx: &mut T, sock: SlotKey) -> Result<()> {
        let (state, tuple, reset) = match self.sockets.get(sock.key) {
            Some(socket) => (socket.state, socket.tuple, socket.reset_repr()),
            None => return Err(Error::Illegal),
        };

        let synchronized = match state {
            State::SynReceived
            | State::Established
            | State::FinWait1
            | State::FinWait2
            | State::Closing
            | State::CloseWait
            | State::LastAck => true,
            _ => false,
        };
        if synchronized {
            send(tx, tuple, reset);
        }

        self.destroy_socket(sock, true);
        Ok(())
    }

    /// Process an inbound segment.
    ///
    /// `segment.tuple` is from our perspective, `local` being the destination of the wire packet.
    /// `device` is the interface the packet arrived on, consulted for listener selection.
    pub fn on_segment_received<T: Transmit>(
        &mut self,
        tx: &mut T,
        now: Instant,
        segment: &Segment,
        device: InterfaceId,
    ) -> Result<Event> {
        if let Some(slot) = self.table.lookup(&segment.tuple) {
            return match slot {
                TableSlot::Socket(sock) => self.segment_for_socket(tx, now, sock, segment),
                TableSlot::TimeWait(wait) => self.segment_for_time_wait(tx, wait, segment),
            };
        }

        if let Some(idx) = self.backlog.position(&segment.tuple) {
            return self.segment_for_half_open(tx, idx, segment);
        }

        let repr = &segment.repr;
        if repr.flags.syn() && !repr.flags.rst() && repr.ack_number.is_none() {
            let listener = self.table.lookup_listener(
                &segment.tuple.local,
                segment.tuple.local_port,
                device);
            if let Some(listener) = listener {
                return self.syn_for_listener(tx, now, listener, segment, device);
            }
        }

        self.stray_segment(tx, segment)
    }

    /// React to network-layer error feedback for a connection.
    ///
    /// `tuple` is recovered from the offending segment embedded in the ICMP payload, already
    /// flipped to our perspective, and `seq` is that segment's sequence number. Feedback naming a
    /// sequence number we never sent is treated as spoofed and dropped.
    pub fn on_icmp_error<T: Transmit, R: Router>(
        &mut self,
        tx: &mut T,
        router: &mut R,
        kind: IcmpKind,
        tuple: FourTuple,
        seq: SeqNumber,
    ) -> Result<Event> {
        if let Some(slot) = self.table.lookup(&tuple) {
            return match slot {
                TableSlot::Socket(sock) => self.icmp_for_socket(tx, router, kind, sock, tuple, seq),
                TableSlot::TimeWait(_) => {
                    net_trace!("icmp feedback for time-wait tuple discarded");
                    Ok(Event::None)
                }
            };
        }

        if let Some(idx) = self.backlog.position(&tuple) {
            return self.icmp_for_half_open(tx, kind, idx, seq);
        }

        net_trace!("icmp feedback for unknown tuple discarded");
        Ok(Event::None)
    }

    /// Drive timers: handshake and teardown retransmissions, time-wait expiry.
    ///
    /// Events that are not answers to a specific inbound segment, e.g. a connect running out of
    /// retries, are reported through `sink`.
    pub fn poll<T, F>(&mut self, tx: &mut T, now: Instant, mut sink: F)
    where
        T: Transmit,
        F: FnMut(Event),
    {
        self.poll_half_open(tx, now);
        self.poll_sockets(tx, now, &mut sink);
        self.poll_time_wait(now);
    }

    /// The earliest deadline of any record, the time the next `poll` is useful at.
    pub fn next_poll_at(&self) -> Expiration {
        let sockets = self.sockets.iter()
            .map(|(_, socket)| socket.timer.poll_at())
            .fold(Expiration::Never, Expiration::min);
        let waits = self.time_wait.iter()
            .map(|(_, wait)| wait.timer.poll_at())
            .fold(Expiration::Never, Expiration::min);
        self.backlog.poll_at().min(sockets).min(waits)
    }

    /// The lifecycle state of a socket, `None` when the key is stale.
    pub fn state(&self, sock: SlotKey) -> Option<State> {
        self.sockets.get(sock.key).map(|socket| socket.state)
    }

    /// The last soft error recorded for a socket from network feedback.
    pub fn last_error(&self, sock: SlotKey) -> Option<IcmpKind> {
        self.sockets.get(sock.key).and_then(|socket| socket.soft_error)
    }

    /// The current path MTU estimate of a socket, zero before a route was resolved.
    pub fn path_mtu(&self, sock: SlotKey) -> Option<u32> {
        self.sockets.get(sock.key).map(|socket| socket.path_mtu)
    }

    /// The number of live socket records.
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// The number of outstanding half-open requests.
    pub fn half_open_count(&self) -> usize {
        self.backlog.len()
    }

    /// The number of tuples lingering in time-wait.
    pub fn time_wait_count(&self) -> usize {
        self.time_wait.len()
    }

    /// The number of armed timers across all records.
    pub fn live_timers(&self) -> usize {
        self.ledger.live()
    }

    /// A snapshot of the diagnostic counters.
    pub fn counters(&self) -> Counters {
        let mut counters = self.counters;
        counters.cache_hits = self.table.cache_hits();
        counters
    }

    fn segment_for_socket<T: Transmit>(
        &mut self,
        tx: &mut T,
        now: Instant,
        sock: SlotKey,
        segment: &Segment,
    ) -> Result<Event> {
        let socket = self.sockets.get_mut(sock.key).ok_or(Error::Illegal)?;
        let outcome = socket.on_segment(&segment.repr, &self.config);

        if let Some(reply) = outcome.reply {
            send(tx, segment.tuple, reply);
        }

        match outcome.step {
            Step::None => Ok(Event::None),
            Step::Discard { spoof } => {
                if spoof {
                    self.counters.spoof_discards += 1;
                }
                Ok(Event::None)
            }
            Step::Established => {
                self.ledger.cancel(&mut socket.timer);
                socket.retries = 0;
                Ok(Event::Established(sock))
            }
            Step::EnterTimeWait => {
                self.enter_time_wait(sock, now);
                Ok(Event::Closed(sock))
            }
            Step::Refused => {
                self.destroy_socket(sock, true);
                Ok(Event::Refused(sock))
            }
            Step::Reset | Step::Finished => {
                self.destroy_socket(sock, true);
                Ok(Event::Closed(sock))
            }
        }
    }

    fn segment_for_time_wait<T: Transmit>(
        &mut self,
        tx: &mut T,
        wait: SlotKey,
        segment: &Segment,
    ) -> Result<Event> {
        // rfc1337: honoring resets here would let a stray segment assassinate the quarantine
        // and free the tuple for a confused new incarnation.
        if segment.repr.flags.rst() {
            return Ok(Event::None);
        }

        if let Some(record) = self.time_wait.get(wait.key) {
            send(tx, segment.tuple, record.re_ack());
        }
        Ok(Event::None)
    }

    fn segment_for_half_open<T: Transmit>(
        &mut self,
        tx: &mut T,
        idx: usize,
        segment: &Segment,
    ) -> Result<Event> {
        let request = match self.backlog.get(idx) {
            Some(request) => *request,
            None => return Ok(Event::None),
        };
        let repr = &segment.repr;

        if repr.flags.rst() {
            if repr.seq_number == request.irs + 1 {
                // The peer gave up before completing, no reply to a reset ever.
                if let Some(request) = self.backlog.get_mut(idx) {
                    self.ledger.cancel(&mut request.timer);
                }
                self.backlog.remove_at(idx);
            } else {
                self.counters.spoof_discards += 1;
            }
            return Ok(Event::None);
        }

        if repr.flags.syn() {
            if repr.seq_number == request.irs {
                // A retransmission of the original SYN; our SYN-ACK retransmission timer is
                // already running, answering here would double the reply rate.
                return Ok(Event::None);
            }
            net_debug!("SYN with a different isn for a half-open tuple, dropping");
            return Ok(Event::None);
        }

        match repr.ack_number {
            Some(ack) if ack == request.iss + 1 && repr.seq_number == request.irs + 1 => {
                self.promote_half_open(idx, &request, ack)
            }
            Some(ack) => {
                // rfc793: a bad ack to a connection request earns a reset.
                self.counters.stray_resets += 1;
                let mut flags = Flags::default();
                flags.set_rst(true);
                send(tx, segment.tuple, TcpRepr {
                    flags,
                    seq_number: ack,
                    ack_number: None,
                    ..TcpRepr::default()
                });
                Ok(Event::None)
            }
            None => Ok(Event::None),
        }
    }

    fn promote_half_open(&mut self, idx: usize, request: &HalfOpen, ack: SeqNumber) -> Result<Event> {
        let (key, socket) = match self.sockets.reserve() {
            Some(reserved) => reserved,
            None => {
                // Keep the request, the peer retransmits its ack on our silence.
                net_debug!("socket storage exhausted, delaying promotion");
                return Ok(Event::None);
            }
        };
        let sock = SlotKey { key };

        *socket = Socket {
            tuple: request.tuple,
            family: AddressFamily::of(&request.tuple.remote),
            state: State::Established,
            device: request.device,
            reuse: false,
            bound: false,
            listen_backlog: 0,
            iss: request.iss,
            irs: request.irs,
            snd_una: ack,
            snd_nxt: request.iss + 1,
            rcv_nxt: request.irs + 1,
            peer_mss: request.peer_mss,
            peer_window_scale: request.peer_window_scale,
            sack_permitted: request.sack_permitted,
            peer_timestamp: request.peer_timestamp,
            path_mtu: 0,
            soft_error: None,
            retries: 0,
            timer: Timer::unarmed(),
        };

        if self.table.insert(request.tuple, TableSlot::Socket(sock)).is_err() {
            self.sockets.remove(key);
            net_debug!("connection table full, delaying promotion");
            return Ok(Event::None);
        }

        if let Some(request) = self.backlog.get_mut(idx) {
            self.ledger.cancel(&mut request.timer);
        }
        self.backlog.remove_at(idx);

        Ok(Event::Accepted { listener: request.listener, connection: sock })
    }

    fn syn_for_listener<T: Transmit>(
        &mut self,
        tx: &mut T,
        now: Instant,
        listener: SlotKey,
        segment: &Segment,
        device: InterfaceId,
    ) -> Result<Event> {
        let backlog_limit = self.sockets.get(listener.key)
            .map(|socket| socket.listen_backlog)
            .unwrap_or(0);
        if self.backlog.at_ceiling() || self.backlog.count_for(listener) >= backlog_limit {
            // Dropping is the whole flood containment strategy: no eviction of requests that
            // might belong to honest peers, no reply the flooder could use.
            self.counters.dropped_syns += 1;
            net_debug!("SYN backlog full, dropping request");
            return Ok(Event::None);
        }

        let repr = &segment.repr;
        let request = HalfOpen {
            tuple: segment.tuple,
            listener,
            device: Some(device),
            irs: repr.seq_number,
            iss: self.isn.isn(&segment.tuple, now),
            peer_mss: repr.max_seg_size,
            peer_window_scale: repr.window_scale,
            sack_permitted: repr.sack_permitted && self.config.sack_permitted,
            peer_timestamp: repr.timestamp.map(|(value, _)| value),
            retries: 0,
            timer: Timer::unarmed(),
        };
        let syn_ack = request.syn_ack(&self.config);

        match self.backlog.push(request) {
            Some(slot) => {
                self.ledger.arm(&mut slot.timer, now + self.config.retransmit_timeout);
                send(tx, segment.tuple, syn_ack);
            }
            None => {
                self.counters.dropped_syns += 1;
            }
        }
        Ok(Event::None)
    }

    fn stray_segment<T: Transmit>(&mut self, tx: &mut T, segment: &Segment) -> Result<Event> {
        let repr = &segment.repr;
        // Answering resets with resets would loop two confused hosts forever.
        if repr.flags.rst() {
            return Ok(Event::None);
        }

        self.counters.stray_resets += 1;
        let mut flags = Flags::default();
        flags.set_rst(true);
        let reply = match repr.ack_number {
            // The peer believes a conversation exists, contradict exactly what it acked.
            Some(ack) => TcpRepr {
                flags,
                seq_number: ack,
                ack_number: None,
                ..TcpRepr::default()
            },
            None => TcpRepr {
                flags,
                seq_number: SeqNumber(0),
                ack_number: Some(repr.seq_number + repr.sequence_len()),
                ..TcpRepr::default()
            },
        };
        send(tx, segment.tuple, reply);
        Ok(Event::None)
    }

    fn icmp_for_socket<T: Transmit, R: Router>(
        &mut self,
        tx: &mut T,
        router: &mut R,
        kind: IcmpKind,
        sock: SlotKey,
        tuple: FourTuple,
        seq: SeqNumber,
    ) -> Result<Event> {
        let (in_window, in_handshake, local) = match self.sockets.get(sock.key) {
            Some(socket) => (socket.in_send_window(seq), socket.in_handshake(), socket.tuple.local),
            None => return Ok(Event::None),
        };
        if !in_window {
            // Off-path guesses of our sequence numbers must not tear anything down.
            self.counters.spoof_discards += 1;
            return Ok(Event::None);
        }

        match kind {
            IcmpKind::PacketTooBig => {
                let route = router.resolve_route(
                    if local.is_unspecified() { None } else { Some(local) },
                    tuple.remote)?;
                if let Some(socket) = self.sockets.get_mut(sock.key) {
                    socket.path_mtu = route.path_mtu;
                    // The dropped segment never arrived, waiting for the timer only adds delay.
                    if let Some(repr) = socket.retransmit_repr(&self.config) {
                        send(tx, socket.tuple, repr);
                    }
                }
                Ok(Event::None)
            }
            _ if in_handshake => {
                // Hard during the handshake: there is no conversation to salvage yet.
                self.destroy_socket(sock, true);
                Ok(Event::Refused(sock))
            }
            _ => {
                // Soft once synchronized, recorded for the embedding to inspect.
                if let Some(socket) = self.sockets.get_mut(sock.key) {
                    socket.soft_error = Some(kind);
                }
                Ok(Event::None)
            }
        }
    }

    fn icmp_for_half_open<T: Transmit>(
        &mut self,
        tx: &mut T,
        kind: IcmpKind,
        idx: usize,
        seq: SeqNumber,
    ) -> Result<Event> {
        let request = match self.backlog.get(idx) {
            Some(request) => *request,
            None => return Ok(Event::None),
        };
        // The only sequence number we ever put on the wire for this request.
        if seq != request.iss {
            self.counters.spoof_discards += 1;
            return Ok(Event::None);
        }

        match kind {
            IcmpKind::PacketTooBig => {
                send(tx, request.tuple, request.syn_ack(&self.config));
            }
            _ => {
                // The handshake cannot complete, and there is no one to tell.
                if let Some(request) = self.backlog.get_mut(idx) {
                    self.ledger.cancel(&mut request.timer);
                }
                self.backlog.remove_at(idx);
            }
        }
        Ok(Event::None)
    }

    fn poll_half_open<T: Transmit>(&mut self, tx: &mut T, now: Instant) {
        let mut idx = 0;
        while idx < self.backlog.len() {
            let (due, exhausted) = match self.backlog.get(idx) {
                Some(request) => (
                    request.timer.is_due(now),
                    request.retries >= self.config.handshake_retries,
                ),
                None => break,
            };
            if !due {
                idx += 1;
                continue;
            }
            if exhausted {
                // Giving up looks to the peer exactly like its ack getting lost.
                if let Some(request) = self.backlog.get_mut(idx) {
                    self.ledger.cancel(&mut request.timer);
                }
                self.backlog.remove_at(idx);
                continue;
            }

            let mut resend = None;
            if let Some(request) = self.backlog.get_mut(idx) {
                request.retries += 1;
                let delay = self.config.retransmit_timeout
                    * (1u32 << u32::from(request.retries.min(6)));
                self.ledger.arm(&mut request.timer, now + delay);
                resend = Some((request.tuple, request.syn_ack(&self.config)));
            }
            if let Some((tuple, syn_ack)) = resend {
                send(tx, tuple, syn_ack);
            }
            idx += 1;
        }
    }

    fn poll_sockets<T, F>(&mut self, tx: &mut T, now: Instant, sink: &mut F)
    where
        T: Transmit,
        F: FnMut(Event),
    {
        loop {
            let due = self.sockets.iter()
                .find(|(_, socket)| socket.timer.is_due(now))
                .map(|(key, _)| SlotKey { key });
            let sock = match due {
                Some(sock) => sock,
                None => break,
            };
            self.socket_timer_fired(tx, now, sock, sink);
        }
    }

    fn socket_timer_fired<T, F>(&mut self, tx: &mut T, now: Instant, sock: SlotKey, sink: &mut F)
    where
        T: Transmit,
        F: FnMut(Event),
    {
        enum Action {
            GiveUp,
            Resend(FourTuple, Option<TcpRepr>),
        }

        let action = match self.sockets.get_mut(sock.key) {
            Some(socket) => {
                if socket.retries >= self.config.handshake_retries {
                    Action::GiveUp
                } else {
                    socket.retries += 1;
                    let delay = self.config.retransmit_timeout
                        * (1u32 << u32::from(socket.retries.min(6)));
                    self.ledger.arm(&mut socket.timer, now + delay);
                    Action::Resend(socket.tuple, socket.retransmit_repr(&self.config))
                }
            }
            None => return,
        };

        match action {
            Action::GiveUp => {
                self.destroy_socket(sock, true);
                sink(Event::TimedOut(sock));
            }
            Action::Resend(tuple, Some(repr)) => send(tx, tuple, repr),
            Action::Resend(_, None) => {
                // A timer armed in a state without pending control segments is stale.
                if let Some(socket) = self.sockets.get_mut(sock.key) {
                    self.ledger.cancel(&mut socket.timer);
                }
            }
        }
    }

    fn poll_time_wait(&mut self, now: Instant) {
        loop {
            let due = self.time_wait.iter()
                .find(|(_, wait)| wait.timer.is_due(now))
                .map(|(key, _)| key);
            let key = match due {
                Some(key) => key,
                None => break,
            };

            if let Some(wait) = self.time_wait.get_mut(key) {
                self.ledger.cancel(&mut wait.timer);
                let tuple = wait.tuple;
                self.table.remove(&tuple);
            }
            self.time_wait.remove(key);
        }
    }

    /// Swap a fully closed socket for its time-wait record.
    ///
    /// The tuple stays claimed in the connection table, now resolving to the quarantine record.
    fn enter_time_wait(&mut self, sock: SlotKey, now: Instant) {
        let (tuple, rcv_nxt, snd_nxt) = match self.sockets.get(sock.key) {
            Some(socket) => (socket.tuple, socket.rcv_nxt, socket.snd_nxt),
            None => return,
        };

        match self.time_wait.reserve() {
            Some((key, wait)) => {
                *wait = TimeWait { tuple, rcv_nxt, snd_nxt, timer: Timer::unarmed() };
                self.ledger.arm(&mut wait.timer, now + self.config.time_wait_timeout);
                let _ = self.table.replace(&tuple, TableSlot::TimeWait(SlotKey { key }));
                self.destroy_socket(sock, false);
            }
            None => {
                net_debug!("time-wait storage exhausted, releasing tuple early");
                self.destroy_socket(sock, true);
            }
        }
    }

    /// Release everything a socket owns, tables first, storage last.
    ///
    /// `unhash` is false only when the tuple was handed over to a time-wait record.
    fn destroy_socket(&mut self, sock: SlotKey, unhash: bool) {
        let (tuple, state, bound) = match self.sockets.get(sock.key) {
            Some(socket) => (socket.tuple, socket.state, socket.bound),
            None => return,
        };

        if let Some(socket) = self.sockets.get_mut(sock.key) {
            self.ledger.cancel(&mut socket.timer);
        }

        match state {
            State::Closed => (),
            State::Listen => {
                self.table.remove_listener(sock);
                self.backlog.purge_listener(sock, &mut self.ledger);
            }
            _ if unhash => {
                self.table.remove(&tuple);
            }
            _ => (),
        }

        if bound {
            self.binds.release(sock, tuple.local_port);
        }
        self.sockets.remove(sock.key);
    }

    /// Pick and reserve an ephemeral port for an active connect.
    ///
    /// A keyed hash of the endpoints decides the starting point, so consecutive connects to the
    /// same peer do not probe the range in a guessable order.
    fn ephemeral_port(
        &mut self,
        sock: SlotKey,
        local: IpAddress,
        device: Option<InterfaceId>,
        remote: IpAddress,
        remote_port: u16,
    ) -> Result<u16> {
        const FIRST: u16 = 49152;
        let span = u32::from(u16::max_value() - FIRST) + 1;
        let seed = self.hash.hash_one((local, remote, remote_port)) as u32;

        for probe in 0..span {
            let port = FIRST + (seed.wrapping_add(probe) % span) as u16;
            let request = BindRequest { addr: local, port, device, reuse: false, listener: false };
            match self.binds.reserve(sock, &request) {
                Ok(()) => return Ok(port),
                Err(Error::AddressInUse) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(Error::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Route;
    use crate::time::Duration;
    use crate::wire::Ipv4Address;

    struct Wire {
        sent: Vec<Segment>,
    }

    impl Wire {
        fn new() -> Self {
            Wire { sent: Vec::new() }
        }

        fn take(&mut self) -> Segment {
            assert_eq!(self.sent.len(), 1, "expected exactly one segment on the wire");
            self.sent.pop().unwrap()
        }
    }

    impl Transmit for Wire {
        fn transmit(&mut self, segment: &Segment) -> Result<()> {
            self.sent.push(*segment);
            Ok(())
        }
    }

    struct FlatNet {
        route: Route,
    }

    impl Router for FlatNet {
        fn resolve_route(&mut self, _: Option<IpAddress>, _: IpAddress) -> Result<Route> {
            Ok(self.route)
        }
    }

    const DEV: InterfaceId = InterfaceId(1);

    fn router() -> FlatNet {
        FlatNet { route: Route { device: DEV, path_mtu: 1500, local: addr(2) } }
    }

    fn addr(host: u8) -> IpAddress {
        IpAddress::Ipv4(Ipv4Address::new(192, 0, 2, host))
    }

    fn endpoint(config: Config) -> Endpoint<'static> {
        Endpoint::new(
            Storage::with_capacity(8, 4, 4),
            config,
            HashState::from_secret_key_bytes([9; 16]))
    }

    // Put the segment on the other host's wire: swap the tuple to its perspective.
    fn flip(segment: Segment) -> Segment {
        Segment { tuple: segment.tuple.flipped(), repr: segment.repr }
    }

    fn at(secs: i64) -> Instant {
        Instant::from_secs(secs)
    }

    struct Pair {
        server: Endpoint<'static>,
        client: Endpoint<'static>,
        swire: Wire,
        cwire: Wire,
        listener: SlotKey,
        csock: SlotKey,
    }

    // Run both handshakes to completion, returning the established pair.
    fn established() -> (Pair, SlotKey) {
        let mut pair = pair(Config::default());
        let now = at(0);

        let syn = pair.cwire.take();
        pair.server.on_segment_received(&mut pair.swire, now, &flip(syn), DEV).unwrap();

        let syn_ack = pair.swire.take();
        let event = pair.client
            .on_segment_received(&mut pair.cwire, now, &flip(syn_ack), DEV)
            .unwrap();
        assert_eq!(event, Event::Established(pair.csock));

        let ack = pair.cwire.take();
        let event = pair.server
            .on_segment_received(&mut pair.swire, now, &flip(ack), DEV)
            .unwrap();
        let accepted = match event {
            Event::Accepted { listener, connection } => {
                assert_eq!(listener, pair.listener);
                connection
            }
            other => panic!("expected accept, got {:?}", other),
        };
        (pair, accepted)
    }

    // A listening server and a client that has sent its SYN.
    fn pair(config: Config) -> Pair {
        let mut server = endpoint(config);
        let mut client = endpoint(config);
        let swire = Wire::new();
        let mut cwire = Wire::new();

        let listener = server.open().unwrap();
        server.bind(listener, addr(1), 80, None, false).unwrap();
        server.listen(listener, 4).unwrap();

        let csock = client.open().unwrap();
        client.bind(csock, addr(2), 4400, None, false).unwrap();
        client.connect(&mut cwire, &mut router(), at(0), csock, addr(1), 80).unwrap();

        Pair { server, client, swire, cwire, listener, csock }
    }

    #[test]
    fn three_way_handshake() {
        let (pair, accepted) = established();

        assert_eq!(pair.client.state(pair.csock), Some(State::Established));
        assert_eq!(pair.server.state(accepted), Some(State::Established));
        assert_eq!(pair.server.half_open_count(), 0);

        // Nothing left to retransmit on either side.
        assert_eq!(pair.client.live_timers(), 0);
        assert_eq!(pair.server.live_timers(), 0);
        assert_eq!(pair.client.next_poll_at(), Expiration::Never);

        // The accepted connection remembers its arrival interface.
        let device = pair.server.sockets.get(accepted.key).unwrap().device;
        assert_eq!(device, Some(DEV));
    }

    #[test]
    fn unbound_connect_completes_its_handshake() {
        let mut server = endpoint(Config::default());
        let mut client = endpoint(Config::default());
        let mut swire = Wire::new();
        let mut cwire = Wire::new();

        let listener = server.open().unwrap();
        server.bind(listener, addr(1), 80, None, false).unwrap();
        server.listen(listener, 4).unwrap();

        let csock = client.open().unwrap();
        client.connect(&mut cwire, &mut router(), at(0), csock, addr(1), 80).unwrap();

        // The route elected the source address, the SYN carries it.
        let syn = cwire.take();
        assert_eq!(syn.tuple.local, addr(2));
        assert!(syn.tuple.local_port >= 49152);

        server.on_segment_received(&mut swire, at(0), &flip(syn), DEV).unwrap();
        let syn_ack = swire.take();

        // The reply addresses that source and finds the connection.
        let event = client.on_segment_received(&mut cwire, at(0), &flip(syn_ack), DEV).unwrap();
        assert_eq!(event, Event::Established(csock));
        assert_eq!(client.state(csock), Some(State::Established));
        assert_eq!(client.counters().stray_resets, 0);
        let ack = cwire.take();
        assert!(ack.repr.flags.ack() && !ack.repr.flags.rst());
    }

    #[test]
    fn connect_needs_a_source_address() {
        let mut client = endpoint(Config::default());
        let mut wire = Wire::new();
        let mut net = router();
        net.route.local = IpAddress::Unspecified;

        // A route that elects no source address is unusable for an unbound socket.
        let sock = client.open().unwrap();
        let err = client.connect(&mut wire, &mut net, at(0), sock, addr(1), 80).unwrap_err();
        assert_eq!(err, Error::Unreachable);
        assert_eq!(client.state(sock), Some(State::Closed));
        assert!(wire.sent.is_empty());
    }

    #[test]
    fn duplicate_syn_is_idempotent() {
        let mut pair = pair(Config::default());
        let syn = pair.cwire.take();

        pair.server.on_segment_received(&mut pair.swire, at(0), &flip(syn), DEV).unwrap();
        let first = pair.swire.take();
        assert!(first.repr.flags.syn() && first.repr.ack_number.is_some());

        // The retransmitted SYN creates nothing and is not answered early.
        pair.server.on_segment_received(&mut pair.swire, at(0), &flip(syn), DEV).unwrap();
        assert_eq!(pair.server.half_open_count(), 1);
        assert_eq!(pair.server.live_timers(), 1);
        assert!(pair.swire.sent.is_empty());
    }

    #[test]
    fn syn_flood_is_contained() {
        let config = Config { max_half_open: 2, ..Config::default() };
        let mut server = endpoint(config);
        let mut wire = Wire::new();

        let listener = server.open().unwrap();
        server.bind(listener, addr(1), 80, None, false).unwrap();
        server.listen(listener, 8).unwrap();

        for port in 1000..1005u16 {
            let syn = Segment {
                tuple: FourTuple {
                    local: addr(1),
                    remote: addr(9),
                    local_port: 80,
                    remote_port: port,
                },
                repr: TcpRepr {
                    flags: Flags::SYN,
                    seq_number: SeqNumber(i32::from(port)),
                    ..TcpRepr::default()
                },
            };
            server.on_segment_received(&mut wire, at(0), &syn, DEV).unwrap();
        }

        // Two admitted and answered, three dropped without a reply or an eviction.
        assert_eq!(server.half_open_count(), 2);
        assert_eq!(wire.sent.len(), 2);
        assert_eq!(server.counters().dropped_syns, 3);
    }

    #[test]
    fn listener_backlog_binds_per_listener() {
        let mut server = endpoint(Config::default());
        let mut wire = Wire::new();

        let listener = server.open().unwrap();
        server.bind(listener, addr(1), 80, None, false).unwrap();
        server.listen(listener, 1).unwrap();

        for port in [1000u16, 1001] {
            let syn = Segment {
                tuple: FourTuple {
                    local: addr(1),
                    remote: addr(9),
                    local_port: 80,
                    remote_port: port,
                },
                repr: TcpRepr {
                    flags: Flags::SYN,
                    seq_number: SeqNumber(7),
                    ..TcpRepr::default()
                },
            };
            server.on_segment_received(&mut wire, at(0), &syn, DEV).unwrap();
        }

        assert_eq!(server.half_open_count(), 1);
        assert_eq!(server.counters().dropped_syns, 1);
    }

    #[test]
    fn connect_refused_by_reset() {
        let mut pair = pair(Config::default());
        let syn = pair.cwire.take();

        // Hand-craft the refusal a closed port would send.
        let mut flags = Flags::default();
        flags.set_rst(true);
        let refusal = Segment {
            tuple: syn.tuple,
            repr: TcpRepr {
                flags,
                seq_number: SeqNumber(0),
                ack_number: Some(syn.repr.seq_number + 1),
                ..TcpRepr::default()
            },
        };

        let event = pair.client
            .on_segment_received(&mut pair.cwire, at(0), &refusal, DEV)
            .unwrap();
        assert_eq!(event, Event::Refused(pair.csock));
        assert_eq!(pair.client.state(pair.csock), None);
        assert_eq!(pair.client.socket_count(), 0);
        assert_eq!(pair.client.live_timers(), 0);
    }

    #[test]
    fn stray_segments_earn_resets() {
        let mut server = endpoint(Config::default());
        let mut wire = Wire::new();

        let tuple = FourTuple {
            local: addr(1),
            remote: addr(9),
            local_port: 80,
            remote_port: 1000,
        };
        let stray = Segment {
            tuple,
            repr: TcpRepr {
                seq_number: SeqNumber(400),
                ack_number: Some(SeqNumber(7777)),
                ..TcpRepr::default()
            },
        };

        server.on_segment_received(&mut wire, at(0), &stray, DEV).unwrap();
        let reset = wire.take();
        assert!(reset.repr.flags.rst());
        assert_eq!(reset.repr.seq_number, SeqNumber(7777));
        assert_eq!(server.counters().stray_resets, 1);

        // A stray reset is never answered, that would ping-pong forever.
        let mut flags = Flags::default();
        flags.set_rst(true);
        let stray_rst = Segment {
            tuple,
            repr: TcpRepr { flags, seq_number: SeqNumber(1), ..TcpRepr::default() },
        };
        server.on_segment_received(&mut wire, at(0), &stray_rst, DEV).unwrap();
        assert!(wire.sent.is_empty());
    }

    #[test]
    fn handshake_gives_up_and_reports() {
        let config = Config { handshake_retries: 2, ..Config::default() };
        let mut client = endpoint(config);
        let mut wire = Wire::new();

        let sock = client.open().unwrap();
        client.bind(sock, addr(2), 4400, None, false).unwrap();
        client.connect(&mut wire, &mut router(), at(0), sock, addr(1), 80).unwrap();
        wire.take();

        let mut events = Vec::new();
        let mut now = at(0);
        for _ in 0..8 {
            now += Duration::from_secs(300);
            client.poll(&mut wire, now, |event| events.push(event));
        }

        // Two retransmissions, then the timeout event and a clean teardown.
        assert_eq!(wire.sent.len(), 2);
        assert_eq!(events, [Event::TimedOut(sock)]);
        assert_eq!(client.socket_count(), 0);
        assert_eq!(client.live_timers(), 0);
        assert_eq!(client.next_poll_at(), Expiration::Never);

        // The ports and tuple are free again.
        let again = client.open().unwrap();
        client.bind(again, addr(2), 4400, None, false).unwrap();
    }

    #[test]
    fn half_open_expiry_is_silent() {
        let config = Config { handshake_retries: 1, ..Config::default() };
        let mut pair = pair(config);
        let syn = pair.cwire.take();
        pair.server.on_segment_received(&mut pair.swire, at(0), &flip(syn), DEV).unwrap();
        pair.swire.take();

        let mut events = Vec::new();
        let mut now = at(0);
        for _ in 0..4 {
            now += Duration::from_secs(300);
            pair.server.poll(&mut pair.swire, now, |event| events.push(event));
        }

        assert_eq!(pair.swire.sent.len(), 1);
        assert!(events.is_empty());
        assert_eq!(pair.server.half_open_count(), 0);
        assert_eq!(pair.server.live_timers(), 0);
    }

    #[test]
    fn orderly_close_reaches_time_wait() {
        let (mut pair, accepted) = established();
        let now = at(1);

        // Client closes first.
        pair.client.close(&mut pair.cwire, now, pair.csock).unwrap();
        let fin = pair.cwire.take();
        assert!(fin.repr.flags.fin());

        let event = pair.server.on_segment_received(&mut pair.swire, now, &flip(fin), DEV).unwrap();
        assert_eq!(event, Event::None);
        assert_eq!(pair.server.state(accepted), Some(State::CloseWait));
        let ack = pair.swire.take();

        pair.client.on_segment_received(&mut pair.cwire, now, &flip(ack), DEV).unwrap();
        assert_eq!(pair.client.state(pair.csock), Some(State::FinWait2));

        // Server closes its side.
        pair.server.close(&mut pair.swire, now, accepted).unwrap();
        let fin = pair.swire.take();

        let event = pair.client.on_segment_received(&mut pair.cwire, now, &flip(fin), DEV).unwrap();
        assert_eq!(event, Event::Closed(pair.csock));
        assert_eq!(pair.client.state(pair.csock), None);
        assert_eq!(pair.client.time_wait_count(), 1);
        let last_ack = pair.cwire.take();

        // The passive closer is released without a time-wait record of its own.
        let event = pair.server
            .on_segment_received(&mut pair.swire, now, &flip(last_ack), DEV)
            .unwrap();
        assert_eq!(event, Event::Closed(accepted));
        assert_eq!(pair.server.time_wait_count(), 0);
        assert_eq!(pair.server.live_timers(), 0);
    }

    #[test]
    fn time_wait_blocks_and_expires() {
        let (mut pair, _) = established();
        run_to_client_time_wait(&mut pair);

        // The tuple is still claimed, reconnecting it must fail.
        let retry = pair.client.open().unwrap();
        pair.client.bind(retry, addr(2), 4400, None, false).unwrap();
        let err = pair.client
            .connect(&mut pair.cwire, &mut router(), at(2), retry, addr(1), 80)
            .unwrap_err();
        assert_eq!(err, Error::AddressInUse);

        // After the grace period the tuple is free again.
        pair.client.poll(&mut pair.cwire, at(120), |_| panic!("expiry is not an event"));
        assert_eq!(pair.client.time_wait_count(), 0);
        assert_eq!(pair.client.live_timers(), 0);
        pair.client
            .connect(&mut pair.cwire, &mut router(), at(120), retry, addr(1), 80)
            .unwrap();
    }

    #[test]
    fn time_wait_re_acks_stragglers() {
        let (mut pair, _) = established();
        run_to_client_time_wait(&mut pair);

        // A retransmission from the old incarnation gets our final position restated.
        let straggler = Segment {
            tuple: FourTuple {
                local: addr(2),
                remote: addr(1),
                local_port: 4400,
                remote_port: 80,
            },
            repr: TcpRepr {
                seq_number: SeqNumber(1),
                ack_number: Some(SeqNumber(1)),
                ..TcpRepr::default()
            },
        };
        let event = pair.client
            .on_segment_received(&mut pair.cwire, at(2), &straggler, DEV)
            .unwrap();
        assert_eq!(event, Event::None);
        let re_ack = pair.cwire.take();
        assert!(re_ack.repr.ack_number.is_some());
        assert!(!re_ack.repr.flags.rst());

        // A reset does not assassinate the quarantine.
        let mut flags = Flags::default();
        flags.set_rst(true);
        let rst = Segment {
            tuple: straggler.tuple,
            repr: TcpRepr { flags, seq_number: SeqNumber(1), ..TcpRepr::default() },
        };
        pair.client.on_segment_received(&mut pair.cwire, at(2), &rst, DEV).unwrap();
        assert_eq!(pair.client.time_wait_count(), 1);
    }

    // Drive the full teardown until the client's socket is replaced by time-wait.
    fn run_to_client_time_wait(pair: &mut Pair) {
        let now = at(1);
        pair.client.close(&mut pair.cwire, now, pair.csock).unwrap();
        let fin = pair.cwire.take();
        pair.server.on_segment_received(&mut pair.swire, now, &flip(fin), DEV).unwrap();
        let ack = pair.swire.take();
        pair.client.on_segment_received(&mut pair.cwire, now, &flip(ack), DEV).unwrap();

        let tuple = FourTuple {
            local: addr(1),
            remote: addr(2),
            local_port: 80,
            remote_port: 4400,
        };
        let accepted = match pair.server.table.lookup(&tuple) {
            Some(TableSlot::Socket(sock)) => sock,
            other => panic!("expected the accepted socket, got {:?}", other),
        };
        pair.server.close(&mut pair.swire, now, accepted).unwrap();
        let fin = pair.swire.take();
        pair.client.on_segment_received(&mut pair.cwire, now, &flip(fin), DEV).unwrap();
        let last_ack = pair.cwire.take();
        pair.server.on_segment_received(&mut pair.swire, now, &flip(last_ack), DEV).unwrap();
        assert_eq!(pair.client.time_wait_count(), 1);
    }

    #[test]
    fn icmp_too_big_updates_mtu_and_retransmits() {
        let mut pair = pair(Config::default());
        let syn = pair.cwire.take();

        let mut net = router();
        net.route.path_mtu = 1280;
        let event = pair.client
            .on_icmp_error(
                &mut pair.cwire,
                &mut net,
                IcmpKind::PacketTooBig,
                syn.tuple,
                syn.repr.seq_number)
            .unwrap();
        assert_eq!(event, Event::None);
        assert_eq!(pair.client.path_mtu(pair.csock), Some(1280));

        // The retransmission happens right away, not at the next timer expiry.
        let resent = pair.cwire.take();
        assert!(resent.repr.flags.syn());
    }

    #[test]
    fn stale_icmp_is_discarded() {
        let mut pair = pair(Config::default());
        let syn = pair.cwire.take();

        // Feedback quoting a sequence number we never sent changes nothing.
        let event = pair.client
            .on_icmp_error(
                &mut pair.cwire,
                &mut router(),
                IcmpKind::DestinationUnreachable,
                syn.tuple,
                syn.repr.seq_number + 999)
            .unwrap();
        assert_eq!(event, Event::None);
        assert_eq!(pair.client.state(pair.csock), Some(State::SynSent));
        assert_eq!(pair.client.counters().spoof_discards, 1);
    }

    #[test]
    fn hard_icmp_aborts_the_handshake() {
        let mut pair = pair(Config::default());
        let syn = pair.cwire.take();

        let event = pair.client
            .on_icmp_error(
                &mut pair.cwire,
                &mut router(),
                IcmpKind::DestinationUnreachable,
                syn.tuple,
                syn.repr.seq_number)
            .unwrap();
        assert_eq!(event, Event::Refused(pair.csock));
        assert_eq!(pair.client.socket_count(), 0);
        assert_eq!(pair.client.live_timers(), 0);
    }

    #[test]
    fn soft_icmp_is_recorded_once_synchronized() {
        let (mut pair, _) = established();
        let tuple = FourTuple {
            local: addr(2),
            remote: addr(1),
            local_port: 4400,
            remote_port: 80,
        };

        // Pretend a data segment is in flight so the send window is non-empty.
        let seq = {
            let socket = pair.client.sockets.get_mut(pair.csock.key).unwrap();
            socket.snd_nxt = socket.snd_nxt + 1;
            socket.snd_una
        };

        let event = pair.client
            .on_icmp_error(&mut pair.cwire, &mut router(), IcmpKind::TimeExceeded, tuple, seq)
            .unwrap();
        assert_eq!(event, Event::None);
        assert_eq!(pair.client.state(pair.csock), Some(State::Established));
        assert_eq!(pair.client.last_error(pair.csock), Some(IcmpKind::TimeExceeded));

        // Outside the send window the same report is dismissed as spoofed.
        let event = pair.client
            .on_icmp_error(
                &mut pair.cwire,
                &mut router(),
                IcmpKind::TimeExceeded,
                tuple,
                seq + 999)
            .unwrap();
        assert_eq!(event, Event::None);
        assert_eq!(pair.client.counters().spoof_discards, 1);
    }

    #[test]
    fn ephemeral_ports_are_distinct_and_high() {
        let mut client = endpoint(Config::default());
        let mut wire = Wire::new();

        let first = client.open().unwrap();
        client.connect(&mut wire, &mut router(), at(0), first, addr(1), 80).unwrap();
        let second = client.open().unwrap();
        client.connect(&mut wire, &mut router(), at(0), second, addr(1), 80).unwrap();

        let ports: Vec<u16> = wire.sent.iter()
            .map(|segment| segment.tuple.local_port)
            .collect();
        assert!(ports.iter().all(|&port| port >= 49152));
        assert_ne!(ports[0], ports[1]);
    }

    #[test]
    fn family_is_fixed_at_first_address() {
        let mut client = endpoint(Config::default());
        let mut wire = Wire::new();

        let sock = client.open().unwrap();
        client.bind(sock, addr(2), 4400, None, false).unwrap();

        let v6 = IpAddress::Ipv6(crate::wire::Ipv6Address([0x20, 0x01, 0x0d, 0xb8,
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]));
        let err = client.connect(&mut wire, &mut router(), at(0), sock, v6, 80).unwrap_err();
        assert_eq!(err, Error::Illegal);
        assert_eq!(client.state(sock), Some(State::Closed));
    }

    #[test]
    fn closing_a_listener_purges_its_backlog() {
        let mut pair = pair(Config::default());
        let syn = pair.cwire.take();
        pair.server.on_segment_received(&mut pair.swire, at(0), &flip(syn), DEV).unwrap();
        pair.swire.take();
        assert_eq!(pair.server.half_open_count(), 1);

        pair.server.close(&mut pair.swire, at(0), pair.listener).unwrap();
        assert_eq!(pair.server.half_open_count(), 0);
        assert_eq!(pair.server.live_timers(), 0);
        assert_eq!(pair.server.socket_count(), 0);

        // The port is rebindable right away.
        let again = pair.server.open().unwrap();
        pair.server.bind(again, addr(1), 80, None, false).unwrap();
    }

    #[test]
    fn abort_resets_the_peer() {
        let (mut pair, accepted) = established();

        pair.server.abort(&mut pair.swire, accepted).unwrap();
        let reset = pair.swire.take();
        assert!(reset.repr.flags.rst());
        assert_eq!(pair.server.socket_count(), 1); // the listener survives
        assert_eq!(pair.server.time_wait_count(), 0);

        // The reset lands exactly on rcv_nxt and tears the client down.
        let event = pair.client
            .on_segment_received(&mut pair.cwire, at(1), &flip(reset), DEV)
            .unwrap();
        assert_eq!(event, Event::Closed(pair.csock));
        assert_eq!(pair.client.socket_count(), 0);
        assert_eq!(pair.client.live_timers(), 0);
    }

    #[test]
    fn lookup_cache_counts_repeat_traffic() {
        let (mut pair, accepted) = established();
        let probe = Segment {
            tuple: FourTuple {
                local: addr(1),
                remote: addr(2),
                local_port: 80,
                remote_port: 4400,
            },
            repr: TcpRepr {
                seq_number: SeqNumber(1),
                ..TcpRepr::default()
            },
        };

        // The tuple was cached by the handshake, repeat traffic hits it.
        let before = pair.server.counters().cache_hits;
        pair.server.on_segment_received(&mut pair.swire, at(1), &probe, DEV).unwrap();
        pair.server.on_segment_received(&mut pair.swire, at(1), &probe, DEV).unwrap();
        assert!(pair.server.counters().cache_hits > before);
        assert_eq!(pair.server.state(accepted), Some(State::Established));
    }
}
