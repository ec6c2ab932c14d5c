//! Connection demultiplexing.
//!
//! Two logical partitions share this table: connected tuples (established sockets and time-wait
//! records) keyed by the full four tuple, and listeners keyed by local port and address. On top
//! sits a one-entry cache keyed by remote port, which catches the common case of repeated
//! traffic from the same peer and is validated against the full tuple before being trusted.
use crate::hash::HashState;
use crate::managed::{Bucket, Entry, HashMap, List, Slice};
use crate::wire::{InterfaceId, IpAddress};

use super::{Error, FourTuple, Result, SlotKey};

/// What a tuple resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableSlot {
    /// A live socket record.
    Socket(SlotKey),
    /// A time-wait record blocking the tuple.
    TimeWait(SlotKey),
}

/// A listener's claim on a local port and address.
#[derive(Clone, Copy, Debug, Default)]
pub struct ListenEntry {
    port: u16,
    addr: IpAddress,
    device: Option<InterfaceId>,
    socket: SlotKey,
}

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    remote_port: u16,
    tuple: FourTuple,
    slot: TableSlot,
}

/// The connection lookup table.
pub struct ConnectionTable<'a> {
    tuples: HashMap<'a, FourTuple, TableSlot, HashState>,
    listeners: List<'a, ListenEntry>,
    cache: Option<CacheEntry>,
    cache_hits: u64,
}

impl<'a> ConnectionTable<'a> {
    /// Create the table over caller-provided storage, keyed by the given secret.
    pub fn new(
        buckets: Slice<'a, Bucket<FourTuple, TableSlot>>,
        listeners: Slice<'a, ListenEntry>,
        hasher: HashState,
    ) -> Self {
        ConnectionTable {
            tuples: HashMap::new(buckets, hasher),
            listeners: List::new(listeners),
            cache: None,
            cache_hits: 0,
        }
    }
}

impl ConnectionTable<'_> {
    /// The number of connected tuples.
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// Whether no tuple is connected.
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// How often the one-entry cache short-circuited a lookup.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    /// Claim a tuple.
    ///
    /// The tuple must not be claimed yet; sockets and time-wait records never share one.
    pub fn insert(&mut self, tuple: FourTuple, slot: TableSlot) -> Result<()> {
        match self.tuples.entry(tuple) {
            Entry::Occupied(_) => Err(Error::Illegal),
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(())
            }
            Entry::Full => Err(Error::Exhausted),
        }
    }

    /// Release a tuple.
    pub fn remove(&mut self, tuple: &FourTuple) -> Option<TableSlot> {
        if let Some(cached) = &self.cache {
            if cached.tuple == *tuple {
                self.cache = None;
            }
        }
        self.tuples.remove(tuple)
    }

    /// Swap what a claimed tuple resolves to, e.g. from a socket to its time-wait record.
    pub fn replace(&mut self, tuple: &FourTuple, slot: TableSlot) -> Result<()> {
        if let Some(cached) = &mut self.cache {
            if cached.tuple == *tuple {
                cached.slot = slot;
            }
        }
        match self.tuples.get_mut(tuple) {
            Some(existing) => {
                *existing = slot;
                Ok(())
            }
            None => Err(Error::Illegal),
        }
    }

    /// Resolve a connected tuple.
    pub fn lookup(&mut self, tuple: &FourTuple) -> Option<TableSlot> {
        if let Some(cached) = &self.cache {
            if cached.remote_port == tuple.remote_port && cached.tuple == *tuple {
                self.cache_hits += 1;
                return Some(cached.slot);
            }
        }

        let slot = *self.tuples.get(tuple)?;
        self.cache = Some(CacheEntry {
            remote_port: tuple.remote_port,
            tuple: *tuple,
            slot,
        });
        Some(slot)
    }

    /// Register a listener.
    pub fn insert_listener(
        &mut self,
        socket: SlotKey,
        port: u16,
        addr: IpAddress,
        device: Option<InterfaceId>,
    ) -> Result<()> {
        *self.listeners.push().ok_or(Error::Exhausted)? = ListenEntry {
            port,
            addr,
            device,
            socket,
        };
        Ok(())
    }

    /// Unregister a listener.
    pub fn remove_listener(&mut self, socket: SlotKey) {
        if let Some(idx) = self.listeners.iter().position(|entry| entry.socket == socket) {
            self.listeners.remove_at(idx);
        }
    }

    /// Select the best listener for an inbound SYN.
    ///
    /// Never considers the remote half of the tuple. An exact local address beats a wildcard, a
    /// matching bound device breaks remaining ties, and a listener pinned to a different device
    /// than the inbound one is never selected.
    pub fn lookup_listener(
        &self,
        local_addr: &IpAddress,
        local_port: u16,
        device: InterfaceId,
    ) -> Option<SlotKey> {
        let mut best: Option<(u8, SlotKey)> = None;

        for entry in self.listeners.iter() {
            if entry.port != local_port {
                continue;
            }
            if let Some(bound) = entry.device {
                if bound != device {
                    continue;
                }
            }
            if !entry.addr.accepts(local_addr) {
                continue;
            }

            let mut score = 0;
            if !entry.addr.is_unspecified() {
                score += 2;
            }
            if entry.device == Some(device) {
                score += 1;
            }

            match best {
                Some((high, _)) if high >= score => (),
                _ => best = Some((score, entry.socket)),
            }
        }

        best.map(|(_, socket)| socket)
    }
}
