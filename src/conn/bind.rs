//! Local port ownership.
//!
//! Tracks which sockets own which local ports and enforces the reuse policy at bind time. The
//! table is two flat lists rather than per-port owner vectors, so it fits the fixed-storage model
//! without nested allocation: one list of individual owners, one list of per-port bookkeeping.
use crate::managed::{List, Slice};
use crate::wire::{InterfaceId, IpAddress};

use super::{Error, Result, SlotKey};

/// A proposed binding, validated by [`BindTable::reserve`].
///
/// [`BindTable::reserve`]: struct.BindTable.html#method.reserve
#[derive(Clone, Copy, Debug)]
pub struct BindRequest {
    /// The local address, possibly a wildcard.
    pub addr: IpAddress,
    /// The proposed local port. Auto-selection is the caller's job.
    pub port: u16,
    /// The device the socket is bound to, if restricted.
    pub device: Option<InterfaceId>,
    /// Whether the socket permits sharing its address.
    pub reuse: bool,
    /// Whether the socket is (about to be) listening.
    pub listener: bool,
}

/// One socket's claim on a port.
#[derive(Clone, Copy, Debug, Default)]
pub struct PortOwner {
    port: u16,
    addr: IpAddress,
    device: Option<InterfaceId>,
    reuse: bool,
    listener: bool,
    owner: SlotKey,
}

/// Per-port bookkeeping, created on first bind and destroyed with the last owner.
#[derive(Clone, Copy, Debug, Default)]
pub struct PortBucket {
    port: u16,
    owners: usize,
    /// Every owner so far had reuse enabled and none was a listener.
    ///
    /// Set when the bucket is created, cleared when a non-qualifying owner joins, and never
    /// recomputed on release.
    fast_reuse: bool,
}

/// The bind-port table.
pub struct BindTable<'a> {
    owners: List<'a, PortOwner>,
    buckets: List<'a, PortBucket>,
}

impl<'a> BindTable<'a> {
    /// Create the table over caller-provided storage.
    pub fn new(owners: Slice<'a, PortOwner>, buckets: Slice<'a, PortBucket>) -> Self {
        BindTable {
            owners: List::new(owners),
            buckets: List::new(buckets),
        }
    }
}

impl BindTable<'_> {
    /// Validate and record a binding.
    ///
    /// Succeeds immediately when the port has no bucket yet, or on the fast path when every
    /// owner so far and the requester permit reuse. Otherwise the current owners are scanned for
    /// a conflicting address and device combination.
    pub fn reserve(&mut self, owner: SlotKey, request: &BindRequest) -> Result<()> {
        let qualifies_fast = request.reuse && !request.listener;

        match self.bucket_index(request.port) {
            None => {
                if self.buckets.is_full() || self.owners.is_full() {
                    return Err(Error::Exhausted);
                }

                *self.buckets.push().ok_or(Error::Exhausted)? = PortBucket {
                    port: request.port,
                    owners: 1,
                    fast_reuse: qualifies_fast,
                };
                self.push_owner(owner, request)
            }
            Some(idx) => {
                let fast_reuse = self.buckets[idx].fast_reuse;
                if !(fast_reuse && qualifies_fast) {
                    let conflict = self.owners.iter()
                        .filter(|entry| entry.port == request.port)
                        .any(|entry| Self::conflicts(entry, request));
                    if conflict {
                        return Err(Error::AddressInUse);
                    }
                }

                if self.owners.is_full() {
                    return Err(Error::Exhausted);
                }
                self.push_owner(owner, request)?;

                let bucket = &mut self.buckets[idx];
                bucket.owners += 1;
                if !qualifies_fast {
                    bucket.fast_reuse = false;
                }
                Ok(())
            }
        }
    }

    /// Drop a socket's claim, destroying the port bucket with the last owner.
    pub fn release(&mut self, owner: SlotKey, port: u16) {
        let position = self.owners.iter()
            .position(|entry| entry.port == port && entry.owner == owner);
        let position = match position {
            Some(position) => position,
            None => return,
        };
        self.owners.remove_at(position);

        if let Some(idx) = self.bucket_index(port) {
            let bucket = &mut self.buckets[idx];
            bucket.owners -= 1;
            if bucket.owners == 0 {
                self.buckets.remove_at(idx);
            }
        }
    }

    /// Whether the socket is the sole owner of its port.
    pub fn is_unique(&self, owner: SlotKey, port: u16) -> bool {
        let mut on_port = self.owners.iter().filter(|entry| entry.port == port);
        match (on_port.next(), on_port.next()) {
            (Some(entry), None) => entry.owner == owner,
            _ => false,
        }
    }

    /// Record that an owner turned into a listener.
    ///
    /// A listening owner disables the fast-reuse path for its port.
    pub fn mark_listening(&mut self, owner: SlotKey, port: u16) {
        for entry in self.owners.as_mut_slice() {
            if entry.port == port && entry.owner == owner {
                entry.listener = true;
            }
        }
        if let Some(idx) = self.bucket_index(port) {
            self.buckets[idx].fast_reuse = false;
        }
    }

    /// The number of owners currently bound to a port.
    pub fn owners_on(&self, port: u16) -> usize {
        match self.bucket_index(port) {
            Some(idx) => self.buckets[idx].owners,
            None => 0,
        }
    }

    fn bucket_index(&self, port: u16) -> Option<usize> {
        self.buckets.iter().position(|bucket| bucket.port == port)
    }

    fn push_owner(&mut self, owner: SlotKey, request: &BindRequest) -> Result<()> {
        *self.owners.push().ok_or(Error::Exhausted)? = PortOwner {
            port: request.port,
            addr: request.addr,
            device: request.device,
            reuse: request.reuse,
            listener: request.listener,
            owner,
        };
        Ok(())
    }

    /// The bind conflict tie-break.
    ///
    /// Two owners clash when they could receive the same traffic: same device (an unrestricted
    /// side matches everything), overlapping addresses, and at least one side either forbids
    /// reuse or listens.
    fn conflicts(entry: &PortOwner, request: &BindRequest) -> bool {
        let device_match = match (entry.device, request.device) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };

        device_match
            && (!entry.reuse || !request.reuse || entry.listener || request.listener)
            && (entry.addr.accepts(&request.addr) || request.addr.accepts(&entry.addr))
    }
}
