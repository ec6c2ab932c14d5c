//! An assortment of non-owning containers.
//!
//! All of these containers have some option to construct them from one (or more) slices of the
//! underlying types instead of allocating resources dynamically. The endpoint of this crate is
//! built exclusively on top of them, so that the maximum number of sockets, half-open requests
//! and table buckets is chosen by setup code and never changes afterwards.
mod map;
mod partial;
mod slice;
pub mod slotmap;

pub use self::map::{Bucket, Entry, HashMap, OccupiedEntry, VacantEntry};
pub use self::partial::Partial;
pub use self::slice::Slice;
pub use self::slotmap::{Key, Slot, SlotMap};

/// A sort of `Vec` on initialized data.
pub type List<'a, T> = Partial<Slice<'a, T>>;
