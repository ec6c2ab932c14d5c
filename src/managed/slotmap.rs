//! A slotmap based on external memory.
//!
//! A slotmap provides a `Vec`-like interface where each entry is associated with a stable
//! index-like key. Lookup with the key will detect if an entry has been removed but does not
//! require any lifetime relation. This is the ownership model used for socket records: tables and
//! timers refer to a record through its [`Key`] and can never observe freed or recycled state,
//! since recycling a slot advances its generation and invalidates all previous keys.
//!
//! [`Key`]: struct.Key.html
use super::Slice;

/// Provides links between slots and elements.
///
/// The benefit of separating this struct from the elements is that it is unconditionally `Copy`
/// and `Default`, so backing storage for it is trivial to create.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Slot {
    /// The generation of the element in this slot.
    ///
    /// `0` while the slot is vacant. A key carrying a generation different from the slot's
    /// current one refers to a previous, removed element and fails lookup.
    generation: u32,

    /// Next entry of the intrusive free list, when vacant.
    next_free: usize,
}

/// Provides a slotmap based on external memory.
///
/// The slotmap does not create the storage of its own elements, it merely manages one given to it
/// at construction time.
///
/// ```
/// # use tcpcore::managed::{Slice, SlotMap, Slot};
/// let mut elements = [0usize; 1024];
/// let mut slots = [Slot::default(); 1024];
///
/// let mut map = SlotMap::new(
///     Slice::Borrowed(&mut elements[..]),
///     Slice::Borrowed(&mut slots[..]));
/// let index = map.insert(42).unwrap();
/// assert_eq!(map.get(index).cloned(), Some(42));
/// ```
pub struct SlotMap<'a, T> {
    elements: Slice<'a, T>,
    slots: Slice<'a, Slot>,
    /// Head of the free list, `NO_FREE` when it is empty.
    free_top: usize,
    /// Slots at indices beyond this have never been used.
    watermark: usize,
    /// Generation for the next insertion. Strictly positive.
    generation: u32,
    len: usize,
}

/// An index into a slotmap.
///
/// The index remains valid until the entry is removed. Accessing the slotmap with the key of a
/// removed entry fails, even if the slot where the element was previously stored has been reused
/// for another element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Key {
    idx: usize,
    generation: u32,
}

const NO_FREE: usize = usize::max_value();

impl<'a, T> SlotMap<'a, T> {
    /// Create a slotmap over the given element and slot storage.
    ///
    /// The usable capacity is the shorter of the two slices.
    pub fn new(elements: Slice<'a, T>, slots: Slice<'a, Slot>) -> Self {
        SlotMap {
            elements,
            slots,
            free_top: NO_FREE,
            watermark: 0,
            generation: 1,
            len: 0,
        }
    }
}

impl<T> SlotMap<'_, T> {
    /// The number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.elements.len().min(self.slots.len())
    }

    /// Retrieve a value by key.
    pub fn get(&self, index: Key) -> Option<&T> {
        let slot = self.slots.get(index.idx)?;
        if slot.generation != index.generation || slot.generation == 0 {
            return None;
        }
        self.elements.get(index.idx)
    }

    /// Retrieve a mutable value by key.
    pub fn get_mut(&mut self, index: Key) -> Option<&mut T> {
        let slot = self.slots.get(index.idx)?;
        if slot.generation != index.generation || slot.generation == 0 {
            return None;
        }
        self.elements.get_mut(index.idx)
    }

    /// Reserve a new entry, returning its key and a reference for initialization.
    ///
    /// The element behind the reference holds whatever value the slot contained previously, the
    /// caller is expected to overwrite it.
    pub fn reserve(&mut self) -> Option<(Key, &mut T)> {
        let idx = match self.free_top {
            NO_FREE => {
                if self.watermark >= self.capacity() {
                    return None;
                }
                let idx = self.watermark;
                self.watermark += 1;
                idx
            }
            idx => {
                self.free_top = self.slots[idx].next_free;
                idx
            }
        };

        let generation = self.generation;
        // Never hand out generation 0, it marks vacancy.
        self.generation = self.generation.wrapping_add(1).max(1);
        self.slots[idx] = Slot { generation, next_free: NO_FREE };
        self.len += 1;

        let key = Key { idx, generation };
        Some((key, &mut self.elements[idx]))
    }

    /// Sugar wrapper around `reserve` for inserting values.
    pub fn insert(&mut self, value: T) -> Option<Key> {
        let (key, element) = self.reserve()?;
        *element = value;
        Some(key)
    }

    /// Remove an element.
    ///
    /// If successful, return a mutable reference to the removed element so the caller can salvage
    /// its contents. Returns `None` if the key does not refer to a live element.
    pub fn remove(&mut self, index: Key) -> Option<&mut T> {
        let _ = self.get(index)?;

        self.slots[index.idx] = Slot {
            generation: 0,
            next_free: self.free_top,
        };
        self.free_top = index.idx;
        self.len -= 1;

        Some(&mut self.elements[index.idx])
    }

    /// Iterate over all live entries.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        let slots = &self.slots[..self.watermark];
        let elements = &self.elements[..self.watermark];
        slots.iter()
            .zip(elements.iter())
            .enumerate()
            .filter(|(_, (slot, _))| slot.generation != 0)
            .map(|(idx, (slot, element))| {
                (Key { idx, generation: slot.generation }, element)
            })
    }

    /// Iterate mutably over all live entries.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Key, &mut T)> {
        let slots = &self.slots[..self.watermark];
        let elements = &mut self.elements[..self.watermark];
        slots.iter()
            .zip(elements.iter_mut())
            .enumerate()
            .filter(|(_, (slot, _))| slot.generation != 0)
            .map(|(idx, (slot, element))| {
                (Key { idx, generation: slot.generation }, element)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::Slice;

    #[test]
    fn simple() {
        let mut elements = [0u32; 2];
        let mut slots = [Slot::default(); 2];

        let mut map = SlotMap::new(
            Slice::Borrowed(&mut elements[..]),
            Slice::Borrowed(&mut slots[..]));
        let key42 = map.insert(42).unwrap();
        let keylo = map.insert('K' as _).unwrap();

        assert_eq!(map.insert(0x9999), None);
        assert_eq!(map.get(key42).cloned(), Some(42));
        assert_eq!(map.get(keylo).cloned(), Some('K' as _));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn retained() {
        let mut elements = [0u32; 1];
        let mut slots = [Slot::default(); 1];

        let mut map = SlotMap::new(
            Slice::Borrowed(&mut elements[..]),
            Slice::Borrowed(&mut slots[..]));
        let key = map.insert(0xde).unwrap();
        map.remove(key).unwrap();
        assert_eq!(map.get(key), None);

        let new_key = map.insert(0xad).unwrap();

        // The slot was recycled but the stale key stays invalid.
        assert_eq!(map.get(key), None);
        assert_eq!(map.get(new_key).cloned(), Some(0xad));

        assert!(map.remove(key).is_none());
        map.remove(new_key).unwrap();

        assert_eq!(map.get(key), None);
        assert_eq!(map.get(new_key), None);
        assert!(map.is_empty());
    }

    #[test]
    fn iteration() {
        let mut elements = [0u32; 4];
        let mut slots = [Slot::default(); 4];

        let mut map = SlotMap::new(
            Slice::Borrowed(&mut elements[..]),
            Slice::Borrowed(&mut slots[..]));
        let keys: [_; 4] = [
            map.insert(0).unwrap(),
            map.insert(1).unwrap(),
            map.insert(2).unwrap(),
            map.insert(3).unwrap(),
        ];
        map.remove(keys[1]).unwrap();

        let live: std::vec::Vec<_> = map.iter().map(|(_, el)| *el).collect();
        assert_eq!(live, [0, 2, 3]);

        for (key, el) in map.iter_mut() {
            assert!(key != keys[1]);
            *el += 10;
        }
        assert_eq!(map.get(keys[3]).cloned(), Some(13));
    }
}
