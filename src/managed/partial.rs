use core::ops::{Deref, DerefMut};

/// Refer to the initialized prefix of some container.
///
/// Useful to create a dynamically sized storage over a statically sized backing buffer. Contrary
/// to `Vec` the methods `push` and `pop` return a mutable reference to their element after they
/// have succeeded instead of operating on values, so the backing elements are reused rather than
/// dropped and recreated.
///
/// ```
/// # use tcpcore::managed::Partial;
/// let mut elements = [0; 16];
/// let mut storage = Partial::new(&mut elements[..]);
///
/// for el in 0..10 {
///     *storage.push().unwrap() = el;
/// }
/// ```
#[derive(Debug)]
pub struct Partial<C> {
    inner: C,
    end: usize,
}

impl<C> Partial<C> {
    /// Make an instance that initially refers to an empty part.
    pub fn new(container: C) -> Self {
        Partial {
            inner: container,
            end: 0,
        }
    }

    /// Get the claimed length.
    pub fn len(&self) -> usize {
        self.end
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }
}

impl<C, T> Partial<C>
    where C: Deref<Target=[T]>
{
    /// Check how many elements can be referred to at most.
    pub fn capacity(&self) -> usize {
        self.inner.len()
    }

    /// Check whether no further element can be pushed.
    pub fn is_full(&self) -> bool {
        self.end == self.inner.len()
    }

    /// Get the logically active elements as a slice.
    pub fn as_slice(&self) -> &[T] {
        &self.inner[..self.end]
    }

    /// Non-panicking element access.
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.as_slice().get(idx)
    }
}

impl<C, T> Partial<C>
    where C: Deref<Target=[T]> + DerefMut,
{
    /// Insert behind the last element.
    ///
    /// Returns a mutable reference to the (recycled) element on success and `None` when the
    /// backing storage is exhausted.
    pub fn push(&mut self) -> Option<&mut T> {
        let element = self.inner.get_mut(self.end)?;
        self.end += 1;
        Some(element)
    }

    /// Remove the last element.
    pub fn pop(&mut self) -> Option<&mut T> {
        let new_end = self.end.checked_sub(1)?;
        self.end = new_end;
        self.inner.get_mut(new_end)
    }

    /// Remove the element at a position, preserving the order of the remaining elements.
    pub fn remove_at(&mut self, pos: usize) -> Option<&mut T> {
        let new_end = self.end.checked_sub(1)?;
        let rotation = new_end.checked_sub(pos)?;
        self.inner
            .get_mut(pos..self.end)?
            .rotate_right(rotation);
        // Update. Not done before so that the state is consistent.
        self.end = new_end;
        // The range above proves the index, the removed element now sits at its end.
        self.inner.get_mut(new_end)
    }

    /// Get the logically active elements as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.inner[..self.end]
    }

    /// Non-panicking mutable element access.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.as_mut_slice().get_mut(idx)
    }
}

impl<C, T> Deref for Partial<C>
    where C: Deref<Target=[T]>
{
    type Target = [T];
    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<C, T> DerefMut for Partial<C>
    where C: Deref<Target=[T]> + DerefMut
{
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}
