use core::ops::{Deref, DerefMut};

/// A mutable slice of externally managed or owned data.
///
/// The borrowed variant makes it possible to hand storage to a structure without involving any
/// allocator, the owned variant exists for convenience when the `std` feature is enabled. All
/// interaction happens through `Deref`/`DerefMut` so the rest of the crate never needs to match
/// on the variants.
#[derive(Debug)]
pub enum Slice<'a, T> {
    /// Storage that lives somewhere else, for at least as long as this slice.
    Borrowed(&'a mut [T]),

    /// Storage owned by the slice itself.
    #[cfg(feature = "std")]
    Owned(Vec<T>),
}

impl<T> Slice<'_, T> {
    /// A slice with no elements.
    ///
    /// Useful as an inert default before real storage has been decided on.
    pub fn empty() -> Self {
        Slice::Borrowed(&mut [])
    }
}

impl<'a, T> From<&'a mut [T]> for Slice<'a, T> {
    fn from(slice: &'a mut [T]) -> Self {
        Slice::Borrowed(slice)
    }
}

#[cfg(feature = "std")]
impl<T> From<Vec<T>> for Slice<'_, T> {
    fn from(vec: Vec<T>) -> Self {
        Slice::Owned(vec)
    }
}

impl<T> Deref for Slice<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self {
            Slice::Borrowed(slice) => slice,
            #[cfg(feature = "std")]
            Slice::Owned(vec) => vec.as_slice(),
        }
    }
}

impl<T> DerefMut for Slice<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        match self {
            Slice::Borrowed(slice) => slice,
            #[cfg(feature = "std")]
            Slice::Owned(vec) => vec.as_mut_slice(),
        }
    }
}
