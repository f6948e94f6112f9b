//! A pair which takes no space for zero-sized elements.
//!
//! Zero-sized fields are already laid out at no cost, hence the pair is a plain struct: it exists to name the pattern,
//! and to give each slot independent access.

/// A two-slot aggregate, which elides storage for zero-sized slots.
///
/// The detached control block stores its deleter and its pointer in such a pair, so that the default deleter, being
/// zero-sized, costs nothing.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CompressedPair<F, S> {
    first: F,
    second: S,
}

impl<F, S> CompressedPair<F, S> {
    /// Constructs a new pair.
    #[inline(always)]
    pub const fn new(first: F, second: S) -> Self {
        Self { first, second }
    }

    /// Returns a reference to the first element.
    #[inline(always)]
    pub const fn first(&self) -> &F {
        &self.first
    }

    /// Returns a mutable reference to the first element.
    #[inline(always)]
    pub fn first_mut(&mut self) -> &mut F {
        &mut self.first
    }

    /// Returns a reference to the second element.
    #[inline(always)]
    pub const fn second(&self) -> &S {
        &self.second
    }

    /// Returns a mutable reference to the second element.
    #[inline(always)]
    pub fn second_mut(&mut self) -> &mut S {
        &mut self.second
    }

    /// Returns mutable references to both elements at once.
    #[inline(always)]
    pub fn split_mut(&mut self) -> (&mut F, &mut S) {
        (&mut self.first, &mut self.second)
    }

    /// Deconstructs the pair.
    #[inline(always)]
    pub fn into_inner(self) -> (F, S) {
        (self.first, self.second)
    }
}

// mod tests
