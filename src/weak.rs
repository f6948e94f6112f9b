//! The weak handle, `WeakPtr<T>`.

use core::{fmt, mem, ptr};

use crate::{raw::RawWeak, SharedPtr};

/// A non-owning observer of an object managed by `SharedPtr`, which may be null.
///
/// A `WeakPtr` keeps the control block alive, but not the managed object: it cannot be dereferenced, and must instead
/// be locked, or promoted, into a `SharedPtr`, which fails once the managed object has been destroyed.
pub struct WeakPtr<T>
where
    T: ?Sized,
{
    inner: Option<RawWeak<T>>,
}

//
//  Conversion
//

impl<T> WeakPtr<T>
where
    T: ?Sized,
{
    #[inline(always)]
    pub(crate) const fn from_inner(inner: Option<RawWeak<T>>) -> Self {
        Self { inner }
    }

    #[inline(always)]
    pub(crate) const fn as_inner(this: &Self) -> Option<&RawWeak<T>> {
        this.inner.as_ref()
    }
}

//
//  Construction
//

impl<T> WeakPtr<T>
where
    T: ?Sized,
{
    /// Constructs a null `WeakPtr`, which is always expired.
    #[inline(always)]
    pub const fn new() -> Self {
        Self::from_inner(None)
    }
}

impl<T> From<&SharedPtr<T>> for WeakPtr<T>
where
    T: ?Sized,
{
    fn from(shared: &SharedPtr<T>) -> Self {
        SharedPtr::downgrade(shared)
    }
}

impl<T> Clone for WeakPtr<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        Self::from_inner(self.inner.clone())
    }

    fn clone_from(&mut self, source: &Self) {
        if self.ptr_eq(source) && self.owner_eq(source) {
            return;
        }

        *self = source.clone();
    }
}

impl<T> Default for WeakPtr<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

//
//  Modifiers
//

impl<T> WeakPtr<T>
where
    T: ?Sized,
{
    /// Releases the control block, if any, leaving `self` null.
    #[inline(always)]
    pub fn reset(&mut self) {
        self.inner = None;
    }

    /// Swaps the control blocks, and observed pointers, of `self` and `other`.
    #[inline(always)]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.inner, &mut other.inner);
    }

    /// Moves out of `self`, leaving it null.
    #[inline(always)]
    pub fn take(&mut self) -> Self {
        Self::from_inner(self.inner.take())
    }
}

//
//  Observers
//

impl<T> WeakPtr<T>
where
    T: ?Sized,
{
    /// Returns the number of strong handles to the managed object, or 0 if `self` is null.
    ///
    /// This is informational only: a positive count does not by itself keep the object alive.
    #[inline(always)]
    pub fn use_count(&self) -> usize {
        self.inner.as_ref().map_or(0, RawWeak::strong_count)
    }

    /// Returns the number of weak handles sharing the control block, or 0 if `self` is null.
    #[inline(always)]
    pub fn weak_count(&self) -> usize {
        self.inner.as_ref().map_or(0, RawWeak::weak_count)
    }

    /// Returns whether `self` is null, or its managed object has already been destroyed.
    #[inline(always)]
    pub fn expired(&self) -> bool {
        self.inner.as_ref().map_or(true, RawWeak::is_expired)
    }

    /// Attempts to obtain a strong handle to the managed object.
    ///
    /// Returns a null `SharedPtr` if `self` is expired, in which case no count is modified. Use `SharedPtr::promote`
    /// for a failing version instead.
    #[inline]
    pub fn lock(&self) -> SharedPtr<T> {
        let inner = self.inner.as_ref().and_then(RawWeak::upgrade);

        SharedPtr::from_inner(inner)
    }

    /// Returns whether `self` and `other` observe the same address.
    ///
    /// Two null `WeakPtr` observe the same (absent) address. The address of an expired `WeakPtr` remains comparable.
    #[inline(always)]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        let this = self.inner.as_ref().map(|inner| inner.as_non_null().as_ptr());
        let other = other.inner.as_ref().map(|inner| inner.as_non_null().as_ptr());

        match (this, other) {
            (Some(this), Some(other)) => ptr::addr_eq(this, other),
            (None, None) => true,
            _ => false,
        }
    }

    /// Returns whether `self` and `other` share the same control block.
    ///
    /// Two null `WeakPtr` are considered to share the same (absent) control block.
    #[inline(always)]
    pub fn owner_eq<U>(&self, other: &WeakPtr<U>) -> bool
    where
        U: ?Sized,
    {
        let this = self.inner.as_ref().map(RawWeak::block);
        let other = other.inner.as_ref().map(RawWeak::block);

        this == other
    }
}

//
//  Formatting
//

impl<T> fmt::Debug for WeakPtr<T>
where
    T: ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "(WeakPtr)")
    }
}

// mod tests
