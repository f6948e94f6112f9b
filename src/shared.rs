//! The strong handle, `SharedPtr<T>`.
//!
//! Like `Rc<T>`, most functions are associated functions rather than methods, to avoid shadowing the methods of `T`
//! reachable through `Deref`.

use core::{
    convert, fmt, hash, mem, ops,
    ptr::{self, NonNull},
};

use alloc::boxed::Box;

use crate::{raw::RawShared, BadWeakPtr, EnableSharedFromThis, WeakPtr};

/// A single-threaded reference-counted pointer, which may be null.
///
/// A non-null `SharedPtr` is made of two parts:
///
/// -   The control block it shares with all other handles of the same managed object, which determines how long this
///     object lives.
/// -   The pointer it observes, which is the managed object itself, unless the `SharedPtr` was obtained by aliasing.
///
/// The managed object is destroyed when the last `SharedPtr` sharing its control block is dropped, regardless of the
/// number of `WeakPtr` remaining; the control block itself is released once the last `WeakPtr` is dropped too.
pub struct SharedPtr<T>
where
    T: ?Sized,
{
    inner: Option<RawShared<T>>,
}

//
//  Conversion
//

impl<T> SharedPtr<T>
where
    T: ?Sized,
{
    #[inline(always)]
    pub(crate) const fn from_inner(inner: Option<RawShared<T>>) -> Self {
        Self { inner }
    }
}

//
//  Construction
//

impl<T> SharedPtr<T>
where
    T: ?Sized,
{
    /// Constructs a null `SharedPtr`.
    #[inline(always)]
    pub const fn null() -> Self {
        Self::from_inner(None)
    }
}

impl<T> SharedPtr<T> {
    /// Allocates a single memory block on the heap, containing both the control block and `value`.
    ///
    /// Exactly one allocation is performed.
    ///
    /// The self-reference of a `value` implementing `EnableSharedFromThis` is left uninstalled, hence
    /// `shared_from_this` fails on it. Use `new_shared_from_this` instead, or install it after the fact with
    /// `enable_shared_from_this`.
    #[inline(always)]
    pub fn new(value: T) -> Self {
        Self::from_inner(Some(RawShared::new(value)))
    }
}

impl<T> SharedPtr<T>
where
    T: ?Sized,
{
    /// Takes over the boxed `value`, allocating a separate control block.
    ///
    /// Exactly one allocation is performed, on top of the allocation of the `Box`.
    ///
    /// As with `new`, the self-reference of an `EnableSharedFromThis` value is left uninstalled: see
    /// `from_box_shared_from_this`.
    #[inline(always)]
    pub fn from_box(value: Box<T>) -> Self {
        Self::from_inner(Some(RawShared::from_box(value)))
    }

    /// Takes over `ptr`, allocating a separate control block.
    ///
    /// Returns a null `SharedPtr` if `ptr` is null, without allocating.
    ///
    /// #   Safety
    ///
    /// -   Boxed: `ptr` SHALL be null, or have been obtained from `Box::into_raw` or `Box::leak`.
    /// -   Exclusive: `ptr` SHALL not be managed by any other `SharedPtr` control block, nor released by any other
    ///     means. Adopting the same pointer twice is not detected.
    #[inline(always)]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        let Some(ptr) = NonNull::new(ptr) else {
            return Self::null();
        };

        //  Safety:
        //  -   Boxed: as per pre-condition.
        let boxed = unsafe { Box::from_raw(ptr.as_ptr()) };

        Self::from_box(boxed)
    }

    /// Takes over `ptr`, allocating a separate control block, and releasing `ptr` with `deleter` once the last strong
    /// handle is dropped.
    ///
    /// The deleter is stored alongside `ptr` in a `CompressedPair`: a zero-sized deleter costs no memory.
    ///
    /// #   Safety
    ///
    /// -   Valid: `ptr` SHALL be valid for reads until `deleter` is invoked.
    /// -   Deletable: `deleter` SHALL be suitable to release `ptr`.
    /// -   Exclusive: `ptr` SHALL not be managed by any other `SharedPtr` control block, nor released by any other
    ///     means.
    /// -   Outlive: `deleter`, and anything it borrows, SHALL remain valid until it is invoked, even though the
    ///     resulting `SharedPtr` does not carry its lifetime.
    #[inline(always)]
    pub unsafe fn from_raw_with<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        D: FnOnce(NonNull<T>),
    {
        //  Safety:
        //  -   Deletable, Exclusive & Outlive: as per pre-condition.
        let inner = unsafe { RawShared::from_raw_with(ptr, deleter) };

        Self::from_inner(Some(inner))
    }

    /// Constructs a `SharedPtr` sharing the control block of `other`, but observing `ptr`.
    ///
    /// The object managed by `other` is kept alive for as long as the result, or any of its copies, is.
    ///
    /// Returns a null `SharedPtr` if `other` is null.
    ///
    /// #   Safety
    ///
    /// -   Valid: `ptr` SHALL remain valid for reads for as long as the object managed by `other` is alive.
    /// -   SelfRef: if `T` implements `EnableSharedFromThis`, and `ptr` does not point within the object managed by
    ///     `other`, `SharedPtr::enable_shared_from_this` SHALL NOT be invoked on the result.
    #[inline(always)]
    pub unsafe fn aliasing<U>(other: &SharedPtr<U>, ptr: NonNull<T>) -> Self
    where
        U: ?Sized,
    {
        //  Safety:
        //  -   Valid: as per pre-condition.
        let inner = other.inner.as_ref().map(|other| unsafe { RawShared::alias(other, ptr) });

        Self::from_inner(inner)
    }

    /// Constructs a `SharedPtr` sharing the control block of `this`, but observing a part of its value.
    ///
    /// This is the safe form of `SharedPtr::aliasing`, and may also be used to convert to a trait object.
    ///
    /// Returns a null `SharedPtr` if `this` is null.
    #[inline]
    pub fn project<U, F>(this: &Self, project: F) -> SharedPtr<U>
    where
        U: ?Sized,
        F: for<'a> FnOnce(&'a T) -> &'a U,
    {
        let inner = this.inner.as_ref().map(|inner| {
            let ptr = NonNull::from(project(inner.as_ref()));

            //  Safety:
            //  -   Valid: `ptr` was derived from a reference to the value, by a function which cannot capture any
            //      shorter lived reference, hence it is valid for as long as the value is.
            unsafe { RawShared::alias(inner, ptr) }
        });

        SharedPtr::from_inner(inner)
    }

    /// Attempts to promote `weak` into a strong handle.
    ///
    /// Returns an error if `weak` is null, or if its managed object has already been destroyed. Use `WeakPtr::lock`
    /// for a non-failing version returning a null `SharedPtr` instead.
    #[inline]
    pub fn promote(weak: &WeakPtr<T>) -> Result<Self, BadWeakPtr> {
        let inner = WeakPtr::as_inner(weak).and_then(|weak| weak.upgrade()).ok_or(BadWeakPtr)?;

        Ok(Self::from_inner(Some(inner)))
    }

    /// Constructs a new `WeakPtr` to the managed object.
    ///
    /// Returns a null `WeakPtr` if `this` is null.
    #[inline]
    pub fn downgrade(this: &Self) -> WeakPtr<T> {
        let inner = this.inner.as_ref().map(RawShared::downgrade);

        WeakPtr::from_inner(inner)
    }
}

impl<T> SharedPtr<T>
where
    T: EnableSharedFromThis,
{
    /// Allocates a single memory block containing both the control block and `value`, then installs the
    /// self-reference of `value`.
    #[inline]
    pub fn new_shared_from_this(value: T) -> Self {
        let this = Self::new(value);

        Self::enable_shared_from_this(&this);

        this
    }

    /// Takes over the boxed `value`, then installs the self-reference of `value`.
    #[inline]
    pub fn from_box_shared_from_this(value: Box<T>) -> Self {
        let this = Self::from_box(value);

        Self::enable_shared_from_this(&this);

        this
    }

    /// Installs the self-reference of the observed value, unless already installed.
    ///
    /// Only the first installation is kept: an object which already knows its control block is left untouched.
    ///
    /// Does nothing if `this` is null.
    #[inline]
    pub fn enable_shared_from_this(this: &Self) {
        if let Some(inner) = &this.inner {
            inner.as_ref().self_ref().install(inner);
        }
    }
}

//
//  Modifiers
//

impl<T> SharedPtr<T>
where
    T: ?Sized,
{
    /// Releases the managed object, if any, leaving `this` null.
    #[inline(always)]
    pub fn reset(this: &mut Self) {
        this.inner = None;
    }

    /// Releases the managed object, if any, then takes over the boxed `value`.
    #[inline]
    pub fn reset_box(this: &mut Self, value: Box<T>) {
        *this = Self::from_box(value);
    }

    /// Releases the managed object, if any, then takes over `ptr`.
    ///
    /// #   Safety
    ///
    /// -   As per `SharedPtr::from_raw`.
    #[inline]
    pub unsafe fn reset_raw(this: &mut Self, ptr: *mut T) {
        //  Safety:
        //  -   As per pre-condition.
        *this = unsafe { Self::from_raw(ptr) };
    }

    /// Swaps the managed objects, and observed pointers, of `this` and `other`.
    #[inline(always)]
    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(&mut this.inner, &mut other.inner);
    }

    /// Moves out of `this`, leaving it null.
    #[inline(always)]
    pub fn take(this: &mut Self) -> Self {
        Self::from_inner(this.inner.take())
    }
}

//
//  Observers
//

impl<T> SharedPtr<T>
where
    T: ?Sized,
{
    /// Returns a reference to the observed value, or `None` if `this` is null.
    #[inline(always)]
    pub fn get(this: &Self) -> Option<&T> {
        this.inner.as_ref().map(RawShared::as_ref)
    }

    /// Returns a pointer to the observed value, or `None` if `this` is null.
    #[inline(always)]
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.inner.as_ref().map(RawShared::as_non_null)
    }

    /// Returns the address of the managed object, or `None` if `this` is null.
    ///
    /// For an aliasing `SharedPtr`, this is the address of the object kept alive, not the address observed.
    #[inline(always)]
    pub fn managed_ptr(this: &Self) -> Option<NonNull<()>> {
        this.inner.as_ref().map(RawShared::managed)
    }

    /// Returns the number of strong handles sharing the control block, or 0 if `this` is null.
    #[inline(always)]
    pub fn use_count(this: &Self) -> usize {
        this.inner.as_ref().map_or(0, RawShared::strong_count)
    }

    /// Returns the number of weak handles sharing the control block, or 0 if `this` is null.
    #[inline(always)]
    pub fn weak_count(this: &Self) -> usize {
        this.inner.as_ref().map_or(0, RawShared::weak_count)
    }

    /// Returns whether `this` is null.
    #[inline(always)]
    pub const fn is_null(this: &Self) -> bool {
        this.inner.is_none()
    }

    /// Returns whether `this` and `other` observe the same address.
    ///
    /// This is also what `==` compares.
    #[inline(always)]
    pub fn ptr_eq<U>(this: &Self, other: &SharedPtr<U>) -> bool
    where
        U: ?Sized,
    {
        Self::address(this) == SharedPtr::address(other)
    }

    /// Returns whether `this` and `other` share the same control block, ie keep the same object alive.
    ///
    /// Two null `SharedPtr` are considered to share the same (absent) control block.
    #[inline(always)]
    pub fn owner_eq<U>(this: &Self, other: &SharedPtr<U>) -> bool
    where
        U: ?Sized,
    {
        let this = this.inner.as_ref().map(RawShared::block);
        let other = other.inner.as_ref().map(RawShared::block);

        this == other
    }

    fn address(this: &Self) -> Option<NonNull<()>> {
        Self::as_ptr(this).map(NonNull::cast)
    }
}

//
//  Clone
//

impl<T> Clone for SharedPtr<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        Self::from_inner(self.inner.clone())
    }

    fn clone_from(&mut self, source: &Self) {
        let same = match (&self.inner, &source.inner) {
            (Some(this), Some(source)) => {
                this.block() == source.block() && ptr::addr_eq(this.as_non_null().as_ptr(), source.as_non_null().as_ptr())
            }
            (None, None) => true,
            _ => false,
        };

        if same {
            return;
        }

        //  Clone before releasing: `source` may be owned by the object `self` is about to release.
        *self = source.clone();
    }
}

impl<T> Default for SharedPtr<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<Box<T>> for SharedPtr<T>
where
    T: ?Sized,
{
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T> TryFrom<&WeakPtr<T>> for SharedPtr<T>
where
    T: ?Sized,
{
    type Error = BadWeakPtr;

    fn try_from(weak: &WeakPtr<T>) -> Result<Self, BadWeakPtr> {
        Self::promote(weak)
    }
}

//
//  Value Access
//

impl<T> ops::Deref for SharedPtr<T>
where
    T: ?Sized,
{
    type Target = T;

    /// Returns a reference to the observed value.
    ///
    /// #   Panics
    ///
    /// If `self` is null. Use `SharedPtr::get` to handle null pointers gracefully.
    #[track_caller]
    fn deref(&self) -> &T {
        match Self::get(self) {
            Some(value) => value,
            None => panic!("dereferenced a null SharedPtr"),
        }
    }
}

impl<T> convert::AsRef<T> for SharedPtr<T>
where
    T: ?Sized,
{
    #[track_caller]
    fn as_ref(&self) -> &T {
        self
    }
}

//
//  Formatting
//

impl<T> fmt::Debug for SharedPtr<T>
where
    T: ?Sized + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match Self::get(self) {
            Some(value) => f.debug_tuple("SharedPtr").field(&value).finish(),
            None => f.write_str("SharedPtr(null)"),
        }
    }
}

impl<T> fmt::Pointer for SharedPtr<T>
where
    T: ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match Self::address(self) {
            Some(address) => fmt::Pointer::fmt(&address, f),
            None => fmt::Pointer::fmt(&ptr::null::<()>(), f),
        }
    }
}

//
//  Identity
//

impl<T> Eq for SharedPtr<T> where T: ?Sized {}

impl<T, U> PartialEq<SharedPtr<U>> for SharedPtr<T>
where
    T: ?Sized,
    U: ?Sized,
{
    #[inline(always)]
    fn eq(&self, other: &SharedPtr<U>) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T> hash::Hash for SharedPtr<T>
where
    T: ?Sized,
{
    #[inline(always)]
    fn hash<HS>(&self, hasher: &mut HS)
    where
        HS: hash::Hasher,
    {
        Self::address(self).hash(hasher);
    }
}

// mod tests
