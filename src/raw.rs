//! Handles the actual memory finnicky details of reference counting.
//!
//! The raw handles are never null: nullability is layered on top by `SharedPtr` and `WeakPtr`.

use core::{marker::PhantomData, panic, ptr::NonNull};

use alloc::boxed::Box;

use crate::block::{self, BlockRef, DetachedBlock, InlineBlock};

/// Non-null strong handle, equivalent to Rc.
///
/// A strong handle is made of two distinct parts:
///
/// -   The block, which determines the lifetime of the managed object.
/// -   The pointer, which is what the handle observes: either the managed object itself, or an alias into it.
pub(crate) struct RawShared<T>
where
    T: ?Sized,
{
    block: BlockRef,
    ptr: NonNull<T>,
    _marker: PhantomData<T>,
}

/// Non-null weak handle, equivalent to Weak.
pub(crate) struct RawWeak<T>
where
    T: ?Sized,
{
    block: BlockRef,
    ptr: NonNull<T>,
    //  Whether this is the self-reference of an object, stored within said object.
    is_self_ref: bool,
}

//
//  Construction
//

impl<T> RawShared<T> {
    /// Allocates a single block, and moves `value` in.
    #[inline(always)]
    pub(crate) fn new(value: T) -> Self {
        let (block, ptr) = InlineBlock::allocate(value);

        //  Safety:
        //  -   Accounting: fresh block, with a strong count of 1.
        unsafe { Self::from_parts(block, ptr) }
    }
}

impl<T> RawShared<T>
where
    T: ?Sized,
{
    /// Takes over `value`, allocating a separate block.
    #[inline(always)]
    pub(crate) fn from_box(value: Box<T>) -> Self {
        let ptr = NonNull::from(Box::leak(value));

        //  Safety:
        //  -   Boxed: `ptr` was just obtained from `Box::leak`.
        let deleter = unsafe { block::box_deleter::<T>() };

        //  Safety:
        //  -   Deletable: `deleter` is suitable for a pointer obtained from `Box::leak`.
        //  -   Exclusive: `ptr` was just leaked, hence unique.
        //  -   Outlive: `deleter` borrows nothing.
        unsafe { Self::from_raw_with(ptr, deleter) }
    }

    /// Takes over `ptr`, allocating a separate block, and later releasing `ptr` with `deleter`.
    ///
    /// #   Safety
    ///
    /// -   Deletable: `deleter` SHALL be suitable to release `ptr`.
    /// -   Exclusive: `ptr` SHALL not be managed by any other handle, nor released by any other means.
    /// -   Outlive: `deleter` SHALL remain valid until invoked.
    #[inline(always)]
    pub(crate) unsafe fn from_raw_with<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        D: FnOnce(NonNull<T>),
    {
        let block = DetachedBlock::allocate(ptr, deleter);

        //  Safety:
        //  -   Accounting: fresh block, with a strong count of 1.
        unsafe { Self::from_parts(block, ptr) }
    }

    /// Shares the block of `other`, while observing `ptr`.
    ///
    /// #   Safety
    ///
    /// -   Valid: `ptr` SHALL remain valid for as long as the object managed by `other` is alive.
    #[inline(always)]
    pub(crate) unsafe fn alias<U>(other: &RawShared<U>, ptr: NonNull<T>) -> Self
    where
        U: ?Sized,
    {
        //  Safety:
        //  -   Lifetime: `other` keeps the block alive.
        let count = unsafe { other.block.count() };

        //  Safety:
        //  -   Accounting: the number of strong handles is increased by one.
        //  -   Alive: `other` is a strong handle.
        unsafe { count.increment_strong() };

        //  Safety:
        //  -   Accounting: accounted for above.
        unsafe { Self::from_parts(other.block, ptr) }
    }

    /// Constructs a new `RawWeak` pointer to this block.
    #[inline(always)]
    pub(crate) fn downgrade(this: &Self) -> RawWeak<T> {
        //  Safety:
        //  -   Lifetime: `this` keeps the block alive.
        let count = unsafe { this.block.count() };

        //  Safety:
        //  -   Accounting: the number of weak handles is increased by one.
        unsafe { count.increment_weak() };

        RawWeak {
            block: this.block,
            ptr: this.ptr,
            is_self_ref: false,
        }
    }

    //  Safety:
    //  -   Accounting: one unit of the strong count of `block` is transferred to the new instance.
    #[inline(always)]
    unsafe fn from_parts(block: BlockRef, ptr: NonNull<T>) -> Self {
        let _marker = PhantomData;

        Self { block, ptr, _marker }
    }
}

impl<T> RawWeak<T>
where
    T: ?Sized,
{
    /// Attempts to upgrade the `RawWeak` pointer to a `RawShared`.
    ///
    /// Returns `None` if the managed object has already been destroyed.
    #[inline(always)]
    pub(crate) fn upgrade(&self) -> Option<RawShared<T>> {
        //  Safety:
        //  -   Lifetime: `self` keeps the block alive.
        let count = unsafe { self.block.count() };

        //  Safety:
        //  -   Accounting: the number of strong handles is increased by one on success.
        let upgraded = unsafe { count.try_increment_strong() };

        //  Safety:
        //  -   Accounting: accounted for above.
        upgraded.then(|| unsafe { RawShared::from_parts(self.block, self.ptr) })
    }

    /// Marks this handle as the self-reference of the object it points to.
    #[inline(always)]
    pub(crate) fn into_self_ref(mut self) -> Self {
        self.is_self_ref = true;

        self
    }
}

//
//  Destruction
//

impl<T> Drop for RawShared<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        let block = self.block;

        //  Safety:
        //  -   Lifetime: the resulting reference will not be used after calling `decrement_strong`.
        let count = unsafe { block.count() };

        //  Safety:
        //  -   Once: invoked only when the strong count reaches 0, which only ever happens once.
        let destroy = move || unsafe { block.destroy() };

        //  Safety:
        //  -   EndOfLife: the block will no longer be accessed, since this was the last handle.
        let deallocate = move || unsafe { block.deallocate() };

        //  Safety:
        //  -   Accounting: one less strong instance exists after `drop`.
        unsafe { count.decrement_strong(destroy, deallocate) };
    }
}

impl<T> Drop for RawWeak<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        let block = self.block;

        if self.is_self_ref() {
            log::trace!("releasing self-reference to block {:?}", block);
        }

        //  Safety:
        //  -   Lifetime: the resulting reference will not be used after calling `decrement_weak`.
        let count = unsafe { block.count() };

        //  Safety:
        //  -   EndOfLife: the block will no longer be accessed, since this was the last handle.
        let deallocate = move || unsafe { block.deallocate() };

        //  Safety:
        //  -   Accounting: one less weak instance exists after `drop`.
        unsafe { count.decrement_weak(deallocate) };
    }
}

//
//  High-level Access
//

impl<T> RawShared<T>
where
    T: ?Sized,
{
    /// Returns the number of strong handles.
    #[inline(always)]
    pub(crate) fn strong_count(&self) -> usize {
        //  Safety:
        //  -   Lifetime: this handle guarantees that the count is alive, and will remain so as long this handle
        //      is borrowed.
        unsafe { self.block.count().strong_count() }
    }

    /// Returns the number of weak handles.
    #[inline(always)]
    pub(crate) fn weak_count(&self) -> usize {
        //  Safety:
        //  -   Lifetime: as per `strong_count`.
        unsafe { self.block.count().weak_count() }
    }

    /// Returns a reference to the observed value.
    #[inline(always)]
    pub(crate) fn as_ref(&self) -> &T {
        //  Safety:
        //  -   Convertible: this handle guarantees that the managed object is alive, and will remain so as long this
        //      handle is borrowed; the observed value is either the managed object or valid as long as it is.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> RawWeak<T>
where
    T: ?Sized,
{
    /// Returns the number of strong handles.
    #[inline(always)]
    pub(crate) fn strong_count(&self) -> usize {
        //  Safety:
        //  -   Lifetime: this handle guarantees that the count is alive, and will remain so as long this handle
        //      is borrowed.
        unsafe { self.block.count().strong_count() }
    }

    /// Returns the number of weak handles.
    #[inline(always)]
    pub(crate) fn weak_count(&self) -> usize {
        //  Safety:
        //  -   Lifetime: as per `strong_count`.
        unsafe { self.block.count().weak_count() }
    }

    /// Returns whether the managed object has been destroyed.
    #[inline(always)]
    pub(crate) fn is_expired(&self) -> bool {
        //  Safety:
        //  -   Lifetime: as per `strong_count`.
        unsafe { self.block.count().is_destroyed() }
    }

    /// Returns whether this is the self-reference of an object.
    #[inline(always)]
    pub(crate) fn is_self_ref(&self) -> bool {
        self.is_self_ref
    }
}

//
//  Low-level Access
//

impl<T> RawShared<T>
where
    T: ?Sized,
{
    /// Returns the pointer to the observed value.
    #[inline(always)]
    pub(crate) const fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }

    /// Returns the block.
    #[inline(always)]
    pub(crate) const fn block(&self) -> BlockRef {
        self.block
    }

    /// Returns the address of the managed object.
    #[inline(always)]
    pub(crate) fn managed(&self) -> NonNull<()> {
        //  Safety:
        //  -   Alive: this handle keeps the block alive.
        unsafe { self.block.managed() }
    }
}

impl<T> RawWeak<T>
where
    T: ?Sized,
{
    /// Returns the pointer to the observed value.
    ///
    /// The pointer MAY dangle.
    #[inline(always)]
    pub(crate) const fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }

    /// Returns the block.
    #[inline(always)]
    pub(crate) const fn block(&self) -> BlockRef {
        self.block
    }
}

//
//  Clone
//

impl<T> Clone for RawShared<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        //  Safety:
        //  -   Accounting & Alive: `self` is a strong handle, and a new strong handle is created.
        unsafe { Self::alias(self, self.ptr) }
    }
}

impl<T> Clone for RawWeak<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        //  Safety:
        //  -   Lifetime: `self` keeps the block alive.
        let count = unsafe { self.block.count() };

        //  Safety:
        //  -   Accounting: the number of weak handles is increased by one.
        unsafe { count.increment_weak() };

        //  A copy of the self-reference is an ordinary weak handle.
        Self {
            block: self.block,
            ptr: self.ptr,
            is_self_ref: false,
        }
    }
}

//
//  Marker traits
//

impl<T> panic::RefUnwindSafe for RawShared<T> where T: ?Sized + panic::RefUnwindSafe {}

impl<T> panic::UnwindSafe for RawShared<T> where T: ?Sized + panic::RefUnwindSafe {}

#[cfg(test)]
mod tests {
    use core::fmt::Debug;

    use super::*;

    #[test]
    fn decons_inline() {
        let _ = RawShared::new(value());
    }

    #[test]
    fn decons_boxed() {
        let _ = RawShared::from_box(Box::new(value()));
    }

    #[test]
    fn decons_boxed_unsized() {
        let boxed: Box<dyn Debug> = Box::new(value());

        let _ = RawShared::from_box(boxed);
    }

    #[test]
    fn decons_zst() {
        let _ = RawShared::new(());
        let _ = RawShared::from_box(Box::new(()));
    }

    #[test]
    fn clone() {
        let raw = RawShared::new(value());
        let clone = raw.clone();

        assert_eq!(2, raw.strong_count());
        assert_eq!(raw.as_non_null(), clone.as_non_null());
        assert!(raw.block() == clone.block());

        drop(raw);

        assert_eq!(1, clone.strong_count());
        assert_eq!("Hello, World!", clone.as_ref());
    }

    #[test]
    fn weak() {
        let raw = RawShared::new(value());
        let weak = RawShared::downgrade(&raw);

        assert_eq!(1, raw.strong_count());
        assert_eq!(1, raw.weak_count());
        assert!(!weak.is_expired());
        assert!(!weak.is_self_ref());

        {
            let strong = weak.upgrade().expect("still alive");

            assert_eq!(2, strong.strong_count());
            assert_eq!("Hello, World!", strong.as_ref());
        }

        assert_eq!(1, weak.strong_count());

        drop(raw);

        assert!(weak.is_expired());
        assert_eq!(0, weak.strong_count());
        assert_eq!(1, weak.weak_count());
        assert!(weak.upgrade().is_none());
        assert_eq!(0, weak.strong_count());
    }

    #[test]
    fn weak_clone_of_self_ref() {
        let raw = RawShared::new(value());
        let weak = RawShared::downgrade(&raw).into_self_ref();

        assert!(weak.is_self_ref());

        let clone = weak.clone();

        assert!(!clone.is_self_ref());
        assert_eq!(2, clone.weak_count());
        assert!(weak.block() == clone.block());

        //  Drop the self-reference first, while a strong handle remains.
        drop(weak);

        assert_eq!(1, clone.weak_count());

        drop(raw);

        assert!(clone.is_expired());
    }

    #[test]
    fn self_ref_outlives_object() {
        let raw = RawShared::new(value());
        let weak = RawShared::downgrade(&raw).into_self_ref();

        drop(raw);

        assert!(weak.is_expired());
        assert_eq!(1, weak.weak_count());

        //  Last handle: deallocates the block, or Miri reports a leak.
        drop(weak);
    }

    #[test]
    fn alias() {
        let raw = RawShared::new((value(), 42u32));
        let field = NonNull::from(&raw.as_ref().1);

        let alias = unsafe { RawShared::alias(&raw, field) };

        assert_eq!(2, raw.strong_count());
        assert_eq!(42, *alias.as_ref());
        assert_eq!(raw.managed(), alias.managed());

        drop(raw);

        assert_eq!(1, alias.strong_count());
        assert_eq!(42, *alias.as_ref());
    }

    //  Why a String?
    //
    //  Using a String is the cheapest way to ensure that the destructor is properly called: Miri will error out with
    //  a memory leak if it is not.
    fn value() -> String {
        String::from("Hello, World!")
    }
} // mod tests
