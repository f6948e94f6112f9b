//! The strong & weak counts of a control block.

use core::{cell::Cell, mem::ManuallyDrop};

/// Both a strong and a weak reference counts, plus the one-way "destroyed" transition.
///
/// The strong count represents the number of "strong" handles to the object, ie the number of instances of
/// `RawShared`. The object is destroyed when the strong count reaches 0.
///
/// The weak count represents the number of "weak" handles to the control block, ie the number of instances of
/// `RawWeak`. The control block is deallocated once the object is destroyed _and_ both counts are 0.
///
/// While the object is being destroyed, the block is pinned: an extra weak unit is held, so that weak handles dropped
/// by the destructor of the object itself never deallocate the block from underneath it.
#[derive(Debug)]
pub(crate) struct SharedCount {
    strong: Cell<usize>,
    weak: Cell<usize>,
    destroyed: Cell<bool>,
}

impl SharedCount {
    /// Constructs a count for a freshly created object, with a single strong handle.
    #[inline(always)]
    pub(crate) const fn new() -> Self {
        let strong = Cell::new(1);
        let weak = Cell::new(0);
        let destroyed = Cell::new(false);

        Self {
            strong,
            weak,
            destroyed,
        }
    }

    /// Returns the strong count, ie the number of strong handles.
    #[inline(always)]
    pub(crate) fn strong_count(&self) -> usize {
        self.strong.get()
    }

    /// Returns the weak count, ie the number of weak handles.
    #[inline(always)]
    pub(crate) fn weak_count(&self) -> usize {
        self.weak.get()
    }

    /// Returns whether the object has been destroyed.
    ///
    /// Once destroyed, the strong count is 0 and will remain so.
    #[inline(always)]
    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Increments the strong count.
    ///
    /// #   Safety
    ///
    /// -   Accounting: the caller guarantees that the incremented count faithfully represent the number of strong
    ///     handles.
    /// -   Alive: the object is not destroyed, which is guaranteed if a strong handle exists.
    #[inline(always)]
    pub(crate) unsafe fn increment_strong(&self) {
        debug_assert!(!self.is_destroyed());

        self.strong.set(self.strong.get() + 1);
    }

    /// Tries to increment the strong count, unless the object was already destroyed.
    ///
    /// Returns whether the increment succeeded.
    ///
    /// #   Safety
    ///
    /// -   Accounting: the caller guarantees that, on success, the incremented count faithfully represent the number
    ///     of strong handles.
    #[inline(always)]
    pub(crate) unsafe fn try_increment_strong(&self) -> bool {
        if self.is_destroyed() {
            debug_assert_eq!(0, self.strong.get());

            return false;
        }

        self.strong.set(self.strong.get() + 1);

        true
    }

    /// Decrements the strong count.
    ///
    /// On reaching 0, invokes `destroy` exactly once, then `deallocate` if no weak handle remains.
    ///
    /// #   Safety
    ///
    /// -   Accounting: the caller guarantees that the decremented count faithfully represent the number of strong
    ///     handles.
    #[inline]
    pub(crate) unsafe fn decrement_strong<D, DA>(&self, destroy: D, deallocate: DA)
    where
        D: FnOnce(),
        DA: FnOnce(),
    {
        debug_assert!(self.strong.get() > 0);

        let strong = self.strong.get() - 1;
        self.strong.set(strong);

        if strong > 0 {
            return;
        }

        //  Safety:
        //  -   Accounting: strong count reached 0.
        unsafe { self.destroy(destroy, deallocate) };
    }

    /// Increments the weak count.
    ///
    /// #   Safety
    ///
    /// -   Accounting: the caller guarantees that the incremented count faithfully represent the number of weak
    ///     handles.
    #[inline(always)]
    pub(crate) unsafe fn increment_weak(&self) {
        self.weak.set(self.weak.get() + 1);
    }

    /// Decrements the weak count.
    ///
    /// Invokes `deallocate` if the object is destroyed and no handle remains.
    ///
    /// The self-reference of an object is no different: released by the destructor of the object, it finds the block
    /// pinned and leaves it be; released later, for example by an object which outlived its block, it deallocates the
    /// block like any last weak handle would.
    ///
    /// #   Safety
    ///
    /// -   Accounting: the caller guarantees that the decremented count faithfully represents the number of weak
    ///     handles.
    #[inline]
    pub(crate) unsafe fn decrement_weak<DA>(&self, deallocate: DA)
    where
        DA: FnOnce(),
    {
        debug_assert!(self.weak.get() > 0);

        let weak = self.weak.get() - 1;
        self.weak.set(weak);

        if weak > 0 || !self.is_destroyed() {
            return;
        }

        debug_assert_eq!(0, self.strong.get());

        //  Safety:
        //  -   Accounting: both counts reached 0.
        unsafe { self.deallocate(deallocate) };
    }
}

//
//  Implementation
//

impl SharedCount {
    //  Safety:
    //  -   Accounting: should only be invoked when `self.strong` reaches 0.
    #[inline(never)]
    unsafe fn destroy<D, DA>(&self, destroy: D, deallocate: DA)
    where
        D: FnOnce(),
        DA: FnOnce(),
    {
        //  Ensure the block is unpinned, and possibly deallocated, even if the destructor panics.
        struct PinGuard<'a, DA>
        where
            DA: FnOnce(),
        {
            count: &'a SharedCount,
            deallocate: ManuallyDrop<DA>,
        }

        impl<DA> Drop for PinGuard<'_, DA>
        where
            DA: FnOnce(),
        {
            fn drop(&mut self) {
                //  Safety:
                //  -   EndOfLife: last use.
                let deallocate = unsafe { ManuallyDrop::take(&mut self.deallocate) };

                let weak = self.count.weak.get() - 1;
                self.count.weak.set(weak);

                if weak > 0 {
                    return;
                }

                //  Safety:
                //  -   Accounting: both counts reached 0, and the object is destroyed.
                unsafe { self.count.deallocate(deallocate) };
            }
        }

        debug_assert!(!self.is_destroyed());

        self.destroyed.set(true);
        self.weak.set(self.weak.get() + 1);

        let _guard = PinGuard {
            count: self,
            deallocate: ManuallyDrop::new(deallocate),
        };

        destroy();
    }

    //  Safety:
    //  -   Accounting: should only be invoked when both counts reached 0, after destruction.
    #[inline(never)]
    unsafe fn deallocate<DA>(&self, deallocate: DA)
    where
        DA: FnOnce(),
    {
        deallocate();
    }
}

// mod tests
