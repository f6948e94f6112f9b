//! The control blocks, and their type-erased handle.
//!
//! A control block is made of two parts:
//!
//! -   A type-erased header, `BlockHeader`, containing the counts and a pointer to the type-specific operations.
//! -   A type-specific tail, either the detached pointer & its deleter, or the inline object itself.
//!
//! Both variants are `#[repr(C)]` with the header first, so that a pointer to the block is a pointer to its header.
//!
//! ```txt
//! DetachedBlock:  +--------+--------+-----------------+          +--------+
//!                 | counts | vtable | deleter | ptr --+--------> | object |
//!                 +--------+--------+-----------------+          +--------+
//!
//! InlineBlock:    +--------+--------+--------+
//!                 | counts | vtable | object |
//!                 +--------+--------+--------+
//! ```

use core::{
    cell::UnsafeCell,
    fmt,
    mem::ManuallyDrop,
    ptr::{self, NonNull},
};

use alloc::boxed::Box;

use crate::{count::SharedCount, pair::CompressedPair};

/// The kind of a control block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BlockKind {
    /// The object lives in a separate allocation.
    Detached,
    /// The object lives within the block.
    Inline,
}

/// The type-erased header of every control block.
#[repr(C)]
pub(crate) struct BlockHeader {
    count: SharedCount,
    vtable: &'static BlockVTable,
}

/// The type-specific operations of a control block.
pub(crate) struct BlockVTable {
    kind: BlockKind,
    //  Safety:
    //  -   Typed: the block is of the type which provided this vtable.
    //  -   Once: invoked exactly once, when the strong count reaches 0.
    destroy: unsafe fn(NonNull<BlockHeader>),
    //  Safety:
    //  -   Typed: the block is of the type which provided this vtable.
    //  -   EndOfLife: invoked exactly once, after `destroy`, once no handle references the block any longer.
    deallocate: unsafe fn(NonNull<BlockHeader>),
    //  Safety:
    //  -   Typed: the block is of the type which provided this vtable.
    managed: unsafe fn(NonNull<BlockHeader>) -> NonNull<()>,
}

/// A type-erased pointer to a control block.
///
/// This is a mere pointer: it does not, by itself, participate in the accounting.
#[derive(Clone, Copy, Eq, PartialEq)]
pub(crate) struct BlockRef(NonNull<BlockHeader>);

impl BlockRef {
    /// Returns the counts of the block.
    ///
    /// #   Safety
    ///
    /// -   Lifetime: the lifetime of the returned reference is only guaranteed until the block is deallocated.
    #[inline(always)]
    pub(crate) unsafe fn count<'a>(self) -> &'a SharedCount {
        //  Safety:
        //  -   Convertible: as per pre-condition.
        unsafe { &(*self.0.as_ptr()).count }
    }

    /// Returns the address of the managed object, which may differ from the address observed by aliasing handles.
    ///
    /// #   Safety
    ///
    /// -   Alive: the block is not yet deallocated.
    #[inline(always)]
    pub(crate) unsafe fn managed(self) -> NonNull<()> {
        //  Safety:
        //  -   Alive: as per pre-condition.
        let vtable = unsafe { self.vtable() };

        //  Safety:
        //  -   Typed: the vtable was provided by the very block.
        unsafe { (vtable.managed)(self.0) }
    }

    /// Destroys the managed object.
    ///
    /// #   Safety
    ///
    /// -   Once: invoked exactly once, when the strong count reaches 0.
    pub(crate) unsafe fn destroy(self) {
        //  Safety:
        //  -   Alive: a block is only deallocated after destruction of its object.
        let vtable = unsafe { self.vtable() };

        log::trace!("destroying object of {:?} block {:p}", vtable.kind, self.0);

        //  Safety:
        //  -   Typed: the vtable was provided by the very block.
        //  -   Once: as per pre-condition.
        unsafe { (vtable.destroy)(self.0) };
    }

    /// Deallocates the block.
    ///
    /// #   Safety
    ///
    /// -   EndOfLife: invoked exactly once, after `destroy`, once no handle references the block any longer.
    pub(crate) unsafe fn deallocate(self) {
        //  Safety:
        //  -   Alive: not deallocated yet, as per pre-condition.
        let vtable = unsafe { self.vtable() };

        log::trace!("deallocating {:?} block {:p}", vtable.kind, self.0);

        //  Safety:
        //  -   Typed: the vtable was provided by the very block.
        //  -   EndOfLife: as per pre-condition.
        unsafe { (vtable.deallocate)(self.0) };
    }

    //  Safety:
    //  -   Alive: the block is not yet deallocated.
    #[inline(always)]
    unsafe fn vtable(self) -> &'static BlockVTable {
        //  Safety:
        //  -   Alive: as per pre-condition.
        unsafe { (*self.0.as_ptr()).vtable }
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        fmt::Pointer::fmt(&self.0, f)
    }
}

//
//  Detached
//

/// A control block managing an object allocated separately, released by a deleter.
#[repr(C)]
pub(crate) struct DetachedBlock<T, D>
where
    T: ?Sized,
{
    header: BlockHeader,
    //  The deleter is taken out by `destroy`.
    pair: UnsafeCell<CompressedPair<ManuallyDrop<D>, NonNull<T>>>,
}

impl<T, D> DetachedBlock<T, D>
where
    T: ?Sized,
    D: FnOnce(NonNull<T>),
{
    const VTABLE: &'static BlockVTable = &BlockVTable {
        kind: BlockKind::Detached,
        destroy: Self::destroy,
        deallocate: Self::deallocate,
        managed: Self::managed,
    };

    /// Allocates a block for `ptr`, with a strong count of 1.
    ///
    /// `deleter` will be invoked with `ptr` once the strong count reaches 0.
    pub(crate) fn allocate(ptr: NonNull<T>, deleter: D) -> BlockRef {
        let header = BlockHeader {
            count: SharedCount::new(),
            vtable: Self::VTABLE,
        };

        let pair = UnsafeCell::new(CompressedPair::new(ManuallyDrop::new(deleter), ptr));

        let block = Box::new(Self { header, pair });

        BlockRef(NonNull::from(Box::leak(block)).cast())
    }

    //  Safety:
    //  -   Typed: `block` points to a `Self`.
    //  -   Once: as per `BlockVTable::destroy`.
    unsafe fn destroy(block: NonNull<BlockHeader>) {
        let block = block.cast::<Self>();

        let (deleter, ptr) = {
            //  Safety:
            //  -   Typed: as per pre-condition.
            let pair = unsafe { UnsafeCell::raw_get(ptr::addr_of!((*block.as_ptr()).pair)) };

            //  Safety:
            //  -   Exclusive: no other access to the pair is in flight, and the borrow ends before the deleter runs.
            let pair = unsafe { &mut *pair };

            //  Safety:
            //  -   Once: as per pre-condition, so the deleter was never taken before.
            let deleter = unsafe { ManuallyDrop::take(pair.first_mut()) };

            (deleter, *pair.second())
        };

        deleter(ptr);
    }

    //  Safety:
    //  -   Typed: `block` points to a `Self`.
    //  -   EndOfLife: as per `BlockVTable::deallocate`.
    unsafe fn deallocate(block: NonNull<BlockHeader>) {
        //  Safety:
        //  -   Typed: as per pre-condition, and allocated by `Box` in `allocate`.
        //  -   EndOfLife: as per pre-condition.
        let block = unsafe { Box::from_raw(block.cast::<Self>().as_ptr()) };

        drop(block);
    }

    //  Safety:
    //  -   Typed: `block` points to a `Self`.
    unsafe fn managed(block: NonNull<BlockHeader>) -> NonNull<()> {
        let block = block.cast::<Self>();

        //  Safety:
        //  -   Typed: as per pre-condition.
        let pair = unsafe { &*UnsafeCell::raw_get(ptr::addr_of!((*block.as_ptr()).pair)) };

        pair.second().cast()
    }
}

/// Returns the deleter of pointers obtained from `Box`.
///
/// The deleter is zero-sized.
///
/// #   Safety
///
/// -   Boxed: the returned deleter SHALL only be invoked on a pointer obtained from `Box::into_raw` or `Box::leak`.
pub(crate) unsafe fn box_deleter<T>() -> impl FnOnce(NonNull<T>)
where
    T: ?Sized,
{
    |ptr: NonNull<T>| {
        //  Safety:
        //  -   Boxed: as per pre-condition.
        let boxed = unsafe { Box::from_raw(ptr.as_ptr()) };

        drop(boxed);
    }
}

//
//  Inline
//

/// A control block embedding the managed object.
#[repr(C)]
pub(crate) struct InlineBlock<T> {
    header: BlockHeader,
    //  Dropped in place by `destroy`, the memory being released later by `deallocate`.
    value: UnsafeCell<ManuallyDrop<T>>,
}

impl<T> InlineBlock<T> {
    const VTABLE: &'static BlockVTable = &BlockVTable {
        kind: BlockKind::Inline,
        destroy: Self::destroy,
        deallocate: Self::deallocate,
        managed: Self::managed,
    };

    /// Allocates a block, moving `value` in, with a strong count of 1.
    ///
    /// Returns the block and a pointer to the value within.
    pub(crate) fn allocate(value: T) -> (BlockRef, NonNull<T>) {
        let header = BlockHeader {
            count: SharedCount::new(),
            vtable: Self::VTABLE,
        };

        let value = UnsafeCell::new(ManuallyDrop::new(value));

        let block = NonNull::from(Box::leak(Box::new(Self { header, value })));

        //  Safety:
        //  -   Typed: freshly allocated.
        let value = unsafe { Self::value(block) };

        (BlockRef(block.cast()), value)
    }

    //  Safety:
    //  -   Typed: `block` points to a `Self`.
    #[inline(always)]
    unsafe fn value(block: NonNull<Self>) -> NonNull<T> {
        //  Safety:
        //  -   Typed: as per pre-condition.
        let cell = unsafe { ptr::addr_of!((*block.as_ptr()).value) };

        //  `ManuallyDrop<T>` is `#[repr(transparent)]`.
        let value = UnsafeCell::raw_get(cell).cast::<T>();

        //  Safety:
        //  -   NonNull: derived from a non-null pointer.
        unsafe { NonNull::new_unchecked(value) }
    }

    //  Safety:
    //  -   Typed: `block` points to a `Self`.
    //  -   Once: as per `BlockVTable::destroy`.
    unsafe fn destroy(block: NonNull<BlockHeader>) {
        //  Safety:
        //  -   Typed: as per pre-condition.
        let value = unsafe { Self::value(block.cast()) };

        //  Safety:
        //  -   Valid: the value was alive until now, and will never be accessed again as per Once.
        unsafe { value.as_ptr().drop_in_place() };
    }

    //  Safety:
    //  -   Typed: `block` points to a `Self`.
    //  -   EndOfLife: as per `BlockVTable::deallocate`.
    unsafe fn deallocate(block: NonNull<BlockHeader>) {
        //  Safety:
        //  -   Typed: as per pre-condition, and allocated by `Box` in `allocate`.
        //  -   EndOfLife: as per pre-condition; `ManuallyDrop` ensures the value is not dropped a second time.
        let block = unsafe { Box::from_raw(block.cast::<Self>().as_ptr()) };

        drop(block);
    }

    //  Safety:
    //  -   Typed: `block` points to a `Self`.
    unsafe fn managed(block: NonNull<BlockHeader>) -> NonNull<()> {
        //  Safety:
        //  -   Typed: as per pre-condition.
        unsafe { Self::value(block.cast()).cast() }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::*;

    #[test]
    fn inline_lifecycle() {
        let drops = Cell::new(0);

        let (block, value) = InlineBlock::allocate(Tracked::new(&drops));

        unsafe {
            assert_eq!(BlockKind::Inline, block.vtable().kind);
            assert_eq!(value.cast::<()>(), block.managed());
            assert_eq!(1, block.count().strong_count());
            assert_eq!("Hello, World!", value.as_ref().name);

            block.destroy();

            assert_eq!(1, drops.get());

            block.deallocate();
        }

        assert_eq!(1, drops.get());
    }

    #[test]
    fn detached_lifecycle() {
        let drops = Cell::new(0);
        let deletions = Cell::new(0);

        let value = NonNull::from(Box::leak(Box::new(Tracked::new(&drops))));

        let block = DetachedBlock::allocate(value, counting_deleter(&deletions));

        unsafe {
            assert_eq!(BlockKind::Detached, block.vtable().kind);
            assert_eq!(value.cast::<()>(), block.managed());
            assert_eq!(1, block.count().strong_count());

            block.destroy();

            assert_eq!(1, drops.get());
            assert_eq!(1, deletions.get());

            block.deallocate();
        }

        assert_eq!(1, drops.get());
        assert_eq!(1, deletions.get());
    }

    #[test]
    fn detached_unsized() {
        let value: Box<dyn fmt::Debug> = Box::new(String::from("Hello, World!"));
        let value = NonNull::from(Box::leak(value));

        let block = DetachedBlock::allocate(value, unsafe { box_deleter::<dyn fmt::Debug>() });

        unsafe {
            assert_eq!(value.cast::<()>(), block.managed());

            block.destroy();
            block.deallocate();
        }
    }

    #[test]
    fn box_deleter_is_zst() {
        let deleter = unsafe { box_deleter::<String>() };

        assert_eq!(0, core::mem::size_of_val(&deleter));
    }

    fn counting_deleter<T>(deletions: &Cell<usize>) -> impl FnOnce(NonNull<T>) + '_ {
        move |ptr: NonNull<T>| {
            deletions.set(deletions.get() + 1);

            let deleter = unsafe { box_deleter::<T>() };

            deleter(ptr);
        }
    }

    #[derive(Debug)]
    struct Tracked<'a> {
        name: String,
        drops: &'a Cell<usize>,
    }

    impl<'a> Tracked<'a> {
        fn new(drops: &'a Cell<usize>) -> Self {
            let name = String::from("Hello, World!");

            Self { name, drops }
        }
    }

    impl Drop for Tracked<'_> {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }
} // mod tests
