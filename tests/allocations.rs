/// Allocation accounting tests.
///
/// A counting global allocator tracks, per thread, the number of allocations & deallocations, so as to check how many
/// memory blocks each construction performs, and that every memory block is released exactly once.
use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::{Cell, RefCell},
    ptr::{self, NonNull},
    rc::Rc,
};

use endor_shared::{EnableSharedFromThis, SelfRef, SharedPtr, WeakPtr};

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

#[test]
fn inline_single_allocation() {
    let counter = Counter::start();

    let shared = SharedPtr::new(42u64);

    assert_eq!(1, counter.allocations());

    let clone = shared.clone();
    let weak = SharedPtr::downgrade(&clone);

    assert_eq!(1, counter.allocations());

    drop((shared, clone, weak));

    assert_eq!(1, counter.deallocations());
}

#[test]
fn boxed_separate_block() {
    let value = Box::new(42u64);

    let counter = Counter::start();

    let shared = SharedPtr::from_box(value);

    assert_eq!(1, counter.allocations());

    drop(shared);

    //  The control block, and the box.
    assert_eq!(2, counter.deallocations());
}

#[test]
fn null_does_not_allocate() {
    let counter = Counter::start();

    let shared: SharedPtr<String> = SharedPtr::null();
    let weak = SharedPtr::downgrade(&shared);
    let raw = unsafe { SharedPtr::<String>::from_raw(ptr::null_mut()) };

    drop((shared, weak, raw));

    assert_eq!(0, counter.allocations());
    assert_eq!(0, counter.deallocations());
}

#[test]
fn weak_keeps_block_only() {
    let drops = Rc::new(Cell::new(0));

    let counter = Counter::start();

    let shared = SharedPtr::new(Tracked(drops.clone()));
    let weak = SharedPtr::downgrade(&shared);

    drop(shared);

    //  Destroyed, but not deallocated.
    assert_eq!(1, drops.get());
    assert_eq!(0, counter.deallocations());
    assert!(weak.expired());

    drop(weak);

    assert_eq!(1, drops.get());
    assert_eq!(1, counter.deallocations());
}

#[test]
fn aliasing_keeps_owner_alive() {
    let drops = Rc::new(Cell::new(0));

    let counter = Counter::start();

    let pair = SharedPtr::new((Tracked(drops.clone()), String::from("Hello, World!")));
    let alias = SharedPtr::project(&pair, |pair| pair.1.as_str());

    drop(pair);

    assert_eq!(0, drops.get());
    assert_eq!("Hello, World!", &*alias);

    drop(alias);

    assert_eq!(1, drops.get());
    assert_eq!(counter.allocations(), counter.deallocations());
}

#[test]
fn custom_deleter_runs_once() {
    let deletions = Rc::new(Cell::new(0));

    let ptr = NonNull::from(Box::leak(Box::new(String::from("Hello, World!"))));

    let counter = Counter::start();

    let shared = unsafe {
        let deletions = deletions.clone();

        SharedPtr::from_raw_with(ptr, move |ptr: NonNull<String>| {
            deletions.set(deletions.get() + 1);

            drop(Box::from_raw(ptr.as_ptr()));
        })
    };

    let weak = SharedPtr::downgrade(&shared);
    let clone = shared.clone();

    drop(shared);
    drop(clone);

    assert_eq!(1, deletions.get());
    assert!(weak.expired());

    drop(weak);

    assert_eq!(1, deletions.get());
    //  The control block, and the string with its buffer.
    assert_eq!(1, counter.allocations());
    assert_eq!(3, counter.deallocations());
}

#[test]
fn self_ref_does_not_leak() {
    let counter = Counter::start();

    {
        let node = SharedPtr::new_shared_from_this(Node::default());

        let again = node.shared_from_this().expect("installed");
        let weak = node.weak_from_this();

        drop(node);
        drop(again);

        assert!(weak.expired());
    }

    assert_eq!(1, counter.allocations());
    assert_eq!(1, counter.deallocations());
}

#[test]
fn self_ref_cycle_broken_by_weak() {
    let counter = Counter::start();

    {
        let parent = SharedPtr::new_shared_from_this(Node::default());
        let child = SharedPtr::new_shared_from_this(Node::default());

        *child.parent.borrow_mut() = parent.weak_from_this();
        parent.children.borrow_mut().push(child.shared_from_this().expect("installed"));

        drop(child);

        let child = parent.children.borrow()[0].clone();

        assert_eq!(2, SharedPtr::use_count(&child));
        assert!(SharedPtr::ptr_eq(&parent, &child.parent.borrow().lock()));

        drop(parent);

        assert_eq!(1, SharedPtr::use_count(&child));
        assert!(child.parent.borrow().expired());
    }

    assert_eq!(counter.allocations(), counter.deallocations());
}

#[test]
fn self_ref_outliving_object_releases_block() {
    let counter = Counter::start();

    {
        let slot = Rc::new(SelfRef::new());

        let outside = SharedPtr::new_shared_from_this(Outside { this: slot.clone() });

        drop(outside);

        //  The block survives the object, held by the self-reference.
        assert!(slot.weak().expired());
        assert_eq!(0, counter.deallocations());
    }

    assert_eq!(counter.allocations(), counter.deallocations());
}

#[test]
fn recycled_object_releases_former_block() {
    let pool: RefCell<Vec<Box<Node>>> = RefCell::new(Vec::new());

    let counter = Counter::start();

    {
        let ptr = NonNull::from(Box::leak(Box::default()));

        let first = unsafe {
            SharedPtr::from_raw_with(ptr, |ptr: NonNull<Node>| pool.borrow_mut().push(Box::from_raw(ptr.as_ptr())))
        };

        SharedPtr::enable_shared_from_this(&first);

        drop(first);

        let recycled = pool.borrow_mut().pop().expect("recycled");

        let second = SharedPtr::from_box_shared_from_this(recycled);

        let again = second.shared_from_this().expect("installed anew");

        assert_eq!(2, SharedPtr::use_count(&again));
    }

    drop(pool);

    assert_eq!(counter.allocations(), counter.deallocations());
}

#[test]
fn reset_releases_previous() {
    let drops = Rc::new(Cell::new(0));

    let mut shared = SharedPtr::new(Tracked(drops.clone()));

    let counter = Counter::start();

    SharedPtr::reset_box(&mut shared, Box::new(Tracked(drops.clone())));

    assert_eq!(1, drops.get());
    assert_eq!(1, counter.deallocations());

    SharedPtr::reset(&mut shared);

    assert_eq!(2, drops.get());
    assert_eq!(3, counter.deallocations());
}

//
//  Helpers
//

struct Tracked(Rc<Cell<usize>>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

#[derive(Default)]
struct Node {
    parent: RefCell<WeakPtr<Node>>,
    children: RefCell<Vec<SharedPtr<Node>>>,
    this: SelfRef<Node>,
}

impl EnableSharedFromThis for Node {
    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

struct Outside {
    this: Rc<SelfRef<Outside>>,
}

impl EnableSharedFromThis for Outside {
    fn self_ref(&self) -> &SelfRef<Self> {
        &self.this
    }
}

//  Snapshot of the counts of the current thread, at creation.
struct Counter {
    allocations: usize,
    deallocations: usize,
}

impl Counter {
    fn start() -> Self {
        let allocations = ALLOCATIONS.with(Cell::get);
        let deallocations = DEALLOCATIONS.with(Cell::get);

        Self {
            allocations,
            deallocations,
        }
    }

    fn allocations(&self) -> usize {
        ALLOCATIONS.with(Cell::get) - self.allocations
    }

    fn deallocations(&self) -> usize {
        DEALLOCATIONS.with(Cell::get) - self.deallocations
    }
}

thread_local! {
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
    static DEALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        //  Thread-locals may be unavailable while a thread is torn down, those allocations are not counted.
        let _ = ALLOCATIONS.try_with(|count| count.set(count.get() + 1));

        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let _ = DEALLOCATIONS.try_with(|count| count.set(count.get() + 1));

        unsafe { System.dealloc(ptr, layout) }
    }
}
