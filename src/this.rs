//! Obtaining handles to an object from within the object itself.
//!
//! An object opts in by embedding a `SelfRef` and implementing `EnableSharedFromThis`. Once the object is managed by
//! a `SharedPtr` and its self-reference installed, it can hand out `SharedPtr` and `WeakPtr` to itself, sharing the
//! control block it is managed by rather than starting a second, independent, count.
//!
//! The self-reference is a weak handle to the object's own control block, stored within the object: it never keeps
//! the object alive, and is released by the destructor of the object, or when replaced because the object is managed
//! anew after its former control block released it.

use core::{cell::RefCell, fmt};

use crate::{
    raw::{RawShared, RawWeak},
    BadWeakPtr, SharedPtr, WeakPtr,
};

/// Capability of an object to obtain handles to itself.
///
/// ```
/// use endor_shared::{EnableSharedFromThis, SelfRef, SharedPtr};
///
/// struct Node {
///     name: String,
///     this: SelfRef<Node>,
/// }
///
/// impl EnableSharedFromThis for Node {
///     fn self_ref(&self) -> &SelfRef<Self> {
///         &self.this
///     }
/// }
///
/// let node = SharedPtr::new_shared_from_this(Node { name: "root".into(), this: SelfRef::new() });
///
/// let again = node.shared_from_this().unwrap();
///
/// assert_eq!(2, SharedPtr::use_count(&node));
/// assert_eq!("root", again.name);
/// ```
pub trait EnableSharedFromThis {
    /// Returns the storage of the self-reference.
    fn self_ref(&self) -> &SelfRef<Self>;

    /// Returns a strong handle to `self`, sharing the control block managing `self`.
    ///
    /// Returns an error if the self-reference was never installed, or if `self` is being destroyed.
    fn shared_from_this(&self) -> Result<SharedPtr<Self>, BadWeakPtr> {
        self.self_ref().shared()
    }

    /// Returns a weak handle to `self`.
    ///
    /// Returns a null `WeakPtr` if the self-reference was never installed.
    fn weak_from_this(&self) -> WeakPtr<Self> {
        self.self_ref().weak()
    }
}

/// The self-reference of an object, installed by `SharedPtr::enable_shared_from_this`.
pub struct SelfRef<T>
where
    T: ?Sized,
{
    weak: RefCell<Option<RawWeak<T>>>,
}

impl<T> SelfRef<T>
where
    T: ?Sized,
{
    /// Constructs an empty self-reference, to be installed later.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            weak: RefCell::new(None),
        }
    }

    /// Returns whether the self-reference is installed.
    ///
    /// A self-reference remains installed after the object it refers to was destroyed, until replaced.
    #[inline(always)]
    pub fn is_installed(&self) -> bool {
        self.weak.borrow().is_some()
    }

    /// Returns a strong handle to the object.
    ///
    /// Returns an error if the self-reference was never installed, or if the object is being destroyed.
    #[inline]
    pub fn shared(&self) -> Result<SharedPtr<T>, BadWeakPtr> {
        let inner = self.weak.borrow().as_ref().and_then(RawWeak::upgrade).ok_or(BadWeakPtr)?;

        Ok(SharedPtr::from_inner(Some(inner)))
    }

    /// Returns a weak handle to the object.
    ///
    /// Returns a null `WeakPtr` if the self-reference was never installed.
    #[inline]
    pub fn weak(&self) -> WeakPtr<T> {
        WeakPtr::from_inner(self.weak.borrow().clone())
    }

    //  Installs `shared` as the self-reference, unless a live one is already installed.
    //
    //  An expired self-reference is replaced: the object outlived its former block, and is now managed anew.
    pub(crate) fn install(&self, shared: &RawShared<T>) {
        if self.weak.borrow().as_ref().is_some_and(|weak| !weak.is_expired()) {
            return;
        }

        let weak = RawShared::downgrade(shared).into_self_ref();

        //  Released outside of the borrow, as it may deallocate its former block.
        let stale = self.weak.replace(Some(weak));

        drop(stale);
    }
}

impl<T> Default for SelfRef<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SelfRef<T>
where
    T: ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("SelfRef").field("installed", &self.is_installed()).finish()
    }
}

// mod tests
