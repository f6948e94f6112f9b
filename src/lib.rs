//! Single-threaded shared & weak pointers.
//!
//! #   Available pointers
//!
//! -   `SharedPtr<T>`: a reference-counted owning pointer, which may be null, and may alias a part of the object it
//!     keeps alive.
//! -   `WeakPtr<T>`: a non-owning observer of an object managed by `SharedPtr`, which may be locked into a `SharedPtr`
//!     for as long as the object is alive.
//!
//! Objects which need to hand out pointers to themselves embed a `SelfRef` and implement `EnableSharedFromThis`.
//!
//! #   Control blocks
//!
//! All handles to the same object share a control block, holding the strong & weak counts. The control block comes
//! in two forms:
//!
//! -   Inline, created by `SharedPtr::new`, which stores the object right after the counts, in a single allocation.
//! -   Detached, created by `SharedPtr::from_box` and `SharedPtr::from_raw_with`, which stores a pointer to the object
//!     and its deleter, separately from the object.
//!
//! The object is destroyed when the last strong handle is dropped, and the control block is released when the last
//! handle, strong or weak, is dropped.
//!
//! #   Thread-safety
//!
//! The counts are not atomic: neither `SharedPtr` nor `WeakPtr` are `Send` nor `Sync`.

//  Use only core, and alloc.
#![cfg_attr(not(test), no_std)]
//  Lints
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(missing_docs)]

//  Non-core must be explicitly depended on in no_std.
extern crate alloc;

mod block;
mod count;
mod error;
mod pair;
mod raw;
mod shared;
mod this;
mod weak;

pub use error::BadWeakPtr;
pub use pair::CompressedPair;
pub use shared::SharedPtr;
pub use this::{EnableSharedFromThis, SelfRef};
pub use weak::WeakPtr;
