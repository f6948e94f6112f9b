/// Errors from the library.
use core::{error, fmt};

/// Error returned when promoting a weak handle whose object has already been destroyed.
///
/// This is the only recoverable error of the library: it is returned by `SharedPtr::promote`, the `TryFrom<&WeakPtr>`
/// conversion, and `EnableSharedFromThis::shared_from_this`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BadWeakPtr;

impl fmt::Display for BadWeakPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:?}", self)
    }
}

impl error::Error for BadWeakPtr {}

// mod tests
