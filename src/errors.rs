use std::fmt;

/// Possible errors returned by operations on an
/// [`LpmTable`](crate::LpmTable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpmError {
    /// The allocator refused a node or block. Every partially applied
    /// effect of the failing operation has been undone; the table stays
    /// usable.
    Resources,
    /// Argument validation failed: the mask length exceeds
    /// [`MAX_MASKLEN`](crate::MAX_MASKLEN), or the address buffer is too
    /// short to hold that many bits.
    Invalid,
    /// The exact binding was absent where the operation requires one.
    NotFound,
    /// The binding already exists with the same value. Only `add`
    /// reports this; the table is unchanged.
    Exists,
    /// The binding already exists with a different value. Only `add`
    /// reports this; the table is unchanged.
    Conflict,
    /// The table violated one of its own invariants and has been
    /// quarantined. Every subsequent operation on it reports this error;
    /// the only safe action left is dropping it.
    Internal,
    /// A caller-supplied visitor aborted a walk.
    Exotic,
}

impl std::error::Error for LpmError {}

impl fmt::Display for LpmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LpmError::Resources => {
                write!(f, "Error: The allocator refused a request.")
            }
            LpmError::Invalid => {
                write!(f, "Error: Invalid argument.")
            }
            LpmError::NotFound => {
                write!(f, "Error: The binding cannot be found.")
            }
            LpmError::Exists => {
                write!(
                    f,
                    "Error: The binding already exists with the same value."
                )
            }
            LpmError::Conflict => {
                write!(
                    f,
                    "Error: The binding already exists with a different \
                    value."
                )
            }
            LpmError::Internal => {
                write!(
                    f,
                    "Error: The table is inconsistent and has been \
                    quarantined. It should be dropped."
                )
            }
            LpmError::Exotic => {
                write!(f, "Error: A visitor aborted the walk.")
            }
        }
    }
}
