use thiserror::Error;

/// Errors surfaced by forest, tree, sampler and point store operations.
///
/// None of these are retried internally; a failed operation leaves the
/// structure it was invoked on unchanged unless noted otherwise.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForestError {
    #[error("invalid argument: {msg}")]
    InvalidArgument { msg: &'static str },

    /// A random cut was requested on a bounding box whose total range is
    /// zero. Reaching this from public entry points indicates a corrupted
    /// tree.
    #[error("random cut on a zero-range bounding box")]
    DegenerateBox,

    #[error("point store is at capacity")]
    CapacityExceeded,

    #[error("point reference {index} is not in use")]
    InvalidRef { index: u32 },

    #[error("operation on an empty tree")]
    EmptyTree,

    /// The delete path descended to a leaf holding a point different from
    /// the one being removed.
    #[error("delete reached a leaf with a different point")]
    PointMismatch,

    #[error("sequence index not present at the resolved leaf")]
    SequenceNotFound,

    #[error("internal invariant violated: {msg}")]
    Internal { msg: &'static str },
}

pub type Result<T> = core::result::Result<T, ForestError>;

/// If the test condition is false, return an InvalidArgument error with the
/// given message. Otherwise return Ok.
pub(crate) fn check_argument(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(ForestError::InvalidArgument { msg })
    }
}
