use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// The region refused to move the break by `requested` bytes.
  #[error("managed region exhausted: could not grow by {requested} bytes")]
  Exhausted { requested: usize },

  /// The request is too large to express as a break delta.
  #[error("allocation of {requested} bytes overflows the managed region")]
  Overflow { requested: usize },
}

pub type Result<T> = core::result::Result<T, Error>;
