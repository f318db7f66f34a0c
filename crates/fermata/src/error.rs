use std::io;
use thiserror::Error;

/// Errors returned by fermata pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// `max_cap` was zero or `initial_cap` exceeded it.
    #[error("invalid capacity settings: initial_cap={initial_cap}, max_cap={max_cap}")]
    InvalidCapacity { initial_cap: usize, max_cap: usize },

    /// The connection factory failed, or produced a connection without a usable descriptor.
    #[error("factory is not able to create a connection: {0}")]
    Factory(#[source] io::Error),

    /// The pool has been torn down.
    #[error("pool is closed")]
    Closed,

    /// The liveness monitor's wait loop terminated. Checkout and release keep
    /// working, but idle connections are no longer watched.
    #[error("liveness monitor stopped: {0}")]
    MonitorFailure(#[source] io::Error),

    /// Registration syscall or other OS-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PoolError {
    /// Whether the failure came from the connection factory.
    pub fn is_factory(&self) -> bool {
        matches!(self, PoolError::Factory(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
