//! Error types for pool operations

use upstream::TransportError;

/// Errors from pool operations.
///
/// `PoolExhausted` is the terminal "no retry path left" outcome: either no
/// key was eligible at selection time, or the attempt budget ran out. It
/// carries the last upstream error observed so callers can see why the final
/// attempt failed. `NonRetryable` surfaces the original upstream error when
/// rotating keys cannot help.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pool exhausted after {attempts} attempts ({available}/{total} keys eligible)")]
    PoolExhausted {
        attempts: u32,
        total: usize,
        available: usize,
        #[source]
        last: Option<TransportError>,
    },

    #[error(transparent)]
    NonRetryable(TransportError),

    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl Error {
    /// The upstream error behind this terminal outcome, if any.
    pub fn last_upstream(&self) -> Option<&TransportError> {
        match self {
            Error::PoolExhausted { last, .. } => last.as_ref(),
            Error::NonRetryable(err) => Some(err),
            Error::Config(_) => None,
        }
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
