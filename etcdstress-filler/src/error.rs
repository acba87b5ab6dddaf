//! Errors of the population engine.

use thiserror::Error;

/// Errors that can occur while populating a store.
///
/// A batch as a whole only fails with [`ToleranceExceeded`](Error::ToleranceExceeded). The
/// per-write variants describe the outcome of a single write and are only counted by the
/// [`Tally`](crate::Tally).
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid pool or orchestrator settings.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The store rejected a single write.
    #[error("failed to write `{key}`: {source}")]
    Write {
        /// The key that could not be written.
        key: String,
        /// The error reported by the store.
        #[source]
        source: anyhow::Error,
    },

    /// No identifier could be minted for a record.
    #[error("failed to generate record identifier: {0}")]
    IdentifierGeneration(String),

    /// A task finished without reporting an outcome, usually because it panicked.
    #[error("task ended without reporting an outcome")]
    Abandoned,

    /// The work pool no longer accepts tasks.
    #[error("work pool is closed")]
    PoolClosed,

    /// The share of failed writes is above the accepted tolerance.
    #[error("error rate of {rate:.3} exceeds tolerance of {tolerance:.3}")]
    ToleranceExceeded {
        /// The observed error rate.
        rate: f64,
        /// The maximum accepted error rate.
        tolerance: f64,
    },
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
