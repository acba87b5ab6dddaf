//! Bulk population engine for key-value stores.
//!
//! A [`Filler`] writes a batch of synthetic [`Record`]s into a [`Store`] through a bounded
//! [`WorkPool`], so that no more than a fixed number of writes hit the store at the same time.
//! Individual writes are never retried. Once every write of a batch has finished, the outcomes are
//! aggregated in a [`Tally`] and the batch is accepted only if at most [`ERROR_TOLERANCE`] of the
//! writes failed.
//!
//! ```no_run
//! # async fn example(store: impl etcdstress_filler::Store) -> etcdstress_filler::Result<()> {
//! use etcdstress_filler::FillerBuilder;
//!
//! let mut filler = FillerBuilder::new().workers(8).prefix("/data").build(store)?;
//! let written = filler.generate(10_000).await?;
//! println!("stored {written} records");
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod filler;
pub mod pool;
pub mod record;
pub mod store;
pub mod tolerance;

pub use crate::error::{Error, Result};
pub use crate::filler::{Filler, FillerBuilder, Progress};
pub use crate::pool::WorkPool;
pub use crate::record::{Record, RecordId};
pub use crate::store::Store;
pub use crate::tolerance::{ERROR_TOLERANCE, Outcome, Tally};
