//! Priority lanes and operations.
//!
//! Requests that miss the cache become an [`Operation`] and run on one of two
//! lanes of a [`QueuePair`]:
//!
//! | Lane | Concurrency | Used for |
//! |------|-------------|----------|
//! | [`Lane::Primary`] | 1 (serial) | requests flagged main-priority |
//! | [`Lane::Secondary`] | bounded, defaults to available parallelism | everything else |
//!
//! The lanes have separate slot pools, so primary work never waits behind
//! secondary work. There is no ordering between lanes.

mod lane;
mod operation;

pub use lane::{Dispatcher, Lane, LaneConfig, LaneQueue, LaneSnapshot, QueuePair};
pub use operation::{FetchOutcome, Operation, OperationId};
