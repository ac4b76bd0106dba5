//! Concurrency primitives coordinating the pipeline's tasks.
//!
//! Cancellation is a single broadcast signal observed at every suspension
//! point; producers finish the batch in flight and return. The cutover
//! notification is a one-shot, owned by whoever drives the operator side of
//! the run.

pub mod shutdown;
