//! Polling job queue drained by the scheduler tick.
//!
//! Jobs are created by `wait` actions, due scheduled rules and queued
//! manual runs. Each tick claims a bounded batch and hands it to the
//! automation engine.

pub mod job;
pub mod queue;
pub mod tick;

pub use job::{Job, JobKind, JobPayload, JobStatus};
pub use queue::{JobQueue, QueueStats};
pub use tick::{format_tick_result, JobOutcome, SchedulerTick, TickConfig, TickResult};
