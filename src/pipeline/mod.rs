//! Pipeline orchestration: seed planning, per-job processing, batch
//! scheduling and timing.

mod job;
mod job_runner;
mod metrics;
mod scheduler;
pub mod seeds;


pub use job::{batch_count, partition, Batch, JobUnit};
pub use job_runner::ImagePipelineRunner;
pub use metrics::{PatientSummary, RunSummary, TimingAggregator, TimingRecord, TimingSnapshot};
pub use scheduler::{BatchScheduler, BatchSummary, SchedulerConfig};
pub use seeds::{SeedPoint, SeedSet};
