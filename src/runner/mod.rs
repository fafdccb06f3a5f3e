//! Plan execution: the provider seam, progress reporting, and the
//! layer-sequential runner itself.

mod produce;
mod progress;
mod run;

pub use produce::{
    JobError, JobResult, JobStatus, Produce, ProduceOutcome, ProducedArtifact, RunContext,
    RunResult, RunStatus,
};
pub use progress::{
    ChannelSink, MemorySink, ProgressBus, ProgressEmitter, ProgressEvent, ProgressSink, StdOutSink,
};
pub use run::{PlanOptionError, PlanRunner, RunOptions, RunnerError};
