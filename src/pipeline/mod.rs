//! Frame pipeline: processing stage and producer/consumer handoff.

pub mod handoff;
pub mod rate;
pub mod stage;

pub use handoff::{HandoffError, HandoffStats, SnapshotHandoff};
pub use rate::FrameRateCounter;
pub use stage::{FrameError, FrameOutcome, FramePipeline, PipelineStats};
