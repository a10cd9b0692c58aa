//! Video frame pipeline: bounded in-flight queue with ordered flush

pub mod queue;

pub use queue::{FrameQueue, JobTicket, QueueStats};
