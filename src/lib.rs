pub mod config;
pub mod core;
pub mod duplicates;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use crate::core::*;
pub use crate::duplicates::{DuplicateGroup, DuplicateMode, DuplicateTracker};
pub use crate::pipeline::{Pipeline, PipelineState, RunSummary};
