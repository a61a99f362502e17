//! # wf-workflow
//!
//! A concrete, in-memory [`Pipeline`](wf_types::Pipeline): named tasks kept in
//! definition order and evaluated lazily, plus a handful of built-in image
//! operations that declare their tunable parameters.

mod ops;
mod workflow;

pub use ops::{BoxBlur, LabelComponents, Scale, Threshold};
pub use workflow::Workflow;
