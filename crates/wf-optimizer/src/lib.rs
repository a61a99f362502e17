//! # wf-optimizer
//!
//! Automatic tuning of workflow parameters.
//!
//! Discovers the numeric literal arguments a pipeline declares tunable, scores
//! a task's output against a reference image with a quality metric, and runs a
//! Nelder–Mead search over the free parameters. Runs are cancellable and their
//! progress is observable from other threads.

mod cache;
mod engine;
mod metrics;
mod progress;
mod registry;
mod settings;
mod simplex;

pub use cache::{CacheStats, MemoCache};
pub use engine::{OptimizationResult, Optimizer, RunId, RunOutcome};
pub use metrics::{MetricKind, ANNOTATION_NEGATIVE, ANNOTATION_POSITIVE, ANNOTATION_UNKNOWN};
pub use progress::{CancellationToken, ProgressLog, RunMonitor};
pub use registry::{ParameterHandle, ParameterRegistry};
pub use settings::OptimizerSettings;
pub use simplex::{NelderMead, SimplexState};
