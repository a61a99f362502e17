use thiserror::Error;

/// Main error type for the workflow optimizer
#[derive(Error, Debug)]
pub enum WfError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Metric error: {0}")]
    Metric(#[from] MetricError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised by a pipeline while looking up or evaluating tasks
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Task not found: {name}")]
    TaskNotFound { name: String },

    #[error("Dependency cycle detected at task {name}")]
    Cycle { name: String },

    #[error("Task {task} expects {expected} arguments, got {actual}")]
    Arity {
        task: String,
        expected: usize,
        actual: usize,
    },

    #[error("Task {task}, argument {position}: expected {expected}, found {found}")]
    ArgumentType {
        task: String,
        position: usize,
        expected: String,
        found: String,
    },

    #[error("Evaluation of {task} failed: {message}")]
    Evaluation { task: String, message: String },
}

/// Errors raised by the parameter registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Parameter index {index} out of range for {count} parameters")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Stale parameter handle {task}[{position}]: {message}")]
    StaleHandle {
        task: String,
        position: usize,
        message: String,
    },
}

/// Errors raised while scoring a candidate against a reference
#[derive(Error, Debug)]
pub enum MetricError {
    #[error("Shape mismatch: candidate {candidate:?}, reference {reference:?}")]
    ShapeMismatch {
        candidate: Vec<usize>,
        reference: Vec<usize>,
    },

    #[error("Expected an image, found {found}")]
    NotAnImage { found: String },

    #[error("Cannot score empty images")]
    Empty,

    #[error("Metric produced a non-finite value: {value}")]
    NonFinite { value: f64 },
}

/// Errors raised by the optimization engine itself
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Optimization already running; optimize is not reentrant")]
    AlreadyRunning,

    #[error("Invalid optimizer settings: {message}")]
    InvalidSettings { message: String },
}

/// Result type alias for workflow optimizer operations
pub type WfResult<T> = Result<T, WfError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::WfError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::WfError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::WfError::Config(format!($($arg)*))
    };
}
