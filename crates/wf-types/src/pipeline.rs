//! The pipeline contract: tasks, their arguments, and the operations they call.
//!
//! A pipeline is a named, lazily evaluated graph. Each task is either literal
//! data or a recorded call of an [`Operation`] with positional [`Argument`]s.
//! Operations declare their parameters up front through [`ParameterSpec`], which
//! is what parameter discovery reads instead of inspecting values at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::errors::{PipelineError, WfResult};
use crate::image::Image;

/// A value flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Image(Image),
}

impl Value {
    /// Numeric scalars are the only values parameter discovery considers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&Image> {
        match self {
            Self::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<Image> {
        match self {
            Self::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Image(_) => "image",
        }
    }
}

impl From<Image> for Value {
    fn from(img: Image) -> Self {
        Self::Image(img)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

/// One recorded positional argument of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// A literal value stored in the task itself.
    Literal(Value),
    /// The output of another task, resolved at evaluation time.
    Task(String),
}

impl Argument {
    pub fn task(name: impl Into<String>) -> Self {
        Self::Task(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// The literal numeric value, if this argument is one.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Self::Literal(v) => v.as_f64(),
            Self::Task(_) => None,
        }
    }
}

/// Declared metadata for one positional parameter of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    /// Whether the optimizer may tune this parameter when it holds a number.
    pub tunable: bool,
}

impl ParameterSpec {
    /// A numeric parameter the optimizer may tune.
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tunable: true,
        }
    }

    /// An input (image, text, upstream task) that is never tuned.
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tunable: false,
        }
    }
}

/// A callable recorded in a pipeline task.
pub trait Operation: Send + Sync {
    /// Human-readable operation name.
    fn name(&self) -> &str;

    /// Declared positional parameters, in call order.
    fn parameters(&self) -> &[ParameterSpec];

    /// Invoke the operation on fully resolved arguments.
    fn call(&self, args: &[Value]) -> WfResult<Value>;
}

type CallFn = dyn Fn(&[Value]) -> WfResult<Value> + Send + Sync;

/// An [`Operation`] backed by a closure.
pub struct FnOperation {
    name: String,
    parameters: Vec<ParameterSpec>,
    func: Box<CallFn>,
}

impl FnOperation {
    pub fn new<F>(name: impl Into<String>, parameters: Vec<ParameterSpec>, func: F) -> Self
    where
        F: Fn(&[Value]) -> WfResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parameters,
            func: Box::new(func),
        }
    }

    pub fn shared<F>(
        name: impl Into<String>,
        parameters: Vec<ParameterSpec>,
        func: F,
    ) -> Arc<dyn Operation>
    where
        F: Fn(&[Value]) -> WfResult<Value> + Send + Sync + 'static,
    {
        Arc::new(Self::new(name, parameters, func))
    }
}

impl Operation for FnOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    fn call(&self, args: &[Value]) -> WfResult<Value> {
        (self.func)(args)
    }
}

/// A recorded pipeline task.
#[derive(Clone)]
pub enum Task {
    /// Literal data (e.g. an input image); never callable.
    Data(Value),
    /// A call of `operation` with positional `arguments`.
    Call {
        operation: Arc<dyn Operation>,
        arguments: Vec<Argument>,
    },
}

impl Task {
    pub fn call(operation: Arc<dyn Operation>, arguments: Vec<Argument>) -> Self {
        Self::Call {
            operation,
            arguments,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    pub fn operation(&self) -> Option<&Arc<dyn Operation>> {
        match self {
            Self::Call { operation, .. } => Some(operation),
            Self::Data(_) => None,
        }
    }

    pub fn arguments(&self) -> &[Argument] {
        match self {
            Self::Call { arguments, .. } => arguments,
            Self::Data(_) => &[],
        }
    }

    /// Copy of this task with the argument at `position` replaced.
    /// Every other argument is carried over unchanged.
    pub fn with_argument(&self, position: usize, argument: Argument) -> Option<Task> {
        match self {
            Self::Call {
                operation,
                arguments,
            } if position < arguments.len() => {
                let mut arguments = arguments.clone();
                arguments[position] = argument;
                Some(Self::Call {
                    operation: Arc::clone(operation),
                    arguments,
                })
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(value) => f.debug_tuple("Data").field(&value.kind_name()).finish(),
            Self::Call {
                operation,
                arguments,
            } => f
                .debug_struct("Call")
                .field("operation", &operation.name())
                .field("arguments", arguments)
                .finish(),
        }
    }
}

/// The collaborator contract the optimizer drives.
pub trait Pipeline {
    /// Task names in definition order.
    fn task_names(&self) -> Vec<String>;

    /// The recorded task, or [`PipelineError::TaskNotFound`].
    fn get_task(&self, name: &str) -> WfResult<Task>;

    /// Replace (or add) a task's recorded invocation.
    fn set_task(&mut self, name: &str, task: Task) -> WfResult<()>;

    /// Evaluate a task and everything it depends on.
    fn get(&self, name: &str) -> WfResult<Value>;
}

impl<P: Pipeline + ?Sized> Pipeline for &mut P {
    fn task_names(&self) -> Vec<String> {
        (**self).task_names()
    }

    fn get_task(&self, name: &str) -> WfResult<Task> {
        (**self).get_task(name)
    }

    fn set_task(&mut self, name: &str, task: Task) -> WfResult<()> {
        (**self).set_task(name, task)
    }

    fn get(&self, name: &str) -> WfResult<Value> {
        (**self).get(name)
    }
}

/// Fetch positional argument `position` as an image.
pub fn image_arg<'a>(
    task: &str,
    args: &'a [Value],
    position: usize,
) -> Result<&'a Image, PipelineError> {
    match args.get(position) {
        Some(Value::Image(img)) => Ok(img),
        Some(other) => Err(PipelineError::ArgumentType {
            task: task.to_string(),
            position,
            expected: "image".to_string(),
            found: other.kind_name().to_string(),
        }),
        None => Err(PipelineError::Arity {
            task: task.to_string(),
            expected: position + 1,
            actual: args.len(),
        }),
    }
}

/// Fetch positional argument `position` as a number.
pub fn numeric_arg(task: &str, args: &[Value], position: usize) -> Result<f64, PipelineError> {
    match args.get(position) {
        Some(value) => value.as_f64().ok_or_else(|| PipelineError::ArgumentType {
            task: task.to_string(),
            position,
            expected: "number".to_string(),
            found: value.kind_name().to_string(),
        }),
        None => Err(PipelineError::Arity {
            task: task.to_string(),
            expected: position + 1,
            actual: args.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale_op() -> Arc<dyn Operation> {
        FnOperation::shared(
            "scale",
            vec![ParameterSpec::input("image"), ParameterSpec::numeric("factor")],
            |args| {
                let img = image_arg("scale", args, 0)?;
                let factor = numeric_arg("scale", args, 1)?;
                Ok(Value::Image(img.map(|v| v * factor)))
            },
        )
    }

    #[test]
    fn numeric_values_are_detected() {
        assert!(Value::Int(3).is_numeric());
        assert!(Value::Float(0.5).is_numeric());
        assert!(!Value::Text("otsu".into()).is_numeric());
        assert!(!Value::Image(Image::zeros(vec![1, 1])).is_numeric());
        assert_eq!(Argument::task("input").numeric(), None);
        assert_eq!(Argument::literal(2i64).numeric(), Some(2.0));
    }

    #[test]
    fn with_argument_preserves_other_arguments() {
        let task = Task::call(
            scale_op(),
            vec![Argument::task("input"), Argument::literal(1.5)],
        );
        let updated = task.with_argument(1, Argument::literal(3.0)).unwrap();
        assert_eq!(updated.arguments()[0], Argument::task("input"));
        assert_eq!(updated.arguments()[1].numeric(), Some(3.0));
        assert!(task.with_argument(5, Argument::literal(1.0)).is_none());
    }

    #[test]
    fn data_tasks_are_not_callable() {
        let task = Task::Data(Value::Float(1.0));
        assert!(!task.is_callable());
        assert!(task.operation().is_none());
        assert!(task.arguments().is_empty());
        assert!(task.with_argument(0, Argument::literal(2.0)).is_none());
    }

    #[test]
    fn fn_operation_reports_argument_errors() {
        let op = scale_op();
        let err = op.call(&[Value::Float(1.0), Value::Float(2.0)]).unwrap_err();
        assert!(err.to_string().contains("expected image"));

        let img = Image::from_rows(&[[1.0, 2.0]]).unwrap();
        let out = op.call(&[Value::Image(img), Value::Int(2)]).unwrap();
        assert_eq!(out.as_image().unwrap().data(), &[2.0, 4.0]);
    }
}
