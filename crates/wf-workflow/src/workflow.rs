//! In-memory workflow: named tasks evaluated lazily on request.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use wf_types::{Argument, Operation, Pipeline, PipelineError, Task, Value, WfResult};

/// A named graph of tasks kept in definition order.
///
/// Nothing is computed until [`Pipeline::get`] is called; each request
/// evaluates the requested task and its dependencies afresh, sharing
/// intermediate results only within that one request.
#[derive(Debug, Default, Clone)]
pub struct Workflow {
    order: Vec<String>,
    tasks: HashMap<String, Task>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call of `operation` under `name`.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        operation: Arc<dyn Operation>,
        arguments: Vec<Argument>,
    ) -> &mut Self {
        self.insert(name.into(), Task::call(operation, arguments));
        self
    }

    /// Record literal data (typically an input image) under `name`.
    pub fn set_data(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.insert(name.into(), Task::Data(value.into()));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Remove a task; returns it if it existed.
    pub fn remove(&mut self, name: &str) -> Option<Task> {
        let task = self.tasks.remove(name)?;
        self.order.retain(|n| n != name);
        Some(task)
    }

    fn insert(&mut self, name: String, task: Task) {
        if !self.tasks.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tasks.insert(name, task);
    }

    fn evaluate(
        &self,
        name: &str,
        resolved: &mut HashMap<String, Value>,
        stack: &mut Vec<String>,
    ) -> WfResult<Value> {
        if let Some(value) = resolved.get(name) {
            return Ok(value.clone());
        }
        if stack.iter().any(|n| n == name) {
            return Err(PipelineError::Cycle {
                name: name.to_string(),
            }
            .into());
        }

        let task = self.tasks.get(name).ok_or_else(|| PipelineError::TaskNotFound {
            name: name.to_string(),
        })?;

        let value = match task {
            Task::Data(value) => value.clone(),
            Task::Call {
                operation,
                arguments,
            } => {
                stack.push(name.to_string());
                let mut args = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    let value = match argument {
                        Argument::Literal(value) => value.clone(),
                        Argument::Task(dependency) => self.evaluate(dependency, resolved, stack)?,
                    };
                    args.push(value);
                }
                stack.pop();

                trace!(task = %name, operation = %operation.name(), "evaluating task");
                operation.call(&args).map_err(|e| PipelineError::Evaluation {
                    task: name.to_string(),
                    message: e.to_string(),
                })?
            }
        };

        resolved.insert(name.to_string(), value.clone());
        Ok(value)
    }
}

impl Pipeline for Workflow {
    fn task_names(&self) -> Vec<String> {
        self.order.clone()
    }

    fn get_task(&self, name: &str) -> WfResult<Task> {
        self.tasks.get(name).cloned().ok_or_else(|| {
            PipelineError::TaskNotFound {
                name: name.to_string(),
            }
            .into()
        })
    }

    fn set_task(&mut self, name: &str, task: Task) -> WfResult<()> {
        self.insert(name.to_string(), task);
        Ok(())
    }

    fn get(&self, name: &str) -> WfResult<Value> {
        debug!(task = %name, "workflow get");
        let mut resolved = HashMap::new();
        let mut stack = Vec::new();
        self.evaluate(name, &mut resolved, &mut stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wf_types::{numeric_arg, FnOperation, Image, ParameterSpec, WfError};

    fn add_op() -> Arc<dyn Operation> {
        FnOperation::shared(
            "add",
            vec![ParameterSpec::numeric("a"), ParameterSpec::numeric("b")],
            |args| Ok(Value::Float(numeric_arg("add", args, 0)? + numeric_arg("add", args, 1)?)),
        )
    }

    #[test]
    fn tasks_keep_definition_order() {
        let mut w = Workflow::new();
        w.set("sum", add_op(), vec![Argument::task("x"), Argument::literal(1.0)]);
        w.set_data("x", 2.0);
        w.set_data("sum", 0.0); // overwrite keeps position
        assert_eq!(w.task_names(), vec!["sum".to_string(), "x".to_string()]);
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn get_resolves_dependencies_lazily() {
        let mut w = Workflow::new();
        w.set("sum", add_op(), vec![Argument::task("x"), Argument::literal(1.5)]);
        w.set("twice", add_op(), vec![Argument::task("sum"), Argument::task("sum")]);
        w.set_data("x", 2.0);

        assert_eq!(w.get("twice").unwrap(), Value::Float(7.0));

        let task = w.get_task("sum").unwrap();
        let task = task.with_argument(1, Argument::literal(3.0)).unwrap();
        w.set_task("sum", task).unwrap();
        assert_eq!(w.get("twice").unwrap(), Value::Float(10.0));
    }

    #[test]
    fn shared_dependencies_evaluate_once_per_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let op = FnOperation::shared("source", vec![], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Float(1.0))
        });
        let mut w = Workflow::new();
        w.set("source", op, vec![]);
        w.set("sum", add_op(), vec![Argument::task("source"), Argument::task("source")]);

        w.get("sum").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        w.get("sum").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_tasks_are_not_found() {
        let w = Workflow::new();
        assert!(matches!(
            w.get_task("missing"),
            Err(WfError::Pipeline(PipelineError::TaskNotFound { .. }))
        ));
        assert!(matches!(
            w.get("missing"),
            Err(WfError::Pipeline(PipelineError::TaskNotFound { .. }))
        ));
    }

    #[test]
    fn cycles_are_reported() {
        let mut w = Workflow::new();
        w.set("a", add_op(), vec![Argument::task("b"), Argument::literal(1.0)]);
        w.set("b", add_op(), vec![Argument::task("a"), Argument::literal(1.0)]);
        assert!(matches!(
            w.get("a"),
            Err(WfError::Pipeline(PipelineError::Cycle { .. }))
        ));
    }

    #[test]
    fn operation_failures_become_evaluation_errors() {
        let mut w = Workflow::new();
        let arguments = vec![Argument::literal(Image::zeros(vec![1, 1])), Argument::literal(1.0)];
        w.set("sum", add_op(), arguments);
        match w.get("sum") {
            Err(WfError::Pipeline(PipelineError::Evaluation { task, .. })) => {
                assert_eq!(task, "sum")
            }
            other => panic!("expected evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn remove_drops_task_and_order() {
        let mut w = Workflow::new();
        w.set_data("x", 1.0);
        w.set_data("y", 2.0);
        assert!(w.remove("x").is_some());
        assert!(!w.contains("x"));
        assert_eq!(w.task_names(), vec!["y".to_string()]);
        assert!(w.remove("x").is_none());
    }
}
