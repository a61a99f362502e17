//! Discovery and access of a pipeline's tunable numeric parameters.

use serde::{Deserialize, Serialize};
use tracing::debug;

use wf_types::{Argument, Pipeline, RegistryError, Task, WfResult};

/// Identifies one numeric argument: the task and the argument's position in
/// the task's argument list (0-based, the callable itself not counted).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterHandle {
    pub task: String,
    pub position: usize,
}

impl std::fmt::Display for ParameterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.task, self.position)
    }
}

/// The tunable parameters of a pipeline plus a fixed/free mask.
///
/// Handles are discovered once, at construction, in pipeline definition
/// order and then argument order. Overwriting a task with a different
/// signature afterwards makes its handles stale; build a new registry then.
#[derive(Debug)]
pub struct ParameterRegistry<P> {
    pipeline: P,
    handles: Vec<ParameterHandle>,
    fixed: Vec<bool>,
}

impl<P: Pipeline> ParameterRegistry<P> {
    pub fn new(pipeline: P) -> WfResult<Self> {
        let handles = Self::discover(&pipeline)?;
        debug!(parameters = handles.len(), "discovered tunable parameters");
        let fixed = vec![false; handles.len()];
        Ok(Self {
            pipeline,
            handles,
            fixed,
        })
    }

    /// Every argument that its operation declares tunable and that currently
    /// holds a numeric literal.
    pub fn discover(pipeline: &P) -> WfResult<Vec<ParameterHandle>> {
        let mut handles = Vec::new();
        for name in pipeline.task_names() {
            let task = pipeline.get_task(&name)?;
            let Some(operation) = task.operation() else {
                continue;
            };
            let declared = operation.parameters();
            for (position, argument) in task.arguments().iter().enumerate() {
                let tunable = declared.get(position).is_some_and(|p| p.tunable);
                if tunable && argument.numeric().is_some() {
                    handles.push(ParameterHandle {
                        task: name.clone(),
                        position,
                    });
                }
            }
        }
        Ok(handles)
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// Mutable access to the underlying pipeline. Changing a task's
    /// signature through this invalidates the discovered handles.
    pub fn pipeline_mut(&mut self) -> &mut P {
        &mut self.pipeline
    }

    pub fn into_pipeline(self) -> P {
        self.pipeline
    }

    pub fn handles(&self) -> &[ParameterHandle] {
        &self.handles
    }

    /// Total number of handles, fixed and free.
    pub fn count(&self) -> usize {
        self.handles.len()
    }

    pub fn free_count(&self) -> usize {
        self.fixed.iter().filter(|f| !**f).count()
    }

    pub fn fixed_mask(&self) -> &[bool] {
        &self.fixed
    }

    pub fn is_fixed(&self, index: usize) -> WfResult<bool> {
        self.check_index(index)?;
        Ok(self.fixed[index])
    }

    /// Exclude handle `index` (into the full list) from the search vector.
    pub fn fix(&mut self, index: usize) -> WfResult<()> {
        self.check_index(index)?;
        self.fixed[index] = true;
        Ok(())
    }

    /// Include handle `index` (into the full list) in the search vector.
    pub fn free(&mut self, index: usize) -> WfResult<()> {
        self.check_index(index)?;
        self.fixed[index] = false;
        Ok(())
    }

    pub fn get_free_values(&self) -> WfResult<Vec<f64>> {
        self.free_handles().map(|h| self.read(h)).collect()
    }

    /// Write `values` into the free handles, in registry order.
    pub fn set_free_values(&mut self, values: &[f64]) -> WfResult<()> {
        let expected = self.free_count();
        if values.len() != expected {
            return Err(RegistryError::ShapeMismatch {
                expected,
                actual: values.len(),
            }
            .into());
        }
        let targets: Vec<ParameterHandle> = self.free_handles().cloned().collect();
        for (handle, value) in targets.iter().zip(values) {
            self.write(handle, *value)?;
        }
        Ok(())
    }

    pub fn get_all_values(&self) -> WfResult<Vec<f64>> {
        self.handles.iter().map(|h| self.read(h)).collect()
    }

    /// Write `values` into every handle regardless of the mask.
    pub fn set_all_values(&mut self, values: &[f64]) -> WfResult<()> {
        if values.len() != self.handles.len() {
            return Err(RegistryError::ShapeMismatch {
                expected: self.handles.len(),
                actual: values.len(),
            }
            .into());
        }
        let targets = self.handles.clone();
        for (handle, value) in targets.iter().zip(values) {
            self.write(handle, *value)?;
        }
        Ok(())
    }

    /// `(task_name, argument_name)` for every handle, the argument name taken
    /// from the operation's declared parameters.
    pub fn get_all_names(&self) -> WfResult<Vec<(String, String)>> {
        self.handles
            .iter()
            .map(|h| -> WfResult<(String, String)> {
                let task = self.pipeline.get_task(&h.task)?;
                let operation = task
                    .operation()
                    .ok_or_else(|| stale(h, "task is no longer callable"))?;
                let argument = operation
                    .parameters()
                    .get(h.position)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| format!("arg{}", h.position));
                Ok((h.task.clone(), argument))
            })
            .collect()
    }

    /// `task.argument` labels for display.
    pub fn display_names(&self) -> WfResult<Vec<String>> {
        Ok(self
            .get_all_names()?
            .into_iter()
            .map(|(task, argument)| format!("{task}.{argument}"))
            .collect())
    }

    fn free_handles(&self) -> impl Iterator<Item = &ParameterHandle> {
        self.handles
            .iter()
            .zip(&self.fixed)
            .filter(|(_, fixed)| !**fixed)
            .map(|(h, _)| h)
    }

    fn check_index(&self, index: usize) -> WfResult<()> {
        if index >= self.handles.len() {
            return Err(RegistryError::IndexOutOfRange {
                index,
                count: self.handles.len(),
            }
            .into());
        }
        Ok(())
    }

    fn read(&self, handle: &ParameterHandle) -> WfResult<f64> {
        let task = self.pipeline.get_task(&handle.task)?;
        task.arguments()
            .get(handle.position)
            .and_then(Argument::numeric)
            .ok_or_else(|| stale(handle, "argument is no longer numeric").into())
    }

    fn write(&mut self, handle: &ParameterHandle, value: f64) -> WfResult<()> {
        let task = self.pipeline.get_task(&handle.task)?;
        // Integer literals become floats; operations round where they need to.
        match task.arguments().get(handle.position) {
            Some(Argument::Literal(v)) if v.is_numeric() => {}
            _ => return Err(stale(handle, "argument is no longer numeric").into()),
        }
        let updated: Task = task
            .with_argument(handle.position, Argument::literal(value))
            .ok_or_else(|| stale(handle, "argument position out of range"))?;
        self.pipeline.set_task(&handle.task, updated)
    }
}

fn stale(handle: &ParameterHandle, message: &str) -> RegistryError {
    RegistryError::StaleHandle {
        task: handle.task.clone(),
        position: handle.position,
        message: message.to_string(),
    }
}
