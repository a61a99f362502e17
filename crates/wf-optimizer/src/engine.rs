//! The optimization engine: drives a pipeline's free parameters toward the
//! output that best matches a reference.
//!
//! A run writes each candidate vector into the pipeline, evaluates the target
//! task, scores it with the chosen metric and hands the negated score to a
//! Nelder–Mead search. Failed evaluations are scored as no better than the
//! best seen so far instead of aborting the run. The pipeline is restored to
//! its starting parameters when the run ends; applying the returned vector is
//! the caller's decision.

use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus, KV};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wf_types::{internal_error, Image, MetricError, OptimizerError, Pipeline, Value, WfResult};

use crate::cache::MemoCache;
use crate::metrics::MetricKind;
use crate::progress::{CancellationToken, RunMonitor};
use crate::registry::ParameterRegistry;
use crate::settings::OptimizerSettings;
use crate::simplex::SimplexState;

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Converged,
    Cancelled,
    /// The iteration budget ran out first.
    ExhaustedIterations,
    /// No candidate, including the start point, evaluated successfully.
    NoSuccessfulEvaluation,
}

/// Result of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub id: RunId,
    pub target: String,
    pub metric: MetricKind,
    /// Best free-parameter vector found; the start point if nothing succeeded.
    pub best: Vec<f64>,
    pub best_quality: Option<f64>,
    pub outcome: RunOutcome,
    pub iterations: usize,
    /// Pipeline evaluations actually performed (cache hits excluded).
    pub evaluations: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OptimizationResult {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Tunes the free parameters of a pipeline.
pub struct Optimizer<P> {
    registry: ParameterRegistry<P>,
    settings: OptimizerSettings,
    monitor: Arc<RunMonitor>,
    previous: Option<Vec<f64>>,
}

impl<P: Pipeline> Optimizer<P> {
    /// Discover the pipeline's parameters and prepare an idle optimizer.
    pub fn new(pipeline: P, settings: OptimizerSettings) -> WfResult<Self> {
        settings.validate()?;
        Ok(Self {
            registry: ParameterRegistry::new(pipeline)?,
            settings,
            monitor: RunMonitor::new(),
            previous: None,
        })
    }

    pub fn registry(&self) -> &ParameterRegistry<P> {
        &self.registry
    }

    /// Mutable registry access, e.g. to fix or free parameters between runs.
    pub fn registry_mut(&mut self) -> &mut ParameterRegistry<P> {
        &mut self.registry
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    pub fn into_pipeline(self) -> P {
        self.registry.into_pipeline()
    }

    /// Shared handle for observers on other threads.
    pub fn monitor(&self) -> Arc<RunMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    pub fn is_cancelling(&self) -> bool {
        self.monitor.is_cancelling()
    }

    pub fn cancel(&self) {
        self.monitor.cancel();
    }

    /// `(iterations, qualities)` of the current or last run.
    pub fn get_progress_log(&self) -> (Vec<usize>, Vec<f64>) {
        let log = self.monitor.progress();
        (log.iterations, log.qualities)
    }

    /// Run with the iteration budget and metric from the settings.
    pub fn run(
        &mut self,
        target: &str,
        reference: &Image,
        cancel: &CancellationToken,
    ) -> WfResult<OptimizationResult> {
        let (max_iterations, metric) = (self.settings.max_iterations, self.settings.metric);
        self.optimize(target, reference, max_iterations, metric, cancel)
    }

    /// Search for the free-parameter vector whose `target` output best
    /// matches `reference` under `metric`.
    ///
    /// Not reentrant: calling this while a run is active is a programming
    /// error and fails with [`OptimizerError::AlreadyRunning`].
    pub fn optimize(
        &mut self,
        target: &str,
        reference: &Image,
        max_iterations: usize,
        metric: MetricKind,
        cancel: &CancellationToken,
    ) -> WfResult<OptimizationResult> {
        if !self.monitor.begin(cancel) {
            return Err(OptimizerError::AlreadyRunning.into());
        }
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            run = %id,
            target = %target,
            metric = %metric,
            max_iterations,
            free_parameters = self.registry.free_count(),
            "starting optimization"
        );

        let searched = self.search(target, reference, max_iterations, metric, cancel);
        self.monitor.finish();
        let search = searched?;

        let result = OptimizationResult {
            id,
            target: target.to_string(),
            metric,
            best: search.best,
            best_quality: search.best_quality,
            outcome: search.outcome,
            iterations: search.iterations,
            evaluations: self.monitor.evaluation_count(),
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            run = %id,
            outcome = ?result.outcome,
            iterations = result.iterations,
            evaluations = result.evaluations,
            best_quality = ?result.best_quality,
            "optimization finished"
        );
        Ok(result)
    }

    /// Write `best` into the free parameters, remembering the current values
    /// for [`undo`](Self::undo).
    pub fn apply(&mut self, best: &[f64]) -> WfResult<()> {
        let previous = self.registry.get_free_values()?;
        self.registry.set_free_values(best)?;
        self.previous = Some(previous);
        Ok(())
    }

    /// Restore the values replaced by the last [`apply`](Self::apply).
    /// Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> WfResult<bool> {
        match self.previous.take() {
            Some(previous) => {
                self.registry.set_free_values(&previous)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn search(
        &mut self,
        target: &str,
        reference: &Image,
        max_iterations: usize,
        metric: MetricKind,
        cancel: &CancellationToken,
    ) -> WfResult<SearchOutcome> {
        let start = self.registry.get_free_values()?;
        if max_iterations == 0 || start.is_empty() {
            return Ok(SearchOutcome {
                best: start.clone(),
                best_quality: None,
                outcome: if start.is_empty() {
                    RunOutcome::Converged
                } else {
                    RunOutcome::ExhaustedIterations
                },
                iterations: 0,
            });
        }

        let trace = Arc::new(Mutex::new(RunTrace::default()));
        let cache = RefCell::new(MemoCache::new(self.settings.cache_capacity));
        let objective = RunObjective {
            registry: RefCell::new(&mut self.registry),
            target,
            reference,
            metric,
            monitor: &self.monitor,
            cancel,
            cache: &cache,
            failure_penalty: self.settings.failure_penalty,
            debug_output: self.settings.debug_output,
            trace: Arc::clone(&trace),
        };
        let observer = ProgressObserver {
            monitor: Arc::clone(&self.monitor),
            cancel: cancel.clone(),
            trace: Arc::clone(&trace),
        };

        let converged = Executor::new(objective, self.settings.simplex(start.clone()))
            .configure(|state| state.max_iters(max_iterations as u64))
            .add_observer(observer, ObserverMode::Always)
            .run()
            .map(|res| {
                matches!(
                    res.state().get_termination_status(),
                    TerminationStatus::Terminated(TerminationReason::SolverConverged)
                )
            });
        debug!(cache = ?cache.borrow().stats(), "search ended");

        self.registry.set_free_values(&start)?;

        let converged = match converged {
            Ok(converged) => converged,
            Err(e) if cancel.is_cancelled() => {
                debug!(reason = %e, "search stopped on cancellation");
                false
            }
            Err(e) => return Err(internal_error!("simplex search failed: {e}")),
        };

        let trace = std::mem::take(&mut *trace.lock());
        let outcome = if cancel.is_cancelled() {
            RunOutcome::Cancelled
        } else if trace.best_observed.is_none() {
            RunOutcome::NoSuccessfulEvaluation
        } else if converged {
            RunOutcome::Converged
        } else {
            RunOutcome::ExhaustedIterations
        };

        Ok(SearchOutcome {
            best: trace.best_vector.unwrap_or(start),
            best_quality: trace.best_observed,
            outcome,
            iterations: trace.iterations,
        })
    }
}

struct SearchOutcome {
    best: Vec<f64>,
    best_quality: Option<f64>,
    outcome: RunOutcome,
    iterations: usize,
}

/// Best-so-far state of a run, shared by the objective and the observer.
#[derive(Debug, Default)]
struct RunTrace {
    /// Best quality of any successful evaluation; only ever increases.
    best_observed: Option<f64>,
    best_vector: Option<Vec<f64>>,
    iterations: usize,
}

/// The minimization objective of one run.
struct RunObjective<'a, P> {
    registry: RefCell<&'a mut ParameterRegistry<P>>,
    target: &'a str,
    reference: &'a Image,
    metric: MetricKind,
    monitor: &'a RunMonitor,
    cancel: &'a CancellationToken,
    cache: &'a RefCell<MemoCache>,
    failure_penalty: f64,
    debug_output: bool,
    trace: Arc<Mutex<RunTrace>>,
}

impl<P: Pipeline> RunObjective<'_, P> {
    /// Objective for points that were not (or could not be) scored.
    fn fallback(&self) -> f64 {
        self.trace
            .lock()
            .best_observed
            .map_or(self.failure_penalty, |q| -q)
    }

    fn quality(&self, x: &[f64]) -> WfResult<f64> {
        let mut registry = self.registry.borrow_mut();
        registry.set_free_values(x)?;
        let candidate = match registry.pipeline().get(self.target)? {
            Value::Image(img) => img,
            other => {
                return Err(MetricError::NotAnImage {
                    found: other.kind_name().to_string(),
                }
                .into())
            }
        };
        self.metric.fitness(&candidate, self.reference)
    }

    fn evaluate(&self, x: &[f64]) -> f64 {
        if self.cancel.is_cancelled() {
            return self.fallback();
        }
        if let Some(cached) = self.cache.borrow_mut().get(x) {
            return cached;
        }

        let evaluation = self.monitor.record_evaluation();
        let objective = match self.quality(x) {
            Ok(quality) => {
                let mut trace = self.trace.lock();
                if trace.best_observed.map_or(true, |best| quality > best) {
                    trace.best_observed = Some(quality);
                    trace.best_vector = Some(x.to_vec());
                }
                -quality
            }
            Err(e) => {
                warn!(
                    evaluation,
                    parameters = ?x,
                    error = %e,
                    "evaluation failed, scoring as penalty"
                );
                self.fallback()
            }
        };

        if self.debug_output {
            info!(evaluation, parameters = ?x, objective, "evaluated candidate");
        } else {
            debug!(evaluation, parameters = ?x, objective, "evaluated candidate");
        }
        self.cache.borrow_mut().insert(x, objective);
        objective
    }
}

impl<P: Pipeline> CostFunction for RunObjective<'_, P> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.evaluate(x))
    }
}

/// Appends to the progress log after every iteration and stops the search
/// once the run's token is cancelled.
struct ProgressObserver {
    monitor: Arc<RunMonitor>,
    cancel: CancellationToken,
    trace: Arc<Mutex<RunTrace>>,
}

impl Observe<SimplexState> for ProgressObserver {
    fn observe_iter(
        &mut self,
        _state: &SimplexState,
        _kv: &KV,
    ) -> Result<(), argmin::core::Error> {
        let (iteration, best_quality) = {
            let mut trace = self.trace.lock();
            trace.iterations += 1;
            (trace.iterations, trace.best_observed)
        };
        if let Some(quality) = best_quality {
            self.monitor.record_iteration(iteration, quality);
        }
        debug!(iteration, best_quality = ?best_quality, "iteration complete");

        if self.cancel.is_cancelled() {
            return Err(argmin::core::Error::msg("optimization cancelled"));
        }
        Ok(())
    }
}
