//! Optimizer configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use wf_types::{OptimizerError, WfResult};

use crate::metrics::MetricKind;
use crate::simplex::NelderMead;

/// Settings for an optimization run.
///
/// Every field has a default, so a JSON settings file only needs to name the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    /// Simplex iteration budget.
    pub max_iterations: usize,
    /// Convergence tolerance on the simplex size.
    pub xatol: f64,
    /// Convergence tolerance on the objective spread.
    pub fatol: f64,
    /// Memo cache capacity (0 disables caching).
    pub cache_capacity: usize,
    /// Objective assigned to a failed evaluation before anything succeeded.
    pub failure_penalty: f64,
    pub metric: MetricKind,
    /// Log every evaluated candidate at info level.
    pub debug_output: bool,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            xatol: 1e-3,
            fatol: 1e-4,
            cache_capacity: 10,
            failure_penalty: f64::MAX,
            metric: MetricKind::default(),
            debug_output: false,
        }
    }
}

impl OptimizerSettings {
    pub fn new(metric: MetricKind) -> Self {
        Self {
            metric,
            ..Self::default()
        }
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_tolerances(mut self, xatol: f64, fatol: f64) -> Self {
        self.xatol = xatol;
        self.fatol = fatol;
        self
    }

    pub fn with_cache_capacity(mut self, n: usize) -> Self {
        self.cache_capacity = n;
        self
    }

    pub fn with_metric(mut self, metric: MetricKind) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_debug_output(mut self, enabled: bool) -> Self {
        self.debug_output = enabled;
        self
    }

    pub fn from_json(json: &str) -> WfResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> WfResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> WfResult<()> {
        let invalid = |message: &str| -> WfResult<()> {
            Err(OptimizerError::InvalidSettings {
                message: message.to_string(),
            }
            .into())
        };
        if !(self.xatol >= 0.0) || !(self.fatol >= 0.0) {
            return invalid("tolerances must be non-negative");
        }
        if !self.failure_penalty.is_finite() {
            return invalid("failure_penalty must be finite");
        }
        Ok(())
    }

    /// Simplex solver seeded at `start`, with these tolerances.
    pub(crate) fn simplex(&self, start: Vec<f64>) -> NelderMead {
        NelderMead::new(start).with_tolerances(self.xatol, self.fatol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_types::WfError;

    #[test]
    fn defaults() {
        let settings = OptimizerSettings::default();
        assert_eq!(settings.max_iterations, 100);
        assert_eq!(settings.xatol, 1e-3);
        assert_eq!(settings.cache_capacity, 10);
        assert_eq!(settings.metric, MetricKind::LabelOverlap);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn builder_chain() {
        let settings = OptimizerSettings::new(MetricKind::InverseMse)
            .with_max_iterations(5)
            .with_tolerances(1e-6, 1e-8)
            .with_cache_capacity(0)
            .with_debug_output(true);
        assert_eq!(settings.metric, MetricKind::InverseMse);
        assert_eq!(settings.max_iterations, 5);
        let simplex = settings.simplex(vec![1.0]);
        assert_eq!(simplex.xatol, 1e-6);
        assert_eq!(simplex.fatol, 1e-8);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let json = r#"{"max_iterations": 7, "metric": "sparse_binary_overlap"}"#;
        let settings = OptimizerSettings::from_json(json).unwrap();
        assert_eq!(settings.max_iterations, 7);
        assert_eq!(settings.metric, MetricKind::SparseBinaryOverlap);
        assert_eq!(settings.cache_capacity, 10);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let err = OptimizerSettings::from_json(r#"{"xatol": -1.0}"#).unwrap_err();
        assert!(matches!(
            err,
            WfError::Optimizer(OptimizerError::InvalidSettings { .. })
        ));
        assert!(matches!(
            OptimizerSettings::from_json("{not json"),
            Err(WfError::Serialization(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            OptimizerSettings::from_path("/nonexistent/wf-settings.json"),
            Err(WfError::Io(_))
        ));
    }
}
