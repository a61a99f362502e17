//! Nelder–Mead downhill simplex, run through argmin's `Executor`.
//!
//! argmin's own Nelder–Mead only stops on the spread of the vertex costs. This
//! solver also requires the simplex to shrink below a positional tolerance,
//! and builds its starting simplex from a single point.

use argmin::core::{
    CostFunction, Error, IterState, Problem, Solver, TerminationReason, TerminationStatus, KV,
};
use serde::{Deserialize, Serialize};

/// Relative step used to build the initial simplex around a non-zero start.
const NONZERO_STEP: f64 = 0.05;
/// Absolute step used for start components that are exactly zero.
const ZERO_STEP: f64 = 0.00025;

/// Iteration state of a simplex run over plain `Vec<f64>` parameters.
pub type SimplexState = IterState<Vec<f64>, (), (), (), (), f64>;

/// Nelder–Mead with the standard reflection (1), expansion (2),
/// contraction (0.5) and shrink (0.5) coefficients.
///
/// Converged once every vertex lies within `xatol` of the best one (per
/// component) and every vertex cost within `fatol` of the best cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NelderMead {
    pub xatol: f64,
    pub fatol: f64,
    alpha: f64,
    gamma: f64,
    rho: f64,
    sigma: f64,
    start: Vec<f64>,
    /// `(vertex, cost)`, sorted by cost after every step.
    vertices: Vec<(Vec<f64>, f64)>,
}

impl NelderMead {
    pub fn new(start: Vec<f64>) -> Self {
        Self {
            xatol: 1e-4,
            fatol: 1e-4,
            alpha: 1.0,
            gamma: 2.0,
            rho: 0.5,
            sigma: 0.5,
            start,
            vertices: Vec::new(),
        }
    }

    pub fn with_tolerances(mut self, xatol: f64, fatol: f64) -> Self {
        self.xatol = xatol;
        self.fatol = fatol;
        self
    }

    /// `start` plus one vertex per dimension, stepped 5 % along that axis
    /// (or by 0.00025 where the component is zero).
    pub fn initial_simplex(start: &[f64]) -> Vec<Vec<f64>> {
        let mut simplex = Vec::with_capacity(start.len() + 1);
        simplex.push(start.to_vec());
        for k in 0..start.len() {
            let mut vertex = start.to_vec();
            vertex[k] = if vertex[k] != 0.0 {
                (1.0 + NONZERO_STEP) * vertex[k]
            } else {
                ZERO_STEP
            };
            simplex.push(vertex);
        }
        simplex
    }

    fn converged(&self) -> bool {
        let Some(((best, best_cost), rest)) = self.vertices.split_first() else {
            return false;
        };
        let size = rest
            .iter()
            .flat_map(|(v, _)| v.iter().zip(best).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let spread = rest
            .iter()
            .map(|(_, c)| (c - best_cost).abs())
            .fold(0.0, f64::max);
        size <= self.xatol && spread <= self.fatol
    }

    fn sort(&mut self) {
        self.vertices.sort_by(|a, b| a.1.total_cmp(&b.1));
    }

    fn best_state(&self, state: SimplexState) -> SimplexState {
        let (best, cost) = &self.vertices[0];
        state.param(best.clone()).cost(*cost)
    }

    /// One reflect/expand/contract/shrink step on the sorted simplex.
    fn step<O>(&mut self, problem: &mut Problem<O>) -> Result<(), Error>
    where
        O: CostFunction<Param = Vec<f64>, Output = f64>,
    {
        let n = self.vertices.len() - 1;
        let best_cost = self.vertices[0].1;
        let second_worst_cost = self.vertices[n - 1].1;
        let (worst, worst_cost) = self.vertices[n].clone();

        let mut centroid = vec![0.0; n];
        for (vertex, _) in &self.vertices[..n] {
            for (c, v) in centroid.iter_mut().zip(vertex) {
                *c += v / n as f64;
            }
        }
        // centroid + t * (centroid - worst)
        let along = |t: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&worst)
                .map(|(c, w)| c + t * (c - w))
                .collect()
        };

        let reflected = along(self.alpha);
        let reflected_cost = problem.cost(&reflected)?;

        if reflected_cost < best_cost {
            let expanded = along(self.alpha * self.gamma);
            let expanded_cost = problem.cost(&expanded)?;
            self.vertices[n] = if expanded_cost < reflected_cost {
                (expanded, expanded_cost)
            } else {
                (reflected, reflected_cost)
            };
            return Ok(());
        }

        if reflected_cost < second_worst_cost {
            self.vertices[n] = (reflected, reflected_cost);
            return Ok(());
        }

        if reflected_cost < worst_cost {
            // outside contraction
            let contracted = along(self.rho * self.alpha);
            let contracted_cost = problem.cost(&contracted)?;
            if contracted_cost <= reflected_cost {
                self.vertices[n] = (contracted, contracted_cost);
                return Ok(());
            }
        } else {
            // inside contraction
            let contracted = along(-self.rho);
            let contracted_cost = problem.cost(&contracted)?;
            if contracted_cost < worst_cost {
                self.vertices[n] = (contracted, contracted_cost);
                return Ok(());
            }
        }

        let best = self.vertices[0].0.clone();
        for (vertex, cost) in self.vertices.iter_mut().skip(1) {
            for (v, b) in vertex.iter_mut().zip(&best) {
                *v = b + self.sigma * (*v - b);
            }
            *cost = problem.cost(vertex)?;
        }
        Ok(())
    }
}

impl<O> Solver<O, SimplexState> for NelderMead
where
    O: CostFunction<Param = Vec<f64>, Output = f64>,
{
    const NAME: &'static str = "Nelder-Mead";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: SimplexState,
    ) -> Result<(SimplexState, Option<KV>), Error> {
        if self.start.is_empty() {
            return Err(Error::msg("simplex search needs at least one parameter"));
        }
        self.vertices = Self::initial_simplex(&self.start)
            .into_iter()
            .map(|vertex| {
                let cost = problem.cost(&vertex)?;
                Ok((vertex, cost))
            })
            .collect::<Result<_, Error>>()?;
        self.sort();
        Ok((self.best_state(state), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        state: SimplexState,
    ) -> Result<(SimplexState, Option<KV>), Error> {
        self.step(problem)?;
        self.sort();
        Ok((self.best_state(state), None))
    }

    fn terminate(&mut self, _state: &SimplexState) -> TerminationStatus {
        if self.converged() {
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        } else {
            TerminationStatus::NotTerminated
        }
    }
}
