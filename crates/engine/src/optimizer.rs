//! Limited-memory BFGS (L-BFGS) minimizer used for MAP estimation.
//!
//! The two-loop recursion approximates `H⁻¹·∇f` from the last `memory`
//! position/gradient differences; step lengths come from an Armijo
//! backtracking line search.

use ndarray::Array1;
use std::collections::VecDeque;

/// A smooth function to minimize.
pub trait Objective {
    fn value_and_gradient(&self, x: &Array1<f64>) -> (f64, Array1<f64>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Converged,
    MaxIterations,
    Stalled,
    NumericalError,
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub solution: Array1<f64>,
    pub objective_value: f64,
    pub iterations: usize,
    pub status: ConvergenceStatus,
    pub gradient_norm: f64,
}

/// Armijo backtracking line search.
#[derive(Debug, Clone)]
pub struct BacktrackingLineSearch {
    c1: f64,
    rho: f64,
    max_iter: usize,
}

impl BacktrackingLineSearch {
    pub fn new(c1: f64, rho: f64, max_iter: usize) -> Self {
        Self { c1, rho, max_iter }
    }

    /// Step length satisfying `f(x + a·d) <= f(x) + c1·a·∇f(x)ᵀd`, or 0.0 if
    /// none is found.
    pub fn search<O: Objective>(
        &self,
        objective: &O,
        x: &Array1<f64>,
        fx: f64,
        grad: &Array1<f64>,
        d: &Array1<f64>,
    ) -> f64 {
        let dir_deriv = grad.dot(d);
        let mut alpha = 1.0;
        for _ in 0..self.max_iter {
            let x_new = x + &(d * alpha);
            let (fx_new, _) = objective.value_and_gradient(&x_new);
            if fx_new.is_finite() && fx_new <= fx + self.c1 * alpha * dir_deriv {
                return alpha;
            }
            alpha *= self.rho;
        }
        0.0
    }
}

impl Default for BacktrackingLineSearch {
    fn default() -> Self {
        Self::new(1e-4, 0.5, 60)
    }
}

#[derive(Debug, Clone)]
pub struct Lbfgs {
    max_iter: usize,
    tolerance: f64,
    memory: usize,
    line_search: BacktrackingLineSearch,
}

impl Lbfgs {
    pub fn new(max_iter: usize, tolerance: f64, memory: usize) -> Self {
        Self {
            max_iter,
            tolerance,
            memory: memory.max(1),
            line_search: BacktrackingLineSearch::default(),
        }
    }

    pub fn minimize<O: Objective>(&self, objective: &O, x0: Array1<f64>) -> OptimizationResult {
        let mut history: VecDeque<(Array1<f64>, Array1<f64>)> =
            VecDeque::with_capacity(self.memory);

        let mut x = x0;
        let (mut fx, mut grad) = objective.value_and_gradient(&x);
        let mut grad_norm = norm(&grad);

        if !fx.is_finite() {
            return Self::result(x, fx, 0, ConvergenceStatus::NumericalError, grad_norm);
        }

        for iter in 0..self.max_iter {
            if grad_norm < self.tolerance {
                return Self::result(x, fx, iter, ConvergenceStatus::Converged, grad_norm);
            }

            let mut d = Self::direction(&history, &grad);
            if grad.dot(&d) >= 0.0 {
                // Curvature pairs went stale; restart from steepest descent.
                history.clear();
                d = -&grad;
            }

            let alpha = self.line_search.search(objective, &x, fx, &grad, &d);
            if alpha <= 0.0 {
                return Self::result(x, fx, iter, ConvergenceStatus::Stalled, grad_norm);
            }

            let x_new = &x + &(&d * alpha);
            let (fx_new, grad_new) = objective.value_and_gradient(&x_new);
            if !fx_new.is_finite() {
                return Self::result(x, fx, iter, ConvergenceStatus::NumericalError, grad_norm);
            }

            let s = &x_new - &x;
            let y = &grad_new - &grad;
            if y.dot(&s) > 1e-12 {
                if history.len() == self.memory {
                    history.pop_front();
                }
                history.push_back((s, y));
            }

            let improvement = fx - fx_new;
            x = x_new;
            fx = fx_new;
            grad = grad_new;
            grad_norm = norm(&grad);

            if improvement.abs() <= self.tolerance * (1.0 + fx.abs())
                && grad_norm < self.tolerance.sqrt()
            {
                return Self::result(x, fx, iter + 1, ConvergenceStatus::Converged, grad_norm);
            }
        }

        Self::result(x, fx, self.max_iter, ConvergenceStatus::MaxIterations, grad_norm)
    }

    // Two-loop recursion.
    fn direction(
        history: &VecDeque<(Array1<f64>, Array1<f64>)>,
        grad: &Array1<f64>,
    ) -> Array1<f64> {
        let mut q = -grad;
        if history.is_empty() {
            return q;
        }

        let mut alphas = Vec::with_capacity(history.len());
        for (s, y) in history.iter().rev() {
            let rho = 1.0 / y.dot(s);
            let a = rho * s.dot(&q);
            q.scaled_add(-a, y);
            alphas.push((rho, a));
        }

        if let Some((s, y)) = history.back() {
            let gamma = s.dot(y) / y.dot(y);
            q *= gamma;
        }

        for ((s, y), (rho, a)) in history.iter().zip(alphas.into_iter().rev()) {
            let b = rho * y.dot(&q);
            q.scaled_add(a - b, s);
        }
        q
    }

    fn result(
        solution: Array1<f64>,
        objective_value: f64,
        iterations: usize,
        status: ConvergenceStatus,
        gradient_norm: f64,
    ) -> OptimizationResult {
        OptimizationResult {
            solution,
            objective_value,
            iterations,
            status,
            gradient_norm,
        }
    }
}

impl Default for Lbfgs {
    fn default() -> Self {
        Self::new(200, 1e-8, 10)
    }
}

fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}
