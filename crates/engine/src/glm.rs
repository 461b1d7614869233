//! Bayesian generalized linear model posterior with an independent Normal
//! prior. Identity link has a closed form; the logistic link is fitted by
//! L-BFGS and summarised with a Laplace approximation at the MAP point.

use crate::linalg::{invert_spd, solve_spd};
use crate::optimizer::{ConvergenceStatus, Lbfgs, Objective};
use bandit_core::types::RewardType;
use bandit_core::{BanditError, BanditResult};
use ndarray::{Array1, Array2, Axis};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Identity,
    Logistic,
}

impl Link {
    pub fn for_reward(reward_type: RewardType) -> Self {
        match reward_type {
            RewardType::Normal => Link::Identity,
            RewardType::Bernoulli => Link::Logistic,
        }
    }

    pub fn apply(&self, eta: f64) -> f64 {
        match self {
            Link::Identity => eta,
            Link::Logistic => sigmoid(eta),
        }
    }
}

/// Gaussian summary of a posterior.
#[derive(Debug, Clone)]
pub struct Gaussian {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
}

impl Gaussian {
    pub fn std_devs(&self) -> Array1<f64> {
        self.covariance.diag().mapv(|v| v.max(0.0).sqrt())
    }
}

/// Negative log-posterior of `rewards ~ link(design·θ)` under
/// `θ ~ N(prior_mean, diag(1 / prior_precision))`. A zero precision leaves
/// that coefficient unpenalised.
#[derive(Debug, Clone)]
pub struct GlmPosterior {
    design: Array2<f64>,
    rewards: Array1<f64>,
    link: Link,
    prior_mean: Array1<f64>,
    prior_precision: Array1<f64>,
}

impl GlmPosterior {
    pub fn new(
        design: Array2<f64>,
        rewards: Array1<f64>,
        link: Link,
        prior_mean: Array1<f64>,
        prior_precision: Array1<f64>,
    ) -> BanditResult<Self> {
        let dim = prior_mean.len();
        if design.ncols() != dim || prior_precision.len() != dim {
            return Err(BanditError::Numerical(format!(
                "design has {} columns but prior has {} / {} entries",
                design.ncols(),
                dim,
                prior_precision.len()
            )));
        }
        if design.nrows() != rewards.len() {
            return Err(BanditError::Numerical(format!(
                "design has {} rows but {} rewards were given",
                design.nrows(),
                rewards.len()
            )));
        }
        if prior_precision.iter().any(|p| *p < 0.0 || !p.is_finite()) {
            return Err(BanditError::Numerical(
                "prior precision must be finite and non-negative".to_string(),
            ));
        }
        Ok(Self {
            design,
            rewards,
            link,
            prior_mean,
            prior_precision,
        })
    }

    /// Hessian of the negative log-posterior at `theta`.
    pub fn hessian(&self, theta: &Array1<f64>) -> Array2<f64> {
        let weights: Array1<f64> = match self.link {
            Link::Identity => Array1::ones(self.design.nrows()),
            Link::Logistic => self.design.dot(theta).mapv(|eta| {
                let p = sigmoid(eta);
                p * (1.0 - p)
            }),
        };
        let weighted = &self.design * &weights.insert_axis(Axis(1));
        let mut h = self.design.t().dot(&weighted);
        for (i, p) in self.prior_precision.iter().enumerate() {
            h[[i, i]] += p;
        }
        h
    }

    /// Posterior mean (MAP point) and covariance (inverse Hessian there).
    pub fn fit(&self, optimizer: &Lbfgs) -> BanditResult<Gaussian> {
        let mean = match self.link {
            Link::Identity => {
                let h = self.hessian(&self.prior_mean);
                let b = &self.prior_mean * &self.prior_precision
                    + self.design.t().dot(&self.rewards);
                solve_spd(&h, &b)?
            }
            Link::Logistic => {
                let result = optimizer.minimize(self, self.prior_mean.clone());
                debug!(
                    iterations = result.iterations,
                    status = ?result.status,
                    gradient_norm = result.gradient_norm,
                    "Logistic MAP fit finished"
                );
                if result.status == ConvergenceStatus::NumericalError {
                    return Err(BanditError::Numerical(
                        "MAP optimisation hit a non-finite objective".to_string(),
                    ));
                }
                result.solution
            }
        };
        let covariance = invert_spd(&self.hessian(&mean))?;
        Ok(Gaussian { mean, covariance })
    }
}

impl Objective for GlmPosterior {
    fn value_and_gradient(&self, theta: &Array1<f64>) -> (f64, Array1<f64>) {
        let offset = theta - &self.prior_mean;
        let prior_term = 0.5 * (&offset * &offset * &self.prior_precision).sum();
        let prior_grad = &offset * &self.prior_precision;

        let eta = self.design.dot(theta);
        let (nll, residual) = match self.link {
            Link::Identity => {
                let residual = &eta - &self.rewards;
                (0.5 * residual.dot(&residual), residual)
            }
            Link::Logistic => {
                let nll = eta
                    .iter()
                    .zip(self.rewards.iter())
                    .map(|(&e, &y)| softplus(e) - y * e)
                    .sum::<f64>();
                (nll, eta.mapv(sigmoid) - &self.rewards)
            }
        };

        let grad = prior_grad + self.design.t().dot(&residual);
        (prior_term + nll, grad)
    }
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

// log(1 + e^x) without overflow.
fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_identity_link_matches_conjugate_regression() {
        // One coefficient, unit noise: posterior precision = 1/s0 + n.
        let design = array![[1.0], [1.0], [1.0]];
        let rewards = array![2.0, 4.0, 3.0];
        let glm =
            GlmPosterior::new(design, rewards, Link::Identity, array![0.0], array![1.0]).unwrap();
        let post = glm.fit(&Lbfgs::default()).unwrap();
        assert!((post.mean[0] - 9.0 / 4.0).abs() < 1e-12);
        assert!((post.covariance[[0, 0]] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_logistic_fit_has_zero_gradient_at_solution() {
        let design = array![[1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]];
        let rewards = array![1.0, 0.0, 0.0, 1.0, 1.0];
        let glm = GlmPosterior::new(
            design,
            rewards,
            Link::Logistic,
            array![0.0, 0.0],
            array![1.0, 1.0],
        )
        .unwrap();
        let post = glm.fit(&Lbfgs::default()).unwrap();
        let (_, grad) = glm.value_and_gradient(&post.mean);
        assert!(grad.iter().all(|g| g.abs() < 1e-4), "{grad:?}");
        assert!(post.mean[0] > 0.0);
        assert!(post.covariance.diag().iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_no_data_returns_prior() {
        let glm = GlmPosterior::new(
            Array2::zeros((0, 2)),
            Array1::zeros(0),
            Link::Identity,
            array![1.0, -1.0],
            array![0.5, 2.0],
        )
        .unwrap();
        let post = glm.fit(&Lbfgs::default()).unwrap();
        assert!((post.mean[0] - 1.0).abs() < 1e-12);
        assert!((post.covariance[[0, 0]] - 2.0).abs() < 1e-12);
        assert!((post.covariance[[1, 1]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let err = GlmPosterior::new(
            array![[1.0, 2.0]],
            array![1.0, 0.0],
            Link::Identity,
            array![0.0, 0.0],
            array![1.0, 1.0],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_sigmoid_is_stable() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-15);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!((sigmoid(800.0) - 1.0).abs() < 1e-15);
        assert!(softplus(800.0).is_finite());
    }
}
