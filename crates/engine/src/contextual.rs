//! Contextual arms: one Bayesian regression per arm over the context vector.

use crate::distributions::argmax;
use crate::glm::{Gaussian, GlmPosterior, Link};
use crate::linalg::{quad_form, to_array2};
use crate::optimizer::Lbfgs;
use bandit_core::{BanditError, BanditResult};
use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Posterior view of one contextual arm.
#[derive(Debug, Clone, Copy)]
pub struct ArmPosterior<'a> {
    pub mu: &'a [f64],
    pub covariance: &'a [Vec<f64>],
}

/// Refit an arm from its creation prior `N(mu_init·1, sigma_init·I)` over
/// every observed `(context, reward)` pair.
pub fn refit_arm(
    mu_init: f64,
    sigma_init: f64,
    n_contexts: usize,
    contexts: &[Vec<f64>],
    rewards: &[f64],
    link: Link,
    optimizer: &Lbfgs,
) -> BanditResult<Gaussian> {
    if sigma_init <= 0.0 {
        return Err(BanditError::Numerical(format!(
            "sigma_init must be positive, got {sigma_init}"
        )));
    }
    if contexts.iter().any(|c| c.len() != n_contexts) {
        return Err(BanditError::InvalidInput(format!(
            "every observation needs {n_contexts} context values"
        )));
    }
    let design = if contexts.is_empty() {
        Array2::zeros((0, n_contexts))
    } else {
        to_array2(contexts)?
    };
    let posterior = GlmPosterior::new(
        design,
        Array1::from(rewards.to_vec()),
        link,
        Array1::from_elem(n_contexts, mu_init),
        Array1::from_elem(n_contexts, 1.0 / sigma_init),
    )?;
    posterior.fit(optimizer)
}

/// Thompson step: sample each arm's expected reward at `context` and pick the
/// largest.
pub fn choose_arm<R: Rng + ?Sized>(
    arms: &[ArmPosterior<'_>],
    context: &[f64],
    link: Link,
    rng: &mut R,
) -> BanditResult<usize> {
    let x = Array1::from(context.to_vec());
    let mut samples = Vec::with_capacity(arms.len());
    for (i, arm) in arms.iter().enumerate() {
        if arm.mu.len() != x.len() {
            return Err(BanditError::InvalidInput(format!(
                "arm {i} expects {} context values, got {}",
                arm.mu.len(),
                x.len()
            )));
        }
        let mu = Array1::from(arm.mu.to_vec());
        let cov = to_array2(arm.covariance)?;
        let mean = mu.dot(&x);
        let sd = quad_form(&x, &cov).max(0.0).sqrt();
        let eta = if sd > 0.0 {
            Normal::new(mean, sd)
                .map(|d| d.sample(rng))
                .map_err(|e| BanditError::Numerical(format!("Normal({mean}, {sd}): {e}")))?
        } else {
            mean
        };
        samples.push(link.apply(eta));
    }
    argmax(&samples)
}
