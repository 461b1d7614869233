//! Bayesian A/B: a joint regression of reward on a treatment indicator.
//!
//! Design rows are `[x, 1 - x]` (plus a `1` when the intercept is enabled)
//! where `x = 1` for draws on the treatment arm. Each arm is summarised by the
//! MAP estimate of its own coefficient and the matching diagonal entry of the
//! Laplace covariance.

use crate::glm::{GlmPosterior, Link};
use crate::optimizer::Lbfgs;
use bandit_core::{BanditError, BanditResult};
use ndarray::{Array1, Array2};
use rand::Rng;

/// Prior of one arm's effect, `N(mu, sigma)` with `sigma` used as variance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectPrior {
    pub mu: f64,
    pub sigma: f64,
}

/// Posterior `(mu, sigma)` of the treatment and control arms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbPosterior {
    pub treatment: (f64, f64),
    pub control: (f64, f64),
}

/// Fit the joint posterior from the creation priors over every observed
/// `(is_treatment, reward)` pair.
pub fn fit(
    treatment: EffectPrior,
    control: EffectPrior,
    observations: &[(bool, f64)],
    link: Link,
    intercept: bool,
    optimizer: &Lbfgs,
) -> BanditResult<AbPosterior> {
    for prior in [treatment, control] {
        if prior.sigma <= 0.0 {
            return Err(BanditError::Numerical(format!(
                "arm prior sigma must be positive, got {}",
                prior.sigma
            )));
        }
    }

    let dim = if intercept { 3 } else { 2 };
    let mut design = Array2::<f64>::zeros((observations.len(), dim));
    for (row, (is_treatment, _)) in observations.iter().enumerate() {
        design.row_mut(row).assign(&indicator_row(*is_treatment, intercept));
    }
    let rewards: Array1<f64> = observations.iter().map(|(_, r)| *r).collect();

    let mut prior_mean = vec![treatment.mu, control.mu];
    let mut prior_precision = vec![1.0 / treatment.sigma, 1.0 / control.sigma];
    if intercept {
        // Proper, so the MAP point stays finite when every reward is 0 (or 1).
        prior_mean.push(0.0);
        prior_precision.push(1.0 / treatment.sigma.max(control.sigma));
    }

    let posterior = GlmPosterior::new(
        design,
        rewards,
        link,
        Array1::from(prior_mean),
        Array1::from(prior_precision),
    )?
    .fit(optimizer)?;

    let sds = posterior.std_devs();
    Ok(AbPosterior {
        treatment: (posterior.mean[0], sds[0]),
        control: (posterior.mean[1], sds[1]),
    })
}

/// Allocation is a fair split; the posterior only informs reporting.
pub fn choose_arm<R: Rng + ?Sized>(n_arms: usize, rng: &mut R) -> BanditResult<usize> {
    if n_arms == 0 {
        return Err(BanditError::Numerical("cannot choose from zero arms".to_string()));
    }
    Ok(rng.gen_range(0..n_arms))
}

fn indicator_row(is_treatment: bool, intercept: bool) -> Array1<f64> {
    let x = if is_treatment { 1.0 } else { 0.0 };
    let mut row = vec![x, 1.0 - x];
    if intercept {
        row.push(1.0);
    }
    Array1::from(row)
}
