//! Closed-form conjugate updates and Thompson sampling draws.
//!
//! Samplers take the RNG explicitly so arm selection is reproducible under a
//! fixed seed.

use bandit_core::{BanditError, BanditResult};
use rand::Rng;
use rand_distr::{Beta, Distribution, Normal};

/// Beta-Binomial conjugate update.
pub fn update_beta_binomial(alpha: f64, beta: f64, successes: u64, failures: u64) -> (f64, f64) {
    (alpha + successes as f64, beta + failures as f64)
}

/// Normal-Normal conjugate update over the arm's full reward sample.
///
/// The likelihood spread is the standard error of the sample,
/// `stdev(rewards) / sqrt(n)`. Fails for an empty sample or one with zero
/// spread; callers pick a fallback likelihood for those cases.
pub fn update_normal_normal(mu: f64, sigma: f64, rewards: &[f64]) -> BanditResult<(f64, f64)> {
    if rewards.is_empty() {
        return Err(BanditError::Numerical(
            "Normal-Normal update needs at least one reward".to_string(),
        ));
    }
    let stdev = population_stdev(rewards);
    if stdev <= 0.0 || !stdev.is_finite() {
        return Err(BanditError::Numerical(format!(
            "Normal-Normal update needs rewards with positive spread (stdev = {stdev})"
        )));
    }
    let sigma_llhood = stdev / (rewards.len() as f64).sqrt();
    normal_posterior(mu, sigma, mean(rewards), sigma_llhood)
}

/// Posterior of a Normal prior `(mu, sigma)` after observing a sample mean
/// whose likelihood has standard deviation `sigma_llhood`.
pub fn normal_posterior(
    mu: f64,
    sigma: f64,
    sample_mean: f64,
    sigma_llhood: f64,
) -> BanditResult<(f64, f64)> {
    if sigma <= 0.0 || sigma_llhood <= 0.0 {
        return Err(BanditError::Numerical(format!(
            "Normal posterior needs positive spreads \
             (sigma = {sigma}, sigma_llhood = {sigma_llhood})"
        )));
    }
    let llhood_var = sigma_llhood.powi(2);
    let prior_var = sigma.powi(2);
    let denom = llhood_var + prior_var;
    let new_sigma = sigma_llhood * sigma / denom.sqrt();
    let new_mu = (mu * llhood_var + sample_mean * prior_var) / denom;
    Ok((new_mu, new_sigma))
}

/// Draw one `Beta(alpha_i, beta_i)` sample per arm and return the argmax.
pub fn sample_beta_binomial<R: Rng + ?Sized>(
    alphas: &[f64],
    betas: &[f64],
    rng: &mut R,
) -> BanditResult<usize> {
    check_lengths(alphas.len(), betas.len())?;
    let samples = alphas
        .iter()
        .zip(betas)
        .map(|(&a, &b)| {
            Beta::new(a, b)
                .map(|d| d.sample(rng))
                .map_err(|e| BanditError::Numerical(format!("Beta({a}, {b}): {e}")))
        })
        .collect::<BanditResult<Vec<f64>>>()?;
    argmax(&samples)
}

/// Draw one `Normal(mu_i, sigma_i)` sample per arm and return the argmax.
pub fn sample_normal<R: Rng + ?Sized>(
    mus: &[f64],
    sigmas: &[f64],
    rng: &mut R,
) -> BanditResult<usize> {
    check_lengths(mus.len(), sigmas.len())?;
    let samples = mus
        .iter()
        .zip(sigmas)
        .map(|(&m, &s)| {
            Normal::new(m, s)
                .map(|d| d.sample(rng))
                .map_err(|e| BanditError::Numerical(format!("Normal({m}, {s}): {e}")))
        })
        .collect::<BanditResult<Vec<f64>>>()?;
    argmax(&samples)
}

/// Index of the largest sample. Ties resolve to the lowest index.
pub fn argmax(samples: &[f64]) -> BanditResult<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &s) in samples.iter().enumerate() {
        if s.is_nan() {
            return Err(BanditError::Numerical(format!("sample {i} is NaN")));
        }
        match best {
            Some((_, b)) if s <= b => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i)
        .ok_or_else(|| BanditError::Numerical("cannot choose from zero arms".to_string()))
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by `n`).
pub fn population_stdev(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn check_lengths(a: usize, b: usize) -> BanditResult<()> {
    if a != b {
        return Err(BanditError::Numerical(format!(
            "parameter vectors differ in length ({a} vs {b})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_beta_binomial_update_is_exact() {
        assert_eq!(update_beta_binomial(5.0, 1.0, 1, 0), (6.0, 1.0));
        assert_eq!(update_beta_binomial(0.5, 2.5, 3, 7), (3.5, 9.5));
    }

    #[test]
    fn test_normal_normal_update() {
        let rewards = [1.0, 3.0];
        // stdev = 1, sigma_llhood = 1/sqrt(2), denom = 0.5 + 1
        let (mu, sigma) = update_normal_normal(0.0, 1.0, &rewards).unwrap();
        assert!((mu - 2.0 / 1.5).abs() < 1e-12);
        assert!((sigma - (0.5f64 / 1.5).sqrt()).abs() < 1e-12);
        assert!(sigma > 0.0 && sigma.is_finite());
    }

    #[test]
    fn test_normal_normal_rejects_degenerate_samples() {
        assert!(update_normal_normal(0.0, 1.0, &[]).is_err());
        assert!(update_normal_normal(0.0, 1.0, &[2.0]).is_err());
        assert!(update_normal_normal(0.0, 1.0, &[2.0, 2.0, 2.0]).is_err());
    }

    #[test]
    fn test_argmax_takes_first_of_ties() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7]).unwrap(), 1);
        assert!(argmax(&[]).is_err());
        assert!(argmax(&[0.1, f64::NAN]).is_err());
    }

    #[test]
    fn test_sampling_is_reproducible_under_seed() {
        let alphas = [2.0, 3.0, 1.5, 8.0];
        let betas = [5.0, 3.0, 1.5, 2.0];
        let picks = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20)
                .map(|_| sample_beta_binomial(&alphas, &betas, &mut rng).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(42), picks(42));
    }

    #[test]
    fn test_sample_normal_returns_argmax_of_its_draws() {
        let mus = [0.0, 1.0, -2.0];
        let sigmas = [1.0, 0.5, 2.0];
        let mut sampling_rng = StdRng::seed_from_u64(9);
        let mut replay_rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let chosen = sample_normal(&mus, &sigmas, &mut sampling_rng).unwrap();
            let draws: Vec<f64> = mus
                .iter()
                .zip(&sigmas)
                .map(|(&m, &s)| Normal::new(m, s).unwrap().sample(&mut replay_rng))
                .collect();
            assert_eq!(chosen, argmax(&draws).unwrap());
        }
    }

    #[test]
    fn test_dominant_arm_wins_almost_always() {
        let mut rng = StdRng::seed_from_u64(1);
        let wins = (0..200)
            .filter(|_| sample_beta_binomial(&[200.0, 1.0], &[1.0, 200.0], &mut rng).unwrap() == 0)
            .count();
        assert!(wins >= 199);
    }

    #[test]
    fn test_invalid_beta_parameters_fail() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(sample_beta_binomial(&[0.0, 1.0], &[1.0, 1.0], &mut rng).is_err());
        assert!(sample_beta_binomial(&[1.0], &[1.0, 1.0], &mut rng).is_err());
    }
}
