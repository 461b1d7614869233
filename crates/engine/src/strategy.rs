//! Allocation strategies, one per prior/reward family.
//!
//! Every experiment kind shares the same Experiment/Arm/Draw model; what
//! differs is how an arm is chosen and how its posterior is recomputed once
//! an outcome lands. `strategy_for` resolves that behavior from the
//! experiment's discriminants and fails on combinations it does not know.

use crate::bayes_ab::{self, EffectPrior};
use crate::contextual::{self, ArmPosterior};
use crate::distributions::{
    mean, normal_posterior, population_stdev, sample_beta_binomial, sample_normal,
    update_beta_binomial, update_normal_normal,
};
use crate::glm::Link;
use crate::linalg::to_rows;
use crate::optimizer::Lbfgs;
use bandit_core::config::EngineConfig;
use bandit_core::types::{ArmParams, Experiment, ExperimentKind, PriorType, RewardType};
use bandit_core::{BanditError, BanditResult};
use rand::RngCore;
use tracing::debug;
use uuid::Uuid;

/// One closed draw, as seen by a posterior refit.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub arm_id: Uuid,
    pub reward: f64,
    pub context: Option<Vec<f64>>,
}

pub trait PriorRewardStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check that every arm carries the parametrization this strategy reads.
    fn validate(&self, experiment: &Experiment) -> BanditResult<()>;

    /// Pick an arm index for one unit of traffic.
    fn choose_arm(
        &self,
        experiment: &Experiment,
        context: Option<&[f64]>,
        rng: &mut dyn RngCore,
    ) -> BanditResult<usize>;

    /// Recompute arm parameters after `reward` was observed on `arm_id`.
    /// `history` is every closed draw of the experiment, the new one
    /// included, ordered by observation time.
    fn recompute(
        &self,
        experiment: &mut Experiment,
        arm_id: Uuid,
        reward: f64,
        history: &[Observation],
    ) -> BanditResult<()>;
}

/// Resolve the strategy for an experiment's kind and prior/reward pair.
pub fn strategy_for(
    kind: ExperimentKind,
    prior: PriorType,
    reward: RewardType,
    config: &EngineConfig,
) -> BanditResult<Box<dyn PriorRewardStrategy>> {
    let optimizer = Lbfgs::new(config.optimizer_max_iter, config.optimizer_tolerance, 10);
    match (kind, prior, reward) {
        (ExperimentKind::Mab | ExperimentKind::Ab, PriorType::Beta, RewardType::Bernoulli) => {
            Ok(Box::new(BetaBernoulli))
        }
        (ExperimentKind::Mab | ExperimentKind::Ab, PriorType::Normal, RewardType::Normal) => {
            Ok(Box::new(NormalNormal))
        }
        (ExperimentKind::Cmab, PriorType::Normal, reward) => Ok(Box::new(ContextualRegression {
            link: Link::for_reward(reward),
            optimizer,
        })),
        (ExperimentKind::BayesAb, PriorType::Normal, reward) => Ok(Box::new(BayesianAb {
            link: Link::for_reward(reward),
            intercept: config.bayes_ab_intercept,
            optimizer,
        })),
        (kind, prior, reward) => Err(BanditError::Unsupported(format!(
            "no strategy for {kind} with {prior:?} prior and {reward:?} reward"
        ))),
    }
}

// ─── Beta / Bernoulli ───────────────────────────────────────────────────────

pub struct BetaBernoulli;

impl PriorRewardStrategy for BetaBernoulli {
    fn name(&self) -> &'static str {
        "beta_bernoulli"
    }

    fn validate(&self, experiment: &Experiment) -> BanditResult<()> {
        beta_params(experiment).map(|_| ())
    }

    fn choose_arm(
        &self,
        experiment: &Experiment,
        _context: Option<&[f64]>,
        rng: &mut dyn RngCore,
    ) -> BanditResult<usize> {
        let (alphas, betas): (Vec<f64>, Vec<f64>) = beta_params(experiment)?.into_iter().unzip();
        sample_beta_binomial(&alphas, &betas, rng)
    }

    fn recompute(
        &self,
        experiment: &mut Experiment,
        arm_id: Uuid,
        reward: f64,
        _history: &[Observation],
    ) -> BanditResult<()> {
        let success = u64::from(reward == 1.0);
        match params_mut(experiment, arm_id)? {
            ArmParams::Beta { alpha, beta, .. } => {
                (*alpha, *beta) = update_beta_binomial(*alpha, *beta, success, 1 - success);
                Ok(())
            }
            other => Err(wrong_params("beta", other)),
        }
    }
}

fn beta_params(experiment: &Experiment) -> BanditResult<Vec<(f64, f64)>> {
    experiment
        .arms
        .iter()
        .map(|arm| match &arm.params {
            ArmParams::Beta { alpha, beta, .. } => Ok((*alpha, *beta)),
            other => Err(wrong_params("beta", other)),
        })
        .collect()
}

// ─── Normal / Normal ────────────────────────────────────────────────────────

pub struct NormalNormal;

impl PriorRewardStrategy for NormalNormal {
    fn name(&self) -> &'static str {
        "normal_normal"
    }

    fn validate(&self, experiment: &Experiment) -> BanditResult<()> {
        normal_params(experiment).map(|_| ())
    }

    fn choose_arm(
        &self,
        experiment: &Experiment,
        _context: Option<&[f64]>,
        rng: &mut dyn RngCore,
    ) -> BanditResult<usize> {
        let (mus, sigmas): (Vec<f64>, Vec<f64>) = normal_params(experiment)?.into_iter().unzip();
        sample_normal(&mus, &sigmas, rng)
    }

    fn recompute(
        &self,
        experiment: &mut Experiment,
        arm_id: Uuid,
        _reward: f64,
        history: &[Observation],
    ) -> BanditResult<()> {
        let rewards: Vec<f64> = history
            .iter()
            .filter(|o| o.arm_id == arm_id)
            .map(|o| o.reward)
            .collect();
        match params_mut(experiment, arm_id)? {
            ArmParams::Normal {
                mu,
                sigma,
                mu_init,
                sigma_init,
            } => {
                (*mu, *sigma) = refit_normal(*mu_init, *sigma_init, &rewards)?;
                Ok(())
            }
            other => Err(wrong_params("normal", other)),
        }
    }
}

/// Refit from the creation prior. Samples too small or flat to estimate a
/// spread fall back to a unit-variance likelihood.
fn refit_normal(mu_init: f64, sigma_init: f64, rewards: &[f64]) -> BanditResult<(f64, f64)> {
    if rewards.is_empty() {
        return Ok((mu_init, sigma_init));
    }
    if rewards.len() < 2 || population_stdev(rewards) == 0.0 {
        let sigma_llhood = 1.0 / (rewards.len() as f64).sqrt();
        return normal_posterior(mu_init, sigma_init, mean(rewards), sigma_llhood);
    }
    update_normal_normal(mu_init, sigma_init, rewards)
}

fn normal_params(experiment: &Experiment) -> BanditResult<Vec<(f64, f64)>> {
    experiment
        .arms
        .iter()
        .map(|arm| match &arm.params {
            ArmParams::Normal { mu, sigma, .. } => Ok((*mu, *sigma)),
            other => Err(wrong_params("normal", other)),
        })
        .collect()
}

// ─── Contextual regression ──────────────────────────────────────────────────

pub struct ContextualRegression {
    link: Link,
    optimizer: Lbfgs,
}

impl PriorRewardStrategy for ContextualRegression {
    fn name(&self) -> &'static str {
        match self.link {
            Link::Identity => "contextual_linear",
            Link::Logistic => "contextual_logistic",
        }
    }

    fn validate(&self, experiment: &Experiment) -> BanditResult<()> {
        let n_contexts = experiment.contexts.len();
        for arm in &experiment.arms {
            match &arm.params {
                ArmParams::Contextual { mu, covariance, .. }
                    if mu.len() == n_contexts
                        && covariance.len() == n_contexts
                        && covariance.iter().all(|row| row.len() == n_contexts) => {}
                other => return Err(wrong_params("contextual", other)),
            }
        }
        Ok(())
    }

    fn choose_arm(
        &self,
        experiment: &Experiment,
        context: Option<&[f64]>,
        rng: &mut dyn RngCore,
    ) -> BanditResult<usize> {
        let context = context.ok_or_else(|| {
            BanditError::InvalidInput("contextual experiments need a context vector".to_string())
        })?;
        let arms = experiment
            .arms
            .iter()
            .map(|arm| match &arm.params {
                ArmParams::Contextual { mu, covariance, .. } => Ok(ArmPosterior { mu, covariance }),
                other => Err(wrong_params("contextual", other)),
            })
            .collect::<BanditResult<Vec<_>>>()?;
        contextual::choose_arm(&arms, context, self.link, rng)
    }

    fn recompute(
        &self,
        experiment: &mut Experiment,
        arm_id: Uuid,
        _reward: f64,
        history: &[Observation],
    ) -> BanditResult<()> {
        let n_contexts = experiment.contexts.len();
        let mut contexts = Vec::new();
        let mut rewards = Vec::new();
        for obs in history.iter().filter(|o| o.arm_id == arm_id) {
            let context = obs.context.clone().ok_or_else(|| {
                BanditError::InvalidInput("contextual observation without context".to_string())
            })?;
            contexts.push(context);
            rewards.push(obs.reward);
        }

        match params_mut(experiment, arm_id)? {
            ArmParams::Contextual {
                mu,
                covariance,
                mu_init,
                sigma_init,
            } => {
                let posterior = contextual::refit_arm(
                    *mu_init,
                    *sigma_init,
                    n_contexts,
                    &contexts,
                    &rewards,
                    self.link,
                    &self.optimizer,
                )?;
                debug!(%arm_id, n_observations = rewards.len(), "Refitted contextual arm");
                *mu = posterior.mean.to_vec();
                *covariance = to_rows(&posterior.covariance);
                Ok(())
            }
            other => Err(wrong_params("contextual", other)),
        }
    }
}

// ─── Bayesian A/B ───────────────────────────────────────────────────────────

pub struct BayesianAb {
    link: Link,
    intercept: bool,
    optimizer: Lbfgs,
}

impl BayesianAb {
    fn split(experiment: &Experiment) -> BanditResult<(usize, usize)> {
        let treatment = experiment
            .arms
            .iter()
            .position(|a| a.is_treatment_arm)
            .ok_or_else(|| BanditError::InvalidExperiment("no treatment arm".to_string()))?;
        let control = experiment
            .arms
            .iter()
            .position(|a| !a.is_treatment_arm)
            .ok_or_else(|| BanditError::InvalidExperiment("no control arm".to_string()))?;
        Ok((treatment, control))
    }

    fn prior(params: &ArmParams) -> BanditResult<EffectPrior> {
        match params {
            ArmParams::Normal {
                mu_init,
                sigma_init,
                ..
            } => Ok(EffectPrior {
                mu: *mu_init,
                sigma: *sigma_init,
            }),
            other => Err(wrong_params("normal", other)),
        }
    }
}

impl PriorRewardStrategy for BayesianAb {
    fn name(&self) -> &'static str {
        "bayesian_ab"
    }

    fn validate(&self, experiment: &Experiment) -> BanditResult<()> {
        if experiment.arms.len() != 2 {
            return Err(BanditError::InvalidExperiment(
                "Bayesian A/B needs exactly two arms".to_string(),
            ));
        }
        normal_params(experiment)?;
        Self::split(experiment).map(|_| ())
    }

    fn choose_arm(
        &self,
        experiment: &Experiment,
        _context: Option<&[f64]>,
        rng: &mut dyn RngCore,
    ) -> BanditResult<usize> {
        bayes_ab::choose_arm(experiment.arms.len(), rng)
    }

    fn recompute(
        &self,
        experiment: &mut Experiment,
        _arm_id: Uuid,
        _reward: f64,
        history: &[Observation],
    ) -> BanditResult<()> {
        let (t_idx, c_idx) = Self::split(experiment)?;
        let treatment_id = experiment.arms[t_idx].arm_id;
        let treatment = Self::prior(&experiment.arms[t_idx].params)?;
        let control = Self::prior(&experiment.arms[c_idx].params)?;

        let observations: Vec<(bool, f64)> = history
            .iter()
            .map(|o| (o.arm_id == treatment_id, o.reward))
            .collect();
        let posterior = bayes_ab::fit(
            treatment,
            control,
            &observations,
            self.link,
            self.intercept,
            &self.optimizer,
        )?;
        debug!(
            experiment_id = %experiment.experiment_id,
            n_observations = observations.len(),
            treatment_mu = posterior.treatment.0,
            control_mu = posterior.control.0,
            "Refitted Bayesian A/B posterior"
        );

        let refits = [(t_idx, posterior.treatment), (c_idx, posterior.control)];
        for (idx, (new_mu, new_sigma)) in refits {
            if let ArmParams::Normal { mu, sigma, .. } = &mut experiment.arms[idx].params {
                *mu = new_mu;
                *sigma = new_sigma;
            }
        }
        Ok(())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn params_mut(experiment: &mut Experiment, arm_id: Uuid) -> BanditResult<&mut ArmParams> {
    experiment
        .arms
        .iter_mut()
        .find(|a| a.arm_id == arm_id)
        .map(|a| &mut a.params)
        .ok_or_else(|| BanditError::not_found("Arm", arm_id))
}

fn wrong_params(expected: &str, found: &ArmParams) -> BanditError {
    let found = match found {
        ArmParams::Beta { .. } => "beta",
        ArmParams::Normal { .. } => "normal",
        ArmParams::Contextual { .. } => "contextual",
    };
    BanditError::InvalidExperiment(format!(
        "arm parametrization is {found}, expected {expected}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandit_core::types::{Arm, Context, ContextType};
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn arm(params: ArmParams, is_treatment_arm: bool) -> Arm {
        Arm {
            arm_id: Uuid::new_v4(),
            name: "arm".into(),
            description: String::new(),
            is_treatment_arm,
            n_outcomes: 0,
            params,
        }
    }

    fn experiment(
        kind: ExperimentKind,
        prior_type: PriorType,
        reward_type: RewardType,
        arms: Vec<Arm>,
    ) -> Experiment {
        Experiment {
            experiment_id: Uuid::new_v4(),
            workspace_id: "ws".into(),
            user_id: "user".into(),
            kind,
            name: "exp".into(),
            description: String::new(),
            prior_type,
            reward_type,
            sticky_assignment: false,
            auto_fail: false,
            auto_fail_value: None,
            auto_fail_unit: None,
            is_active: true,
            n_trials: 0,
            created_datetime_utc: Utc::now(),
            last_trial_datetime_utc: None,
            arms,
            contexts: Vec::new(),
        }
    }

    fn obs(arm_id: Uuid, reward: f64) -> Observation {
        Observation {
            arm_id,
            reward,
            context: None,
        }
    }

    #[test]
    fn test_strategy_resolution() {
        let config = EngineConfig::default();
        let s = strategy_for(ExperimentKind::Mab, PriorType::Beta, RewardType::Bernoulli, &config)
            .unwrap();
        assert_eq!(s.name(), "beta_bernoulli");
        let s = strategy_for(
            ExperimentKind::Cmab,
            PriorType::Normal,
            RewardType::Bernoulli,
            &config,
        )
        .unwrap();
        assert_eq!(s.name(), "contextual_logistic");
        let err =
            strategy_for(ExperimentKind::Cmab, PriorType::Beta, RewardType::Bernoulli, &config);
        assert!(matches!(err, Err(BanditError::Unsupported(_))));
        let err = strategy_for(ExperimentKind::Ab, PriorType::Beta, RewardType::Normal, &config);
        assert!(matches!(err, Err(BanditError::Unsupported(_))));
    }

    #[test]
    fn test_beta_bernoulli_updates_chosen_arm_only() {
        let mut exp = experiment(
            ExperimentKind::Mab,
            PriorType::Beta,
            RewardType::Bernoulli,
            vec![arm(ArmParams::beta(5.0, 1.0), false), arm(ArmParams::beta(1.0, 4.0), false)],
        );
        let target = exp.arms[1].arm_id;
        BetaBernoulli.recompute(&mut exp, target, 1.0, &[]).unwrap();
        BetaBernoulli.recompute(&mut exp, target, 0.0, &[]).unwrap();
        assert_eq!(
            exp.arms[1].params,
            ArmParams::Beta {
                alpha: 2.0,
                beta: 5.0,
                alpha_init: 1.0,
                beta_init: 4.0
            }
        );
        assert_eq!(exp.arms[0].params, ArmParams::beta(5.0, 1.0));
    }

    #[test]
    fn test_beta_bernoulli_rejects_normal_arms() {
        let exp = experiment(
            ExperimentKind::Mab,
            PriorType::Beta,
            RewardType::Bernoulli,
            vec![arm(ArmParams::normal(0.0, 1.0), false), arm(ArmParams::beta(1.0, 1.0), false)],
        );
        assert!(BetaBernoulli.validate(&exp).is_err());
        let mut rng = StdRng::seed_from_u64(0);
        assert!(BetaBernoulli.choose_arm(&exp, None, &mut rng).is_err());
    }

    #[test]
    fn test_normal_refit_uses_full_history_and_fallback() {
        let mut exp = experiment(
            ExperimentKind::Mab,
            PriorType::Normal,
            RewardType::Normal,
            vec![arm(ArmParams::normal(0.0, 1.0), false), arm(ArmParams::normal(0.0, 1.0), false)],
        );
        let a = exp.arms[0].arm_id;
        let b = exp.arms[1].arm_id;

        // Single reward: unit-variance likelihood, sigma_llhood = 1.
        NormalNormal.recompute(&mut exp, a, 2.0, &[obs(a, 2.0)]).unwrap();
        match exp.arms[0].params {
            ArmParams::Normal { mu, sigma, .. } => {
                assert!((mu - 1.0).abs() < 1e-12);
                assert!((sigma - 0.5f64.sqrt()).abs() < 1e-12);
            }
            ref other => panic!("unexpected {other:?}"),
        }

        let history = [obs(a, 2.0), obs(b, 10.0), obs(a, 4.0)];
        NormalNormal.recompute(&mut exp, a, 4.0, &history).unwrap();
        let (expected_mu, expected_sigma) = update_normal_normal(0.0, 1.0, &[2.0, 4.0]).unwrap();
        match exp.arms[0].params {
            ArmParams::Normal { mu, sigma, .. } => {
                assert!((mu - expected_mu).abs() < 1e-12);
                assert!((sigma - expected_sigma).abs() < 1e-12);
            }
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_contextual_recompute_shapes() {
        let mut exp = experiment(
            ExperimentKind::Cmab,
            PriorType::Normal,
            RewardType::Normal,
            vec![
                arm(ArmParams::contextual(0.0, 1.0, 2), false),
                arm(ArmParams::contextual(0.0, 1.0, 2), false),
            ],
        );
        exp.contexts = (0..2)
            .map(|i| Context {
                context_id: Uuid::new_v4(),
                name: format!("ctx{i}"),
                description: String::new(),
                value_type: ContextType::RealValued,
            })
            .collect();
        let strategy = strategy_for(
            ExperimentKind::Cmab,
            PriorType::Normal,
            RewardType::Normal,
            &EngineConfig::default(),
        )
        .unwrap();
        strategy.validate(&exp).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        let idx = strategy.choose_arm(&exp, Some(&[1.0, 0.5]), &mut rng).unwrap();
        assert!(strategy.choose_arm(&exp, None, &mut rng).is_err());

        let arm_id = exp.arms[idx].arm_id;
        let history = [Observation {
            arm_id,
            reward: 1.5,
            context: Some(vec![1.0, 0.5]),
        }];
        strategy.recompute(&mut exp, arm_id, 1.5, &history).unwrap();
        match &exp.arms[idx].params {
            ArmParams::Contextual { mu, covariance, .. } => {
                assert_eq!(mu.len(), 2);
                assert_eq!(covariance.len(), 2);
                assert!(covariance.iter().all(|row| row.len() == 2));
                assert!(covariance[0][0] > 0.0 && covariance[1][1] > 0.0);
                assert!(mu[0] > 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bayes_ab_refits_both_arms() {
        let mut treatment = arm(ArmParams::normal(0.0, 1.0), true);
        treatment.name = "treatment".into();
        let control = arm(ArmParams::normal(2.0, 2.0), false);
        let (t, c) = (treatment.arm_id, control.arm_id);
        let mut exp = experiment(
            ExperimentKind::BayesAb,
            PriorType::Normal,
            RewardType::Normal,
            vec![treatment, control],
        );
        let strategy = strategy_for(
            ExperimentKind::BayesAb,
            PriorType::Normal,
            RewardType::Normal,
            &EngineConfig::default(),
        )
        .unwrap();
        strategy.validate(&exp).unwrap();

        let history = [obs(t, 1.0), obs(c, 3.0), obs(t, 1.0)];
        strategy.recompute(&mut exp, t, 1.0, &history).unwrap();
        match (&exp.arms[0].params, &exp.arms[1].params) {
            (
                ArmParams::Normal {
                    mu: mt,
                    sigma: st,
                    mu_init,
                    ..
                },
                ArmParams::Normal { mu: mc, sigma: sc, .. },
            ) => {
                // Treatment: precision 1 + 2, mean 2/3.
                // Control: precision 1/2 + 1, mean (1 + 3)/1.5.
                assert!((mt - 2.0 / 3.0).abs() < 1e-9);
                assert!((mc - 4.0 / 1.5).abs() < 1e-9);
                assert!((st - (1.0f64 / 3.0).sqrt()).abs() < 1e-9);
                assert!(*sc > 0.0);
                assert_eq!(*mu_init, 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
