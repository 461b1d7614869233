//! Draw/outcome lifecycle over the experiment store.
//!
//! Every outcome, whether reported by a client or synthesised by the auto-fail
//! sweep, goes through `apply_outcome`.

use crate::store::ExperimentStore;
use bandit_core::config::EngineConfig;
use bandit_core::types::{
    Arm, ArmParams, Context, ContextInput, ContextType, CreateExperimentRequest, Draw, Experiment,
    ExperimentKind, ObservationType, PriorType, RewardType, Scope,
};
use bandit_core::validation::validate_create_request;
use bandit_core::{BanditError, BanditResult};
use bandit_engine::{strategy_for, Observation, PriorRewardStrategy};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Optional inputs of a draw. `context` is required for contextual
/// experiments and rejected for every other kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrawRequest {
    #[serde(default)]
    pub draw_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub context: Option<Vec<ContextInput>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawResponse {
    pub draw_id: String,
    pub client_id: Option<String>,
    pub arm: Arm,
}

pub struct ExperimentService {
    store: Arc<dyn ExperimentStore>,
    rng: Mutex<StdRng>,
    config: EngineConfig,
}

impl ExperimentService {
    pub fn new(store: Arc<dyn ExperimentStore>, config: EngineConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => {
                info!(seed, "Sampling RNG seeded");
                StdRng::seed_from_u64(seed)
            }
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            rng: Mutex::new(rng),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn ExperimentStore> {
        &self.store
    }

    // ─── Experiments ───────────────────────────────────────────────────────

    pub fn create_experiment(
        &self,
        scope: &Scope,
        kind: ExperimentKind,
        req: CreateExperimentRequest,
    ) -> BanditResult<Experiment> {
        validate_create_request(kind, &req)?;
        let strategy = self.strategy(kind, req.prior_type, req.reward_type)?;

        let n_contexts = req.contexts.len();
        let arms = req
            .arms
            .into_iter()
            .map(|arm| -> BanditResult<Arm> {
                let params = match (kind, req.prior_type) {
                    (ExperimentKind::Cmab, _) => ArmParams::contextual(
                        required(arm.mu_init, "mu_init")?,
                        required(arm.sigma_init, "sigma_init")?,
                        n_contexts,
                    ),
                    (_, PriorType::Beta) => ArmParams::beta(
                        required(arm.alpha_init, "alpha_init")?,
                        required(arm.beta_init, "beta_init")?,
                    ),
                    (_, PriorType::Normal) => ArmParams::normal(
                        required(arm.mu_init, "mu_init")?,
                        required(arm.sigma_init, "sigma_init")?,
                    ),
                };
                Ok(Arm {
                    arm_id: Uuid::new_v4(),
                    name: arm.name,
                    description: arm.description,
                    is_treatment_arm: arm.is_treatment_arm,
                    n_outcomes: 0,
                    params,
                })
            })
            .collect::<BanditResult<Vec<_>>>()?;

        let contexts = req
            .contexts
            .into_iter()
            .map(|c| Context {
                context_id: Uuid::new_v4(),
                name: c.name,
                description: c.description,
                value_type: c.value_type,
            })
            .collect();

        let experiment = Experiment {
            experiment_id: Uuid::new_v4(),
            workspace_id: scope.workspace_id.clone(),
            user_id: scope.user_id.clone(),
            kind,
            name: req.name,
            description: req.description,
            prior_type: req.prior_type,
            reward_type: req.reward_type,
            sticky_assignment: req.sticky_assignment,
            auto_fail: req.auto_fail,
            auto_fail_value: req.auto_fail_value,
            auto_fail_unit: req.auto_fail_unit,
            is_active: req.is_active,
            n_trials: 0,
            created_datetime_utc: Utc::now(),
            last_trial_datetime_utc: None,
            arms,
            contexts,
        };
        strategy.validate(&experiment)?;
        self.store.insert_experiment(experiment.clone())?;

        metrics::counter!("bandit.experiments.created").increment(1);
        info!(
            experiment_id = %experiment.experiment_id,
            workspace_id = %scope.workspace_id,
            kind = %kind,
            strategy = strategy.name(),
            n_arms = experiment.arms.len(),
            "Experiment created"
        );
        Ok(experiment)
    }

    pub fn list_experiments(&self, scope: &Scope, kind: ExperimentKind) -> Vec<Experiment> {
        self.store.list_experiments(&scope.workspace_id, kind)
    }

    pub fn get_experiment(
        &self,
        scope: &Scope,
        kind: ExperimentKind,
        experiment_id: Uuid,
    ) -> BanditResult<Experiment> {
        self.store
            .get_experiment(&scope.workspace_id, experiment_id)
            .filter(|e| e.kind == kind)
            .ok_or_else(|| BanditError::not_found("Experiment", experiment_id))
    }

    pub fn delete_experiment(
        &self,
        scope: &Scope,
        kind: ExperimentKind,
        experiment_id: Uuid,
    ) -> BanditResult<()> {
        self.get_experiment(scope, kind, experiment_id)?;
        if !self.store.delete_experiment(&scope.workspace_id, experiment_id) {
            return Err(BanditError::not_found("Experiment", experiment_id));
        }
        metrics::counter!("bandit.experiments.deleted").increment(1);
        info!(
            experiment_id = %experiment_id,
            workspace_id = %scope.workspace_id,
            "Experiment deleted"
        );
        Ok(())
    }

    pub fn arms(
        &self,
        scope: &Scope,
        kind: ExperimentKind,
        experiment_id: Uuid,
    ) -> BanditResult<Vec<Arm>> {
        Ok(self.get_experiment(scope, kind, experiment_id)?.arms)
    }

    /// Closed draws, oldest observation first.
    pub fn outcomes(
        &self,
        scope: &Scope,
        kind: ExperimentKind,
        experiment_id: Uuid,
    ) -> BanditResult<Vec<Draw>> {
        let experiment = self.get_experiment(scope, kind, experiment_id)?;
        Ok(self.store.observed_draws(experiment.experiment_id))
    }

    // ─── Draws ─────────────────────────────────────────────────────────────

    pub fn draw(
        &self,
        scope: &Scope,
        kind: ExperimentKind,
        experiment_id: Uuid,
        req: DrawRequest,
    ) -> BanditResult<DrawResponse> {
        self.draw_at(scope, kind, experiment_id, req, Utc::now())
    }

    pub fn draw_at(
        &self,
        scope: &Scope,
        kind: ExperimentKind,
        experiment_id: Uuid,
        req: DrawRequest,
        now: DateTime<Utc>,
    ) -> BanditResult<DrawResponse> {
        let experiment = self.get_experiment(scope, kind, experiment_id)?;
        let strategy =
            self.strategy(experiment.kind, experiment.prior_type, experiment.reward_type)?;
        let context = context_vector(&experiment, req.context.as_deref())?;

        let draw_id = match req.draw_id {
            Some(id) if id.trim().is_empty() => {
                return Err(BanditError::InvalidInput("draw_id must not be blank".to_string()))
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };
        if self.store.get_draw(&scope.workspace_id, &draw_id).is_some() {
            return Err(BanditError::Conflict(format!("Draw ID {draw_id} already exists.")));
        }

        let previous = match (&req.client_id, experiment.sticky_assignment) {
            (None, true) => {
                return Err(BanditError::InvalidInput(
                    "client_id is required for sticky experiments".to_string(),
                ))
            }
            (Some(client_id), true) => self.store.latest_client_draw(experiment_id, client_id),
            _ => None,
        };

        let arm_index = match previous.as_ref().and_then(|d| experiment.arm_index(d.arm_id)) {
            Some(idx) => {
                metrics::counter!("bandit.draws.sticky").increment(1);
                idx
            }
            None => {
                let mut rng = self.rng.lock();
                strategy.choose_arm(&experiment, context.as_deref(), &mut *rng)?
            }
        };
        let arm = experiment
            .arms
            .get(arm_index)
            .cloned()
            .ok_or_else(|| BanditError::Numerical(format!("arm index {arm_index} out of range")))?;

        let draw = Draw {
            draw_id: draw_id.clone(),
            experiment_id,
            workspace_id: scope.workspace_id.clone(),
            arm_id: arm.arm_id,
            client_id: req.client_id.clone(),
            draw_datetime_utc: now,
            observed_datetime_utc: None,
            observation_type: None,
            reward: None,
            context_val: context,
        };
        self.store.insert_draw(draw)?;

        metrics::counter!("bandit.draws").increment(1);
        debug!(
            experiment_id = %experiment_id,
            draw_id = %draw_id,
            arm_id = %arm.arm_id,
            sticky = previous.is_some(),
            "Arm drawn"
        );
        Ok(DrawResponse {
            draw_id,
            client_id: req.client_id,
            arm,
        })
    }

    // ─── Outcomes ──────────────────────────────────────────────────────────

    pub fn record_outcome(
        &self,
        scope: &Scope,
        kind: ExperimentKind,
        experiment_id: Uuid,
        draw_id: &str,
        reward: f64,
    ) -> BanditResult<Arm> {
        self.record_outcome_at(scope, kind, experiment_id, draw_id, reward, Utc::now())
    }

    pub fn record_outcome_at(
        &self,
        scope: &Scope,
        kind: ExperimentKind,
        experiment_id: Uuid,
        draw_id: &str,
        reward: f64,
        now: DateTime<Utc>,
    ) -> BanditResult<Arm> {
        let experiment = self.get_experiment(scope, kind, experiment_id)?;
        let draw = self
            .store
            .get_draw(&scope.workspace_id, draw_id)
            .ok_or_else(|| BanditError::not_found("Draw", draw_id))?;
        if draw.experiment_id != experiment.experiment_id {
            return Err(BanditError::Conflict(format!(
                "Draw with id {draw_id} does not belong to experiment with id {experiment_id}"
            )));
        }
        if !draw.is_open() {
            return Err(BanditError::Conflict(format!(
                "Draw with id {draw_id} already has an outcome."
            )));
        }
        self.apply_outcome(experiment, draw, reward, ObservationType::User, now)
    }

    /// Close `draw` with `reward`: bump trial counters, recompute the arm
    /// posterior and commit both atomically with respect to the draw.
    pub fn apply_outcome(
        &self,
        mut experiment: Experiment,
        mut draw: Draw,
        reward: f64,
        observation_type: ObservationType,
        now: DateTime<Utc>,
    ) -> BanditResult<Arm> {
        check_reward(experiment.reward_type, reward)?;
        let strategy =
            self.strategy(experiment.kind, experiment.prior_type, experiment.reward_type)?;
        let arm_index = experiment
            .arm_index(draw.arm_id)
            .ok_or_else(|| BanditError::not_found("Arm", draw.arm_id))?;

        let mut history: Vec<Observation> = self
            .store
            .observed_draws(experiment.experiment_id)
            .into_iter()
            .filter_map(|d| {
                d.reward.map(|reward| Observation {
                    arm_id: d.arm_id,
                    reward,
                    context: d.context_val,
                })
            })
            .collect();
        history.push(Observation {
            arm_id: draw.arm_id,
            reward,
            context: draw.context_val.clone(),
        });

        experiment.n_trials += 1;
        experiment.last_trial_datetime_utc = Some(now);
        experiment.arms[arm_index].n_outcomes += 1;
        strategy.recompute(&mut experiment, draw.arm_id, reward, &history)?;

        draw.reward = Some(reward);
        draw.observed_datetime_utc = Some(now);
        draw.observation_type = Some(observation_type);
        self.store.commit_outcome(&experiment, &draw)?;

        metrics::counter!("bandit.outcomes", "observation_type" => observation_type.as_str())
            .increment(1);
        info!(
            experiment_id = %experiment.experiment_id,
            draw_id = %draw.draw_id,
            arm_id = %draw.arm_id,
            reward,
            observation_type = observation_type.as_str(),
            n_trials = experiment.n_trials,
            "Outcome recorded"
        );
        Ok(experiment.arms[arm_index].clone())
    }

    fn strategy(
        &self,
        kind: ExperimentKind,
        prior: PriorType,
        reward: RewardType,
    ) -> BanditResult<Box<dyn PriorRewardStrategy>> {
        strategy_for(kind, prior, reward, &self.config)
    }
}

fn required(value: Option<f64>, name: &str) -> BanditResult<f64> {
    value.ok_or_else(|| BanditError::InvalidExperiment(format!("missing {name}")))
}

fn check_reward(reward_type: RewardType, reward: f64) -> BanditResult<()> {
    if !reward.is_finite() {
        return Err(BanditError::InvalidInput(format!("reward {reward} is not finite")));
    }
    if reward_type == RewardType::Bernoulli && reward != 0.0 && reward != 1.0 {
        return Err(BanditError::InvalidInput(format!(
            "binary rewards must be 0 or 1, got {reward}"
        )));
    }
    Ok(())
}

/// Order the supplied context values by the experiment's declared contexts.
fn context_vector(
    experiment: &Experiment,
    inputs: Option<&[ContextInput]>,
) -> BanditResult<Option<Vec<f64>>> {
    if experiment.kind != ExperimentKind::Cmab {
        if inputs.is_some_and(|c| !c.is_empty()) {
            warn!(
                experiment_id = %experiment.experiment_id,
                "Context supplied to a non-contextual experiment"
            );
            return Err(BanditError::InvalidInput(format!(
                "{} experiments do not take a context",
                experiment.kind
            )));
        }
        return Ok(None);
    }

    let inputs = inputs.unwrap_or_default();
    if inputs.len() != experiment.contexts.len() {
        return Err(BanditError::InvalidInput(format!(
            "Expected {} context values, got {}",
            experiment.contexts.len(),
            inputs.len()
        )));
    }

    let mut values = Vec::with_capacity(inputs.len());
    for context in &experiment.contexts {
        let mut matching = inputs.iter().filter(|i| i.context_id == context.context_id);
        let value = match (matching.next(), matching.next()) {
            (Some(input), None) => input.context_value,
            (None, _) => {
                return Err(BanditError::InvalidInput(format!(
                    "Missing value for context {}",
                    context.context_id
                )))
            }
            (Some(_), Some(_)) => {
                return Err(BanditError::InvalidInput(format!(
                    "Context {} given more than once",
                    context.context_id
                )))
            }
        };
        if !value.is_finite() {
            return Err(BanditError::InvalidInput(format!(
                "Context {} value must be finite",
                context.name
            )));
        }
        if context.value_type == ContextType::Binary && value != 0.0 && value != 1.0 {
            return Err(BanditError::InvalidInput(format!(
                "Binary context {} must be 0 or 1, got {value}",
                context.name
            )));
        }
        values.push(value);
    }
    Ok(Some(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use bandit_core::types::{CreateArmRequest, CreateContextRequest};

    fn service() -> ExperimentService {
        let config = EngineConfig {
            rng_seed: Some(42),
            ..EngineConfig::default()
        };
        ExperimentService::new(Arc::new(InMemoryStore::new()), config)
    }

    fn scope() -> Scope {
        Scope::new("ws-1", "user-1")
    }

    fn beta_request() -> CreateExperimentRequest {
        let arm = |name: &str, a: f64, b: f64| CreateArmRequest {
            name: name.into(),
            alpha_init: Some(a),
            beta_init: Some(b),
            ..Default::default()
        };
        CreateExperimentRequest {
            name: "button colour".into(),
            description: String::new(),
            sticky_assignment: false,
            auto_fail: false,
            auto_fail_value: None,
            auto_fail_unit: None,
            prior_type: PriorType::Beta,
            reward_type: RewardType::Bernoulli,
            is_active: true,
            arms: vec![arm("red", 5.0, 1.0), arm("blue", 1.0, 4.0)],
            contexts: Vec::new(),
        }
    }

    fn cmab_request() -> CreateExperimentRequest {
        let arm = CreateArmRequest {
            name: "arm".into(),
            mu_init: Some(0.0),
            sigma_init: Some(1.0),
            ..Default::default()
        };
        let context = |name: &str, value_type| CreateContextRequest {
            name: name.into(),
            description: String::new(),
            value_type,
        };
        CreateExperimentRequest {
            prior_type: PriorType::Normal,
            reward_type: RewardType::Normal,
            arms: vec![arm.clone(), arm],
            contexts: vec![
                context("is_mobile", ContextType::Binary),
                context("age", ContextType::RealValued),
            ],
            ..beta_request()
        }
    }

    #[test]
    fn test_create_assigns_ids_and_seeds_params() {
        let svc = service();
        let exp = svc.create_experiment(&scope(), ExperimentKind::Mab, beta_request()).unwrap();
        assert_eq!(exp.arms.len(), 2);
        assert_eq!(exp.arms[0].params, ArmParams::beta(5.0, 1.0));
        assert_eq!(exp.workspace_id, "ws-1");
        assert!(svc.get_experiment(&scope(), ExperimentKind::Mab, exp.experiment_id).is_ok());
        assert!(svc.get_experiment(&scope(), ExperimentKind::Ab, exp.experiment_id).is_err());
        assert!(svc
            .get_experiment(&Scope::new("ws-2", "u"), ExperimentKind::Mab, exp.experiment_id)
            .is_err());
    }

    #[test]
    fn test_create_rejects_unsupported_combo() {
        let mut req = beta_request();
        req.reward_type = RewardType::Normal;
        let err = service().create_experiment(&scope(), ExperimentKind::Mab, req).unwrap_err();
        assert!(matches!(err, BanditError::InvalidExperiment(_)));
    }

    #[test]
    fn test_binary_reward_domain() {
        let svc = service();
        let exp = svc.create_experiment(&scope(), ExperimentKind::Mab, beta_request()).unwrap();
        let drawn = svc
            .draw(&scope(), ExperimentKind::Mab, exp.experiment_id, DrawRequest::default())
            .unwrap();
        let err = svc
            .record_outcome(&scope(), ExperimentKind::Mab, exp.experiment_id, &drawn.draw_id, 0.5)
            .unwrap_err();
        assert!(matches!(err, BanditError::InvalidInput(_)));
        let err = svc
            .record_outcome(
                &scope(),
                ExperimentKind::Mab,
                exp.experiment_id,
                &drawn.draw_id,
                f64::NAN,
            )
            .unwrap_err();
        assert!(matches!(err, BanditError::InvalidInput(_)));
        // Rejected rewards leave the draw open.
        assert!(svc
            .record_outcome(&scope(), ExperimentKind::Mab, exp.experiment_id, &drawn.draw_id, 0.0)
            .is_ok());
    }

    #[test]
    fn test_outcome_on_other_experiments_draw_conflicts() {
        let svc = service();
        let a = svc.create_experiment(&scope(), ExperimentKind::Mab, beta_request()).unwrap();
        let b = svc.create_experiment(&scope(), ExperimentKind::Mab, beta_request()).unwrap();
        let drawn = svc
            .draw(&scope(), ExperimentKind::Mab, a.experiment_id, DrawRequest::default())
            .unwrap();
        let err = svc
            .record_outcome(&scope(), ExperimentKind::Mab, b.experiment_id, &drawn.draw_id, 1.0)
            .unwrap_err();
        assert!(matches!(err, BanditError::Conflict(_)));
        let err = svc
            .record_outcome(&scope(), ExperimentKind::Mab, a.experiment_id, "missing", 1.0)
            .unwrap_err();
        assert!(matches!(err, BanditError::NotFound { .. }));
    }

    #[test]
    fn test_sticky_requires_client_id() {
        let svc = service();
        let mut req = beta_request();
        req.sticky_assignment = true;
        let exp = svc.create_experiment(&scope(), ExperimentKind::Ab, req).unwrap();
        let err = svc
            .draw(&scope(), ExperimentKind::Ab, exp.experiment_id, DrawRequest::default())
            .unwrap_err();
        assert!(matches!(err, BanditError::InvalidInput(_)));
    }

    #[test]
    fn test_context_validation() {
        let svc = service();
        let exp = svc.create_experiment(&scope(), ExperimentKind::Cmab, cmab_request()).unwrap();
        let ids: Vec<Uuid> = exp.contexts.iter().map(|c| c.context_id).collect();
        let draw = |values: Vec<(Uuid, f64)>| {
            svc.draw(
                &scope(),
                ExperimentKind::Cmab,
                exp.experiment_id,
                DrawRequest {
                    context: Some(
                        values
                            .into_iter()
                            .map(|(context_id, context_value)| ContextInput {
                                context_id,
                                context_value,
                            })
                            .collect(),
                    ),
                    ..Default::default()
                },
            )
        };

        assert!(draw(vec![(ids[0], 1.0)]).is_err());
        assert!(draw(vec![(ids[0], 0.5), (ids[1], 30.0)]).is_err());
        assert!(draw(vec![(ids[0], 1.0), (ids[0], 1.0)]).is_err());
        assert!(draw(vec![(ids[0], 1.0), (Uuid::new_v4(), 30.0)]).is_err());

        // Order of the supplied values does not matter.
        let drawn = draw(vec![(ids[1], 30.0), (ids[0], 1.0)]).unwrap();
        let stored = svc.store().get_draw("ws-1", &drawn.draw_id).unwrap();
        assert_eq!(stored.context_val, Some(vec![1.0, 30.0]));
    }

    #[test]
    fn test_context_rejected_for_plain_bandit() {
        let svc = service();
        let exp = svc.create_experiment(&scope(), ExperimentKind::Mab, beta_request()).unwrap();
        let req = DrawRequest {
            context: Some(vec![ContextInput {
                context_id: Uuid::new_v4(),
                context_value: 1.0,
            }]),
            ..Default::default()
        };
        assert!(svc.draw(&scope(), ExperimentKind::Mab, exp.experiment_id, req).is_err());
    }

    #[test]
    fn test_delete_removes_experiment() {
        let svc = service();
        let exp = svc.create_experiment(&scope(), ExperimentKind::Mab, beta_request()).unwrap();
        svc.delete_experiment(&scope(), ExperimentKind::Mab, exp.experiment_id).unwrap();
        assert!(svc.list_experiments(&scope(), ExperimentKind::Mab).is_empty());
        assert!(matches!(
            svc.delete_experiment(&scope(), ExperimentKind::Mab, exp.experiment_id),
            Err(BanditError::NotFound { .. })
        ));
    }

    #[test]
    fn test_outcomes_are_listed_in_observation_order() {
        let svc = service();
        let exp = svc.create_experiment(&scope(), ExperimentKind::Mab, beta_request()).unwrap();
        let now = Utc::now();
        for (i, reward) in [1.0, 0.0, 1.0].into_iter().enumerate() {
            let req = DrawRequest {
                draw_id: Some(format!("d-{i}")),
                ..Default::default()
            };
            svc.draw_at(&scope(), ExperimentKind::Mab, exp.experiment_id, req, now).unwrap();
            svc.record_outcome_at(
                &scope(),
                ExperimentKind::Mab,
                exp.experiment_id,
                &format!("d-{i}"),
                reward,
                now + chrono::Duration::minutes(i as i64),
            )
            .unwrap();
        }
        let outcomes = svc.outcomes(&scope(), ExperimentKind::Mab, exp.experiment_id).unwrap();
        let ids: Vec<&str> = outcomes.iter().map(|d| d.draw_id.as_str()).collect();
        assert_eq!(ids, vec!["d-0", "d-1", "d-2"]);
        assert!(outcomes.iter().all(|d| d.observation_type == Some(ObservationType::User)));

        let exp = svc.get_experiment(&scope(), ExperimentKind::Mab, exp.experiment_id).unwrap();
        assert_eq!(exp.n_trials, 3);
        assert_eq!(exp.arms.iter().map(|a| a.n_outcomes).sum::<u64>(), 3);
    }
}
