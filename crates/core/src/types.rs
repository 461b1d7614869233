use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ─── Discriminants ─────────────────────────────────────────────────────────

/// Experiment family. Selects arm-count rules, the allowed prior/reward
/// combinations and the allocation strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    Mab,
    Cmab,
    Ab,
    BayesAb,
}

impl ExperimentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentKind::Mab => "mab",
            ExperimentKind::Cmab => "cmab",
            ExperimentKind::Ab => "ab",
            ExperimentKind::BayesAb => "bayes_ab",
        }
    }
}

impl fmt::Display for ExperimentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mab" => Ok(ExperimentKind::Mab),
            "cmab" => Ok(ExperimentKind::Cmab),
            "ab" => Ok(ExperimentKind::Ab),
            "bayes_ab" => Ok(ExperimentKind::BayesAb),
            other => Err(format!("unknown experiment kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PriorType {
    Beta,
    Normal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RewardType {
    #[serde(rename = "binary")]
    Bernoulli,
    #[serde(rename = "real-valued")]
    Normal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutoFailUnit {
    Hours,
    Days,
}

impl AutoFailUnit {
    /// Length of `value` units in whole hours.
    pub fn hours(&self, value: u32) -> i64 {
        match self {
            AutoFailUnit::Hours => i64::from(value),
            AutoFailUnit::Days => i64::from(value) * 24,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    User,
    Auto,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::User => "user",
            ObservationType::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContextType {
    #[serde(rename = "binary")]
    Binary,
    #[serde(rename = "real-valued")]
    RealValued,
}

// ─── Scope ─────────────────────────────────────────────────────────────────

/// Caller scope handed over by the auth layer. Treated as opaque filter keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub workspace_id: String,
    pub user_id: String,
}

impl Scope {
    pub fn new(workspace_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
        }
    }
}

// ─── Experiment ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: Uuid,
    pub workspace_id: String,
    pub user_id: String,
    pub kind: ExperimentKind,
    pub name: String,
    pub description: String,
    pub prior_type: PriorType,
    pub reward_type: RewardType,
    pub sticky_assignment: bool,
    pub auto_fail: bool,
    pub auto_fail_value: Option<u32>,
    pub auto_fail_unit: Option<AutoFailUnit>,
    pub is_active: bool,
    pub n_trials: u64,
    pub created_datetime_utc: DateTime<Utc>,
    pub last_trial_datetime_utc: Option<DateTime<Utc>>,
    pub arms: Vec<Arm>,
    #[serde(default)]
    pub contexts: Vec<Context>,
}

impl Experiment {
    /// Age after which an open draw is closed by the auto-fail sweep.
    pub fn auto_fail_threshold(&self) -> Option<Duration> {
        if !self.auto_fail {
            return None;
        }
        match (self.auto_fail_value, self.auto_fail_unit) {
            (Some(value), Some(unit)) => Some(Duration::hours(unit.hours(value))),
            _ => None,
        }
    }

    pub fn arm_index(&self, arm_id: Uuid) -> Option<usize> {
        self.arms.iter().position(|a| a.arm_id == arm_id)
    }

    pub fn arm(&self, arm_id: Uuid) -> Option<&Arm> {
        self.arms.iter().find(|a| a.arm_id == arm_id)
    }
}

// ─── Arm ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arm {
    pub arm_id: Uuid,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub is_treatment_arm: bool,
    pub n_outcomes: u64,
    #[serde(flatten)]
    pub params: ArmParams,
}

/// Posterior state of an arm. The `*_init` fields are the creation-time
/// prior and are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "parametrization", rename_all = "snake_case")]
pub enum ArmParams {
    Beta {
        alpha: f64,
        beta: f64,
        alpha_init: f64,
        beta_init: f64,
    },
    Normal {
        mu: f64,
        sigma: f64,
        mu_init: f64,
        sigma_init: f64,
    },
    Contextual {
        mu: Vec<f64>,
        covariance: Vec<Vec<f64>>,
        mu_init: f64,
        sigma_init: f64,
    },
}

impl ArmParams {
    pub fn beta(alpha_init: f64, beta_init: f64) -> Self {
        ArmParams::Beta {
            alpha: alpha_init,
            beta: beta_init,
            alpha_init,
            beta_init,
        }
    }

    pub fn normal(mu_init: f64, sigma_init: f64) -> Self {
        ArmParams::Normal {
            mu: mu_init,
            sigma: sigma_init,
            mu_init,
            sigma_init,
        }
    }

    /// Seeds `mu = mu_init·1` and `covariance = sigma_init·I`.
    pub fn contextual(mu_init: f64, sigma_init: f64, n_contexts: usize) -> Self {
        let covariance = (0..n_contexts)
            .map(|i| {
                (0..n_contexts)
                    .map(|j| if i == j { sigma_init } else { 0.0 })
                    .collect()
            })
            .collect();
        ArmParams::Contextual {
            mu: vec![mu_init; n_contexts],
            covariance,
            mu_init,
            sigma_init,
        }
    }
}

// ─── Context ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub context_id: Uuid,
    pub name: String,
    pub description: String,
    pub value_type: ContextType,
}

/// One context value supplied with a contextual draw request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextInput {
    pub context_id: Uuid,
    pub context_value: f64,
}

// ─── Draw ──────────────────────────────────────────────────────────────────

/// One allocation of a unit of traffic to an arm. Open while `reward` is
/// unset; closed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draw {
    pub draw_id: String,
    pub experiment_id: Uuid,
    pub workspace_id: String,
    pub arm_id: Uuid,
    pub client_id: Option<String>,
    pub draw_datetime_utc: DateTime<Utc>,
    pub observed_datetime_utc: Option<DateTime<Utc>>,
    pub observation_type: Option<ObservationType>,
    pub reward: Option<f64>,
    #[serde(default)]
    pub context_val: Option<Vec<f64>>,
}

impl Draw {
    pub fn is_open(&self) -> bool {
        self.reward.is_none()
    }
}

// ─── Creation requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExperimentRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sticky_assignment: bool,
    #[serde(default)]
    pub auto_fail: bool,
    #[serde(default)]
    pub auto_fail_value: Option<u32>,
    #[serde(default)]
    pub auto_fail_unit: Option<AutoFailUnit>,
    pub prior_type: PriorType,
    pub reward_type: RewardType,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    pub arms: Vec<CreateArmRequest>,
    #[serde(default)]
    pub contexts: Vec<CreateContextRequest>,
}

fn default_is_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateArmRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub alpha_init: Option<f64>,
    #[serde(default)]
    pub beta_init: Option<f64>,
    #[serde(default)]
    pub mu_init: Option<f64>,
    #[serde(default)]
    pub sigma_init: Option<f64>,
    #[serde(default)]
    pub is_treatment_arm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContextRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub value_type: ContextType,
}
