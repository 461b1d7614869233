//! Creation-time rules: prior/reward compatibility, arm counts, prior
//! parameter presence and auto-fail settings.

use crate::error::{BanditError, BanditResult};
use crate::types::{
    CreateArmRequest, CreateExperimentRequest, ExperimentKind, PriorType, RewardType,
};
use std::collections::HashSet;

const MAX_NAME_LEN: usize = 150;
const MAX_DESCRIPTION_LEN: usize = 500;

const BANDIT_COMBOS: &[(PriorType, RewardType)] = &[
    (PriorType::Beta, RewardType::Bernoulli),
    (PriorType::Normal, RewardType::Normal),
];

const REGRESSION_COMBOS: &[(PriorType, RewardType)] = &[
    (PriorType::Normal, RewardType::Bernoulli),
    (PriorType::Normal, RewardType::Normal),
];

/// Prior/reward combinations accepted for each experiment kind.
pub fn allowed_combinations(kind: ExperimentKind) -> &'static [(PriorType, RewardType)] {
    match kind {
        ExperimentKind::Mab | ExperimentKind::Ab => BANDIT_COMBOS,
        ExperimentKind::Cmab | ExperimentKind::BayesAb => REGRESSION_COMBOS,
    }
}

pub fn is_supported(kind: ExperimentKind, prior: PriorType, reward: RewardType) -> bool {
    allowed_combinations(kind).contains(&(prior, reward))
}

/// Validate an experiment creation request for `kind`.
pub fn validate_create_request(
    kind: ExperimentKind,
    req: &CreateExperimentRequest,
) -> BanditResult<()> {
    check_text("experiment name", &req.name, MAX_NAME_LEN)?;
    check_text("experiment description", &req.description, MAX_DESCRIPTION_LEN)?;

    if req.auto_fail {
        match (req.auto_fail_value, req.auto_fail_unit) {
            (Some(value), Some(_)) if value > 0 => {}
            _ => {
                return Err(invalid(
                    "Auto fail is enabled. Please provide both auto_fail_value and auto_fail_unit.",
                ))
            }
        }
    }

    if !is_supported(kind, req.prior_type, req.reward_type) {
        return Err(invalid(format!(
            "Prior and reward type combo ({:?}, {:?}) not supported for {kind}.",
            req.prior_type, req.reward_type
        )));
    }

    check_arm_count(kind, req.arms.len())?;

    for arm in &req.arms {
        check_text("arm name", &arm.name, MAX_NAME_LEN)?;
        check_text("arm description", &arm.description, MAX_DESCRIPTION_LEN)?;
        check_prior_params(req.prior_type, arm)?;
    }

    if kind == ExperimentKind::BayesAb {
        let treatments = req.arms.iter().filter(|a| a.is_treatment_arm).count();
        if treatments != 1 {
            return Err(invalid("Exactly one arm must be flagged as the treatment arm."));
        }
    }

    if kind == ExperimentKind::Cmab {
        if req.contexts.is_empty() {
            return Err(invalid("Contextual experiments need at least one context."));
        }
        let mut names = HashSet::new();
        for context in &req.contexts {
            check_text("context name", &context.name, MAX_NAME_LEN)?;
            check_text("context description", &context.description, MAX_DESCRIPTION_LEN)?;
            if !names.insert(context.name.as_str()) {
                return Err(invalid(format!("Duplicate context name '{}'.", context.name)));
            }
        }
    } else if !req.contexts.is_empty() {
        return Err(invalid(format!("Contexts are only allowed for cmab, not {kind}.")));
    }

    Ok(())
}

fn check_arm_count(kind: ExperimentKind, n_arms: usize) -> BanditResult<()> {
    match kind {
        ExperimentKind::Ab | ExperimentKind::BayesAb if n_arms != 2 => {
            Err(invalid("The experiment must have exactly two arms."))
        }
        ExperimentKind::Mab | ExperimentKind::Cmab if n_arms < 2 => {
            Err(invalid("The experiment must have at least two arms."))
        }
        _ => Ok(()),
    }
}

fn check_prior_params(prior: PriorType, arm: &CreateArmRequest) -> BanditResult<()> {
    let (params, names) = match prior {
        PriorType::Beta => ([arm.alpha_init, arm.beta_init], ["alpha_init", "beta_init"]),
        PriorType::Normal => ([arm.mu_init, arm.sigma_init], ["mu_init", "sigma_init"]),
    };

    let missing: Vec<&str> = params
        .iter()
        .zip(names)
        .filter(|(value, _)| value.is_none())
        .map(|(_, name)| name)
        .collect();
    if !missing.is_empty() {
        return Err(invalid(format!(
            "{:?} prior needs {}.",
            prior,
            missing.join(",")
        )));
    }

    for (value, name) in params.iter().zip(names) {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(invalid(format!("{name} must be finite.")));
            }
        }
    }

    let strictly_positive = match prior {
        PriorType::Beta => vec![(arm.alpha_init, "alpha_init"), (arm.beta_init, "beta_init")],
        PriorType::Normal => vec![(arm.sigma_init, "sigma_init")],
    };
    for (value, name) in strictly_positive {
        if matches!(value, Some(v) if v <= 0.0) {
            return Err(invalid(format!("{name} must be greater than 0.")));
        }
    }
    Ok(())
}

fn check_text(field: &str, value: &str, max_len: usize) -> BanditResult<()> {
    if value.chars().count() > max_len {
        return Err(invalid(format!("{field} exceeds {max_len} characters.")));
    }
    Ok(())
}

fn invalid(msg: impl Into<String>) -> BanditError {
    BanditError::InvalidExperiment(msg.into())
}
