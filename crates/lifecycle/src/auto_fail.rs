//! Periodic closure of draws that never received an outcome.
//!
//! Each stale draw is closed with reward 0 through the same
//! `ExperimentService::apply_outcome` path a client report takes. Draws are
//! read in pages of `batch_size`; a draw that fails to close is logged and
//! skipped so one bad record cannot stall the sweep.

use crate::service::ExperimentService;
use bandit_core::config::AutoFailConfig;
use bandit_core::types::ObservationType;
use bandit_core::BanditError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub experiments_scanned: usize,
    pub draws_failed: usize,
    pub errors: usize,
}

pub struct AutoFailSweeper {
    service: Arc<ExperimentService>,
    batch_size: usize,
}

impl AutoFailSweeper {
    pub fn new(service: Arc<ExperimentService>, config: &AutoFailConfig) -> Self {
        Self {
            service,
            batch_size: config.batch_size.max(1),
        }
    }

    /// Close every open draw older than its experiment's auto-fail
    /// threshold as of `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let store = self.service.store();

        for experiment in store.auto_fail_experiments() {
            let Some(threshold) = experiment.auto_fail_threshold() else {
                continue;
            };
            report.experiments_scanned += 1;
            let cutoff = now - threshold;
            let mut skipped = 0;

            loop {
                let page = store.stale_open_draws(
                    experiment.experiment_id,
                    cutoff,
                    skipped,
                    self.batch_size,
                );
                if page.is_empty() {
                    break;
                }
                let mut closed = 0;
                for draw in page {
                    // Re-read per draw: the previous close changed arm state.
                    let Some(current) =
                        store.get_experiment(&experiment.workspace_id, experiment.experiment_id)
                    else {
                        debug!(
                            experiment_id = %experiment.experiment_id,
                            "Experiment removed mid-sweep"
                        );
                        return report;
                    };
                    let draw_id = draw.draw_id.clone();
                    match self
                        .service
                        .apply_outcome(current, draw, 0.0, ObservationType::Auto, now)
                    {
                        Ok(_) => closed += 1,
                        // Closed by a client report since the page was read.
                        Err(BanditError::Conflict(_)) => {}
                        Err(e) => {
                            warn!(
                                experiment_id = %experiment.experiment_id,
                                draw_id = %draw_id,
                                error = %e,
                                "Auto-fail could not close draw"
                            );
                            report.errors += 1;
                            skipped += 1;
                        }
                    }
                }
                report.draws_failed += closed;
                metrics::counter!("bandit.auto_fail.closed").increment(closed as u64);
                debug!(
                    experiment_id = %experiment.experiment_id,
                    closed,
                    skipped,
                    "Auto-fail page committed"
                );
            }
        }

        info!(
            experiments_scanned = report.experiments_scanned,
            draws_failed = report.draws_failed,
            errors = report.errors,
            "Auto-fail sweep finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::DrawRequest;
    use crate::store::InMemoryStore;
    use bandit_core::config::EngineConfig;
    use bandit_core::types::{
        AutoFailUnit, CreateArmRequest, CreateExperimentRequest, ExperimentKind, PriorType,
        RewardType, Scope,
    };
    use chrono::Duration;

    fn setup(batch_size: usize) -> (Arc<ExperimentService>, AutoFailSweeper) {
        let service = Arc::new(ExperimentService::new(
            Arc::new(InMemoryStore::new()),
            EngineConfig {
                rng_seed: Some(7),
                ..EngineConfig::default()
            },
        ));
        let sweeper = AutoFailSweeper::new(
            service.clone(),
            &AutoFailConfig {
                batch_size,
                ..AutoFailConfig::default()
            },
        );
        (service, sweeper)
    }

    fn request(auto_fail: bool) -> CreateExperimentRequest {
        let arm = CreateArmRequest {
            name: "arm".into(),
            alpha_init: Some(1.0),
            beta_init: Some(1.0),
            ..Default::default()
        };
        CreateExperimentRequest {
            name: "exp".into(),
            description: String::new(),
            sticky_assignment: false,
            auto_fail,
            auto_fail_value: auto_fail.then_some(3),
            auto_fail_unit: auto_fail.then_some(AutoFailUnit::Hours),
            prior_type: PriorType::Beta,
            reward_type: RewardType::Bernoulli,
            is_active: true,
            arms: vec![arm.clone(), arm],
            contexts: Vec::new(),
        }
    }

    #[test]
    fn test_sweep_pages_through_all_stale_draws() {
        let (service, sweeper) = setup(2);
        let scope = Scope::new("ws", "u");
        let exp = service.create_experiment(&scope, ExperimentKind::Mab, request(true)).unwrap();
        let now = Utc::now();
        for i in 0..5 {
            let issued_at = now - Duration::hours(4 + i);
            service
                .draw_at(
                    &scope,
                    ExperimentKind::Mab,
                    exp.experiment_id,
                    DrawRequest::default(),
                    issued_at,
                )
                .unwrap();
        }
        service
            .draw_at(&scope, ExperimentKind::Mab, exp.experiment_id, DrawRequest::default(), now)
            .unwrap();

        let report = sweeper.sweep(now);
        assert_eq!(report, SweepReport { experiments_scanned: 1, draws_failed: 5, errors: 0 });

        let exp = service.get_experiment(&scope, ExperimentKind::Mab, exp.experiment_id).unwrap();
        assert_eq!(exp.n_trials, 5);
        let outcomes = service.outcomes(&scope, ExperimentKind::Mab, exp.experiment_id).unwrap();
        assert!(outcomes.iter().all(|d| d.reward == Some(0.0)));
        assert!(outcomes.iter().all(|d| d.observation_type == Some(ObservationType::Auto)));

        // Nothing left to close.
        assert_eq!(sweeper.sweep(now).draws_failed, 0);
    }

    #[test]
    fn test_sweep_ignores_experiments_without_auto_fail() {
        let (service, sweeper) = setup(100);
        let scope = Scope::new("ws", "u");
        let exp = service.create_experiment(&scope, ExperimentKind::Mab, request(false)).unwrap();
        let now = Utc::now();
        let issued_at = now - Duration::days(30);
        service
            .draw_at(
                &scope,
                ExperimentKind::Mab,
                exp.experiment_id,
                DrawRequest::default(),
                issued_at,
            )
            .unwrap();
        assert_eq!(sweeper.sweep(now), SweepReport::default());
    }
}
