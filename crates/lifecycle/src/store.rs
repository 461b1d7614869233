//! Persistence for experiments and draws.
//!
//! `InMemoryStore` is backed by DashMap. A durable store implements the same
//! trait; the lifecycle service only relies on the guarantees documented on
//! each method.

use bandit_core::types::{Draw, Experiment, ExperimentKind};
use bandit_core::{BanditError, BanditResult};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

pub trait ExperimentStore: Send + Sync {
    fn insert_experiment(&self, experiment: Experiment) -> BanditResult<()>;

    fn get_experiment(&self, workspace_id: &str, experiment_id: Uuid) -> Option<Experiment>;

    /// Experiments of `kind` in the workspace, newest first.
    fn list_experiments(&self, workspace_id: &str, kind: ExperimentKind) -> Vec<Experiment>;

    /// Every experiment with auto-fail enabled, across workspaces.
    fn auto_fail_experiments(&self) -> Vec<Experiment>;

    /// Removes the experiment and all of its draws. Returns false if absent.
    fn delete_experiment(&self, workspace_id: &str, experiment_id: Uuid) -> bool;

    /// Fails with `Conflict` if the workspace already holds this draw id.
    fn insert_draw(&self, draw: Draw) -> BanditResult<()>;

    fn get_draw(&self, workspace_id: &str, draw_id: &str) -> Option<Draw>;

    /// Most recent draw issued to `client_id` on the experiment.
    fn latest_client_draw(&self, experiment_id: Uuid, client_id: &str) -> Option<Draw>;

    /// Closed draws of the experiment, oldest observation first.
    fn observed_draws(&self, experiment_id: Uuid) -> Vec<Draw>;

    /// Open draws issued at or before `cutoff`, oldest first, paged.
    fn stale_open_draws(
        &self,
        experiment_id: Uuid,
        cutoff: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Vec<Draw>;

    /// Persist a closed draw together with the experiment state it produced.
    /// Fails with `Conflict` if the stored draw is already closed, so an
    /// outcome is applied at most once.
    fn commit_outcome(&self, experiment: &Experiment, draw: &Draw) -> BanditResult<()>;
}

/// Thread-safe in-memory store.
pub struct InMemoryStore {
    experiments: DashMap<Uuid, Experiment>,
    /// Keyed by (workspace_id, draw_id).
    draws: DashMap<(String, String), Draw>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        info!("Experiment store initialized (in-memory, development mode)");
        Self {
            experiments: DashMap::new(),
            draws: DashMap::new(),
        }
    }

    fn draws_where(&self, pred: impl Fn(&Draw) -> bool) -> Vec<Draw> {
        self.draws
            .iter()
            .filter(|r| pred(r.value()))
            .map(|r| r.value().clone())
            .collect()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentStore for InMemoryStore {
    fn insert_experiment(&self, experiment: Experiment) -> BanditResult<()> {
        match self.experiments.entry(experiment.experiment_id) {
            Entry::Occupied(_) => Err(BanditError::Conflict(format!(
                "experiment {} already exists",
                experiment.experiment_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(experiment);
                Ok(())
            }
        }
    }

    fn get_experiment(&self, workspace_id: &str, experiment_id: Uuid) -> Option<Experiment> {
        self.experiments
            .get(&experiment_id)
            .filter(|r| r.value().workspace_id == workspace_id)
            .map(|r| r.value().clone())
    }

    fn list_experiments(&self, workspace_id: &str, kind: ExperimentKind) -> Vec<Experiment> {
        let mut experiments: Vec<Experiment> = self
            .experiments
            .iter()
            .filter(|r| r.value().workspace_id == workspace_id && r.value().kind == kind)
            .map(|r| r.value().clone())
            .collect();
        experiments.sort_by(|a, b| b.created_datetime_utc.cmp(&a.created_datetime_utc));
        experiments
    }

    fn auto_fail_experiments(&self) -> Vec<Experiment> {
        self.experiments
            .iter()
            .filter(|r| r.value().auto_fail)
            .map(|r| r.value().clone())
            .collect()
    }

    fn delete_experiment(&self, workspace_id: &str, experiment_id: Uuid) -> bool {
        let removed = self
            .experiments
            .remove_if(&experiment_id, |_, e| e.workspace_id == workspace_id)
            .is_some();
        if removed {
            self.draws.retain(|_, d| d.experiment_id != experiment_id);
        }
        removed
    }

    fn insert_draw(&self, draw: Draw) -> BanditResult<()> {
        let key = (draw.workspace_id.clone(), draw.draw_id.clone());
        match self.draws.entry(key) {
            Entry::Occupied(_) => Err(BanditError::Conflict(format!(
                "Draw ID {} already exists.",
                draw.draw_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(draw);
                Ok(())
            }
        }
    }

    fn get_draw(&self, workspace_id: &str, draw_id: &str) -> Option<Draw> {
        self.draws
            .get(&(workspace_id.to_string(), draw_id.to_string()))
            .map(|r| r.value().clone())
    }

    fn latest_client_draw(&self, experiment_id: Uuid, client_id: &str) -> Option<Draw> {
        self.draws_where(|d| {
            d.experiment_id == experiment_id && d.client_id.as_deref() == Some(client_id)
        })
        .into_iter()
        .max_by(|a, b| a.draw_datetime_utc.cmp(&b.draw_datetime_utc))
    }

    fn observed_draws(&self, experiment_id: Uuid) -> Vec<Draw> {
        let mut draws = self.draws_where(|d| d.experiment_id == experiment_id && !d.is_open());
        draws.sort_by(|a, b| {
            a.observed_datetime_utc
                .cmp(&b.observed_datetime_utc)
                .then_with(|| a.draw_id.cmp(&b.draw_id))
        });
        draws
    }

    fn stale_open_draws(
        &self,
        experiment_id: Uuid,
        cutoff: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Vec<Draw> {
        let mut draws = self.draws_where(|d| {
            d.experiment_id == experiment_id && d.is_open() && d.draw_datetime_utc <= cutoff
        });
        draws.sort_by(|a, b| {
            a.draw_datetime_utc
                .cmp(&b.draw_datetime_utc)
                .then_with(|| a.draw_id.cmp(&b.draw_id))
        });
        draws.into_iter().skip(offset).take(limit).collect()
    }

    fn commit_outcome(&self, experiment: &Experiment, draw: &Draw) -> BanditResult<()> {
        let key = (draw.workspace_id.clone(), draw.draw_id.clone());
        let mut stored = self
            .draws
            .get_mut(&key)
            .ok_or_else(|| BanditError::not_found("Draw", &draw.draw_id))?;
        if !stored.is_open() {
            return Err(BanditError::Conflict(format!(
                "Draw with id {} already has an outcome.",
                draw.draw_id
            )));
        }
        match self.experiments.get_mut(&experiment.experiment_id) {
            Some(mut current) => *current = experiment.clone(),
            None => return Err(BanditError::not_found("Experiment", experiment.experiment_id)),
        }
        *stored = draw.clone();
        Ok(())
    }
}
