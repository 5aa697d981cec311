use std::collections::BTreeMap;

use crate::{error::CoordinatorError, model::Tensor};

/// What one worker reported at the end of its round.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerUpdate {
    pub loss: f32,
    pub params: Vec<Tensor>,
}

/// The outcome of one round, keyed by worker id.
#[derive(Debug)]
pub struct RoundResult {
    round: usize,
    updates: BTreeMap<String, WorkerUpdate>,
    excluded: Vec<(String, CoordinatorError)>,
}

impl RoundResult {
    pub fn new(round: usize) -> Self {
        Self {
            round,
            updates: BTreeMap::new(),
            excluded: Vec::new(),
        }
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn record(&mut self, worker_id: String, update: WorkerUpdate) {
        self.updates.insert(worker_id, update);
    }

    pub fn exclude(&mut self, worker_id: String, reason: CoordinatorError) {
        self.excluded.push((worker_id, reason));
    }

    pub fn updates(&self) -> &BTreeMap<String, WorkerUpdate> {
        &self.updates
    }

    /// The ids of the workers that completed the round.
    pub fn contributors(&self) -> Vec<String> {
        self.updates.keys().cloned().collect()
    }

    /// The workers left out of the round, with the reason.
    pub fn excluded(&self) -> &[(String, CoordinatorError)] {
        &self.excluded
    }

    /// The mean of the losses the contributors reported.
    pub fn mean_loss(&self) -> Option<f32> {
        if self.updates.is_empty() {
            return None;
        }

        let total: f32 = self.updates.values().map(|u| u.loss).sum();
        Some(total / self.updates.len() as f32)
    }

    /// Consumes the result, keeping only every contributor's parameters.
    pub fn into_parameters(self) -> BTreeMap<String, Vec<Tensor>> {
        self.updates
            .into_iter()
            .map(|(id, update)| (id, update.params))
            .collect()
    }
}
