use gigpay_ledger::store::IdKind;
use gigpay_ledger::{LedgerStore, ReputationCause, ReputationEvent, Worker};
use gigpay_types::{LedgerError, Result, WorkerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub const SCORE_MIN: i64 = 0;
pub const SCORE_MAX: i64 = 1000;

/// Configuration for reputation deltas
#[derive(Debug, Clone)]
pub struct ReputationConfig {
    pub task_completed_delta: i64,
    /// Applied instead of the base delta when the completion rating
    /// clears the quality threshold
    pub task_completed_bonus_delta: i64,
    pub quality_rating_threshold: f64,
    pub task_late_delta: i64,
    pub dispute_filed_delta: i64,
    pub dispute_resolved_delta: i64,
    pub loan_defaulted_delta: i64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            task_completed_delta: 10,
            task_completed_bonus_delta: 15,
            quality_rating_threshold: 4.5,
            task_late_delta: -5,
            dispute_filed_delta: -20,
            dispute_resolved_delta: 10,
            loan_defaulted_delta: -30,
        }
    }
}

/// Rank bands are a pure function of score, not stored state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Gold,
    Silver,
    Bronze,
    Probation,
}

pub fn grade(score: i64) -> Grade {
    match score {
        s if s >= 800 => Grade::Gold,
        s if s >= 600 => Grade::Silver,
        s if s >= 400 => Grade::Bronze,
        _ => Grade::Probation,
    }
}

fn clamp_score(score: i64) -> i64 {
    score.clamp(SCORE_MIN, SCORE_MAX)
}

/// Folds the append-only event log into a bounded score. The live
/// `Worker.reputation_score` is an optimization updated in the same
/// ledger transaction as the event append; replaying the log always
/// reproduces it.
pub struct ReputationEngine {
    config: ReputationConfig,
    store: Arc<LedgerStore>,
}

impl ReputationEngine {
    pub fn new(config: ReputationConfig, store: Arc<LedgerStore>) -> Self {
        Self { config, store }
    }

    /// Points delta for a cause under the current configuration.
    pub fn delta_for(&self, cause: &ReputationCause) -> i64 {
        match cause {
            ReputationCause::TaskCompleted { rating } => {
                if rating.is_some_and(|r| r >= self.config.quality_rating_threshold) {
                    self.config.task_completed_bonus_delta
                } else {
                    self.config.task_completed_delta
                }
            }
            ReputationCause::TaskLate => self.config.task_late_delta,
            ReputationCause::DisputeFiled => self.config.dispute_filed_delta,
            ReputationCause::DisputeResolved { in_workers_favor } => {
                if *in_workers_favor {
                    self.config.dispute_resolved_delta
                } else {
                    0
                }
            }
            ReputationCause::RatingReceived { stars } => (*stars as i64 - 3) * 5,
            ReputationCause::ManualAdjustment { delta } => *delta,
            ReputationCause::LoanDefaulted => self.config.loan_defaulted_delta,
        }
    }

    /// Appends one event and updates the live score, capturing
    /// previous/new at write time. Callers wanting atomicity with other
    /// writes run this inside `LedgerStore::with_transaction`.
    pub async fn record(
        &self,
        worker_id: WorkerId,
        cause: ReputationCause,
        actor: &str,
        reason: Option<String>,
        now: i64,
    ) -> Result<ReputationEvent> {
        if let ReputationCause::ManualAdjustment { .. } = &cause {
            if actor.is_empty() || reason.is_none() {
                return Err(LedgerError::Validation(
                    "Manual adjustments require an actor and a reason".to_string(),
                ));
            }
        }
        if let ReputationCause::RatingReceived { stars } = &cause {
            if !(1..=5).contains(stars) {
                return Err(LedgerError::Validation(format!(
                    "Rating must be 1-5 stars, got {}",
                    stars
                )));
            }
        }

        let mut worker = self
            .store
            .storage
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Worker {}", worker_id)))?;

        let delta = self.delta_for(&cause);
        let previous_score = worker.reputation_score;
        let new_score = clamp_score(previous_score + delta);

        let id = self
            .store
            .storage
            .allocate_id(IdKind::ReputationEvent)
            .await?;
        let event = ReputationEvent {
            id,
            worker_id,
            cause,
            points_delta: delta,
            previous_score,
            new_score,
            actor: actor.to_string(),
            reason,
            created_at: now,
        };

        self.store.storage.append_reputation_event(event.clone()).await?;
        worker.reputation_score = new_score;
        self.store.storage.put_worker(worker).await?;

        info!(
            worker_id = %worker_id,
            delta = delta,
            previous = previous_score,
            new = new_score,
            cause = ?event.cause,
            "⭐ Reputation updated"
        );
        Ok(event)
    }

    /// Recomputes the score by replaying every event in `created_at`
    /// order from the base, clamping at each step. Equal to the live
    /// score by construction; dispute resolution relies on this.
    pub async fn replay(&self, worker_id: WorkerId) -> Result<i64> {
        let events = self.store.storage.reputation_events(worker_id).await?;
        let mut score = Worker::BASE_SCORE;
        for event in &events {
            score = clamp_score(score + event.points_delta);
        }
        Ok(score)
    }

    /// The full event log for a worker, oldest first.
    pub async fn breakdown(&self, worker_id: WorkerId) -> Result<Vec<ReputationEvent>> {
        self.store.storage.reputation_events(worker_id).await
    }
}
