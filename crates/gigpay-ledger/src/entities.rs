use gigpay_types::{
    IdempotencyKey, LedgerError, LoanId, PlatformId, Result, StreamId, TaskId, TxId, UsdcAmount,
    WalletAddress, WorkerId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Active,
    /// Soft-disabled; the row is never deleted
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    /// Unique, lowercase-normalized
    pub wallet: WalletAddress,
    /// Bounded projection of the reputation event log, [0, 1000]
    pub reputation_score: i64,
    pub completed_tasks: u64,
    pub total_earned: UsdcAmount,
    pub status: WorkerStatus,
    pub created_at: i64,
}

impl Worker {
    pub const BASE_SCORE: i64 = 100;

    pub fn new(id: WorkerId, wallet: WalletAddress, now: i64) -> Self {
        Self {
            id,
            wallet,
            reputation_score: Self::BASE_SCORE,
            completed_tasks: 0,
            total_earned: UsdcAmount::ZERO,
            status: WorkerStatus::Active,
            created_at: now,
        }
    }

    pub fn account_age_days(&self, now: i64) -> i64 {
        (now - self.created_at) / 86_400
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: PlatformId,
    pub name: String,
    /// blake3 hex of the platform API credential; the plaintext is never stored
    pub api_key_hash: String,
    pub webhook_url: String,
    pub webhook_secret: String,
    pub total_paid_out: UsdcAmount,
    pub worker_count: u64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Fixed,
    TimeBased,
    Milestone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Assigned,
    InProgress,
    Completed,
    Disputed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub platform_id: PlatformId,
    pub worker_id: WorkerId,
    pub kind: TaskKind,
    pub payment: UsdcAmount,
    pub paid: UsdcAmount,
    pub status: TaskStatus,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl Task {
    /// Completion is the payout trigger and must happen exactly once.
    pub fn mark_completed(&mut self, now: i64) -> Result<()> {
        if self.status == TaskStatus::Completed {
            return Err(LedgerError::Conflict(format!(
                "Task {} already completed",
                self.id
            )));
        }
        if matches!(self.status, TaskStatus::Cancelled) {
            return Err(LedgerError::InvalidTransition {
                from: "cancelled".to_string(),
                to: "completed".to_string(),
            });
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Records settled payout value against the task; `paid` can never
    /// exceed `payment`.
    pub fn record_paid(&mut self, amount: UsdcAmount) -> Result<()> {
        let new_paid = self
            .paid
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Conflict(format!("Paid amount overflow on task {}", self.id)))?;
        if new_paid > self.payment {
            return Err(LedgerError::Conflict(format!(
                "Task {} paid {} would exceed payment {}",
                self.id, new_paid, self.payment
            )));
        }
        self.paid = new_paid;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

/// A time-bounded payout schedule bound 1:1 to an on-chain contract
/// stream. `released` only ever moves toward `total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: StreamId,
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub contract_stream_id: u64,
    pub total: UsdcAmount,
    pub released: UsdcAmount,
    pub claimed: UsdcAmount,
    pub start_time: i64,
    pub end_time: i64,
    pub release_interval_secs: u64,
    pub next_release_at: i64,
    pub status: StreamStatus,
}

impl Stream {
    /// Elapsed-proportional release watermark, clamped to `[0, total]`.
    pub fn expected_released(&self, now: i64) -> UsdcAmount {
        if now <= self.start_time || self.end_time <= self.start_time {
            return UsdcAmount::ZERO;
        }
        let elapsed = (now.min(self.end_time) - self.start_time) as u64;
        let duration = (self.end_time - self.start_time) as u64;
        self.total.mul_div(elapsed, duration).min(self.total)
    }

    /// Moves `released` up to `to`. Rejects regressions and anything
    /// past `total`; released is non-decreasing by invariant.
    pub fn advance_released(&mut self, to: UsdcAmount) -> Result<()> {
        if to < self.released {
            return Err(LedgerError::Conflict(format!(
                "Stream {} released would regress: {} -> {}",
                self.id, self.released, to
            )));
        }
        if to > self.total {
            return Err(LedgerError::Conflict(format!(
                "Stream {} released {} would exceed total {}",
                self.id, to, self.total
            )));
        }
        self.released = to;
        Ok(())
    }

    /// Worker withdrawal of already-released funds; `claimed <= released`.
    pub fn record_claim(&mut self, amount: UsdcAmount) -> Result<()> {
        let new_claimed = self
            .claimed
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Conflict(format!("Claim overflow on stream {}", self.id)))?;
        if new_claimed > self.released {
            return Err(LedgerError::Conflict(format!(
                "Stream {} claim {} would exceed released {}",
                self.id, new_claimed, self.released
            )));
        }
        self.claimed = new_claimed;
        Ok(())
    }

    /// Advances `next_release_at` past every missed tick rather than
    /// accumulating a backlog of stale ticks.
    pub fn snap_next_release(&mut self, now: i64) {
        let interval = self.release_interval_secs.max(1) as i64;
        while self.next_release_at <= now {
            self.next_release_at += interval;
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.status == StreamStatus::Active && self.next_release_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Payout,
    Advance,
    Refund,
    Repayment,
    Fee,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Payout => "payout",
            TxKind::Advance => "advance",
            TxKind::Refund => "refund",
            TxKind::Repayment => "repayment",
            TxKind::Fee => "fee",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
    Cancelled,
}

impl TxStatus {
    /// `Submitted -> Pending` is the backoff re-entry after a failed
    /// broadcast attempt.
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (TxStatus::Pending, TxStatus::Submitted)
                | (TxStatus::Pending, TxStatus::Cancelled)
                | (TxStatus::Pending, TxStatus::Failed)
                | (TxStatus::Submitted, TxStatus::Confirmed)
                | (TxStatus::Submitted, TxStatus::Failed)
                | (TxStatus::Submitted, TxStatus::Pending)
                | (TxStatus::Submitted, TxStatus::Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed | TxStatus::Cancelled)
    }
}

/// Every USDC movement. Immutable once `Confirmed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub idempotency_key: IdempotencyKey,
    pub kind: TxKind,
    pub status: TxStatus,
    pub amount: UsdcAmount,
    pub from_wallet: WalletAddress,
    pub to_wallet: WalletAddress,
    /// The worker whose finances this movement touches; settlement is
    /// serialized per worker
    pub worker_id: WorkerId,
    pub task_id: Option<TaskId>,
    pub loan_id: Option<LoanId>,
    pub stream_id: Option<StreamId>,
    pub tx_hash: Option<String>,
    pub confirmations: u32,
    pub retry_count: u32,
    pub created_at: i64,
    pub submitted_at: Option<i64>,
    pub confirmed_at: Option<i64>,
    /// True once settlement side effects (loan deduction, credit,
    /// webhook) have been applied, so re-delivered confirmations are
    /// no-ops.
    pub settled: bool,
}

impl Transaction {
    pub fn transition(&mut self, next: TxStatus) -> Result<()> {
        if self.status == TxStatus::Confirmed {
            return Err(LedgerError::Conflict(format!(
                "Transaction {} is confirmed and immutable",
                self.id
            )));
        }
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", next),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ReputationCause {
    TaskCompleted { rating: Option<f64> },
    TaskLate,
    DisputeFiled,
    DisputeResolved { in_workers_favor: bool },
    RatingReceived { stars: u8 },
    ManualAdjustment { delta: i64 },
    LoanDefaulted,
}

/// Append-only audit trail row; `Worker.reputation_score` is a derived,
/// replayable projection of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationEvent {
    pub id: u64,
    pub worker_id: WorkerId,
    pub cause: ReputationCause,
    pub points_delta: i64,
    pub previous_score: i64,
    pub new_score: i64,
    pub actor: String,
    pub reason: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Disbursed,
    Active,
    Repaying,
    Repaid,
    Defaulted,
    Cancelled,
}

impl LoanStatus {
    /// A worker may hold at most one loan in an outstanding state.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, LoanStatus::Active | LoanStatus::Repaying)
    }

    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        matches!(
            (self, next),
            (LoanStatus::Pending, LoanStatus::Approved)
                | (LoanStatus::Pending, LoanStatus::Cancelled)
                | (LoanStatus::Approved, LoanStatus::Disbursed)
                | (LoanStatus::Approved, LoanStatus::Cancelled)
                | (LoanStatus::Disbursed, LoanStatus::Active)
                | (LoanStatus::Active, LoanStatus::Repaying)
                | (LoanStatus::Active, LoanStatus::Repaid)
                | (LoanStatus::Active, LoanStatus::Defaulted)
                | (LoanStatus::Repaying, LoanStatus::Repaid)
                | (LoanStatus::Repaying, LoanStatus::Defaulted)
        )
    }
}

/// A short-term cash advance underwritten against predicted earnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub worker_id: WorkerId,
    pub principal: UsdcAmount,
    pub fee: UsdcAmount,
    pub total_owed: UsdcAmount,
    /// Decreases monotonically via repayment transactions
    pub remaining: UsdcAmount,
    pub fee_percentage: u64,
    pub status: LoanStatus,
    pub created_at: i64,
    pub disbursed_at: Option<i64>,
    pub due_date: i64,
}

impl Loan {
    pub fn transition(&mut self, next: LoanStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", next),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Decrements `remaining`; never overdraws, flips to `Repaying` on
    /// the first deduction and to `Repaid` when the balance clears.
    pub fn apply_repayment(&mut self, amount: UsdcAmount) -> Result<()> {
        if !self.status.is_outstanding() {
            return Err(LedgerError::Conflict(format!(
                "Loan {} is not outstanding ({:?})",
                self.id, self.status
            )));
        }
        let new_remaining = self.remaining.checked_sub(amount).ok_or_else(|| {
            LedgerError::Conflict(format!(
                "Repayment {} would overdraw loan {} remaining {}",
                amount, self.id, self.remaining
            ))
        })?;
        self.remaining = new_remaining;
        if self.remaining.is_zero() {
            self.status = LoanStatus::Repaid;
        } else if self.status == LoanStatus::Active {
            self.status = LoanStatus::Repaying;
        }
        Ok(())
    }
}

/// Append-only record of every state-changing action, with before and
/// after snapshots for dispute replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: u64,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub created_at: i64,
}
