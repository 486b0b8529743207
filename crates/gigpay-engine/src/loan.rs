use crate::reputation::ReputationEngine;
use crate::tx::{TransactionManager, TxIntent};
use gigpay_ledger::store::IdKind;
use gigpay_ledger::{
    LedgerStore, Loan, LoanStatus, ReputationCause, TaskStatus, Transaction, TxKind, TxStatus,
    WorkerStatus,
};
use gigpay_types::{
    IdempotencyKey, LedgerError, LoanId, Result, TxId, UsdcAmount, WalletAddress, WorkerId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Configuration for loan underwriting and auto-repayment
#[derive(Debug, Clone)]
pub struct LoanConfig {
    /// Minimum risk score to qualify
    pub min_risk_score: i64,
    /// Predicted 7-day earnings must cover this multiple of the request
    pub earnings_multiple: f64,
    pub min_account_age_days: i64,
    /// Completed / (completed + late-or-disputed-or-cancelled) floor
    pub min_completion_rate: f64,
    /// Share of each confirmed payout deducted while a loan is outstanding
    pub repayment_deduction_percent: u64,
    /// Days until the advance falls due
    pub term_days: i64,
    /// Trailing-window weights for the earnings prediction
    pub weight_7d_percent: u64,
    pub weight_30d_percent: u64,
}

impl Default for LoanConfig {
    fn default() -> Self {
        Self {
            min_risk_score: 600,
            earnings_multiple: 2.0,
            min_account_age_days: 30,
            min_completion_rate: 0.8,
            repayment_deduction_percent: 20, // 20%
            term_days: 30,
            weight_7d_percent: 70,
            weight_30d_percent: 30,
        }
    }
}

/// Fee tier by risk score. A transparent step function, not a model.
pub fn fee_percent_for_score(score: i64) -> u64 {
    match score {
        s if s >= 800 => 3,
        s if s >= 700 => 4,
        _ => 5,
    }
}

/// Why a request was or was not approved; every check is reported so
/// the API can show workers exactly what to improve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityReport {
    pub risk_score: i64,
    pub risk_score_ok: bool,
    pub predicted_weekly_earnings: UsdcAmount,
    pub earnings_ok: bool,
    pub has_outstanding_loan: bool,
    pub account_age_days: i64,
    pub account_age_ok: bool,
    pub completion_rate: f64,
    pub completion_rate_ok: bool,
    pub fee_percent: u64,
}

impl EligibilityReport {
    pub fn eligible(&self) -> bool {
        self.risk_score_ok
            && self.earnings_ok
            && !self.has_outstanding_loan
            && self.account_age_ok
            && self.completion_rate_ok
    }
}

/// Underwrites advances against predicted near-term earnings and
/// deducts repayments from confirmed payouts. All repayment math runs
/// under the caller's per-worker settlement lock.
pub struct LoanEngine {
    config: LoanConfig,
    store: Arc<LedgerStore>,
    transactions: Arc<TransactionManager>,
    reputation: Arc<ReputationEngine>,
    treasury: WalletAddress,
}

impl LoanEngine {
    pub fn new(
        config: LoanConfig,
        store: Arc<LedgerStore>,
        transactions: Arc<TransactionManager>,
        reputation: Arc<ReputationEngine>,
        treasury: WalletAddress,
    ) -> Self {
        Self {
            config,
            store,
            transactions,
            reputation,
            treasury,
        }
    }

    pub fn config(&self) -> &LoanConfig {
        &self.config
    }

    /// Weighted average of the trailing 7-day and 30-day completed-task
    /// totals, the 30-day total scaled to a week. For uniform earnings
    /// the prediction equals the actual weekly total.
    pub async fn predicted_weekly_earnings(
        &self,
        worker_id: WorkerId,
        now: i64,
    ) -> Result<UsdcAmount> {
        let total_7d: UsdcAmount = self
            .store
            .storage
            .completed_tasks_since(worker_id, now - 7 * 86_400)
            .await?
            .iter()
            .map(|t| t.payment)
            .sum();
        let total_30d: UsdcAmount = self
            .store
            .storage
            .completed_tasks_since(worker_id, now - 30 * 86_400)
            .await?
            .iter()
            .map(|t| t.payment)
            .sum();

        let weighted_7d = total_7d.mul_div(self.config.weight_7d_percent, 100);
        // Scale the 30-day total to a weekly rate before weighting
        let weighted_30d = total_30d.mul_div(self.config.weight_30d_percent * 7, 100 * 30);
        Ok(weighted_7d.saturating_add(weighted_30d))
    }

    pub async fn check_eligibility(
        &self,
        worker_id: WorkerId,
        amount: UsdcAmount,
        now: i64,
    ) -> Result<EligibilityReport> {
        let worker = self
            .store
            .storage
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Worker {}", worker_id)))?;
        if worker.status != WorkerStatus::Active {
            return Err(LedgerError::Conflict(format!(
                "Worker {} is disabled",
                worker_id
            )));
        }

        let predicted = self.predicted_weekly_earnings(worker_id, now).await?;
        let required = amount.mul_div((self.config.earnings_multiple * 100.0) as u64, 100);

        let tasks = self.store.storage.tasks_by_worker(worker_id).await?;
        let settled: Vec<_> = tasks
            .iter()
            .filter(|t| {
                matches!(
                    t.status,
                    TaskStatus::Completed | TaskStatus::Disputed | TaskStatus::Cancelled
                )
            })
            .collect();
        let completion_rate = if settled.is_empty() {
            // No history yet; the account-age and earnings gates carry the decision
            1.0
        } else {
            settled
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count() as f64
                / settled.len() as f64
        };

        let account_age_days = worker.account_age_days(now);
        let report = EligibilityReport {
            risk_score: worker.reputation_score,
            risk_score_ok: worker.reputation_score >= self.config.min_risk_score,
            predicted_weekly_earnings: predicted,
            earnings_ok: predicted >= required,
            has_outstanding_loan: self
                .store
                .storage
                .outstanding_loan(worker_id)
                .await?
                .is_some(),
            account_age_days,
            account_age_ok: account_age_days >= self.config.min_account_age_days,
            completion_rate,
            completion_rate_ok: completion_rate >= self.config.min_completion_rate,
            fee_percent: fee_percent_for_score(worker.reputation_score),
        };
        Ok(report)
    }

    /// Underwrites and opens an advance. On success the loan is
    /// `Approved` with its disbursement transaction opened through the
    /// state machine; the loan activates when that payout confirms.
    pub async fn request_advance(
        &self,
        worker_id: WorkerId,
        amount: UsdcAmount,
        now: i64,
    ) -> Result<(Loan, Transaction)> {
        if amount.is_zero() {
            return Err(LedgerError::Validation(
                "Advance amount must be positive".to_string(),
            ));
        }

        let report = self.check_eligibility(worker_id, amount, now).await?;
        if !report.eligible() {
            return Err(LedgerError::Validation(format!(
                "Worker {} not eligible for advance: score_ok={} earnings_ok={} outstanding={} age_ok={} completion_ok={}",
                worker_id,
                report.risk_score_ok,
                report.earnings_ok,
                report.has_outstanding_loan,
                report.account_age_ok,
                report.completion_rate_ok,
            )));
        }

        let worker = self
            .store
            .storage
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Worker {}", worker_id)))?;

        let fee_percent = report.fee_percent;
        let fee = amount.percentage(fee_percent);
        let total_owed = amount
            .checked_add(fee)
            .ok_or_else(|| LedgerError::Validation("Advance amount overflow".to_string()))?;

        let id = LoanId::new(self.store.storage.allocate_id(IdKind::Loan).await?);
        let mut loan = Loan {
            id,
            worker_id,
            principal: amount,
            fee,
            total_owed,
            remaining: total_owed,
            fee_percentage: fee_percent,
            status: LoanStatus::Pending,
            created_at: now,
            disbursed_at: None,
            due_date: now + self.config.term_days * 86_400,
        };

        let (loan, tx) = self
            .store
            .with_transaction(|| async {
                loan.transition(LoanStatus::Approved)?;
                self.store.storage.put_loan(loan.clone()).await?;

                let tx = self
                    .transactions
                    .intent(
                        TxIntent {
                            kind: TxKind::Advance,
                            amount,
                            from_wallet: self.treasury,
                            to_wallet: worker.wallet,
                            idempotency_key: IdempotencyKey::derive_for_loan(
                                id.value(),
                                "advance",
                            ),
                            worker_id,
                            task_id: None,
                            loan_id: Some(id),
                            stream_id: None,
                        },
                        now,
                    )
                    .await?;

                self.store
                    .audit
                    .record(
                        "loan_approved",
                        "loan",
                        id,
                        gigpay_ledger::AuditRecorder::none(),
                        Some(&loan),
                    )
                    .await?;
                Ok((loan.clone(), tx))
            })
            .await?;

        info!(
            loan_id = %id,
            worker_id = %worker_id,
            principal = %amount,
            fee = %fee,
            total_owed = %total_owed,
            fee_percent = fee_percent,
            "💰 Advance approved"
        );
        Ok((loan, tx))
    }

    /// Activates a loan when its disbursement payout confirms.
    pub async fn on_advance_confirmed(&self, loan_id: LoanId, now: i64) -> Result<Loan> {
        let mut loan = self.load(loan_id).await?;
        if loan.status.is_outstanding() {
            // Re-delivered confirmation
            return Ok(loan);
        }
        let before = loan.clone();
        loan.transition(LoanStatus::Disbursed)?;
        loan.transition(LoanStatus::Active)?;
        loan.disbursed_at = Some(now);
        loan.due_date = now + self.config.term_days * 86_400;
        self.store.storage.put_loan(loan.clone()).await?;
        self.store
            .audit
            .record("loan_disbursed", "loan", loan_id, Some(&before), Some(&loan))
            .await?;

        info!(
            loan_id = %loan_id,
            worker_id = %loan.worker_id,
            due_date = loan.due_date,
            "💸 Advance disbursed, loan active"
        );
        Ok(loan)
    }

    /// Deducts the configured share of a confirmed payout, capped at
    /// the remaining balance, as an internally settled `Repayment`
    /// transaction. Returns the deduction, or `None` when the worker
    /// has no outstanding loan. Must run under the worker's settlement
    /// lock so two payouts never read the same stale balance.
    pub async fn apply_auto_repayment(
        &self,
        worker_id: WorkerId,
        payout_amount: UsdcAmount,
        funding_tx: TxId,
        now: i64,
    ) -> Result<Option<Transaction>> {
        let Some(mut loan) = self.store.storage.outstanding_loan(worker_id).await? else {
            return Ok(None);
        };

        let deduction = payout_amount
            .percentage(self.config.repayment_deduction_percent)
            .min(loan.remaining);
        if deduction.is_zero() {
            return Ok(None);
        }

        let before = loan.clone();
        loan.apply_repayment(deduction)?;

        let worker = self
            .store
            .storage
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Worker {}", worker_id)))?;

        // The deduction is carved out of funds already moved by the
        // funding payout, so the repayment row is born confirmed.
        let id = TxId::new(self.store.storage.allocate_id(IdKind::Transaction).await?);
        let repayment = Transaction {
            id,
            idempotency_key: IdempotencyKey::derive_for_loan(
                loan.id.value(),
                &format!("repayment/{}", funding_tx),
            ),
            kind: TxKind::Repayment,
            status: TxStatus::Confirmed,
            amount: deduction,
            from_wallet: worker.wallet,
            to_wallet: self.treasury,
            worker_id,
            task_id: None,
            loan_id: Some(loan.id),
            stream_id: None,
            tx_hash: None,
            confirmations: 0,
            retry_count: 0,
            created_at: now,
            submitted_at: None,
            confirmed_at: Some(now),
            settled: true,
        };

        self.store.storage.put_transaction(repayment.clone()).await?;
        self.store.storage.put_loan(loan.clone()).await?;
        self.store
            .audit
            .record("loan_repayment", "loan", loan.id, Some(&before), Some(&loan))
            .await?;

        info!(
            loan_id = %loan.id,
            worker_id = %worker_id,
            deduction = %deduction,
            remaining = %loan.remaining,
            status = ?loan.status,
            "🔁 Auto-repayment deducted from payout"
        );
        Ok(Some(repayment))
    }

    /// Defaults every outstanding loan past its due date and emits the
    /// negative reputation event. Returns the defaulted loans.
    pub async fn sweep_defaults(&self, now: i64) -> Result<Vec<Loan>> {
        let mut defaulted = Vec::new();
        for mut loan in self.store.storage.overdue_loans(now).await? {
            let before = loan.clone();
            loan.transition(LoanStatus::Defaulted)?;
            self.store.storage.put_loan(loan.clone()).await?;
            self.store
                .audit
                .record("loan_defaulted", "loan", loan.id, Some(&before), Some(&loan))
                .await?;
            self.reputation
                .record(
                    loan.worker_id,
                    ReputationCause::LoanDefaulted,
                    "system",
                    Some(format!("Loan {} past due with {} outstanding", loan.id, loan.remaining)),
                    now,
                )
                .await?;

            warn!(
                loan_id = %loan.id,
                worker_id = %loan.worker_id,
                remaining = %loan.remaining,
                "⚠️ Loan defaulted past due date"
            );
            defaulted.push(loan);
        }
        Ok(defaulted)
    }

    async fn load(&self, loan_id: LoanId) -> Result<Loan> {
        self.store
            .storage
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Loan {}", loan_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::ReputationConfig;
    use crate::tx::TxConfig;
    use gigpay_chain::MockChainAdapter;
    use gigpay_ledger::{MemoryStore, Task, TaskKind, Worker};
    use gigpay_types::{PlatformId, TaskId, WalletAddress};

    const DAY: i64 = 86_400;

    struct Fixture {
        engine: LoanEngine,
        store: Arc<LedgerStore>,
        now: i64,
    }

    async fn create_test_fixture() -> Fixture {
        let store = Arc::new(LedgerStore::new(Arc::new(MemoryStore::new())));
        let chain = Arc::new(MockChainAdapter::new());
        let transactions = Arc::new(TransactionManager::new(
            TxConfig::default(),
            store.clone(),
            chain,
        ));
        let reputation = Arc::new(ReputationEngine::new(
            ReputationConfig::default(),
            store.clone(),
        ));
        let engine = LoanEngine::new(
            LoanConfig::default(),
            store.clone(),
            transactions,
            reputation,
            WalletAddress::treasury(),
        );

        let now = 100 * DAY;
        let mut worker = Worker::new(WorkerId::new(1), WalletAddress::from_bytes([1; 20]), 0);
        worker.reputation_score = 650;
        store.storage.put_worker(worker).await.unwrap();

        Fixture { engine, store, now }
    }

    /// Seeds completed tasks totalling `per_week` in each of the
    /// trailing 7- and 30-day windows at a uniform rate.
    async fn seed_uniform_earnings(fixture: &Fixture, per_week_usdc: f64) {
        let per_day = per_week_usdc / 7.0;
        for day in 0..30 {
            let completed_at = fixture.now - day * DAY - 1;
            fixture
                .store
                .storage
                .put_task(Task {
                    id: TaskId::new(1000 + day as u64),
                    platform_id: PlatformId::new(1),
                    worker_id: WorkerId::new(1),
                    kind: TaskKind::Fixed,
                    payment: UsdcAmount::from_usdc(per_day),
                    paid: UsdcAmount::from_usdc(per_day),
                    status: TaskStatus::Completed,
                    created_at: completed_at - DAY,
                    completed_at: Some(completed_at),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_prediction_matches_uniform_rate() {
        let fixture = create_test_fixture().await;
        seed_uniform_earnings(&fixture, 200.0).await;

        let predicted = fixture
            .engine
            .predicted_weekly_earnings(WorkerId::new(1), fixture.now)
            .await
            .unwrap();
        // 0.7 * 200 + 0.3 * (30 days at 200/wk scaled to a week) = 200
        let delta = (predicted.to_usdc() - 200.0).abs();
        assert!(delta < 0.01, "predicted {} should be ~200", predicted);
    }

    #[tokio::test]
    async fn test_scenario_a_underwriting() {
        // Risk score 650, predicted 7-day earnings $200, $100 request
        // at 5% fee: eligible, total owed $105
        let fixture = create_test_fixture().await;
        seed_uniform_earnings(&fixture, 200.0).await;

        let report = fixture
            .engine
            .check_eligibility(WorkerId::new(1), UsdcAmount::from_usdc(100.0), fixture.now)
            .await
            .unwrap();
        assert!(report.eligible(), "report: {:?}", report);
        assert_eq!(report.fee_percent, 5);

        let (loan, tx) = fixture
            .engine
            .request_advance(WorkerId::new(1), UsdcAmount::from_usdc(100.0), fixture.now)
            .await
            .unwrap();
        assert_eq!(loan.status, LoanStatus::Approved);
        assert_eq!(loan.fee, UsdcAmount::from_usdc(5.0));
        assert_eq!(loan.total_owed, UsdcAmount::from_usdc(105.0));
        assert_eq!(loan.remaining, UsdcAmount::from_usdc(105.0));
        assert_eq!(tx.kind, TxKind::Advance);
        assert_eq!(tx.amount, UsdcAmount::from_usdc(100.0));
    }

    #[tokio::test]
    async fn test_scenario_a_repayment_schedule() {
        let fixture = create_test_fixture().await;
        seed_uniform_earnings(&fixture, 200.0).await;

        let (loan, _) = fixture
            .engine
            .request_advance(WorkerId::new(1), UsdcAmount::from_usdc(100.0), fixture.now)
            .await
            .unwrap();
        fixture
            .engine
            .on_advance_confirmed(loan.id, fixture.now)
            .await
            .unwrap();

        // Three confirmed $40 payouts at 20% deduction: $8 each
        for i in 0..3 {
            let repayment = fixture
                .engine
                .apply_auto_repayment(
                    WorkerId::new(1),
                    UsdcAmount::from_usdc(40.0),
                    TxId::new(500 + i),
                    fixture.now + i as i64,
                )
                .await
                .unwrap()
                .expect("deduction expected");
            assert_eq!(repayment.amount, UsdcAmount::from_usdc(8.0));
        }

        let loan = fixture.store.storage.get_loan(loan.id).await.unwrap().unwrap();
        assert_eq!(loan.remaining, UsdcAmount::from_usdc(81.0));
        assert_eq!(loan.status, LoanStatus::Repaying);
    }

    #[tokio::test]
    async fn test_deduction_caps_at_remaining() {
        let fixture = create_test_fixture().await;
        seed_uniform_earnings(&fixture, 500.0).await;

        let (loan, _) = fixture
            .engine
            .request_advance(WorkerId::new(1), UsdcAmount::from_usdc(10.0), fixture.now)
            .await
            .unwrap();
        fixture
            .engine
            .on_advance_confirmed(loan.id, fixture.now)
            .await
            .unwrap();

        // 20% of $100 would be $20, but only $10.50 is owed
        let repayment = fixture
            .engine
            .apply_auto_repayment(
                WorkerId::new(1),
                UsdcAmount::from_usdc(100.0),
                TxId::new(500),
                fixture.now,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repayment.amount, UsdcAmount::from_usdc(10.5));

        let loan = fixture.store.storage.get_loan(loan.id).await.unwrap().unwrap();
        assert_eq!(loan.status, LoanStatus::Repaid);
        assert_eq!(loan.remaining, UsdcAmount::ZERO);

        // Nothing left to deduct afterwards
        let none = fixture
            .engine
            .apply_auto_repayment(
                WorkerId::new(1),
                UsdcAmount::from_usdc(100.0),
                TxId::new(501),
                fixture.now + 1,
            )
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_second_loan_blocked_while_outstanding() {
        let fixture = create_test_fixture().await;
        seed_uniform_earnings(&fixture, 500.0).await;

        let (loan, _) = fixture
            .engine
            .request_advance(WorkerId::new(1), UsdcAmount::from_usdc(50.0), fixture.now)
            .await
            .unwrap();
        fixture
            .engine
            .on_advance_confirmed(loan.id, fixture.now)
            .await
            .unwrap();

        let err = fixture
            .engine
            .request_advance(WorkerId::new(1), UsdcAmount::from_usdc(50.0), fixture.now)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_low_score_rejected() {
        let fixture = create_test_fixture().await;
        seed_uniform_earnings(&fixture, 500.0).await;

        let mut worker = fixture
            .store
            .storage
            .get_worker(WorkerId::new(1))
            .await
            .unwrap()
            .unwrap();
        worker.reputation_score = 599;
        fixture.store.storage.put_worker(worker).await.unwrap();

        let report = fixture
            .engine
            .check_eligibility(WorkerId::new(1), UsdcAmount::from_usdc(50.0), fixture.now)
            .await
            .unwrap();
        assert!(!report.eligible());
        assert!(!report.risk_score_ok);
    }

    #[tokio::test]
    async fn test_default_sweep_emits_reputation_event() {
        let fixture = create_test_fixture().await;
        seed_uniform_earnings(&fixture, 500.0).await;

        let (loan, _) = fixture
            .engine
            .request_advance(WorkerId::new(1), UsdcAmount::from_usdc(50.0), fixture.now)
            .await
            .unwrap();
        fixture
            .engine
            .on_advance_confirmed(loan.id, fixture.now)
            .await
            .unwrap();

        let past_due = fixture.now + 31 * DAY;
        let defaulted = fixture.engine.sweep_defaults(past_due).await.unwrap();
        assert_eq!(defaulted.len(), 1);
        assert_eq!(defaulted[0].status, LoanStatus::Defaulted);

        let events = fixture
            .store
            .storage
            .reputation_events(WorkerId::new(1))
            .await
            .unwrap();
        assert!(events
            .iter()
            .any(|e| e.cause == ReputationCause::LoanDefaulted && e.points_delta < 0));

        // Sweep is idempotent: a defaulted loan is no longer outstanding
        let again = fixture.engine.sweep_defaults(past_due + 1).await.unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_fee_tiers() {
        assert_eq!(fee_percent_for_score(850), 3);
        assert_eq!(fee_percent_for_score(800), 3);
        assert_eq!(fee_percent_for_score(750), 4);
        assert_eq!(fee_percent_for_score(650), 5);
        assert_eq!(fee_percent_for_score(600), 5);
    }
}
