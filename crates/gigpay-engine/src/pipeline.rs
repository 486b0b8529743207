use crate::loan::LoanEngine;
use crate::reputation::ReputationEngine;
use crate::scheduler::StreamScheduler;
use crate::tx::{TransactionManager, TxIntent};
use crate::webhook::{WebhookNotifier, WebhookPayload};
use gigpay_ledger::{
    LedgerStore, ReputationCause, TaskKind, TaskStatus, Transaction, TxKind, TxStatus,
    WorkerStatus,
};
use gigpay_types::{
    IdempotencyKey, LedgerError, PlatformId, Result, TaskId, UsdcAmount, WalletAddress, WorkerId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, warn};

/// Per-worker mutual-exclusion scope: a payout, its reputation event
/// and its loan deduction apply as one ordered unit even under
/// concurrent completions for the same worker. Cross-worker work is
/// fully parallel.
pub struct WorkerLocks {
    locks: RwLock<HashMap<WorkerId, Arc<Mutex<()>>>>,
}

impl Default for WorkerLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerLocks {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, worker_id: WorkerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.write().await;
            locks
                .entry(worker_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Inbound task-completion event from the task/worker API. Delivery is
/// at-least-once; processing is idempotent per task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletionEvent {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub platform_id: PlatformId,
    pub amount: UsdcAmount,
    pub rating: Option<f64>,
}

/// What a completion produced
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    /// The direct payout intent; `None` for stream-typed tasks, which
    /// pay out through the scheduler
    pub payout: Option<Transaction>,
    /// True when this was a re-delivered event and nothing was written
    pub duplicate: bool,
}

/// Orchestrates the task-completion control flow: completion intent →
/// payout submission → asynchronous settlement with loan deduction,
/// worker credit and platform webhook.
pub struct PayoutPipeline {
    store: Arc<LedgerStore>,
    transactions: Arc<TransactionManager>,
    scheduler: Arc<StreamScheduler>,
    reputation: Arc<ReputationEngine>,
    loans: Arc<LoanEngine>,
    webhooks: Arc<WebhookNotifier>,
    locks: WorkerLocks,
    treasury: WalletAddress,
}

impl PayoutPipeline {
    pub fn new(
        store: Arc<LedgerStore>,
        transactions: Arc<TransactionManager>,
        scheduler: Arc<StreamScheduler>,
        reputation: Arc<ReputationEngine>,
        loans: Arc<LoanEngine>,
        webhooks: Arc<WebhookNotifier>,
        treasury: WalletAddress,
    ) -> Self {
        Self {
            store,
            transactions,
            scheduler,
            reputation,
            loans,
            webhooks,
            locks: WorkerLocks::new(),
            treasury,
        }
    }

    /// Handles a task-completion event. Re-delivery of the same event
    /// is a no-op that returns the original payout. The ledger writes
    /// (task completion, payout intent, reputation event) commit
    /// atomically; the broadcast happens after the worker lock drops.
    pub async fn on_task_completed(
        &self,
        event: TaskCompletionEvent,
        now: i64,
    ) -> Result<CompletionOutcome> {
        let task = self
            .store
            .storage
            .get_task(event.task_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Task {}", event.task_id)))?;

        if task.worker_id != event.worker_id || task.platform_id != event.platform_id {
            return Err(LedgerError::Validation(format!(
                "Completion event for task {} names wrong worker or platform",
                event.task_id
            )));
        }
        if event.amount != task.payment {
            return Err(LedgerError::Validation(format!(
                "Completion amount {} disagrees with task payment {}",
                event.amount, task.payment
            )));
        }

        let guard = self.locks.acquire(event.worker_id).await;

        // Idempotence: a completed task has already been processed
        let task = self
            .store
            .storage
            .get_task(event.task_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Task {}", event.task_id)))?;
        if task.status == TaskStatus::Completed {
            let existing = self
                .store
                .storage
                .get_transaction_by_key(&IdempotencyKey::derive(event.task_id, "payout"))
                .await?;
            info!(task_id = %event.task_id, "📦 Duplicate completion event ignored");
            return Ok(CompletionOutcome {
                payout: existing,
                duplicate: true,
            });
        }

        let worker = self
            .store
            .storage
            .get_worker(event.worker_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Worker {}", event.worker_id)))?;
        if worker.status != WorkerStatus::Active {
            return Err(LedgerError::Conflict(format!(
                "Worker {} is disabled",
                event.worker_id
            )));
        }

        let stream_paid = task.kind == TaskKind::TimeBased
            && self
                .store
                .storage
                .stream_for_task(event.task_id)
                .await?
                .is_some();

        let payout = self
            .store
            .with_transaction(|| async {
                let mut task = task.clone();
                let before = task.clone();
                task.mark_completed(now)?;
                self.store.storage.put_task(task.clone()).await?;

                let mut worker = worker.clone();
                worker.completed_tasks += 1;
                self.store.storage.put_worker(worker.clone()).await?;

                self.reputation
                    .record(
                        event.worker_id,
                        ReputationCause::TaskCompleted {
                            rating: event.rating,
                        },
                        "system",
                        None,
                        now,
                    )
                    .await?;

                let payout = if stream_paid {
                    // Stream-typed tasks pay out through the scheduler
                    None
                } else {
                    Some(
                        self.transactions
                            .intent(
                                TxIntent {
                                    kind: TxKind::Payout,
                                    amount: task.payment,
                                    from_wallet: self.treasury,
                                    to_wallet: worker.wallet,
                                    idempotency_key: IdempotencyKey::derive(
                                        event.task_id,
                                        "payout",
                                    ),
                                    worker_id: event.worker_id,
                                    task_id: Some(event.task_id),
                                    loan_id: None,
                                    stream_id: None,
                                },
                                now,
                            )
                            .await?,
                    )
                };

                self.store
                    .audit
                    .record("task_completed", "task", event.task_id, Some(&before), Some(&task))
                    .await?;
                Ok(payout)
            })
            .await?;

        drop(guard);

        // Broadcast outside every in-process lock
        let payout = match payout {
            Some(tx) => Some(self.transactions.submit(tx.id, now).await?),
            None => None,
        };

        info!(
            task_id = %event.task_id,
            worker_id = %event.worker_id,
            amount = %event.amount,
            stream_paid = stream_paid,
            "✅ Task completion processed"
        );
        Ok(CompletionOutcome {
            payout,
            duplicate: false,
        })
    }

    /// Applies settlement side effects for one confirmed transaction.
    /// Confirmation delivery is at-least-once, so the row is re-read
    /// and checked against its `settled` flag before any side effect.
    pub async fn settle(&self, tx: &Transaction, now: i64) -> Result<()> {
        let tx = self
            .store
            .storage
            .get_transaction(tx.id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Transaction {}", tx.id)))?;
        if tx.status != TxStatus::Confirmed {
            return Err(LedgerError::Validation(format!(
                "Transaction {} is not confirmed",
                tx.id
            )));
        }
        if tx.settled {
            return Ok(());
        }

        match tx.kind {
            TxKind::Payout => self.settle_payout(&tx, now).await,
            TxKind::Advance => self.settle_advance(&tx, now).await,
            TxKind::Refund | TxKind::Fee | TxKind::Repayment => {
                self.mark_settled(&tx).await?;
                Ok(())
            }
        }
    }

    async fn settle_payout(&self, tx: &Transaction, now: i64) -> Result<()> {
        let guard = self.locks.acquire(tx.worker_id).await;

        // Re-check under the lock: a concurrent settle of the same
        // confirmation may have won the race before the lock was held
        let current = self
            .store
            .storage
            .get_transaction(tx.id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Transaction {}", tx.id)))?;
        if current.settled {
            return Ok(());
        }

        // Stream bookkeeping first so released/claimed stay ahead of
        // the worker credit
        if tx.stream_id.is_some() {
            self.scheduler.apply_confirmed_release(tx, now).await?;
        }

        let deduction = self
            .store
            .with_transaction(|| async {
                let refreshed = self
                    .store
                    .storage
                    .get_transaction(tx.id)
                    .await?
                    .ok_or_else(|| LedgerError::NotFound(format!("Transaction {}", tx.id)))?;
                if refreshed.settled {
                    return Ok(UsdcAmount::ZERO);
                }

                if let Some(task_id) = tx.task_id {
                    let mut task = self
                        .store
                        .storage
                        .get_task(task_id)
                        .await?
                        .ok_or_else(|| LedgerError::NotFound(format!("Task {}", task_id)))?;
                    task.record_paid(tx.amount)?;
                    self.store.storage.put_task(task.clone()).await?;

                    let mut platform = self
                        .store
                        .storage
                        .get_platform(task.platform_id)
                        .await?
                        .ok_or_else(|| {
                            LedgerError::NotFound(format!("Platform {}", task.platform_id))
                        })?;
                    platform.total_paid_out = platform.total_paid_out.saturating_add(tx.amount);
                    self.store.storage.put_platform(platform).await?;
                }

                // Loan deduction comes out before the worker is credited
                let deduction = match self
                    .loans
                    .apply_auto_repayment(tx.worker_id, tx.amount, tx.id, now)
                    .await?
                {
                    Some(repayment) => repayment.amount,
                    None => UsdcAmount::ZERO,
                };

                let net = tx.amount.saturating_sub(deduction);
                let mut worker = self
                    .store
                    .storage
                    .get_worker(tx.worker_id)
                    .await?
                    .ok_or_else(|| LedgerError::NotFound(format!("Worker {}", tx.worker_id)))?;
                let worker_before = worker.clone();
                worker.total_earned = worker.total_earned.saturating_add(net);
                self.store.storage.put_worker(worker.clone()).await?;

                let mut settled_tx = refreshed;
                settled_tx.settled = true;
                self.store.storage.put_transaction(settled_tx).await?;

                self.store
                    .audit
                    .record(
                        "payout_settled",
                        "worker",
                        tx.worker_id,
                        Some(&worker_before),
                        Some(&worker),
                    )
                    .await?;
                Ok(deduction)
            })
            .await?;

        drop(guard);

        info!(
            tx_id = %tx.id,
            worker_id = %tx.worker_id,
            gross = %tx.amount,
            deduction = %deduction,
            "💰 Payout settled"
        );

        self.dispatch_webhook(tx).await;
        Ok(())
    }

    async fn settle_advance(&self, tx: &Transaction, now: i64) -> Result<()> {
        let loan_id = tx.loan_id.ok_or_else(|| {
            LedgerError::Validation(format!("Advance transaction {} has no loan", tx.id))
        })?;

        let guard = self.locks.acquire(tx.worker_id).await;
        self.loans.on_advance_confirmed(loan_id, now).await?;
        self.mark_settled(tx).await?;
        drop(guard);
        Ok(())
    }

    async fn mark_settled(&self, tx: &Transaction) -> Result<()> {
        let mut refreshed = self
            .store
            .storage
            .get_transaction(tx.id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Transaction {}", tx.id)))?;
        refreshed.settled = true;
        self.store.storage.put_transaction(refreshed).await
    }

    /// Delivery runs detached; retries must not stall settlement.
    async fn dispatch_webhook(&self, tx: &Transaction) {
        let Some(task_id) = tx.task_id else {
            return;
        };
        let platform = match self.store.storage.get_task(task_id).await {
            Ok(Some(task)) => match self.store.storage.get_platform(task.platform_id).await {
                Ok(Some(platform)) => platform,
                _ => return,
            },
            _ => return,
        };

        let webhooks = self.webhooks.clone();
        let payload = WebhookPayload::for_confirmed(tx);
        tokio::spawn(async move {
            if let Err(e) = webhooks.deliver(&platform, &payload).await {
                warn!(error = %e, "Webhook delivery gave up");
            }
        });
    }

    /// Operator action for a terminally failed payout: opens a fresh
    /// payout attempt derived from the originating task, never from the
    /// failed transaction.
    pub async fn retry_failed_payout(
        &self,
        task_id: TaskId,
        actor: &str,
        now: i64,
    ) -> Result<Transaction> {
        let task = self
            .store
            .storage
            .get_task(task_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Task {}", task_id)))?;
        if task.status != TaskStatus::Completed {
            return Err(LedgerError::Conflict(format!(
                "Task {} is not completed, nothing to pay",
                task_id
            )));
        }

        let existing = self.store.storage.transactions_by_task(task_id).await?;
        let payouts: Vec<_> = existing.iter().filter(|t| t.kind == TxKind::Payout).collect();
        if payouts
            .iter()
            .any(|t| !matches!(t.status, TxStatus::Failed | TxStatus::Cancelled))
        {
            return Err(LedgerError::Conflict(format!(
                "Task {} already has a live payout",
                task_id
            )));
        }

        let worker = self
            .store
            .storage
            .get_worker(task.worker_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Worker {}", task.worker_id)))?;

        // Attempt-scoped key: the failed attempt keeps its own history
        let attempt = payouts.len() + 1;
        let tx = self
            .transactions
            .intent(
                TxIntent {
                    kind: TxKind::Payout,
                    amount: task.payment.saturating_sub(task.paid),
                    from_wallet: self.treasury,
                    to_wallet: worker.wallet,
                    idempotency_key: IdempotencyKey::derive(
                        task_id,
                        &format!("payout/{}", attempt),
                    ),
                    worker_id: task.worker_id,
                    task_id: Some(task_id),
                    loan_id: None,
                    stream_id: None,
                },
                now,
            )
            .await?;
        self.store
            .audit
            .record(
                "payout_retried",
                "task",
                task_id,
                gigpay_ledger::AuditRecorder::none(),
                Some(&format!("attempt {} by {}", attempt, actor)),
            )
            .await?;

        info!(
            task_id = %task_id,
            tx_id = %tx.id,
            attempt = attempt,
            actor = actor,
            "🔁 Operator reopened failed payout"
        );
        self.transactions.submit(tx.id, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan::LoanConfig;
    use crate::reputation::ReputationConfig;
    use crate::scheduler::SchedulerConfig;
    use crate::tx::TxConfig;
    use crate::webhook::WebhookConfig;
    use gigpay_chain::MockChainAdapter;
    use gigpay_ledger::{MemoryStore, Platform, Task, Worker};

    struct Fixture {
        pipeline: Arc<PayoutPipeline>,
        transactions: Arc<TransactionManager>,
        chain: Arc<MockChainAdapter>,
        store: Arc<LedgerStore>,
    }

    async fn create_test_fixture() -> Fixture {
        let store = Arc::new(LedgerStore::new(Arc::new(MemoryStore::new())));
        let chain = Arc::new(MockChainAdapter::new());
        let transactions = Arc::new(TransactionManager::new(
            TxConfig::default(),
            store.clone(),
            chain.clone(),
        ));
        let scheduler = Arc::new(StreamScheduler::new(
            SchedulerConfig::default(),
            store.clone(),
            chain.clone(),
            transactions.clone(),
            WalletAddress::treasury(),
        ));
        let reputation = Arc::new(ReputationEngine::new(
            ReputationConfig::default(),
            store.clone(),
        ));
        let loans = Arc::new(LoanEngine::new(
            LoanConfig::default(),
            store.clone(),
            transactions.clone(),
            reputation.clone(),
            WalletAddress::treasury(),
        ));
        let webhooks = Arc::new(WebhookNotifier::new(WebhookConfig::default(), store.clone()).unwrap());
        let pipeline = Arc::new(PayoutPipeline::new(
            store.clone(),
            transactions.clone(),
            scheduler,
            reputation,
            loans,
            webhooks,
            WalletAddress::treasury(),
        ));

        store
            .storage
            .put_platform(Platform {
                id: PlatformId::new(1),
                name: "Test Platform".to_string(),
                api_key_hash: "hash".to_string(),
                webhook_url: String::new(),
                webhook_secret: "secret".to_string(),
                total_paid_out: UsdcAmount::ZERO,
                worker_count: 1,
                created_at: 0,
            })
            .await
            .unwrap();
        store
            .storage
            .put_worker(Worker::new(
                WorkerId::new(1),
                WalletAddress::from_bytes([1; 20]),
                0,
            ))
            .await
            .unwrap();

        Fixture {
            pipeline,
            transactions,
            chain,
            store,
        }
    }

    async fn seed_task(fixture: &Fixture, id: u64, amount: f64) {
        fixture
            .store
            .storage
            .put_task(Task {
                id: TaskId::new(id),
                platform_id: PlatformId::new(1),
                worker_id: WorkerId::new(1),
                kind: TaskKind::Fixed,
                payment: UsdcAmount::from_usdc(amount),
                paid: UsdcAmount::ZERO,
                status: TaskStatus::InProgress,
                created_at: 0,
                completed_at: None,
            })
            .await
            .unwrap();
    }

    fn completion(task: u64, amount: f64) -> TaskCompletionEvent {
        TaskCompletionEvent {
            task_id: TaskId::new(task),
            worker_id: WorkerId::new(1),
            platform_id: PlatformId::new(1),
            amount: UsdcAmount::from_usdc(amount),
            rating: None,
        }
    }

    async fn confirm_and_settle(fixture: &Fixture, now: i64) -> Vec<Transaction> {
        fixture.chain.confirm_all(1).await;
        let confirmed = fixture.transactions.run_once(now).await.unwrap();
        for tx in &confirmed {
            fixture.pipeline.settle(tx, now).await.unwrap();
        }
        confirmed
    }

    #[tokio::test]
    async fn test_scenario_c_duplicate_completion() {
        let fixture = create_test_fixture().await;
        seed_task(&fixture, 1, 40.0).await;

        let first = fixture
            .pipeline
            .on_task_completed(completion(1, 40.0), 100)
            .await
            .unwrap();
        assert!(!first.duplicate);
        let payout = first.payout.unwrap();

        // Duplicate webhook delivery
        let second = fixture
            .pipeline
            .on_task_completed(completion(1, 40.0), 200)
            .await
            .unwrap();
        assert!(second.duplicate);
        assert_eq!(second.payout.unwrap().id, payout.id);

        // Exactly one payout transaction of the task amount
        let txs = fixture
            .store
            .storage
            .transactions_by_task(TaskId::new(1))
            .await
            .unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].amount, UsdcAmount::from_usdc(40.0));

        // And exactly one reputation event
        let events = fixture
            .store
            .storage
            .reputation_events(WorkerId::new(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_settlement_credits_worker_and_platform() {
        let fixture = create_test_fixture().await;
        seed_task(&fixture, 1, 40.0).await;

        fixture
            .pipeline
            .on_task_completed(completion(1, 40.0), 100)
            .await
            .unwrap();
        let confirmed = confirm_and_settle(&fixture, 200).await;
        assert_eq!(confirmed.len(), 1);

        let worker = fixture
            .store
            .storage
            .get_worker(WorkerId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(worker.total_earned, UsdcAmount::from_usdc(40.0));
        assert_eq!(worker.completed_tasks, 1);

        let task = fixture.store.storage.get_task(TaskId::new(1)).await.unwrap().unwrap();
        assert_eq!(task.paid, UsdcAmount::from_usdc(40.0));

        let platform = fixture
            .store
            .storage
            .get_platform(PlatformId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(platform.total_paid_out, UsdcAmount::from_usdc(40.0));
    }

    #[tokio::test]
    async fn test_settlement_is_idempotent() {
        let fixture = create_test_fixture().await;
        seed_task(&fixture, 1, 40.0).await;

        fixture
            .pipeline
            .on_task_completed(completion(1, 40.0), 100)
            .await
            .unwrap();
        let confirmed = confirm_and_settle(&fixture, 200).await;

        // Re-delivered confirmation settles nothing twice
        let tx = fixture
            .store
            .storage
            .get_transaction(confirmed[0].id)
            .await
            .unwrap()
            .unwrap();
        fixture.pipeline.settle(&tx, 300).await.unwrap();

        let worker = fixture
            .store
            .storage
            .get_worker(WorkerId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(worker.total_earned, UsdcAmount::from_usdc(40.0));
    }

    #[tokio::test]
    async fn test_amount_mismatch_rejected() {
        let fixture = create_test_fixture().await;
        seed_task(&fixture, 1, 40.0).await;

        let err = fixture
            .pipeline
            .on_task_completed(completion(1, 45.0), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_scenario_d_operator_retry_after_terminal_failure() {
        let fixture = create_test_fixture().await;
        seed_task(&fixture, 1, 40.0).await;

        // The first three broadcast attempts revert
        fixture.chain.fail_next_submissions(3).await;
        let outcome = fixture
            .pipeline
            .on_task_completed(completion(1, 40.0), 0)
            .await
            .unwrap();
        let tx_id = outcome.payout.unwrap().id;

        // Drive the retry schedule to exhaustion (backoff 2s then 4s)
        for now in [3, 10] {
            fixture.transactions.run_once(now).await.unwrap();
        }
        let tx = fixture.store.storage.get_transaction(tx_id).await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Failed);
        assert_eq!(tx.retry_count, 3);

        // Not auto-retried a 4th time
        let attempts = fixture.chain.submission_attempts().await;
        fixture.transactions.run_once(100).await.unwrap();
        assert_eq!(fixture.chain.submission_attempts().await, attempts);

        // Operator action re-creates the payout from the task
        let fresh = fixture
            .pipeline
            .retry_failed_payout(TaskId::new(1), "ops@gigpay", 200)
            .await
            .unwrap();
        assert_eq!(fresh.status, TxStatus::Submitted);
        assert_eq!(fresh.amount, UsdcAmount::from_usdc(40.0));
        assert_ne!(fresh.id, tx_id);

        let confirmed = confirm_and_settle(&fixture, 300).await;
        assert_eq!(confirmed.len(), 1);
        let task = fixture.store.storage.get_task(TaskId::new(1)).await.unwrap().unwrap();
        assert_eq!(task.paid, UsdcAmount::from_usdc(40.0));
    }

    #[tokio::test]
    async fn test_retry_rejected_while_payout_live() {
        let fixture = create_test_fixture().await;
        seed_task(&fixture, 1, 40.0).await;

        fixture
            .pipeline
            .on_task_completed(completion(1, 40.0), 0)
            .await
            .unwrap();

        let err = fixture
            .pipeline
            .retry_failed_payout(TaskId::new(1), "ops@gigpay", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_concurrent_completions_serialize_per_worker() {
        let fixture = create_test_fixture().await;
        for id in 1..=4 {
            seed_task(&fixture, id, 10.0).await;
        }

        let mut handles = Vec::new();
        for id in 1..=4u64 {
            let pipeline = fixture.pipeline.clone();
            handles.push(tokio::spawn(async move {
                pipeline.on_task_completed(completion(id, 10.0), id as i64).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        confirm_and_settle(&fixture, 100).await;

        let worker = fixture
            .store
            .storage
            .get_worker(WorkerId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(worker.completed_tasks, 4);
        assert_eq!(worker.total_earned, UsdcAmount::from_usdc(40.0));
        // One reputation event per task, none lost to interleaving
        let events = fixture
            .store
            .storage
            .reputation_events(WorkerId::new(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 4);
    }
}
