use crate::entities::{
    AuditRecord, Loan, Platform, ReputationEvent, Stream, Task, TaskStatus, Transaction, TxStatus,
    Worker,
};
use async_trait::async_trait;
use gigpay_types::{
    IdempotencyKey, LedgerError, LoanId, PlatformId, Result, StreamId, TaskId, TxId,
    WalletAddress, WorkerId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Entity families with independently allocated ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Worker,
    Platform,
    Task,
    Stream,
    Transaction,
    Loan,
    ReputationEvent,
    Audit,
}

/// Storage boundary for the ledger core. Backends must enforce the data
/// model invariants on write and reject violations with a typed
/// `Conflict` instead of committing a silent bad row.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    async fn allocate_id(&self, kind: IdKind) -> Result<u64>;

    async fn put_worker(&self, worker: Worker) -> Result<()>;
    async fn get_worker(&self, id: WorkerId) -> Result<Option<Worker>>;
    async fn get_worker_by_wallet(&self, wallet: WalletAddress) -> Result<Option<Worker>>;

    async fn put_platform(&self, platform: Platform) -> Result<()>;
    async fn get_platform(&self, id: PlatformId) -> Result<Option<Platform>>;

    async fn put_task(&self, task: Task) -> Result<()>;
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;
    /// All tasks for a worker, any status
    async fn tasks_by_worker(&self, worker_id: WorkerId) -> Result<Vec<Task>>;
    /// Completed tasks with `completed_at >= since`
    async fn completed_tasks_since(&self, worker_id: WorkerId, since: i64) -> Result<Vec<Task>>;

    async fn put_stream(&self, stream: Stream) -> Result<()>;
    async fn get_stream(&self, id: StreamId) -> Result<Option<Stream>>;
    /// The stream bound to a streaming-type task, if one was opened
    async fn stream_for_task(&self, task_id: TaskId) -> Result<Option<Stream>>;
    /// Active streams with `next_release_at <= now`, the scheduler due-queue
    async fn due_streams(&self, now: i64) -> Result<Vec<Stream>>;

    async fn put_transaction(&self, tx: Transaction) -> Result<()>;
    async fn get_transaction(&self, id: TxId) -> Result<Option<Transaction>>;
    async fn get_transaction_by_key(&self, key: &IdempotencyKey) -> Result<Option<Transaction>>;
    async fn transactions_by_status(&self, status: TxStatus) -> Result<Vec<Transaction>>;
    async fn transactions_by_task(&self, task_id: TaskId) -> Result<Vec<Transaction>>;

    async fn put_loan(&self, loan: Loan) -> Result<()>;
    async fn get_loan(&self, id: LoanId) -> Result<Option<Loan>>;
    async fn loans_by_worker(&self, worker_id: WorkerId) -> Result<Vec<Loan>>;
    /// The worker's loan in {Active, Repaying}, if any
    async fn outstanding_loan(&self, worker_id: WorkerId) -> Result<Option<Loan>>;
    /// Loans past their due date that still carry a balance
    async fn overdue_loans(&self, now: i64) -> Result<Vec<Loan>>;

    /// Append-only; there is deliberately no update or delete
    async fn append_reputation_event(&self, event: ReputationEvent) -> Result<()>;
    /// Events for a worker ordered by `created_at`, then insertion id
    async fn reputation_events(&self, worker_id: WorkerId) -> Result<Vec<ReputationEvent>>;

    /// Append-only; there is deliberately no update or delete
    async fn append_audit(&self, record: AuditRecord) -> Result<()>;
    async fn audit_log(&self) -> Result<Vec<AuditRecord>>;

    async fn begin_transaction(&self) -> Result<()>;
    async fn commit_transaction(&self) -> Result<()>;
    async fn rollback_transaction(&self) -> Result<()>;
}

#[derive(Default, Clone)]
struct Tables {
    workers: HashMap<WorkerId, Worker>,
    platforms: HashMap<PlatformId, Platform>,
    tasks: HashMap<TaskId, Task>,
    streams: HashMap<StreamId, Stream>,
    transactions: HashMap<TxId, Transaction>,
    tx_by_key: HashMap<IdempotencyKey, TxId>,
    loans: HashMap<LoanId, Loan>,
    reputation_events: Vec<ReputationEvent>,
    audit_log: Vec<AuditRecord>,
    counters: HashMap<&'static str, u64>,
}

fn counter_key(kind: IdKind) -> &'static str {
    match kind {
        IdKind::Worker => "worker",
        IdKind::Platform => "platform",
        IdKind::Task => "task",
        IdKind::Stream => "stream",
        IdKind::Transaction => "transaction",
        IdKind::Loan => "loan",
        IdKind::ReputationEvent => "reputation_event",
        IdKind::Audit => "audit",
    }
}

/// In-memory backend with snapshot transactions: `begin` clones the
/// tables, `rollback` restores the clone, `commit` discards it.
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    backup: Arc<RwLock<Option<Tables>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            backup: Arc::new(RwLock::new(None)),
        }
    }
}

#[async_trait]
impl LedgerStorage for MemoryStore {
    async fn allocate_id(&self, kind: IdKind) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let counter = tables.counters.entry(counter_key(kind)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn put_worker(&self, worker: Worker) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .workers
            .values()
            .find(|w| w.wallet == worker.wallet && w.id != worker.id)
        {
            return Err(LedgerError::Conflict(format!(
                "Wallet {} already registered to worker {}",
                worker.wallet, existing.id
            )));
        }
        if !(0..=1000).contains(&worker.reputation_score) {
            return Err(LedgerError::Conflict(format!(
                "Worker {} reputation {} outside [0, 1000]",
                worker.id, worker.reputation_score
            )));
        }
        tables.workers.insert(worker.id, worker);
        Ok(())
    }

    async fn get_worker(&self, id: WorkerId) -> Result<Option<Worker>> {
        Ok(self.tables.read().await.workers.get(&id).cloned())
    }

    async fn get_worker_by_wallet(&self, wallet: WalletAddress) -> Result<Option<Worker>> {
        Ok(self
            .tables
            .read()
            .await
            .workers
            .values()
            .find(|w| w.wallet == wallet)
            .cloned())
    }

    async fn put_platform(&self, platform: Platform) -> Result<()> {
        self.tables.write().await.platforms.insert(platform.id, platform);
        Ok(())
    }

    async fn get_platform(&self, id: PlatformId) -> Result<Option<Platform>> {
        Ok(self.tables.read().await.platforms.get(&id).cloned())
    }

    async fn put_task(&self, task: Task) -> Result<()> {
        if task.paid > task.payment {
            return Err(LedgerError::Conflict(format!(
                "Task {} paid {} exceeds payment {}",
                task.id, task.paid, task.payment
            )));
        }
        self.tables.write().await.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn tasks_by_worker(&self, worker_id: WorkerId) -> Result<Vec<Task>> {
        Ok(self
            .tables
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.worker_id == worker_id)
            .cloned()
            .collect())
    }

    async fn completed_tasks_since(&self, worker_id: WorkerId, since: i64) -> Result<Vec<Task>> {
        Ok(self
            .tables
            .read()
            .await
            .tasks
            .values()
            .filter(|t| {
                t.worker_id == worker_id
                    && t.status == TaskStatus::Completed
                    && t.completed_at.is_some_and(|at| at >= since)
            })
            .cloned()
            .collect())
    }

    async fn put_stream(&self, stream: Stream) -> Result<()> {
        let mut tables = self.tables.write().await;
        if stream.claimed > stream.released || stream.released > stream.total {
            return Err(LedgerError::Conflict(format!(
                "Stream {} violates claimed <= released <= total ({} / {} / {})",
                stream.id, stream.claimed, stream.released, stream.total
            )));
        }
        if let Some(existing) = tables.streams.get(&stream.id) {
            if stream.released < existing.released {
                return Err(LedgerError::Conflict(format!(
                    "Stream {} released would regress: {} -> {}",
                    stream.id, existing.released, stream.released
                )));
            }
        }
        tables.streams.insert(stream.id, stream);
        Ok(())
    }

    async fn get_stream(&self, id: StreamId) -> Result<Option<Stream>> {
        Ok(self.tables.read().await.streams.get(&id).cloned())
    }

    async fn stream_for_task(&self, task_id: TaskId) -> Result<Option<Stream>> {
        Ok(self
            .tables
            .read()
            .await
            .streams
            .values()
            .find(|s| s.task_id == task_id)
            .cloned())
    }

    async fn due_streams(&self, now: i64) -> Result<Vec<Stream>> {
        let tables = self.tables.read().await;
        let mut due: Vec<Stream> = tables
            .streams
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_release_at);
        Ok(due)
    }

    async fn put_transaction(&self, tx: Transaction) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.transactions.get(&tx.id) {
            // Confirmed rows are immutable apart from the settlement flag
            if existing.status == TxStatus::Confirmed
                && (tx.status != TxStatus::Confirmed
                    || tx.amount != existing.amount
                    || tx.kind != existing.kind
                    || tx.tx_hash != existing.tx_hash)
            {
                return Err(LedgerError::Conflict(format!(
                    "Transaction {} is confirmed and immutable",
                    tx.id
                )));
            }
        }
        if let Some(&other) = tables.tx_by_key.get(&tx.idempotency_key) {
            if other != tx.id {
                return Err(LedgerError::Conflict(format!(
                    "Idempotency key {} already bound to transaction {}",
                    tx.idempotency_key, other
                )));
            }
        }
        tables.tx_by_key.insert(tx.idempotency_key.clone(), tx.id);
        tables.transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn get_transaction(&self, id: TxId) -> Result<Option<Transaction>> {
        Ok(self.tables.read().await.transactions.get(&id).cloned())
    }

    async fn get_transaction_by_key(&self, key: &IdempotencyKey) -> Result<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tx_by_key
            .get(key)
            .and_then(|id| tables.transactions.get(id))
            .cloned())
    }

    async fn transactions_by_status(&self, status: TxStatus) -> Result<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self
            .tables
            .read()
            .await
            .transactions
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        txs.sort_by_key(|t| t.id);
        Ok(txs)
    }

    async fn transactions_by_task(&self, task_id: TaskId) -> Result<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self
            .tables
            .read()
            .await
            .transactions
            .values()
            .filter(|t| t.task_id == Some(task_id))
            .cloned()
            .collect();
        txs.sort_by_key(|t| t.id);
        Ok(txs)
    }

    async fn put_loan(&self, loan: Loan) -> Result<()> {
        let mut tables = self.tables.write().await;
        if loan.remaining > loan.total_owed {
            return Err(LedgerError::Conflict(format!(
                "Loan {} remaining {} exceeds total owed {}",
                loan.id, loan.remaining, loan.total_owed
            )));
        }
        if loan.status.is_outstanding() {
            if let Some(existing) = tables
                .loans
                .values()
                .find(|l| l.worker_id == loan.worker_id && l.status.is_outstanding() && l.id != loan.id)
            {
                return Err(LedgerError::Conflict(format!(
                    "Worker {} already has outstanding loan {}",
                    loan.worker_id, existing.id
                )));
            }
        }
        tables.loans.insert(loan.id, loan);
        Ok(())
    }

    async fn get_loan(&self, id: LoanId) -> Result<Option<Loan>> {
        Ok(self.tables.read().await.loans.get(&id).cloned())
    }

    async fn loans_by_worker(&self, worker_id: WorkerId) -> Result<Vec<Loan>> {
        let mut loans: Vec<Loan> = self
            .tables
            .read()
            .await
            .loans
            .values()
            .filter(|l| l.worker_id == worker_id)
            .cloned()
            .collect();
        loans.sort_by_key(|l| l.id);
        Ok(loans)
    }

    async fn outstanding_loan(&self, worker_id: WorkerId) -> Result<Option<Loan>> {
        Ok(self
            .tables
            .read()
            .await
            .loans
            .values()
            .find(|l| l.worker_id == worker_id && l.status.is_outstanding())
            .cloned())
    }

    async fn overdue_loans(&self, now: i64) -> Result<Vec<Loan>> {
        Ok(self
            .tables
            .read()
            .await
            .loans
            .values()
            .filter(|l| l.status.is_outstanding() && l.due_date < now && !l.remaining.is_zero())
            .cloned()
            .collect())
    }

    async fn append_reputation_event(&self, event: ReputationEvent) -> Result<()> {
        let mut tables = self.tables.write().await;
        debug!(
            worker_id = %event.worker_id,
            delta = event.points_delta,
            previous = event.previous_score,
            new = event.new_score,
            "📜 Reputation event appended"
        );
        tables.reputation_events.push(event);
        Ok(())
    }

    async fn reputation_events(&self, worker_id: WorkerId) -> Result<Vec<ReputationEvent>> {
        let tables = self.tables.read().await;
        let mut events: Vec<ReputationEvent> = tables
            .reputation_events
            .iter()
            .filter(|e| e.worker_id == worker_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.created_at, e.id));
        Ok(events)
    }

    async fn append_audit(&self, record: AuditRecord) -> Result<()> {
        self.tables.write().await.audit_log.push(record);
        Ok(())
    }

    async fn audit_log(&self) -> Result<Vec<AuditRecord>> {
        Ok(self.tables.read().await.audit_log.clone())
    }

    async fn begin_transaction(&self) -> Result<()> {
        let tables = self.tables.read().await;
        let mut backup = self.backup.write().await;
        *backup = Some(tables.clone());
        debug!(
            workers = tables.workers.len(),
            transactions = tables.transactions.len(),
            "📝 Ledger transaction began (snapshot created)"
        );
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        let mut backup = self.backup.write().await;
        let had_backup = backup.is_some();
        *backup = None;
        if had_backup {
            debug!("✅ Ledger transaction committed (snapshot discarded)");
        }
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        let mut backup = self.backup.write().await;
        if let Some(snapshot) = backup.take() {
            let mut tables = self.tables.write().await;
            *tables = snapshot;
            info!("❌ Ledger transaction rolled back (snapshot restored)");
        }
        Ok(())
    }
}
