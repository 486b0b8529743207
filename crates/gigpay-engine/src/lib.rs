pub mod loan;
pub mod pipeline;
pub mod reputation;
pub mod scheduler;
pub mod tx;
pub mod webhook;

pub use loan::{fee_percent_for_score, EligibilityReport, LoanConfig, LoanEngine};
pub use pipeline::{CompletionOutcome, PayoutPipeline, TaskCompletionEvent, WorkerLocks};
pub use reputation::{grade, Grade, ReputationConfig, ReputationEngine};
pub use scheduler::{SchedulerConfig, StreamScheduler, TickReport};
pub use tx::{TransactionManager, TxConfig, TxIntent};
pub use webhook::{WebhookConfig, WebhookNotifier, WebhookPayload, SIGNATURE_HEADER};

use gigpay_chain::ChainAdapter;
use gigpay_ledger::store::IdKind;
use gigpay_ledger::{LedgerStore, Platform, Task, TaskKind, TaskStatus, Worker, WorkerStatus};
use gigpay_types::{
    LedgerError, PlatformId, Result, TaskId, UsdcAmount, WalletAddress, WorkerId,
};
use std::sync::Arc;
use tracing::info;

/// Engine-wide configuration, one section per component
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub transactions: TxConfig,
    pub scheduler: SchedulerConfig,
    pub loans: LoanConfig,
    pub reputation: ReputationConfig,
    pub webhooks: WebhookConfig,
}

/// The assembled reconciliation core: one shared ledger, one chain
/// adapter, and the managers that drive money, reputation and loans
/// through it.
pub struct PaymentEngine {
    pub store: Arc<LedgerStore>,
    pub chain: Arc<dyn ChainAdapter>,
    pub transactions: Arc<TransactionManager>,
    pub scheduler: Arc<StreamScheduler>,
    pub reputation: Arc<ReputationEngine>,
    pub loans: Arc<LoanEngine>,
    pub webhooks: Arc<WebhookNotifier>,
    pub pipeline: Arc<PayoutPipeline>,
}

impl PaymentEngine {
    pub fn new(
        store: Arc<LedgerStore>,
        chain: Arc<dyn ChainAdapter>,
        config: EngineConfig,
    ) -> Result<Self> {
        let treasury = WalletAddress::treasury();
        let transactions = Arc::new(TransactionManager::new(
            config.transactions,
            store.clone(),
            chain.clone(),
        ));
        let scheduler = Arc::new(StreamScheduler::new(
            config.scheduler,
            store.clone(),
            chain.clone(),
            transactions.clone(),
            treasury,
        ));
        let reputation = Arc::new(ReputationEngine::new(config.reputation, store.clone()));
        let loans = Arc::new(LoanEngine::new(
            config.loans,
            store.clone(),
            transactions.clone(),
            reputation.clone(),
            treasury,
        ));
        let webhooks = Arc::new(WebhookNotifier::new(config.webhooks, store.clone())?);
        let pipeline = Arc::new(PayoutPipeline::new(
            store.clone(),
            transactions.clone(),
            scheduler.clone(),
            reputation.clone(),
            loans.clone(),
            webhooks.clone(),
            treasury,
        ));

        Ok(Self {
            store,
            chain,
            transactions,
            scheduler,
            reputation,
            loans,
            webhooks,
            pipeline,
        })
    }

    /// Registers a worker for a wallet. Addresses are normalized on
    /// parse, so the uniqueness check is case-insensitive.
    pub async fn register_worker(&self, wallet: &str, now: i64) -> Result<Worker> {
        let wallet = WalletAddress::from_string(wallet)?;
        if let Some(existing) = self.store.storage.get_worker_by_wallet(wallet).await? {
            return Err(LedgerError::Conflict(format!(
                "Wallet {} already registered to worker {}",
                wallet, existing.id
            )));
        }

        let id = WorkerId::new(self.store.storage.allocate_id(IdKind::Worker).await?);
        let worker = Worker::new(id, wallet, now);
        self.store.storage.put_worker(worker.clone()).await?;
        self.store
            .audit
            .record(
                "worker_registered",
                "worker",
                id,
                gigpay_ledger::AuditRecorder::none(),
                Some(&worker),
            )
            .await?;
        info!(worker_id = %id, wallet = %wallet, "👷 Worker registered");
        Ok(worker)
    }

    /// Registers a platform; only the blake3 hash of the API credential
    /// is stored.
    pub async fn register_platform(
        &self,
        name: &str,
        api_key: &str,
        webhook_url: &str,
        webhook_secret: &str,
        now: i64,
    ) -> Result<Platform> {
        if name.is_empty() {
            return Err(LedgerError::Validation("Platform name required".to_string()));
        }

        let id = PlatformId::new(self.store.storage.allocate_id(IdKind::Platform).await?);
        let platform = Platform {
            id,
            name: name.to_string(),
            api_key_hash: hex::encode(blake3::hash(api_key.as_bytes()).as_bytes()),
            webhook_url: webhook_url.to_string(),
            webhook_secret: webhook_secret.to_string(),
            total_paid_out: UsdcAmount::ZERO,
            worker_count: 0,
            created_at: now,
        };
        self.store.storage.put_platform(platform.clone()).await?;
        self.store
            .audit
            .record(
                "platform_registered",
                "platform",
                id,
                gigpay_ledger::AuditRecorder::none(),
                Some(&platform),
            )
            .await?;
        info!(platform_id = %id, name = name, "🏢 Platform registered");
        Ok(platform)
    }

    /// Opens a task assigned to a worker. The external task API owns
    /// richer task lifecycle; the core only needs the row that payout
    /// and reputation hang off.
    pub async fn open_task(
        &self,
        platform_id: PlatformId,
        worker_id: WorkerId,
        kind: TaskKind,
        payment: UsdcAmount,
        now: i64,
    ) -> Result<Task> {
        if payment.is_zero() {
            return Err(LedgerError::Validation(
                "Task payment must be positive".to_string(),
            ));
        }
        self.store
            .storage
            .get_platform(platform_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Platform {}", platform_id)))?;
        self.store
            .storage
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Worker {}", worker_id)))?;

        let id = TaskId::new(self.store.storage.allocate_id(IdKind::Task).await?);
        let task = Task {
            id,
            platform_id,
            worker_id,
            kind,
            payment,
            paid: UsdcAmount::ZERO,
            status: TaskStatus::InProgress,
            created_at: now,
            completed_at: None,
        };
        self.store.storage.put_task(task.clone()).await?;
        info!(task_id = %id, worker_id = %worker_id, payment = %payment, "🗒️ Task opened");
        Ok(task)
    }

    /// Soft-disables or re-enables a worker. Rows are never deleted; a
    /// disabled worker stops receiving payouts and advances while its
    /// financial history stays intact.
    pub async fn set_worker_status(
        &self,
        worker_id: WorkerId,
        status: WorkerStatus,
        actor: &str,
    ) -> Result<Worker> {
        let mut worker = self
            .store
            .storage
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Worker {}", worker_id)))?;
        if worker.status == status {
            return Ok(worker);
        }
        let before = worker.clone();
        worker.status = status;
        self.store.storage.put_worker(worker.clone()).await?;
        self.store
            .audit
            .record(
                "worker_status_changed",
                "worker",
                worker_id,
                Some(&before),
                Some(&worker),
            )
            .await?;
        info!(worker_id = %worker_id, status = ?status, actor = actor, "🚷 Worker status changed");
        Ok(worker)
    }

    /// One maintenance pass: drives the transaction state machine and
    /// settles whatever confirmed. The node runs this on its poll
    /// interval; the loan due-date sweep runs on its own, slower one.
    pub async fn run_confirmation_pass(&self, now: i64) -> Result<usize> {
        let confirmed = self.transactions.run_once(now).await?;
        let count = confirmed.len();
        for tx in confirmed {
            self.pipeline.settle(&tx, now).await?;
        }
        Ok(count)
    }
}
