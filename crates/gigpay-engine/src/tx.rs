use gigpay_chain::{ChainAdapter, TxHash};
use gigpay_ledger::{LedgerStore, Transaction, TxKind, TxStatus};
use gigpay_ledger::store::IdKind;
use gigpay_types::{
    IdempotencyKey, LedgerError, LoanId, Result, StreamId, TaskId, TxId, UsdcAmount, WalletAddress,
    WorkerId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Configuration for the transaction state machine
#[derive(Debug, Clone)]
pub struct TxConfig {
    /// Confirmations required before a submitted transaction is final
    pub confirmation_threshold: u32,
    /// Broadcast attempts before a transaction is terminally failed
    pub max_retries: u32,
    /// Exponential backoff base between retry attempts (seconds)
    pub backoff_base_secs: u64,
    /// Backoff ceiling (seconds)
    pub backoff_cap_secs: u64,
    /// A transaction stuck in `Submitted` longer than this is treated
    /// as a failed broadcast attempt (seconds)
    pub submitted_timeout_secs: i64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: 1,
            max_retries: 3,
            backoff_base_secs: 2,  // 2s, 4s, 8s...
            backoff_cap_secs: 60,
            submitted_timeout_secs: 300, // 5 minutes
        }
    }
}

/// Fields needed to open a transaction intent
#[derive(Debug, Clone)]
pub struct TxIntent {
    pub kind: TxKind,
    pub amount: UsdcAmount,
    pub from_wallet: WalletAddress,
    pub to_wallet: WalletAddress,
    pub idempotency_key: IdempotencyKey,
    pub worker_id: WorkerId,
    pub task_id: Option<TaskId>,
    pub loan_id: Option<LoanId>,
    pub stream_id: Option<StreamId>,
}

/// Drives every USDC movement through
/// `Pending -> Submitted -> Confirmed | Failed`, with cancellation only
/// before broadcast. Intents are deduplicated by idempotency key; the
/// chain adapter is treated as at-least-once and never trusted to
/// deduplicate for us.
pub struct TransactionManager {
    config: TxConfig,
    store: Arc<LedgerStore>,
    chain: Arc<dyn ChainAdapter>,
    /// Retry gate per transaction: no resubmission before `not_before`
    backoff: Arc<RwLock<HashMap<TxId, i64>>>,
}

impl TransactionManager {
    pub fn new(config: TxConfig, store: Arc<LedgerStore>, chain: Arc<dyn ChainAdapter>) -> Self {
        Self {
            config,
            store,
            chain,
            backoff: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    /// Opens (or returns the existing) transaction for an intent.
    /// Re-submission with the same idempotency key never creates a
    /// duplicate.
    pub async fn intent(&self, intent: TxIntent, now: i64) -> Result<Transaction> {
        if intent.amount.is_zero() {
            return Err(LedgerError::Validation(
                "Transaction amount must be positive".to_string(),
            ));
        }

        if let Some(existing) = self
            .store
            .storage
            .get_transaction_by_key(&intent.idempotency_key)
            .await?
        {
            info!(
                tx_id = %existing.id,
                key = %intent.idempotency_key,
                status = ?existing.status,
                "📦 Intent deduplicated to existing transaction"
            );
            return Ok(existing);
        }

        let id = TxId::new(self.store.storage.allocate_id(IdKind::Transaction).await?);
        let tx = Transaction {
            id,
            idempotency_key: intent.idempotency_key,
            kind: intent.kind,
            status: TxStatus::Pending,
            amount: intent.amount,
            from_wallet: intent.from_wallet,
            to_wallet: intent.to_wallet,
            worker_id: intent.worker_id,
            task_id: intent.task_id,
            loan_id: intent.loan_id,
            stream_id: intent.stream_id,
            tx_hash: None,
            confirmations: 0,
            retry_count: 0,
            created_at: now,
            submitted_at: None,
            confirmed_at: None,
            settled: false,
        };
        self.store.storage.put_transaction(tx.clone()).await?;
        self.store
            .audit
            .record("tx_intent", "transaction", id, gigpay_ledger::AuditRecorder::none(), Some(&tx))
            .await?;

        info!(
            tx_id = %id,
            kind = tx.kind.as_str(),
            amount = %tx.amount,
            worker_id = %intent.worker_id,
            "📝 Transaction intent created"
        );
        Ok(tx)
    }

    /// Hands a pending transaction to the chain adapter for broadcast.
    /// Returns the (possibly unchanged) transaction: a call inside the
    /// backoff window is a no-op, a retriable adapter failure re-arms
    /// the backoff or terminally fails the transaction.
    pub async fn submit(&self, tx_id: TxId, now: i64) -> Result<Transaction> {
        let tx = self.load(tx_id).await?;
        if tx.status != TxStatus::Pending {
            return Ok(tx);
        }

        if let Some(&not_before) = self.backoff.read().await.get(&tx_id) {
            if now < not_before {
                return Ok(tx);
            }
        }

        // The chain call holds no ledger or worker lock
        match self
            .chain
            .submit_transfer(
                tx.from_wallet,
                tx.to_wallet,
                tx.amount,
                tx.idempotency_key.as_str(),
            )
            .await
        {
            Ok(tx_hash) => self.mark_submitted(tx, tx_hash, now).await,
            Err(e) if e.is_retriable() => self.record_broadcast_failure(tx, &e, now).await,
            Err(e) => Err(e),
        }
    }

    async fn mark_submitted(
        &self,
        mut tx: Transaction,
        tx_hash: TxHash,
        now: i64,
    ) -> Result<Transaction> {
        tx.transition(TxStatus::Submitted)?;
        tx.tx_hash = Some(tx_hash.0.clone());
        tx.submitted_at = Some(now);
        self.store.storage.put_transaction(tx.clone()).await?;
        self.backoff.write().await.remove(&tx.id);

        info!(
            tx_id = %tx.id,
            tx_hash = %tx_hash,
            kind = tx.kind.as_str(),
            amount = %tx.amount,
            "🔗 Transaction submitted for broadcast"
        );
        Ok(tx)
    }

    async fn record_broadcast_failure(
        &self,
        mut tx: Transaction,
        cause: &LedgerError,
        now: i64,
    ) -> Result<Transaction> {
        let before = tx.clone();
        tx.retry_count += 1;

        if tx.retry_count >= self.config.max_retries {
            tx.transition(TxStatus::Failed)?;
            self.store.storage.put_transaction(tx.clone()).await?;
            self.backoff.write().await.remove(&tx.id);
            self.store
                .audit
                .record(
                    "tx_terminal_failure",
                    "transaction",
                    tx.id,
                    Some(&before),
                    Some(&tx),
                )
                .await?;
            warn!(
                tx_id = %tx.id,
                retries = tx.retry_count,
                error = %cause,
                "❌ Transaction terminally failed, raised for reconciliation"
            );
            return Ok(tx);
        }

        // Exponential backoff: base * 2^(attempt-1), capped
        let exp = self
            .config
            .backoff_base_secs
            .saturating_mul(1u64 << (tx.retry_count.min(16) - 1).min(16))
            .min(self.config.backoff_cap_secs);
        self.store.storage.put_transaction(tx.clone()).await?;
        self.backoff.write().await.insert(tx.id, now + exp as i64);

        warn!(
            tx_id = %tx.id,
            retry_count = tx.retry_count,
            backoff_secs = exp,
            error = %cause,
            "🔄 Broadcast failed, retrying with backoff"
        );
        Ok(tx)
    }

    /// Observes confirmations for a submitted transaction. Confirmed
    /// transactions become immutable; a transaction stuck past the
    /// submitted timeout is treated as a failed broadcast attempt and
    /// re-enters the retry path.
    pub async fn poll(&self, tx_id: TxId, now: i64) -> Result<Transaction> {
        let mut tx = self.load(tx_id).await?;
        if tx.status != TxStatus::Submitted {
            return Ok(tx);
        }
        let tx_hash = TxHash(tx.tx_hash.clone().ok_or_else(|| {
            LedgerError::Storage(format!("Submitted transaction {} missing tx hash", tx.id))
        })?);

        match self.chain.get_confirmations(&tx_hash).await {
            Ok(count) => {
                tx.confirmations = count;
                if count >= self.config.confirmation_threshold {
                    tx.transition(TxStatus::Confirmed)?;
                    tx.confirmed_at = Some(now);
                    self.store.storage.put_transaction(tx.clone()).await?;
                    info!(
                        tx_id = %tx.id,
                        tx_hash = %tx_hash,
                        confirmations = count,
                        "✅ Transaction confirmed"
                    );
                } else {
                    self.store.storage.put_transaction(tx.clone()).await?;
                }
                Ok(tx)
            }
            Err(e) if e.is_retriable() => {
                let deadline = tx.submitted_at.unwrap_or(tx.created_at)
                    + self.config.submitted_timeout_secs;
                if now >= deadline {
                    warn!(
                        tx_id = %tx.id,
                        tx_hash = %tx_hash,
                        error = %e,
                        "⏳ Submitted transaction timed out, re-entering retry path"
                    );
                    // Walk back to Pending so the broadcast is re-attempted
                    // with a fresh submission (same idempotency key).
                    let rolled = {
                        let mut rolled = tx.clone();
                        rolled.transition(TxStatus::Pending)?;
                        rolled.tx_hash = None;
                        rolled.submitted_at = None;
                        rolled
                    };
                    return self.record_broadcast_failure(rolled, &e, now).await;
                }
                Ok(tx)
            }
            Err(e) => Err(e),
        }
    }

    /// Cancels a transaction that has not been broadcast.
    pub async fn cancel(&self, tx_id: TxId) -> Result<Transaction> {
        let mut tx = self.load(tx_id).await?;
        if tx.tx_hash.is_some() {
            return Err(LedgerError::Conflict(format!(
                "Transaction {} already broadcast, cannot cancel",
                tx.id
            )));
        }
        tx.transition(TxStatus::Cancelled)?;
        self.store.storage.put_transaction(tx.clone()).await?;
        self.backoff.write().await.remove(&tx.id);
        info!(tx_id = %tx.id, "🛑 Transaction cancelled before broadcast");
        Ok(tx)
    }

    /// One pass of the state machine: resubmits pending transactions
    /// whose backoff has elapsed and polls every submitted one. Returns
    /// transactions that confirmed during this pass.
    pub async fn run_once(&self, now: i64) -> Result<Vec<Transaction>> {
        for tx in self
            .store
            .storage
            .transactions_by_status(TxStatus::Pending)
            .await?
        {
            self.submit(tx.id, now).await?;
        }

        let mut confirmed = Vec::new();
        for tx in self
            .store
            .storage
            .transactions_by_status(TxStatus::Submitted)
            .await?
        {
            let polled = self.poll(tx.id, now).await?;
            if polled.status == TxStatus::Confirmed {
                confirmed.push(polled);
            }
        }
        Ok(confirmed)
    }

    async fn load(&self, tx_id: TxId) -> Result<Transaction> {
        self.store
            .storage
            .get_transaction(tx_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Transaction {}", tx_id)))
    }
}
