use crate::tx::{TransactionManager, TxIntent};
use gigpay_chain::ChainAdapter;
use gigpay_ledger::store::IdKind;
use gigpay_ledger::{LedgerStore, Stream, StreamStatus, Transaction, TxKind, TxStatus};
use gigpay_types::{
    IdempotencyKey, LedgerError, Result, StreamId, TaskId, TxId, UsdcAmount, WalletAddress,
    WorkerId,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for the stream release scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between due-queue scans
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
        }
    }
}

/// What one due-queue pass did
#[derive(Debug, Default)]
pub struct TickReport {
    pub due: usize,
    pub submitted: Vec<TxId>,
    pub skipped: usize,
}

/// Advances active payment streams by submitting elapsed-proportional
/// releases through the transaction state machine. Ledger bookkeeping
/// moves only on confirmation; the on-chain contract stays ground truth
/// and is reconciled after every applied release.
pub struct StreamScheduler {
    config: SchedulerConfig,
    store: Arc<LedgerStore>,
    chain: Arc<dyn ChainAdapter>,
    transactions: Arc<TransactionManager>,
    treasury: WalletAddress,
}

impl StreamScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<LedgerStore>,
        chain: Arc<dyn ChainAdapter>,
        transactions: Arc<TransactionManager>,
        treasury: WalletAddress,
    ) -> Self {
        Self {
            config,
            store,
            chain,
            transactions,
            treasury,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Opens a stream for a streaming-type task.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_stream(
        &self,
        task_id: TaskId,
        worker_id: WorkerId,
        contract_stream_id: u64,
        total: UsdcAmount,
        start_time: i64,
        end_time: i64,
        release_interval_secs: u64,
    ) -> Result<Stream> {
        if end_time <= start_time {
            return Err(LedgerError::Validation(format!(
                "Stream end {} must be after start {}",
                end_time, start_time
            )));
        }
        if total.is_zero() || release_interval_secs == 0 {
            return Err(LedgerError::Validation(
                "Stream requires a positive total and release interval".to_string(),
            ));
        }

        let id = StreamId::new(self.store.storage.allocate_id(IdKind::Stream).await?);
        let stream = Stream {
            id,
            task_id,
            worker_id,
            contract_stream_id,
            total,
            released: UsdcAmount::ZERO,
            claimed: UsdcAmount::ZERO,
            start_time,
            end_time,
            release_interval_secs,
            next_release_at: start_time + release_interval_secs as i64,
            status: StreamStatus::Active,
        };
        self.store.storage.put_stream(stream.clone()).await?;
        self.store
            .audit
            .record(
                "stream_created",
                "stream",
                id,
                gigpay_ledger::AuditRecorder::none(),
                Some(&stream),
            )
            .await?;

        info!(
            stream_id = %id,
            task_id = %task_id,
            total = %total,
            interval_secs = release_interval_secs,
            "🌊 Stream opened"
        );
        Ok(stream)
    }

    /// One due-queue pass: submits a release for every active stream
    /// whose `next_release_at` has come, skipping streams that already
    /// have a release in flight. Re-running without time advancing
    /// creates no new transactions: intents deduplicate on the
    /// (stream, expected-watermark) key.
    pub async fn tick(&self, now: i64) -> Result<TickReport> {
        let mut in_flight: HashSet<StreamId> = HashSet::new();
        for status in [TxStatus::Pending, TxStatus::Submitted] {
            for tx in self.store.storage.transactions_by_status(status).await? {
                if let Some(stream_id) = tx.stream_id {
                    in_flight.insert(stream_id);
                }
            }
        }

        let due = self.store.storage.due_streams(now).await?;
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        for stream in due {
            if in_flight.contains(&stream.id) {
                debug!(stream_id = %stream.id, "Release already in flight, skipping");
                report.skipped += 1;
                continue;
            }

            let expected = stream.expected_released(now);
            let delta = expected.saturating_sub(stream.released);
            if delta.is_zero() {
                report.skipped += 1;
                continue;
            }

            let worker = self
                .store
                .storage
                .get_worker(stream.worker_id)
                .await?
                .ok_or_else(|| {
                    LedgerError::NotFound(format!("Worker {}", stream.worker_id))
                })?;

            let tx = self
                .transactions
                .intent(
                    TxIntent {
                        kind: TxKind::Payout,
                        amount: delta,
                        from_wallet: self.treasury,
                        to_wallet: worker.wallet,
                        idempotency_key: IdempotencyKey::derive_for_stream(
                            stream.id.value(),
                            expected.to_base_units(),
                        ),
                        worker_id: stream.worker_id,
                        task_id: Some(stream.task_id),
                        loan_id: None,
                        stream_id: Some(stream.id),
                    },
                    now,
                )
                .await?;
            // The broadcast holds no ledger or worker lock
            self.transactions.submit(tx.id, now).await?;

            info!(
                stream_id = %stream.id,
                delta = %delta,
                expected = %expected,
                tx_id = %tx.id,
                "🌊 Stream release submitted"
            );
            report.submitted.push(tx.id);
        }

        Ok(report)
    }

    /// Applies a confirmed release: advances `released`, snaps
    /// `next_release_at` past missed ticks, completes the stream when
    /// fully released, then reconciles against the contract. A
    /// cancelled stream keeps its in-flight bookkeeping but is never
    /// rescheduled.
    pub async fn apply_confirmed_release(&self, tx: &Transaction, now: i64) -> Result<Stream> {
        let stream_id = tx.stream_id.ok_or_else(|| {
            LedgerError::Validation(format!("Transaction {} is not a stream release", tx.id))
        })?;
        let mut stream = self.load(stream_id).await?;
        let before = stream.clone();

        let target = stream
            .released
            .checked_add(tx.amount)
            .ok_or_else(|| LedgerError::Conflict(format!("Release overflow on stream {}", stream_id)))?;
        stream.advance_released(target)?;

        if stream.status == StreamStatus::Cancelled {
            // In-flight release settled after cancellation: keep the
            // books straight but never reschedule
            self.store.storage.put_stream(stream.clone()).await?;
            return Ok(stream);
        }

        stream.snap_next_release(now);
        if now >= stream.end_time && stream.released == stream.total {
            stream.status = StreamStatus::Completed;
            info!(stream_id = %stream.id, total = %stream.total, "🏁 Stream fully released");
        }
        self.store.storage.put_stream(stream.clone()).await?;
        self.store
            .audit
            .record("stream_release_applied", "stream", stream.id, Some(&before), Some(&stream))
            .await?;

        // Contract state is ground truth; divergence goes to the
        // operator, never auto-resolved in the worker's favor
        match self.reconcile(&stream).await {
            Ok(()) => {}
            Err(e @ LedgerError::ReconciliationMismatch { .. }) => {
                warn!(stream_id = %stream.id, error = %e, "⚠️ Stream reconciliation mismatch");
                self.store
                    .audit
                    .record(
                        "reconciliation_mismatch",
                        "stream",
                        stream.id,
                        gigpay_ledger::AuditRecorder::none(),
                        Some(&format!("{}", e)),
                    )
                    .await?;
            }
            Err(e) => {
                debug!(stream_id = %stream.id, error = %e, "Contract state unreadable, will reconcile later");
            }
        }

        Ok(stream)
    }

    /// Compares ledger counters with the contract's. Public so an
    /// operator endpoint can force a reconciliation pull.
    pub async fn reconcile_stream(&self, stream_id: StreamId) -> Result<()> {
        let stream = self.load(stream_id).await?;
        self.reconcile(&stream).await
    }

    async fn reconcile(&self, stream: &Stream) -> Result<()> {
        let onchain = self
            .chain
            .get_stream_state(stream.contract_stream_id)
            .await?;
        let mismatch = || LedgerError::ReconciliationMismatch {
            stream_id: stream.id.value(),
            ledger: format!("released {} claimed {}", stream.released, stream.claimed),
            onchain: format!("released {} claimed {}", onchain.released, onchain.claimed),
        };

        // Releases are ledger-driven: the contract must agree exactly.
        if onchain.released != stream.released {
            return Err(mismatch());
        }
        // Claims are worker-initiated on the contract; the ledger
        // mirrors them forward. A claim counter running backwards or
        // past released is contract-side corruption, not a catch-up.
        if onchain.claimed < stream.claimed || onchain.claimed > onchain.released {
            return Err(mismatch());
        }
        if onchain.claimed > stream.claimed {
            let mut updated = stream.clone();
            updated.record_claim(onchain.claimed.saturating_sub(stream.claimed))?;
            self.store.storage.put_stream(updated.clone()).await?;
            self.store
                .audit
                .record("stream_claim_synced", "stream", stream.id, Some(stream), Some(&updated))
                .await?;
            info!(
                stream_id = %stream.id,
                claimed = %updated.claimed,
                "💸 Worker claim mirrored from contract"
            );
        }
        Ok(())
    }

    /// A paused stream leaves the due-queue and resumes from its last
    /// `next_release_at` unchanged.
    pub async fn pause_stream(&self, stream_id: StreamId) -> Result<Stream> {
        self.set_status(stream_id, StreamStatus::Active, StreamStatus::Paused, "⏸️ Stream paused")
            .await
    }

    pub async fn resume_stream(&self, stream_id: StreamId) -> Result<Stream> {
        self.set_status(stream_id, StreamStatus::Paused, StreamStatus::Active, "▶️ Stream resumed")
            .await
    }

    /// Cancellation stops scheduling immediately; in-flight releases
    /// still settle through the state machine.
    pub async fn cancel_stream(&self, stream_id: StreamId) -> Result<Stream> {
        let mut stream = self.load(stream_id).await?;
        if !matches!(stream.status, StreamStatus::Active | StreamStatus::Paused) {
            return Err(LedgerError::InvalidTransition {
                from: format!("{:?}", stream.status),
                to: "Cancelled".to_string(),
            });
        }
        let before = stream.clone();
        stream.status = StreamStatus::Cancelled;
        self.store.storage.put_stream(stream.clone()).await?;
        self.store
            .audit
            .record("stream_cancelled", "stream", stream_id, Some(&before), Some(&stream))
            .await?;
        info!(stream_id = %stream_id, released = %stream.released, "🛑 Stream cancelled");
        Ok(stream)
    }

    async fn set_status(
        &self,
        stream_id: StreamId,
        from: StreamStatus,
        to: StreamStatus,
        message: &str,
    ) -> Result<Stream> {
        let mut stream = self.load(stream_id).await?;
        if stream.status != from {
            return Err(LedgerError::InvalidTransition {
                from: format!("{:?}", stream.status),
                to: format!("{:?}", to),
            });
        }
        stream.status = to;
        self.store.storage.put_stream(stream.clone()).await?;
        info!(stream_id = %stream_id, "{}", message);
        Ok(stream)
    }

    async fn load(&self, stream_id: StreamId) -> Result<Stream> {
        self.store
            .storage
            .get_stream(stream_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Stream {}", stream_id)))
    }
}
