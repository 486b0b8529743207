use crate::config::NodeConfig;
use anyhow::Result;
use chrono::Utc;
use gigpay_chain::MockChainAdapter;
use gigpay_engine::PaymentEngine;
use gigpay_ledger::{LedgerStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Wires the ledger store, chain adapter and payment engine together and
/// drives the three background loops: the stream due-queue tick, the
/// transaction confirmation pass, and the loan due-date sweep.
///
/// The adapter boundary is a trait; this binary ships the deterministic
/// in-memory adapter, and a deployment swaps in an RPC-backed one behind
/// the same seam.
pub struct GigpayNode {
    config: NodeConfig,
    pub engine: Arc<PaymentEngine>,
    running: Arc<RwLock<bool>>,
}

impl GigpayNode {
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let store = Arc::new(LedgerStore::new(Arc::new(MemoryStore::new())));
        let chain = Arc::new(MockChainAdapter::new());
        if config.chain.auto_confirm > 0 {
            chain.set_auto_confirm(config.chain.auto_confirm).await;
        }

        let engine = Arc::new(PaymentEngine::new(store, chain, config.engine_config())?);

        Ok(Self {
            config,
            engine,
            running: Arc::new(RwLock::new(false)),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.node.name
    }

    pub async fn run(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let mut scheduler_tick = tokio::time::interval(Duration::from_secs(
            self.config.scheduler.tick_interval_secs,
        ));
        let mut confirmation_poll = tokio::time::interval(Duration::from_secs(
            self.config.transactions.poll_interval_secs,
        ));
        let mut default_sweep = tokio::time::interval(Duration::from_secs(
            self.config.loans.default_sweep_interval_secs,
        ));

        info!(
            tick_secs = self.config.scheduler.tick_interval_secs,
            poll_secs = self.config.transactions.poll_interval_secs,
            sweep_secs = self.config.loans.default_sweep_interval_secs,
            "🚀 Node loops started"
        );

        while *self.running.read().await {
            tokio::select! {
                _ = scheduler_tick.tick() => self.run_scheduler_tick().await,
                _ = confirmation_poll.tick() => self.run_confirmation_pass().await,
                _ = default_sweep.tick() => self.run_default_sweep().await,
            }
        }

        info!("Node stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    async fn run_scheduler_tick(&self) {
        let now = Utc::now().timestamp();
        match self.engine.scheduler.tick(now).await {
            Ok(report) if report.due > 0 => {
                info!(
                    due = report.due,
                    submitted = report.submitted.len(),
                    skipped = report.skipped,
                    "⏱️ Stream tick"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Stream tick failed"),
        }
    }

    async fn run_confirmation_pass(&self) {
        let now = Utc::now().timestamp();
        match self.engine.run_confirmation_pass(now).await {
            Ok(settled) if settled > 0 => {
                info!(settled = settled, "💰 Confirmation pass settled transactions");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Confirmation pass failed"),
        }
    }

    async fn run_default_sweep(&self) {
        let now = Utc::now().timestamp();
        match self.engine.loans.sweep_defaults(now).await {
            Ok(defaulted) if !defaulted.is_empty() => {
                warn!(count = defaulted.len(), "⚠️ Loans defaulted past due date");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Loan default sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gigpay_ledger::TaskKind;
    use gigpay_types::UsdcAmount;

    #[tokio::test]
    async fn test_node_construction_applies_config() {
        let mut config = NodeConfig::default();
        config.transactions.max_retries = 7;
        let node = GigpayNode::new(config).await.unwrap();
        assert_eq!(node.name(), "gigpay-node");
        assert_eq!(node.engine.transactions.config().max_retries, 7);
    }

    #[tokio::test]
    async fn test_loops_settle_a_payout_end_to_end() {
        let mut config = NodeConfig::default();
        config.scheduler.tick_interval_secs = 1;
        config.transactions.poll_interval_secs = 1;
        config.loans.default_sweep_interval_secs = 1;
        let node = Arc::new(GigpayNode::new(config).await.unwrap());

        let platform = node
            .engine
            .register_platform("Acme", "key", "", "whsec", 0)
            .await
            .unwrap();
        let worker = node
            .engine
            .register_worker("0x4444444444444444444444444444444444444444", 0)
            .await
            .unwrap();
        let task = node
            .engine
            .open_task(
                platform.id,
                worker.id,
                TaskKind::Fixed,
                UsdcAmount::from_usdc(15.0),
                0,
            )
            .await
            .unwrap();
        node.engine
            .pipeline
            .on_task_completed(
                gigpay_engine::TaskCompletionEvent {
                    task_id: task.id,
                    worker_id: worker.id,
                    platform_id: platform.id,
                    amount: UsdcAmount::from_usdc(15.0),
                    rating: None,
                },
                Utc::now().timestamp(),
            )
            .await
            .unwrap();

        let runner = node.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        node.stop().await;
        handle.await.unwrap().unwrap();

        let worker = node
            .engine
            .store
            .storage
            .get_worker(worker.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(worker.total_earned, UsdcAmount::from_usdc(15.0));
    }
}
