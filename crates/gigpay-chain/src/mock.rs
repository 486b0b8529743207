use crate::adapter::{ChainAdapter, OnChainStreamState, TxHash};
use async_trait::async_trait;
use gigpay_types::{LedgerError, Result, UsdcAmount, WalletAddress};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SubmittedTransfer {
    pub from: WalletAddress,
    pub to: WalletAddress,
    pub amount: UsdcAmount,
    pub tx_hash: TxHash,
}

#[derive(Default)]
struct MockState {
    transfers: HashMap<String, SubmittedTransfer>,
    order: Vec<String>,
    confirmations: HashMap<String, u32>,
    reverted: HashSet<String>,
    fail_submissions: u32,
    streams: HashMap<u64, OnChainStreamState>,
    auto_confirm: u32,
    submission_attempts: u64,
}

/// Deterministic in-memory chain for tests and local runs. Transfers
/// are deduplicated by idempotency key the way a well-behaved relayer
/// would; confirmations and reverts are advanced by hand from the test.
pub struct MockChainAdapter {
    state: Arc<RwLock<MockState>>,
}

impl Default for MockChainAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainAdapter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
        }
    }

    /// Every accepted transfer is immediately observed with `n`
    /// confirmations; convenient for pipeline tests.
    pub async fn set_auto_confirm(&self, n: u32) {
        self.state.write().await.auto_confirm = n;
    }

    /// The next `n` submissions fail with `ExternalUnavailable`.
    pub async fn fail_next_submissions(&self, n: u32) {
        self.state.write().await.fail_submissions = n;
    }

    pub async fn confirm(&self, tx_hash: &TxHash, confirmations: u32) {
        self.state
            .write()
            .await
            .confirmations
            .insert(tx_hash.0.clone(), confirmations);
    }

    pub async fn confirm_all(&self, confirmations: u32) {
        let mut state = self.state.write().await;
        let hashes: Vec<String> = state
            .transfers
            .values()
            .map(|t| t.tx_hash.0.clone())
            .collect();
        for hash in hashes {
            state.confirmations.insert(hash, confirmations);
        }
    }

    /// Marks a broadcast transaction as reverted on-chain.
    pub async fn revert(&self, tx_hash: &TxHash) {
        self.state.write().await.reverted.insert(tx_hash.0.clone());
    }

    pub async fn set_stream_state(&self, contract_stream_id: u64, state: OnChainStreamState) {
        self.state
            .write()
            .await
            .streams
            .insert(contract_stream_id, state);
    }

    /// Accepted transfers in submission order.
    pub async fn submitted_transfers(&self) -> Vec<SubmittedTransfer> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|key| state.transfers.get(key))
            .cloned()
            .collect()
    }

    /// Total submit calls including scripted failures.
    pub async fn submission_attempts(&self) -> u64 {
        self.state.read().await.submission_attempts
    }

    fn derive_hash(
        from: &WalletAddress,
        to: &WalletAddress,
        amount: UsdcAmount,
        key: &str,
    ) -> TxHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(from.as_bytes());
        hasher.update(to.as_bytes());
        hasher.update(&amount.to_base_units().to_le_bytes());
        hasher.update(key.as_bytes());
        TxHash(format!("0x{}", hex::encode(hasher.finalize().as_bytes())))
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    async fn submit_transfer(
        &self,
        from: WalletAddress,
        to: WalletAddress,
        amount: UsdcAmount,
        idempotency_key: &str,
    ) -> Result<TxHash> {
        let mut state = self.state.write().await;
        state.submission_attempts += 1;

        if state.fail_submissions > 0 {
            state.fail_submissions -= 1;
            return Err(LedgerError::ExternalUnavailable(
                "RPC error: transfer rejected".to_string(),
            ));
        }

        // At-least-once callers get the same hash back for the same key
        if let Some(existing) = state.transfers.get(idempotency_key) {
            return Ok(existing.tx_hash.clone());
        }

        let tx_hash = Self::derive_hash(&from, &to, amount, idempotency_key);
        debug!(
            from = %from,
            to = %to,
            amount = %amount,
            tx_hash = %tx_hash,
            "📦 Mock transfer accepted for broadcast"
        );

        let auto_confirm = state.auto_confirm;
        if auto_confirm > 0 {
            state.confirmations.insert(tx_hash.0.clone(), auto_confirm);
        }
        state.transfers.insert(
            idempotency_key.to_string(),
            SubmittedTransfer {
                from,
                to,
                amount,
                tx_hash: tx_hash.clone(),
            },
        );
        state.order.push(idempotency_key.to_string());

        Ok(tx_hash)
    }

    async fn get_confirmations(&self, tx_hash: &TxHash) -> Result<u32> {
        let state = self.state.read().await;
        if state.reverted.contains(&tx_hash.0) {
            return Err(LedgerError::ExternalUnavailable(format!(
                "Transaction {} reverted on-chain",
                tx_hash
            )));
        }
        Ok(state.confirmations.get(&tx_hash.0).copied().unwrap_or(0))
    }

    async fn get_stream_state(&self, contract_stream_id: u64) -> Result<OnChainStreamState> {
        self.state
            .read()
            .await
            .streams
            .get(&contract_stream_id)
            .copied()
            .ok_or_else(|| {
                LedgerError::ExternalUnavailable(format!(
                    "Stream {} not readable from contract",
                    contract_stream_id
                ))
            })
    }
}
