use async_trait::async_trait;
use gigpay_types::{Result, UsdcAmount, WalletAddress};
use serde::{Deserialize, Serialize};

/// On-chain transaction hash, `0x`-prefixed hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The payment-streaming contract's view of a stream. The contract is
/// ground truth; the ledger reconciles against this, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainStreamState {
    pub released: UsdcAmount,
    pub claimed: UsdcAmount,
}

/// Boundary to the chain. Treated as an unreliable, at-least-once
/// external system: every write derived from it must be idempotent, and
/// transient failures surface as `ExternalUnavailable` for the caller's
/// retry policy.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Hands a transfer to the chain for broadcast. The idempotency key
    /// lets the adapter de-duplicate re-submissions of the same intent.
    async fn submit_transfer(
        &self,
        from: WalletAddress,
        to: WalletAddress,
        amount: UsdcAmount,
        idempotency_key: &str,
    ) -> Result<TxHash>;

    /// Observed confirmation count for a broadcast transaction.
    async fn get_confirmations(&self, tx_hash: &TxHash) -> Result<u32>;

    /// Reads the streaming contract's released/claimed counters.
    async fn get_stream_state(
        &self,
        contract_stream_id: u64,
    ) -> Result<OnChainStreamState>;
}
