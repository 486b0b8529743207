use gigpay_ledger::{LedgerStore, Platform, Transaction};
use gigpay_types::{LedgerError, Result, TaskId, TxId};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Gigpay-Signature";

/// Configuration for platform webhook delivery
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Delivery attempts before giving up (capped, never indefinite)
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_secs: 1,
            backoff_cap_secs: 30,
            request_timeout_secs: 10,
        }
    }
}

/// Body POSTed to the platform on transaction confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub task_id: Option<TaskId>,
    pub transaction_id: TxId,
    pub amount_usdc: f64,
    pub tx_hash: Option<String>,
    pub status: String,
}

impl WebhookPayload {
    pub fn for_confirmed(tx: &Transaction) -> Self {
        Self {
            task_id: tx.task_id,
            transaction_id: tx.id,
            amount_usdc: tx.amount.to_usdc(),
            tx_hash: tx.tx_hash.clone(),
            status: "confirmed".to_string(),
        }
    }
}

/// Delivers signed confirmation callbacks to platform endpoints.
/// Failures retry with capped exponential backoff and end up in the
/// audit log, never in an infinite loop.
pub struct WebhookNotifier {
    config: WebhookConfig,
    store: Arc<LedgerStore>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig, store: Arc<LedgerStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LedgerError::Storage(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            config,
            store,
            client,
        })
    }

    /// HMAC-SHA256 over the exact request body, hex-encoded. The
    /// platform verifies with its shared webhook secret.
    pub fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Posts the payload to the platform, retrying non-2xx responses
    /// with backoff up to the configured attempt cap.
    pub async fn deliver(&self, platform: &Platform, payload: &WebhookPayload) -> Result<()> {
        if platform.webhook_url.is_empty() {
            debug!(platform_id = %platform.id, "No webhook endpoint configured, skipping");
            return Ok(());
        }

        let body = serde_json::to_vec(payload)
            .map_err(|e| LedgerError::Storage(format!("Webhook payload serialization: {}", e)))?;
        let signature = Self::sign(&platform.webhook_secret, &body);

        let mut last_error = String::new();
        for attempt in 1..=self.config.max_attempts {
            let response = self
                .client
                .post(&platform.webhook_url)
                .header("Content-Type", "application/json")
                .header(SIGNATURE_HEADER, &signature)
                .body(body.clone())
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        platform_id = %platform.id,
                        transaction_id = %payload.transaction_id,
                        attempt = attempt,
                        "📡 Webhook delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    last_error = format!("HTTP {}", resp.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < self.config.max_attempts {
                let backoff = self
                    .config
                    .backoff_base_secs
                    .saturating_mul(1u64 << (attempt - 1).min(16))
                    .min(self.config.backoff_cap_secs);
                warn!(
                    platform_id = %platform.id,
                    attempt = attempt,
                    backoff_secs = backoff,
                    error = %last_error,
                    "🔄 Webhook delivery failed, retrying"
                );
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
        }

        self.store
            .audit
            .record(
                "webhook_delivery_failed",
                "platform",
                platform.id,
                gigpay_ledger::AuditRecorder::none(),
                Some(&format!(
                    "transaction {}: {}",
                    payload.transaction_id, last_error
                )),
            )
            .await?;
        warn!(
            platform_id = %platform.id,
            transaction_id = %payload.transaction_id,
            attempts = self.config.max_attempts,
            error = %last_error,
            "❌ Webhook delivery abandoned after max attempts"
        );
        Err(LedgerError::ExternalUnavailable(format!(
            "Webhook delivery to platform {} failed: {}",
            platform.id, last_error
        )))
    }
}
