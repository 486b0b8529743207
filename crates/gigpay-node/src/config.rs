use anyhow::Result;
use gigpay_engine::{
    EngineConfig, LoanConfig, ReputationConfig, SchedulerConfig, TxConfig, WebhookConfig,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub api: ApiConfig,
    pub chain: ChainConfig,
    pub transactions: TransactionsConfig,
    pub scheduler: StreamConfig,
    pub loans: LoansConfig,
    pub reputation: ScoringConfig,
    pub webhooks: WebhooksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Confirmations the dev adapter grants as soon as a transfer is
    /// broadcast. 0 leaves every transfer unconfirmed until an operator
    /// (or test) advances it.
    pub auto_confirm: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsConfig {
    pub confirmation_threshold: u32,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub submitted_timeout_secs: i64,
    /// Seconds between confirmation-poll passes
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub tick_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoansConfig {
    pub min_risk_score: i64,
    pub earnings_multiple: f64,
    pub min_account_age_days: i64,
    pub min_completion_rate: f64,
    pub repayment_deduction_percent: u64,
    pub term_days: i64,
    pub weight_7d_percent: u64,
    pub weight_30d_percent: u64,
    /// Seconds between due-date sweeps
    pub default_sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub task_completed_delta: i64,
    pub task_completed_bonus_delta: i64,
    pub quality_rating_threshold: f64,
    pub task_late_delta: i64,
    pub dispute_filed_delta: i64,
    pub dispute_resolved_delta: i64,
    pub loan_defaulted_delta: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhooksConfig {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let tx = TxConfig::default();
        let scheduler = SchedulerConfig::default();
        let loans = LoanConfig::default();
        let reputation = ReputationConfig::default();
        let webhooks = WebhookConfig::default();

        Self {
            node: NodeSettings {
                name: "gigpay-node".to_string(),
            },
            api: ApiConfig {
                enabled: true,
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            chain: ChainConfig { auto_confirm: 1 },
            transactions: TransactionsConfig {
                confirmation_threshold: tx.confirmation_threshold,
                max_retries: tx.max_retries,
                backoff_base_secs: tx.backoff_base_secs,
                backoff_cap_secs: tx.backoff_cap_secs,
                submitted_timeout_secs: tx.submitted_timeout_secs,
                poll_interval_secs: 10,
            },
            scheduler: StreamConfig {
                tick_interval_secs: scheduler.tick_interval_secs,
            },
            loans: LoansConfig {
                min_risk_score: loans.min_risk_score,
                earnings_multiple: loans.earnings_multiple,
                min_account_age_days: loans.min_account_age_days,
                min_completion_rate: loans.min_completion_rate,
                repayment_deduction_percent: loans.repayment_deduction_percent,
                term_days: loans.term_days,
                weight_7d_percent: loans.weight_7d_percent,
                weight_30d_percent: loans.weight_30d_percent,
                default_sweep_interval_secs: 3600,
            },
            reputation: ScoringConfig {
                task_completed_delta: reputation.task_completed_delta,
                task_completed_bonus_delta: reputation.task_completed_bonus_delta,
                quality_rating_threshold: reputation.quality_rating_threshold,
                task_late_delta: reputation.task_late_delta,
                dispute_filed_delta: reputation.dispute_filed_delta,
                dispute_resolved_delta: reputation.dispute_resolved_delta,
                loan_defaulted_delta: reputation.loan_defaulted_delta,
            },
            webhooks: WebhooksConfig {
                max_attempts: webhooks.max_attempts,
                backoff_base_secs: webhooks.backoff_base_secs,
                backoff_cap_secs: webhooks.backoff_cap_secs,
                request_timeout_secs: webhooks.request_timeout_secs,
            },
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Environment overrides sit between the config file and CLI flags
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("GIGPAY_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("GIGPAY_API_PORT") {
            if let Ok(port) = port.parse() {
                self.api.port = port;
            }
        }
        if let Ok(name) = std::env::var("GIGPAY_NODE_NAME") {
            if !name.is_empty() {
                self.node.name = name;
            }
        }
    }

    /// Flattens the TOML sections into the engine's component configs
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            transactions: TxConfig {
                confirmation_threshold: self.transactions.confirmation_threshold,
                max_retries: self.transactions.max_retries,
                backoff_base_secs: self.transactions.backoff_base_secs,
                backoff_cap_secs: self.transactions.backoff_cap_secs,
                submitted_timeout_secs: self.transactions.submitted_timeout_secs,
            },
            scheduler: SchedulerConfig {
                tick_interval_secs: self.scheduler.tick_interval_secs,
            },
            loans: LoanConfig {
                min_risk_score: self.loans.min_risk_score,
                earnings_multiple: self.loans.earnings_multiple,
                min_account_age_days: self.loans.min_account_age_days,
                min_completion_rate: self.loans.min_completion_rate,
                repayment_deduction_percent: self.loans.repayment_deduction_percent,
                term_days: self.loans.term_days,
                weight_7d_percent: self.loans.weight_7d_percent,
                weight_30d_percent: self.loans.weight_30d_percent,
            },
            reputation: ReputationConfig {
                task_completed_delta: self.reputation.task_completed_delta,
                task_completed_bonus_delta: self.reputation.task_completed_bonus_delta,
                quality_rating_threshold: self.reputation.quality_rating_threshold,
                task_late_delta: self.reputation.task_late_delta,
                dispute_filed_delta: self.reputation.dispute_filed_delta,
                dispute_resolved_delta: self.reputation.dispute_resolved_delta,
                loan_defaulted_delta: self.reputation.loan_defaulted_delta,
            },
            webhooks: WebhookConfig {
                max_attempts: self.webhooks.max_attempts,
                backoff_base_secs: self.webhooks.backoff_base_secs,
                backoff_cap_secs: self.webhooks.backoff_cap_secs,
                request_timeout_secs: self.webhooks.request_timeout_secs,
            },
        }
    }
}
