pub mod address;
pub mod amount;
pub mod error;
pub mod ids;

pub use address::WalletAddress;
pub use amount::{UsdcAmount, USDC_BASE_UNIT, USDC_DECIMALS};
pub use error::{LedgerError, Result};
pub use ids::{IdempotencyKey, LoanId, PlatformId, StreamId, TaskId, TxId, WorkerId};
