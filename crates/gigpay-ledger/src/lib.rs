pub mod audit;
pub mod entities;
pub mod store;

pub use audit::AuditRecorder;
pub use entities::{
    AuditRecord, Loan, LoanStatus, Platform, ReputationCause, ReputationEvent, Stream,
    StreamStatus, Task, TaskKind, TaskStatus, Transaction, TxKind, TxStatus, Worker, WorkerStatus,
};
pub use store::{IdKind, LedgerStorage, MemoryStore};

use gigpay_types::Result;
use std::future::Future;
use std::sync::Arc;

/// Façade over the storage backend plus the audit recorder. Multi-entity
/// writes go through `with_transaction` so they commit atomically or not
/// at all.
pub struct LedgerStore {
    pub storage: Arc<dyn LedgerStorage>,
    pub audit: Arc<AuditRecorder>,
}

impl LedgerStore {
    pub fn new(storage: Arc<dyn LedgerStorage>) -> Self {
        let audit = Arc::new(AuditRecorder::new(storage.clone()));
        Self { storage, audit }
    }

    /// Runs `f` between begin/commit; any error rolls the snapshot back
    /// and propagates.
    pub async fn with_transaction<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.storage.begin_transaction().await?;
        match f().await {
            Ok(value) => {
                self.storage.commit_transaction().await?;
                Ok(value)
            }
            Err(e) => {
                self.storage.rollback_transaction().await?;
                Err(e)
            }
        }
    }
}
