use crate::entities::AuditRecord;
use crate::store::{IdKind, LedgerStorage};
use gigpay_types::{LedgerError, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Records every state-changing action with before/after snapshots.
/// Rows are insert-only; dispute replay reads them back in id order.
pub struct AuditRecorder {
    storage: Arc<dyn LedgerStorage>,
}

impl AuditRecorder {
    pub fn new(storage: Arc<dyn LedgerStorage>) -> Self {
        Self { storage }
    }

    pub async fn record<B, A>(
        &self,
        action: &str,
        entity: &str,
        entity_id: impl ToString,
        before: Option<&B>,
        after: Option<&A>,
    ) -> Result<()>
    where
        B: Serialize,
        A: Serialize,
    {
        let before = before
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| LedgerError::Storage(format!("Audit snapshot serialization: {}", e)))?;
        let after = after
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| LedgerError::Storage(format!("Audit snapshot serialization: {}", e)))?;

        let id = self.storage.allocate_id(IdKind::Audit).await?;
        let record = AuditRecord {
            id,
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            before,
            after,
            created_at: chrono::Utc::now().timestamp(),
        };

        debug!(
            audit_id = id,
            action = action,
            entity = entity,
            "🗄️ Audit record appended"
        );
        self.storage.append_audit(record).await
    }

    /// Marker used when there is no before or after snapshot to attach.
    pub fn none() -> Option<&'static ()> {
        None
    }
}
