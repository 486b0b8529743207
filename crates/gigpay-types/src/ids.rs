use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
            Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(WorkerId);
entity_id!(PlatformId);
entity_id!(TaskId);
entity_id!(StreamId);
entity_id!(TxId);
entity_id!(LoanId);

/// Caller-supplied deduplication key for transaction intents. Derived
/// from the originating task id and the transaction kind, so a
/// re-delivered completion event maps to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(task_id: TaskId, kind: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&task_id.value().to_le_bytes());
        hasher.update(kind.as_bytes());
        Self(hex::encode(hasher.finalize().as_bytes()))
    }

    /// Key for an intent not tied to a task (loan disbursements,
    /// scheduler-independent refunds).
    pub fn derive_for_loan(loan_id: u64, kind: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"loan");
        hasher.update(&loan_id.to_le_bytes());
        hasher.update(kind.as_bytes());
        Self(hex::encode(hasher.finalize().as_bytes()))
    }

    /// Key for a single stream release tick, unique per stream and
    /// per expected-released watermark.
    pub fn derive_for_stream(stream_id: u64, expected_released_units: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"stream");
        hasher.update(&stream_id.to_le_bytes());
        hasher.update(&expected_released_units.to_le_bytes());
        Self(hex::encode(hasher.finalize().as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
