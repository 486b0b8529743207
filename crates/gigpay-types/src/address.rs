use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 20-byte wallet address, stored lowercase-normalized. Mixed-case
/// (EIP-55 style) input is accepted and folded to lowercase so that
/// wallet uniqueness holds regardless of how a caller cased the hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletAddress([u8; 20]);

impl WalletAddress {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_string(address: &str) -> Result<Self> {
        let hex_part = address
            .strip_prefix("0x")
            .or_else(|| address.strip_prefix("0X"))
            .unwrap_or(address);

        if hex_part.len() != 40 {
            return Err(LedgerError::Validation(format!(
                "Invalid wallet address length: expected 40 hex chars, got {}",
                hex_part.len()
            )));
        }

        let bytes = hex::decode(hex_part.to_lowercase())
            .map_err(|_| LedgerError::Validation(format!("Invalid wallet address: {}", address)))?;

        let mut addr = [0u8; 20];
        addr.copy_from_slice(&bytes);
        Ok(Self(addr))
    }

    /// Lowercase `0x`-prefixed hex, the canonical stored form.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// The platform treasury wallet: advances are disbursed from here
    /// and repayment deductions are routed back to it.
    pub fn treasury() -> Self {
        Self([0xFF; 20])
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
