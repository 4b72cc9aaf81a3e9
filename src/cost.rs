use serde::{Deserialize, Serialize};

use crate::ledger::LedgerError;
use crate::types::{Balance, StorageUsage, U128};

/// 1 NEAR buys 100 kB.
pub const DEFAULT_COST_PER_BYTE: Balance = 10_000_000_000_000_000_000;

/// Linear price of persisted bytes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ByteCost {
    cost_per_byte: U128,
}

impl Default for ByteCost {
    fn default() -> Self {
        Self::new(DEFAULT_COST_PER_BYTE)
    }
}

impl ByteCost {
    pub const fn new(cost_per_byte: Balance) -> Self {
        Self {
            cost_per_byte: U128(cost_per_byte),
        }
    }

    pub fn cost_per_byte(&self) -> Balance {
        self.cost_per_byte.0
    }

    /// `bytes * cost_per_byte`, or `Overflow` instead of wrapping.
    pub fn cost(&self, bytes: StorageUsage) -> Result<Balance, LedgerError> {
        Balance::from(bytes)
            .checked_mul(self.cost_per_byte.0)
            .ok_or(LedgerError::Overflow {
                context: "byte cost",
            })
    }

    /// Number of bytes `amount` pays for, rounded down.
    pub fn bytes_covered(&self, amount: Balance) -> StorageUsage {
        if self.cost_per_byte.0 == 0 {
            return StorageUsage::MAX;
        }
        StorageUsage::try_from(amount / self.cost_per_byte.0).unwrap_or(StorageUsage::MAX)
    }
}
