//! Runtime configuration.
//!
//! The constants are fixed when the state file is created (`init`) and read
//! back from it afterwards, so every later call prices bytes the same way.
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `STORAGE_RENT_STATE` | Path of the JSON state file | `storage-rent.json` |
//! | `STORAGE_RENT_COST_PER_BYTE` | Price of one byte in minimal units (`init` only) | `10^19` |
//! | `STORAGE_RENT_MIN_BALANCE` | Minimum first deposit (`init` only) | `0` |
//! | `RUST_LOG` | Log filter | `info` |

use serde::{Deserialize, Serialize};

use crate::cost::{ByteCost, DEFAULT_COST_PER_BYTE};
use crate::types::{Balance, U128};

pub const STATE_PATH_ENV: &str = "STORAGE_RENT_STATE";
pub const COST_PER_BYTE_ENV: &str = "STORAGE_RENT_COST_PER_BYTE";
pub const MIN_BALANCE_ENV: &str = "STORAGE_RENT_MIN_BALANCE";

pub const DEFAULT_STATE_PATH: &str = "storage-rent.json";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub cost_per_byte: U128,
    /// Smallest deposit accepted for an account without a record.
    #[serde(default)]
    pub min_storage_balance: U128,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cost_per_byte: U128(DEFAULT_COST_PER_BYTE),
            min_storage_balance: U128(0),
        }
    }
}

impl Config {
    pub fn new(cost_per_byte: Balance, min_storage_balance: Balance) -> Self {
        Self {
            cost_per_byte: U128(cost_per_byte),
            min_storage_balance: U128(min_storage_balance),
        }
    }

    pub fn byte_cost(&self) -> ByteCost {
        ByteCost::new(self.cost_per_byte.0)
    }
}
