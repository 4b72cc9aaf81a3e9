use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cost::ByteCost;
use crate::merkle::{self, Root};
use crate::types::{AccountId, Balance, StorageUsage, U128};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid amount {amount}: must be greater than zero")]
    InvalidAmount { amount: Balance },
    #[error("insufficient storage balance for {account}: {required} required, {escrowed} escrowed")]
    InsufficientStorageBalance {
        account: AccountId,
        required: Balance,
        escrowed: Balance,
    },
    #[error("arithmetic overflow in {context}")]
    Overflow { context: &'static str },
}

/// Bytes an account is responsible for and the escrow locked against them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountStorage {
    pub bytes_used: StorageUsage,
    pub escrowed: U128,
}

impl AccountStorage {
    pub fn required(&self, cost: &ByteCost) -> Result<Balance, LedgerError> {
        cost.cost(self.bytes_used)
    }

    /// Escrow left over once the footprint is paid for. Fails when the
    /// record does not cover its own footprint.
    pub fn available(&self, account: &AccountId, cost: &ByteCost) -> Result<Balance, LedgerError> {
        let required = self.required(cost)?;
        self.escrowed
            .0
            .checked_sub(required)
            .ok_or_else(|| LedgerError::InsufficientStorageBalance {
                account: account.clone(),
                required,
                escrowed: self.escrowed.0,
            })
    }
}

/// `{ total, available }` as reported to callers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StorageBalance {
    pub total: U128,
    pub available: U128,
}

/// Result of [`StorageLedger::get_or_create`]; `created` tells a freshly
/// inserted zero record apart from an existing one.
pub struct RecordEntry<'a> {
    pub record: &'a mut AccountStorage,
    pub created: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageEvent {
    Deposit {
        account: AccountId,
        amount: U128,
    },
    Footprint {
        account: AccountId,
        delta_bytes: i64,
        bytes_used: StorageUsage,
    },
    Withdraw {
        account: AccountId,
        amount: U128,
    },
    Refund {
        account: AccountId,
        amount: U128,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub cost: ByteCost,
    pub accounts: BTreeMap<AccountId, AccountStorage>,
    pub total_bytes: StorageUsage,
    pub events: Vec<StorageEvent>,
    #[serde(with = "hex_root")]
    pub accounts_root: Root,
}

/// Per-account storage records plus the aggregate footprint. Every mutation
/// is staged on a copy of the record and only committed when the record
/// still covers its footprint.
#[derive(Clone, Debug)]
pub struct StorageLedger {
    cost: ByteCost,
    meta: SnapshotMetadata,
    accounts: BTreeMap<AccountId, AccountStorage>,
    total_bytes: StorageUsage,
    events: Vec<StorageEvent>,
}

impl StorageLedger {
    pub fn new(cost: ByteCost) -> Self {
        Self {
            cost,
            meta: SnapshotMetadata::default(),
            accounts: BTreeMap::new(),
            total_bytes: 0,
            events: Vec::new(),
        }
    }

    pub fn cost(&self) -> &ByteCost {
        &self.cost
    }

    pub fn height(&self) -> u64 {
        self.meta.height
    }

    pub fn total_bytes(&self) -> StorageUsage {
        self.total_bytes
    }

    pub fn events(&self) -> &[StorageEvent] {
        &self.events
    }

    pub fn get(&self, account: &AccountId) -> Option<&AccountStorage> {
        self.accounts.get(account)
    }

    pub fn contains(&self, account: &AccountId) -> bool {
        self.accounts.contains_key(account)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&AccountId, &AccountStorage)> {
        self.accounts.iter()
    }

    pub fn get_or_create(&mut self, account: &AccountId) -> RecordEntry<'_> {
        let created = !self.accounts.contains_key(account);
        let record = self.accounts.entry(account.clone()).or_default();
        RecordEntry { record, created }
    }

    /// Adds `amount` to the escrow and returns the new available amount.
    pub fn deposit(&mut self, account: &AccountId, amount: Balance) -> Result<Balance, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount { amount });
        }
        self.apply_write(account, amount, 0)
    }

    /// Moves `bytes_used` by `delta_bytes`; growth must stay covered by escrow.
    pub fn apply_footprint_delta(
        &mut self,
        account: &AccountId,
        delta_bytes: i64,
    ) -> Result<Balance, LedgerError> {
        self.commit(account, |record| {
            record.bytes_used = shift(record.bytes_used, delta_bytes)?;
            Ok(())
        })?;
        if delta_bytes != 0 {
            self.events.push(StorageEvent::Footprint {
                account: account.clone(),
                delta_bytes,
                bytes_used: self.accounts[account].bytes_used,
            });
        }
        self.finish(account)
    }

    /// Credits `attached` (may be zero) and applies `delta_bytes` as one step:
    /// either both land or neither does.
    pub fn apply_write(
        &mut self,
        account: &AccountId,
        attached: Balance,
        delta_bytes: i64,
    ) -> Result<Balance, LedgerError> {
        self.commit(account, |record| {
            record.escrowed.0 = record
                .escrowed
                .0
                .checked_add(attached)
                .ok_or(LedgerError::Overflow { context: "deposit" })?;
            record.bytes_used = shift(record.bytes_used, delta_bytes)?;
            Ok(())
        })?;
        if attached > 0 {
            self.events.push(StorageEvent::Deposit {
                account: account.clone(),
                amount: U128(attached),
            });
        }
        if delta_bytes != 0 {
            self.events.push(StorageEvent::Footprint {
                account: account.clone(),
                delta_bytes,
                bytes_used: self.accounts[account].bytes_used,
            });
        }
        self.finish(account)
    }

    /// Releases `amount` of the available escrow.
    pub fn withdraw(&mut self, account: &AccountId, amount: Balance) -> Result<Balance, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount { amount });
        }
        let cost = self.cost;
        self.commit(account, |record| {
            let required = record.required(&cost)?;
            if amount > record.available(account, &cost)? {
                return Err(LedgerError::InsufficientStorageBalance {
                    account: account.clone(),
                    required: required.saturating_add(amount),
                    escrowed: record.escrowed.0,
                });
            }
            record.escrowed.0 -= amount;
            Ok(())
        })?;
        self.events.push(StorageEvent::Withdraw {
            account: account.clone(),
            amount: U128(amount),
        });
        self.finish(account)
    }

    /// Empties the escrow of an account that owns no bytes, leaving a zeroed
    /// record. Returns the refunded amount; refunding nothing is a no-op.
    pub fn refund_all(&mut self, account: &AccountId) -> Result<Balance, LedgerError> {
        if !self.contains(account) {
            return Ok(0);
        }
        let cost = self.cost;
        let mut refunded = 0;
        self.commit(account, |record| {
            if record.bytes_used > 0 {
                return Err(LedgerError::InsufficientStorageBalance {
                    account: account.clone(),
                    required: record.required(&cost)?.saturating_add(record.escrowed.0),
                    escrowed: record.escrowed.0,
                });
            }
            refunded = std::mem::take(&mut record.escrowed.0);
            Ok(())
        })?;
        if refunded == 0 {
            return Ok(0);
        }
        self.events.push(StorageEvent::Refund {
            account: account.clone(),
            amount: U128(refunded),
        });
        self.meta.height += 1;
        Ok(refunded)
    }

    /// Never fails and never inserts; unknown accounts read as zero.
    pub fn balance_of(&self, account: &AccountId) -> StorageBalance {
        match self.accounts.get(account) {
            Some(record) => StorageBalance {
                total: record.escrowed,
                available: U128(record.available(account, &self.cost).unwrap_or(0)),
            },
            None => StorageBalance::default(),
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            cost: self.cost,
            accounts: self.accounts.clone(),
            total_bytes: self.total_bytes,
            events: self.events.clone(),
            accounts_root: self.accounts_root(),
        }
    }

    pub fn accounts_root(&self) -> Root {
        let leaves = self
            .accounts
            .iter()
            .map(|(account, record)| {
                merkle::leaf(
                    b"acct",
                    &[
                        account.as_bytes(),
                        &record.bytes_used.to_le_bytes()[..],
                        &record.escrowed.0.to_le_bytes()[..],
                    ],
                )
            })
            .collect();
        merkle::build(leaves, b"storage-ledger-empty")
    }

    /// Rebuilds a ledger without trusting the snapshot: the root, every
    /// record's coverage and the aggregate are recomputed.
    pub fn restore(snapshot: LedgerSnapshot) -> Result<Self, RestoreError> {
        let ledger = Self {
            cost: snapshot.cost,
            meta: snapshot.meta,
            accounts: snapshot.accounts,
            total_bytes: snapshot.total_bytes,
            events: snapshot.events,
        };
        let actual = ledger.accounts_root();
        if actual != snapshot.accounts_root {
            return Err(RestoreError::RootMismatch {
                expected: hex::encode(snapshot.accounts_root),
                actual: hex::encode(actual),
            });
        }
        let mut sum: StorageUsage = 0;
        for (account, record) in &ledger.accounts {
            record.available(account, &ledger.cost)?;
            sum = sum
                .checked_add(record.bytes_used)
                .ok_or(LedgerError::Overflow {
                    context: "total storage usage",
                })?;
        }
        if sum != ledger.total_bytes {
            return Err(RestoreError::TotalMismatch {
                recorded: ledger.total_bytes,
                actual: sum,
            });
        }
        Ok(ledger)
    }

    fn commit<F>(&mut self, account: &AccountId, op: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut AccountStorage) -> Result<(), LedgerError>,
    {
        let current = self.accounts.get(account).cloned().unwrap_or_default();
        let mut staged = current.clone();
        op(&mut staged)?;
        staged.available(account, &self.cost)?;
        let total_bytes = (self.total_bytes - current.bytes_used)
            .checked_add(staged.bytes_used)
            .ok_or(LedgerError::Overflow {
                context: "total storage usage",
            })?;
        tracing::debug!(
            account = %account,
            bytes_used = staged.bytes_used,
            escrowed = %staged.escrowed,
            "storage record committed"
        );
        self.total_bytes = total_bytes;
        let entry = self.get_or_create(account);
        if entry.created {
            tracing::debug!(account = %account, "storage record created");
        }
        *entry.record = staged;
        Ok(())
    }

    fn finish(&mut self, account: &AccountId) -> Result<Balance, LedgerError> {
        self.meta.height += 1;
        self.accounts[account].available(account, &self.cost)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RestoreError {
    #[error("ledger root mismatch: recorded {expected}, recomputed {actual}")]
    RootMismatch { expected: String, actual: String },
    #[error("recorded total usage {recorded} but accounts sum to {actual}")]
    TotalMismatch {
        recorded: StorageUsage,
        actual: StorageUsage,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

fn shift(bytes_used: StorageUsage, delta_bytes: i64) -> Result<StorageUsage, LedgerError> {
    let shifted = if delta_bytes >= 0 {
        bytes_used.checked_add(delta_bytes.unsigned_abs())
    } else {
        bytes_used.checked_sub(delta_bytes.unsigned_abs())
    };
    shifted.ok_or(LedgerError::Overflow {
        context: "footprint delta",
    })
}

pub(crate) mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("root must be 32 bytes"))
    }
}
