//! Entry points that move escrow and payloads together.
//!
//! Every write goes to the store first so the store reports the prior size
//! of the slot it replaced; the signed delta is then handed to the ledger.
//! If the ledger refuses, the slot is put back the way it was, so no payload
//! ever exists without the escrow that pays for it.

use tracing::{info, warn};

use crate::ledger::{LedgerError, StorageBalance, StorageLedger};
use crate::store::{DataKey, KeyedDataStore, MemoryStore};
use crate::types::{AccountId, Balance, StorageUsage};

#[derive(Clone, Debug)]
pub struct StorageGateway<S = MemoryStore> {
    ledger: StorageLedger,
    store: S,
}

impl<S: KeyedDataStore> StorageGateway<S> {
    pub fn new(ledger: StorageLedger, store: S) -> Self {
        Self { ledger, store }
    }

    pub fn ledger(&self) -> &StorageLedger {
        &self.ledger
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn deposit(&mut self, account: &AccountId, amount: Balance) -> Result<Balance, LedgerError> {
        let available = self.ledger.deposit(account, amount)?;
        info!(account = %account, amount = %amount, available = %available, "storage deposit");
        Ok(available)
    }

    /// Replaces the payload under `key`, crediting `attached` in the same step.
    /// Returns the new available amount.
    pub fn write(
        &mut self,
        account: &AccountId,
        key: DataKey,
        payload: Vec<u8>,
        attached: Balance,
    ) -> Result<Balance, LedgerError> {
        let outcome = self.store.put(account, key.clone(), payload);
        let change = outcome.change;
        let result = change
            .delta()
            .ok_or(LedgerError::Overflow {
                context: "byte delta",
            })
            .and_then(|delta| self.ledger.apply_write(account, attached, delta));
        match result {
            Ok(available) => {
                info!(
                    account = %account,
                    key = %key,
                    old_size = change.old_size,
                    new_size = change.new_size,
                    available = %available,
                    "data written"
                );
                Ok(available)
            }
            Err(err) => {
                self.restore(account, key, outcome.previous);
                warn!(account = %account, error = %err, "write rejected");
                Err(err)
            }
        }
    }

    /// Deletes `key` and refunds its bytes. `None` when nothing was stored.
    pub fn remove(
        &mut self,
        account: &AccountId,
        key: &DataKey,
    ) -> Result<Option<Vec<u8>>, LedgerError> {
        let Some(payload) = self.store.remove(account, key) else {
            return Ok(None);
        };
        let result = shrink_delta(payload.len() as StorageUsage)
            .and_then(|delta| self.ledger.apply_footprint_delta(account, delta));
        match result {
            Ok(available) => {
                info!(account = %account, key = %key, freed = payload.len(), available = %available, "data removed");
                Ok(Some(payload))
            }
            Err(err) => {
                self.store.put(account, key.clone(), payload);
                Err(err)
            }
        }
    }

    /// Deletes every key owned by `account` and refunds the freed bytes.
    pub fn clear(&mut self, account: &AccountId) -> Result<StorageUsage, LedgerError> {
        let removed: Vec<(DataKey, Vec<u8>)> = self
            .store
            .keys_of(account)
            .into_iter()
            .filter_map(|key| {
                let payload = self.store.remove(account, &key)?;
                Some((key, payload))
            })
            .collect();
        let freed: StorageUsage = removed
            .iter()
            .map(|(_, payload)| payload.len() as StorageUsage)
            .sum();
        if freed == 0 {
            return Ok(0);
        }
        let result = shrink_delta(freed)
            .and_then(|delta| self.ledger.apply_footprint_delta(account, delta));
        if let Err(err) = result {
            for (key, payload) in removed {
                self.store.put(account, key, payload);
            }
            return Err(err);
        }
        info!(account = %account, freed, "account data cleared");
        Ok(freed)
    }

    pub fn withdraw_available(
        &mut self,
        account: &AccountId,
        amount: Balance,
    ) -> Result<Balance, LedgerError> {
        let available = self.ledger.withdraw(account, amount)?;
        info!(account = %account, amount = %amount, available = %available, "storage withdrawal");
        Ok(available)
    }

    /// Releases the whole escrow of an account that owns no data.
    pub fn refund_all(&mut self, account: &AccountId) -> Result<Balance, LedgerError> {
        let refunded = self.ledger.refund_all(account)?;
        info!(account = %account, refunded = %refunded, "storage escrow refunded");
        Ok(refunded)
    }

    pub fn balance_of(&self, account: &AccountId) -> StorageBalance {
        self.ledger.balance_of(account)
    }

    /// First account whose ledger footprint disagrees with the store.
    pub fn find_drift(&self) -> Option<Drift> {
        self.ledger.accounts().find_map(|(account, record)| {
            let store_bytes = self.store.footprint_of(account);
            (store_bytes != record.bytes_used).then(|| Drift {
                account: account.clone(),
                ledger_bytes: record.bytes_used,
                store_bytes,
            })
        })
    }

    fn restore(&mut self, account: &AccountId, key: DataKey, previous: Option<Vec<u8>>) {
        match previous {
            Some(payload) => {
                self.store.put(account, key, payload);
            }
            None => {
                self.store.remove(account, &key);
            }
        }
    }
}

impl StorageGateway<MemoryStore> {
    /// Like [`Self::find_drift`], but also catches payloads owned by an
    /// account the ledger has never seen.
    pub fn check_consistency(&self) -> Result<(), Drift> {
        if let Some(drift) = self.find_drift() {
            return Err(drift);
        }
        match self
            .store
            .owners()
            .find(|owner| !self.ledger.contains(owner))
        {
            Some(owner) => Err(Drift {
                account: owner.clone(),
                ledger_bytes: 0,
                store_bytes: self.store.footprint_of(owner),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{account}: ledger records {ledger_bytes} bytes, store holds {store_bytes}")]
pub struct Drift {
    pub account: AccountId,
    pub ledger_bytes: StorageUsage,
    pub store_bytes: StorageUsage,
}

fn shrink_delta(freed: StorageUsage) -> Result<i64, LedgerError> {
    i64::try_from(freed)
        .map(|bytes| -bytes)
        .map_err(|_| LedgerError::Overflow {
            context: "byte delta",
        })
}
