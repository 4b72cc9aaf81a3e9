//! Call surface of the storage contract, named after the methods clients
//! invoke: `new`, `storage_deposit`, `set_data`, `storage_balance_of`, ...
//!
//! Each method takes the [`CallContext`] the host would supply (predecessor
//! account and attached deposit) and either commits completely or returns an
//! error with nothing changed.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::gateway::{Drift, StorageGateway};
use crate::ledger::{
    hex_root, LedgerError, LedgerSnapshot, RestoreError, StorageBalance, StorageLedger,
};
use crate::merkle::Root;
use crate::store::{DataKey, KeyedDataStore, MemoryStore, StoredEntry};
use crate::types::{
    format_amount, validate_account_id, AccountId, AccountIdError, Balance, StorageUsage, U128,
};

pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub predecessor: AccountId,
    pub attached_deposit: Balance,
}

impl CallContext {
    pub fn new(predecessor: impl Into<AccountId>, attached_deposit: Balance) -> Self {
        Self {
            predecessor: predecessor.into(),
            attached_deposit,
        }
    }

    pub fn caller(predecessor: impl Into<AccountId>) -> Self {
        Self::new(predecessor, 0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Data {
    pub string: String,
}

impl Data {
    fn from_payload(payload: &[u8]) -> Self {
        Self {
            string: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageBalanceBounds {
    pub min: U128,
    pub max: Option<U128>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    InvalidAccountId(#[from] AccountIdError),
    #[error("only the owner {owner} may call this method, not {caller}")]
    NotOwner { owner: AccountId, caller: AccountId },
    #[error("the account {0} is not registered")]
    NotRegistered(AccountId),
    #[error("the attached deposit {attached} is less than the minimum storage balance {min}")]
    BelowMinimumBalance { attached: Balance, min: Balance },
    #[error("can't unregister {account} while it owns {keys} keys ({bytes_used} bytes) without force")]
    AccountHasData {
        account: AccountId,
        keys: usize,
        bytes_used: StorageUsage,
    },
    #[error("no data stored for {account} under {key}")]
    DataNotFound { account: AccountId, key: DataKey },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractSnapshot {
    pub version: u8,
    pub owner_id: AccountId,
    pub config: Config,
    pub ledger: LedgerSnapshot,
    pub data: Vec<StoredEntry>,
    #[serde(with = "hex_root")]
    pub data_root: Root,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid owner: {0}")]
    InvalidOwner(#[from] AccountIdError),
    #[error("ledger prices bytes differently from the stored config")]
    ConfigMismatch,
    #[error(transparent)]
    Ledger(#[from] RestoreError),
    #[error("data root mismatch: recorded {expected}, recomputed {actual}")]
    DataRootMismatch { expected: String, actual: String },
    #[error("footprint drift for {0}")]
    Drift(#[from] Drift),
}

#[derive(Clone, Debug)]
pub struct StorageContract {
    owner_id: AccountId,
    config: Config,
    gateway: StorageGateway<MemoryStore>,
}

impl StorageContract {
    pub fn new(owner_id: AccountId, config: Config) -> Result<Self, ContractError> {
        validate_account_id(&owner_id)?;
        info!(owner = %owner_id, cost_per_byte = %config.cost_per_byte, "contract initialized");
        Ok(Self {
            owner_id,
            config,
            gateway: StorageGateway::new(StorageLedger::new(config.byte_cost()), MemoryStore::new()),
        })
    }

    pub fn owner_id(&self) -> &AccountId {
        &self.owner_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> &StorageGateway<MemoryStore> {
        &self.gateway
    }

    pub fn assert_owner(&self, ctx: &CallContext) -> Result<(), ContractError> {
        if ctx.predecessor != self.owner_id {
            return Err(ContractError::NotOwner {
                owner: self.owner_id.clone(),
                caller: ctx.predecessor.clone(),
            });
        }
        Ok(())
    }

    pub fn set_owner(&mut self, ctx: &CallContext, new_owner: AccountId) -> Result<(), ContractError> {
        self.assert_owner(ctx)?;
        validate_account_id(&new_owner)?;
        info!(from = %self.owner_id, to = %new_owner, "ownership transferred");
        self.owner_id = new_owner;
        Ok(())
    }

    /// Credits the attached deposit to `account_id` (the caller by default)
    /// and returns a confirmation line.
    pub fn storage_deposit(
        &mut self,
        ctx: &CallContext,
        account_id: Option<AccountId>,
    ) -> Result<String, ContractError> {
        let amount = ctx.attached_deposit;
        let account_id = account_id.unwrap_or_else(|| ctx.predecessor.clone());
        validate_account_id(&ctx.predecessor)?;
        validate_account_id(&account_id)?;
        if amount == 0 {
            warn!(account = %account_id, "storage deposit without attached funds");
            return Err(LedgerError::InvalidAmount { amount }.into());
        }
        let min = self.config.min_storage_balance.0;
        if !self.is_registered(&account_id) && amount < min {
            return Err(ContractError::BelowMinimumBalance {
                attached: amount,
                min,
            });
        }
        self.gateway.deposit(&account_id, amount)?;
        let balance = self.storage_balance_of(&account_id);
        Ok(format!(
            "Deposited {} for {}: total {}, available {}",
            format_amount(amount),
            account_id,
            format_amount(balance.total.0),
            format_amount(balance.available.0),
        ))
    }

    /// Withdraws `amount` (everything available when omitted) back to the caller.
    pub fn storage_withdraw(
        &mut self,
        ctx: &CallContext,
        amount: Option<U128>,
    ) -> Result<StorageBalance, ContractError> {
        let account_id = &ctx.predecessor;
        validate_account_id(account_id)?;
        if !self.is_registered(account_id) {
            return Err(ContractError::NotRegistered(account_id.clone()));
        }
        let amount = match amount {
            Some(amount) => amount.0,
            None => self.storage_balance_of(account_id).available.0,
        };
        self.gateway.withdraw_available(account_id, amount)?;
        Ok(self.storage_balance_of(account_id))
    }

    /// Refunds the caller's whole escrow. With `force`, the caller's data is
    /// deleted first; without it, an account that still owns any key (even an
    /// empty payload) is refused. The record itself is kept as a zeroed entry.
    pub fn storage_unregister(
        &mut self,
        ctx: &CallContext,
        force: Option<bool>,
    ) -> Result<bool, ContractError> {
        let account_id = &ctx.predecessor;
        validate_account_id(account_id)?;
        let Some(record) = self.gateway.ledger().get(account_id) else {
            info!(account = %account_id, "the account is not registered");
            return Ok(false);
        };
        let bytes_used = record.bytes_used;
        let keys = self.gateway.store().keys_of(account_id).len();
        if keys > 0 || bytes_used > 0 {
            if !force.unwrap_or(false) {
                return Err(ContractError::AccountHasData {
                    account: account_id.clone(),
                    keys,
                    bytes_used,
                });
            }
            self.gateway.clear(account_id)?;
        }
        self.gateway.refund_all(account_id)?;
        Ok(true)
    }

    pub fn storage_balance_bounds(&self) -> StorageBalanceBounds {
        StorageBalanceBounds {
            min: self.config.min_storage_balance,
            max: None,
        }
    }

    /// Zeros for accounts without a record.
    pub fn storage_balance_of(&self, account_id: &AccountId) -> StorageBalance {
        self.gateway.balance_of(account_id)
    }

    pub fn is_registered(&self, account_id: &AccountId) -> bool {
        self.gateway.ledger().contains(account_id)
    }

    pub fn total_storage_usage(&self) -> StorageUsage {
        self.gateway.ledger().total_bytes()
    }

    pub fn set_data(&mut self, ctx: &CallContext, string: String) -> Result<Data, ContractError> {
        self.write(ctx, DataKey::Primary, string)
    }

    pub fn set_data_map(
        &mut self,
        ctx: &CallContext,
        data_id: String,
        string: String,
    ) -> Result<Data, ContractError> {
        self.write(ctx, DataKey::Entry(data_id), string)
    }

    pub fn remove_data(&mut self, ctx: &CallContext) -> Result<Option<Data>, ContractError> {
        self.remove(ctx, DataKey::Primary)
    }

    pub fn remove_data_map(
        &mut self,
        ctx: &CallContext,
        data_id: String,
    ) -> Result<Option<Data>, ContractError> {
        self.remove(ctx, DataKey::Entry(data_id))
    }

    pub fn get_data(&self, account_id: &AccountId) -> Result<Data, ContractError> {
        self.read(account_id, DataKey::Primary)
    }

    pub fn get_data_map(&self, account_id: &AccountId, data_id: String) -> Result<Data, ContractError> {
        self.read(account_id, DataKey::Entry(data_id))
    }

    fn write(&mut self, ctx: &CallContext, key: DataKey, string: String) -> Result<Data, ContractError> {
        validate_account_id(&ctx.predecessor)?;
        self.gateway.write(
            &ctx.predecessor,
            key,
            string.clone().into_bytes(),
            ctx.attached_deposit,
        )?;
        Ok(Data { string })
    }

    fn remove(&mut self, ctx: &CallContext, key: DataKey) -> Result<Option<Data>, ContractError> {
        validate_account_id(&ctx.predecessor)?;
        let removed = self.gateway.remove(&ctx.predecessor, &key)?;
        Ok(removed.map(|payload| Data::from_payload(&payload)))
    }

    fn read(&self, account_id: &AccountId, key: DataKey) -> Result<Data, ContractError> {
        match self.gateway.store().get(account_id, &key) {
            Some(payload) => Ok(Data::from_payload(payload)),
            None => Err(ContractError::DataNotFound {
                account: account_id.clone(),
                key,
            }),
        }
    }

    pub fn snapshot(&self) -> ContractSnapshot {
        let store = self.gateway.store();
        ContractSnapshot {
            version: SNAPSHOT_VERSION,
            owner_id: self.owner_id.clone(),
            config: self.config,
            ledger: self.gateway.ledger().snapshot(),
            data: store.entries(),
            data_root: store.root(),
        }
    }

    /// Rebuilds a contract from a snapshot, re-deriving every root and
    /// cross-checking the ledger against the stored payloads.
    pub fn restore(snapshot: ContractSnapshot) -> Result<Self, SnapshotError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }
        validate_account_id(&snapshot.owner_id)?;
        if snapshot.ledger.cost != snapshot.config.byte_cost() {
            return Err(SnapshotError::ConfigMismatch);
        }
        let ledger = StorageLedger::restore(snapshot.ledger)?;
        let store = MemoryStore::from_entries(snapshot.data);
        let actual = store.root();
        if actual != snapshot.data_root {
            return Err(SnapshotError::DataRootMismatch {
                expected: hex::encode(snapshot.data_root),
                actual: hex::encode(actual),
            });
        }
        let gateway = StorageGateway::new(ledger, store);
        gateway.check_consistency()?;
        Ok(Self {
            owner_id: snapshot.owner_id,
            config: snapshot.config,
            gateway,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ONE_NEAR;

    const C: Balance = 10_000_000_000_000_000_000;

    fn contract() -> StorageContract {
        StorageContract::new("test.near".into(), Config::default()).unwrap()
    }

    fn root() -> CallContext {
        CallContext::caller("test.near")
    }

    fn paying(amount: Balance) -> CallContext {
        CallContext::new("test.near", amount)
    }

    #[test]
    fn new_rejects_malformed_owner() {
        assert!(matches!(
            StorageContract::new("Not Valid".into(), Config::default()),
            Err(ContractError::InvalidAccountId(_))
        ));
    }

    #[test]
    fn storage_deposit_returns_confirmation() {
        let mut contract = contract();
        contract.storage_deposit(&paying(ONE_NEAR), None).unwrap();
        let message = contract.storage_deposit(&paying(2 * ONE_NEAR), None).unwrap();
        assert_eq!(
            message,
            "Deposited 2 NEAR for test.near: total 3 NEAR, available 3 NEAR"
        );
    }

    #[test]
    fn storage_deposit_without_funds_fails() {
        let mut contract = contract();
        assert_eq!(
            contract.storage_deposit(&root(), None),
            Err(ContractError::Ledger(LedgerError::InvalidAmount { amount: 0 }))
        );
        assert!(!contract.is_registered(&"test.near".into()));
    }

    #[test]
    fn deposit_on_behalf_of_another_account() {
        let mut contract = contract();
        contract
            .storage_deposit(&paying(ONE_NEAR), Some("bob.near".into()))
            .unwrap();
        assert_eq!(contract.storage_balance_of(&"bob.near".into()).total.0, ONE_NEAR);
        assert!(!contract.is_registered(&"test.near".into()));
    }

    #[test]
    fn minimum_balance_applies_to_first_deposit_only() {
        let mut contract =
            StorageContract::new("test.near".into(), Config::new(C, ONE_NEAR / 100)).unwrap();
        assert_eq!(
            contract.storage_deposit(&paying(1), None),
            Err(ContractError::BelowMinimumBalance {
                attached: 1,
                min: ONE_NEAR / 100,
            })
        );
        contract.storage_deposit(&paying(ONE_NEAR / 100), None).unwrap();
        contract.storage_deposit(&paying(1), None).unwrap();
        assert_eq!(contract.storage_balance_bounds().min.0, ONE_NEAR / 100);
        assert_eq!(contract.storage_balance_bounds().max, None);
    }

    #[test]
    fn set_data_grow_and_shrink() {
        let mut contract = contract();
        let short = "Hello World".to_string();
        let long = "I AM A LONGER STRING WHICH TAKES UP MORE SPACE AND THEREFORE COSTS MORE TO STORE"
            .repeat(2);
        contract.storage_deposit(&paying(10 * ONE_NEAR), None).unwrap();

        contract.set_data(&root(), short.clone()).unwrap();
        let balance1 = contract.storage_balance_of(&"test.near".into());
        contract.set_data(&root(), long.clone()).unwrap();
        let balance2 = contract.storage_balance_of(&"test.near".into());
        contract.set_data(&root(), short.clone()).unwrap();
        let balance3 = contract.storage_balance_of(&"test.near".into());

        assert!(balance2.available < balance1.available);
        assert!(balance3.available > balance2.available);
        assert_eq!(balance3, balance1);
        let grown = (long.len() - short.len()) as Balance * C;
        assert_eq!(balance1.available.0 - balance2.available.0, grown);
        assert_eq!(contract.get_data(&"test.near".into()).unwrap().string, short);
    }

    #[test]
    fn set_data_without_deposit_fails() {
        let mut contract = contract();
        let err = contract.set_data(&root(), "Hello World".into()).unwrap_err();
        assert!(matches!(
            err,
            ContractError::Ledger(LedgerError::InsufficientStorageBalance { .. })
        ));
        assert!(matches!(
            contract.get_data(&"test.near".into()),
            Err(ContractError::DataNotFound { .. })
        ));
        assert_eq!(contract.total_storage_usage(), 0);
    }

    #[test]
    fn set_data_with_attached_funds() {
        let mut contract = contract();
        contract.set_data(&paying(ONE_NEAR), "Hello World".into()).unwrap();
        let balance = contract.storage_balance_of(&"test.near".into());
        assert_eq!(balance.total.0, ONE_NEAR);
        assert_eq!(balance.available.0, ONE_NEAR - 11 * C);
    }

    #[test]
    fn data_map_entries_are_charged_separately() {
        let mut contract = contract();
        contract.storage_deposit(&paying(ONE_NEAR), None).unwrap();
        contract.set_data_map(&root(), "a".into(), "12345".into()).unwrap();
        contract.set_data_map(&root(), "b".into(), "123".into()).unwrap();
        contract.set_data(&root(), "1".into()).unwrap();
        assert_eq!(contract.total_storage_usage(), 9);
        assert_eq!(
            contract
                .get_data_map(&"test.near".into(), "b".into())
                .unwrap()
                .string,
            "123"
        );
        let removed = contract.remove_data_map(&root(), "a".into()).unwrap();
        assert_eq!(removed.unwrap().string, "12345");
        assert_eq!(contract.total_storage_usage(), 4);
        assert_eq!(contract.remove_data_map(&root(), "a".into()).unwrap(), None);
        assert_eq!(
            contract.storage_balance_of(&"test.near".into()).available.0,
            ONE_NEAR - 4 * C
        );
    }

    #[test]
    fn withdraw_everything_available() {
        let mut contract = contract();
        contract.storage_deposit(&paying(ONE_NEAR), None).unwrap();
        contract.set_data(&root(), "0123456789".into()).unwrap();
        let balance = contract.storage_withdraw(&root(), None).unwrap();
        assert_eq!(balance.total.0, 10 * C);
        assert_eq!(balance.available.0, 0);
        assert!(matches!(
            contract.storage_withdraw(&root(), None),
            Err(ContractError::Ledger(LedgerError::InvalidAmount { .. }))
        ));
        assert!(matches!(
            contract.storage_withdraw(&root(), Some(U128(1))),
            Err(ContractError::Ledger(
                LedgerError::InsufficientStorageBalance { .. }
            ))
        ));
        assert_eq!(
            contract.storage_withdraw(&CallContext::caller("bob.near"), None),
            Err(ContractError::NotRegistered("bob.near".into()))
        );
    }

    #[test]
    fn unregister_requires_force_while_data_exists() {
        let mut contract = contract();
        assert!(!contract.storage_unregister(&root(), None).unwrap());
        contract.storage_deposit(&paying(ONE_NEAR), None).unwrap();
        contract.set_data(&root(), "payload".into()).unwrap();
        assert!(matches!(
            contract.storage_unregister(&root(), None),
            Err(ContractError::AccountHasData { bytes_used: 7, .. })
        ));
        assert!(contract.storage_unregister(&root(), Some(true)).unwrap());
        assert_eq!(
            contract.storage_balance_of(&"test.near".into()),
            StorageBalance::default()
        );
        assert!(contract.is_registered(&"test.near".into()));
        assert_eq!(contract.total_storage_usage(), 0);
        assert!(contract.get_data(&"test.near".into()).is_err());
    }

    #[test]
    fn unregister_clears_empty_payloads() {
        let mut contract = contract();
        contract.storage_deposit(&paying(ONE_NEAR), None).unwrap();
        contract.set_data(&root(), String::new()).unwrap();
        contract.set_data_map(&root(), "blank".into(), String::new()).unwrap();
        assert_eq!(contract.total_storage_usage(), 0);

        assert!(matches!(
            contract.storage_unregister(&root(), None),
            Err(ContractError::AccountHasData {
                keys: 2,
                bytes_used: 0,
                ..
            })
        ));
        assert_eq!(contract.get_data(&"test.near".into()).unwrap().string, "");

        assert!(contract.storage_unregister(&root(), Some(true)).unwrap());
        assert!(matches!(
            contract.get_data(&"test.near".into()),
            Err(ContractError::DataNotFound { .. })
        ));
        assert!(contract
            .gateway()
            .store()
            .keys_of(&"test.near".into())
            .is_empty());
        assert_eq!(
            contract.storage_balance_of(&"test.near".into()),
            StorageBalance::default()
        );
        assert!(contract.gateway().check_consistency().is_ok());
    }

    #[test]
    fn repeated_unregister_changes_nothing() {
        let mut contract = contract();
        contract.storage_deposit(&paying(ONE_NEAR), None).unwrap();
        assert!(contract.storage_unregister(&root(), None).unwrap());
        let before = contract.snapshot();
        assert!(contract.storage_unregister(&root(), None).unwrap());
        assert_eq!(contract.snapshot(), before);
    }

    #[test]
    fn every_caller_is_validated() {
        let mut contract = contract();
        let bad = CallContext::caller("Not Valid");
        assert!(matches!(
            contract.remove_data(&bad),
            Err(ContractError::InvalidAccountId(_))
        ));
        assert!(matches!(
            contract.remove_data_map(&bad, "a".into()),
            Err(ContractError::InvalidAccountId(_))
        ));
        assert!(matches!(
            contract.storage_withdraw(&bad, None),
            Err(ContractError::InvalidAccountId(_))
        ));
        assert!(matches!(
            contract.storage_unregister(&bad, Some(true)),
            Err(ContractError::InvalidAccountId(_))
        ));
    }

    #[test]
    fn only_owner_may_transfer_ownership() {
        let mut contract = contract();
        assert!(matches!(
            contract.set_owner(&CallContext::caller("mallory.near"), "mallory.near".into()),
            Err(ContractError::NotOwner { .. })
        ));
        contract.set_owner(&root(), "new-owner.near".into()).unwrap();
        assert_eq!(contract.owner_id(), "new-owner.near");
        assert!(contract.assert_owner(&root()).is_err());
    }

    #[test]
    fn snapshot_restores_and_detects_tampering() {
        let mut contract = contract();
        contract.storage_deposit(&paying(ONE_NEAR), None).unwrap();
        contract.set_data(&root(), "Hello World".into()).unwrap();

        let restored = StorageContract::restore(contract.snapshot()).unwrap();
        assert_eq!(
            restored.storage_balance_of(&"test.near".into()),
            contract.storage_balance_of(&"test.near".into())
        );
        assert_eq!(restored.get_data(&"test.near".into()).unwrap().string, "Hello World");

        let mut snapshot = contract.snapshot();
        snapshot.data[0].payload = b"Hello World, but longer".to_vec();
        assert!(matches!(
            StorageContract::restore(snapshot),
            Err(SnapshotError::DataRootMismatch { .. })
        ));

        let mut snapshot = contract.snapshot();
        snapshot.data[0].payload = b"Hello".to_vec();
        snapshot.data_root = MemoryStore::from_entries(snapshot.data.clone()).root();
        assert!(matches!(
            StorageContract::restore(snapshot),
            Err(SnapshotError::Drift(_))
        ));

        let mut snapshot = contract.snapshot();
        snapshot.version = 9;
        assert_eq!(
            StorageContract::restore(snapshot).unwrap_err(),
            SnapshotError::UnsupportedVersion(9)
        );
    }
}
