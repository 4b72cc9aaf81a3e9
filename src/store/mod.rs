use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::merkle::{self, Root};
use crate::types::{AccountId, StorageUsage};

/// Where a payload lives under its owning account: the single well-known
/// slot written by `set_data`, or a caller-named entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DataKey {
    Primary,
    Entry(String),
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKey::Primary => f.write_str("<primary>"),
            DataKey::Entry(id) => write!(f, "{id:?}"),
        }
    }
}

/// Sizes before and after a single `put`/`remove`, reported together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SizeChange {
    pub old_size: StorageUsage,
    pub new_size: StorageUsage,
}

impl SizeChange {
    /// `new_size - old_size`, if it fits in an `i64`.
    pub fn delta(&self) -> Option<i64> {
        let delta = i128::from(self.new_size) - i128::from(self.old_size);
        i64::try_from(delta).ok()
    }
}

pub struct PutOutcome {
    pub change: SizeChange,
    pub previous: Option<Vec<u8>>,
}

/// Durable mapping from `(account, key)` to a byte payload. Implementations
/// run one call at a time; `put` reports the prior size from the same lookup
/// that replaces it.
pub trait KeyedDataStore {
    fn get(&self, account: &AccountId, key: &DataKey) -> Option<&[u8]>;

    fn size_of(&self, account: &AccountId, key: &DataKey) -> StorageUsage {
        self.get(account, key)
            .map_or(0, |payload| payload.len() as StorageUsage)
    }

    fn put(&mut self, account: &AccountId, key: DataKey, payload: Vec<u8>) -> PutOutcome;

    fn remove(&mut self, account: &AccountId, key: &DataKey) -> Option<Vec<u8>>;

    fn keys_of(&self, account: &AccountId) -> Vec<DataKey>;

    /// Sum of all payload sizes owned by `account`.
    fn footprint_of(&self, account: &AccountId) -> StorageUsage {
        self.keys_of(account)
            .iter()
            .map(|key| self.size_of(account, key))
            .sum()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredEntry {
    pub account: AccountId,
    pub key: DataKey,
    #[serde(with = "hex_payload")]
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    accounts: BTreeMap<AccountId, BTreeMap<DataKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owners(&self) -> impl Iterator<Item = &AccountId> {
        self.accounts.keys()
    }

    pub fn entries(&self) -> Vec<StoredEntry> {
        self.accounts
            .iter()
            .flat_map(|(account, slots)| {
                slots.iter().map(move |(key, payload)| StoredEntry {
                    account: account.clone(),
                    key: key.clone(),
                    payload: payload.clone(),
                })
            })
            .collect()
    }

    pub fn from_entries(entries: Vec<StoredEntry>) -> Self {
        let mut store = Self::new();
        for entry in entries {
            store.put(&entry.account, entry.key, entry.payload);
        }
        store
    }

    pub fn root(&self) -> Root {
        let mut leaves = Vec::new();
        for (account, slots) in &self.accounts {
            for (key, payload) in slots {
                let (kind, id) = match key {
                    DataKey::Primary => (&b"primary"[..], &b""[..]),
                    DataKey::Entry(id) => (&b"entry"[..], id.as_bytes()),
                };
                leaves.push(merkle::leaf(
                    b"data",
                    &[account.as_bytes(), kind, id, payload.as_slice()],
                ));
            }
        }
        merkle::build(leaves, b"storage-data-empty")
    }
}

impl KeyedDataStore for MemoryStore {
    fn get(&self, account: &AccountId, key: &DataKey) -> Option<&[u8]> {
        self.accounts
            .get(account)
            .and_then(|slots| slots.get(key))
            .map(Vec::as_slice)
    }

    fn put(&mut self, account: &AccountId, key: DataKey, payload: Vec<u8>) -> PutOutcome {
        let new_size = payload.len() as StorageUsage;
        let previous = self
            .accounts
            .entry(account.clone())
            .or_default()
            .insert(key, payload);
        let old_size = previous.as_ref().map_or(0, |p| p.len() as StorageUsage);
        PutOutcome {
            change: SizeChange { old_size, new_size },
            previous,
        }
    }

    fn remove(&mut self, account: &AccountId, key: &DataKey) -> Option<Vec<u8>> {
        let slots = self.accounts.get_mut(account)?;
        let removed = slots.remove(key);
        if slots.is_empty() {
            self.accounts.remove(account);
        }
        removed
    }

    fn keys_of(&self, account: &AccountId) -> Vec<DataKey> {
        self.accounts
            .get(account)
            .map(|slots| slots.keys().cloned().collect())
            .unwrap_or_default()
    }
}

mod hex_payload {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded.as_bytes())
            .map_err(|err| D::Error::custom(format!("payload is not hex: {err}")))
    }
}
