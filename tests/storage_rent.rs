use rand::{rngs::StdRng, Rng, SeedableRng};

use storage_rent::{
    AccountId, Balance, ByteCost, CallContext, Config, ContractError, DataKey, KeyedDataStore,
    LedgerError, MemoryStore, StorageContract, StorageGateway, StorageLedger, ONE_NEAR,
};

const COST_PER_BYTE: Balance = 10_000_000_000_000_000_000;

fn account(name: &str) -> AccountId {
    name.to_string()
}

fn assert_covered(gateway: &StorageGateway) {
    let cost = *gateway.ledger().cost();
    let mut total = 0;
    for (account, record) in gateway.ledger().accounts() {
        assert!(record.escrowed.0 >= cost.cost(record.bytes_used).unwrap());
        assert_eq!(gateway.store().footprint_of(account), record.bytes_used);
        total += record.bytes_used;
    }
    assert_eq!(total, gateway.ledger().total_bytes());
}

#[test]
fn concrete_grow_shrink_scenario() {
    let mut contract = StorageContract::new(account("root.near"), Config::default()).unwrap();
    let root = account("root.near");

    contract
        .storage_deposit(&CallContext::new("root.near", ONE_NEAR), None)
        .unwrap();
    let deposited = contract.storage_balance_of(&root);
    assert_eq!(deposited.total.0, ONE_NEAR);
    assert_eq!(deposited.available.0, ONE_NEAR);

    let ten = "0123456789".to_string();
    let long = "x".repeat(170);
    let caller = CallContext::caller("root.near");

    contract.set_data(&caller, ten.clone()).unwrap();
    let after_first = contract.storage_balance_of(&root).available.0;
    assert_eq!(ONE_NEAR - after_first, 10 * COST_PER_BYTE);

    contract.set_data(&caller, long).unwrap();
    let after_growth = contract.storage_balance_of(&root).available.0;
    assert_eq!(after_first - after_growth, 160 * COST_PER_BYTE);

    contract.set_data(&caller, ten).unwrap();
    let after_shrink = contract.storage_balance_of(&root).available.0;
    assert_eq!(after_shrink - after_growth, 160 * COST_PER_BYTE);
    assert_eq!(after_shrink, after_first);
    assert_eq!(contract.storage_balance_of(&root).total.0, ONE_NEAR);
}

#[test]
fn no_free_growth() {
    let mut contract = StorageContract::new(account("root.near"), Config::default()).unwrap();
    let err = contract
        .set_data(&CallContext::caller("root.near"), "Hello World".into())
        .unwrap_err();
    assert!(matches!(
        err,
        ContractError::Ledger(LedgerError::InsufficientStorageBalance { .. })
    ));
    assert!(!contract.is_registered(&account("root.near")));
    assert_eq!(contract.total_storage_usage(), 0);
    assert!(contract.gateway().store().get(&account("root.near"), &DataKey::Primary).is_none());
}

#[test]
fn balance_query_does_not_register() {
    let contract = StorageContract::new(account("root.near"), Config::default()).unwrap();
    let balance = contract.storage_balance_of(&account("ghost.near"));
    assert_eq!(balance.total.0, 0);
    assert_eq!(balance.available.0, 0);
    assert!(!contract.is_registered(&account("ghost.near")));
}

#[test]
fn failed_call_leaves_state_untouched() {
    let mut contract = StorageContract::new(account("root.near"), Config::default()).unwrap();
    let caller = CallContext::caller("root.near");
    contract
        .storage_deposit(&CallContext::new("root.near", 100 * COST_PER_BYTE), None)
        .unwrap();
    contract.set_data(&caller, "a".repeat(60)).unwrap();
    let before = contract.snapshot();

    assert!(contract.set_data(&caller, "b".repeat(101)).is_err());
    assert!(contract
        .set_data_map(&caller, "extra".into(), "c".repeat(41))
        .is_err());
    assert!(contract
        .storage_withdraw(&caller, Some((40 * COST_PER_BYTE + 1).into()))
        .is_err());

    assert_eq!(contract.snapshot(), before);
}

#[test]
fn round_trip_cycles_are_cost_neutral() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut gateway = StorageGateway::new(StorageLedger::new(ByteCost::new(3)), MemoryStore::new());
    let alice = account("alice.near");
    gateway.deposit(&alice, 1_000_000).unwrap();

    for _ in 0..50 {
        let small = rng.gen_range(0..200);
        let large = small + rng.gen_range(1..500);
        let key = DataKey::Entry(format!("k{}", rng.gen_range(0..4)));

        let after_a = gateway.write(&alice, key.clone(), vec![0; small], 0).unwrap();
        let after_b = gateway.write(&alice, key.clone(), vec![1; large], 0).unwrap();
        assert!(after_b < after_a);
        let again = gateway.write(&alice, key, vec![2; small], 0).unwrap();
        assert_eq!(again, after_a);
    }
    assert_covered(&gateway);
}

#[test]
fn random_operations_preserve_coverage() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut gateway = StorageGateway::new(StorageLedger::new(ByteCost::new(5)), MemoryStore::new());
    let accounts: Vec<AccountId> = ["a.near", "b.near", "c.near"].iter().map(|a| account(a)).collect();

    for _ in 0..2_000 {
        let who = &accounts[rng.gen_range(0..accounts.len())];
        let key = DataKey::Entry(format!("k{}", rng.gen_range(0..3)));
        let before = gateway.balance_of(who);
        match rng.gen_range(0..5) {
            0 => {
                let amount = rng.gen_range(0..2_000);
                let result = gateway.deposit(who, amount);
                if amount == 0 {
                    assert_eq!(result, Err(LedgerError::InvalidAmount { amount: 0 }));
                } else {
                    assert_eq!(result.unwrap(), before.available.0 + amount);
                }
            }
            1 | 2 => {
                let size = rng.gen_range(0..400);
                let attached = if rng.gen_bool(0.2) { rng.gen_range(0..1_000) } else { 0 };
                let old = gateway.store().size_of(who, &key);
                match gateway.write(who, key.clone(), vec![7; size], attached) {
                    Ok(_) => assert_eq!(gateway.store().size_of(who, &key), size as u64),
                    Err(_) => {
                        assert_eq!(gateway.store().size_of(who, &key), old);
                        assert_eq!(gateway.balance_of(who), before);
                    }
                }
            }
            3 => {
                let amount = rng.gen_range(1..500);
                if gateway.withdraw_available(who, amount).is_err() {
                    assert!(amount > before.available.0);
                    assert_eq!(gateway.balance_of(who), before);
                }
            }
            _ => {
                let removed = gateway.remove(who, &key).unwrap();
                if let Some(payload) = removed {
                    let after = gateway.balance_of(who);
                    assert_eq!(
                        after.available.0 - before.available.0,
                        payload.len() as Balance * 5
                    );
                }
            }
        }
        assert_covered(&gateway);
    }
}
