use reseller_quota::bench_support::{
    init_test_tracing, random_reseller_id, seed_random, LedgerFixture, SeedStore, SqliteFixture,
};
use reseller_quota_ledger::{AccountStore, ChildAccount, Quota, QuotaLedger, Reseller, ONE_GIG};

fn seed_three_resellers<S: SeedStore + ?Sized>(store: &S) {
    store
        .seed_reseller(Reseller::new("limited", "Limited").with_quota(Quota::from_bytes(5 * ONE_GIG)))
        .unwrap();
    store.seed_reseller(Reseller::new("open-a", "Open A")).unwrap();
    store.seed_reseller(Reseller::new("open-b", "Open B")).unwrap();

    store
        .seed_child(ChildAccount::new("l1", Some("limited"), 2 * ONE_GIG))
        .unwrap();
    store
        .seed_child(ChildAccount::new("l2", Some("limited"), 3 * ONE_GIG))
        .unwrap();
    store
        .seed_child(ChildAccount::new("a1", Some("open-a"), 100 * ONE_GIG))
        .unwrap();
    store
        .seed_child(ChildAccount::new("b1", Some("open-b"), 0))
        .unwrap();
}

fn assert_three_reseller_sweep(ledger: &QuotaLedger, store: &dyn AccountStore) {
    assert!(ledger.is_exceeded("limited").unwrap());
    assert!(!ledger.is_exceeded("open-a").unwrap());

    let report = ledger.sweep().unwrap();
    assert_eq!(report.suspended.len(), 1);
    assert_eq!(report.suspended.get("limited"), Some(&2));
    assert!(report.is_clean());

    assert!(!store.child("l1").unwrap().unwrap().enabled);
    assert!(!store.child("l2").unwrap().unwrap().enabled);
    assert!(store.child("a1").unwrap().unwrap().enabled);

    let second = ledger.sweep().unwrap();
    assert_eq!(second.disabled_children, 0);
}

#[test]
fn test_sweep_in_memory() {
    init_test_tracing();
    let fixture = LedgerFixture::new();
    seed_three_resellers(fixture.store.as_ref());
    assert_three_reseller_sweep(&fixture.ledger, fixture.store.as_ref());
}

#[test]
fn test_sweep_in_sqlite() {
    init_test_tracing();
    let fixture = SqliteFixture::new().expect("sqlite fixture");
    seed_three_resellers(fixture.database.as_ref());
    assert_three_reseller_sweep(&fixture.ledger, fixture.database.as_ref());
}

#[test]
fn test_stores_agree_on_random_population() {
    let memory = LedgerFixture::new();
    let sqlite = SqliteFixture::new().expect("sqlite fixture");
    let quota = Quota::from_bytes(10 * ONE_GIG);

    let ids = seed_random(memory.store.as_ref(), 6, 8, quota, 2 * ONE_GIG).unwrap();
    for id in &ids {
        let reseller = memory.store.reseller(id).unwrap().unwrap();
        sqlite.database.seed_reseller(reseller).unwrap();
        for child in memory.store.children_of(id).unwrap() {
            sqlite.database.seed_child(child).unwrap();
        }
    }

    for id in &ids {
        let expected: u64 = memory
            .store
            .children_of(id)
            .unwrap()
            .iter()
            .map(|child| child.consumed_bytes)
            .sum();
        assert_eq!(memory.ledger.aggregate_usage(id).unwrap(), expected);
        assert_eq!(sqlite.ledger.aggregate_usage(id).unwrap(), expected);
        assert_eq!(
            memory.ledger.is_exceeded(id).unwrap(),
            expected >= quota.bytes()
        );
        assert_eq!(
            memory.ledger.usage_stats(id).unwrap(),
            sqlite.ledger.usage_stats(id).unwrap()
        );
    }

    let memory_report = memory.ledger.sweep().unwrap();
    let sqlite_report = sqlite.ledger.sweep().unwrap();
    assert_eq!(memory_report.suspended, sqlite_report.suspended);
}

#[test]
fn test_admission_tracks_metering_updates() {
    let fixture = SqliteFixture::new().expect("sqlite fixture");
    fixture
        .database
        .seed_reseller(Reseller::new("agent", "Agent").with_quota(Quota::from_bytes(10 * ONE_GIG)))
        .unwrap();
    fixture
        .database
        .seed_child(ChildAccount::new("u1", Some("agent"), 4 * ONE_GIG))
        .unwrap();

    assert!(fixture
        .ledger
        .can_admit("agent", Some(5 * ONE_GIG))
        .unwrap()
        .is_admitted());

    fixture
        .database
        .set_consumed_bytes("u1", 6 * ONE_GIG)
        .unwrap();
    let (admitted, reason) = fixture
        .ledger
        .can_admit("agent", Some(5 * ONE_GIG))
        .unwrap()
        .into_parts();
    assert!(!admitted);
    assert_eq!(
        reason.as_deref(),
        Some("would exceed remaining quota, remaining = 4 GB")
    );

    fixture
        .database
        .set_consumed_bytes("u1", 10 * ONE_GIG)
        .unwrap();
    assert_eq!(
        fixture.ledger.can_admit("agent", None).unwrap().into_parts(),
        (false, Some("quota already exceeded".to_string()))
    );
}

#[test]
fn test_unknown_reseller_is_not_found_on_both_stores() {
    let memory = LedgerFixture::new();
    let sqlite = SqliteFixture::new().expect("sqlite fixture");
    seed_three_resellers(memory.store.as_ref());
    seed_three_resellers(sqlite.database.as_ref());

    for ledger in [&memory.ledger, &sqlite.ledger] {
        let unknown = random_reseller_id("unknown");
        assert!(ledger.enforce(&unknown).unwrap_err().is_not_found());
        assert!(ledger.can_admit(&unknown, None).unwrap_err().is_not_found());
        assert!(ledger.usage_stats(&unknown).unwrap_err().is_not_found());

        let report = ledger.sweep().unwrap();
        assert_eq!(report.total_resellers, 3);
        assert!(!report.suspended.contains_key(&unknown));
    }
}
