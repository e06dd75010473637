mod common;

use common::{Account, Harness, Note, Person};
use reliabledb::store::{Condition, Store};
use reliabledb::{CallContext, DbError, VersionAttribute, VersionValue};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn first_put_asserts_absence_and_stores_version_one() {
    let h = Harness::new();
    let mut ctx = CallContext::new();

    let mut account = Account::new("X", "ada", 100);
    assert_ok!(h.client.put(&mut ctx, &mut account).await);

    assert_eq!(account.version, Some(VersionValue::Counter(1)));
    let stored = h.store.item("Account", "X").unwrap().unwrap();
    assert_eq!(stored.get("Version").map(String::as_str), Some("1"));
    assert_eq!(stored.get("balance").map(String::as_str), Some("100"));
}

#[tokio::test]
async fn stale_put_raises_version_conflict() {
    let h = Harness::new();
    let mut ctx = CallContext::new();

    let mut first = Account::new("X", "ada", 100);
    h.client.put(&mut ctx, &mut first).await.unwrap();

    // Same id, no known prior version.
    let mut stale = Account::new("X", "bob", 5);
    let err = assert_err!(h.client.put(&mut ctx, &mut stale).await);
    assert!(matches!(
        err,
        DbError::VersionConflict { ref domain, ref item_name, .. }
            if domain == "Account" && item_name == "X"
    ));
    assert_eq!(stale.version, None);

    let stored = h.store.item("Account", "X").unwrap().unwrap();
    assert_eq!(stored.get("owner").map(String::as_str), Some("ada"));
}

#[tokio::test]
async fn known_version_is_presented_and_incremented() {
    let h = Harness::new();
    let mut ctx = CallContext::new();

    let mut account = Account::new("X", "ada", 100);
    h.client.put(&mut ctx, &mut account).await.unwrap();
    account.balance = 80;
    h.client.put(&mut ctx, &mut account).await.unwrap();
    account.balance = 60;
    h.client.put(&mut ctx, &mut account).await.unwrap();

    assert_eq!(account.version, Some(VersionValue::Counter(3)));
    let stored = h.store.item("Account", "X").unwrap().unwrap();
    assert_eq!(stored.get("Version").map(String::as_str), Some("3"));
    assert_eq!(stored.get("balance").map(String::as_str), Some("60"));

    // An outdated copy loses.
    let mut outdated = account.clone();
    outdated.version = Some(VersionValue::Counter(2));
    assert!(
        h.client
            .put(&mut ctx, &mut outdated)
            .await
            .unwrap_err()
            .is_version_conflict()
    );
}

#[tokio::test]
async fn read_back_record_carries_its_version() {
    let h = Harness::new();
    let mut ctx = CallContext::new();

    let mut account = Account::new("X", "ada", 100);
    h.client.put(&mut ctx, &mut account).await.unwrap();
    h.client.cache().flush().unwrap();

    let mut loaded: Account = h.client.get(&ctx, "X").await.unwrap().unwrap();
    assert_eq!(loaded.version, Some(VersionValue::Counter(1)));
    loaded.balance = 1;
    assert_ok!(h.client.put(&mut ctx, &mut loaded).await);
}

#[tokio::test]
async fn timestamp_versions_move_forward_when_clock_stands_still() {
    let h = Harness::new();
    let mut ctx = CallContext::new();

    let mut note = Note {
        id: "n1".to_string(),
        text: "draft".to_string(),
        modified: None,
    };
    h.client.put(&mut ctx, &mut note).await.unwrap();
    let first = note.modified.unwrap();

    note.text = "final".to_string();
    h.client.put(&mut ctx, &mut note).await.unwrap();
    let second = note.modified.unwrap();

    assert!(second > first);
    let stored = h.store.item("Note", "n1").unwrap().unwrap();
    assert_eq!(stored.get("Modified"), Some(&second.format()));
}

#[tokio::test]
async fn unset_previous_versions_mean_insert() {
    let h = Harness::new();
    let versions = h.client.versions();
    let counter = VersionAttribute::counter("Version");

    assert_eq!(
        versions.build_condition(&counter, Some(&VersionValue::Counter(0))),
        Condition::NotExists {
            name: "Version".to_string()
        }
    );
    assert_eq!(
        versions.build_condition(&counter, Some(&VersionValue::Counter(4))),
        Condition::Equals {
            name: "Version".to_string(),
            value: "4".to_string()
        }
    );
}

#[tokio::test]
async fn batch_put_stamps_versions_without_conditions() {
    let h = Harness::new();
    let mut ctx = CallContext::new();

    let mut accounts = (0..30)
        .map(|i| Account::new(&format!("A{i:02}"), "ada", i))
        .collect::<Vec<_>>();
    h.client.put_all(&mut ctx, &mut accounts).await.unwrap();

    assert!(
        accounts
            .iter()
            .all(|account| account.version == Some(VersionValue::Counter(1)))
    );
    let stats = h.store.stats().unwrap();
    assert_eq!(stats.batch_puts, 2);
    assert_eq!(stats.puts, 0);
    assert_eq!(h.store.domain_len("Account").unwrap(), 30);

    // Batch puts overwrite regardless of what is stored.
    let mut stale = vec![Account::new("A00", "bob", 0)];
    assert_ok!(h.client.put_all(&mut ctx, &mut stale).await);
}

#[tokio::test]
async fn unversioned_records_are_written_unconditionally() {
    let h = Harness::new();
    let mut ctx = CallContext::new();

    h.client
        .put(&mut ctx, &mut Person::new("42", "Ada"))
        .await
        .unwrap();
    h.client
        .put(&mut ctx, &mut Person::new("42", "Grace"))
        .await
        .unwrap();

    let stored = h
        .store
        .get("Person", "42", true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get("name").map(String::as_str), Some("Grace"));
    assert_eq!(h.store.stats().unwrap().conflicts, 0);
}

#[tokio::test]
async fn buffered_put_takes_its_version_only_after_commit() {
    let h = Harness::new();
    let mut ctx = CallContext::new();
    let mut account = Account::new("X", "ada", 100);

    h.client.open_write_coordinator(&mut ctx);
    let pending = h.client.put(&mut ctx, &mut account).await.unwrap();
    assert_eq!(pending, Some(VersionValue::Counter(1)));
    assert_eq!(account.version, None);

    // Reopening discards the batch; the item was never written.
    h.client.open_write_coordinator(&mut ctx);
    h.client.commit(&mut ctx).await.unwrap();
    assert!(h.store.item("Account", "X").unwrap().is_none());

    // The record still asserts absence, so the direct put succeeds.
    assert_ok!(h.client.put(&mut ctx, &mut account).await);
    assert_eq!(account.version, Some(VersionValue::Counter(1)));

    h.client.open_write_coordinator(&mut ctx);
    account.balance = 50;
    let pending = h.client.put(&mut ctx, &mut account).await.unwrap();
    assert_eq!(account.version, Some(VersionValue::Counter(1)));
    h.client.commit(&mut ctx).await.unwrap();
    account.version = pending;

    assert_ok!(h.client.put(&mut ctx, &mut account).await);
    assert_eq!(account.version, Some(VersionValue::Counter(3)));
}
