// Transaction lifecycle, snapshot isolation, conflict, and expiry behavior through the public API.
use std::time::Duration;

use hsekv::api::{self, ErrorContext, ErrorKind, Kvdb, Kvs, TxnState};

const NO_PARAMS: &[&str] = &[];

fn open_kvdb(params: &[&str]) -> (tempfile::TempDir, Kvdb) {
    api::init(None, NO_PARAMS).expect("init");
    let temp = tempfile::tempdir().expect("tempdir");
    Kvdb::create(temp.path(), NO_PARAMS).expect("create");
    let kvdb = Kvdb::open(temp.path(), params).expect("open");
    kvdb.kvs_create("kvs", NO_PARAMS).expect("kvs create");
    (temp, kvdb)
}

fn open_txn_kvs(kvdb: &Kvdb) -> Kvs {
    kvdb.kvs_open("kvs", &["transactions.enabled=true"])
        .expect("kvs open")
}

#[test]
fn state_machine_is_reusable() {
    let (_temp, kvdb) = open_kvdb(NO_PARAMS);
    let mut txn = kvdb.transaction();
    assert_eq!(txn.state(), TxnState::Invalid);

    assert_eq!(txn.commit().unwrap_err().kind(), ErrorKind::Usage);
    assert_eq!(txn.abort().unwrap_err().kind(), ErrorKind::Usage);

    txn.begin().expect("begin");
    assert_eq!(txn.state(), TxnState::Active);
    assert_eq!(txn.begin().unwrap_err().kind(), ErrorKind::Usage);

    txn.commit().expect("commit");
    assert_eq!(txn.state(), TxnState::Committed);
    assert_eq!(txn.commit().unwrap_err().kind(), ErrorKind::Usage);

    txn.begin().expect("second begin");
    assert_eq!(txn.state(), TxnState::Active);
    txn.abort().expect("abort");
    assert_eq!(txn.state(), TxnState::Aborted);

    txn.begin().expect("third begin");
    txn.close().expect("close");
}

#[test]
fn reads_see_own_writes_and_a_fixed_snapshot() {
    let (_temp, kvdb) = open_kvdb(NO_PARAMS);
    let kvs = open_txn_kvs(&kvdb);

    let mut reader = kvdb.transaction();
    reader.begin().expect("reader begin");

    let mut writer = kvdb.transaction();
    writer.begin().expect("writer begin");
    kvs.put(Some(&writer), "k1", "v1").expect("put");
    assert_eq!(
        kvs.get(Some(&writer), "k1").expect("own read"),
        Some(b"v1".to_vec())
    );
    assert_eq!(kvs.get(None, "k1").expect("outside read"), None);
    writer.commit().expect("commit");

    assert_eq!(kvs.get(None, "k1").expect("after commit"), Some(b"v1".to_vec()));
    assert_eq!(kvs.get(Some(&reader), "k1").expect("snapshot read"), None);
    reader.commit().expect("reader commit");

    reader.begin().expect("reader again");
    assert_eq!(
        kvs.get(Some(&reader), "k1").expect("fresh snapshot"),
        Some(b"v1".to_vec())
    );
    reader.abort().expect("abort");
}

#[test]
fn aborted_writes_are_never_published() {
    let (_temp, kvdb) = open_kvdb(NO_PARAMS);
    let kvs = open_txn_kvs(&kvdb);

    let mut txn = kvdb.transaction();
    txn.begin().expect("begin");
    kvs.put(Some(&txn), "gone", "x").expect("put");
    kvs.delete(Some(&txn), "also-gone").expect("delete");
    txn.abort().expect("abort");

    assert_eq!(kvs.get(None, "gone").expect("get"), None);
}

#[test]
fn commit_publishes_every_kvs_at_once() {
    let (_temp, kvdb) = open_kvdb(NO_PARAMS);
    kvdb.kvs_create("other", NO_PARAMS).expect("second kvs");
    let first = open_txn_kvs(&kvdb);
    let second = kvdb
        .kvs_open("other", &["transactions.enabled=true"])
        .expect("open other");

    let mut txn = kvdb.transaction();
    txn.begin().expect("begin");
    first.put(Some(&txn), "a", "1").expect("put a");
    second.put(Some(&txn), "b", "2").expect("put b");

    let mut observer = kvdb.transaction();
    observer.begin().expect("observer begin");
    txn.commit().expect("commit");

    assert_eq!(first.get(Some(&observer), "a").expect("a"), None);
    assert_eq!(second.get(Some(&observer), "b").expect("b"), None);
    observer.abort().expect("abort");

    assert_eq!(first.get(None, "a").expect("a"), Some(b"1".to_vec()));
    assert_eq!(second.get(None, "b").expect("b"), Some(b"2".to_vec()));
}

#[test]
fn first_writer_wins_and_loser_cannot_commit() {
    let (_temp, kvdb) = open_kvdb(NO_PARAMS);
    let kvs = open_txn_kvs(&kvdb);

    let mut first = kvdb.transaction();
    let mut second = kvdb.transaction();
    first.begin().expect("first begin");
    second.begin().expect("second begin");

    kvs.put(Some(&first), "key", "first").expect("first put");
    let err = kvs.put(Some(&second), "key", "second").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
    assert_eq!(err.errno(), libc::ECANCELED);
    assert!(err.is_conflict());
    assert!(!err.is_expired());
    assert_eq!(second.state(), TxnState::Active);

    let err = kvs.put(Some(&second), "unrelated", "x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);

    let err = second.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
    assert_eq!(second.state(), TxnState::Aborted);

    first.commit().expect("winner commits");
    assert_eq!(kvs.get(None, "key").expect("get"), Some(b"first".to_vec()));
    assert_eq!(kvs.get(None, "unrelated").expect("get"), None);
}

#[test]
fn write_after_newer_commit_conflicts() {
    let (_temp, kvdb) = open_kvdb(NO_PARAMS);
    let kvs = open_txn_kvs(&kvdb);

    let mut stale = kvdb.transaction();
    stale.begin().expect("stale begin");

    let mut fresh = kvdb.transaction();
    fresh.begin().expect("fresh begin");
    kvs.put(Some(&fresh), "key", "fresh").expect("fresh put");
    fresh.commit().expect("fresh commit");

    let err = kvs.delete(Some(&stale), "key").unwrap_err();
    assert!(err.is_conflict());
    stale.abort().expect("abort after conflict");

    stale.begin().expect("retry");
    kvs.delete(Some(&stale), "key").expect("retry delete");
    stale.commit().expect("retry commit");
    assert_eq!(kvs.get(None, "key").expect("get"), None);
}

#[test]
fn expired_transaction_is_aborted_on_next_use() {
    let (_temp, kvdb) = open_kvdb(&["txn_timeout=0"]);
    let kvs = open_txn_kvs(&kvdb);

    let mut txn = kvdb.transaction();
    txn.begin().expect("begin");
    std::thread::sleep(Duration::from_millis(5));

    let err = kvs.put(Some(&txn), "k", "v").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
    assert_eq!(err.context(), ErrorContext::TxnExpired);
    assert!(err.is_expired());
    assert!(!err.is_conflict());
    assert_eq!(txn.state(), TxnState::Aborted);
    assert_eq!(txn.commit().unwrap_err().kind(), ErrorKind::Usage);
}

#[test]
fn close_and_drop_commit_an_active_transaction() {
    let (_temp, kvdb) = open_kvdb(NO_PARAMS);
    let kvs = open_txn_kvs(&kvdb);

    let mut txn = kvdb.transaction();
    txn.begin().expect("begin");
    kvs.put(Some(&txn), "closed", "1").expect("put");
    txn.close().expect("close");
    assert_eq!(kvs.get(None, "closed").expect("get"), Some(b"1".to_vec()));

    {
        let mut txn = kvdb.transaction();
        txn.begin().expect("begin");
        kvs.put(Some(&txn), "dropped", "2").expect("put");
    }
    assert_eq!(kvs.get(None, "dropped").expect("get"), Some(b"2".to_vec()));
}

#[test]
fn store_mode_decides_which_writes_are_allowed() {
    let (_temp, kvdb) = open_kvdb(NO_PARAMS);
    kvdb.kvs_create("plain", NO_PARAMS).expect("kvs create");
    let txn_kvs = open_txn_kvs(&kvdb);
    let plain = kvdb.kvs_open("plain", NO_PARAMS).expect("open plain");
    assert!(txn_kvs.transactions_enabled());
    assert!(!plain.transactions_enabled());

    let mut txn = kvdb.transaction();
    txn.begin().expect("begin");

    let err = txn_kvs.put(None, "k", "v").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    let err = plain.put(Some(&txn), "k", "v").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    let err = plain.get(Some(&txn), "k").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);

    assert_eq!(txn_kvs.get(None, "k").expect("plain read of txn kvs"), None);
    plain.put(None, "k", "v").expect("plain put");
    txn.abort().expect("abort");
}

#[test]
fn transaction_from_another_kvdb_is_rejected() {
    let (_temp, kvdb) = open_kvdb(NO_PARAMS);
    let (_other_temp, other) = open_kvdb(NO_PARAMS);
    let kvs = open_txn_kvs(&kvdb);

    let mut foreign = other.transaction();
    foreign.begin().expect("begin");
    let err = kvs.put(Some(&foreign), "k", "v").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    foreign.abort().expect("abort");
}

#[test]
fn transactional_prefix_delete_hides_committed_keys() {
    let (_temp, kvdb) = open_kvdb(NO_PARAMS);
    kvdb.kvs_create("pfx", &["prefix.length=2"]).expect("kvs create");
    let kvs = kvdb
        .kvs_open("pfx", &["transactions.enabled=true"])
        .expect("open");

    let mut txn = kvdb.transaction();
    txn.begin().expect("begin");
    kvs.put(Some(&txn), "aa1", "x").expect("put");
    kvs.put(Some(&txn), "ab1", "y").expect("put");
    txn.commit().expect("commit");

    txn.begin().expect("begin");
    kvs.prefix_delete(Some(&txn), "aa").expect("prefix delete");
    assert_eq!(kvs.get(Some(&txn), "aa1").expect("get"), None);
    assert_eq!(kvs.get(None, "aa1").expect("get"), Some(b"x".to_vec()));
    kvs.put(Some(&txn), "aa2", "z").expect("put after prefix delete");
    txn.commit().expect("commit");

    assert_eq!(kvs.get(None, "aa1").expect("get"), None);
    assert_eq!(kvs.get(None, "aa2").expect("get"), Some(b"z".to_vec()));
    assert_eq!(kvs.get(None, "ab1").expect("get"), Some(b"y".to_vec()));
}

#[test]
fn prefix_delete_conflicts_with_newer_commit_under_prefix() {
    let (_temp, kvdb) = open_kvdb(NO_PARAMS);
    kvdb.kvs_create("pfx", &["prefix.length=3"]).expect("kvs create");
    let kvs = kvdb
        .kvs_open("pfx", &["transactions.enabled=true"])
        .expect("open");

    let mut stale = kvdb.transaction();
    stale.begin().expect("stale begin");

    let mut fresh = kvdb.transaction();
    fresh.begin().expect("fresh begin");
    kvs.put(Some(&fresh), "abc1", "fresh").expect("fresh put");
    fresh.commit().expect("fresh commit");

    let err = kvs.prefix_delete(Some(&stale), "abc").unwrap_err();
    assert!(err.is_conflict());
    let err = stale.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
    assert_eq!(stale.state(), TxnState::Aborted);
    assert_eq!(kvs.get(None, "abc1").expect("get"), Some(b"fresh".to_vec()));

    stale.begin().expect("retry");
    kvs.prefix_delete(Some(&stale), "abc").expect("retry prefix delete");
    stale.commit().expect("retry commit");
    assert_eq!(kvs.get(None, "abc1").expect("get"), None);
}
