//! End-to-end behavior of a connection over a real store file.

use bucketdb_core::engine::{Store, StoreOptions};
use bucketdb_core::{new_connection, Config, Connection, CoreError, CoreResult, ErrorKind, Key};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Endpoint {
    id: u64,
    name: String,
    url: String,
}

fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("data").join("store.db")
}

fn open(path: &Path, key: Option<&[u8]>) -> Connection {
    let conn = new_connection("file", path, key).unwrap();
    conn.open().unwrap();
    conn
}

#[test]
fn unknown_backend_is_rejected() {
    let err = new_connection("unknown", "/tmp/never.db", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedBackend);
    assert!(err.to_string().contains("unknown"));
}

#[test]
fn crud_cycle_on_plain_store() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);

    conn.create_object_with_id("test", 1, &json!({"x": 1})).unwrap();
    assert_eq!(
        conn.get_object::<serde_json::Value>("test", 1u64).unwrap(),
        Some(json!({"x": 1}))
    );

    conn.update_object("test", 1u64, &json!({"x": 2})).unwrap();
    assert_eq!(
        conn.get_object::<serde_json::Value>("test", 1u64).unwrap(),
        Some(json!({"x": 2}))
    );

    conn.delete_object("test", 1u64).unwrap();
    assert_eq!(conn.get_object::<serde_json::Value>("test", 1u64).unwrap(), None);

    conn.close().unwrap();
}

#[test]
fn integer_literals_address_numeric_keys() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);

    conn.update_object("test", 1, &"one").unwrap();
    assert_eq!(
        conn.get_object::<String>("test", 1).unwrap(),
        Some("one".to_string())
    );
    assert_eq!(
        conn.get_object_by_id::<serde_json::Value>("test", 1).unwrap(),
        Some(json!("one"))
    );
    assert_eq!(conn.get_object_by_id::<String>("test", 2).unwrap(), None);

    conn.update_tx(|tx| {
        tx.update_object("test", 2, &"two")?;
        assert_eq!(tx.get_object_by_id::<String>("test", 2)?, Some("two".into()));
        Ok(())
    })
    .unwrap();
    conn.view_tx(|tx| {
        assert_eq!(tx.get_object_by_id::<String>("test", 2)?, Some("two".into()));
        Ok(())
    })
    .unwrap();
}

#[test]
fn legacy_backend_alias_opens_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let conn = new_connection("boltdb", store_path(&dir), None).unwrap();
    conn.open().unwrap();
    assert_eq!(conn.backend_kind().as_str(), "file");
}

#[test]
fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);

    {
        let conn = open(&path, Some(b"secret"));
        let id = conn
            .create_object_with("endpoints", |id| Endpoint {
                id,
                name: "local".into(),
                url: "unix:///var/run/docker.sock".into(),
            })
            .unwrap();
        assert_eq!(id, 1);
        conn.close().unwrap();
    }

    let conn = open(&path, Some(b"secret"));
    let endpoint: Endpoint = conn.get_object("endpoints", 1u64).unwrap().unwrap();
    assert_eq!(endpoint.id, 1);
    assert_eq!(endpoint.name, "local");
    assert_eq!(conn.get_next_identifier("endpoints").unwrap(), 2);
}

#[test]
fn delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);
    conn.update_object("users", "alice", &"admin").unwrap();

    conn.delete_object("users", "bob").unwrap();
    conn.delete_object("users", "bob").unwrap();
    conn.delete_object("missing_bucket", 7u64).unwrap();

    assert_eq!(conn.count("users").unwrap(), 1);
}

#[test]
fn identifiers_start_at_one_and_never_repeat() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);

    let first = conn.create_object("teams", &"ops").unwrap();
    let second = conn.create_object("teams", &"dev").unwrap();
    assert_eq!((first, second), (1, 2));

    conn.delete_object("teams", second).unwrap();
    let third = conn.create_object("teams", &"qa").unwrap();
    assert_eq!(third, 3);

    conn.create_object_with_id("teams", 10, &"sec").unwrap();
    assert_eq!(conn.create_object("teams", &"net").unwrap(), 11);
}

#[test]
fn duplicate_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);
    conn.create_object_with_id("tags", 5, &"prod").unwrap();

    let err = conn.create_object_with_id("tags", 5, &"dev").unwrap_err();
    assert!(matches!(err, CoreError::DuplicateKey { .. }));
    assert_eq!(conn.get_object::<String>("tags", 5u64).unwrap().as_deref(), Some("prod"));

    conn.create_object_with_string_id("tags", "edge", &"lab").unwrap();
    assert!(conn.create_object_with_string_id("tags", "edge", &"x").is_err());
}

#[test]
fn failed_transaction_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);

    let result: CoreResult<()> = conn.update_tx(|tx| {
        tx.update_object("a", 1u64, &"one")?;
        tx.update_object("b", 2u64, &"two")?;
        tx.create_object("c", &"three")?;
        Err(CoreError::invalid_argument("abort"))
    });
    assert!(result.is_err());

    assert_eq!(conn.get_object::<String>("a", 1u64).unwrap(), None);
    assert_eq!(conn.get_object::<String>("b", 2u64).unwrap(), None);
    assert_eq!(conn.get_next_identifier("c").unwrap(), 1);
    assert!(conn.bucket_names().unwrap().is_empty());

    conn.update_tx(|tx| {
        tx.update_object("a", 1u64, &"one")?;
        tx.update_object("b", 2u64, &"two")?;
        tx.create_object("c", &"three")?;
        Ok(())
    })
    .unwrap();
    assert_eq!(conn.bucket_names().unwrap(), vec!["a", "b", "c"]);
}

#[test]
fn panic_in_transaction_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        conn.update_tx(|tx| -> CoreResult<()> {
            tx.update_object("jobs", 1u64, &"queued")?;
            panic!("worker crashed");
        })
    }));
    assert!(outcome.is_err());

    assert_eq!(conn.get_object::<String>("jobs", 1u64).unwrap(), None);
    conn.update_object("jobs", 1u64, &"queued").unwrap();
    assert_eq!(conn.count("jobs").unwrap(), 1);
}

#[test]
fn transaction_sees_its_own_writes() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);

    conn.update_tx(|tx| {
        let id = tx.create_object("users", &"alice")?;
        assert_eq!(tx.get_object::<String>("users", id)?.as_deref(), Some("alice"));
        assert_eq!(tx.count("users")?, 1);

        let changed = tx.update_object_func("users", id, |name: &mut String| name.push_str("!"))?;
        assert!(changed);
        Ok(())
    })
    .unwrap();

    assert_eq!(conn.get_object::<String>("users", 1u64).unwrap().as_deref(), Some("alice!"));
    assert!(!conn
        .update_object_func("users", 99u64, |_: &mut String| {})
        .unwrap());
}

#[test]
fn wrong_key_yields_corrupt_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);

    {
        let conn = open(&path, Some(b"first key"));
        for name in ["a", "b", "c"] {
            conn.create_object("names", &name).unwrap();
        }
        conn.close().unwrap();
    }

    let conn = open(&path, Some(b"second key"));
    let err = conn.get_object::<String>("names", 1u64).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptRecord);

    let items: Vec<_> = conn.get_all::<String>("names").unwrap().collect();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|item| matches!(item, Err(CoreError::CorruptRecord { .. }))));
}

#[test]
fn plaintext_store_read_with_key_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);

    {
        let conn = open(&path, None);
        conn.update_object("settings", "theme", &"dark").unwrap();
        conn.close().unwrap();
    }

    let conn = open(&path, Some(b"secret"));
    assert!(conn.needs_encryption_migration().unwrap());
    let err = conn.get_object::<String>("settings", "theme").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptRecord);
}

#[test]
fn second_open_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    let first = open(&path, None);

    let second = new_connection("file", &path, None).unwrap();
    let err = second.open().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);

    first.close().unwrap();
    second.open().unwrap();
    assert!(second.is_open());
}

#[test]
fn closed_connection_rejects_operations() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);
    conn.close().unwrap();
    conn.close().unwrap();

    let err = conn.get_object::<String>("users", 1u64).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
    let err = conn.create_object("users", &"alice").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);

    conn.open().unwrap();
    assert_eq!(conn.create_object("users", &"alice").unwrap(), 1);
}

#[test]
fn open_without_create_fails_for_missing_store() {
    let dir = tempfile::tempdir().unwrap();
    let conn = Connection::with_config(Config::new(store_path(&dir)).create_if_missing(false)).unwrap();
    let err = conn.open().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    assert!(!conn.is_open());
}

#[test]
fn iteration_is_ordered_and_snapshotted() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);
    for name in ["c", "a", "b"] {
        conn.create_object("letters", &name).unwrap();
    }

    let iter = conn.get_all::<String>("letters").unwrap();
    conn.update_object("letters", 4u64, &"d").unwrap();

    let seen: Vec<(Key, String)> = iter.collect::<CoreResult<_>>().unwrap();
    let ids: Vec<_> = seen.iter().map(|(k, _)| k.as_id().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(seen[0].1, "c");

    assert_eq!(conn.get_all::<String>("nothing").unwrap().count(), 0);
}

#[test]
fn prefix_scan_and_bulk_delete() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);
    for (key, enabled) in [("edge:1", true), ("edge:2", false), ("core:1", true)] {
        conn.update_object("flags", key, &enabled).unwrap();
    }

    let edges: Vec<_> = conn
        .get_all_with_key_prefix::<bool>("flags", "edge:")
        .unwrap()
        .collect::<CoreResult<_>>()
        .unwrap();
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0].0.as_text(), Some("edge:1"));

    let removed = conn.delete_all_objects("flags", |enabled: &bool| !enabled).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(conn.count("flags").unwrap(), 2);
}

#[test]
fn bucket_management() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);

    assert!(conn.create_bucket("empty").unwrap());
    assert!(!conn.create_bucket("empty").unwrap());
    conn.create_object("full", &1).unwrap();
    assert_eq!(conn.bucket_names().unwrap(), vec!["empty", "full"]);

    assert!(conn.delete_bucket("full").unwrap());
    assert!(!conn.delete_bucket("full").unwrap());
    assert_eq!(conn.get_next_identifier("full").unwrap(), 1);

    let err = conn.create_bucket("__meta").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn readers_run_alongside_a_writer() {
    let dir = tempfile::tempdir().unwrap();
    let conn = Arc::new(open(&store_path(&dir), None));

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                for _ in 0..25 {
                    conn.create_object("events", &"tick").unwrap();
                }
            })
        })
        .collect();
    let reader = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || {
            for _ in 0..50 {
                let count = conn.count("events").unwrap();
                assert!(count <= 100);
            }
        })
    };

    for handle in writers {
        handle.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(conn.count("events").unwrap(), 100);
    assert_eq!(conn.get_next_identifier("events").unwrap(), 101);
}

#[test]
fn schema_version_defaults_and_updates() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);

    {
        let conn = Connection::with_config(Config::new(&path).default_schema_version(4)).unwrap();
        conn.open().unwrap();
        assert_eq!(conn.schema_version().unwrap(), 4);
        conn.set_schema_version(5).unwrap();
        conn.close().unwrap();
    }

    let conn = open(&path, None);
    assert_eq!(conn.schema_version().unwrap(), 5);
    assert!(conn.bucket_names().unwrap().is_empty());
}

#[test]
fn read_only_open_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    {
        let conn = open(&path, Some(b"secret"));
        conn.update_object("settings", "theme", &"dark").unwrap();
        conn.close().unwrap();
    }
    let before = std::fs::read(&path).unwrap();

    let conn = Connection::with_config(Config::new(&path).read_only(true)).unwrap();
    conn.open().unwrap();
    assert!(conn.is_encrypted_store().unwrap());
    assert_eq!(conn.schema_version().unwrap_err().kind(), ErrorKind::CorruptRecord);
    assert_eq!(conn.count("settings").unwrap(), 1);
    assert_eq!(
        conn.update_object("settings", "theme", &"light").unwrap_err().kind(),
        ErrorKind::InvalidInput
    );
    conn.close().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn read_only_open_leaves_unmarked_store_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    {
        let store = Store::open(&path, &StoreOptions::default()).unwrap();
        let mut txn = store.write().unwrap();
        txn.put("users", 1u64.to_be_bytes().to_vec(), Bytes::from_static(b"raw"));
        txn.commit().unwrap();
        store.close().unwrap();
    }
    let before = std::fs::read(&path).unwrap();

    let conn = Connection::with_config(
        Config::new(&path).read_only(true).encryption_key(b"secret"),
    )
    .unwrap();
    conn.open().unwrap();
    assert!(!conn.is_encrypted_store().unwrap());
    assert_eq!(conn.bucket_names().unwrap(), vec!["users".to_string()]);
    conn.close().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn backup_and_restore() {
    let dir = tempfile::tempdir().unwrap();
    let backup = dir.path().join("backup.db");
    let conn = open(&store_path(&dir), Some(b"secret"));

    conn.update_object("settings", "theme", &"dark").unwrap();
    let bytes = conn.backup_to(&backup).unwrap();
    assert_eq!(bytes, std::fs::metadata(&backup).unwrap().len());

    conn.update_object("settings", "theme", &"light").unwrap();
    conn.update_object("settings", "lang", &"en").unwrap();

    let stats = conn.restore_from(&backup).unwrap();
    assert!(stats.committed > 0);
    assert_eq!(conn.get_object::<String>("settings", "theme").unwrap().as_deref(), Some("dark"));
    assert_eq!(conn.get_object::<String>("settings", "lang").unwrap(), None);

    conn.update_object("settings", "lang", &"fr").unwrap();
    assert_eq!(conn.count("settings").unwrap(), 2);
}

#[test]
fn restore_rejects_corrupt_backup() {
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("bogus.db");
    std::fs::write(&bogus, b"definitely not a store").unwrap();

    let conn = open(&store_path(&dir), None);
    conn.update_object("settings", "theme", &"dark").unwrap();

    let err = conn.restore_from(&bogus).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptStore);
    assert_eq!(conn.get_object::<String>("settings", "theme").unwrap().as_deref(), Some("dark"));
}

#[test]
fn compact_keeps_live_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    {
        let conn = open(&path, None);
        for i in 0..20u64 {
            conn.update_object("counters", "hits", &i).unwrap();
        }
        conn.create_object("teams", &"ops").unwrap();
        conn.delete_object("teams", 1u64).unwrap();

        let stats = conn.compact().unwrap();
        assert!(stats.after < stats.before);

        conn.update_object("counters", "misses", &1u64).unwrap();
        conn.close().unwrap();
    }

    let conn = open(&path, None);
    assert_eq!(conn.get_object::<u64>("counters", "hits").unwrap(), Some(19));
    assert_eq!(conn.get_object::<u64>("counters", "misses").unwrap(), Some(1));
    assert_eq!(conn.create_object("teams", &"dev").unwrap(), 2);
}

#[test]
fn export_writes_decoded_json() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("export.json");
    let conn = open(&store_path(&dir), Some(b"secret"));

    conn.create_object("endpoints", &json!({"name": "local"})).unwrap();
    conn.update_object("settings", "theme", &"dark").unwrap();

    let records = conn.export_json(&export).unwrap();
    assert_eq!(records, 2);

    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&export).unwrap()).unwrap();
    assert_eq!(doc["endpoints"][0]["key"], json!(1));
    assert_eq!(doc["endpoints"][0]["value"]["name"], json!("local"));
    assert_eq!(doc["settings"][0]["key"], json!("theme"));
    assert!(doc.get("__meta").is_none());
}

#[test]
fn export_renders_integer_keyed_maps() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("export.json");
    let conn = open(&store_path(&dir), None);

    let policies: BTreeMap<u32, &str> = [(7, "rw"), (9, "r")].into();
    conn.update_object("endpoints", 1u64, &policies).unwrap();
    assert_eq!(
        conn.get_object::<BTreeMap<u32, String>>("endpoints", 1u64)
            .unwrap()
            .unwrap()[&7],
        "rw"
    );

    assert_eq!(conn.export_json(&export).unwrap(), 1);

    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&export).unwrap()).unwrap();
    assert_eq!(doc["endpoints"][0]["key"], json!(1));
    assert_eq!(doc["endpoints"][0]["value"], json!({"7": "rw", "9": "r"}));
}

#[test]
fn encrypt_store_migrates_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    {
        let conn = open(&path, None);
        assert!(!conn.is_encrypted_store().unwrap());
        conn.create_object("users", &"alice").unwrap();
        conn.create_object("users", &"bob").unwrap();
        conn.close().unwrap();
    }

    let conn = open(&path, Some(b"secret"));
    assert!(conn.needs_encryption_migration().unwrap());
    let sealed = conn.encrypt_store().unwrap();
    assert!(sealed >= 2);
    assert!(conn.is_encrypted_store().unwrap());
    assert!(!conn.needs_encryption_migration().unwrap());
    assert_eq!(conn.encrypt_store().unwrap(), 0);

    assert_eq!(conn.get_object::<String>("users", 2u64).unwrap().as_deref(), Some("bob"));
    assert_eq!(conn.schema_version().unwrap(), 1);
    conn.close().unwrap();

    let plain = open(&path, None);
    let err = plain.get_object::<String>("users", 1u64).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptRecord);
}

#[test]
fn encrypt_store_needs_a_key() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(&store_path(&dir), None);
    let err = conn.encrypt_store().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
