//! JsonFileStore against real files

use astro_store::{fields, JsonFileStore, Juid, RecordKind, RecordStore, StoreError};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

fn session_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let db = json!({
        "session": [],
        "exposures": [
            { "juid": 2000001, "filename": "/img/v1.fits", "target": "rr-lyr" },
            { "juid": 2000002, "filename": "/img/v2.fits", "target": "rr-lyr" }
        ],
        "stacks": [
            { "juid": 6000001, "filename": "/img/stack_v.fits", "source": [2000001, 2000002], "tstamp": 100 }
        ],
        "directives": [
            { "juid": 7000001, "stack_excl": [2000002] }
        ],
        "sets": [
            { "juid": 5000001, "stype": "TARGET", "target": "rr-lyr", "input": [6000001] }
        ]
    });
    fs::write(
        dir.path().join(JsonFileStore::FILE_NAME),
        serde_json::to_vec_pretty(&db).unwrap(),
    )
    .unwrap();
    dir
}

#[test]
fn loads_collections_on_first_reactivate() {
    let dir = session_dir();
    let mut store = JsonFileStore::in_session_dir(dir.path());

    assert!(store.reactivate().unwrap());
    assert!(store.is_active());
    assert_eq!(store.fetch_all_of_type(RecordKind::Image).len(), 2);
    assert_eq!(store.fetch_all_of_type(RecordKind::InstMag).len(), 0);

    let directive = store.find_by_id(Juid(7_000_001)).unwrap();
    assert_eq!(
        directive.get_ids(fields::STACK_EXCL),
        Some(vec![Juid(2_000_002)])
    );
    store.sync_and_release().unwrap();
    assert!(!store.is_active());
}

#[test]
fn own_writes_are_not_external_change() {
    let dir = session_dir();
    let mut store = JsonFileStore::in_session_dir(dir.path());

    store.reactivate().unwrap();
    store
        .set_field(Juid(6_000_001), fields::INCLUDED, json!([2000001]))
        .unwrap();
    store.sync_and_release().unwrap();

    assert!(!store.reactivate().unwrap());
    let stack = store.find_by_id(Juid(6_000_001)).unwrap();
    assert_eq!(stack.get_ids(fields::INCLUDED), Some(vec![Juid(2_000_001)]));
    store.sync_and_release().unwrap();

    // The write reached the file
    let on_disk: Value =
        serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
    assert_eq!(on_disk["stacks"][0]["included"], json!([2000001]));
}

#[test]
fn external_edit_is_detected() {
    let dir = session_dir();
    let mut store = JsonFileStore::in_session_dir(dir.path());
    store.reactivate().unwrap();
    store.sync_and_release().unwrap();

    let path = dir.path().join(JsonFileStore::FILE_NAME);
    let mut doc: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    doc["stacks"][0]["tstamp"] = json!(250);
    fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

    assert!(store.reactivate().unwrap());
    let stack = store.find_by_id(Juid(6_000_001)).unwrap();
    assert_eq!(stack.get_int(fields::TSTAMP), Some(250));
}

#[test]
fn malformed_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(JsonFileStore::FILE_NAME), b"[1, 2, 3]").unwrap();
    let mut store = JsonFileStore::in_session_dir(dir.path());
    assert!(matches!(
        store.reactivate(),
        Err(StoreError::Malformed { .. })
    ));
    assert!(!store.is_active());
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = JsonFileStore::in_session_dir(dir.path());
    assert!(matches!(store.reactivate(), Err(StoreError::Io { .. })));
    assert!(matches!(store.sync_and_release(), Err(StoreError::NotActive)));
}
