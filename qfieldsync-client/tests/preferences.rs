use std::{io::Write, path::Path};

use qfieldsync_client::{
    config::{ConfigOverrides, resolve_config},
    persist::MAX_SAVED_FILE_BYTES,
    preferences::{PREFERENCES_FILE_NAME, PreferencesStore},
};

#[test]
fn oversized_preferences_are_refused() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join(PREFERENCES_FILE_NAME);

    let mut file = std::fs::File::create(&path).expect("create preferences.json");
    file.write_all(&vec![b'a'; (MAX_SAVED_FILE_BYTES as usize) + 1024])
        .expect("write oversized preferences.json");
    drop(file);

    let err = PreferencesStore::open(&path).expect_err("oversized file should error");
    let msg = err.to_string();
    assert!(msg.contains("too large"), "unexpected error: {msg}");

    let store = PreferencesStore::open_or_default(&path);
    assert_eq!(store.last_token(), None);
}

#[test]
fn local_dirs_survive_a_restart() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("nested").join(PREFERENCES_FILE_NAME);

    let store = PreferencesStore::open(&path).expect("open empty");
    store
        .set_local_dir("p-1", Path::new("/data/trees"))
        .expect("save local dir");
    store.record_login("ada", None).expect("save username");

    let reopened = PreferencesStore::open(&path).expect("reopen");
    assert_eq!(
        reopened.local_dir("p-1").as_deref(),
        Some(Path::new("/data/trees"))
    );
    assert_eq!(reopened.last_username().as_deref(), Some("ada"));
    assert_eq!(reopened.local_dir("p-2"), None);

    let raw = std::fs::read_to_string(&path).expect("read preferences");
    assert!(raw.contains("qfieldCloudProjectLocalDirs"), "{raw}");
}

#[test]
fn invalid_server_url_override_is_reported() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let err = resolve_config(&ConfigOverrides {
        server_url: Some("ftp://cloud.example".to_owned()),
        timeout_secs: None,
        config_dir: Some(dir.path().to_owned()),
    })
    .expect_err("ftp is not accepted");
    assert!(err.to_string().contains("http://"), "unexpected error: {err}");
    assert!(!dir.path().join("config.json").exists());
}
