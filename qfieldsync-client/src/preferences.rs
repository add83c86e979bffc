use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use qfieldsync_core::ProjectId;
use serde::{Deserialize, Serialize};

use crate::persist::{self, PersistError};

pub const PREFERENCES_FILE_NAME: &str = "preferences.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Preferences {
    /// Persisted only when the user asked to be remembered.
    #[serde(rename = "qfieldCloudLastToken", default)]
    pub last_token: Option<String>,
    #[serde(rename = "qfieldCloudLastUsername", default)]
    pub last_username: Option<String>,
    #[serde(rename = "qfieldCloudProjectLocalDirs", default)]
    pub project_local_dirs: BTreeMap<ProjectId, PathBuf>,
}

pub fn parse_preferences_json(data: &str) -> Result<Preferences, serde_json::Error> {
    serde_json::from_str::<Preferences>(data)
}

/// File-backed preferences shared by the session, catalog and checkout.
///
/// Every setter writes the whole file before returning.
#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
    current: Arc<Mutex<Preferences>>,
}

impl PreferencesStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        let current = persist::load_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            current: Arc::new(Mutex::new(current)),
        })
    }

    /// Like [`PreferencesStore::open`], but starts empty when the file is unreadable.
    pub fn open_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::open(path.clone()) {
            Ok(store) => store,
            Err(err) => {
                tracing::warn!("preferences unreadable, starting empty: {}", err);
                Self {
                    path,
                    current: Arc::new(Mutex::new(Preferences::default())),
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_token(&self) -> Option<String> {
        self.lock()
            .last_token
            .clone()
            .filter(|token| !token.is_empty())
    }

    pub fn set_last_token(&self, token: Option<&str>) -> Result<(), PersistError> {
        self.update(|prefs| prefs.last_token = token.map(str::to_owned))
    }

    pub fn last_username(&self) -> Option<String> {
        self.lock()
            .last_username
            .clone()
            .filter(|username| !username.is_empty())
    }

    /// Saves the username, and the token when it should be remembered, in a
    /// single write.
    pub fn record_login(&self, username: &str, token: Option<&str>) -> Result<(), PersistError> {
        self.update(|prefs| {
            prefs.last_username = Some(username.to_owned());
            if let Some(token) = token {
                prefs.last_token = Some(token.to_owned());
            }
        })
    }

    pub fn local_dir(&self, project_id: &str) -> Option<PathBuf> {
        self.lock().project_local_dirs.get(project_id).cloned()
    }

    pub fn set_local_dir(&self, project_id: &str, dir: &Path) -> Result<(), PersistError> {
        self.update(|prefs| {
            prefs
                .project_local_dirs
                .insert(project_id.to_owned(), dir.to_owned());
        })
    }

    fn update(&self, apply: impl FnOnce(&mut Preferences)) -> Result<(), PersistError> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        apply(&mut next);
        persist::save_json_with_retry(&self.path, &next)?;
        *guard = next;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Preferences> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_plugin_settings_names() {
        let prefs = parse_preferences_json(
            r#"{"qfieldCloudLastToken":"abc","qfieldCloudLastUsername":"ada"}"#,
        )
        .unwrap();
        assert_eq!(prefs.last_token.as_deref(), Some("abc"));
        assert_eq!(prefs.last_username.as_deref(), Some("ada"));
        assert!(prefs.project_local_dirs.is_empty());
    }

    #[test]
    fn empty_token_reads_as_none() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let store = PreferencesStore::open(dir.path().join(PREFERENCES_FILE_NAME)).unwrap();
        store.set_last_token(Some("")).unwrap();
        assert_eq!(store.last_token(), None);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join(PREFERENCES_FILE_NAME);

        let store = PreferencesStore::open(&path).unwrap();
        store.record_login("ada", Some("tok")).unwrap();
        store
            .set_local_dir("p1", Path::new("/data/trees"))
            .unwrap();

        let reopened = PreferencesStore::open(&path).unwrap();
        assert_eq!(reopened.last_token().as_deref(), Some("tok"));
        assert_eq!(reopened.last_username().as_deref(), Some("ada"));
        assert_eq!(
            reopened.local_dir("p1").as_deref(),
            Some(Path::new("/data/trees"))
        );
        assert_eq!(reopened.local_dir("p2"), None);
    }
}
