use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod api;
pub mod checkout;
pub mod paths;
pub mod reply;
pub mod transfer;

pub use checkout::{
    CheckoutKind, CheckoutRejection, DirectoryInspection, PROJECT_FILE_EXTENSIONS, SyncChoice,
    is_project_file,
};
pub use paths::{remote_name_from_relative, validate_remote_name};
pub use reply::{CloudError, decode_reply, error_reason};
pub use transfer::{
    DownloadPolicy, LocalFile, TransferDirection, TransferPhase, TransferPlan, TransferState,
    TransferSummary, plan_downloads, plan_uploads,
};

pub type ProjectId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudProject {
    pub id: ProjectId,
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "private")]
    pub is_private: bool,
    /// Local checkout directory. Never part of the wire payload; resolved
    /// from the preferences store.
    #[serde(skip)]
    pub local_dir: Option<PathBuf>,
}

impl CloudProject {
    pub fn is_checked_out(&self) -> bool {
        self.local_dir.is_some()
    }

    /// Applies the editable fields of a form submission.
    pub fn apply_payload(&mut self, payload: &ProjectPayload) {
        self.name = payload.name.clone();
        self.owner = payload.owner.clone();
        self.description = payload.description.clone();
        self.is_private = payload.is_private;
    }
}

/// Body of create/update project requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectPayload {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "private")]
    pub is_private: bool,
}

impl From<&CloudProject> for ProjectPayload {
    fn from(project: &CloudProject) -> Self {
        Self {
            name: project.name.clone(),
            owner: project.owner.clone(),
            description: project.description.clone(),
            is_private: project.is_private,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFileVersion {
    pub size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
    /// Oldest first.
    #[serde(default)]
    pub versions: Vec<RemoteFileVersion>,
}

impl RemoteFile {
    pub fn current_version(&self) -> Option<&RemoteFileVersion> {
        self.versions.last()
    }

    pub fn current_sha256(&self) -> Option<&str> {
        self.current_version().and_then(|v| v.sha256.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("cannot {action} while transfer is {from}")]
    InvalidTransition {
        from: TransferState,
        action: &'static str,
    },
    #[error("remote file name {0:?} is not a safe relative path")]
    UnsafeRemoteName(String),
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_payload_uses_private_key() {
        let json = r#"{"id":"p1","name":"Trees","owner":"ada","description":"survey","private":true}"#;
        let project: CloudProject = serde_json::from_str(json).unwrap();
        assert!(project.is_private);
        assert_eq!(project.local_dir, None);

        let payload = ProjectPayload::from(&project);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["private"], serde_json::json!(true));
        assert!(value.get("local_dir").is_none());
    }

    #[test]
    fn current_version_is_last() {
        let file: RemoteFile = serde_json::from_str(
            r#"{"name":"a.gpkg","size":3,"versions":[
                {"size":1,"created_at":"2020-08-01T10:00:00Z","sha256":"old"},
                {"size":3,"created_at":"2020-08-02T10:00:00Z","sha256":"new"}]}"#,
        )
        .unwrap();
        assert_eq!(file.current_sha256(), Some("new"));
        assert_eq!(file.current_version().map(|v| v.size), Some(3));
    }

    #[test]
    fn sha256_hex_is_lowercase_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
