use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use qfieldsync_core::{
    CloudProject, ErrorBody, LoginRequest, LoginResponse, ProjectId, ProjectPayload, RemoteFile,
    RemoteFileVersion, UserInfo, api, sha256_hex, validate_remote_name,
};
use rand::Rng;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{info, warn};

pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
pub const MAX_PROJECT_NAME_LEN: usize = 255;
const TOKEN_BYTES: usize = 20;

#[derive(Debug, Clone)]
struct UserRecord {
    password: String,
    email: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredVersion {
    content: Bytes,
    created_at: DateTime<Utc>,
    sha256: String,
}

#[derive(Debug, Clone)]
struct ProjectRecord {
    project: CloudProject,
    files: BTreeMap<String, Vec<StoredVersion>>,
}

impl ProjectRecord {
    fn remote_file(name: &str, versions: &[StoredVersion]) -> RemoteFile {
        RemoteFile {
            name: name.to_owned(),
            size: versions
                .last()
                .map(|v| v.content.len() as u64)
                .unwrap_or_default(),
            versions: versions
                .iter()
                .map(|v| RemoteFileVersion {
                    size: v.content.len() as u64,
                    created_at: v.created_at,
                    sha256: Some(v.sha256.clone()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct CloudState {
    users: HashMap<String, UserRecord>,
    /// token -> username
    tokens: HashMap<String, String>,
    projects: BTreeMap<ProjectId, ProjectRecord>,
}

impl CloudState {
    fn visible_project(&self, project_id: &str, username: &str) -> Result<&ProjectRecord, ApiError> {
        match self.projects.get(project_id) {
            Some(record) if record.project.owner == username || !record.project.is_private => {
                Ok(record)
            }
            _ => Err(ApiError::NotFound("Project not found.")),
        }
    }

    fn owned_project_mut(
        &mut self,
        project_id: &str,
        username: &str,
    ) -> Result<&mut ProjectRecord, ApiError> {
        let record = self
            .projects
            .get_mut(project_id)
            .ok_or(ApiError::NotFound("Project not found."))?;
        if record.project.owner == username {
            Ok(record)
        } else if record.project.is_private {
            Err(ApiError::NotFound("Project not found."))
        } else {
            Err(ApiError::Forbidden(
                "You do not have permission to perform this action.".to_owned(),
            ))
        }
    }

    fn name_taken(&self, owner: &str, name: &str, except: Option<&str>) -> bool {
        self.projects.values().any(|record| {
            record.project.owner == owner
                && record.project.name.eq_ignore_ascii_case(name)
                && Some(record.project.id.as_str()) != except
        })
    }
}

/// In-memory QFieldCloud-compatible service state.
#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<CloudState>>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(CloudState::default())),
        }
    }

    #[must_use]
    pub fn with_users<I, U, P>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let mut state = CloudState::default();
        for (username, password) in users {
            state.users.insert(
                username.into(),
                UserRecord {
                    password: password.into(),
                    email: None,
                },
            );
        }
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Drops every issued token, as a server-side session expiry would.
    pub async fn revoke_all_tokens(&self) {
        self.inner.write().await.tokens.clear();
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum ApiError {
    Unauthorized,
    BadCredentials,
    NotFound(&'static str),
    Forbidden(String),
    Invalid {
        field: &'static str,
        message: String,
    },
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => detail(
                StatusCode::UNAUTHORIZED,
                "Authentication credentials were not provided or are invalid.",
            ),
            ApiError::BadCredentials => detail(
                StatusCode::BAD_REQUEST,
                "Unable to log in with provided credentials.",
            ),
            ApiError::NotFound(message) => detail(StatusCode::NOT_FOUND, message),
            ApiError::Forbidden(message) => detail(StatusCode::FORBIDDEN, &message),
            ApiError::BadRequest(message) => detail(StatusCode::BAD_REQUEST, &message),
            ApiError::Invalid { field, message } => {
                let mut errors = serde_json::Map::new();
                errors.insert(field.to_owned(), serde_json::json!([message]));
                (StatusCode::BAD_REQUEST, Json(serde_json::Value::Object(errors))).into_response()
            }
        }
    }
}

fn detail(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            detail: message.to_owned(),
        }),
    )
        .into_response()
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(api::LOGIN_PATH, post(login_handler))
        .route(api::LOGOUT_PATH, post(logout_handler))
        .route(api::USER_PATH, get(user_handler))
        .route(
            api::PROJECTS_PATH,
            get(list_projects_handler).post(create_project_handler),
        )
        .route(
            "/api/v1/projects/{project_id}/",
            patch(update_project_handler)
                .get(get_project_handler)
                .delete(delete_project_handler),
        )
        .route("/api/v1/files/{project_id}/", get(list_files_handler))
        .route(
            "/api/v1/files/{project_id}/{*name}",
            get(download_file_handler).post(upload_file_handler),
        )
        .route("/healthz", get(healthz_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "cloud listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(api::parse_authorization)
        .ok_or(ApiError::Unauthorized)?;

    state
        .inner
        .read()
        .await
        .tokens
        .get(token)
        .cloned()
        .ok_or(ApiError::Unauthorized)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(api::parse_authorization)
        .map(str::to_owned)
}

fn new_token() -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let mut cloud = state.inner.write().await;
    let valid = cloud
        .users
        .get(&request.username)
        .is_some_and(|user| user.password == request.password);
    if !valid {
        warn!(username = %request.username, "login rejected");
        return Err(ApiError::BadCredentials);
    }

    let token = new_token();
    cloud
        .tokens
        .insert(token.clone(), request.username.clone());
    info!(username = %request.username, "login");
    Ok(Json(LoginResponse {
        token,
        username: request.username,
    }))
}

async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ErrorBody>, ApiError> {
    let username = authorize(&state, &headers).await?;
    if let Some(token) = bearer_token(&headers) {
        state.inner.write().await.tokens.remove(&token);
    }
    info!(username = %username, "logout");
    Ok(Json(ErrorBody {
        detail: "Successfully logged out.".to_owned(),
    }))
}

async fn user_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserInfo>, ApiError> {
    let username = authorize(&state, &headers).await?;
    let cloud = state.inner.read().await;
    let email = cloud.users.get(&username).and_then(|u| u.email.clone());
    Ok(Json(UserInfo { username, email }))
}

async fn list_projects_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<CloudProject>>, ApiError> {
    let username = authorize(&state, &headers).await?;
    let cloud = state.inner.read().await;
    let projects = cloud
        .projects
        .values()
        .filter(|record| record.project.owner == username || !record.project.is_private)
        .map(|record| record.project.clone())
        .collect();
    Ok(Json(projects))
}

fn validate_payload(username: &str, payload: &ProjectPayload) -> Result<(), ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::Invalid {
            field: "name",
            message: "This field may not be blank.".to_owned(),
        });
    }
    if name.len() > MAX_PROJECT_NAME_LEN {
        return Err(ApiError::Invalid {
            field: "name",
            message: format!("Ensure this field has no more than {MAX_PROJECT_NAME_LEN} characters."),
        });
    }
    if payload.owner != username {
        return Err(ApiError::Forbidden(
            "Projects can only be owned by the requesting user.".to_owned(),
        ));
    }
    Ok(())
}

async fn create_project_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ProjectPayload>,
) -> Result<(StatusCode, Json<CloudProject>), ApiError> {
    let username = authorize(&state, &headers).await?;
    validate_payload(&username, &payload)?;

    let mut cloud = state.inner.write().await;
    if cloud.name_taken(&payload.owner, payload.name.trim(), None) {
        return Err(ApiError::Invalid {
            field: "name",
            message: "Project with this name already exists.".to_owned(),
        });
    }

    let project = CloudProject {
        id: uuid::Uuid::new_v4().to_string(),
        name: payload.name.trim().to_owned(),
        owner: payload.owner,
        description: payload.description,
        is_private: payload.is_private,
        local_dir: None,
    };
    cloud.projects.insert(
        project.id.clone(),
        ProjectRecord {
            project: project.clone(),
            files: BTreeMap::new(),
        },
    );
    info!(project_id = %project.id, name = %project.name, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<CloudProject>, ApiError> {
    let username = authorize(&state, &headers).await?;
    let cloud = state.inner.read().await;
    let record = cloud.visible_project(&project_id, &username)?;
    Ok(Json(record.project.clone()))
}

async fn update_project_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(payload): Json<ProjectPayload>,
) -> Result<Json<CloudProject>, ApiError> {
    let username = authorize(&state, &headers).await?;
    validate_payload(&username, &payload)?;

    let mut cloud = state.inner.write().await;
    if cloud.name_taken(&payload.owner, payload.name.trim(), Some(&project_id)) {
        return Err(ApiError::Invalid {
            field: "name",
            message: "Project with this name already exists.".to_owned(),
        });
    }

    let record = cloud.owned_project_mut(&project_id, &username)?;
    record.project.apply_payload(&payload);
    record.project.name = record.project.name.trim().to_owned();
    info!(project_id = %project_id, "project updated");
    Ok(Json(record.project.clone()))
}

async fn delete_project_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let username = authorize(&state, &headers).await?;
    let mut cloud = state.inner.write().await;
    cloud.owned_project_mut(&project_id, &username)?;
    cloud.projects.remove(&project_id);
    info!(project_id = %project_id, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_files_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<RemoteFile>>, ApiError> {
    let username = authorize(&state, &headers).await?;
    let cloud = state.inner.read().await;
    let record = cloud.visible_project(&project_id, &username)?;
    let files = record
        .files
        .iter()
        .map(|(name, versions)| ProjectRecord::remote_file(name, versions))
        .collect();
    Ok(Json(files))
}

async fn upload_file_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, name)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<RemoteFile>), ApiError> {
    let username = authorize(&state, &headers).await?;
    validate_remote_name(&name).map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let mut cloud = state.inner.write().await;
    let record = cloud.owned_project_mut(&project_id, &username)?;
    let versions = record.files.entry(name.clone()).or_default();
    versions.push(StoredVersion {
        sha256: sha256_hex(&body),
        created_at: Utc::now(),
        content: body,
    });
    info!(
        project_id = %project_id,
        file = %name,
        versions = versions.len(),
        "file uploaded"
    );
    Ok((
        StatusCode::CREATED,
        Json(ProjectRecord::remote_file(&name, versions)),
    ))
}

async fn download_file_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let username = authorize(&state, &headers).await?;
    let cloud = state.inner.read().await;
    let record = cloud.visible_project(&project_id, &username)?;
    let content = record
        .files
        .get(&name)
        .and_then(|versions| versions.last())
        .map(|version| version.content.clone())
        .ok_or(ApiError::NotFound("File not found."))?;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        content,
    )
        .into_response())
}
