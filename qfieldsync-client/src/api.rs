use std::sync::{Arc, PoisonError, RwLock};

use qfieldsync_core::{
    CloudError, CloudProject, LoginRequest, LoginResponse, ProjectPayload, RemoteFile, UserInfo,
    api, decode_reply, error_reason,
};
use reqwest::{Client, Method, RequestBuilder, header};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;

const USER_AGENT: &str = concat!("qfieldsync/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the cloud REST API.
///
/// Clones share the auth token, so a login through one handle is seen by all.
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: Client,
    base_url: Url,
    token: Arc<RwLock<Option<String>>>,
}

impl CloudClient {
    pub fn new(config: &ClientConfig) -> Result<Self, CloudError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| CloudError::Transport(err.to_string()))?;

        let mut base_url = config.server_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http,
            base_url,
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `None` or an empty token resets the client to anonymous.
    pub fn set_token(&self, token: Option<&str>) {
        let mut slot = self.token.write().unwrap_or_else(PoisonError::into_inner);
        *slot = token.filter(|t| !t.is_empty()).map(str::to_owned);
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, CloudError> {
        let request = self
            .request(Method::POST, api::LOGIN_PATH)?
            .json(&LoginRequest {
                username: username.to_owned(),
                password: password.to_owned(),
            });
        self.send_json(request).await
    }

    pub async fn logout(&self) -> Result<(), CloudError> {
        let request = self.request(Method::POST, api::LOGOUT_PATH)?;
        self.send_empty(request).await
    }

    pub async fn get_user(&self) -> Result<UserInfo, CloudError> {
        let request = self.request(Method::GET, api::USER_PATH)?;
        self.send_json(request).await
    }

    pub async fn list_projects(&self) -> Result<Vec<CloudProject>, CloudError> {
        let request = self.request(Method::GET, api::PROJECTS_PATH)?;
        self.send_json(request).await
    }

    pub async fn create_project(&self, payload: &ProjectPayload) -> Result<CloudProject, CloudError> {
        let request = self.request(Method::POST, api::PROJECTS_PATH)?.json(payload);
        self.send_json(request).await
    }

    pub async fn update_project(
        &self,
        project_id: &str,
        payload: &ProjectPayload,
    ) -> Result<CloudProject, CloudError> {
        let request = self
            .request(Method::PATCH, &api::project_path(project_id))?
            .json(payload);
        self.send_json(request).await
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<(), CloudError> {
        let request = self.request(Method::DELETE, &api::project_path(project_id))?;
        self.send_empty(request).await
    }

    pub async fn list_files(&self, project_id: &str) -> Result<Vec<RemoteFile>, CloudError> {
        let request = self.request(Method::GET, &api::files_path(project_id))?;
        self.send_json(request).await
    }

    pub async fn upload_file(
        &self,
        project_id: &str,
        name: &str,
        content: Vec<u8>,
    ) -> Result<RemoteFile, CloudError> {
        let url = self.file_url(project_id, name)?;
        let request = self
            .authorize(self.http.post(url))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(content);
        self.send_json(request).await
    }

    pub async fn download_file(&self, project_id: &str, name: &str) -> Result<Vec<u8>, CloudError> {
        let url = self.file_url(project_id, name)?;
        let request = self.authorize(self.http.get(url));
        let (status, body) = self.send(request).await?;
        if !(200..300).contains(&status) {
            return Err(CloudError::Http {
                status,
                reason: error_reason(status, &body),
            });
        }
        Ok(body)
    }

    fn endpoint(&self, path: &str) -> Result<Url, CloudError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| CloudError::Transport(format!("invalid request url: {err}")))
    }

    fn file_url(&self, project_id: &str, name: &str) -> Result<Url, CloudError> {
        let mut url = self.endpoint(&api::files_path(project_id))?;
        url.path_segments_mut()
            .map_err(|_| CloudError::Transport("server url cannot be a base".to_owned()))?
            .pop_if_empty()
            .extend(name.split('/'));
        Ok(url)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, CloudError> {
        let url = self.endpoint(path)?;
        Ok(self.authorize(self.http.request(method, url)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token() {
            Some(token) => request.header(header::AUTHORIZATION, api::authorization_value(&token)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<(u16, Vec<u8>), CloudError> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status().as_u16();
        debug!(status, url = %response.url(), "reply finished");
        let body = response.bytes().await.map_err(map_transport_error)?;
        Ok((status, body.to_vec()))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CloudError> {
        let (status, body) = self.send(request).await?;
        decode_reply(status, &body)
    }

    /// For endpoints whose success body carries nothing we need.
    async fn send_empty(&self, request: RequestBuilder) -> Result<(), CloudError> {
        let (status, body) = self.send(request).await?;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(CloudError::Http {
                status,
                reason: error_reason(status, &body),
            })
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> CloudError {
    if err.is_timeout() {
        CloudError::Timeout
    } else {
        CloudError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use super::*;

    fn client(server_url: &str) -> CloudClient {
        CloudClient::new(&ClientConfig {
            server_url: Url::parse(server_url).unwrap(),
            request_timeout: Duration::from_secs(5),
            config_dir: PathBuf::from("."),
        })
        .unwrap()
    }

    #[test]
    fn endpoints_keep_base_path() {
        let client = client("https://cloud.example/qfield");
        assert_eq!(
            client.endpoint(api::PROJECTS_PATH).unwrap().as_str(),
            "https://cloud.example/qfield/api/v1/projects/"
        );
    }

    #[test]
    fn file_urls_encode_each_segment() {
        let client = client("http://127.0.0.1:8000");
        let url = client.file_url("p1", "DCIM/my photo.jpg").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8000/api/v1/files/p1/DCIM/my%20photo.jpg"
        );
    }

    #[test]
    fn token_is_shared_between_clones() {
        let client = client("http://127.0.0.1:8000");
        let clone = client.clone();
        client.set_token(Some("abc"));
        assert_eq!(clone.token().as_deref(), Some("abc"));
        clone.set_token(Some(""));
        assert_eq!(client.token(), None);
    }
}
