use qfieldsync_core::{CloudError, UserInfo};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{api::CloudClient, persist::PersistError, preferences::PreferencesStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated { username: String },
}

/// Result of [`SessionController::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(UserInfo),
    /// Credentials must be entered. `reason` is set when a stored token was
    /// rejected.
    CredentialsRequired {
        last_username: Option<String>,
        reason: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Login failed: {0}")]
    Login(CloudError),
    #[error("Logout failed: {0}")]
    Logout(CloudError),
    #[error("failed to save preferences: {0}")]
    Preferences(#[from] PersistError),
}

/// Owns the transitions between unauthenticated, authenticating and
/// authenticated, and the token on the API client.
#[derive(Debug)]
pub struct SessionController {
    client: CloudClient,
    preferences: PreferencesStore,
    state_tx: watch::Sender<AuthState>,
}

impl SessionController {
    pub fn new(client: CloudClient, preferences: PreferencesStore) -> Self {
        let (state_tx, _) = watch::channel(AuthState::Unauthenticated);
        Self {
            client,
            preferences,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> AuthState {
        self.state_tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state(), AuthState::Authenticated { .. })
    }

    /// Reuses a remembered token when there is one.
    ///
    /// A rejected token is wiped from the preferences and the client before
    /// credentials are asked for.
    pub async fn authenticate(&self) -> Result<AuthOutcome, SessionError> {
        let Some(token) = self.preferences.last_token() else {
            self.set_state(AuthState::Unauthenticated);
            return Ok(AuthOutcome::CredentialsRequired {
                last_username: self.preferences.last_username(),
                reason: None,
            });
        };

        self.set_state(AuthState::Authenticating);
        self.client.set_token(Some(&token));

        match self.client.get_user().await {
            Ok(user) => {
                info!(username = %user.username, "reused stored token");
                self.set_state(AuthState::Authenticated {
                    username: user.username.clone(),
                });
                Ok(AuthOutcome::Authenticated(user))
            }
            Err(err) => {
                warn!("token reuse failed: {}", err);
                self.client.set_token(None);
                self.set_state(AuthState::Unauthenticated);
                self.preferences.set_last_token(None)?;
                Ok(AuthOutcome::CredentialsRequired {
                    last_username: self.preferences.last_username(),
                    reason: Some(format!("Token reuse failed: {err}")),
                })
            }
        }
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<String, SessionError> {
        self.set_state(AuthState::Authenticating);

        let reply = match self.client.login(username, password).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(username = %username, "login failed: {}", err);
                self.set_state(AuthState::Unauthenticated);
                return Err(SessionError::Login(err));
            }
        };

        let remembered = remember_me.then_some(reply.token.as_str());
        if let Err(err) = self.preferences.record_login(&reply.username, remembered) {
            warn!(username = %reply.username, "could not save login: {}", err);
            self.client.set_token(None);
            self.set_state(AuthState::Unauthenticated);
            return Err(err.into());
        }
        self.client.set_token(Some(&reply.token));

        info!(username = %reply.username, remember_me, "logged in");
        self.set_state(AuthState::Authenticated {
            username: reply.username.clone(),
        });
        Ok(reply.username)
    }

    /// On failure the session stays authenticated so logout can be retried.
    pub async fn logout(&self) -> Result<(), SessionError> {
        if let Err(err) = self.client.logout().await {
            warn!("logout failed: {}", err);
            return Err(SessionError::Logout(err));
        }

        self.client.set_token(None);
        self.preferences.set_last_token(None)?;
        self.set_state(AuthState::Unauthenticated);
        info!("logged out");
        Ok(())
    }

    fn set_state(&self, state: AuthState) {
        self.state_tx.send_replace(state);
    }
}
