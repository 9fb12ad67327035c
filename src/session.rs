use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{RwLock, broadcast};

use crate::{
    event::UiEvent,
    model::rbac::User,
    storage::{LocalStore, keys},
    sync::client::{ApiClient, ApiRequest, SyncError},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

/// Current user and token, mirrored into the local store.
#[derive(Clone)]
pub struct SessionManager {
    store: LocalStore,
    state: Arc<RwLock<Option<Session>>>,
    event_tx: broadcast::Sender<UiEvent>,
}

impl SessionManager {
    pub fn new(store: LocalStore, event_tx: broadcast::Sender<UiEvent>) -> Self {
        Self {
            store,
            state: Arc::new(RwLock::new(None)),
            event_tx,
        }
    }

    pub fn in_memory() -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self::new(LocalStore::in_memory(), event_tx)
    }

    /// Restores the session persisted by a previous run, if any.
    pub async fn load(&self) {
        let token = match self.store.get::<String>(keys::TOKEN).await {
            Some(token) => token,
            None => match self.store.get::<String>(keys::AUTH_TOKEN).await {
                Some(token) => token,
                None => return,
            },
        };
        let session = Session {
            token,
            refresh_token: self.store.get(keys::REFRESH_TOKEN).await,
            user: self.store.get(keys::USER).await,
        };
        log::info!(
            "Restored session for {}",
            session.user.as_ref().map_or("unknown user", |u| u.display_name())
        );
        *self.state.write().await = Some(session);
    }

    pub async fn current(&self) -> Option<Session> {
        self.state.read().await.clone()
    }

    pub async fn token(&self) -> Option<String> {
        self.state.read().await.as_ref().map(|s| s.token.clone())
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.state.read().await.as_ref().and_then(|s| s.refresh_token.clone())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.is_some()
    }

    pub async fn set(&self, session: Session) -> Result<(), anyhow::Error> {
        self.store.set(keys::TOKEN, &session.token).await?;
        self.store.set(keys::AUTH_TOKEN, &session.token).await?;
        match &session.refresh_token {
            Some(refresh) => self.store.set(keys::REFRESH_TOKEN, refresh).await?,
            None => self.store.remove(keys::REFRESH_TOKEN).await?,
        }
        match &session.user {
            Some(user) => {
                self.store.set(keys::USER, user).await?;
                self.store.set(keys::USER_ID, &user.id).await?;
            }
            None => {
                self.store.remove(keys::USER).await?;
                self.store.remove(keys::USER_ID).await?;
            }
        }

        *self.state.write().await = Some(session);
        self.notify(true);
        Ok(())
    }

    /// Replaces the bearer token, keeping the rest of the session.
    pub async fn update_token(&self, token: &str) -> Result<(), anyhow::Error> {
        self.store.set(keys::TOKEN, &token).await?;
        self.store.set(keys::AUTH_TOKEN, &token).await?;
        let mut state = self.state.write().await;
        match state.as_mut() {
            Some(session) => session.token = token.to_string(),
            None => {
                *state = Some(Session {
                    token: token.to_string(),
                    refresh_token: None,
                    user: None,
                })
            }
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), anyhow::Error> {
        for key in [keys::TOKEN, keys::AUTH_TOKEN, keys::REFRESH_TOKEN, keys::USER, keys::USER_ID] {
            self.store.remove(key).await?;
        }
        *self.state.write().await = None;
        self.notify(false);
        Ok(())
    }

    fn notify(&self, authenticated: bool) {
        if self.event_tx.send(UiEvent::SessionChanged { authenticated }).is_err() {
            log::trace!("No UI clients are listening to session events.");
        }
    }
}

/// True when the JWT's `exp` claim lies in the past. Tokens that cannot be
/// decoded count as expired.
pub fn token_expired(token: &str, now: DateTime<Utc>) -> bool {
    let Some(payload) = token.split('.').nth(1) else {
        return true;
    };
    let Ok(bytes) = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) else {
        return true;
    };
    let Ok(claims) = serde_json::from_slice::<Value>(&bytes) else {
        return true;
    };
    match claims.get("exp").and_then(Value::as_i64) {
        Some(exp) => exp < now.timestamp(),
        None => true,
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub organization_name: Option<String>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum AuthError {
    /// The auth backend answered with an error status.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    /// The auth backend was unreachable or sent an unreadable reply.
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Session(String),
}

impl AuthError {
    fn from_sync(e: SyncError, fallback: &str) -> Self {
        let message = e.message_or(fallback);
        match e {
            SyncError::Rejected { status, .. } => AuthError::Rejected { status, message },
            _ => AuthError::Unavailable(message),
        }
    }
}

/// Login, registration and password flows against `/auth/*`.
#[derive(Clone)]
pub struct AuthService {
    client: ApiClient,
}

impl AuthService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let request = ApiRequest::post("/auth/login", json!({ "email": email, "password": password }));
        let response: AuthResponse = self
            .client
            .send_json(&request)
            .await
            .map_err(|e| AuthError::from_sync(e, "Invalid credentials"))?;
        self.establish(response).await
    }

    pub async fn register(&self, registration: &Registration) -> Result<Session, AuthError> {
        let body = serde_json::to_value(registration).map_err(|e| AuthError::Session(e.to_string()))?;
        let response: AuthResponse = self
            .client
            .send_json(&ApiRequest::post("/auth/register", body))
            .await
            .map_err(|e| AuthError::from_sync(e, "Registration failed"))?;
        self.establish(response).await
    }

    pub async fn verify_phone(&self, user_id: &str, code: &str) -> Result<(), AuthError> {
        let request = ApiRequest::post("/auth/verify-phone", json!({ "userId": user_id, "code": code }));
        self.client
            .send(&request)
            .await
            .map_err(|e| AuthError::from_sync(e, "Invalid code"))
    }

    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let request = ApiRequest::post("/auth/forgot-password", json!({ "email": email }));
        self.client
            .send(&request)
            .await
            .map_err(|e| AuthError::from_sync(e, "Failed to send reset link"))
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> Result<(), AuthError> {
        let request = ApiRequest::post("/auth/reset-password", json!({ "token": token, "password": password }));
        self.client
            .send(&request)
            .await
            .map_err(|e| AuthError::from_sync(e, "Failed to reset password"))
    }

    pub async fn logout(&self) -> Result<(), anyhow::Error> {
        self.client.session().clear().await
    }

    async fn establish(&self, response: AuthResponse) -> Result<Session, AuthError> {
        let session = Session {
            token: response.token,
            refresh_token: response.refresh_token,
            user: response.user,
        };
        self.client
            .session()
            .set(session.clone())
            .await
            .map_err(|e| AuthError::Session(e.to_string()))?;
        Ok(session)
    }
}
