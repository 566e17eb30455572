/**
 * ============================================================================
 * REMOTE ACCOUNT SERVICE
 * ============================================================================
 *
 * PURPOSE: Accounts, sessions and profiles on the hosted backend
 *
 * ENDPOINTS:
 * - POST  /auth/v1/signup                      {"email", "password"}
 * - POST  /auth/v1/token?grant_type=password   {"email", "password"}
 * - POST  /auth/v1/logout                      (Bearer access token)
 * - GET   /rest/v1/users?user_id=eq.<id>       single profile row
 * - PATCH /rest/v1/users?user_id=eq.<id>       {"nickname"}
 * - POST  /rest/v1/users                       {"user_id", "nickname"}
 *
 * Every request carries the project's anon key as `apikey`; authenticated
 * requests add `Authorization: Bearer <access_token>`.
 *
 * SESSION LIFECYCLE:
 * - Cached in memory and, when a blob store is given, in the `session` slot
 * - Rehydrated on construction, dropped once expired
 * - No refresh-token exchange; an expired session means signing in again
 *
 * ============================================================================
 */

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use log::{debug, info, warn};

use super::{AccountService, Profile, ProfileUpdate, Session, User};
use crate::config::AccountSettings;
use crate::error::AppError;
use crate::storage::BlobStore;

pub const SESSION_SLOT: &str = "session";
const PROFILE_TABLE: &str = "users";
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// Sign-up answers with either a bare user or, when the backend confirms
/// the address on its own, a session wrapping one
#[derive(Debug, Deserialize)]
struct SignUpResponse {
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl SignUpResponse {
    fn into_parts(self) -> Option<(User, Option<Session>)> {
        let user = match (self.user, self.id) {
            (Some(user), _) => user,
            (None, Some(id)) => User {
                id,
                email: self.email.unwrap_or_default(),
            },
            (None, None) => return None,
        };

        let session = match (self.access_token, self.expires_in) {
            (Some(access_token), Some(expires_in)) => Some(
                TokenResponse {
                    access_token,
                    refresh_token: self.refresh_token,
                    expires_in,
                    user: user.clone(),
                }
                .into_session(),
            ),
            _ => None,
        };
        Some((user, session))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            user: self.user,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Utc::now() + Duration::seconds(self.expires_in),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    id: serde_json::Value,
    user_id: String,
    #[serde(default)]
    nickname: Option<String>,
    created_at: chrono::DateTime<Utc>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        let id = match row.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Profile {
            id,
            user_id: row.user_id,
            nickname: row.nickname,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct NewProfileRow<'a> {
    user_id: &'a str,
    nickname: Option<&'a str>,
}

/// Pull the human-readable message out of an error body
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["msg", "message", "error_description", "error"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }

    let body = body.trim();
    if body.is_empty() {
        format!("Request failed with status {}", status)
    } else {
        body.to_string()
    }
}

async fn check(response: Response) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        warn!("[ACCOUNT] Received 401 Unauthorized - token may be expired or invalid");
    }
    Err(AppError::RemoteService(error_message(status, &body)))
}

fn transport(e: reqwest::Error) -> AppError {
    AppError::RemoteService(format!("Network error: {}", e))
}

/// `AccountService` backed by the hosted auth/REST API
pub struct RemoteAccountService {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: Mutex<Option<Session>>,
    session_tx: watch::Sender<Option<Session>>,
    persistence: Option<Arc<dyn BlobStore>>,
}

impl RemoteAccountService {
    pub fn new(settings: &AccountSettings, persistence: Option<Arc<dyn BlobStore>>) -> Result<Self, AppError> {
        if settings.url.trim().is_empty() {
            return Err(AppError::Config("account.url is required for the remote backend".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let session = persistence.as_deref().and_then(|store| restore_session(store));
        let (session_tx, _) = watch::channel(session.clone());

        info!("[ACCOUNT] Remote backend at {}", settings.url);
        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            anon_key: settings.anon_key.clone(),
            session: Mutex::new(session),
            session_tx,
            persistence,
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn cached(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bearer(&self) -> String {
        self.cached()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.bearer()))
    }

    fn set_session(&self, session: Option<Session>) {
        *self.cached() = session.clone();

        if let Some(store) = &self.persistence {
            let result = match &session {
                Some(session) => serde_json::to_string(session)
                    .map_err(|e| AppError::Storage(e.to_string()))
                    .and_then(|json| store.write(SESSION_SLOT, &json)),
                None => store.remove(SESSION_SLOT),
            };
            if let Err(e) = result {
                warn!("[ACCOUNT] Failed to persist session: {}", e);
            }
        }

        self.session_tx.send_replace(session);
    }

    fn profile_query(user_id: &str) -> [(&'static str, String); 2] {
        [("user_id", format!("eq.{}", user_id)), ("select", "*".to_string())]
    }
}

fn restore_session(store: &dyn BlobStore) -> Option<Session> {
    let json = match store.read(SESSION_SLOT) {
        Ok(Some(json)) => json,
        Ok(None) => return None,
        Err(e) => {
            warn!("[ACCOUNT] Failed to read saved session: {}", e);
            return None;
        }
    };

    match serde_json::from_str::<Session>(&json) {
        Ok(session) if !session.is_expired() => {
            debug!("[ACCOUNT] Restored session for user {}", session.user.id);
            Some(session)
        }
        Ok(_) => {
            debug!("[ACCOUNT] Saved session has expired");
            None
        }
        Err(e) => {
            warn!("[ACCOUNT] Ignoring unreadable saved session: {}", e);
            None
        }
    }
}

#[async_trait]
impl AccountService for RemoteAccountService {
    async fn create_account(&self, email: &str, password: &str) -> Result<User, AppError> {
        info!("[ACCOUNT] Creating account for {}", email);
        let response = self
            .with_headers(self.client.post(self.auth_url("signup")))
            .json(&Credentials { email, password })
            .send()
            .await
            .map_err(transport)?;

        let body: SignUpResponse = check(response).await?.json().await.map_err(transport)?;
        let (user, session) = body
            .into_parts()
            .ok_or_else(|| AppError::RemoteService("User registration failed".to_string()))?;

        // Auto-confirmed sign-ups are signed in; later requests act as the user
        if let Some(session) = session {
            info!("[ACCOUNT] Signed in on registration, session expires at {}", session.expires_at);
            self.set_session(Some(session));
        }
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AppError> {
        info!("[ACCOUNT] Signing in {}", email);
        let response = self
            .with_headers(self.client.post(self.auth_url("token")))
            .query(&[("grant_type", "password")])
            .json(&Credentials { email, password })
            .send()
            .await
            .map_err(transport)?;

        let token: TokenResponse = check(response).await?.json().await.map_err(transport)?;
        let session = token.into_session();
        self.set_session(Some(session.clone()));
        info!("[ACCOUNT] Signed in, session expires at {}", session.expires_at);
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        let had_session = self.cached().is_some();
        let request = self.with_headers(self.client.post(self.auth_url("logout")));

        // The local session is gone even if the backend call fails
        self.set_session(None);
        if !had_session {
            return Ok(());
        }

        let response = request.send().await.map_err(transport)?;
        check(response).await?;
        info!("[ACCOUNT] Signed out");
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, AppError> {
        let session = self.cached().clone();
        match session {
            Some(session) if session.is_expired() => {
                info!("[ACCOUNT] Session expired");
                self.set_session(None);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session_tx.subscribe()
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, AppError> {
        let response = self
            .with_headers(self.client.get(self.rest_url(PROFILE_TABLE)))
            .query(&Self::profile_query(user_id))
            .header("Accept", SINGLE_OBJECT)
            .send()
            .await
            .map_err(transport)?;

        let row: ProfileRow = check(response).await?.json().await.map_err(transport)?;
        Ok(row.into())
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), AppError> {
        let response = self
            .with_headers(self.client.patch(self.rest_url(PROFILE_TABLE)))
            .query(&[("user_id", format!("eq.{}", user_id))])
            .header("Prefer", "return=minimal")
            .json(update)
            .send()
            .await
            .map_err(transport)?;

        check(response).await?;
        Ok(())
    }

    async fn create_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile, AppError> {
        let row = NewProfileRow {
            user_id,
            nickname: update.nickname.as_deref(),
        };
        let response = self
            .with_headers(self.client.post(self.rest_url(PROFILE_TABLE)))
            .header("Prefer", "return=representation")
            .header("Accept", SINGLE_OBJECT)
            .json(&row)
            .send()
            .await
            .map_err(transport)?;

        let row: ProfileRow = check(response).await?.json().await.map_err(transport)?;
        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AuthFlow;
    use crate::storage::MemoryBlobStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn settings() -> AccountSettings {
        AccountSettings {
            url: "https://project.example.co/".to_string(),
            anon_key: "anon".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_error_message_extraction() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(
            error_message(status, r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message(status, r#"{"msg":"User already registered"}"#), "User already registered");
        assert_eq!(error_message(status, "plain failure"), "plain failure");
        assert_eq!(error_message(status, ""), "Request failed with status 400 Bad Request");
    }

    #[test]
    fn test_sign_up_response_shapes() {
        let bare: SignUpResponse = serde_json::from_str(r#"{"id":"u1","email":"a@b.c","role":"authenticated"}"#).unwrap();
        let (user, session) = bare.into_parts().unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(session, None);

        let wrapped: SignUpResponse = serde_json::from_str(
            r#"{"access_token":"t","expires_in":3600,"user":{"id":"u2","email":"a@b.c"}}"#,
        )
        .unwrap();
        let (user, session) = wrapped.into_parts().unwrap();
        assert_eq!(user.id, "u2");
        let session = session.unwrap();
        assert_eq!(session.access_token, "t");
        assert_eq!(session.user, user);

        let empty: SignUpResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.into_parts().is_none());
    }

    #[test]
    fn test_token_response_into_session() {
        let json = r#"{"access_token":"abc","token_type":"bearer","expires_in":3600,"refresh_token":"r","user":{"id":"u1","email":"a@b.c"}}"#;
        let session = serde_json::from_str::<TokenResponse>(json).unwrap().into_session();
        assert_eq!(session.access_token, "abc");
        assert_eq!(session.user.email, "a@b.c");
        assert!(!session.is_expired());
    }

    #[test]
    fn test_profile_row_parsing() {
        let json = r#"{"id":7,"user_id":"u1","nickname":null,"created_at":"2026-10-18T09:30:00+00:00"}"#;
        let profile: Profile = serde_json::from_str::<ProfileRow>(json).unwrap().into();
        assert_eq!(profile.id, "7");
        assert_eq!(profile.nickname, None);
        assert_eq!(profile.member_since(), "2026-10-18");
    }

    #[test]
    fn test_new_profile_row_serialization() {
        let json = serde_json::to_string(&NewProfileRow { user_id: "u1", nickname: None }).unwrap();
        assert_eq!(json, r#"{"user_id":"u1","nickname":null}"#);
    }

    #[test]
    fn test_urls_trim_trailing_slash() {
        let service = RemoteAccountService::new(&settings(), None).unwrap();
        assert_eq!(service.auth_url("signup"), "https://project.example.co/auth/v1/signup");
        assert_eq!(service.rest_url("users"), "https://project.example.co/rest/v1/users");
        assert_eq!(service.bearer(), "anon");
    }

    #[test]
    fn test_missing_url_is_config_error() {
        let settings = AccountSettings::default();
        assert!(matches!(RemoteAccountService::new(&settings, None), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_session_restored_from_store() {
        let store = Arc::new(MemoryBlobStore::new());
        let session = Session {
            user: User { id: "u1".to_string(), email: "a@b.c".to_string() },
            access_token: "saved".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + Duration::minutes(30),
        };
        store.write(SESSION_SLOT, &serde_json::to_string(&session).unwrap()).unwrap();

        let service = RemoteAccountService::new(&settings(), Some(store.clone())).unwrap();
        assert_eq!(service.current_session().await.unwrap(), Some(session));
        assert_eq!(service.bearer(), "saved");
        assert!(service.subscribe().borrow().is_some());
    }

    #[tokio::test]
    async fn test_expired_or_garbled_session_is_ignored() {
        let store = Arc::new(MemoryBlobStore::new());
        store.write(SESSION_SLOT, "{ not json").unwrap();
        let service = RemoteAccountService::new(&settings(), Some(store.clone())).unwrap();
        assert_eq!(service.current_session().await.unwrap(), None);

        let expired = Session {
            user: User { id: "u1".to_string(), email: String::new() },
            access_token: "old".to_string(),
            refresh_token: None,
            expires_at: Utc::now() - Duration::minutes(1),
        };
        store.write(SESSION_SLOT, &serde_json::to_string(&expired).unwrap()).unwrap();
        let service = RemoteAccountService::new(&settings(), Some(store)).unwrap();
        assert_eq!(service.current_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sign_out_without_session_skips_network() {
        let store = Arc::new(MemoryBlobStore::new());
        let service = RemoteAccountService::new(&settings(), Some(store.clone())).unwrap();
        service.sign_out().await.unwrap();
        assert_eq!(store.read(SESSION_SLOT).unwrap(), None);
    }

    type Seen = Arc<Mutex<Vec<(String, String)>>>;

    /// One-request-per-connection HTTP backend. Records each request as
    /// `("METHOD /path", authorization header)`.
    async fn serve_backend(listener: TcpListener, seen: Seen) {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed before the headers ended");
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
            let mut lines = head.lines();
            let request_line = lines.next().unwrap_or_default().to_string();
            let mut authorization = String::new();
            let mut content_length = 0usize;
            for line in lines {
                if let Some((name, value)) = line.split_once(':') {
                    match name.trim().to_ascii_lowercase().as_str() {
                        "authorization" => authorization = value.trim().to_string(),
                        "content-length" => content_length = value.trim().parse().unwrap_or(0),
                        _ => {}
                    }
                }
            }
            while raw.len() < header_end + content_length {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }

            let mut parts = request_line.split_whitespace();
            let method = parts.next().unwrap_or_default().to_string();
            let path = parts
                .next()
                .unwrap_or_default()
                .split('?')
                .next()
                .unwrap_or_default()
                .to_string();
            seen.lock().unwrap().push((format!("{} {}", method, path), authorization));

            let body = match path.as_str() {
                "/auth/v1/signup" => {
                    r#"{"access_token":"user-token","token_type":"bearer","expires_in":3600,"user":{"id":"u1","email":"a@b.c"}}"#
                }
                _ => r#"{"id":1,"user_id":"u1","nickname":"reel","created_at":"2026-10-18T09:30:00+00:00"}"#,
            };
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile_as_new_user() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let server = tokio::spawn(serve_backend(listener, seen.clone()));

        let settings = AccountSettings {
            url: format!("http://{}", addr),
            anon_key: "anon".to_string(),
            ..Default::default()
        };
        let store = Arc::new(MemoryBlobStore::new());
        let service = Arc::new(RemoteAccountService::new(&settings, Some(store.clone())).unwrap());
        let flow = AuthFlow::new(service.clone());

        let (user, profile) = flow.sign_up("a@b.c", "secret1", "reel").await.unwrap();
        assert_eq!(profile.user_id, user.id);
        assert_eq!(profile.nickname.as_deref(), Some("reel"));

        let session = service.current_session().await.unwrap().unwrap();
        assert_eq!(session.access_token, "user-token");
        assert!(store.read(SESSION_SLOT).unwrap().is_some());

        let requests = seen.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![
                ("POST /auth/v1/signup".to_string(), "Bearer anon".to_string()),
                ("POST /rest/v1/users".to_string(), "Bearer user-token".to_string()),
            ]
        );
        server.abort();
    }
}
