// In-process account backend

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use uuid::Uuid;
use log::{info, warn};

use super::{AccountService, Profile, ProfileUpdate, Session, User};
use crate::error::AppError;

const MIN_PASSWORD_LEN: usize = 6;
const SESSION_HOURS: i64 = 1;

struct Account {
    user: User,
    salt: String,
    password_hash: String,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    profiles: HashMap<String, Profile>,
    session: Option<Session>,
}

/// Accounts, profiles and the session held in memory
pub struct LocalAccountService {
    inner: Mutex<Inner>,
    session_tx: watch::Sender<Option<Session>>,
}

impl LocalAccountService {
    pub fn new() -> Self {
        let (session_tx, _) = watch::channel(None);
        Self {
            inner: Mutex::new(Inner::default()),
            session_tx,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, session: Option<Session>) {
        self.session_tx.send_replace(session);
    }
}

impl Default for LocalAccountService {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn remote_err(message: &str) -> AppError {
    AppError::RemoteService(message.to_string())
}

#[async_trait]
impl AccountService for LocalAccountService {
    async fn create_account(&self, email: &str, password: &str) -> Result<User, AppError> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(remote_err("Unable to validate email address: invalid format"));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(remote_err("Password should be at least 6 characters."));
        }

        let mut inner = self.inner();
        if inner.accounts.contains_key(&email) {
            return Err(remote_err("User already registered"));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
        };
        let salt = Uuid::new_v4().simple().to_string();
        let password_hash = hash_password(&salt, password);
        inner.accounts.insert(
            email,
            Account {
                user: user.clone(),
                salt,
                password_hash,
            },
        );

        info!("Created local account {}", user.id);
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let email = normalize_email(email);
        let session = {
            let mut inner = self.inner();
            let account = inner
                .accounts
                .get(&email)
                .filter(|a| hash_password(&a.salt, password) == a.password_hash)
                .ok_or_else(|| {
                    warn!("Rejected local sign-in for {}", email);
                    remote_err("Invalid login credentials")
                })?;

            let session = Session {
                user: account.user.clone(),
                access_token: Uuid::new_v4().to_string(),
                refresh_token: Some(Uuid::new_v4().to_string()),
                expires_at: Utc::now() + Duration::hours(SESSION_HOURS),
            };
            inner.session = Some(session.clone());
            session
        };

        self.publish(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        self.inner().session = None;
        self.publish(None);
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, AppError> {
        {
            let mut inner = self.inner();
            match inner.session.as_ref().map(Session::is_expired) {
                None => return Ok(None),
                Some(false) => return Ok(inner.session.clone()),
                Some(true) => inner.session = None,
            }
        }

        info!("Local session expired");
        self.publish(None);
        Ok(None)
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session_tx.subscribe()
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, AppError> {
        self.inner()
            .profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| remote_err("JSON object requested, multiple (or no) rows returned"))
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), AppError> {
        let mut inner = self.inner();
        let profile = inner
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| remote_err("Profile not found"))?;
        profile.nickname = update.nickname.clone();
        Ok(())
    }

    async fn create_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile, AppError> {
        let mut inner = self.inner();
        if inner.profiles.contains_key(user_id) {
            return Err(remote_err(
                "duplicate key value violates unique constraint \"users_user_id_key\"",
            ));
        }

        let profile = Profile {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            nickname: update.nickname.clone(),
            created_at: Utc::now(),
        };
        inner.profiles.insert(user_id.to_string(), profile.clone());
        Ok(profile)
    }
}
