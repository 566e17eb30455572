//! Account and profile capability.
//!
//! The app never talks to a concrete backend directly; everything goes
//! through `AccountService`. `RemoteAccountService` speaks to the hosted
//! auth/REST backend, `LocalAccountService` keeps accounts in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::AppError;

mod flow;
mod local;
mod remote;

pub use flow::AuthFlow;
pub use local::LocalAccountService;
pub use remote::RemoteAccountService;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    pub nickname: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Nickname as displayed, with the empty-state text
    pub fn display_nickname(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or("No nickname set")
    }

    /// "Member since" date, e.g. `2026-10-18`
    pub fn member_since(&self) -> String {
        self.created_at.format("%Y-%m-%d").to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    pub nickname: Option<String>,
}

impl ProfileUpdate {
    /// Blank nicknames are stored as absent
    pub fn nickname(nickname: &str) -> Self {
        let trimmed = nickname.trim();
        Self {
            nickname: (!trimmed.is_empty()).then(|| trimmed.to_string()),
        }
    }
}

/// Remote account/profile operations. Every failure is a
/// `AppError::RemoteService` carrying the backend's message verbatim.
#[async_trait]
pub trait AccountService: Send + Sync {
    async fn create_account(&self, email: &str, password: &str) -> Result<User, AppError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AppError>;

    async fn sign_out(&self) -> Result<(), AppError>;

    /// The current non-expired session, if any
    async fn current_session(&self) -> Result<Option<Session>, AppError>;

    /// Observe session changes (sign-in, sign-out, expiry on lookup)
    fn subscribe(&self) -> watch::Receiver<Option<Session>>;

    async fn get_profile(&self, user_id: &str) -> Result<Profile, AppError>;

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), AppError>;

    async fn create_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_nickname_is_none() {
        assert_eq!(ProfileUpdate::nickname("  ").nickname, None);
        assert_eq!(ProfileUpdate::nickname(" reel ").nickname.as_deref(), Some("reel"));
    }

    #[test]
    fn test_display_nickname() {
        let mut profile = Profile {
            id: "1".to_string(),
            user_id: "u".to_string(),
            nickname: None,
            created_at: Utc::now(),
        };
        assert_eq!(profile.display_nickname(), "No nickname set");
        profile.nickname = Some("reel".to_string());
        assert_eq!(profile.display_nickname(), "reel");
    }
}
