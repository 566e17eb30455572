// Sign-up / sign-in / profile page behaviour on top of an AccountService

use std::sync::Arc;
use log::{error, info, warn};

use super::{AccountService, Profile, ProfileUpdate, Session, User};
use crate::error::AppError;

const ALREADY_REGISTERED: &str = "User already registered";

pub struct AuthFlow {
    service: Arc<dyn AccountService>,
}

impl AuthFlow {
    pub fn new(service: Arc<dyn AccountService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<dyn AccountService> {
        &self.service
    }

    /// Create the account, then its profile row
    pub async fn sign_up(&self, email: &str, password: &str, nickname: &str) -> Result<(User, Profile), AppError> {
        let user = self.service.create_account(email, password).await.map_err(|e| match e {
            AppError::RemoteService(message) if message == ALREADY_REGISTERED => {
                AppError::RemoteService("This email address is already registered".to_string())
            }
            other => other,
        })?;

        let profile = self
            .service
            .create_profile(&user.id, &ProfileUpdate::nickname(nickname))
            .await
            .map_err(|e| {
                error!("Profile creation error: {}", e);
                AppError::RemoteService("Failed to create profile".to_string())
            })?;

        info!("Signed up user {}", user.id);
        Ok((user, profile))
    }

    /// Sign in, then fetch the profile. A failed profile fetch does not undo
    /// the sign-in; it comes back alongside the session for the profile page.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Session, Result<Profile, AppError>), AppError> {
        let session = self.service.sign_in(email, password).await?;
        let profile = self.service.get_profile(&session.user.id).await;
        if let Err(e) = &profile {
            warn!("Signed in {} without a profile: {}", session.user.id, e);
        }
        Ok((session, profile))
    }

    pub async fn sign_out(&self) -> Result<(), AppError> {
        self.service.sign_out().await
    }

    /// Current session and its profile
    pub async fn load_profile(&self) -> Result<(Session, Profile), AppError> {
        let session = self
            .service
            .current_session()
            .await?
            .ok_or(AppError::NoActiveSession)?;
        let profile = self.service.get_profile(&session.user.id).await?;
        Ok((session, profile))
    }

    /// Write the nickname and return the updated profile
    pub async fn update_nickname(&self, profile: &Profile, nickname: &str) -> Result<Profile, AppError> {
        let update = ProfileUpdate::nickname(nickname);
        self.service.update_profile(&profile.user_id, &update).await?;
        Ok(Profile {
            nickname: update.nickname,
            ..profile.clone()
        })
    }
}
