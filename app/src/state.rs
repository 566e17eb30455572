use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

use crate::account::{Profile, Session};
use crate::error::AppError;

/// Screen the video app is showing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "lowercase")]
pub enum View {
    Gallery,
    Recorder,
    Player { record_id: String },
}

impl View {
    pub fn name(&self) -> &'static str {
        match self {
            View::Gallery => "gallery",
            View::Recorder => "recorder",
            View::Player { .. } => "player",
        }
    }

    /// The gallery and recorder are reachable from anywhere; the player
    /// only from the gallery.
    pub fn can_transition_to(&self, next: &View) -> bool {
        match (self, next) {
            (_, View::Gallery) | (_, View::Recorder) => true,
            (View::Gallery, View::Player { .. }) => true,
            _ => false,
        }
    }
}

/// Account side of the app
#[derive(Debug, Clone, PartialEq)]
pub enum AuthView {
    SignedOut,
    SignedIn {
        session: Session,
        profile: Option<Profile>,
    },
}

impl AuthView {
    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthView::SignedIn { .. })
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthView::SignedIn { session, .. } => Some(session),
            AuthView::SignedOut => None,
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            AuthView::SignedIn { profile, .. } => profile.as_ref(),
            AuthView::SignedOut => None,
        }
    }
}

/// Application state shared by every command
pub struct AppState {
    view: Mutex<View>,
    auth: Mutex<AuthView>,
    pub is_recording: Mutex<bool>,
    pub clip_count: Mutex<u32>,
}

impl AppState {
    pub fn new(clip_count: u32) -> Self {
        Self {
            view: Mutex::new(View::Gallery),
            auth: Mutex::new(AuthView::SignedOut),
            is_recording: Mutex::new(false),
            clip_count: Mutex::new(clip_count),
        }
    }

    pub fn view(&self) -> View {
        lock(&self.view).clone()
    }

    /// Move to `next`, returning the previous view
    pub fn transition(&self, next: View) -> Result<View, AppError> {
        let mut view = lock(&self.view);
        if !view.can_transition_to(&next) {
            return Err(AppError::InvalidTransition {
                from: view.name().to_string(),
                to: next.name().to_string(),
            });
        }
        Ok(std::mem::replace(&mut *view, next))
    }

    pub fn auth(&self) -> AuthView {
        lock(&self.auth).clone()
    }

    /// Follow a session change: a new session signs in (keeping the cached
    /// profile if the user is unchanged), `None` signs out.
    pub fn apply_session(&self, session: Option<Session>) {
        let mut auth = lock(&self.auth);
        *auth = match session {
            Some(session) => {
                let profile = match &*auth {
                    AuthView::SignedIn { session: old, profile } if old.user.id == session.user.id => {
                        profile.clone()
                    }
                    _ => None,
                };
                AuthView::SignedIn { session, profile }
            }
            None => AuthView::SignedOut,
        };
    }

    pub fn set_profile(&self, new_profile: Profile) -> Result<(), AppError> {
        let mut auth = lock(&self.auth);
        match &mut *auth {
            AuthView::SignedIn { profile, .. } => {
                *profile = Some(new_profile);
                Ok(())
            }
            AuthView::SignedOut => Err(AppError::NoActiveSession),
        }
    }
}

// A poisoned lock only means another command panicked mid-update; the
// state itself is still a valid value.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::User;
    use chrono::{Duration, Utc};

    fn session(user_id: &str) -> Session {
        Session {
            user: User {
                id: user_id.to_string(),
                email: format!("{}@example.com", user_id),
            },
            access_token: "token".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    fn profile(user_id: &str) -> Profile {
        Profile {
            id: "p1".to_string(),
            user_id: user_id.to_string(),
            nickname: Some("reel".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_view_transitions() {
        let state = AppState::new(0);
        assert_eq!(state.view(), View::Gallery);

        state.transition(View::Recorder).unwrap();
        let err = state
            .transition(View::Player { record_id: "1".to_string() })
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        state.transition(View::Gallery).unwrap();
        state.transition(View::Player { record_id: "1".to_string() }).unwrap();
        assert!(state.transition(View::Player { record_id: "2".to_string() }).is_err());

        let previous = state.transition(View::Gallery).unwrap();
        assert_eq!(previous, View::Player { record_id: "1".to_string() });
    }

    #[test]
    fn test_session_changes_drive_auth_view() {
        let state = AppState::new(0);
        assert!(matches!(state.set_profile(profile("u1")), Err(AppError::NoActiveSession)));

        state.apply_session(Some(session("u1")));
        state.set_profile(profile("u1")).unwrap();
        assert_eq!(state.auth().profile().unwrap().nickname.as_deref(), Some("reel"));

        // refreshed session for the same user keeps the profile
        state.apply_session(Some(session("u1")));
        assert!(state.auth().profile().is_some());

        // a different user does not inherit it
        state.apply_session(Some(session("u2")));
        assert!(state.auth().profile().is_none());

        state.apply_session(None);
        assert_eq!(state.auth(), AuthView::SignedOut);
    }
}
