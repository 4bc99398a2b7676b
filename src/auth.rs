//! Mock account registry and single-session sign-in, kept in the local store.
//!
//! This is a toy flow: there is one active session for the whole store, and the
//! token is a fixed per-account string rather than a signed credential.
use anyhow::Result;
use chrono::Utc;
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::store::{LocalStore, SharedStore};

pub const USERS_KEY: &str = "plotwist_users";
pub const SESSION_KEY: &str = "plotwist_user";
const TOKEN_PREFIX: &str = "user-token-";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Please fill all fields")]
    MissingFields,
    #[error("User with this email already exists")]
    EmailTaken,
    #[error("User not found. Please sign up first.")]
    UnknownUser,
    #[error("Wrong email or password")]
    WrongPassword,
    #[error("No user logged in")]
    NotSignedIn,
    #[error("Invalid or missing session token")]
    InvalidToken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password_digest: String,
    pub token: String,
    pub created_at: String,
}

/// What callers get to see of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub username: String,
    pub created_at: String,
}

impl From<&UserRecord> for UserProfile {
    fn from(u: &UserRecord) -> Self {
        UserProfile {
            id: u.id.clone(),
            email: u.email.clone(),
            username: u.username.clone(),
            created_at: u.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionGrant {
    pub user: UserProfile,
    pub token: String,
}

impl From<&UserRecord> for SessionGrant {
    fn from(u: &UserRecord) -> Self {
        SessionGrant {
            user: u.into(),
            token: u.token.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct Accounts {
    store: SharedStore,
}

fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn same_email(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn load_users(store: &mut LocalStore) -> Vec<UserRecord> {
    store.get(USERS_KEY).unwrap_or_default()
}

fn session_for(store: &mut LocalStore, token: &str) -> Result<UserRecord, AuthError> {
    let user: UserRecord = store.get(SESSION_KEY).ok_or(AuthError::NotSignedIn)?;
    if !constant_time_eq(token.as_bytes(), user.token.as_bytes()) {
        return Err(AuthError::InvalidToken);
    }
    Ok(user)
}

fn require(fields: &[&str]) -> Result<(), AuthError> {
    if fields.iter().any(|f| f.trim().is_empty()) {
        return Err(AuthError::MissingFields);
    }
    Ok(())
}

impl Accounts {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<UserRecord> {
        require(&[email, password, username])?;
        let mut store = self.store.lock().await;
        let mut users = load_users(&mut store);
        if users.iter().any(|u| same_email(&u.email, email)) {
            return Err(AuthError::EmailTaken.into());
        }

        let now = Utc::now();
        let mut stamp = now.timestamp_millis();
        while users.iter().any(|u| u.id == stamp.to_string()) {
            stamp += 1;
        }
        let user = UserRecord {
            id: stamp.to_string(),
            email: email.trim().to_string(),
            username: username.trim().to_string(),
            password_digest: password_digest(password),
            token: format!("{TOKEN_PREFIX}{stamp}"),
            created_at: now.to_rfc3339(),
        };

        users.push(user.clone());
        store.set(USERS_KEY, &users)?;
        store.set(SESSION_KEY, &user)?;
        info!("Created account {} ({})", user.id, user.username);
        Ok(user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserRecord> {
        require(&[email, password])?;
        let mut store = self.store.lock().await;
        let users = load_users(&mut store);
        let user = users
            .into_iter()
            .find(|u| same_email(&u.email, email))
            .ok_or(AuthError::UnknownUser)?;

        let digest = password_digest(password);
        if !constant_time_eq(digest.as_bytes(), user.password_digest.as_bytes()) {
            warn!("Rejected sign-in for account {}", user.id);
            return Err(AuthError::WrongPassword.into());
        }

        store.set(SESSION_KEY, &user)?;
        info!("Signed in account {}", user.id);
        Ok(user)
    }

    /// Ends the session held by `token`. Signing out with no active session is a no-op.
    pub async fn sign_out(&self, token: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        match session_for(&mut store, token) {
            Ok(user) => {
                store.remove(SESSION_KEY)?;
                info!("Signed out account {}", user.id);
                Ok(())
            }
            Err(AuthError::NotSignedIn) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn current_user(&self) -> Option<UserRecord> {
        let mut store = self.store.lock().await;
        store.get(SESSION_KEY)
    }

    /// Session user, provided `token` matches the session token.
    pub async fn authorize(&self, token: &str) -> Result<UserRecord> {
        let mut store = self.store.lock().await;
        Ok(session_for(&mut store, token)?)
    }

    /// Applies `updates` to the session user. The token is checked under the same lock as
    /// the write.
    pub async fn update_profile(&self, token: &str, updates: ProfileUpdate) -> Result<UserRecord> {
        let mut store = self.store.lock().await;
        let mut user = session_for(&mut store, token)?;
        let mut users = load_users(&mut store);

        if let Some(email) = updates.email.as_deref() {
            require(&[email])?;
            if users
                .iter()
                .any(|u| u.id != user.id && same_email(&u.email, email))
            {
                return Err(AuthError::EmailTaken.into());
            }
            user.email = email.trim().to_string();
        }
        if let Some(username) = updates.username.as_deref() {
            require(&[username])?;
            user.username = username.trim().to_string();
        }

        store.set(SESSION_KEY, &user)?;
        if let Some(slot) = users.iter_mut().find(|u| u.id == user.id) {
            *slot = user.clone();
            store.set(USERS_KEY, &users)?;
        }
        Ok(user)
    }
}
