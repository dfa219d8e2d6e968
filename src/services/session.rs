//! Administrator session, passed explicitly to whatever needs credentials.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::chat_types::Participant;
use crate::backend_api::LoginResponse;
use crate::error::{ConsoleError, Result};

/// Bearer token. Wiped on drop, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Profile of the logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminProfile {
    #[serde(alias = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl AdminProfile {
    pub fn as_participant(&self) -> Participant {
        Participant {
            id: self.id.clone(),
            username: Some(self.username.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    token: SessionToken,
    admin: AdminProfile,
}

impl SessionContext {
    /// Build a session, rejecting non-administrators and empty tokens.
    pub fn new(token: SessionToken, admin: AdminProfile) -> Result<Self> {
        if !admin.is_admin {
            log::warn!("Rejected login for non-admin user {}", admin.username);
            return Err(ConsoleError::Unauthorized(format!(
                "{} is not an administrator",
                admin.username
            )));
        }
        if token.expose().is_empty() {
            return Err(ConsoleError::Unauthorized("empty session token".to_string()));
        }
        Ok(Self { token, admin })
    }

    pub fn from_login(response: LoginResponse) -> Result<Self> {
        Self::new(SessionToken::new(response.token), response.user)
    }

    pub fn admin(&self) -> &AdminProfile {
        &self.admin
    }

    pub fn bearer_token(&self) -> &str {
        self.token.expose()
    }
}
