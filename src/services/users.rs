//! User directory and opaque session tokens
//!
//! Registration issues a role-prefixed user id and a session token.
//! Tokens are opaque uuids looked up in memory; identity federation is a
//! deployment concern, not this gateway's.

use crate::domain::error::ServiceError;
use crate::domain::messages::{RegisterUserRequest, SessionResponse};
use crate::domain::types::{short_id, User};
use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::info;
use uuid::Uuid;

pub struct UserDirectory {
    users: RwLock<FxHashMap<String, User>>,
    // token -> user_id
    sessions: RwLock<FxHashMap<String, String>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(FxHashMap::default()),
            sessions: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn register(&self, req: &RegisterUserRequest) -> Result<SessionResponse, ServiceError> {
        if req.display_name.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("display_name cannot be blank".into()));
        }
        let role = match req.role.as_str() {
            "rider" | "driver" => req.role.clone(),
            other => {
                return Err(ServiceError::InvalidArgument(format!("unknown role: {}", other)))
            }
        };

        let user = User {
            user_id: short_id(&format!("new-{}", role), 8),
            display_name: req.display_name.clone(),
            role,
            created_at: Utc::now(),
        };
        let token = Uuid::now_v7().to_string();

        self.users.write().insert(user.user_id.clone(), user.clone());
        self.sessions.write().insert(token.clone(), user.user_id.clone());

        info!(user_id = %user.user_id, role = %user.role, "user_registered");
        Ok(SessionResponse { user_id: user.user_id, token })
    }

    pub fn get(&self, user_id: &str) -> Result<User, ServiceError> {
        self.users
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))
    }

    /// Resolve a session token back to its user
    pub fn authenticate(&self, token: &str) -> Option<User> {
        let user_id = self.sessions.read().get(token).cloned()?;
        self.users.read().get(&user_id).cloned()
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_issues_session() {
        let dir = UserDirectory::new();
        let session = dir
            .register(&RegisterUserRequest {
                display_name: "Asha".to_string(),
                role: "rider".to_string(),
            })
            .unwrap();

        assert!(session.user_id.starts_with("new-rider-"));
        let user = dir.authenticate(&session.token).unwrap();
        assert_eq!(user.user_id, session.user_id);
        assert_eq!(user.role, "rider");
    }

    #[test]
    fn test_register_rejects_unknown_role() {
        let dir = UserDirectory::new();
        let err = dir
            .register(&RegisterUserRequest {
                display_name: "Asha".to_string(),
                role: "admin".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[test]
    fn test_revoke_invalidates_token() {
        let dir = UserDirectory::new();
        let session = dir
            .register(&RegisterUserRequest {
                display_name: "Ben".to_string(),
                role: "driver".to_string(),
            })
            .unwrap();

        assert!(dir.revoke(&session.token));
        assert!(dir.authenticate(&session.token).is_none());
        assert!(!dir.revoke(&session.token));
        // The profile itself survives
        assert!(dir.get(&session.user_id).is_ok());
    }
}
