//! Authenticated session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated backend session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user_id: String,
    pub phone: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| t <= Utc::now())
    }
}

/// Identity created by sign up.
///
/// `session` is `None` when the backend requires confirmation before the
/// first sign in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub phone: String,
    pub session: Option<Session>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_session_expiry() {
        let mut session = Session {
            access_token: "t".into(),
            user_id: "u1".into(),
            phone: "+573001234567".into(),
            expires_at: None,
        };
        assert!(!session.is_expired());
        session.expires_at = Some(Utc::now() - Duration::seconds(1));
        assert!(session.is_expired());
    }
}
