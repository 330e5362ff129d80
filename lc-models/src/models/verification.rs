//! Pending phone verification record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use lc_core::error::{LcResult, VerificationFailure};

/// A code sent to a phone and awaiting confirmation.
///
/// At most one exists at a time; issuing a new code replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingVerification {
    pub code: String,
    pub phone: String,
    pub issued_at: DateTime<Utc>,
}

impl PendingVerification {
    pub fn new(code: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            phone: phone.into(),
            issued_at: Utc::now(),
        }
    }

    /// True once more than `ttl` has elapsed since issue.
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.issued_at > ttl
    }

    /// Check a submitted code. Expiry is checked before the code itself.
    pub fn check(&self, submitted: &str, now: DateTime<Utc>, ttl: Duration) -> LcResult<()> {
        if self.is_expired_at(now, ttl) {
            return Err(VerificationFailure::Expired.into());
        }
        if submitted.trim() != self.code {
            return Err(VerificationFailure::Mismatch.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_core::LcError;

    const TTL: i64 = 15 * 60;

    #[test]
    fn test_check_accepts_fresh_code() {
        let pending = PendingVerification::new("123456", "+573001234567");
        assert!(pending.check(" 123456 ", Utc::now(), Duration::seconds(TTL)).is_ok());
    }

    #[test]
    fn test_check_rejects_mismatch() {
        let pending = PendingVerification::new("123456", "+573001234567");
        let err = pending.check("654321", Utc::now(), Duration::seconds(TTL)).unwrap_err();
        assert!(matches!(err, LcError::Verification(VerificationFailure::Mismatch)));
    }

    #[test]
    fn test_expiry_wins_over_correct_code() {
        let mut pending = PendingVerification::new("123456", "+573001234567");
        pending.issued_at = Utc::now() - Duration::minutes(16);
        let err = pending.check("123456", Utc::now(), Duration::seconds(TTL)).unwrap_err();
        assert!(matches!(err, LcError::Verification(VerificationFailure::Expired)));
    }

    #[test]
    fn test_exactly_at_ttl_is_not_expired() {
        let pending = PendingVerification::new("1", "+1");
        let at = pending.issued_at + Duration::seconds(TTL);
        assert!(!pending.is_expired_at(at, Duration::seconds(TTL)));
    }
}
