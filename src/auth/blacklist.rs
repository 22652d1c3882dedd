//! Revoked token ids, kept until the token would have expired anyway

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct TokenBlacklist {
    entries: DashMap<String, DateTime<Utc>>,
}

impl TokenBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) {
        self.entries.insert(jti.to_string(), expires_at);
    }

    /// Purges expired entries first
    pub fn is_revoked(&self, jti: &str) -> bool {
        self.purge_expired(Utc::now());
        self.entries.contains_key(jti)
    }

    /// # Returns
    /// Number of entries removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_revoke() {
        let blacklist = TokenBlacklist::new();
        assert!(!blacklist.is_revoked("abc"));

        blacklist.revoke("abc", Utc::now() + Duration::minutes(30));
        assert!(blacklist.is_revoked("abc"));
        assert!(!blacklist.is_revoked("def"));
    }

    #[test]
    fn test_expired_entries_purged() {
        let blacklist = TokenBlacklist::new();
        blacklist.revoke("old", Utc::now() - Duration::seconds(1));
        blacklist.revoke("new", Utc::now() + Duration::minutes(30));

        assert!(!blacklist.is_revoked("old"));
        assert_eq!(blacklist.len(), 1);
    }

    #[test]
    fn test_purge_at() {
        let blacklist = TokenBlacklist::new();
        let now = Utc::now();
        blacklist.revoke("a", now + Duration::minutes(1));
        blacklist.revoke("b", now + Duration::minutes(10));

        assert_eq!(blacklist.purge_expired(now + Duration::minutes(5)), 1);
        assert_eq!(blacklist.len(), 1);
        assert!(!blacklist.is_empty());
    }
}
