//! Email verification codes.
//!
//! One live six-digit code per email. Issuing a new code replaces the previous
//! one, and a successful redemption consumes the code in the same map
//! operation that checked it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use ring::constant_time::verify_slices_are_equal;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VerificationError {
    #[error("no verification code pending for this email, or it expired")]
    NoCodeOrExpired,
    #[error("verification code does not match")]
    Mismatch,
}

#[derive(Debug, Clone)]
struct PendingCode {
    code: String,
    expires_at: Instant,
}

impl PendingCode {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

pub struct VerificationCodeCache {
    codes: DashMap<String, PendingCode>,
    ttl: Duration,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl VerificationCodeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            codes: DashMap::new(),
            ttl,
        }
    }

    /// Generate a fresh code for `email`, replacing any pending one.
    pub fn issue(&self, email: &str) -> String {
        let code = rand::thread_rng().gen_range(100_000..=999_999).to_string();
        self.codes.insert(
            normalize_email(email),
            PendingCode {
                code: code.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        code
    }

    /// Check `submitted` against the pending code and consume it on a match.
    pub fn redeem(&self, email: &str, submitted: &str) -> Result<(), VerificationError> {
        let key = normalize_email(email);
        let submitted = submitted.trim();
        let now = Instant::now();

        let consumed = self.codes.remove_if(&key, |_, pending| {
            pending.is_live(now)
                && verify_slices_are_equal(pending.code.as_bytes(), submitted.as_bytes()).is_ok()
        });
        if consumed.is_some() {
            return Ok(());
        }

        // Expired entries are dropped here rather than waiting for the sweeper.
        if self.codes.remove_if(&key, |_, pending| !pending.is_live(now)).is_some() {
            return Err(VerificationError::NoCodeOrExpired);
        }
        if self.codes.contains_key(&key) {
            Err(VerificationError::Mismatch)
        } else {
            Err(VerificationError::NoCodeOrExpired)
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.codes.len();
        self.codes.retain(|_, pending| pending.is_live(now));
        before.saturating_sub(self.codes.len())
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }
}

/// Periodically purge expired codes so abandoned requests do not accumulate.
pub async fn run_purge_loop(cache: Arc<VerificationCodeCache>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        let removed = cache.purge_expired();
        if removed > 0 {
            tracing::debug!(
                "Purged {} expired verification codes, {} pending",
                removed,
                cache.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_code_is_six_digits() {
        let cache = VerificationCodeCache::new(Duration::from_secs(300));
        let code = cache.issue("alice@example.com");
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert!(!code.starts_with('0'));
    }

    #[test]
    fn test_redeem_is_exactly_once() {
        let cache = VerificationCodeCache::new(Duration::from_secs(300));
        let code = cache.issue("alice@example.com");

        assert_eq!(cache.redeem("alice@example.com", &code), Ok(()));
        assert_eq!(
            cache.redeem("alice@example.com", &code),
            Err(VerificationError::NoCodeOrExpired)
        );
    }

    #[test]
    fn test_mismatch_keeps_code_pending() {
        let cache = VerificationCodeCache::new(Duration::from_secs(300));
        let code = cache.issue("alice@example.com");
        let wrong = if code == "100000" { "100001" } else { "100000" };

        assert_eq!(cache.redeem("alice@example.com", wrong), Err(VerificationError::Mismatch));
        assert_eq!(cache.redeem("alice@example.com", &code), Ok(()));
    }

    #[test]
    fn test_reissue_invalidates_previous_code() {
        let cache = VerificationCodeCache::new(Duration::from_secs(300));
        let first = cache.issue("alice@example.com");
        let mut second = cache.issue("alice@example.com");
        while second == first {
            second = cache.issue("alice@example.com");
        }

        assert_eq!(cache.redeem("alice@example.com", &first), Err(VerificationError::Mismatch));
        assert_eq!(cache.redeem("alice@example.com", &second), Ok(()));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_expired_code_is_rejected_and_removed() {
        let cache = VerificationCodeCache::new(Duration::ZERO);
        let code = cache.issue("alice@example.com");

        assert_eq!(
            cache.redeem("alice@example.com", &code),
            Err(VerificationError::NoCodeOrExpired)
        );
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_unknown_email_has_no_code() {
        let cache = VerificationCodeCache::new(Duration::from_secs(300));
        assert_eq!(
            cache.redeem("nobody@example.com", "123456"),
            Err(VerificationError::NoCodeOrExpired)
        );
    }

    #[test]
    fn test_email_key_is_normalized() {
        let cache = VerificationCodeCache::new(Duration::from_secs(300));
        let code = cache.issue("  Alice@Example.COM ");
        assert_eq!(cache.redeem("alice@example.com", &code), Ok(()));
    }

    #[test]
    fn test_purge_expired() {
        let cache = VerificationCodeCache::new(Duration::ZERO);
        cache.issue("a@example.com");
        cache.issue("b@example.com");
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_concurrent_redeem_succeeds_once() {
        let cache = Arc::new(VerificationCodeCache::new(Duration::from_secs(300)));
        let code = cache.issue("race@example.com");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let code = code.clone();
                std::thread::spawn(move || cache.redeem("race@example.com", &code).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|redeemed| *redeemed)
            .count();
        assert_eq!(successes, 1);
    }
}
