//! One-time tokens.
//!
//! A token moves ISSUED → CONSUMED or ISSUED → EXPIRED and never leaves
//! either terminal state.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// The protected value. Zeroized on drop and redacted in `Debug`.
#[derive(Debug)]
pub struct Secret(SecretString);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for Secret {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Secret {}

/// Token lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenState {
    Issued,
    Consumed,
    Expired,
}

/// A single-use handle wrapping a secret.
#[derive(Debug)]
pub struct OneTimeToken {
    pub id: String,
    secret: Option<Secret>,
    pub issued_at: DateTime<Utc>,
    expires_at: Instant,
    consumed: bool,
}

impl OneTimeToken {
    pub fn new(id: impl Into<String>, secret: Secret, ttl: Duration) -> Self {
        Self {
            id: id.into(),
            secret: Some(secret),
            issued_at: Utc::now(),
            expires_at: Instant::now() + ttl,
            consumed: false,
        }
    }

    pub fn state(&self, now: Instant) -> TokenState {
        if self.consumed {
            TokenState::Consumed
        } else if now >= self.expires_at || self.secret.is_none() {
            TokenState::Expired
        } else {
            TokenState::Issued
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// ISSUED → CONSUMED. Returns the secret only on that transition.
    ///
    /// The caller must hold exclusive access to the token for the duration
    /// of the call.
    pub fn consume(&mut self, now: Instant) -> Option<Secret> {
        if self.state(now) != TokenState::Issued {
            return None;
        }
        self.consumed = true;
        self.secret.take()
    }

    /// Drop the wrapped secret of a token that can no longer be redeemed.
    pub fn wipe(&mut self) {
        self.secret = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_once() {
        let mut token = OneTimeToken::new("t1", Secret::new("s"), Duration::from_secs(60));
        assert_eq!(token.state(Instant::now()), TokenState::Issued);

        assert_eq!(token.consume(Instant::now()), Some(Secret::new("s")));
        assert_eq!(token.consume(Instant::now()), None);
        assert_eq!(token.state(Instant::now()), TokenState::Consumed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_cannot_be_consumed() {
        let mut token = OneTimeToken::new("t1", Secret::new("s"), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(token.state(Instant::now()), TokenState::Expired);
        assert!(token.consume(Instant::now()).is_none());
        // Expiry is terminal.
        assert_eq!(token.state(Instant::now()), TokenState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wiped_token_is_expired() {
        let mut token = OneTimeToken::new("t1", Secret::new("s"), Duration::from_secs(60));
        token.wipe();
        assert_eq!(token.state(Instant::now()), TokenState::Expired);
    }
}
