//! Credential exchange service.
//!
//! Validates a license, mints a one-time token wrapping the protected
//! secret, and exchanges that token for the secret exactly once.
//!
//! - `license` - License table and capability checks
//! - `token` - Token state machine and the redacted `Secret` type
//! - `source` - Async secret acquisition (environment, prompt, remote exchange)

pub mod license;
pub mod source;
pub mod token;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics::Metrics;

pub use license::{License, LicenseStore};
pub use token::{OneTimeToken, Secret, TokenState};

/// Token issuance settings.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Lifetime of a freshly issued token.
    pub ttl: Duration,
    /// Capability a license must grant.
    pub required_capability: String,
    /// How long a dead token is remembered so redemption keeps answering `Gone`.
    pub retention: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            required_capability: "secret:read".to_string(),
            retention: Duration::from_secs(600),
        }
    }
}

/// Protected secret, injected at startup.
#[derive(Debug, Clone)]
pub struct SecretConfig {
    pub secret: Secret,
}

/// Answer to a successful `issue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token_id: String,
    pub expires_in_seconds: u64,
}

/// Answer to a successful `redeem`.
#[derive(Clone, Serialize, Deserialize)]
pub struct RedeemedSecret {
    pub secret: String,
}

/// Issues and redeems one-time tokens.
pub struct CredentialService {
    licenses: LicenseStore,
    secret: SecretConfig,
    settings: TokenSettings,
    tokens: DashMap<String, OneTimeToken>,
    metrics: Arc<Metrics>,
}

impl CredentialService {
    pub fn new(
        licenses: LicenseStore,
        secret: SecretConfig,
        settings: TokenSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            licenses,
            secret,
            settings,
            tokens: DashMap::new(),
            metrics,
        }
    }

    /// Validate `license_key` and mint a token. No token exists on failure.
    pub fn issue(&self, license_key: &str) -> Result<IssuedToken> {
        if let Err(e) = self.licenses.authorize(
            license_key,
            &self.settings.required_capability,
            chrono::Utc::now(),
        ) {
            warn!("Token issue refused: {}", e);
            return Err(e);
        }

        // The vacant entry holds its shard lock until the token is stored.
        let token_id = loop {
            if let Entry::Vacant(slot) = self.tokens.entry(Uuid::new_v4().to_string()) {
                let token_id = slot.key().clone();
                let token =
                    OneTimeToken::new(&token_id, self.secret.secret.clone(), self.settings.ttl);
                slot.insert(token);
                break token_id;
            }
        };
        self.metrics.inc_tokens_issued();

        info!("Issued one-time token {}", token_id);
        Ok(IssuedToken {
            token_id,
            expires_in_seconds: self.settings.ttl.as_secs(),
        })
    }

    /// Exchange a token for the secret.
    ///
    /// The state check and the flip to CONSUMED happen under the token's map
    /// entry lock, so concurrent attempts see exactly one success.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use std::sync::Arc;
    /// use stream_gateway::credentials::*;
    /// use stream_gateway::metrics::Metrics;
    /// use stream_gateway::Error;
    ///
    /// let service = CredentialService::new(
    ///     LicenseStore::new([License::new("LIC-1", &["secret:read"])]),
    ///     SecretConfig { secret: Secret::new("s3cr3t") },
    ///     TokenSettings::default(),
    ///     Arc::new(Metrics::default()),
    /// );
    ///
    /// let issued = service.issue("LIC-1").unwrap();
    /// assert_eq!(service.redeem(&issued.token_id).unwrap().expose(), "s3cr3t");
    /// assert!(matches!(service.redeem(&issued.token_id), Err(Error::Gone(_))));
    /// # });
    /// ```
    pub fn redeem(&self, token_id: &str) -> Result<Secret> {
        let mut token = self
            .tokens
            .get_mut(token_id)
            .ok_or_else(|| Error::TokenNotFound(token_id.to_string()))?;

        match token.consume(Instant::now()) {
            Some(secret) => {
                drop(token);
                self.metrics.inc_tokens_redeemed();
                info!("Redeemed one-time token {}", token_id);
                Ok(secret)
            }
            None => {
                debug!("Refused redemption of {} token {}", state_name(&token), token_id);
                Err(Error::Gone(token_id.to_string()))
            }
        }
    }

    /// Current state of a token, if it is still remembered.
    pub fn state(&self, token_id: &str) -> Option<TokenState> {
        self.tokens
            .get(token_id)
            .map(|t| t.state(Instant::now()))
    }

    /// Reclaim memory held by dead tokens. Returns the number removed.
    ///
    /// Expired tokens lose their secret immediately; dead tokens are
    /// forgotten once they are older than the retention window. Redemption
    /// never depends on this having run.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let retention = self.settings.retention;
        let before = self.tokens.len();

        self.tokens.retain(|_, token| match token.state(now) {
            TokenState::Issued => true,
            TokenState::Expired | TokenState::Consumed => {
                token.wipe();
                now.saturating_duration_since(token.expires_at()) < retention
            }
        });

        let removed = before.saturating_sub(self.tokens.len());
        if removed > 0 {
            debug!("Token sweep removed {} token(s)", removed);
        }
        removed
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

fn state_name(token: &OneTimeToken) -> &'static str {
    match token.state(Instant::now()) {
        TokenState::Issued => "issued",
        TokenState::Consumed => "consumed",
        TokenState::Expired => "expired",
    }
}
