//! Secret acquisition.
//!
//! Every way of obtaining the protected secret is a [`SecretProvider`]:
//! an environment value, an interactive prompt, or a token exchange against
//! another gateway. Providers are tried in order, mirroring an
//! options → environment → interactive credential chain.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::io::IsTerminal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::credentials::{IssuedToken, RedeemedSecret, Secret};
use crate::error::{Error, Result};
use crate::retry::{retry_transient, BackoffParams};

/// One way of obtaining the secret.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Human-readable name used in logs and error messages.
    fn name(&self) -> String;

    /// `Ok(None)` means this provider has nothing to offer.
    async fn acquire(&self) -> Result<Option<Secret>>;
}

/// A fixed value, e.g. from explicit options.
pub struct StaticSecret(pub Option<Secret>);

#[async_trait]
impl SecretProvider for StaticSecret {
    fn name(&self) -> String {
        "explicit option".to_string()
    }

    async fn acquire(&self) -> Result<Option<Secret>> {
        Ok(self.0.clone())
    }
}

/// Reads the secret from an environment variable.
pub struct EnvSecret {
    pub var: String,
}

#[async_trait]
impl SecretProvider for EnvSecret {
    fn name(&self) -> String {
        format!("environment variable {}", self.var)
    }

    async fn acquire(&self) -> Result<Option<Secret>> {
        Ok(std::env::var(&self.var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(Secret::new))
    }
}

/// Asks for the secret on the terminal. Skipped when stdin is not a TTY.
pub struct PromptSecret {
    pub label: String,
}

#[async_trait]
impl SecretProvider for PromptSecret {
    fn name(&self) -> String {
        "interactive prompt".to_string()
    }

    async fn acquire(&self) -> Result<Option<Secret>> {
        if !std::io::stdin().is_terminal() {
            debug!("stdin is not a terminal, skipping secret prompt");
            return Ok(None);
        }

        let mut stderr = tokio::io::stderr();
        stderr.write_all(format!("{}: ", self.label).as_bytes()).await?;
        stderr.flush().await?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        let value = line.trim_end_matches(['\r', '\n']).to_string();
        Ok((!value.is_empty()).then(|| Secret::new(value)))
    }
}

/// Obtains the secret from another gateway's `/tokens` exchange.
pub struct ExchangeSecret {
    client: Client,
    base_url: String,
    license_key: String,
}

impl ExchangeSecret {
    pub fn new(client: Client, base_url: impl Into<String>, license_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            license_key: license_key.into(),
        }
    }

    /// `POST /tokens`, retried on transient failures.
    pub async fn issue(&self) -> Result<IssuedToken> {
        retry_transient(
            || async {
                let response = self
                    .client
                    .post(format!("{}/tokens", self.base_url))
                    .json(&json!({ "licenseKey": self.license_key }))
                    .send()
                    .await?;
                match response.status() {
                    StatusCode::FORBIDDEN => Err(Error::Unauthorized(
                        "upstream rejected the license".to_string(),
                    )),
                    _ => Ok(response.error_for_status()?.json::<IssuedToken>().await?),
                }
            },
            &BackoffParams::for_exchange(),
        )
        .await
    }

    /// `POST /tokens/{id}/redeem`. Never retried: a lost response would
    /// otherwise turn into `Gone`.
    pub async fn redeem(&self, token_id: &str) -> Result<Secret> {
        let response = self
            .client
            .post(format!("{}/tokens/{}/redeem", self.base_url, token_id))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::TokenNotFound(token_id.to_string())),
            StatusCode::GONE => Err(Error::Gone(token_id.to_string())),
            _ => {
                let body: RedeemedSecret = response.error_for_status()?.json().await?;
                Ok(Secret::new(body.secret))
            }
        }
    }
}

#[async_trait]
impl SecretProvider for ExchangeSecret {
    fn name(&self) -> String {
        format!("token exchange at {}", self.base_url)
    }

    async fn acquire(&self) -> Result<Option<Secret>> {
        let issued = self.issue().await?;
        debug!(
            "Upstream issued token {} (expires in {}s)",
            issued.token_id, issued.expires_in_seconds
        );
        self.redeem(&issued.token_id).await.map(Some)
    }
}

/// Try providers in order and return the first secret found.
pub async fn resolve_secret(providers: &[Box<dyn SecretProvider>]) -> Result<Secret> {
    let mut tried = Vec::new();
    for provider in providers {
        let name = provider.name();
        match provider.acquire().await {
            Ok(Some(secret)) => {
                info!("Protected secret obtained from {}", name);
                return Ok(secret);
            }
            Ok(None) => debug!("No secret from {}", name),
            Err(e) => warn!("Secret provider {} failed: {}", name, e),
        }
        tried.push(name);
    }

    Err(Error::SecretUnavailable(format!(
        "no secret available. Tried: {}",
        if tried.is_empty() {
            "nothing".to_string()
        } else {
            tried.join(", ")
        }
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProvider;

    #[async_trait]
    impl SecretProvider for FailingProvider {
        fn name(&self) -> String {
            "failing".to_string()
        }

        async fn acquire(&self) -> Result<Option<Secret>> {
            Err(Error::Upstream("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_first_available_provider_wins() {
        let providers: Vec<Box<dyn SecretProvider>> = vec![
            Box::new(StaticSecret(None)),
            Box::new(FailingProvider),
            Box::new(StaticSecret(Some(Secret::new("from-option")))),
            Box::new(StaticSecret(Some(Secret::new("later")))),
        ];

        let secret = resolve_secret(&providers).await.unwrap();
        assert_eq!(secret.expose(), "from-option");
    }

    #[tokio::test]
    async fn test_env_provider() {
        std::env::set_var("STREAM_GATEWAY_TEST_SECRET_ENV", "env-value");
        let provider = EnvSecret {
            var: "STREAM_GATEWAY_TEST_SECRET_ENV".to_string(),
        };
        assert_eq!(
            provider.acquire().await.unwrap().map(|s| s.expose().to_string()),
            Some("env-value".to_string())
        );

        let missing = EnvSecret {
            var: "STREAM_GATEWAY_TEST_SECRET_UNSET".to_string(),
        };
        assert!(missing.acquire().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nothing_available_lists_sources() {
        let providers: Vec<Box<dyn SecretProvider>> =
            vec![Box::new(StaticSecret(None)), Box::new(FailingProvider)];

        let err = resolve_secret(&providers).await.unwrap_err();
        assert!(matches!(err, Error::SecretUnavailable(_)));
        assert!(err.to_string().contains("explicit option, failing"));
    }
}
