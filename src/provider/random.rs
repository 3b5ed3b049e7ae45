//! Provider for randomly generated credentials.
//!
//! Useful for bootstrapping passwords or shared secrets that only need to
//! exist in the destination store. There is no upstream system: values are
//! generated locally and destroy is a no-op.

use std::sync::Arc;

use anyhow::{ensure, Result};
use async_trait::async_trait;
use chrono::Duration;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use tracing::debug;

use super::Provider;
use crate::clock::{Clock, SystemClock};
use crate::state::Resource;
use crate::{Credential, Metadata, ProviderType, Request};

const DEFAULT_LENGTH: usize = 64;

#[derive(Debug, Clone, Deserialize)]
struct RandomRequestConfig {
    #[serde(default)]
    length: Option<usize>,
}

pub struct RandomProvider {
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl RandomProvider {
    /// Create a provider whose credentials expire `lifetime` after they
    /// are minted, which bounds how often they rotate.
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(lifetime: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { lifetime, clock }
    }
}

#[async_trait]
impl Provider for RandomProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Random
    }

    async fn create(&self, request: &Request) -> Result<(Vec<Credential>, Option<Metadata>)> {
        let config: RandomRequestConfig = request.parse_config()?;
        let length = config.length.unwrap_or(DEFAULT_LENGTH);
        ensure!(length > 0, "length must be greater than zero");

        let value: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();

        debug!(name = %request.name, length, "generated random credential");
        let credential = Credential::new(&request.name, value, self.clock.now() + self.lifetime);
        Ok((vec![credential], None))
    }

    async fn destroy(&self, resource: &Resource) -> Result<()> {
        // Nothing exists upstream.
        debug!(id = %resource.id, "random credential needs no upstream teardown");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{TimeZone, Utc};
    use secrecy::ExposeSecret;

    fn request(yaml: &str) -> Request {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn generates_alphanumeric_value_of_requested_length() {
        let provider = RandomProvider::new(Duration::days(7));
        let (credentials, metadata) = provider
            .create(&request("{name: example, length: 10}"))
            .await
            .unwrap();

        assert!(metadata.is_none());
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials[0].name, "example");
        let value = credentials[0].value.expose_secret();
        assert_eq!(value.len(), 10);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn defaults_the_length_and_honors_the_nested_config_form() {
        let provider = RandomProvider::new(Duration::days(7));
        let (credentials, _) = provider
            .create(&request("{name: example, config: {}}"))
            .await
            .unwrap();
        assert_eq!(credentials[0].value.expose_secret().len(), DEFAULT_LENGTH);
    }

    #[tokio::test]
    async fn expiration_is_lifetime_past_the_injected_now() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let provider =
            RandomProvider::with_clock(Duration::hours(1), Arc::new(FixedClock::new(now)));
        let (credentials, _) = provider.create(&request("{name: example}")).await.unwrap();
        assert_eq!(credentials[0].expiration, now + Duration::hours(1));
    }

    #[tokio::test]
    async fn rejects_zero_length() {
        let provider = RandomProvider::new(Duration::days(7));
        assert!(provider
            .create(&request("{name: example, length: 0}"))
            .await
            .is_err());
    }
}
