//! Credential acquisition, rotation, and rate-limit cooldowns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{AetherError, Result};
use crate::provider::Provider;

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Cooldown applied to a rate-limited credential when the provider does not
/// say how long to wait.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// One usable API credential: which protocol to speak, with what key, against
/// which model.
#[derive(Debug, Clone)]
pub struct Credential {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

impl Credential {
    pub fn new(provider: Provider, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Supplies credentials to the engine and absorbs rate-limit reports.
#[async_trait]
pub trait CredentialPool: Send + Sync {
    /// Hand out the credential the next request should use.
    async fn acquire(&self) -> Result<Credential>;

    /// Record that a credential was rate limited, with the provider's
    /// retry-after hint when it gave one.
    async fn report_rate_limited(&self, credential: &Credential, retry_after: Option<Duration>);
}

struct Slot {
    credential: Credential,
    cooldown_until: Mutex<Option<Instant>>,
}

impl Slot {
    fn is_cooling(&self, now: Instant) -> bool {
        match *self.cooldown_until.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(until) => until > now,
            None => false,
        }
    }
}

/// Round-robin pool over a fixed set of credentials, typically loaded from
/// the environment. Rate-limited entries are skipped until their cooldown
/// elapses.
pub struct EnvCredentialPool {
    slots: Vec<Slot>,
    cursor: AtomicUsize,
}

impl EnvCredentialPool {
    pub fn new(credentials: Vec<Credential>) -> Result<Self> {
        if credentials.is_empty() {
            return Err(AetherError::Configuration(
                "no credentials configured".into(),
            ));
        }
        Ok(Self {
            slots: credentials
                .into_iter()
                .map(|credential| Slot {
                    credential,
                    cooldown_until: Mutex::new(None),
                })
                .collect(),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Load from environment variables (ANTHROPIC_API_KEY, OPENAI_API_KEY),
    /// reading a `.env` file if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut credentials = Vec::new();

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            let model = std::env::var("AETHER_ANTHROPIC_MODEL")
                .unwrap_or_else(|_| DEFAULT_ANTHROPIC_MODEL.to_string());
            let mut credential = Credential::new(Provider::Anthropic, key, model);
            if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
                credential = credential.with_base_url(url);
            }
            credentials.push(credential);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            let model = std::env::var("AETHER_OPENAI_MODEL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string());
            let mut credential = Credential::new(Provider::OpenAi, key, model);
            if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
                credential = credential.with_base_url(url);
            }
            credentials.push(credential);
        }

        Self::new(credentials)
    }
}

#[async_trait]
impl CredentialPool for EnvCredentialPool {
    async fn acquire(&self) -> Result<Credential> {
        let now = Instant::now();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.slots.len() {
            let slot = &self.slots[(start + offset) % self.slots.len()];
            if !slot.is_cooling(now) {
                return Ok(slot.credential.clone());
            }
        }

        // Everything is cooling down; report the soonest release.
        let soonest = self
            .slots
            .iter()
            .filter_map(|s| *s.cooldown_until.lock().unwrap_or_else(|e| e.into_inner()))
            .min()
            .map(|until| until.saturating_duration_since(now).as_millis() as u64);
        Err(AetherError::RateLimited {
            retry_after_ms: soonest,
        })
    }

    async fn report_rate_limited(&self, credential: &Credential, retry_after: Option<Duration>) {
        let cooldown = retry_after.unwrap_or(DEFAULT_COOLDOWN);
        for slot in &self.slots {
            if slot.credential.api_key == credential.api_key
                && slot.credential.provider == credential.provider
            {
                let mut until = slot
                    .cooldown_until
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                *until = Some(Instant::now() + cooldown);
                warn!(
                    provider = %credential.provider,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "credential rate limited, cooling down"
                );
                return;
            }
        }
        debug!(provider = %credential.provider, "rate-limit report for unknown credential");
    }
}

/// Pool that always hands out the same credential. Useful for embedding and
/// tests.
pub struct StaticCredentialPool {
    credential: Credential,
}

impl StaticCredentialPool {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialPool for StaticCredentialPool {
    async fn acquire(&self) -> Result<Credential> {
        Ok(self.credential.clone())
    }

    async fn report_rate_limited(&self, credential: &Credential, retry_after: Option<Duration>) {
        debug!(
            provider = %credential.provider,
            retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
            "rate limited (static pool, nothing to rotate)"
        );
    }
}
