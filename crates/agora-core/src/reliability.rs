//! Reliability wrapper for provider calls.
//!
//! Every external generation or judge call goes through
//! [`ReliableGenerator`]: the call is bounded by a timeout and dropped,
//! not awaited, when it runs over. On timeout or provider error the call
//! is tried once against the fallback provider when one is configured
//! and enabled; otherwise the failure is returned as a [`CallFailure`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::provider::{GenerationRequest, Generator, JudgeContext, Provider, ProviderConfig};

/// Reliability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Per-call timeout in seconds
    pub timeout_secs: f64,
    /// Retry once against the fallback provider on failure
    pub fallback_enabled: bool,
    pub primary: ProviderConfig,
    pub fallback: Option<ProviderConfig>,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30.0,
            fallback_enabled: false,
            primary: ProviderConfig::Template,
            fallback: None,
        }
    }
}

impl ReliabilityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.001))
    }
}

/// Which provider answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallSuccess<T> {
    pub value: T,
    pub route: Route,
    pub elapsed: Duration,
}

/// A classified call failure. Never retried within the same tick.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallFailure {
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider call failed: {0}")]
    Provider(String),
}

impl CallFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallFailure::Timeout(_))
    }
}

pub type CallOutcome<T> = Result<CallSuccess<T>, CallFailure>;

/// Cumulative call counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReliabilityStats {
    pub calls: u64,
    pub timeouts: u64,
    pub provider_errors: u64,
    pub fallbacks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    timeouts: AtomicU64,
    provider_errors: AtomicU64,
    fallbacks: AtomicU64,
}

impl Counters {
    fn note(&self, failure: &CallFailure) {
        match failure {
            CallFailure::Timeout(_) => self.timeouts.fetch_add(1, Ordering::Relaxed),
            CallFailure::Provider(_) => self.provider_errors.fetch_add(1, Ordering::Relaxed),
        };
    }
}

#[derive(Debug)]
pub struct ReliableGenerator {
    primary: Provider,
    fallback: Option<Provider>,
    fallback_enabled: bool,
    timeout: Duration,
    counters: Counters,
}

impl ReliableGenerator {
    pub fn new(primary: Provider, timeout: Duration) -> Self {
        Self {
            primary,
            fallback: None,
            fallback_enabled: false,
            timeout,
            counters: Counters::default(),
        }
    }

    pub fn from_config(config: &ReliabilityConfig) -> Self {
        let mut generator = Self::new(Provider::from_config(&config.primary), config.timeout());
        if let Some(fallback) = &config.fallback {
            generator = generator.with_fallback(Provider::from_config(fallback), config.fallback_enabled);
        }
        generator
    }

    pub fn with_fallback(mut self, fallback: Provider, enabled: bool) -> Self {
        self.fallback = Some(fallback);
        self.fallback_enabled = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> ReliabilityStats {
        ReliabilityStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            provider_errors: self.counters.provider_errors.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
        }
    }

    fn fallback(&self) -> Option<&Provider> {
        if self.fallback_enabled {
            self.fallback.as_ref()
        } else {
            None
        }
    }

    async fn bounded<T, E: std::fmt::Display>(
        &self,
        call: impl std::future::Future<Output = Result<T, E>>,
    ) -> Result<T, CallFailure> {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        let failure = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => CallFailure::Provider(e.to_string()),
            Err(_) => CallFailure::Timeout(self.timeout),
        };
        self.counters.note(&failure);
        Err(failure)
    }

    pub async fn generate(&self, request: &GenerationRequest) -> CallOutcome<String> {
        let started = Instant::now();
        let failure = match self.bounded(self.primary.generate(request)).await {
            Ok(value) => return Ok(done(value, Route::Primary, started)),
            Err(failure) => failure,
        };
        let Some(fallback) = self.fallback() else {
            return Err(failure);
        };
        tracing::debug!(
            "{} failed ({}), retrying on {}",
            self.primary.name(),
            failure,
            fallback.name()
        );
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        let value = self.bounded(fallback.generate(request)).await?;
        Ok(done(value, Route::Fallback, started))
    }

    pub async fn judge(&self, text: &str, context: &JudgeContext) -> CallOutcome<f64> {
        let started = Instant::now();
        let failure = match self.bounded(self.primary.judge(text, context)).await {
            Ok(value) => return Ok(done(value.clamp(0.0, 1.0), Route::Primary, started)),
            Err(failure) => failure,
        };
        let Some(fallback) = self.fallback() else {
            return Err(failure);
        };
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        let value = self.bounded(fallback.judge(text, context)).await?;
        Ok(done(value.clamp(0.0, 1.0), Route::Fallback, started))
    }
}

fn done<T>(value: T, route: Route, started: Instant) -> CallSuccess<T> {
    CallSuccess {
        value,
        route,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::Tone;
    use crate::provider::{ProviderError, Purpose, TemplateGenerator};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Sleeps before answering.
    struct Slow(Duration);

    #[async_trait]
    impl Generator for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
            tokio::time::sleep(self.0).await;
            Ok("late".into())
        }

        async fn judge(&self, _text: &str, _context: &JudgeContext) -> Result<f64, ProviderError> {
            tokio::time::sleep(self.0).await;
            Ok(1.0)
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(Purpose::Post, "@a focuses on tooling.", "write")
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_classified() {
        let slow = Provider::external(Arc::new(Slow(Duration::from_secs(60))));
        let wrapped = ReliableGenerator::new(slow, Duration::from_secs(30));

        let started = Instant::now();
        let err = wrapped.generate(&request()).await.unwrap_err();
        assert_eq!(err, CallFailure::Timeout(Duration::from_secs(30)));
        assert!(err.is_timeout());
        // the slow call is dropped at the deadline, not awaited
        assert!(started.elapsed() < Duration::from_secs(31));

        let stats = wrapped.stats();
        assert_eq!((stats.calls, stats.timeouts, stats.fallbacks), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_provider_error_without_fallback() {
        let wrapped = ReliableGenerator::new(Provider::Unavailable, Duration::from_secs(1));
        let err = wrapped.generate(&request()).await.unwrap_err();
        assert!(matches!(err, CallFailure::Provider(_)));
        assert_eq!(wrapped.stats().provider_errors, 1);
    }

    #[tokio::test]
    async fn test_fallback_answers_after_primary_error() {
        let wrapped = ReliableGenerator::new(Provider::Unavailable, Duration::from_secs(1))
            .with_fallback(Provider::Template(TemplateGenerator), true);
        let ok = wrapped.generate(&request()).await.unwrap();
        assert_eq!(ok.route, Route::Fallback);
        assert!(!ok.value.is_empty());
        assert_eq!(wrapped.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_disabled_fallback_is_not_used() {
        let wrapped = ReliableGenerator::new(Provider::Unavailable, Duration::from_secs(1))
            .with_fallback(Provider::Template(TemplateGenerator), false);
        assert!(wrapped.generate(&request()).await.is_err());
        assert_eq!(wrapped.stats().fallbacks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_failure_is_reported() {
        let slow = Provider::external(Arc::new(Slow(Duration::from_secs(60))));
        let wrapped = ReliableGenerator::new(Provider::Unavailable, Duration::from_secs(5))
            .with_fallback(slow, true);
        let err = wrapped
            .judge("text", &JudgeContext { persona: String::new(), tone: Tone::Objective })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        let stats = wrapped.stats();
        assert_eq!((stats.calls, stats.provider_errors, stats.timeouts), (2, 1, 1));
    }

    #[test]
    fn test_from_config_defaults() {
        let wrapped = ReliableGenerator::from_config(&ReliabilityConfig::default());
        assert_eq!(wrapped.timeout(), Duration::from_secs(30));
        assert!(wrapped.fallback().is_none());
    }
}
