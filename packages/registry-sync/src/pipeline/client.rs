//! Resilient extraction client.
//!
//! Wraps an [`ExtractionService`] with failure classification, exponential
//! backoff with jitter, service-suggested delays, a cap on concurrent calls
//! and optional request pacing.

use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::error::{ExtractionError, ExtractionErrorKind, ServiceError};
use crate::pipeline::retry::{BackoffState, RetryPolicy, Sleeper, TokioSleeper};
use crate::traits::service::{ExtractionRequest, ExtractionService};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

type JitterSource = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Default cap on simultaneous calls to the service.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 4;

/// Classify a service failure.
///
/// 429/503 and rate-limit or overload wording are retryable; everything
/// else is fatal.
pub fn classify(error: &ServiceError) -> ExtractionErrorKind {
    match error.status {
        Some(429) => return ExtractionErrorKind::RateLimited,
        Some(503) => return ExtractionErrorKind::Unavailable,
        _ => {}
    }

    let message = error.message.to_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if mentions(&[
        "rate limit",
        "rate-limit",
        "ratelimit",
        "resource_exhausted",
        "resource exhausted",
        "too many requests",
        "quota",
    ]) {
        ExtractionErrorKind::RateLimited
    } else if mentions(&["overloaded", "unavailable", "try again later"]) {
        ExtractionErrorKind::Unavailable
    } else if matches!(error.status, Some(401 | 403))
        || mentions(&["unauthorized", "permission denied", "api key"])
    {
        ExtractionErrorKind::Unauthorized
    } else if mentions(&["safety", "blocked", "prohibited content"]) {
        ExtractionErrorKind::ContentRejected
    } else {
        ExtractionErrorKind::InvalidRequest
    }
}

/// Extraction client with retry, backoff and concurrency limits.
///
/// Cheap to share behind an `Arc` across concurrent merge tasks; the only
/// shared state is the concurrency limiter and the optional pacer.
pub struct ResilientExtractionClient<E: ExtractionService> {
    service: E,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    jitter: JitterSource,
    limiter: Arc<Semaphore>,
    pacer: Option<Arc<DirectRateLimiter>>,
}

impl<E: ExtractionService> ResilientExtractionClient<E> {
    /// Create a client with the default policy.
    pub fn new(service: E) -> Self {
        Self {
            service,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(|| rand::random::<f64>()),
            limiter: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_CALLS)),
            pacer: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the sleeper (tests use a recording sleeper).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the jitter source. Must return values in `[0, 1)`.
    pub fn with_jitter_source(mut self, jitter: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    /// Cap simultaneous service calls across all tasks using this client.
    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.limiter = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Pace calls to at most `requests_per_minute`. Zero disables pacing.
    pub fn with_requests_per_minute(mut self, requests_per_minute: u32) -> Self {
        self.pacer = NonZeroU32::new(requests_per_minute)
            .map(|rpm| Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn service(&self) -> &E {
        &self.service
    }

    /// Call the service under the client's policy.
    pub async fn extract(&self, request: &ExtractionRequest<'_>) -> Result<String, ExtractionError> {
        self.extract_with(request, &self.policy).await
    }

    /// Call the service under an explicit policy.
    ///
    /// Makes at most `policy.max_attempts` calls. Fatal failures are never
    /// retried; retryable failures that outlast the budget come back as
    /// [`ExtractionError::RetryExhausted`].
    pub async fn extract_with(
        &self,
        request: &ExtractionRequest<'_>,
        policy: &RetryPolicy,
    ) -> Result<String, ExtractionError> {
        let mut state = BackoffState::new(policy);

        loop {
            let outcome = self.call_once(request).await;
            state = state.record_attempt();

            let failure = match outcome {
                Ok(text) => {
                    debug!(
                        identifier = %request.identifier,
                        attempt = state.attempt,
                        "Extraction call succeeded"
                    );
                    return Ok(text);
                }
                Err(failure) => failure,
            };

            let kind = classify(&failure);
            if !kind.is_retryable() {
                error!(
                    identifier = %request.identifier,
                    kind = kind.code(),
                    error = %failure,
                    "Extraction failed with non-retryable error"
                );
                return Err(ExtractionError::Fatal {
                    identifier: request.identifier.to_string(),
                    kind,
                    message: failure.message,
                });
            }

            if !state.has_attempts_left(policy) {
                error!(
                    identifier = %request.identifier,
                    attempts = state.attempt,
                    kind = kind.code(),
                    "Extraction retries exhausted"
                );
                return Err(ExtractionError::RetryExhausted {
                    identifier: request.identifier.to_string(),
                    attempts: state.attempt,
                    kind,
                    message: failure.message,
                });
            }

            let (wait, next) = state.next_wait(policy, failure.retry_delay, (self.jitter)());
            warn!(
                identifier = %request.identifier,
                attempt = state.attempt,
                max_attempts = policy.max_attempts,
                kind = kind.code(),
                suggested_ms = failure.retry_delay.map(|d| d.as_millis() as u64),
                delay_ms = wait.as_millis() as u64,
                "Retryable extraction failure, backing off"
            );
            self.sleeper.sleep(wait).await;
            state = next;
        }
    }

    /// One service call under the concurrency limiter and pacer.
    ///
    /// The permit is dropped before any backoff sleep so waiting tasks do
    /// not hold a slot.
    async fn call_once(&self, request: &ExtractionRequest<'_>) -> Result<String, ServiceError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| ServiceError::new("extraction limiter closed"))?;

        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }

        self.service.generate(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_until, GatedExtractionService, MockExtractionService, RecordingSleeper};
    use crate::traits::content::DocumentContent;
    use serde_json::json;
    use std::time::Duration;

    fn client(
        service: MockExtractionService,
        sleeper: Arc<RecordingSleeper>,
    ) -> ResilientExtractionClient<MockExtractionService> {
        ResilientExtractionClient::new(service)
            .with_policy(
                RetryPolicy::new()
                    .with_max_attempts(3)
                    .with_initial_delay(Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(8))
                    .with_jitter(Duration::from_millis(400), Duration::from_millis(100)),
            )
            .with_sleeper(sleeper)
            .with_jitter_source(|| 0.5)
    }

    fn unavailable() -> ServiceError {
        ServiceError::new("The model is overloaded").with_status(503)
    }

    async fn run(client: &ResilientExtractionClient<MockExtractionService>) -> Result<String, ExtractionError> {
        let content = DocumentContent::Text("deed".into());
        let schema = json!({"type": "OBJECT"});
        let request = ExtractionRequest {
            system_prompt: "extract",
            content: &content,
            identifier: "2020-01-01_deed.pdf",
            schema: &schema,
        };
        client.extract(&request).await
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&ServiceError::new("x").with_status(429)), ExtractionErrorKind::RateLimited);
        assert_eq!(classify(&unavailable()), ExtractionErrorKind::Unavailable);
        assert_eq!(
            classify(&ServiceError::new("RESOURCE_EXHAUSTED: quota exceeded")),
            ExtractionErrorKind::RateLimited
        );
        assert_eq!(
            classify(&ServiceError::new("Service Unavailable")),
            ExtractionErrorKind::Unavailable
        );
        assert_eq!(
            classify(&ServiceError::new("API key not valid").with_status(400)),
            ExtractionErrorKind::Unauthorized
        );
        assert_eq!(
            classify(&ServiceError::new("blocked: SAFETY")),
            ExtractionErrorKind::ContentRejected
        );
        assert_eq!(
            classify(&ServiceError::new("Invalid JSON payload").with_status(400)),
            ExtractionErrorKind::InvalidRequest
        );
    }

    #[tokio::test]
    async fn test_two_503_then_success_makes_three_calls() {
        let service = MockExtractionService::new()
            .then_fail(unavailable())
            .then_fail(unavailable())
            .then_respond(r#"{"name":"ACME"}"#);
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = client(service, sleeper.clone());

        let text = run(&client).await.unwrap();

        assert_eq!(text, r#"{"name":"ACME"}"#);
        assert_eq!(client.service().call_count(), 3);
        assert_eq!(
            sleeper.sleeps(),
            vec![Duration::from_millis(1200), Duration::from_millis(2200)]
        );
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let service = MockExtractionService::new().always_fail(unavailable());
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = client(service, sleeper.clone());

        let err = run(&client).await.unwrap_err();

        assert!(err.is_retry_exhaustion());
        assert_eq!(err.kind(), ExtractionErrorKind::Unavailable);
        assert_eq!(client.service().call_count(), 3);
        // No sleep after the final attempt
        assert_eq!(sleeper.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let service = MockExtractionService::new()
            .then_fail(ServiceError::new("permission denied").with_status(403))
            .then_respond("{}");
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = client(service, sleeper.clone());

        let err = run(&client).await.unwrap_err();

        assert!(!err.is_retry_exhaustion());
        assert_eq!(err.kind(), ExtractionErrorKind::Unauthorized);
        assert_eq!(client.service().call_count(), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_suggested_delay_is_honored() {
        let service = MockExtractionService::new()
            .then_fail(
                ServiceError::new("rate limited")
                    .with_status(429)
                    .with_retry_delay(Duration::from_secs(5)),
            )
            .then_respond("{}");
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = client(service, sleeper.clone());

        run(&client).await.unwrap();

        // 5s suggested + half of the 100ms hinted window
        assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(5050)]);
    }

    #[tokio::test]
    async fn test_waits_never_exceed_cap_plus_jitter() {
        let service = MockExtractionService::new().always_fail(unavailable());
        let sleeper = Arc::new(RecordingSleeper::default());
        let policy = RetryPolicy::new()
            .with_max_attempts(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(4))
            .with_jitter(Duration::from_millis(300), Duration::from_millis(100));
        let client = ResilientExtractionClient::new(service)
            .with_policy(policy.clone())
            .with_sleeper(sleeper.clone())
            .with_jitter_source(|| rand::random::<f64>());

        run(&client).await.unwrap_err();

        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 9);
        assert!(sleeps.iter().all(|d| *d <= policy.max_delay + policy.jitter));
        assert!(sleeps.iter().sum::<Duration>() <= policy.max_total_wait());
        assert_eq!(client.service().call_count(), 10);
    }

    #[tokio::test]
    async fn test_max_concurrent_calls_caps_service_calls() {
        let service = GatedExtractionService::new(MockExtractionService::new().default_response("{}"));
        let client = Arc::new(ResilientExtractionClient::new(service.clone()).with_max_concurrent_calls(2));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move {
                    let content = DocumentContent::Text(format!("deed {}", i));
                    let schema = json!({"type": "OBJECT"});
                    let identifier = format!("doc-{}", i);
                    let request = ExtractionRequest {
                        system_prompt: "extract",
                        content: &content,
                        identifier: &identifier,
                        schema: &schema,
                    };
                    client.extract(&request).await
                })
            })
            .collect();

        wait_until(|| service.in_flight() == 2).await;
        // Give the other three every chance to slip past the limiter
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.peak(), 2);

        service.open();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "{}");
        }
        assert_eq!(service.peak(), 2);
        assert_eq!(service.finished(), 5);
    }
}
