//! Retrying fetcher with exponential backoff on rate limiting
//!
//! Only HTTP 429 is retried. Every other failure (other 4xx, 5xx, network
//! errors, malformed bodies) reaches the caller on the first attempt.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{FetchError, HttpRequest, HttpResponse, ReqwestTransport, Transport, TOO_MANY_REQUESTS};

/// Multiplier applied to the delay after each rate-limited attempt
pub const BACKOFF_FACTOR: u32 = 2;

/// Default number of retries after the first attempt
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Retry budget for a call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each one after
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy, rejecting a zero initial delay
    pub fn new(max_retries: u32, initial_delay: Duration) -> Result<Self, FetchError> {
        if initial_delay.is_zero() {
            return Err(FetchError::InvalidConfig(
                "initial retry delay must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_retries,
            initial_delay,
        })
    }

    /// Total time spent waiting if the first `retries` attempts are all rate limited
    pub fn total_backoff(&self, retries: u32) -> Duration {
        let mut state = RetryState::new(self);
        let mut total = Duration::ZERO;
        for _ in 0..retries.min(self.max_retries) {
            total = total.saturating_add(state.delay);
            state.advance();
        }
        total
    }
}

/// Progress of one logical request through its retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Retries performed so far
    pub attempt: u32,
    /// Delay to wait before the next retry
    pub delay: Duration,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            delay: policy.initial_delay,
        }
    }

    fn can_retry(&self, policy: &RetryPolicy) -> bool {
        self.attempt < policy.max_retries
    }

    fn advance(&mut self) {
        self.attempt += 1;
        self.delay = self.delay.saturating_mul(BACKOFF_FACTOR);
    }
}

/// HTTP client that transparently retries rate-limited requests
///
/// The wait between attempts is a timer, not a blocked thread, so other
/// requests keep making progress meanwhile. There is no cancellation token;
/// dropping the returned future is the only way to abandon a retry loop.
#[derive(Debug, Clone, Default)]
pub struct Fetcher<T = ReqwestTransport> {
    transport: T,
    policy: RetryPolicy,
}

impl Fetcher<ReqwestTransport> {
    /// Fetcher over a default reqwest client
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self::new(ReqwestTransport::new(), policy)
    }
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Executes `request`, retrying with backoff while the upstream answers 429
    ///
    /// # Returns
    /// * `Ok(HttpResponse)` - The first 2xx response
    /// * `Err(FetchError::Status)` - A non-429 failure status, or 429 once the
    ///   retry budget is exhausted
    /// * `Err(FetchError::Request)` - Network failure (never retried)
    pub async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut state = RetryState::new(&self.policy);

        loop {
            let response = self.transport.execute(request).await?;
            if response.is_success() {
                return Ok(response);
            }

            if response.status == TOO_MANY_REQUESTS && state.can_retry(&self.policy) {
                warn!(
                    url = %request.url,
                    retry = state.attempt + 1,
                    max_retries = self.policy.max_retries,
                    delay_ms = state.delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                tokio::time::sleep(state.delay).await;
                state.advance();
                continue;
            }

            debug!(
                url = %request.url,
                status = response.status,
                retries = state.attempt,
                "request failed"
            );
            return Err(FetchError::Status {
                status: response.status,
                url: request.url.clone(),
            });
        }
    }

    /// Executes `request` and parses the body as JSON
    pub async fn fetch_json<R: DeserializeOwned>(&self, request: &HttpRequest) -> Result<R, FetchError> {
        let response = self.execute(request).await?;
        Ok(serde_json::from_str(&response.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ScriptedTransport;
    use serde::Deserialize;
    use serde_json::json;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Ack {
        ok: bool,
    }

    fn policy(max_retries: u32, initial_ms: u64) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(initial_ms)).unwrap()
    }

    /// Asserts a paused-clock wait, allowing for timer tick rounding
    fn assert_waited(actual: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(2),
            "expected ~{:?}, waited {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_zero_initial_delay_rejected() {
        let result = RetryPolicy::new(3, Duration::ZERO);
        assert!(matches!(result, Err(FetchError::InvalidConfig(_))));
    }

    #[test]
    fn test_retry_state_doubles_delay() {
        let policy = policy(3, 100);
        let mut state = RetryState::new(&policy);
        assert_eq!(state.attempt, 0);
        assert_eq!(state.delay, Duration::from_millis(100));

        state.advance();
        assert_eq!(state.attempt, 1);
        assert_eq!(state.delay, Duration::from_millis(200));

        state.advance();
        assert_eq!(state.delay, Duration::from_millis(400));
    }

    #[test]
    fn test_total_backoff() {
        let policy = policy(3, 100);
        assert_eq!(policy.total_backoff(0), Duration::ZERO);
        assert_eq!(policy.total_backoff(2), Duration::from_millis(300));
        assert_eq!(policy.total_backoff(3), Duration::from_millis(700));
        // Capped at the retry budget
        assert_eq!(policy.total_backoff(10), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_rate_limits() {
        let transport = ScriptedTransport::new()
            .respond_status(429)
            .respond_status(429)
            .respond_json(json!({"ok": true}));
        let fetcher = Fetcher::new(transport.clone(), policy(3, 100));

        let start = Instant::now();
        let result: Ack = fetcher
            .fetch_json(&HttpRequest::get("https://api.example.com/fee"))
            .await
            .unwrap();

        assert_eq!(result, Ack { ok: true });
        assert_waited(start.elapsed(), 300);
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_between_attempts_double() {
        let transport = ScriptedTransport::new()
            .respond_status(429)
            .respond_status(429)
            .respond_status(429)
            .respond_status(200);
        let fetcher = Fetcher::new(transport.clone(), policy(5, 250));

        fetcher
            .execute(&HttpRequest::get("https://api.example.com/fee"))
            .await
            .unwrap();

        let times = transport.request_times();
        assert_eq!(times.len(), 4);
        assert_waited(times[1] - times[0], 250);
        assert_waited(times[2] - times[1], 500);
        assert_waited(times[3] - times[2], 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_rate_limited_exhausts_budget() {
        let transport = ScriptedTransport::new().otherwise(HttpResponse::new(429, ""));
        let fetcher = Fetcher::new(transport.clone(), policy(3, 10));

        let start = Instant::now();
        let err = fetcher
            .execute(&HttpRequest::get("https://api.example.com/fee"))
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(transport.attempts(), 4);
        assert_waited(start.elapsed(), 10 + 20 + 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_makes_one_attempt() {
        let transport = ScriptedTransport::new().otherwise(HttpResponse::new(429, ""));
        let fetcher = Fetcher::new(transport.clone(), policy(0, 10));

        let err = fetcher
            .execute(&HttpRequest::get("https://api.example.com/fee"))
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_not_retried() {
        let transport = ScriptedTransport::new()
            .respond_status(500)
            .respond_json(json!({"ok": true}));
        let fetcher = Fetcher::new(transport.clone(), policy(3, 100));

        let start = Instant::now();
        let err = fetcher
            .execute(&HttpRequest::get("https://api.example.com/fee"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert_eq!(transport.attempts(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let transport = ScriptedTransport::new().respond_status(404);
        let fetcher = Fetcher::new(transport.clone(), policy(3, 100));

        let err = fetcher
            .execute(&HttpRequest::get("https://api.example.com/missing"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_is_not_retried() {
        let transport = ScriptedTransport::new()
            .fail("connection reset")
            .respond_status(200);
        let fetcher = Fetcher::new(transport.clone(), policy(3, 100));

        let err = fetcher
            .execute(&HttpRequest::get("https://api.example.com/fee"))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Request(_)));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_server_error_stops() {
        let transport = ScriptedTransport::new()
            .respond_status(429)
            .respond_status(502)
            .respond_status(200);
        let fetcher = Fetcher::new(transport.clone(), policy(3, 100));

        let err = fetcher
            .execute(&HttpRequest::get("https://api.example.com/fee"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(502));
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let transport = ScriptedTransport::new().respond(HttpResponse::new(200, "{ invalid json }"));
        let fetcher = Fetcher::new(transport, policy(3, 100));

        let result: Result<Ack, FetchError> = fetcher
            .fetch_json(&HttpRequest::get("https://api.example.com/fee"))
            .await;

        assert!(matches!(result, Err(FetchError::Parse(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_replay_identical_request() {
        let transport = ScriptedTransport::new()
            .respond_status(429)
            .respond_status(200);
        let fetcher = Fetcher::new(transport.clone(), policy(1, 100));
        let request = HttpRequest::post("https://api.example.com/q", json!({"chain": "eth"}))
            .header("Ok-Access-Key", "key");

        fetcher.execute(&request).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        for sent in requests {
            assert_eq!(sent.url, request.url);
            assert_eq!(sent.headers, request.headers);
            assert_eq!(sent.body, request.body);
        }
    }
}
