//! HTTP transports used by the fetcher

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use reqwest::Client;
use tokio::time::Instant;

use super::{FetchError, HttpRequest, HttpResponse};

/// Executes a single HTTP request with no retry logic of its own
pub trait Transport: Send + Sync {
    fn execute(
        &self,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, FetchError>> + Send;
}

/// Transport backed by a reqwest client
///
/// Timeouts are whatever the wrapped client is configured with.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

#[derive(Debug, Default)]
struct Script {
    routes: Vec<(String, HttpResponse)>,
    queued: VecDeque<Result<HttpResponse, FetchError>>,
    fallback: Option<HttpResponse>,
    requests: Vec<(Instant, HttpRequest)>,
}

/// Transport that replays canned responses
///
/// Useful for tests and offline runs. A request whose URL contains a routed
/// fragment always gets that route's response. Otherwise queued responses are
/// returned in order, then the fallback for every further request; with no
/// fallback the request fails as a network error. Clones share the same script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response
    pub fn respond(self, response: HttpResponse) -> Self {
        self.push(Ok(response));
        self
    }

    /// Queues a bare status with an empty body
    pub fn respond_status(self, status: u16) -> Self {
        self.respond(HttpResponse::new(status, ""))
    }

    /// Queues a 200 with the given JSON body
    pub fn respond_json(self, body: serde_json::Value) -> Self {
        self.respond(HttpResponse::ok_json(&body))
    }

    /// Queues a transport-level failure
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(FetchError::Request(message.into())));
        self
    }

    /// Always answers requests whose URL contains `fragment` with `response`
    pub fn route(self, fragment: impl Into<String>, response: HttpResponse) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.routes.push((fragment.into(), response));
        }
        self
    }

    /// Response returned once the queue is empty
    pub fn otherwise(self, response: HttpResponse) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.fallback = Some(response);
        }
        self
    }

    /// Number of requests executed so far
    pub fn attempts(&self) -> usize {
        self.script.lock().map(|s| s.requests.len()).unwrap_or(0)
    }

    /// Requests executed so far, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.script
            .lock()
            .map(|s| s.requests.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    /// When each request was executed, on the tokio clock
    pub fn request_times(&self) -> Vec<Instant> {
        self.script
            .lock()
            .map(|s| s.requests.iter().map(|(at, _)| *at).collect())
            .unwrap_or_default()
    }

    fn push(&self, item: Result<HttpResponse, FetchError>) {
        if let Ok(mut script) = self.script.lock() {
            script.queued.push_back(item);
        }
    }

    fn next(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| FetchError::Request("script lock poisoned".to_string()))?;
        script.requests.push((Instant::now(), request.clone()));

        if let Some((_, response)) = script
            .routes
            .iter()
            .find(|(fragment, _)| request.url.contains(fragment.as_str()))
        {
            return Ok(response.clone());
        }

        match script.queued.pop_front() {
            Some(item) => item,
            None => script
                .fallback
                .clone()
                .ok_or_else(|| FetchError::Request(format!("no scripted response for {}", request.url))),
        }
    }
}

impl Transport for ScriptedTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        self.next(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_transport_replays_in_order() {
        let transport = ScriptedTransport::new()
            .respond_status(429)
            .respond_json(serde_json::json!({"ok": true}));
        let request = HttpRequest::get("https://example.com");

        let first = transport.execute(&request).await.unwrap();
        let second = transport.execute(&request).await.unwrap();

        assert_eq!(first.status, 429);
        assert_eq!(second.body, r#"{"ok":true}"#);
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn test_scripted_transport_fallback() {
        let transport = ScriptedTransport::new().otherwise(HttpResponse::new(503, "down"));
        let request = HttpRequest::get("https://example.com");

        for _ in 0..3 {
            let response = transport.execute(&request).await.unwrap();
            assert_eq!(response.status, 503);
        }
    }

    #[tokio::test]
    async fn test_scripted_transport_empty_is_network_error() {
        let transport = ScriptedTransport::new();
        let result = transport.execute(&HttpRequest::get("https://example.com")).await;

        assert!(matches!(result, Err(FetchError::Request(_))));
    }

    #[tokio::test]
    async fn test_routes_take_precedence_over_queue() {
        let transport = ScriptedTransport::new()
            .route("/fee", HttpResponse::new(200, "fee"))
            .respond_status(500);

        let fee = transport.execute(&HttpRequest::get("https://x.test/fee?c=eth")).await.unwrap();
        let again = transport.execute(&HttpRequest::get("https://x.test/fee?c=btc")).await.unwrap();
        let other = transport.execute(&HttpRequest::get("https://x.test/news")).await.unwrap();

        assert_eq!(fee.body, "fee");
        assert_eq!(again.body, "fee");
        assert_eq!(other.status, 500);
    }

    #[tokio::test]
    async fn test_clones_share_script() {
        let transport = ScriptedTransport::new().respond_status(200);
        let clone = transport.clone();

        clone.execute(&HttpRequest::get("https://example.com")).await.unwrap();

        assert_eq!(transport.attempts(), 1);
        assert_eq!(transport.requests()[0].url, "https://example.com");
    }
}
