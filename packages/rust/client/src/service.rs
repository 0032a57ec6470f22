//! Remote generation service: trait seam and HTTP binding.
//!
//! The service owns the actual AI generation. This side only sends
//! `{project, path, action, pipeline}` and reads back success, usage and cost.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use blogpostgen_shared::{AppConfig, BlogPostGenError, PlanEntry, Result, resolve_api_key};

use crate::retry::{RetryPolicy, with_retry};

/// User-Agent string for service requests.
const USER_AGENT: &str = concat!("BlogPostGen/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in an [`BlogPostGenError::Http`] message.
const MAX_ERROR_BODY: usize = 500;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Per-call options for `generate` / `enhance`.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    /// Project the article belongs to.
    pub project: String,
    /// Action (mode) name, e.g. `add_faq`.
    pub action: String,
    /// Pipeline the action runs under.
    pub pipeline: String,
    /// Timeout for each attempt.
    pub timeout: Duration,
}

/// Request body for `generate` / `enhance`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionRequest<'a> {
    project: &'a str,
    path: &'a str,
    action: &'a str,
    pipeline: &'a str,
}

/// Response body shared by `generate` and `enhance`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    pub success: bool,
    /// Set by `enhance` when the service decided no change was needed.
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ServiceResponse {
    /// A successful response with the given usage, for tests and doubles.
    pub fn ok(tokens_used: u64, cost_usd: f64) -> Self {
        Self {
            success: true,
            tokens_used: Some(tokens_used),
            cost_usd: Some(cost_usd),
            ..Default::default()
        }
    }

    /// A `success = false` response carrying `error`.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct ExpandRequest<'a> {
    project: &'a str,
    ideas: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ExpandResponse {
    #[serde(default)]
    entries: Vec<PlanEntry>,
}

// ---------------------------------------------------------------------------
// GenerationService
// ---------------------------------------------------------------------------

/// The remote generation service as seen by the orchestrator.
pub trait GenerationService {
    /// Produce the article body for `path`.
    fn generate(
        &self,
        path: &str,
        options: &RemoteOptions,
    ) -> impl Future<Output = Result<ServiceResponse>>;

    /// Apply the enhancement named by `options.action` to `path`.
    fn enhance(
        &self,
        path: &str,
        options: &RemoteOptions,
    ) -> impl Future<Output = Result<ServiceResponse>>;

    /// Whether the service is reachable and healthy.
    fn health_check(&self) -> impl Future<Output = bool>;

    /// Turn free-form ideas into structured plan entries.
    fn expand_ideas(
        &self,
        project: &str,
        ideas: &[String],
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<PlanEntry>>>;
}

/// HTTP client for the generation service.
pub struct HttpGenerationService {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    retry: RetryPolicy,
    health_timeout: Duration,
}

impl HttpGenerationService {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str, api_key: Option<String>, retry: RetryPolicy) -> Result<Self> {
        let mut base_url = Url::parse(base_url).map_err(|e| {
            BlogPostGenError::config(format!("invalid service base_url '{base_url}': {e}"))
        })?;
        // Endpoints are joined relative to the base, so it must end in '/'.
        if !base_url.path().ends_with('/') {
            let with_slash = format!("{}/", base_url.path());
            base_url.set_path(&with_slash);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                BlogPostGenError::Network(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            retry,
            health_timeout: Duration::from_secs(10),
        })
    }

    /// Build from the `[service]` and `[retry]` config sections.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let service = Self::new(
            &config.service.base_url,
            resolve_api_key(config),
            RetryPolicy::from(&config.retry),
        )?;
        Ok(service.with_health_timeout(Duration::from_secs(config.service.health_timeout_secs)))
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| BlogPostGenError::config(format!("invalid endpoint {path}: {e}")))
    }

    async fn call_action(
        &self,
        endpoint: &str,
        path: &str,
        options: &RemoteOptions,
    ) -> Result<ServiceResponse> {
        let body = ActionRequest {
            project: &options.project,
            path,
            action: &options.action,
            pipeline: &options.pipeline,
        };
        self.post_json(endpoint, &body, options.timeout).await
    }

    /// POST `body` to `endpoint` under the retry policy.
    async fn post_json<B, T>(&self, endpoint: &str, body: &B, timeout: Duration) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self.endpoint(endpoint)?;
        let url = &url;
        with_retry(&self.retry, timeout, endpoint, || self.post_once(url, body)).await
    }

    async fn post_once<B, T>(&self, url: &Url, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        debug!(%url, "calling generation service");

        let mut request = self.client.post(url.clone()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| from_reqwest(url, e))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BlogPostGenError::Http {
                status: status.as_u16(),
                message: truncate(&body, MAX_ERROR_BODY),
            });
        }

        response.json::<T>().await.map_err(|e| {
            BlogPostGenError::parse(format!("{url}: invalid response body: {e}"))
        })
    }
}

impl GenerationService for HttpGenerationService {
    #[instrument(skip_all, fields(path = %path, action = %options.action))]
    async fn generate(&self, path: &str, options: &RemoteOptions) -> Result<ServiceResponse> {
        self.call_action("api/generate", path, options).await
    }

    #[instrument(skip_all, fields(path = %path, action = %options.action))]
    async fn enhance(&self, path: &str, options: &RemoteOptions) -> Result<ServiceResponse> {
        self.call_action("api/enhance", path, options).await
    }

    async fn health_check(&self) -> bool {
        let Ok(url) = self.endpoint("api/health") else {
            return false;
        };

        match tokio::time::timeout(self.health_timeout, self.client.get(url).send()).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(e)) => {
                debug!(error = %e, "health check failed");
                false
            }
            Err(_) => {
                debug!("health check timed out");
                false
            }
        }
    }

    async fn expand_ideas(
        &self,
        project: &str,
        ideas: &[String],
        timeout: Duration,
    ) -> Result<Vec<PlanEntry>> {
        let body = ExpandRequest { project, ideas };
        let response: ExpandResponse = self.post_json("api/plan/expand", &body, timeout).await?;
        Ok(response.entries)
    }
}

/// Map a transport error, keeping the status when reqwest saw one.
fn from_reqwest(url: &Url, e: reqwest::Error) -> BlogPostGenError {
    match e.status() {
        Some(status) => BlogPostGenError::Http {
            status: status.as_u16(),
            message: e.to_string(),
        },
        None => BlogPostGenError::Network(format!("{url}: {e}")),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(action: &str) -> RemoteOptions {
        RemoteOptions {
            project: "trail-blog".into(),
            action: action.into(),
            pipeline: "enhance".into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20))
    }

    fn service(server: &MockServer) -> HttpGenerationService {
        HttpGenerationService::new(&server.uri(), Some("secret".into()), quick_retry())
            .expect("build service")
    }

    #[tokio::test]
    async fn enhance_parses_camel_case_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/enhance"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "project": "trail-blog",
                "path": "trail-shoes",
                "action": "add_faq",
                "pipeline": "enhance",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "tokensUsed": 1200,
                "costUsd": 0.018,
                "message": "faq added"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = service(&server)
            .enhance("trail-shoes", &options("add_faq"))
            .await
            .expect("enhance");
        assert!(response.success);
        assert!(!response.skipped);
        assert_eq!(response.tokens_used, Some(1200));
        assert_eq!(response.cost_usd, Some(0.018));
    }

    #[tokio::test]
    async fn generate_hits_generate_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = service(&server)
            .generate("trail-shoes", &options("generate_content"))
            .await
            .expect("generate");
        assert!(response.success);
        assert_eq!(response.tokens_used, None);
    }

    #[tokio::test]
    async fn server_error_is_retried_until_budget_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/enhance"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(3)
            .mount(&server)
            .await;

        let err = service(&server)
            .enhance("trail-shoes", &options("add_jsonld"))
            .await
            .expect_err("should fail");
        match err {
            BlogPostGenError::Http { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("expected HTTP error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/enhance"))
            .respond_with(ResponseTemplate::new(400).set_body_string("unknown action"))
            .expect(1)
            .mount(&server)
            .await;

        let err = service(&server)
            .enhance("trail-shoes", &options("add_nonsense"))
            .await
            .expect_err("should fail");
        assert_eq!(err.status(), Some(400));
    }

    #[tokio::test]
    async fn rate_limit_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/enhance"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/enhance"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"success": true, "skipped": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = service(&server)
            .enhance("trail-shoes", &options("add_faq"))
            .await
            .expect("second attempt succeeds");
        assert!(response.skipped);
    }

    #[tokio::test]
    async fn slow_response_surfaces_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"success": true}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let service = HttpGenerationService::new(
            &server.uri(),
            None,
            RetryPolicy::new(1, Duration::from_millis(5), Duration::from_millis(5)),
        )
        .expect("build service");
        let mut opts = options("generate_content");
        opts.timeout = Duration::from_millis(50);

        let err = service
            .generate("trail-shoes", &opts)
            .await
            .expect_err("should time out");
        assert!(matches!(err, BlogPostGenError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn unreachable_service_is_network_error() {
        // Port 9 (discard) on localhost is almost never listening.
        let service = HttpGenerationService::new(
            "http://127.0.0.1:9",
            None,
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
        )
        .expect("build service");

        let err = service
            .generate("trail-shoes", &options("generate_content"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, BlogPostGenError::Network(_)));
    }

    #[tokio::test]
    async fn health_check_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        assert!(service(&server).health_check().await);

        let down = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&down)
            .await;
        assert!(!service(&down).health_check().await);
    }

    #[tokio::test]
    async fn expand_ideas_returns_entries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/plan/expand"))
            .and(body_partial_json(serde_json::json!({"ideas": ["shoes for mud"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "entries": [{
                    "title": "Best Trail Shoes for Muddy Runs",
                    "keywords": ["trail shoes", "mud"],
                    "description": "Grip-focused roundup"
                }]
            })))
            .mount(&server)
            .await;

        let entries = service(&server)
            .expand_ideas("trail-blog", &["shoes for mud".to_string()], Duration::from_secs(5))
            .await
            .expect("expand");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].keywords, vec!["trail shoes", "mud"]);
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let err = HttpGenerationService::new("not a url", None, quick_retry())
            .err()
            .expect("should fail");
        assert!(err.to_string().contains("invalid service base_url"));
    }

    #[test]
    fn truncate_keeps_short_bodies() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
