use std::sync::Arc;

use async_trait::async_trait;
use chat_core::config::{Config, ProxyAuth};
use chat_core::ChatMessage;
use log::{debug, error, info};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Proxy, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{FramingMode, StreamDispatcher, StreamOutcome};
use crate::error::ClientError;
use crate::handler::StreamHandler;
use crate::protocol::encode_message;

/// Stream modes requested when a run does not name its own.
pub const DEFAULT_STREAM_MODES: [&str; 3] = ["values", "updates", "messages"];

/// Source of the bearer token for run requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `None` sends the request without an `Authorization` header.
    async fn token(&self) -> anyhow::Result<Option<String>>;
}

/// A fixed token, typically `Config::api_key`.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn from_config(config: &Config) -> Self {
        Self(config.api_key.clone().filter(|key| !key.is_empty()))
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> anyhow::Result<Option<String>> {
        Ok(self.0.clone())
    }
}

/// A reply to a pending interrupt.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDecision {
    Accept,
    /// Run the action with different arguments.
    Edit { action: String, args: Value },
    Ignore,
    /// Free-text answer instead of running the action.
    Response(String),
}

impl ResumeDecision {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Accept => json!({"type": "accept", "args": null}),
            Self::Edit { action, args } => json!({
                "type": "edit",
                "args": {"action": action, "args": args},
            }),
            Self::Ignore => json!({"type": "ignore", "args": null}),
            Self::Response(text) => json!({"type": "response", "args": text}),
        }
    }
}

/// One streamed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRequest {
    /// Run inside this thread; stateless when `None`.
    pub thread_id: Option<String>,
    /// Overrides the configured assistant.
    pub assistant_id: Option<String>,
    pub input: Option<Value>,
    pub command: Option<Value>,
    /// Empty means [`DEFAULT_STREAM_MODES`].
    pub stream_mode: Vec<String>,
    pub config: Option<Value>,
}

impl RunRequest {
    /// A run whose input is the given history.
    pub fn with_messages(messages: &[ChatMessage]) -> Self {
        let messages: Vec<Value> = messages.iter().map(encode_message).collect();
        Self {
            input: Some(json!({ "messages": messages })),
            ..Default::default()
        }
    }

    /// Continue an interrupted run.
    pub fn resume(decision: ResumeDecision) -> Self {
        Self {
            command: Some(json!({ "resume": [decision.to_value()] })),
            ..Default::default()
        }
    }

    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_assistant(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    /// JSON body, filling in the assistant and stream modes.
    pub fn body(&self, default_assistant_id: &str) -> Value {
        let stream_mode: Vec<&str> = if self.stream_mode.is_empty() {
            DEFAULT_STREAM_MODES.to_vec()
        } else {
            self.stream_mode.iter().map(String::as_str).collect()
        };

        let mut body = json!({
            "assistant_id": self.assistant_id.as_deref().unwrap_or(default_assistant_id),
            "stream_mode": stream_mode,
        });
        if let Some(input) = &self.input {
            body["input"] = input.clone();
        }
        if let Some(command) = &self.command {
            body["command"] = command.clone();
        }
        if let Some(config) = &self.config {
            body["config"] = config.clone();
        }
        body
    }
}

fn apply_proxy_auth(proxy: Proxy, auth: Option<&ProxyAuth>) -> Proxy {
    let Some(auth) = auth else {
        return proxy;
    };
    if auth.username.is_empty() {
        return proxy;
    }
    proxy.basic_auth(&auth.username, &auth.password)
}

/// HTTP client for the graph service's streaming run endpoints.
#[derive(Clone)]
pub struct GraphClient {
    client: Arc<ClientWithMiddleware>,
    token_provider: Arc<dyn TokenProvider>,
    api_base: String,
    assistant_id: String,
    framing: FramingMode,
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("api_base", &self.api_base)
            .field("assistant_id", &self.assistant_id)
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

impl GraphClient {
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let client = Self::build_http_client(config)?;
        let retry_client = Self::build_retry_client(client, config.max_retries);

        Ok(Self {
            client: Arc::new(retry_client),
            token_provider: Arc::new(StaticToken::from_config(config)),
            api_base: config.api_base().to_string(),
            assistant_id: config.assistant_id().to_string(),
            framing: StreamDispatcher::from_config(config).framing(),
        })
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = provider;
        self
    }

    fn build_http_client(config: &Config) -> Result<Client, ClientError> {
        let mut builder = Client::builder().default_headers(Self::default_headers(config)?);
        if config.http_proxy.is_empty() && config.https_proxy.is_empty() {
            // proxies only come from Config
            builder = builder.no_proxy();
        }
        if !config.http_proxy.is_empty() {
            let proxy = Proxy::http(&config.http_proxy)?;
            builder = builder.proxy(apply_proxy_auth(proxy, config.http_proxy_auth.as_ref()));
        }
        if !config.https_proxy.is_empty() {
            let proxy = Proxy::https(&config.https_proxy)?;
            builder = builder.proxy(apply_proxy_auth(proxy, config.https_proxy_auth.as_ref()));
        }
        Ok(builder.build()?)
    }

    fn build_retry_client(client: Client, max_retries: u32) -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    pub fn default_headers(config: &Config) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ClientError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ClientError::InvalidHeader(name.as_str().to_string()))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn runs_url(&self, thread_id: Option<&str>) -> String {
        match thread_id {
            Some(thread_id) => format!("{}/threads/{}/runs/stream", self.api_base, thread_id),
            None => format!("{}/runs/stream", self.api_base),
        }
    }

    /// Send the run request. A non-success status is returned as
    /// [`ClientError::Status`].
    pub async fn start_run(&self, request: &RunRequest) -> Result<Response, ClientError> {
        let url = self.runs_url(request.thread_id.as_deref());
        let body = request.body(&self.assistant_id);

        let token = self
            .token_provider
            .token()
            .await
            .map_err(|e| ClientError::Auth(format!("{e:#}")))?;

        info!("Starting run at {}", url);
        let mut builder = self.client.post(&url);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = builder.json(&body).send().await.map_err(|e| {
            error!("Failed to send run request: {}", e);
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Run request failed with status {}", status);
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Run stream opened with status {}", status);
        Ok(response)
    }

    /// Start a run and dispatch its stream into `handler`.
    pub async fn stream_run<H>(
        &self,
        request: &RunRequest,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        H: StreamHandler + ?Sized,
    {
        let response = match self.start_run(request).await {
            Ok(response) => response,
            Err(err) => {
                let message = err.to_string();
                if let Err(callback_err) = handler.on_error(message.clone()) {
                    error!("on_error callback failed: {:#}", callback_err);
                }
                handler.on_set_loading(false);
                return StreamOutcome::Failed(message);
            }
        };

        StreamDispatcher::with_framing(self.framing)
            .dispatch_response(response, handler, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_url() {
        let mut config = Config::empty();
        config.api_base = Some("http://graph.local:2024/".to_string());
        let client = GraphClient::new(&config).unwrap();

        assert_eq!(client.runs_url(None), "http://graph.local:2024/runs/stream");
        assert_eq!(
            client.runs_url(Some("t-1")),
            "http://graph.local:2024/threads/t-1/runs/stream"
        );
    }

    #[test]
    fn test_run_body_defaults() {
        let request = RunRequest::with_messages(&[ChatMessage::new(
            "m1",
            chat_core::MessageRole::User,
            "hi",
        )]);
        let body = request.body("agent");

        assert_eq!(body["assistant_id"], "agent");
        assert_eq!(body["stream_mode"], json!(["values", "updates", "messages"]));
        assert_eq!(body["input"]["messages"][0]["type"], "human");
        assert!(body.get("command").is_none());
    }

    #[test]
    fn test_resume_body() {
        let body = RunRequest::resume(ResumeDecision::Edit {
            action: "send_email".to_string(),
            args: json!({"to": "x@y.z"}),
        })
        .with_assistant("mailer")
        .body("agent");

        assert_eq!(body["assistant_id"], "mailer");
        assert_eq!(body["command"]["resume"][0]["type"], "edit");
        assert_eq!(body["command"]["resume"][0]["args"]["args"]["to"], "x@y.z");
        assert!(body.get("input").is_none());
    }

    #[test]
    fn test_invalid_extra_header_is_rejected() {
        let mut config = Config::empty();
        config
            .extra_headers
            .insert("bad header".to_string(), "v".to_string());

        assert!(matches!(
            GraphClient::default_headers(&config),
            Err(ClientError::InvalidHeader(_))
        ));
    }

    #[tokio::test]
    async fn test_static_token_from_config() {
        let mut config = Config::empty();
        assert_eq!(StaticToken::from_config(&config).token().await.unwrap(), None);
        config.api_key = Some("secret".to_string());
        assert_eq!(
            StaticToken::from_config(&config).token().await.unwrap(),
            Some("secret".to_string())
        );
    }
}
