//! reqwest-backed [`RemoteSync`]

use async_trait::async_trait;
use deckflow_core::{
    InterpretRequest, RemoteConfig, RemoteError, RemoteSync, RunAck, RunParameters, SavePayload,
};
use deckflow_model::{coerce, NewPresentation, Presentation, PresentationId, StageKind, SuggestionPatch};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Longest error body kept in a [`RemoteError::Status`]
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for the presentation service
#[derive(Debug, Clone)]
pub struct HttpRemote {
    http_client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
    request_timeout: Duration,
}

impl HttpRemote {
    /// Build a client from config
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| RemoteError::Network(format!("invalid base url '{}': {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Network(format!(
                "invalid base url '{}'",
                config.base_url
            )));
        }

        Ok(Self {
            http_client,
            base_url,
            api_token: config.api_token.clone().filter(|t| !t.is_empty()),
            request_timeout: config.request_timeout(),
        })
    }

    /// Service base URL, without trailing slash
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// `{base}/presentations[/{id}[/rest...]]`, each segment percent-encoded
    fn url(&self, id: Option<&PresentationId>, rest: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("presentations");
            if let Some(id) = id {
                segments.push(id.as_str());
            }
            segments.extend(rest);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http_client.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and decode; `Ok(None)` for 204, empty bodies and JSON `null`
    async fn send(&self, builder: RequestBuilder, context: &str) -> Result<Option<Value>, RemoteError> {
        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(context.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(&e))?;
        decode_body(&body)
    }

    fn transport_error(&self, error: &reqwest::Error) -> RemoteError {
        if error.is_timeout() {
            RemoteError::timeout(self.request_timeout)
        } else {
            RemoteError::Network(error.to_string())
        }
    }
}

/// Non-success status into a [`RemoteError`]
fn status_error(code: u16, body: &str) -> RemoteError {
    let mut message = body.trim().to_string();
    if message.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| message.is_char_boundary(*i))
            .unwrap_or(0);
        message.truncate(cut);
    }
    RemoteError::Status { code, message }
}

fn decode_body(body: &str) -> Result<Option<Value>, RemoteError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let value: Value =
        serde_json::from_str(body).map_err(|e| RemoteError::Decode(e.to_string()))?;
    Ok((!value.is_null()).then_some(value))
}

/// Strip a `{"data": ...}` or `{"presentation": ...}` envelope
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut obj) if obj.len() == 1 => {
            let key = ["data", "presentation"]
                .into_iter()
                .find(|k| obj.get(*k).is_some_and(Value::is_object));
            match key.and_then(|k| obj.remove(k)) {
                Some(inner) => inner,
                None => Value::Object(obj),
            }
        }
        other => other,
    }
}

#[derive(Debug, Default, Deserialize)]
struct AckBody {
    #[serde(default, alias = "task_id", alias = "jobId")]
    job_id: Option<String>,
}

fn run_ack(value: Option<Value>) -> RunAck {
    let body = value
        .and_then(|v| serde_json::from_value::<AckBody>(v).ok())
        .unwrap_or_default();
    RunAck {
        job_id: body.job_id,
    }
}

#[async_trait]
impl RemoteSync for HttpRemote {
    async fn fetch_presentation(&self, id: &PresentationId) -> Result<Presentation, RemoteError> {
        let url = self.url(Some(id), &[]);
        tracing::debug!("GET {}", url);
        let value = self
            .send(self.request(Method::GET, url), id.as_str())
            .await?
            .ok_or_else(|| RemoteError::Decode("empty presentation snapshot".into()))?;
        Ok(coerce::presentation(&unwrap_envelope(value), id))
    }

    async fn run_step(
        &self,
        id: &PresentationId,
        stage: StageKind,
        params: RunParameters,
    ) -> Result<RunAck, RemoteError> {
        let url = self.url(Some(id), &["steps", stage.as_str(), "run"]);
        tracing::debug!("POST {}", url);
        let value = self
            .send(self.request(Method::POST, url).json(&params), id.as_str())
            .await?;
        Ok(run_ack(value))
    }

    async fn save(&self, id: &PresentationId, payload: SavePayload) -> Result<(), RemoteError> {
        let url = self.url(Some(id), &["save"]);
        tracing::debug!("POST {} ({})", url, payload.label());
        self.send(self.request(Method::POST, url).json(&payload), id.as_str())
            .await?;
        Ok(())
    }

    async fn interpret(
        &self,
        id: &PresentationId,
        request: InterpretRequest,
    ) -> Result<Option<SuggestionPatch>, RemoteError> {
        let url = self.url(Some(id), &["interpret"]);
        tracing::debug!("POST {}", url);
        let value = self
            .send(self.request(Method::POST, url).json(&request), id.as_str())
            .await?;
        Ok(value.and_then(|v| coerce::suggestion_patch(&unwrap_envelope(v))))
    }

    async fn create_presentation(&self, new: NewPresentation) -> Result<Presentation, RemoteError> {
        let url = self.url(None, &[]);
        tracing::debug!("POST {}", url);
        let value = self
            .send(self.request(Method::POST, url).json(&new), "presentations")
            .await?
            .ok_or_else(|| RemoteError::Decode("empty create response".into()))?;
        let presentation = coerce::presentation(&unwrap_envelope(value), &PresentationId::new(""));
        if presentation.id.as_str().is_empty() {
            return Err(RemoteError::Decode("created presentation has no id".into()));
        }
        Ok(presentation)
    }
}
