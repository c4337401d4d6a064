//! Built-in job handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use forklift_queue::{DispatchError, HandlerError, HandlerRegistry, JobHandler};

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;

/// Register every built-in handler.
pub fn register_builtin(registry: &HandlerRegistry) -> Result<(), DispatchError> {
    registry.register(Arc::new(WebhookHandler::new()))?;
    registry.register(Arc::new(AlertHandler))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    url: String,

    #[serde(default = "default_method")]
    method: String,

    #[serde(default)]
    headers: HashMap<String, String>,

    /// Sent as-is when a string, as JSON otherwise.
    #[serde(default)]
    body: Option<Value>,

    #[serde(default)]
    timeout_secs: Option<u64>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Delivers an HTTP request. Any non-2xx response fails the job.
pub struct WebhookHandler {
    client: Client,
}

impl WebhookHandler {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("forklift/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for WebhookHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for WebhookHandler {
    fn job_type(&self) -> &str {
        "webhook"
    }

    async fn handle(&self, payload: &Value) -> Result<(), HandlerError> {
        let params: WebhookPayload = serde_json::from_value(payload.clone())?;
        let method = Method::from_bytes(params.method.to_uppercase().as_bytes())
            .map_err(|_| HandlerError::InvalidPayload(format!("bad method: {}", params.method)))?;

        let mut request = self.client.request(method.clone(), &params.url);
        for (name, value) in &params.headers {
            request = request.header(name, value);
        }
        if let Some(timeout) = params.timeout_secs {
            request = request.timeout(Duration::from_secs(timeout));
        }
        request = match params.body {
            Some(Value::String(text)) => request.body(text),
            Some(body) => request.json(&body),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| HandlerError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandlerError::Http(format!(
                "{} {} returned {}",
                method, params.url, status
            )));
        }

        debug!("Webhook {} {} delivered ({})", method, params.url, status);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AlertPayload {
    #[serde(default = "default_level")]
    level: String,

    message: String,

    #[serde(default)]
    source: Option<String>,
}

fn default_level() -> String {
    "warn".to_string()
}

/// Emits the alert as a log event at the requested level.
pub struct AlertHandler;

#[async_trait]
impl JobHandler for AlertHandler {
    fn job_type(&self) -> &str {
        "alert"
    }

    async fn handle(&self, payload: &Value) -> Result<(), HandlerError> {
        let alert: AlertPayload = serde_json::from_value(payload.clone())?;
        if alert.message.trim().is_empty() {
            return Err(HandlerError::InvalidPayload(
                "alert message cannot be empty".to_string(),
            ));
        }

        let source = alert.source.as_deref().unwrap_or("unknown");
        let message = alert.message.as_str();
        match alert.level.to_lowercase().as_str() {
            "error" => error!(target: "forklift::alert", source, "{}", message),
            "warn" | "warning" => warn!(target: "forklift::alert", source, "{}", message),
            "info" => info!(target: "forklift::alert", source, "{}", message),
            "debug" => debug!(target: "forklift::alert", source, "{}", message),
            "trace" => trace!(target: "forklift::alert", source, "{}", message),
            other => {
                return Err(HandlerError::InvalidPayload(format!(
                    "unknown alert level: {}",
                    other
                )));
            }
        }
        Ok(())
    }
}
