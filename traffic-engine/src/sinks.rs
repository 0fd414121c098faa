//! Analytics sinks
//!
//! Each sink is an opaque third-party destination exposing `identify` and
//! `track`. Delivery is best-effort and independent per sink: one failing
//! sink never blocks or fails the others.

use crate::error::SinkError;
use crate::identity::IdentityMatchPayload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use traffic_common::config::{SinkConfig, SinkKind};
use uuid::Uuid;

const USER_AGENT: &str = concat!("traffic-engine/", env!("CARGO_PKG_VERSION"));

/// One analytics event as delivered to every sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEvent {
    pub name: String,
    /// Shared by every sink's copy, for sink-side de-duplication
    pub event_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityMatchPayload>,
    pub properties: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl TrackedEvent {
    pub fn new(name: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            event_id: traffic_common::time::event_id(),
            user_id: None,
            identity: None,
            properties,
            timestamp: traffic_common::time::now(),
        }
    }

    pub fn with_identity(mut self, identity: Option<IdentityMatchPayload>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Opaque analytics destination
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Sink identifier used in logs and delivery reports
    fn name(&self) -> &str;

    /// Associate `user_id` with the identity-match payload
    async fn identify(&self, user_id: &str, payload: &IdentityMatchPayload)
        -> Result<(), SinkError>;

    /// Record one event
    async fn track(&self, event: &TrackedEvent) -> Result<(), SinkError>;
}

/// Sink posting JSON to a collector endpoint
pub struct HttpSink {
    name: String,
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpSink {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Misconfigured(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            http_client,
        })
    }

    async fn post(&self, body: Value) -> Result<(), SinkError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected(status.as_u16(), error_text));
        }
        Ok(())
    }
}

#[async_trait]
impl AnalyticsSink for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn identify(
        &self,
        user_id: &str,
        payload: &IdentityMatchPayload,
    ) -> Result<(), SinkError> {
        self.post(json!({
            "type": "identify",
            "userId": user_id,
            "traits": payload,
        }))
        .await
    }

    async fn track(&self, event: &TrackedEvent) -> Result<(), SinkError> {
        let mut body = serde_json::to_value(event)
            .map_err(|e| SinkError::Misconfigured(e.to_string()))?;
        if let Value::Object(map) = &mut body {
            map.insert("type".to_string(), Value::from("track"));
        }
        self.post(body).await
    }
}

/// Sink that only writes a structured log line
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl AnalyticsSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn identify(
        &self,
        user_id: &str,
        payload: &IdentityMatchPayload,
    ) -> Result<(), SinkError> {
        info!(
            sink = %self.name,
            user_id,
            fields = payload.to_properties().len(),
            "identify"
        );
        Ok(())
    }

    async fn track(&self, event: &TrackedEvent) -> Result<(), SinkError> {
        info!(
            sink = %self.name,
            event = %event.name,
            event_id = %event.event_id,
            "track"
        );
        Ok(())
    }
}

/// Per-sink delivery results of one fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, SinkError)>,
}

impl DeliveryReport {
    fn record(&mut self, sink: &str, result: Result<(), SinkError>) {
        match result {
            Ok(()) => self.delivered.push(sink.to_string()),
            Err(e) => {
                warn!(sink, error = %e, "Analytics sink delivery failed");
                self.failed.push((sink.to_string(), e));
            }
        }
    }
}

/// All registered analytics sinks
#[derive(Default)]
pub struct SinkRegistry {
    sinks: Vec<Arc<dyn AnalyticsSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build sinks from configuration
    ///
    /// An HTTP sink without an endpoint is skipped with a warning.
    pub fn from_config(configs: &[SinkConfig], timeout: Duration) -> Self {
        let mut registry = Self::new();
        for config in configs {
            match (config.kind, config.endpoint.as_deref()) {
                (SinkKind::Log, _) => registry.register(Arc::new(LogSink::new(&config.name))),
                (SinkKind::Http, Some(endpoint)) => {
                    match HttpSink::new(&config.name, endpoint, timeout) {
                        Ok(sink) => registry.register(Arc::new(sink)),
                        Err(e) => warn!(sink = %config.name, error = %e, "Skipping sink"),
                    }
                }
                (SinkKind::Http, None) => {
                    warn!(sink = %config.name, "HTTP sink has no endpoint, skipping");
                }
            }
        }
        registry
    }

    pub fn register(&mut self, sink: Arc<dyn AnalyticsSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// Identify with every sink concurrently
    pub async fn identify_all(&self, user_id: &str, payload: &IdentityMatchPayload) -> DeliveryReport {
        let results = join_all(self.sinks.iter().map(|sink| sink.identify(user_id, payload))).await;
        self.report(results)
    }

    /// Track with every sink concurrently
    pub async fn track_all(&self, event: &TrackedEvent) -> DeliveryReport {
        let results = join_all(self.sinks.iter().map(|sink| sink.track(event))).await;
        self.report(results)
    }

    fn report(&self, results: Vec<Result<(), SinkError>>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for (sink, result) in self.sinks.iter().zip(results) {
            report.record(sink.name(), result);
        }
        report
    }
}
