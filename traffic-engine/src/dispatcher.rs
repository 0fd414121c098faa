//! Attribution dispatch to the backend
//!
//! Fire-and-forget: one attempt per qualifying trigger, no retry loop, no
//! local bookkeeping unless the backend confirms delivery.

use crate::attribution::AttributionPayload;
use crate::error::DispatchError;
use crate::session::{GateFlag, GateOutcome, SessionState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("traffic-engine/", env!("CARGO_PKG_VERSION"));

/// Attribution-ingest endpoint
#[async_trait]
pub trait AttributionBackend: Send + Sync {
    /// Deliver the payload; `Ok` only on confirmed success
    async fn send(&self, payload: &AttributionPayload) -> Result<(), DispatchError>;
}

/// Backend reached with a JSON POST
pub struct HttpBackend {
    http_client: reqwest::Client,
    endpoint: String,
    auth_header: Option<String>,
}

impl HttpBackend {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        auth_header: Option<String>,
    ) -> Result<Self, DispatchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            auth_header,
        })
    }
}

#[async_trait]
impl AttributionBackend for HttpBackend {
    async fn send(&self, payload: &AttributionPayload) -> Result<(), DispatchError> {
        let mut request = self.http_client.post(&self.endpoint).json(payload);
        if let Some(auth) = &self.auth_header {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected(status.as_u16(), error_text));
        }
        Ok(())
    }
}

/// Sends the stored attribution record to the backend exactly once
pub struct Dispatcher {
    state: Arc<SessionState>,
    backend: Arc<dyn AttributionBackend>,
}

impl Dispatcher {
    pub fn new(state: Arc<SessionState>, backend: Arc<dyn AttributionBackend>) -> Self {
        Self { state, backend }
    }

    /// Deliver the stored record if every trigger condition holds
    ///
    /// On success the `traffic_source_sent` gate is set and the record
    /// cleared. On failure both are left untouched so a later trigger may
    /// try again.
    pub async fn dispatch(&self, authenticated: bool) -> Result<AttributionPayload, DispatchError> {
        if !authenticated {
            return Err(DispatchError::NotAuthenticated);
        }

        let guard = match self.state.begin(GateFlag::TrafficSourceSent) {
            GateOutcome::Claimed(guard) => guard,
            GateOutcome::AlreadyFired | GateOutcome::InFlight => {
                debug!("Attribution already sent or in flight");
                return Err(DispatchError::AlreadySent);
            }
        };

        let record = self.state.read()?.ok_or(DispatchError::NoRecord)?;
        let payload = AttributionPayload::from(&record);

        if let Err(e) = self.backend.send(&payload).await {
            warn!(error = %e, source = %payload.traffic_source, "Attribution dispatch failed");
            return Err(e);
        }

        if let Err(e) = guard.complete() {
            warn!(error = %e, "Failed to persist traffic_source_sent gate");
        }
        if let Err(e) = self.state.clear() {
            warn!(error = %e, "Failed to clear delivered attribution record");
        }

        info!(
            source = %payload.traffic_source,
            medium = %payload.traffic_medium,
            "Attribution delivered"
        );
        Ok(payload)
    }
}
