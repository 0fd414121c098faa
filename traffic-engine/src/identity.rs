//! Identity linking with analytics sinks
//!
//! On the first authentication within the long-lived scope, a normalized
//! identity-match payload is sent to every registered sink. The payload is
//! recomputed on every authentication and cached for later event dispatches.

use crate::session::{GateFlag, GateOutcome, SessionState};
use crate::sinks::{DeliveryReport, SinkRegistry, TrackedEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use traffic_common::config::IdentityConfig;
use traffic_common::AuthUser;

/// Event name recorded once per session on sign-in
pub const LOGIN_EVENT: &str = "Login";

/// Normalized user attributes for sink-side identity matching
///
/// Absent fields are omitted, never sent as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMatchPayload {
    #[serde(rename = "em", default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "ph", default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(rename = "fn", default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(rename = "ln", default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(rename = "ct", default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(rename = "st", default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub external_id: String,
}

impl IdentityMatchPayload {
    pub fn from_user(user: &AuthUser, options: &IdentityConfig) -> Self {
        let (city, state) = user
            .location
            .as_deref()
            .map(split_location)
            .unwrap_or((None, None));

        let mut payload = Self {
            email: normalize_text(user.email.as_deref()),
            phone: normalize_phone(user.phone.as_deref()),
            first_name: normalize_text(user.first_name.as_deref()),
            last_name: normalize_text(user.last_name.as_deref()),
            city: city.and_then(|c| normalize_text(Some(&c))),
            state: state.and_then(|s| normalize_text(Some(&s))),
            country: normalize_text(Some(&options.default_country)),
            external_id: user.id.clone(),
        };

        if options.hash_values {
            payload.hash_in_place();
        }
        payload
    }

    fn hash_in_place(&mut self) {
        for field in [
            &mut self.email,
            &mut self.phone,
            &mut self.first_name,
            &mut self.last_name,
            &mut self.city,
            &mut self.state,
            &mut self.country,
        ] {
            if let Some(value) = field.as_mut() {
                *value = sha256_hex(value);
            }
        }
    }

    /// Payload as a flat JSON object
    pub fn to_properties(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Split free-text location into (city, state) on commas
///
/// First segment is the city, second the state; blank segments are dropped.
pub fn split_location(location: &str) -> (Option<String>, Option<String>) {
    let mut parts = location.split(',').map(str::trim);
    let segment = |s: Option<&str>| s.filter(|v| !v.is_empty()).map(str::to_string);
    let city = segment(parts.next());
    let state = segment(parts.next());
    (city, state)
}

fn normalize_text(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

fn normalize_phone(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.chars().filter(char::is_ascii_digit).collect::<String>())
        .filter(|v| !v.is_empty())
}

fn sha256_hex(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Result of a gated fan-out to the analytics sinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatedOutcome {
    /// Effect fired; per-sink results attached
    Fired(DeliveryReport),
    /// Already fired within the gate's scope
    AlreadyFired,
    /// Another caller is firing it right now
    InFlight,
}

/// Links authenticated users with analytics sinks and tracks events
pub struct IdentityLinker {
    state: Arc<SessionState>,
    sinks: Arc<SinkRegistry>,
    options: IdentityConfig,
    cached: RwLock<Option<IdentityMatchPayload>>,
}

impl IdentityLinker {
    pub fn new(state: Arc<SessionState>, sinks: Arc<SinkRegistry>, options: IdentityConfig) -> Self {
        Self {
            state,
            sinks,
            options,
            cached: RwLock::new(None),
        }
    }

    /// Cached payload for the current session, if a user has authenticated
    pub fn cached_payload(&self) -> Option<IdentityMatchPayload> {
        match self.cached.read() {
            Ok(cached) => cached.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Recompute and cache the payload for `user`
    pub fn refresh(&self, user: &AuthUser) -> IdentityMatchPayload {
        let payload = IdentityMatchPayload::from_user(user, &self.options);
        let mut cached = match self.cached.write() {
            Ok(cached) => cached,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cached = Some(payload.clone());
        payload
    }

    /// Forget the cached payload (sign-out)
    pub fn forget(&self) {
        let mut cached = match self.cached.write() {
            Ok(cached) => cached,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cached = None;
    }

    /// Send the identity payload to every sink, once per long-lived scope
    ///
    /// Sink failures are not retried; the gate is set once every sink has
    /// been attempted.
    pub async fn link(&self, user: &AuthUser) -> GatedOutcome {
        let payload = self.refresh(user);
        self.link_payload(&user.id, &payload).await
    }

    /// Gated identify with an already computed payload
    pub async fn link_payload(&self, user_id: &str, payload: &IdentityMatchPayload) -> GatedOutcome {
        let guard = match self.state.begin(GateFlag::AnalyticsLinked) {
            GateOutcome::Claimed(guard) => guard,
            GateOutcome::AlreadyFired => {
                debug!(user_id, "Analytics identity already linked");
                return GatedOutcome::AlreadyFired;
            }
            GateOutcome::InFlight => return GatedOutcome::InFlight,
        };

        let report = self.sinks.identify_all(user_id, payload).await;
        if let Err(e) = guard.complete() {
            warn!(error = %e, "Failed to persist analytics_linked gate");
        }

        info!(
            user_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Linked analytics identity"
        );
        GatedOutcome::Fired(report)
    }

    /// Track the login event, once per session scope
    pub async fn track_login(&self, user: &AuthUser) -> GatedOutcome {
        let guard = match self.state.begin(GateFlag::LoginTracked) {
            GateOutcome::Claimed(guard) => guard,
            GateOutcome::AlreadyFired => {
                debug!(user_id = %user.id, "Login already tracked this session");
                return GatedOutcome::AlreadyFired;
            }
            GateOutcome::InFlight => return GatedOutcome::InFlight,
        };

        let report = self.track(LOGIN_EVENT, Map::new(), Some(&user.id)).await;
        if let Err(e) = guard.complete() {
            warn!(error = %e, "Failed to persist login_tracked gate");
        }
        GatedOutcome::Fired(report)
    }

    /// Track an arbitrary event, enriched with the cached identity payload
    pub async fn track(
        &self,
        name: &str,
        properties: Map<String, Value>,
        user_id: Option<&str>,
    ) -> DeliveryReport {
        let event = TrackedEvent::new(name, properties)
            .with_identity(self.cached_payload())
            .with_user(user_id.map(str::to_string));
        self.sinks.track_all(&event).await
    }
}
