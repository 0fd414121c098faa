//! Event types for the traffic engine
//!
//! The host application publishes a small set of named events on the
//! [`EventBus`]; the engine subscribes and reacts with idempotent handlers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Authenticated user record supplied by the external auth/session provider
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    /// Stable per-user identifier
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Free-text location, conventionally "City, State"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Engine event types
///
/// Serialized with a `type` tag matching the event names the host uses
/// (`page-loaded`, `auth-resolved`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    /// A page finished loading
    ///
    /// Triggers:
    /// - Attribution capture (first touch only)
    PageLoaded {
        /// Full page URL including query string
        url: String,
        /// Document referrer, empty when absent
        #[serde(default)]
        referrer: String,
    },

    /// The auth provider resolved the current authentication state
    ///
    /// Triggers (on unauthenticated → authenticated transition only):
    /// - Identity linking to analytics sinks
    /// - Login event
    /// - Attribution dispatch to the backend
    AuthResolved {
        /// `None` when signed out
        user: Option<AuthUser>,
    },
}

impl EngineEvent {
    /// Event name as published by the host
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::PageLoaded { .. } => "page-loaded",
            EngineEvent::AuthResolved { .. } => "auth-resolved",
        }
    }
}

/// Central event distribution bus
///
/// Wraps a `tokio::sync::broadcast` channel:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use traffic_common::events::{EventBus, EngineEvent};
///
/// let event_bus = EventBus::new(16);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(EngineEvent::PageLoaded {
///     url: "https://example.com/".to_string(),
///     referrer: String::new(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("No subscribers for engine event");
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_uses_kebab_tags() {
        let event = EngineEvent::PageLoaded {
            url: "https://example.com/?utm_source=x".to_string(),
            referrer: String::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "page-loaded");
        assert_eq!(event.name(), "page-loaded");

        let event = EngineEvent::AuthResolved { user: None };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "auth-resolved");
    }

    #[test]
    fn test_auth_user_deserializes_camel_case() {
        let json = r#"{"id":"u1","firstName":"Ada","location":"Austin, TX"}"#;
        let user: AuthUser = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.first_name.as_deref(), Some("Ada"));
        assert_eq!(user.location.as_deref(), Some("Austin, TX"));
        assert!(user.email.is_none());
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let sent = bus
            .emit(EngineEvent::AuthResolved {
                user: Some(AuthUser::new("u1")),
            })
            .unwrap();
        assert_eq!(sent, 2);

        assert_eq!(rx1.recv().await.unwrap().name(), "auth-resolved");
        assert_eq!(rx2.recv().await.unwrap().name(), "auth-resolved");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.capacity(), 4);
        assert!(bus
            .emit(EngineEvent::AuthResolved { user: None })
            .is_err());
        // Must not panic
        bus.emit_lossy(EngineEvent::AuthResolved { user: None });
    }
}
