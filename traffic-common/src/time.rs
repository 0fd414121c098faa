//! Timestamp and identifier utilities

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Generate a new event identifier (UUIDv4)
///
/// Attached to every tracked analytics event so sinks can de-duplicate
/// deliveries of the same logical event.
pub fn event_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[tokio::test]
    async fn test_now_successive_calls_advance() {
        let time1 = now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let time2 = now();
        assert!(time2 > time1);
    }

    #[test]
    fn test_event_ids_are_unique() {
        assert_ne!(event_id(), event_id());
        assert_eq!(event_id().get_version_num(), 4);
    }
}
