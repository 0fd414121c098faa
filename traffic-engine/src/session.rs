//! Explicit session state: attribution store, session gates and locale
//!
//! One `SessionState` owns both storage scopes and is shared (via `Arc`) with
//! every component that reads or writes them.
//!
//! Gate lifecycle per effect class is `UNFIRED → FIRING → FIRED`. Only `FIRED`
//! is durable. `FIRING` lives in process memory, so within one process a
//! second claim on a flag in flight is refused; across processes (tabs) the
//! read-check-then-write remains best-effort.

use crate::attribution::AttributionRecord;
use crate::classifier::classify;
use crate::error::StorageError;
use crate::storage::{Storage, StorageScope};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const ATTRIBUTION_KEY: &str = "traffic_attribution";
pub const LOCALE_KEY: &str = "locale";

const FLAG_SET: &str = "true";

/// Side-effect classes guarded by a session gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateFlag {
    /// Login event sent to analytics sinks (session scope)
    LoginTracked,
    /// Attribution delivered to the backend (long-lived)
    TrafficSourceSent,
    /// Identity linked with analytics sinks (long-lived)
    AnalyticsLinked,
}

impl GateFlag {
    pub const ALL: [GateFlag; 3] = [
        GateFlag::LoginTracked,
        GateFlag::TrafficSourceSent,
        GateFlag::AnalyticsLinked,
    ];

    pub fn key(self) -> &'static str {
        match self {
            GateFlag::LoginTracked => "login_tracked",
            GateFlag::TrafficSourceSent => "traffic_source_sent",
            GateFlag::AnalyticsLinked => "analytics_linked",
        }
    }

    pub fn scope(self) -> StorageScope {
        match self {
            GateFlag::LoginTracked => StorageScope::Session,
            GateFlag::TrafficSourceSent | GateFlag::AnalyticsLinked => StorageScope::LongLived,
        }
    }
}

/// Result of trying to claim a gate before firing its effect
pub enum GateOutcome<'a> {
    /// Caller owns the effect; call `complete` once it succeeded
    Claimed(GateGuard<'a>),
    /// Effect already fired within the flag's scope
    AlreadyFired,
    /// Another caller in this process is firing it now
    InFlight,
}

impl std::fmt::Debug for GateOutcome<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateOutcome::Claimed(guard) => write!(f, "Claimed({:?})", guard.flag),
            GateOutcome::AlreadyFired => write!(f, "AlreadyFired"),
            GateOutcome::InFlight => write!(f, "InFlight"),
        }
    }
}

/// In-flight claim on a gate
///
/// Dropping the guard without `complete` returns the gate to `UNFIRED`.
pub struct GateGuard<'a> {
    state: &'a SessionState,
    flag: GateFlag,
}

impl GateGuard<'_> {
    pub fn flag(&self) -> GateFlag {
        self.flag
    }

    /// Persist the gate as fired
    pub fn complete(self) -> Result<(), StorageError> {
        self.state
            .storage(self.flag.scope())
            .set(self.flag.key(), FLAG_SET)
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.state.release(self.flag);
    }
}

/// Outcome of a capture attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A new record was classified and stored
    Captured(AttributionRecord),
    /// A record already exists; first touch wins
    AlreadyPresent,
}

/// Scoped client state shared by the engine components
pub struct SessionState {
    long_lived: Arc<dyn Storage>,
    session: Arc<dyn Storage>,
    in_flight: Mutex<HashSet<GateFlag>>,
    capture_lock: Mutex<()>,
}

impl SessionState {
    pub fn new(long_lived: Arc<dyn Storage>, session: Arc<dyn Storage>) -> Self {
        Self {
            long_lived,
            session,
            in_flight: Mutex::new(HashSet::new()),
            capture_lock: Mutex::new(()),
        }
    }

    pub fn storage(&self, scope: StorageScope) -> &dyn Storage {
        match scope {
            StorageScope::LongLived => self.long_lived.as_ref(),
            StorageScope::Session => self.session.as_ref(),
        }
    }

    // ========================================
    // Attribution Store
    // ========================================

    /// Classify and store the landing, unless a record already exists
    pub fn capture(
        &self,
        page_url: &str,
        referrer: &str,
        now: DateTime<Utc>,
    ) -> Result<CaptureOutcome, StorageError> {
        let _serialized = self
            .capture_lock
            .lock()
            .map_err(|_| StorageError::Unavailable("capture lock poisoned".to_string()))?;

        match self.read() {
            Ok(Some(_)) => {
                debug!("Attribution already captured, keeping first touch");
                return Ok(CaptureOutcome::AlreadyPresent);
            }
            Ok(None) => {}
            Err(StorageError::Corrupt { reason, .. }) => {
                warn!(%reason, "Replacing corrupt attribution record");
            }
            Err(e) => return Err(e),
        }

        let record = AttributionRecord::from_classification(
            classify(page_url, referrer),
            page_url,
            referrer,
            now,
        );
        let json = serde_json::to_string(&record).map_err(|e| StorageError::Corrupt {
            key: ATTRIBUTION_KEY.to_string(),
            reason: e.to_string(),
        })?;
        self.long_lived.set(ATTRIBUTION_KEY, &json)?;

        info!(
            source = %record.source,
            medium = %record.medium,
            "Captured first-touch attribution"
        );
        Ok(CaptureOutcome::Captured(record))
    }

    /// Stored attribution record, if any
    pub fn read(&self) -> Result<Option<AttributionRecord>, StorageError> {
        let Some(json) = self.long_lived.get(ATTRIBUTION_KEY)? else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: ATTRIBUTION_KEY.to_string(),
                reason: e.to_string(),
            })
    }

    /// Remove the stored record (after confirmed delivery)
    pub fn clear(&self) -> Result<(), StorageError> {
        self.long_lived.remove(ATTRIBUTION_KEY)
    }

    // ========================================
    // Session Gate
    // ========================================

    /// Whether the effect has fired within the flag's scope
    ///
    /// Unreadable storage reads as unset.
    pub fn is_set(&self, flag: GateFlag) -> bool {
        match self.storage(flag.scope()).get(flag.key()) {
            Ok(value) => value.as_deref() == Some(FLAG_SET),
            Err(e) => {
                warn!(key = flag.key(), error = %e, "Gate unreadable, treating as unset");
                false
            }
        }
    }

    /// Claim a gate before firing its effect
    ///
    /// The durable check and the in-process claim happen under one lock.
    pub fn begin(&self, flag: GateFlag) -> GateOutcome<'_> {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.is_set(flag) {
            return GateOutcome::AlreadyFired;
        }
        if !in_flight.insert(flag) {
            return GateOutcome::InFlight;
        }
        GateOutcome::Claimed(GateGuard { state: self, flag })
    }

    fn release(&self, flag: GateFlag) {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.remove(&flag);
    }

    // ========================================
    // Locale
    // ========================================

    pub fn locale(&self) -> Result<Option<String>, StorageError> {
        self.long_lived.get(LOCALE_KEY)
    }

    pub fn set_locale(&self, locale: &str) -> Result<(), StorageError> {
        self.long_lived.set(LOCALE_KEY, locale)
    }

    /// Clear the session scope, as a closed tab would
    pub fn end_session(&self) -> Result<(), StorageError> {
        self.session.clear()
    }
}
