//! Engine orchestration
//!
//! Subscribes to `page-loaded` and `auth-resolved` and runs the gated side
//! effects. Handlers are idempotent: replaying an event never fires an effect
//! twice within its scope.

use crate::attribution::AttributionPayload;
use crate::dispatcher::{AttributionBackend, Dispatcher, HttpBackend};
use crate::error::{DispatchError, StorageError};
use crate::identity::{GatedOutcome, IdentityLinker};
use crate::session::{CaptureOutcome, SessionState};
use crate::sinks::{DeliveryReport, SinkRegistry};
use crate::storage::{FileStorage, MemoryStorage, Storage};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use traffic_common::config::TomlConfig;
use traffic_common::{AuthUser, EngineEvent};

/// File name of the long-lived scope under the root folder
pub const LONG_LIVED_FILE: &str = "local_storage.json";

/// Authentication as last reported by the auth provider
#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthPhase {
    Unknown,
    SignedOut,
    SignedIn(String),
}

/// What one event handler did
///
/// `None` fields were not attempted for this event.
#[derive(Debug, Default)]
pub struct HandleReport {
    pub capture: Option<Result<CaptureOutcome, StorageError>>,
    pub link: Option<GatedOutcome>,
    pub login: Option<GatedOutcome>,
    pub dispatch: Option<Result<AttributionPayload, DispatchError>>,
}

impl HandleReport {
    /// True when the event caused no work (e.g. a repeated auth callback)
    pub fn is_noop(&self) -> bool {
        self.capture.is_none()
            && self.link.is_none()
            && self.login.is_none()
            && self.dispatch.is_none()
    }
}

/// Attribution capture + identity linking state machine
pub struct Engine {
    state: Arc<SessionState>,
    linker: IdentityLinker,
    dispatcher: Option<Dispatcher>,
    auth: Mutex<AuthPhase>,
}

impl Engine {
    pub fn new(
        state: Arc<SessionState>,
        linker: IdentityLinker,
        dispatcher: Option<Dispatcher>,
    ) -> Self {
        Self {
            state,
            linker,
            dispatcher,
            auth: Mutex::new(AuthPhase::Unknown),
        }
    }

    /// Build from configuration
    ///
    /// Long-lived scope: JSON file under `root_folder`. Session scope: memory,
    /// so it ends with the process. Without a backend endpoint, attribution
    /// is captured but never dispatched.
    pub fn from_config(config: &TomlConfig, root_folder: &Path) -> Self {
        let quota = Some(config.storage.quota_bytes);
        let long_lived: Arc<dyn Storage> =
            Arc::new(FileStorage::open(root_folder.join(LONG_LIVED_FILE), quota));
        let session: Arc<dyn Storage> = Arc::new(MemoryStorage::with_quota(config.storage.quota_bytes));
        let state = Arc::new(SessionState::new(long_lived, session));

        let timeout = Duration::from_secs(config.backend.timeout_secs);
        let sinks = Arc::new(SinkRegistry::from_config(&config.sinks, timeout));
        info!(sinks = ?sinks.names(), "Analytics sinks registered");
        let linker = IdentityLinker::new(state.clone(), sinks, config.identity.clone());

        let dispatcher = match config.backend_endpoint() {
            Some(endpoint) => {
                match HttpBackend::new(endpoint, timeout, config.backend.auth_header.clone()) {
                    Ok(backend) => {
                        let backend: Arc<dyn AttributionBackend> = Arc::new(backend);
                        Some(Dispatcher::new(state.clone(), backend))
                    }
                    Err(e) => {
                        warn!(error = %e, "Attribution backend unavailable");
                        None
                    }
                }
            }
            None => {
                warn!("No attribution backend endpoint configured");
                None
            }
        };

        Self::new(state, linker, dispatcher)
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn linker(&self) -> &IdentityLinker {
        &self.linker
    }

    /// Handle one event; failures are logged and reported, never raised
    pub async fn handle(&self, event: EngineEvent) -> HandleReport {
        match event {
            EngineEvent::PageLoaded { url, referrer } => self.on_page_loaded(&url, &referrer).await,
            EngineEvent::AuthResolved { user } => self.on_auth_resolved(user).await,
        }
    }

    /// Capture first touch; a signed-in page load is also a dispatch opportunity
    async fn on_page_loaded(&self, url: &str, referrer: &str) -> HandleReport {
        let capture = self.state.capture(url, referrer, traffic_common::time::now());
        if let Err(e) = &capture {
            warn!(error = %e, "Attribution capture skipped");
        }

        let dispatch = if self.signed_in_user().is_some() {
            self.try_dispatch().await
        } else {
            None
        };

        HandleReport {
            capture: Some(capture),
            dispatch,
            ..Default::default()
        }
    }

    async fn try_dispatch(&self) -> Option<Result<AttributionPayload, DispatchError>> {
        let dispatcher = self.dispatcher.as_ref()?;
        let result = dispatcher.dispatch(true).await;
        if let Err(e) = &result {
            debug!(error = %e, "Attribution not dispatched");
        }
        Some(result)
    }

    async fn on_auth_resolved(&self, user: Option<AuthUser>) -> HandleReport {
        let Some(user) = user else {
            self.set_phase(AuthPhase::SignedOut);
            self.linker.forget();
            return HandleReport::default();
        };

        if !self.transition_to_signed_in(&user.id) {
            debug!(user_id = %user.id, "Auth unchanged, nothing to do");
            return HandleReport::default();
        }
        info!(user_id = %user.id, "User authenticated");

        // Payload cached first so the login event carries it
        let payload = self.linker.refresh(&user);
        let (link, login, dispatch) = tokio::join!(
            self.linker.link_payload(&user.id, &payload),
            self.linker.track_login(&user),
            self.try_dispatch(),
        );

        HandleReport {
            capture: None,
            link: Some(link),
            login: Some(login),
            dispatch,
        }
    }

    /// Record sign-in; false if this user was already signed in
    fn transition_to_signed_in(&self, user_id: &str) -> bool {
        let mut phase = match self.auth.lock() {
            Ok(phase) => phase,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *phase == AuthPhase::SignedIn(user_id.to_string()) {
            return false;
        }
        *phase = AuthPhase::SignedIn(user_id.to_string());
        true
    }

    fn set_phase(&self, next: AuthPhase) {
        let mut phase = match self.auth.lock() {
            Ok(phase) => phase,
            Err(poisoned) => poisoned.into_inner(),
        };
        *phase = next;
    }

    /// Track an application event with the cached identity payload
    pub async fn track(&self, name: &str, properties: Map<String, Value>) -> DeliveryReport {
        let user_id = self.signed_in_user();
        self.linker.track(name, properties, user_id.as_deref()).await
    }

    /// Id of the signed-in user, if any
    pub fn signed_in_user(&self) -> Option<String> {
        let phase = match self.auth.lock() {
            Ok(phase) => phase,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &*phase {
            AuthPhase::SignedIn(id) => Some(id.clone()),
            AuthPhase::Unknown | AuthPhase::SignedOut => None,
        }
    }

    /// Consume events until the bus closes
    pub async fn run(&self, mut rx: broadcast::Receiver<EngineEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    debug!(event = event.name(), "Engine event");
                    self.handle(event).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Engine lagged behind event bus");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, engine stopping");
                    break;
                }
            }
        }
    }
}
