//! In-process fakes for the backend and analytics sinks

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use traffic_common::config::IdentityConfig;
use traffic_engine::attribution::AttributionPayload;
use traffic_engine::dispatcher::{AttributionBackend, Dispatcher};
use traffic_engine::identity::{IdentityLinker, IdentityMatchPayload};
use traffic_engine::session::SessionState;
use traffic_engine::sinks::{AnalyticsSink, SinkRegistry, TrackedEvent};
use traffic_engine::storage::MemoryStorage;
use traffic_engine::{DispatchError, Engine, SinkError};

/// Backend recording every delivered payload; can be switched to fail
#[derive(Default)]
pub struct RecordingBackend {
    failing: AtomicBool,
    pub sent: Mutex<Vec<AttributionPayload>>,
    pub attempts: Mutex<usize>,
}

impl RecordingBackend {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn attempt_count(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl AttributionBackend for RecordingBackend {
    async fn send(&self, payload: &AttributionPayload) -> Result<(), DispatchError> {
        *self.attempts.lock().unwrap() += 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Network("simulated network error".to_string()));
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Sink recording identify/track calls
pub struct RecordingSink {
    name: String,
    failing: AtomicBool,
    identify_delay: Mutex<Option<Duration>>,
    pub identified: Mutex<Vec<(String, IdentityMatchPayload)>>,
    pub tracked: Mutex<Vec<TrackedEvent>>,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failing: AtomicBool::new(false),
            identify_delay: Mutex::new(None),
            identified: Mutex::new(Vec::new()),
            tracked: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make `identify` stall before answering
    pub fn set_identify_delay(&self, delay: Duration) {
        *self.identify_delay.lock().unwrap() = Some(delay);
    }

    pub fn identify_count(&self) -> usize {
        self.identified.lock().unwrap().len()
    }

    pub fn tracked_names(&self) -> Vec<String> {
        self.tracked
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }
}

#[async_trait]
impl AnalyticsSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn identify(
        &self,
        user_id: &str,
        payload: &IdentityMatchPayload,
    ) -> Result<(), SinkError> {
        let delay = *self.identify_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Network("pixel blocked".to_string()));
        }
        self.identified
            .lock()
            .unwrap()
            .push((user_id.to_string(), payload.clone()));
        Ok(())
    }

    async fn track(&self, event: &TrackedEvent) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Network("pixel blocked".to_string()));
        }
        self.tracked.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Engine wired to in-memory storage and recording fakes
pub struct TestEngine {
    pub engine: Engine,
    pub long_lived: Arc<MemoryStorage>,
    pub session: Arc<MemoryStorage>,
    pub backend: Arc<RecordingBackend>,
    pub sinks: Vec<Arc<RecordingSink>>,
}

pub fn build_engine(sink_names: &[&str]) -> TestEngine {
    let long_lived = Arc::new(MemoryStorage::new());
    let session = Arc::new(MemoryStorage::new());
    let state = Arc::new(SessionState::new(long_lived.clone(), session.clone()));

    let sinks: Vec<Arc<RecordingSink>> = sink_names
        .iter()
        .map(|name| Arc::new(RecordingSink::new(name)))
        .collect();
    let mut registry = SinkRegistry::new();
    for sink in &sinks {
        registry.register(sink.clone());
    }

    let backend = Arc::new(RecordingBackend::default());
    let linker = IdentityLinker::new(state.clone(), Arc::new(registry), IdentityConfig::default());
    let dispatcher = Dispatcher::new(state.clone(), backend.clone());

    TestEngine {
        engine: Engine::new(state, linker, Some(dispatcher)),
        long_lived,
        session,
        backend,
        sinks,
    }
}
