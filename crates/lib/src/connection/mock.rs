//! Scripted in-process chat network for tests and local development.
//!
//! Records every connect, send, logout and end, and lets the caller play lifecycle events
//! into the most recent session as if the network had produced them.

use crate::connection::collaborator::{Connector, EventSink, SessionEvent, SessionHandle};
use crate::credentials::Credentials;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    sinks: Mutex<Vec<EventSink>>,
    credentials_seen: Mutex<Vec<Option<Credentials>>>,
    sent: Mutex<Vec<(String, String)>>,
    send_error: Mutex<Option<String>>,
    fail_connect: AtomicBool,
    logouts: AtomicUsize,
    ends: AtomicUsize,
}

/// Mock connector. Clones share the same recorded state.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connect calls so far.
    pub fn connects(&self) -> usize {
        self.state.sinks.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Sink of the latest connect call.
    pub fn latest_sink(&self) -> Option<EventSink> {
        self.state
            .sinks
            .lock()
            .ok()
            .and_then(|s| s.last().cloned())
    }

    /// Play an event into the latest session. Returns false if there is none or the manager stopped.
    pub async fn emit(&self, event: SessionEvent) -> bool {
        match self.latest_sink() {
            Some(sink) => sink.emit(event).await,
            None => false,
        }
    }

    /// Credentials passed to each connect call, oldest first.
    pub fn credentials_seen(&self) -> Vec<Option<Credentials>> {
        self.state
            .credentials_seen
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// `(address, content)` pairs accepted by `send`.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn logouts(&self) -> usize {
        self.state.logouts.load(Ordering::SeqCst)
    }

    pub fn ends(&self) -> usize {
        self.state.ends.load(Ordering::SeqCst)
    }

    /// Make subsequent connect calls fail.
    pub fn fail_connects(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent sends fail with `error` (or succeed again with `None`).
    pub fn fail_sends(&self, error: Option<&str>) {
        if let Ok(mut e) = self.state.send_error.lock() {
            *e = error.map(str::to_string);
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        credentials: Option<Credentials>,
        sink: EventSink,
    ) -> Result<Arc<dyn SessionHandle>, String> {
        if let Ok(mut seen) = self.state.credentials_seen.lock() {
            seen.push(credentials);
        }
        if let Ok(mut sinks) = self.state.sinks.lock() {
            sinks.push(sink);
        }
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err("mock connect refused".to_string());
        }
        Ok(Arc::new(MockSession {
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    state: Arc<MockState>,
}

#[async_trait]
impl SessionHandle for MockSession {
    async fn send(&self, address: &str, content: &str) -> Result<(), String> {
        let error = self.state.send_error.lock().ok().and_then(|e| e.clone());
        if let Some(e) = error {
            return Err(e);
        }
        if let Ok(mut sent) = self.state.sent.lock() {
            sent.push((address.to_string(), content.to_string()));
        }
        Ok(())
    }

    async fn logout(&self) -> Result<(), String> {
        self.state.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn end(&self) -> Result<(), String> {
        self.state.ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
