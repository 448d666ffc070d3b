//! Common test utilities for integration tests
//!
//! Provides an in-memory Conjur stand-in, status recording and rustls setup.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use async_trait::async_trait;
use secrets_provider::controller::status::{StatusError, StatusUpdater};
use secrets_provider::provider::{RetrieveError, SecretRetriever, SecretValues};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use zeroize::Zeroizing;

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
///
/// Uses a `Once` so it is installed a single time per test binary.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

/// Conjur stand-in serving values from a mutable map
#[derive(Debug, Default)]
pub struct MockConjur {
    values: Mutex<HashMap<String, String>>,
    fail_status: Mutex<Option<u16>>,
    calls: AtomicUsize,
}

impl MockConjur {
    pub fn with(pairs: &[(&str, &str)]) -> Arc<Self> {
        let conjur = Self::default();
        for (path, value) in pairs {
            conjur.set(path, value);
        }
        Arc::new(conjur)
    }

    pub fn set(&self, path: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(path.to_string(), value.to_string());
    }

    /// Make every following retrieval fail with `status`, or succeed again with `None`
    pub fn fail_with(&self, status: Option<u16>) {
        *self.fail_status.lock().unwrap() = status;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretRetriever for MockConjur {
    async fn retrieve_secrets(&self, paths: &[String]) -> Result<SecretValues, RetrieveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.fail_status.lock().unwrap() {
            return Err(RetrieveError::Status { status });
        }
        let values = self.values.lock().unwrap();
        Ok(paths
            .iter()
            .filter_map(|path| {
                values
                    .get(path)
                    .map(|v| (path.clone(), Zeroizing::new(v.as_bytes().to_vec())))
            })
            .collect())
    }
}

/// Records status events in order
#[derive(Debug, Default)]
pub struct RecordingStatus {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingStatus {
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }

    fn push(&self, event: &'static str) -> Result<(), StatusError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl StatusUpdater for RecordingStatus {
    fn set_secrets_provided(&self) -> Result<(), StatusError> {
        self.push("provided")
    }

    fn set_secrets_updated(&self) -> Result<(), StatusError> {
        self.push("updated")
    }

    fn copy_scripts(&self) -> Result<(), StatusError> {
        self.push("scripts")
    }
}

/// Owned annotation map from string pairs
pub fn annotations(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}
