//! Asset source double with fetch accounting and an optional gate

use cutline_audio::playback::AssetSource;
use cutline_audio::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Serves registered payloads by URI; unknown URIs fail.
///
/// A gated source holds every fetch until [`TestSource::open_gate`] is called.
pub struct TestSource {
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    fetches: Mutex<Vec<(String, Instant)>>,
    gate: Option<Semaphore>,
}

impl TestSource {
    pub fn new() -> Self {
        Self {
            payloads: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn with_payload(self, uri: &str, bytes: Vec<u8>) -> Self {
        self.insert(uri, bytes);
        self
    }

    pub fn insert(&self, uri: &str, bytes: Vec<u8>) {
        self.payloads.lock().unwrap().insert(uri.to_string(), bytes);
    }

    /// Let held and future fetches through
    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn fetch_count(&self, uri: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|(fetched, _)| fetched == uri)
            .count()
    }

    pub fn fetch_times(&self, uri: &str) -> Vec<Instant> {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|(fetched, _)| fetched == uri)
            .map(|(_, at)| *at)
            .collect()
    }
}

impl AssetSource for TestSource {
    fn fetch<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        async move {
            self.fetches
                .lock()
                .unwrap()
                .push((uri.to_string(), Instant::now()));

            if let Some(gate) = &self.gate {
                // The permit goes back on drop, so an open gate stays open
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| Error::AssetSource(e.to_string()))?;
            }

            self.payloads
                .lock()
                .unwrap()
                .get(uri)
                .cloned()
                .ok_or_else(|| Error::AssetSource(format!("No such asset: {}", uri)))
        }
        .boxed()
    }
}
