use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::client::TrailcamClient;
use crate::config::{Config, EntryConfig};
use crate::influx::DetectionSink;
use crate::labels;

/// Max detections kept in the in-memory history per entry.
pub const MAX_HISTORY_ITEMS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub capture_date: Option<String>,
    pub url: Option<String>,
    pub label: Option<String>,
    pub accuracy: Option<f64>,
}

/// Mutable per-entry sensor state, rebuilt by every dispatch cycle. Held
/// behind a mutex that is never kept across await points.
#[derive(Debug)]
pub struct EntryData {
    pub last_images_count: usize,
    pub history: Vec<HistoryEntry>,
    pub label_counts: BTreeMap<String, u8>,
}

impl Default for EntryData {
    fn default() -> Self {
        Self {
            last_images_count: 0,
            history: Vec::new(),
            label_counts: labels::empty_counts(),
        }
    }
}

/// Runtime state owned for the lifetime of one configured camera entry.
/// Dropping it releases the client and sink handles.
pub struct EntryState {
    pub id: Uuid,
    pub camera_id: String,
    pub interval: Duration,
    pub client: TrailcamClient,
    pub sink: DetectionSink,
    pub data: Mutex<EntryData>,
    revision: watch::Sender<u64>,
}

impl EntryState {
    pub fn new(
        camera_id: String,
        interval: Duration,
        client: TrailcamClient,
        sink: DetectionSink,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            id: Uuid::new_v4(),
            camera_id,
            interval,
            client,
            sink,
            data: Mutex::new(EntryData::default()),
            revision,
        }
    }

    /// Tell registered sensor views to re-read shared state.
    pub fn notify_sensors(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub http: reqwest::Client,
    entries: Arc<RwLock<Vec<Arc<EntryState>>>>,
}

impl AppState {
    pub fn new(config: Config, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn register(&self, entry: Arc<EntryState>) {
        self.entries.write().expect("entry registry poisoned").push(entry);
    }

    pub fn entries(&self) -> Vec<Arc<EntryState>> {
        self.entries.read().expect("entry registry poisoned").clone()
    }

    pub fn entry(&self, id: Uuid) -> Option<Arc<EntryState>> {
        self.entries
            .read()
            .expect("entry registry poisoned")
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }

    /// Explicit entry id when registered, else the first known entry.
    pub fn resolve_entry(&self, id: Option<Uuid>) -> Option<Arc<EntryState>> {
        let entries = self.entries.read().expect("entry registry poisoned");
        id.and_then(|id| entries.iter().find(|entry| entry.id == id).cloned())
            .or_else(|| entries.first().cloned())
    }
}

/// Validate credentials, resolve the sink variant once, and register the
/// entry. A failed login aborts setup so the operator sees it immediately.
pub async fn setup_entry(state: &AppState, cfg: &EntryConfig) -> Result<Arc<EntryState>> {
    let client = TrailcamClient::new(
        state.http.clone(),
        state.config.api_base.clone(),
        cfg.email.clone(),
        cfg.password.clone(),
    );
    client
        .login()
        .await
        .with_context(|| format!("credential validation failed for {}", cfg.email))?;

    let sink = DetectionSink::from_settings(&cfg.influx);
    let entry = Arc::new(EntryState::new(
        cfg.camera_id.clone(),
        cfg.fetch_interval(),
        client,
        sink,
    ));
    info!(
        entry_id = %entry.id,
        camera_id = %entry.camera_id,
        sink = entry.sink.variant_name(),
        "camera entry registered"
    );
    state.register(entry.clone());
    Ok(entry)
}


#[cfg(test)]
mod tests {
    use super::test_support::{test_config, test_entry};
    use super::*;

    #[test]
    fn resolve_entry_prefers_the_registered_id_and_falls_back_to_first() {
        let state = AppState::new(test_config(), reqwest::Client::new());
        assert!(state.resolve_entry(None).is_none());

        let first = test_entry("cam-1");
        let second = test_entry("cam-2");
        state.register(first.clone());
        state.register(second.clone());

        let resolved = state.resolve_entry(Some(second.id)).unwrap();
        assert_eq!(resolved.id, second.id);

        // Unknown ids fall back to the first registered entry.
        let resolved = state.resolve_entry(Some(Uuid::new_v4())).unwrap();
        assert_eq!(resolved.id, first.id);

        let resolved = state.resolve_entry(None).unwrap();
        assert_eq!(resolved.id, first.id);
    }

    #[test]
    fn notify_sensors_bumps_the_revision() {
        let entry = test_entry("cam-1");
        assert_eq!(entry.revision(), 0);
        entry.notify_sensors();
        entry.notify_sensors();
        assert_eq!(entry.revision(), 2);
    }
}
