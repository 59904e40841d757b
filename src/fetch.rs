use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{CameraImage, ImageQuery, Prediction};
use crate::influx::DetectionPoint;
use crate::state::{AppState, EntryData, EntryState, HistoryEntry, MAX_HISTORY_ITEMS};

pub const DEFAULT_FETCH_OFFSET: u32 = 0;
pub const DEFAULT_FETCH_LIMIT: u32 = 50;

/// Parameters for one fetch-and-dispatch pass.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub camera_id: String,
    pub offset: u32,
    pub limit: u32,
    pub wildlife_required: bool,
}

impl FetchRequest {
    /// Fixed parameters used by the auto-fetch timer path.
    pub fn timer(camera_id: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            offset: DEFAULT_FETCH_OFFSET,
            limit: DEFAULT_FETCH_LIMIT,
            wildlife_required: false,
        }
    }
}

/// Highest-accuracy labeled prediction. Ties resolve to the first in input
/// order; a missing accuracy sorts below any present one.
pub fn top_pick(predictions: &[Prediction]) -> Option<&Prediction> {
    let mut best: Option<&Prediction> = None;
    for prediction in predictions {
        if prediction.label.is_none() {
            continue;
        }
        let score = prediction.accuracy.unwrap_or(f64::NEG_INFINITY);
        match best {
            None => best = Some(prediction),
            Some(current) if score > current.accuracy.unwrap_or(f64::NEG_INFINITY) => {
                best = Some(prediction)
            }
            _ => {}
        }
    }
    best
}

/// Fold one fetched page into the entry state: per-image top pick, history
/// dedup by capture-date key, and a full label-count rebuild from this page
/// only. Returns the sink points queued for this page.
fn ingest_page(
    data: &mut EntryData,
    camera_id: &str,
    images: &[CameraImage],
) -> Vec<DetectionPoint> {
    data.last_images_count = images.len();

    let mut found: BTreeSet<String> = BTreeSet::new();
    let mut points = Vec::new();

    for image in images {
        let pick = top_pick(&image.predictions);
        let entry = HistoryEntry {
            capture_date: image.capture_date.map(|ts| ts.to_rfc3339()),
            url: image.url.clone(),
            label: pick.and_then(|p| p.label.clone()),
            accuracy: pick.and_then(|p| p.accuracy),
        };

        let duplicate = data
            .history
            .iter()
            .any(|existing| existing.capture_date == entry.capture_date);
        if !duplicate {
            data.history.insert(0, entry.clone());
        }

        if let Some(label) = entry.label {
            found.insert(label.clone());
            points.push(DetectionPoint {
                species: label,
                camera_id: camera_id.to_string(),
                accuracy: entry.accuracy.unwrap_or(0.0),
                timestamp: image.capture_date,
            });
        }
    }

    for (label, count) in data.label_counts.iter_mut() {
        *count = if found.contains(label) { 1 } else { 0 };
    }
    data.history.truncate(MAX_HISTORY_ITEMS);

    points
}

/// One fetch → transform → dispatch pass for a resolved entry.
pub async fn run_entry_cycle(
    entry: &EntryState,
    http: &reqwest::Client,
    request: &FetchRequest,
) -> Result<usize> {
    let query = ImageQuery {
        camera_id: request.camera_id.clone(),
        offset: request.offset,
        limit: request.limit,
        wildlife_required: request.wildlife_required,
    };
    let page = entry
        .client
        .get_images(&query)
        .await
        .with_context(|| format!("failed to fetch images for camera {}", request.camera_id))?;
    let fetched = page.images.len();

    let points = {
        let mut data = entry.data.lock().expect("entry data poisoned");
        ingest_page(&mut data, &request.camera_id, &page.images)
    };

    for point in &points {
        entry.sink.write_detection(http, point).await;
    }

    entry.notify_sensors();
    info!(camera_id = %request.camera_id, fetched, "fetched detection page");
    Ok(fetched)
}

/// On-demand entry point: resolves the target entry, then runs one cycle.
pub async fn run_cycle(
    state: &AppState,
    entry_id: Option<Uuid>,
    request: &FetchRequest,
) -> Result<usize> {
    let entry = state
        .resolve_entry(entry_id)
        .context("no camera entries registered")?;
    run_entry_cycle(&entry, &state.http, request).await
}

/// Fixed-interval auto-fetch per entry. The first tick fires immediately;
/// a failed cycle is logged and leaves the next tick unaffected.
pub struct FetchScheduler {
    state: AppState,
    entry: Arc<EntryState>,
}

impl FetchScheduler {
    pub fn new(state: AppState, entry: Arc<EntryState>) -> Self {
        Self { state, entry }
    }

    pub fn start(self, cancel: CancellationToken) {
        let Self { state, entry } = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(entry.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let request = FetchRequest::timer(&entry.camera_id);
                        if let Err(err) = run_entry_cycle(&entry, &state.http, &request).await {
                            warn!(camera_id = %entry.camera_id, "auto fetch failed: {err:#}");
                        }
                    }
                }
            }
        });
    }
}
