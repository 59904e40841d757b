use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fetch::{self, FetchRequest, DEFAULT_FETCH_LIMIT};
use crate::labels;
use crate::state::{AppState, HistoryEntry};

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct EntrySummary {
    entry_id: Uuid,
    camera_id: String,
    interval_seconds: u64,
    sink: &'static str,
}

async fn list_entries(State(state): State<AppState>) -> Json<Vec<EntrySummary>> {
    let entries = state
        .entries()
        .iter()
        .map(|entry| EntrySummary {
            entry_id: entry.id,
            camera_id: entry.camera_id.clone(),
            interval_seconds: entry.interval.as_secs(),
            sink: entry.sink.variant_name(),
        })
        .collect();
    Json(entries)
}

#[derive(Debug, Serialize)]
struct SensorSummary {
    label: String,
    label_name: Option<&'static str>,
    state: u8,
}

#[derive(Debug, Serialize)]
struct SensorsResponse {
    entry_id: Uuid,
    camera_id: String,
    last_images_count: usize,
    revision: u64,
    sensors: Vec<SensorSummary>,
}

async fn get_sensors(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<SensorsResponse>, (StatusCode, String)> {
    let entry = state
        .entry(entry_id)
        .ok_or((StatusCode::NOT_FOUND, "entry not found".to_string()))?;
    let data = entry.data.lock().expect("entry data poisoned");
    let sensors = data
        .label_counts
        .iter()
        .map(|(label, count)| SensorSummary {
            label: label.clone(),
            label_name: labels::readable_name(label),
            state: *count,
        })
        .collect();
    Ok(Json(SensorsResponse {
        entry_id: entry.id,
        camera_id: entry.camera_id.clone(),
        last_images_count: data.last_images_count,
        revision: entry.revision(),
        sensors,
    }))
}

#[derive(Debug, Serialize)]
struct SensorReading {
    label: String,
    label_name: Option<&'static str>,
    state: u8,
    history: Vec<HistoryEntry>,
    last_images_count: usize,
    revision: u64,
}

async fn get_sensor(
    State(state): State<AppState>,
    Path((entry_id, label)): Path<(Uuid, String)>,
) -> Result<Json<SensorReading>, (StatusCode, String)> {
    let entry = state
        .entry(entry_id)
        .ok_or((StatusCode::NOT_FOUND, "entry not found".to_string()))?;
    let data = entry.data.lock().expect("entry data poisoned");
    let count = *data
        .label_counts
        .get(&label)
        .ok_or((StatusCode::NOT_FOUND, format!("unknown label {label}")))?;
    Ok(Json(SensorReading {
        label_name: labels::readable_name(&label),
        label,
        state: count,
        history: data.history.clone(),
        last_images_count: data.last_images_count,
        revision: entry.revision(),
    }))
}

fn default_limit() -> u32 {
    DEFAULT_FETCH_LIMIT
}

#[derive(Debug, Deserialize)]
struct FetchImagesRequest {
    #[serde(default)]
    entry_id: Option<Uuid>,
    camera_id: String,
    #[serde(default)]
    offset: u32,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    wildlife_required: bool,
}

#[derive(Debug, Serialize)]
struct FetchImagesResponse {
    status: &'static str,
    fetched: usize,
}

async fn fetch_images(
    State(state): State<AppState>,
    Json(request): Json<FetchImagesRequest>,
) -> Result<Json<FetchImagesResponse>, (StatusCode, String)> {
    if state.entries().is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            "no camera entries registered".to_string(),
        ));
    }
    let cycle = FetchRequest {
        camera_id: request.camera_id,
        offset: request.offset,
        limit: request.limit,
        wildlife_required: request.wildlife_required,
    };
    match fetch::run_cycle(&state, request.entry_id, &cycle).await {
        Ok(fetched) => Ok(Json(FetchImagesResponse {
            status: "ok",
            fetched,
        })),
        Err(err) => {
            tracing::error!(camera_id = %cycle.camera_id, "on-demand fetch failed: {err:#}");
            Err((StatusCode::BAD_GATEWAY, format!("{err:#}")))
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/entries", get(list_entries))
        .route("/v1/entries/{entry_id}/sensors", get(get_sensors))
        .route("/v1/entries/{entry_id}/sensors/{label}", get(get_sensor))
        .route("/v1/fetch", post(fetch_images))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{test_config, test_entry};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let state = AppState::new(test_config(), reqwest::Client::new());
        let response = router(state)
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sensors_read_the_shared_snapshot_on_demand() {
        let state = AppState::new(test_config(), reqwest::Client::new());
        let entry = test_entry("cam-1");
        {
            let mut data = entry.data.lock().unwrap();
            data.last_images_count = 3;
            data.label_counts.insert("MELES".to_string(), 1);
            data.history.push(HistoryEntry {
                capture_date: Some("2024-01-01T10:00:00+00:00".to_string()),
                url: Some("https://cdn.example/1.jpg".to_string()),
                label: Some("MELES".to_string()),
                accuracy: Some(95.0),
            });
        }
        entry.notify_sensors();
        state.register(entry.clone());

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/entries/{}/sensors", entry.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["last_images_count"], 3);
        assert_eq!(body["revision"], 1);
        let meles = body["sensors"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["label"] == "MELES")
            .unwrap();
        assert_eq!(meles["state"], 1);

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/entries/{}/sensors/MELES", entry.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["state"], 1);
        assert_eq!(body["label_name"], "Badger (Meles meles)");
        assert_eq!(body["history"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_entries_and_labels_are_not_found() {
        let state = AppState::new(test_config(), reqwest::Client::new());
        let entry = test_entry("cam-1");
        state.register(entry.clone());

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/entries/{}/sensors", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/entries/{}/sensors/FELIS", entry.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn fetch_without_registered_entries_is_not_found() {
        let state = AppState::new(test_config(), reqwest::Client::new());
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/fetch")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"camera_id": "cam-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
