use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request failed with status {0}")]
    Status(StatusCode),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
pub struct CameraImage {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(
        rename = "captureDate",
        default,
        deserialize_with = "de_capture_date"
    )]
    pub capture_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "ImagePredictions", default)]
    pub predictions: Vec<Prediction>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImagesPage {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub images: Vec<CameraImage>,
    #[serde(rename = "hasMore", default)]
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct ImageQuery {
    pub camera_id: String,
    pub offset: u32,
    pub limit: u32,
    pub wildlife_required: bool,
}

/// Tolerant ISO-8601 parse. The vendor emits timestamps with a trailing `Z`
/// and occasionally without an offset; anything unparseable degrades to None
/// rather than failing the record.
pub fn parse_capture_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let base = raw.split('.').next().unwrap_or(raw).trim_end_matches('Z');
    NaiveDateTime::parse_from_str(base, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn de_capture_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_capture_date))
}

/// The login response has carried the token under several names across
/// vendor API revisions.
fn extract_token(body: &JsonValue) -> Option<String> {
    for key in ["access_token", "token", "accessToken"] {
        if let Some(token) = body.get(key).and_then(|v| v.as_str()) {
            let trimmed = token.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

enum Fetched {
    Page(ImagesPage),
    AuthExpired,
}

/// Async client for the camera cloud: login plus paged image fetches. Shares
/// the process-wide reqwest client; the bearer token is obtained lazily and
/// refreshed once on a 401.
pub struct TrailcamClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl TrailcamClient {
    pub fn new(http: reqwest::Client, base_url: String, email: String, password: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            email,
            password,
            token: Mutex::new(None),
        }
    }

    pub async fn login(&self) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(format!("{}/auth/token", self.base_url))
            .json(&serde_json::json!({
                "email": self.email,
                "password": self.password,
            }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Auth(format!("login failed: {status}")));
        }
        let body: JsonValue = resp.json().await?;
        let token = extract_token(&body)
            .ok_or_else(|| ClientError::Auth("no access token in login response".to_string()))?;
        *self.token.lock().await = Some(token);
        Ok(())
    }

    async fn ensure_auth(&self) -> Result<(), ClientError> {
        if self.token.lock().await.is_none() {
            self.login().await?;
        }
        Ok(())
    }

    /// Fetch one page of images. A single 401 triggers exactly one re-login
    /// and one retry; a second 401 surfaces as a status error.
    pub async fn get_images(&self, query: &ImageQuery) -> Result<ImagesPage, ClientError> {
        self.ensure_auth().await?;
        match self.get_images_once(query).await? {
            Fetched::Page(page) => Ok(page),
            Fetched::AuthExpired => {
                self.login().await?;
                match self.get_images_once(query).await? {
                    Fetched::Page(page) => Ok(page),
                    Fetched::AuthExpired => Err(ClientError::Status(StatusCode::UNAUTHORIZED)),
                }
            }
        }
    }

    async fn get_images_once(&self, query: &ImageQuery) -> Result<Fetched, ClientError> {
        let token = self
            .token
            .lock()
            .await
            .clone()
            .ok_or_else(|| ClientError::Auth("no token available".to_string()))?;

        let params = [
            ("CameraId", query.camera_id.clone()),
            ("offset", query.offset.to_string()),
            ("limit", query.limit.to_string()),
            (
                "wildlifeRequired",
                if query.wildlife_required { "true" } else { "false" }.to_string(),
            ),
        ];
        let resp = self
            .http
            .get(format!("{}/images/get", self.base_url))
            .query(&params)
            .bearer_auth(token)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Ok(Fetched::AuthExpired);
        }
        if !status.is_success() {
            return Err(ClientError::Status(status));
        }
        Ok(Fetched::Page(resp.json().await?))
    }
}
