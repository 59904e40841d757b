use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use url::Url;

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:9310";
const DEFAULT_FETCH_INTERVAL_HOURS: u64 = 1;
const MIN_FETCH_INTERVAL_SECONDS: u64 = 60;

/// Influx sink settings as collected at entry setup. All optional; the sink
/// adapter decides between v2, legacy v1, or disabled from what is present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfluxSettings {
    #[serde(default)]
    pub influx_version: Option<String>,
    #[serde(default)]
    pub influx_url: Option<String>,
    #[serde(default)]
    pub influx_token: Option<String>,
    #[serde(default)]
    pub influx_org: Option<String>,
    #[serde(default)]
    pub influx_bucket: Option<String>,
    #[serde(default)]
    pub influx_db: Option<String>,
    #[serde(default)]
    pub influx_user: Option<String>,
    #[serde(default)]
    pub influx_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryConfig {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub camera_id: String,
    #[serde(default = "default_interval_hours")]
    pub auto_fetch_interval_hours: u64,
    #[serde(flatten)]
    pub influx: InfluxSettings,
}

fn default_interval_hours() -> u64 {
    DEFAULT_FETCH_INTERVAL_HOURS
}

impl EntryConfig {
    /// Auto-fetch cadence, clamped so a zero-hour entry still polls sanely.
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(
            (self.auto_fetch_interval_hours * 3600).max(MIN_FETCH_INTERVAL_SECONDS),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SetupFile {
    entries: Vec<EntryConfig>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_bind: String,
    pub api_base: String,
    pub entries: Vec<EntryConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let http_bind = env_string("TRAILCAM_HTTP_BIND", Some(DEFAULT_HTTP_BIND.to_string()))?;

        let api_base = env_string("TRAILCAM_API_BASE", None)?;
        Url::parse(&api_base).context("invalid TRAILCAM_API_BASE")?;
        let api_base = api_base.trim_end_matches('/').to_string();

        let entries = match env_optional("TRAILCAM_CONFIG_PATH") {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read setup file {path}"))?;
                parse_entries(&contents)
                    .with_context(|| format!("failed to parse setup file {path}"))?
            }
            None => vec![entry_from_env()?],
        };
        if entries.is_empty() {
            anyhow::bail!("no camera entries configured");
        }

        Ok(Self {
            http_bind,
            api_base,
            entries,
        })
    }
}

pub fn parse_entries(contents: &str) -> Result<Vec<EntryConfig>> {
    let setup: SetupFile = serde_json::from_str(contents)?;
    Ok(setup.entries)
}

fn entry_from_env() -> Result<EntryConfig> {
    let email = env_string("TRAILCAM_EMAIL", None)?;
    let password = env_string("TRAILCAM_PASSWORD", None)?;
    let camera_id = env_optional("TRAILCAM_CAMERA_ID").unwrap_or_default();
    let auto_fetch_interval_hours = env_u64(
        "TRAILCAM_FETCH_INTERVAL_HOURS",
        Some(DEFAULT_FETCH_INTERVAL_HOURS),
    )?;

    Ok(EntryConfig {
        email,
        password,
        camera_id,
        auto_fetch_interval_hours,
        influx: InfluxSettings {
            influx_version: env_optional("TRAILCAM_INFLUX_VERSION"),
            influx_url: env_optional("TRAILCAM_INFLUX_URL"),
            influx_token: env_optional("TRAILCAM_INFLUX_TOKEN"),
            influx_org: env_optional("TRAILCAM_INFLUX_ORG"),
            influx_bucket: env_optional("TRAILCAM_INFLUX_BUCKET"),
            influx_db: env_optional("TRAILCAM_INFLUX_DB"),
            influx_user: env_optional("TRAILCAM_INFLUX_USER"),
            influx_password: env_optional("TRAILCAM_INFLUX_PASSWORD"),
        },
    })
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
