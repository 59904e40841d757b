use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::InfluxSettings;

const MEASUREMENT: &str = "trailcam_image";

/// One detection mirrored into the time-series backend.
#[derive(Debug, Clone)]
pub struct DetectionPoint {
    pub species: String,
    pub camera_id: String,
    pub accuracy: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct V1Sink {
    url: String,
    db: String,
    user: String,
    password: String,
}

#[derive(Debug, Clone)]
pub struct V2Sink {
    url: String,
    token: String,
    org: String,
    bucket: String,
}

/// Sink variant resolved once per entry at setup and reused by every cycle.
/// v2 wins when fully configured unless the version flag pins v1.
#[derive(Debug, Clone)]
pub enum DetectionSink {
    Disabled,
    V1(V1Sink),
    V2(V2Sink),
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl DetectionSink {
    pub fn from_settings(settings: &InfluxSettings) -> Self {
        let version = present(&settings.influx_version).unwrap_or("2");

        if version != "1" {
            if let (Some(url), Some(token), Some(org), Some(bucket)) = (
                present(&settings.influx_url),
                present(&settings.influx_token),
                present(&settings.influx_org),
                present(&settings.influx_bucket),
            ) {
                debug!(bucket, org, "configured InfluxDB v2 sink");
                return Self::V2(V2Sink {
                    url: url.trim_end_matches('/').to_string(),
                    token: token.to_string(),
                    org: org.to_string(),
                    bucket: bucket.to_string(),
                });
            }
        }

        if let (Some(url), Some(db), Some(user)) = (
            present(&settings.influx_url),
            present(&settings.influx_db),
            present(&settings.influx_user),
        ) {
            debug!(url, db, "configured InfluxDB v1 sink");
            return Self::V1(V1Sink {
                url: url.trim_end_matches('/').to_string(),
                db: db.to_string(),
                user: user.to_string(),
                password: present(&settings.influx_password)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        Self::Disabled
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::V1(_) => "v1",
            Self::V2(_) => "v2",
        }
    }

    /// Mirror one detection. Failures are logged and swallowed; the dispatch
    /// cycle must never abort because the sink is unavailable.
    pub async fn write_detection(&self, http: &reqwest::Client, point: &DetectionPoint) {
        if matches!(self, Self::Disabled) {
            return;
        }
        if let Err(err) = self.try_write(http, point).await {
            warn!(
                species = %point.species,
                camera_id = %point.camera_id,
                "failed to write detection point: {err:#}"
            );
        }
    }

    async fn try_write(&self, http: &reqwest::Client, point: &DetectionPoint) -> Result<()> {
        let line = encode_line(
            MEASUREMENT,
            &[
                ("species", point.species.as_str()),
                ("camera_id", point.camera_id.as_str()),
            ],
            &[("accuracy", FieldValue::Float(point.accuracy))],
            point.timestamp,
        )
        .context("detection point has no fields")?;

        match self {
            Self::Disabled => Ok(()),
            Self::V1(sink) => {
                let resp = http
                    .post(format!("{}/write", sink.url))
                    .query(&[("db", sink.db.as_str())])
                    .basic_auth(&sink.user, Some(&sink.password))
                    .body(line)
                    .send()
                    .await
                    .context("influx v1 write request failed")?;
                let status = resp.status();
                if status.as_u16() == 204 || status.as_u16() == 200 {
                    Ok(())
                } else {
                    anyhow::bail!("influx v1 write rejected with status {status}");
                }
            }
            Self::V2(sink) => {
                http.post(format!("{}/api/v2/write", sink.url))
                    .query(&[
                        ("org", sink.org.as_str()),
                        ("bucket", sink.bucket.as_str()),
                        ("precision", "ns"),
                    ])
                    .header("Authorization", format!("Token {}", sink.token))
                    .body(line)
                    .send()
                    .await
                    .context("influx v2 write request failed")?
                    .error_for_status()
                    .context("influx v2 write rejected")?;
                Ok(())
            }
        }
    }
}

#[allow(dead_code)]
pub enum FieldValue {
    Float(f64),
    Bool(bool),
    Text(String),
}

fn escape_measurement(value: &str) -> String {
    value.replace(' ', "\\ ")
}

fn escape_tag(value: &str) -> String {
    value
        .replace(' ', "\\ ")
        .replace(',', "\\,")
        .replace('=', "\\=")
}

fn render_field(value: &FieldValue) -> String {
    match value {
        FieldValue::Float(v) => format!("{v}"),
        FieldValue::Bool(v) => if *v { "true" } else { "false" }.to_string(),
        FieldValue::Text(v) => format!("\"{}\"", v.replace('"', "\\\"")),
    }
}

/// Build one line-protocol record. Returns None when no fields remain, since
/// a field-less line is invalid.
pub fn encode_line(
    measurement: &str,
    tags: &[(&str, &str)],
    fields: &[(&str, FieldValue)],
    timestamp: Option<DateTime<Utc>>,
) -> Option<String> {
    if fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(measurement);
    for (key, value) in tags {
        line.push(',');
        line.push_str(key);
        line.push('=');
        line.push_str(&escape_tag(value));
    }

    let rendered: Vec<String> = fields
        .iter()
        .map(|(key, value)| format!("{key}={}", render_field(value)))
        .collect();
    line.push(' ');
    line.push_str(&rendered.join(","));

    if let Some(ns) = timestamp.and_then(|ts| ts.timestamp_nanos_opt()) {
        line.push(' ');
        line.push_str(&ns.to_string());
    }

    Some(line)
}
