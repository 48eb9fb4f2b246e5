//! PostgREST-style Status Store client
//!
//! # Tables
//! - `audio_files`: recording rows keyed by `file_path`
//! - `spot_features`: `vibe_status`, `behavior_status`, `emotion_status`, `local_date`
//! - `spot_aggregators`: `aggregator_status`
//! - `spot_results`: `profiler_status`
//! - `user_devices` / `users` / `devices` / `subjects`: push target resolution
//!
//! Every request carries the service key as both `apikey` and bearer token.
//! Filters use the `eq.` operator form.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{FeatureStatuses, PushTarget, RecordingRow, StatusStore};
use crate::config::{StoreConfig, TimeoutConfig};
use crate::types::{AggregateStatus, JobStatus, RecordingKey, Stage};
use crate::{Error, Result};

/// Status Store reached over REST
pub struct RestStatusStore {
    client: Client,
    base_url: String,
    service_key: String,
}

#[derive(Debug, Deserialize)]
struct FeatureRow {
    #[serde(default)]
    vibe_status: Option<JobStatus>,
    #[serde(default)]
    behavior_status: Option<JobStatus>,
    #[serde(default)]
    emotion_status: Option<JobStatus>,
    #[serde(default)]
    local_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct LocalDateRow {
    #[serde(default)]
    local_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct UserIdRow {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenRow {
    apns_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubjectIdRow {
    subject_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubjectRow {
    name: Option<String>,
}

impl RestStatusStore {
    /// Create a client
    ///
    /// # Arguments
    /// * `base_url` - store root; `/rest/v1/<table>` is appended
    /// * `service_key` - key sent as `apikey` and bearer token
    /// * `timeout` - per-request budget
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create store HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        })
    }

    /// Build from the `[store]` section; both URL and key are required
    pub fn from_config(store: &StoreConfig, timeouts: &TimeoutConfig) -> Result<Self> {
        let url = store
            .url
            .as_deref()
            .ok_or_else(|| Error::Config("store.url is not configured (WATCHME_STORE_URL)".to_string()))?;
        let key = store
            .service_key
            .as_deref()
            .ok_or_else(|| Error::Config("store.service_key is not configured (WATCHME_STORE_KEY)".to_string()))?;
        Self::new(url, key, timeouts.store())
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    fn key_filters(key: &RecordingKey) -> [(&'static str, String); 2] {
        [
            ("device_id", format!("eq.{}", key.device_id)),
            ("recorded_at", format!("eq.{}", key.recorded_at_str())),
        ]
    }

    async fn check(table: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Store(format!("{} returned HTTP {}: {}", table, status.as_u16(), body)))
    }

    /// GET rows matching `filters`
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        columns: &str,
    ) -> Result<Vec<T>> {
        let response = self
            .request(Method::GET, table)
            .query(filters)
            .query(&[("select", columns)])
            .send()
            .await?;

        let response = Self::check(table, response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Store(format!("{} returned an unreadable body: {}", table, e)))
    }

    /// PATCH rows matching the recording key
    async fn patch(&self, table: &str, key: &RecordingKey, body: Value) -> Result<()> {
        let response = self
            .request(Method::PATCH, table)
            .query(&Self::key_filters(key))
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;

        Self::check(table, response).await?;
        debug!(table, recording = %key, body = %body, "Store row patched");
        Ok(())
    }
}

#[async_trait]
impl StatusStore for RestStatusStore {
    async fn find_recording_by_path(&self, file_path: &str) -> Result<Option<RecordingRow>> {
        #[derive(Deserialize)]
        struct Row {
            device_id: String,
            recorded_at: String,
            #[serde(default)]
            local_date: Option<NaiveDate>,
        }

        let rows: Vec<Row> = self
            .select(
                "audio_files",
                &[("file_path", format!("eq.{}", file_path))],
                "recorded_at,device_id,local_date",
            )
            .await?;

        match rows.into_iter().next() {
            Some(row) => Ok(Some(RecordingRow {
                device_id: row.device_id,
                recorded_at: crate::time::parse_timestamp(&row.recorded_at)?,
                local_date: row.local_date,
            })),
            None => Ok(None),
        }
    }

    async fn feature_statuses(&self, key: &RecordingKey) -> Result<Option<FeatureStatuses>> {
        let rows: Vec<FeatureRow> = self
            .select(
                "spot_features",
                &Self::key_filters(key),
                "vibe_status,behavior_status,emotion_status,local_date",
            )
            .await?;

        Ok(rows.into_iter().next().map(|row| FeatureStatuses {
            vibe: row.vibe_status.unwrap_or(JobStatus::Pending),
            behavior: row.behavior_status.unwrap_or(JobStatus::Pending),
            emotion: row.emotion_status.unwrap_or(JobStatus::Pending),
            local_date: row.local_date,
        }))
    }

    async fn set_feature_status(&self, key: &RecordingKey, stage: Stage, status: JobStatus) -> Result<()> {
        let mut body = json!({
            "device_id": key.device_id,
            "recorded_at": key.recorded_at_str(),
        });
        body[stage.status_column()] = json!(status.as_str());

        let response = self
            .request(Method::POST, "spot_features")
            .query(&[("on_conflict", "device_id,recorded_at")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body)
            .send()
            .await?;

        Self::check("spot_features", response).await?;
        debug!(recording = %key, stage = %stage, status = %status, "Feature status written");
        Ok(())
    }

    async fn set_aggregator_status(&self, key: &RecordingKey, status: AggregateStatus) -> Result<()> {
        self.patch("spot_aggregators", key, json!({ "aggregator_status": status.as_str() }))
            .await
    }

    async fn set_profiler_status(&self, key: &RecordingKey, status: AggregateStatus) -> Result<()> {
        self.patch("spot_results", key, json!({ "profiler_status": status.as_str() }))
            .await
    }

    async fn claim_aggregation(&self, key: &RecordingKey) -> Result<bool> {
        // Existing row still pending (or never set)
        let response = self
            .request(Method::PATCH, "spot_aggregators")
            .query(&Self::key_filters(key))
            .query(&[("or", "(aggregator_status.eq.pending,aggregator_status.is.null)")])
            .header("Prefer", "return=representation")
            .json(&json!({ "aggregator_status": AggregateStatus::Processing.as_str() }))
            .send()
            .await?;
        let claimed: Vec<Value> = Self::check("spot_aggregators", response).await?.json().await?;
        if !claimed.is_empty() {
            return Ok(true);
        }

        // No row yet: the insert wins only for the first caller
        let response = self
            .request(Method::POST, "spot_aggregators")
            .query(&[("on_conflict", "device_id,recorded_at")])
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(&json!({
                "device_id": key.device_id,
                "recorded_at": key.recorded_at_str(),
                "aggregator_status": AggregateStatus::Processing.as_str(),
            }))
            .send()
            .await?;
        let inserted: Vec<Value> = Self::check("spot_aggregators", response).await?.json().await?;
        Ok(!inserted.is_empty())
    }

    async fn release_claim(&self, key: &RecordingKey) -> Result<()> {
        self.patch(
            "spot_aggregators",
            key,
            json!({ "aggregator_status": AggregateStatus::Pending.as_str() }),
        )
        .await
    }

    async fn local_date(&self, key: &RecordingKey) -> Result<Option<NaiveDate>> {
        let rows: Vec<LocalDateRow> = self
            .select("audio_files", &Self::key_filters(key), "local_date")
            .await?;
        Ok(rows.into_iter().next().and_then(|row| row.local_date))
    }

    async fn push_target(&self, device_id: &str) -> Result<Option<PushTarget>> {
        let users: Vec<UserIdRow> = self
            .select("user_devices", &[("device_id", format!("eq.{}", device_id))], "user_id")
            .await?;

        let mut token = None;
        for user_id in users.into_iter().filter_map(|row| row.user_id) {
            let rows: Vec<TokenRow> = self
                .select("users", &[("user_id", format!("eq.{}", user_id))], "apns_token")
                .await?;
            token = rows
                .into_iter()
                .filter_map(|row| row.apns_token)
                .find(|t| !t.trim().is_empty());
            if token.is_some() {
                break;
            }
        }

        let Some(token) = token else {
            return Ok(None);
        };

        Ok(Some(PushTarget {
            token,
            subject_name: self.subject_name(device_id).await,
        }))
    }
}

impl RestStatusStore {
    /// Subject name is decoration only; lookup failures are logged and dropped
    async fn subject_name(&self, device_id: &str) -> Option<String> {
        let lookup = async {
            let devices: Vec<SubjectIdRow> = self
                .select("devices", &[("device_id", format!("eq.{}", device_id))], "subject_id")
                .await?;
            let Some(subject_id) = devices.into_iter().find_map(|row| row.subject_id) else {
                return Ok::<_, Error>(None);
            };
            let subjects: Vec<SubjectRow> = self
                .select("subjects", &[("subject_id", format!("eq.{}", subject_id))], "name")
                .await?;
            Ok::<_, Error>(subjects.into_iter().find_map(|row| row.name))
        };

        match lookup.await {
            Ok(name) => name,
            Err(e) => {
                warn!(device_id, error = %e, "Subject name lookup failed");
                None
            }
        }
    }
}

