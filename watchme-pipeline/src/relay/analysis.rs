use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use watchme_common::messages::{AnalysisRequest, NotificationRequest};
use watchme_common::queue::{send_json, MessageQueue, ReceivedMessage};
use watchme_common::{Error, Result};

use crate::endpoints::PipelineApi;
use crate::runtime::MessageHandler;

/// Dashboard analysis step: prompt → `analysis_result` → notification queue
pub struct AnalysisRelay {
    api: PipelineApi,
    notification_queue: Arc<dyn MessageQueue>,
}

impl AnalysisRelay {
    /// `api` is used with a single attempt per call
    pub fn new(api: &PipelineApi, notification_queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            api: api.single_attempt(),
            notification_queue,
        }
    }

    pub async fn relay(&self, request: &AnalysisRequest) -> Result<NotificationRequest> {
        if request.prompt.is_empty() {
            return Err(Error::InvalidInput("Analysis request carries no prompt".to_string()));
        }

        let endpoint = &self.api.paths().dashboard_analysis_path;
        let payload = self
            .api
            .dashboard_analysis(&request.device_id, request.date)
            .await?
            .into_payload(endpoint)?;

        if !analysis_succeeded(&payload) {
            let reason = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("analysis reported failure");
            return Err(Error::Upstream(format!("{}: {}", endpoint, reason)));
        }

        let analysis_result = payload.get("analysis_result").cloned().unwrap_or(Value::Null);
        let sections: Vec<&str> = analysis_result
            .as_object()
            .map(|fields| fields.keys().map(String::as_str).collect())
            .unwrap_or_default();

        info!(
            device_id = %request.device_id,
            date = %request.date,
            sections = ?sections,
            "Dashboard analysis completed"
        );

        let notification = NotificationRequest {
            device_id: request.device_id.clone(),
            date: request.date,
            analysis_result,
        };
        send_json(
            self.notification_queue.as_ref(),
            &notification,
            request.device_id.clone(),
            None,
        )
        .await?;
        Ok(notification)
    }
}

/// `status == "success"` or `success == true`
fn analysis_succeeded(payload: &Value) -> bool {
    payload.get("status").and_then(Value::as_str) == Some("success")
        || payload.get("success").and_then(Value::as_bool) == Some(true)
}

#[async_trait]
impl MessageHandler for AnalysisRelay {
    async fn handle(&self, message: &ReceivedMessage) -> Result<()> {
        let request: AnalysisRequest = message.decode()?;
        self.relay(&request).await.map(|_| ())
    }
}
