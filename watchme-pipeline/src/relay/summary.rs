use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use watchme_common::messages::{AnalysisRequest, SummaryTrigger};
use watchme_common::queue::{send_json, MessageQueue, ReceivedMessage};
use watchme_common::{Error, Result};

use crate::endpoints::PipelineApi;
use crate::runtime::MessageHandler;

/// Daily summary step: trigger → `aggregated_prompt` → analysis queue
pub struct SummaryRelay {
    api: PipelineApi,
    analysis_queue: Arc<dyn MessageQueue>,
}

impl SummaryRelay {
    /// `api` is used with a single attempt per call
    pub fn new(api: &PipelineApi, analysis_queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            api: api.single_attempt(),
            analysis_queue,
        }
    }

    pub async fn relay(&self, trigger: &SummaryTrigger) -> Result<AnalysisRequest> {
        let endpoint = &self.api.paths().daily_summary_path;
        let payload = self
            .api
            .daily_summary(&trigger.device_id, trigger.local_date)
            .await?
            .into_payload(endpoint)?;

        let prompt = payload
            .get("aggregated_prompt")
            .and_then(|p| p.as_str())
            .unwrap_or_default();
        if prompt.is_empty() {
            return Err(Error::Upstream(format!("{}: empty aggregated_prompt", endpoint)));
        }

        let request = AnalysisRequest {
            device_id: trigger.device_id.clone(),
            date: trigger.local_date,
            recorded_at: trigger.recorded_at,
            prompt: prompt.to_string(),
        };
        send_json(self.analysis_queue.as_ref(), &request, trigger.device_id.clone(), None).await?;

        info!(
            device_id = %trigger.device_id,
            local_date = %trigger.local_date,
            prompt_len = request.prompt.len(),
            "Daily summary generated, analysis queued"
        );
        Ok(request)
    }
}

#[async_trait]
impl MessageHandler for SummaryRelay {
    async fn handle(&self, message: &ReceivedMessage) -> Result<()> {
        let trigger: SummaryTrigger = message.decode()?;
        self.relay(&trigger).await.map(|_| ())
    }
}
