use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use watchme_common::messages::NotificationRequest;
use watchme_common::queue::ReceivedMessage;
use watchme_common::store::{PushTarget, StatusStore};
use watchme_common::Result;

use crate::endpoints::PipelineApi;
use crate::runtime::MessageHandler;

/// What the notification step did with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushDelivery {
    Sent,
    /// No device-registered token; nothing to send
    NoTarget,
    /// No push gateway configured
    Disabled,
}

/// Push step: analysis result → device-registered push target
pub struct NotificationRelay {
    api: PipelineApi,
    store: Arc<dyn StatusStore>,
    gateway_url: Option<String>,
}

impl NotificationRelay {
    pub fn new(api: &PipelineApi, store: Arc<dyn StatusStore>, gateway_url: Option<String>) -> Self {
        Self {
            api: api.single_attempt(),
            store,
            gateway_url,
        }
    }

    pub async fn relay(&self, request: &NotificationRequest) -> Result<PushDelivery> {
        let Some(gateway_url) = self.gateway_url.as_deref() else {
            warn!(device_id = %request.device_id, "No push gateway configured, notification dropped");
            return Ok(PushDelivery::Disabled);
        };

        let Some(target) = self.store.push_target(&request.device_id).await? else {
            info!(device_id = %request.device_id, "No push token for device");
            return Ok(PushDelivery::NoTarget);
        };

        let payload = push_payload(&target, request);
        self.api
            .send_push(gateway_url, &payload)
            .await?
            .into_payload(gateway_url)?;

        info!(
            device_id = %request.device_id,
            date = %request.date,
            subject = target.subject_name.as_deref().unwrap_or(""),
            "Push notification sent"
        );
        Ok(PushDelivery::Sent)
    }
}

fn push_payload(target: &PushTarget, request: &NotificationRequest) -> Value {
    let body = match target.subject_name.as_deref() {
        Some(name) => format!("New data for {} is ready", name),
        None => {
            let short: String = request.device_id.chars().take(8).collect();
            format!("New data for device {} is ready", short)
        }
    };

    json!({
        "token": target.token,
        "body": body,
        "data": {
            "device_id": request.device_id,
            "date": request.date.to_string(),
            "action": "refresh_dashboard",
        }
    })
}

#[async_trait]
impl MessageHandler for NotificationRelay {
    async fn handle(&self, message: &ReceivedMessage) -> Result<()> {
        let request: NotificationRequest = message.decode()?;
        self.relay(&request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_push_payload_shape() {
        let request = NotificationRequest {
            device_id: "d067d407-cf73-4174".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            analysis_result: Value::Null,
        };
        let named = PushTarget {
            token: "tok".into(),
            subject_name: Some("Hana".into()),
        };
        let payload = push_payload(&named, &request);
        assert_eq!(payload["token"], "tok");
        assert_eq!(payload["data"]["action"], "refresh_dashboard");
        assert_eq!(payload["data"]["date"], "2024-05-01");
        assert!(payload["body"].as_str().unwrap().contains("Hana"));

        let anonymous = PushTarget {
            token: "tok".into(),
            subject_name: None,
        };
        assert!(push_payload(&anonymous, &request)["body"]
            .as_str()
            .unwrap()
            .contains("d067d407"));
    }
}
