//! Downstream Chain Relay: summary → analysis → notification

mod helpers;

use helpers::*;
use serde_json::json;
use std::sync::Arc;
use watchme_common::messages::{AnalysisRequest, NotificationRequest, SummaryTrigger};
use watchme_common::queue::MessageQueue;
use watchme_common::store::{InMemoryStatusStore, PushTarget};
use watchme_pipeline::relay::{AnalysisRelay, NotificationRelay, PushDelivery, SummaryRelay};

fn trigger() -> SummaryTrigger {
    SummaryTrigger {
        device_id: DEVICE.to_string(),
        recorded_at: recorded_at(),
        local_date: local_date(),
    }
}

fn analysis_request() -> AnalysisRequest {
    AnalysisRequest {
        device_id: DEVICE.to_string(),
        date: local_date(),
        recorded_at: recorded_at(),
        prompt: "Summarize the day".to_string(),
    }
}

fn notification_request() -> NotificationRequest {
    NotificationRequest {
        device_id: DEVICE.to_string(),
        date: local_date(),
        analysis_result: json!({"overall_summary": "good day"}),
    }
}

#[tokio::test]
async fn test_summary_relay_forwards_prompt() {
    // Given
    let gateway = Gateway::start().await;
    let config = test_config(&gateway);
    gateway.respond(
        &config.api.daily_summary_path,
        200,
        json!({"aggregated_prompt": "Summarize the day"}),
    );
    let queues = queues();
    let relay = SummaryRelay::new(&api(&config), queues.analysis.clone());

    // When
    let request = relay.relay(&trigger()).await.unwrap();

    // Then
    assert_eq!(request, analysis_request());
    assert_eq!(
        gateway.calls_to(&config.api.daily_summary_path)[0].body,
        json!({"device_id": DEVICE, "local_date": "2024-05-01"})
    );
    let queued: Vec<AnalysisRequest> = take_all(&queues.analysis).await;
    assert_eq!(queued, vec![analysis_request()]);
}

#[tokio::test]
async fn test_summary_relay_rejects_empty_prompt() {
    let gateway = Gateway::start().await;
    let config = test_config(&gateway);
    gateway.respond(&config.api.daily_summary_path, 200, json!({"aggregated_prompt": ""}));
    let queues = queues();
    let relay = SummaryRelay::new(&api(&config), queues.analysis.clone());

    assert!(relay.relay(&trigger()).await.is_err());
    assert_eq!(queues.analysis.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_relays_make_a_single_attempt() {
    // Given: a retryable status that the stage wrapper would retry
    let gateway = Gateway::start().await;
    let config = test_config(&gateway);
    gateway.respond(&config.api.daily_summary_path, 503, json!({}));
    let queues = queues();
    let relay = SummaryRelay::new(&api(&config), queues.analysis.clone());

    // When / Then: one call, error returned for redelivery
    assert!(relay.relay(&trigger()).await.is_err());
    assert_eq!(gateway.count(&config.api.daily_summary_path), 1);
}

#[tokio::test]
async fn test_analysis_relay_forwards_result() {
    let gateway = Gateway::start().await;
    let config = test_config(&gateway);
    gateway.respond(
        &config.api.dashboard_analysis_path,
        200,
        json!({"status": "success", "analysis_result": {"overall_summary": "good day"}}),
    );
    let queues = queues();
    let relay = AnalysisRelay::new(&api(&config), queues.notification.clone());

    let forwarded = relay.relay(&analysis_request()).await.unwrap();

    assert_eq!(forwarded, notification_request());
    assert_eq!(
        gateway.calls_to(&config.api.dashboard_analysis_path)[0].body,
        json!({"device_id": DEVICE, "date": "2024-05-01"})
    );
    assert_eq!(queues.notification.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_analysis_relay_fails_on_reported_failure() {
    let gateway = Gateway::start().await;
    let config = test_config(&gateway);
    gateway.respond(
        &config.api.dashboard_analysis_path,
        200,
        json!({"success": false, "error": "model overloaded"}),
    );
    let queues = queues();
    let relay = AnalysisRelay::new(&api(&config), queues.notification.clone());

    let err = relay.relay(&analysis_request()).await.unwrap_err();

    assert!(err.to_string().contains("model overloaded"));
    assert_eq!(queues.notification.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_analysis_request_accepts_local_date_field() {
    let body = json!({
        "device_id": DEVICE,
        "local_date": "2024-05-01",
        "recorded_at": "2024-05-01T09:00:00Z",
        "prompt": "Summarize the day"
    });
    let request: AnalysisRequest = serde_json::from_value(body).unwrap();
    assert_eq!(request, analysis_request());
}

#[tokio::test]
async fn test_notification_relay_sends_push() {
    // Given: a device with a registered token
    let gateway = Gateway::start().await;
    let config = test_config(&gateway);
    gateway.respond("/push", 200, json!({"message_id": "m-1"}));
    let store = Arc::new(InMemoryStatusStore::new());
    store
        .insert_push_target(
            DEVICE,
            PushTarget {
                token: "apns-token".into(),
                subject_name: Some("Hana".into()),
            },
        )
        .await;
    let relay = NotificationRelay::new(&api(&config), store, Some(gateway.url("/push")));

    // When
    let delivery = relay.relay(&notification_request()).await.unwrap();

    // Then
    assert_eq!(delivery, PushDelivery::Sent);
    let push = &gateway.calls_to("/push")[0];
    assert_eq!(push.body["token"], "apns-token");
    assert_eq!(
        push.body["data"],
        json!({"device_id": DEVICE, "date": "2024-05-01", "action": "refresh_dashboard"})
    );
}

#[tokio::test]
async fn test_notification_relay_without_token_is_acknowledged() {
    let gateway = Gateway::start().await;
    let config = test_config(&gateway);
    let store = Arc::new(InMemoryStatusStore::new());
    let relay = NotificationRelay::new(&api(&config), store, Some(gateway.url("/push")));

    let delivery = relay.relay(&notification_request()).await.unwrap();

    assert_eq!(delivery, PushDelivery::NoTarget);
    assert_eq!(gateway.count("/push"), 0);
}

#[tokio::test]
async fn test_notification_relay_gateway_failure_is_error() {
    let gateway = Gateway::start().await;
    let config = test_config(&gateway);
    gateway.respond("/push", 500, json!({}));
    let store = Arc::new(InMemoryStatusStore::new());
    store
        .insert_push_target(
            DEVICE,
            PushTarget {
                token: "apns-token".into(),
                subject_name: None,
            },
        )
        .await;
    let relay = NotificationRelay::new(&api(&config), store, Some(gateway.url("/push")));

    assert!(relay.relay(&notification_request()).await.is_err());
    assert_eq!(gateway.count("/push"), 1);
}
