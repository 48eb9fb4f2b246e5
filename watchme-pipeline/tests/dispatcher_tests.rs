//! Dispatcher fan-out against the in-memory queues

mod helpers;

use helpers::*;
use std::sync::Arc;
use watchme_common::messages::DispatchMessage;
use watchme_common::queue::MessageQueue;
use watchme_common::store::InMemoryStatusStore;
use watchme_common::{Error, Stage};
use watchme_pipeline::dispatcher::Dispatcher;

#[tokio::test]
async fn test_partial_dispatch_failure_names_failed_stage() {
    // Given: the SER queue refuses every send
    let queues = queues_rejecting_ser();
    let dispatcher = Dispatcher::new(Arc::new(InMemoryStatusStore::new()), queues.clone(), offset());

    // When
    let err = dispatcher.dispatch(FILE_PATH, "watchme-vault").await.unwrap_err();

    // Then: only SER is reported, ASR and SED were still enqueued
    match err {
        Error::PartialDispatchFailure { failed } => assert_eq!(failed, vec![Stage::Ser]),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(queues.asr.depth().await.unwrap(), 1);
    assert_eq!(queues.sed.depth().await.unwrap(), 1);

    let asr: Vec<DispatchMessage> = take_all(&queues.asr).await;
    assert_eq!(asr[0].device_id, DEVICE);
    assert_eq!(asr[0].recorded_at, recorded_at());
}

#[tokio::test]
async fn test_redelivered_dispatch_after_partial_failure_is_collapsed() {
    let store = Arc::new(InMemoryStatusStore::new());
    let failing = queues_rejecting_ser();
    let dispatcher = Dispatcher::new(store.clone(), failing.clone(), offset());
    assert!(dispatcher.dispatch(FILE_PATH, "watchme-vault").await.is_err());

    // The same upload redelivered once the SER queue is healthy again
    let healthy = watchme_common::queue::QueueSet {
        ser: queues().ser,
        ..failing.clone()
    };
    let report = Dispatcher::new(store, healthy.clone(), offset())
        .dispatch(FILE_PATH, "watchme-vault")
        .await
        .unwrap();

    assert_eq!(report.stages.len(), 3);
    assert_eq!(healthy.asr.depth().await.unwrap(), 1);
    assert_eq!(healthy.sed.depth().await.unwrap(), 1);
    assert_eq!(healthy.ser.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unparseable_time_slot_names_the_slot() {
    let queues = queues();
    let dispatcher = Dispatcher::new(Arc::new(InMemoryStatusStore::new()), queues.clone(), offset());

    let err = dispatcher
        .dispatch("files/dev-1/2024-05-01/evening/audio.wav", "watchme-vault")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MalformedPath(ref msg) if msg.contains("2024-05-01/evening")));
    for stage in Stage::ALL {
        assert_eq!(queues.stage(stage).depth().await.unwrap(), 0);
    }
}
