//! watchme-pipeline library interface
//!
//! Hosts every consumer role of the media-analysis pipeline:
//! - [`dispatcher`]: upload event → three stage queues
//! - [`worker`]: ASR / SED / SER stage workers
//! - [`coordinator`]: completion barrier and aggregation chain
//! - [`relay`]: summary → analysis → notification
//! - [`weekly`]: daily weekly-profile job

pub mod api;
pub mod coordinator;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod relay;
pub mod runtime;
pub mod weekly;
pub mod worker;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use watchme_common::config::TomlConfig;
use watchme_common::queue::QueueSet;
use watchme_common::store::StatusStore;
use watchme_common::time::parse_utc_offset;
use watchme_common::upstream::UpstreamClient;
use watchme_common::{Result, Stage};

use crate::coordinator::Coordinator;
use crate::dispatcher::Dispatcher;
use crate::endpoints::PipelineApi;
use crate::relay::{AnalysisRelay, NotificationRelay, SummaryRelay};
use crate::runtime::Consumer;
use crate::worker::StageWorker;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub queues: QueueSet,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, queues: QueueSet) -> Self {
        Self {
            dispatcher,
            queues,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::event_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Every pipeline role wired to its queues
pub struct Pipeline {
    pub state: AppState,
    pub consumers: Vec<Consumer>,
}

impl Pipeline {
    /// Wire all roles from configuration
    ///
    /// # Arguments
    /// * `config` - validated configuration
    /// * `store` - Status Store shared by every role
    /// * `queues` - pipeline queues
    /// * `api` - upstream gateway with the configured retry policy
    pub fn assemble(config: &TomlConfig, store: Arc<dyn StatusStore>, queues: QueueSet, api: PipelineApi) -> Result<Self> {
        let offset = parse_utc_offset(&config.fallback_utc_offset)?;
        let poll = Duration::from_millis(config.queue.poll_interval_ms);

        let dispatcher = Arc::new(Dispatcher::new(store.clone(), queues.clone(), offset));
        let mut consumers = Vec::new();

        for stage in Stage::ALL {
            let worker = StageWorker::new(
                stage,
                config.stages.for_stage(stage).clone(),
                api.clone(),
                store.clone(),
                queues.completion.clone(),
                offset,
            );
            consumers.push(Consumer::new(queues.stage(stage).clone(), Arc::new(worker), poll));
        }

        let coordinator = Coordinator::new(
            api.clone(),
            store.clone(),
            queues.summary.clone(),
            config.coordinator.claim_mode,
            offset,
        );
        consumers.push(Consumer::new(queues.completion.clone(), Arc::new(coordinator), poll));

        consumers.push(Consumer::new(
            queues.summary.clone(),
            Arc::new(SummaryRelay::new(&api, queues.analysis.clone())),
            poll,
        ));
        consumers.push(Consumer::new(
            queues.analysis.clone(),
            Arc::new(AnalysisRelay::new(&api, queues.notification.clone())),
            poll,
        ));
        consumers.push(Consumer::new(
            queues.notification.clone(),
            Arc::new(NotificationRelay::new(&api, store, config.push.gateway_url.clone())),
            poll,
        ));

        Ok(Self {
            state: AppState::new(dispatcher, queues),
            consumers,
        })
    }

    /// Wire all roles with in-memory queues and an HTTP gateway from configuration
    pub fn from_config(config: &TomlConfig, store: Arc<dyn StatusStore>) -> Result<Self> {
        let api = PipelineApi::new(UpstreamClient::from_config(config)?, config.api.clone());
        Self::assemble(config, store, QueueSet::in_memory(&config.queue), api)
    }
}
