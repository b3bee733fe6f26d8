//! Service wiring: builds the shared collaborators from resolved settings

use crate::ai::{HttpReasoningClient, ReasoningClient};
use crate::cache::ResultCache;
use crate::config::PipelineSettings;
use crate::jobs::{JobStore, JobStoreFactory};
use crate::services::PipelineOrchestrator;
use crate::stages::StageRegistry;
use sitecheck_common::events::EventBus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const EVENT_BUS_CAPACITY: usize = 256;

/// Long-lived collaborators shared by every request
pub struct ServiceContext {
    pub settings: PipelineSettings,
    pub event_bus: EventBus,
    pub jobs: Arc<dyn JobStore>,
    pub cache: Arc<ResultCache>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub shutdown: CancellationToken,
}

impl ServiceContext {
    /// Open stores, create the reasoning client and register the stages
    ///
    /// A missing or invalid reasoning configuration is not fatal: sequencing
    /// and review fall back to heuristics.
    pub async fn build(settings: PipelineSettings) -> anyhow::Result<Self> {
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

        let factory = JobStoreFactory::new(settings.database_url.clone(), settings.job_capacity);
        let jobs = factory.get().await?;

        let cache = Arc::new(ResultCache::open(&settings.cache_path, settings.cache_max_entries).await);

        let client: Option<Arc<dyn ReasoningClient>> = if settings.reasoning_enabled() {
            match HttpReasoningClient::new(&settings.reasoning) {
                Ok(client) => {
                    tracing::info!(model = %settings.reasoning.model, "Reasoning client configured");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Reasoning client unavailable, using heuristics");
                    None
                }
            }
        } else {
            tracing::info!("No reasoning API key configured, using heuristics");
            None
        };

        let registry = StageRegistry::builtin(client, settings.reasoning.max_output_tokens);
        Ok(Self::from_parts(settings, event_bus, jobs, cache, registry))
    }

    /// Assemble a context from prebuilt parts
    pub fn from_parts(
        settings: PipelineSettings,
        event_bus: EventBus,
        jobs: Arc<dyn JobStore>,
        cache: Arc<ResultCache>,
        registry: StageRegistry,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let orchestrator = Arc::new(
            PipelineOrchestrator::new(registry, Arc::clone(&jobs), Arc::clone(&cache), event_bus.clone())
                .with_shutdown(shutdown.clone()),
        );
        Self {
            settings,
            event_bus,
            jobs,
            cache,
            orchestrator,
            shutdown,
        }
    }
}
