//! Wiring of queue, bus, orchestrator and workers from configuration.

use super::graph::{conversation_graph, ConversationServices};
use super::hook::TurnRecorder;
use super::service::ConversationService;
use crate::config::VoxflowConfig;
use crate::errors::VoxflowError;
use crate::events::{EventBus, EventPattern, LoggingSubscriber};
use crate::queue::{DurableQueue, InMemoryQueue};
use crate::worker::{CompletionLedger, Worker, WorkerPool};
use crate::workflow::Orchestrator;
use std::sync::Arc;
use tracing::info;

/// Name of the work queue.
pub const WORK_QUEUE: &str = "conversation-turns";

/// A fully wired conversation core.
#[derive(Debug, Clone)]
pub struct ConversationRuntime {
    service: ConversationService,
    worker: Worker,
    bus: Arc<EventBus>,
    queue: Arc<dyn DurableQueue>,
    worker_count: usize,
}

impl ConversationRuntime {
    /// Builds every component with an in-memory work queue.
    ///
    /// # Errors
    ///
    /// Returns a config, queue or graph validation error.
    pub fn build(config: &VoxflowConfig, services: &ConversationServices) -> Result<Self, VoxflowError> {
        config.validate()?;
        let queue: Arc<dyn DurableQueue> = Arc::new(InMemoryQueue::new(WORK_QUEUE, config.queue.clone())?);
        Self::with_queue(config, services, queue)
    }

    /// Builds every component around an existing queue.
    ///
    /// # Errors
    ///
    /// Returns a graph validation error.
    pub fn with_queue(
        config: &VoxflowConfig,
        services: &ConversationServices,
        queue: Arc<dyn DurableQueue>,
    ) -> Result<Self, VoxflowError> {
        let bus = Arc::new(EventBus::new());
        bus.subscribe(EventPattern::any(), Arc::new(LoggingSubscriber::debug()));

        let graph = conversation_graph(&config.conversation_options())?;
        let registry = services.registry(&config.executor_settings());
        let recorder = TurnRecorder::new(services.store.clone(), bus.clone()).with_ttl(config.turn_ttl());
        let orchestrator = Arc::new(
            Orchestrator::new(graph, registry)?
                .with_hook(Arc::new(recorder))
                .with_max_transitions(config.orchestrator.max_transitions),
        );

        let worker = Worker::new(orchestrator.clone(), queue.clone())
            .with_ledger(Arc::new(CompletionLedger::new(config.workers.ledger_capacity)))
            .with_notifier(services.notifier.clone())
            .with_event_bus(bus.clone())
            .with_settings(config.worker_settings());

        info!(
            graph = %orchestrator.graph().name(),
            steps = orchestrator.graph().len(),
            workers = config.workers.count,
            "Conversation runtime built"
        );
        Ok(Self {
            service: ConversationService::new(orchestrator, queue.clone()),
            worker,
            bus,
            queue,
            worker_count: config.workers.count,
        })
    }

    /// The inbound surface.
    #[must_use]
    pub fn service(&self) -> &ConversationService {
        &self.service
    }

    /// A worker bound to the work queue.
    #[must_use]
    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// The event bus; subscribe analytics and alerting here.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The work queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn DurableQueue> {
        &self.queue
    }

    /// Spawns the configured number of workers.
    #[must_use]
    pub fn start_workers(&self) -> WorkerPool {
        WorkerPool::start(&self.worker, self.worker_count)
    }
}
