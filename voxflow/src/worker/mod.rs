//! Queue workers: receive → orchestrate → delete or reschedule.
//!
//! A fixed pool of workers polls one [`DurableQueue`]. Each message carries a
//! [`WorkMessage`]: either a fresh execution or a checkpoint suspended on a
//! retry wait. A suspended execution is re-enqueued with the retry delay so a
//! worker never sleeps through a backoff.

mod ledger;
mod shutdown;

pub use ledger::{CompletionLedger, DEFAULT_LEDGER_CAPACITY};
pub use shutdown::ShutdownSignal;

use crate::core::{ExecutionStatus, WorkflowExecution};
use crate::events::{event_types, EventBus, EventEnvelope, SOURCE_QUEUE};
use crate::queue::{DeadLetterRecord, DurableQueue, QueueError, QueueMessage, ReceiveBatch};
use crate::services::NotificationChannel;
use crate::workflow::{Advance, Orchestrator};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Body of a work queue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkMessage {
    /// Start a new execution with this id.
    Start {
        /// Id the execution will carry.
        execution_id: Uuid,
        /// Execution input.
        input: Value,
    },
    /// Continue a checkpointed execution.
    Resume {
        /// The suspended execution.
        execution: Box<WorkflowExecution>,
    },
}

impl WorkMessage {
    /// Id of the execution this message drives.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::Start { execution_id, .. } => *execution_id,
            Self::Resume { execution } => execution.id(),
        }
    }

    /// Serializes into a queue body.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn to_body(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Worker behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// Messages requested per receive.
    pub receive_batch: usize,
    /// Long-poll wait per receive.
    pub receive_wait: Duration,
    /// Leave failed executions on the queue so they are redelivered and,
    /// once exhausted, dead-lettered.
    pub redeliver_failed_executions: bool,
    /// Topic alerted for dead-lettered messages.
    pub dlq_topic: String,
    /// Visibility timeout of the work queue. While a message is processed its
    /// visibility is extended every half period; `None` disables the heartbeat.
    pub visibility_timeout: Option<Duration>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            receive_batch: 1,
            receive_wait: Duration::from_secs(20),
            redeliver_failed_executions: true,
            dlq_topic: "voxflow.dlq".to_string(),
            visibility_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// What a worker did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The execution finished and the message was deleted.
    Completed(ExecutionStatus),
    /// The execution failed and the message was left for redelivery.
    Retained,
    /// The execution was re-enqueued behind a retry delay.
    Rescheduled,
    /// The execution had already finished; the message was deleted.
    Duplicate,
    /// The body could not be decoded; the message was left for redelivery.
    Malformed,
}

/// Receives and processes work messages.
#[derive(Clone)]
pub struct Worker {
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn DurableQueue>,
    ledger: Arc<CompletionLedger>,
    notifier: Option<Arc<dyn NotificationChannel>>,
    bus: Option<Arc<EventBus>>,
    settings: WorkerSettings,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("graph", &self.orchestrator.graph().name())
            .field("queue", &self.queue)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Creates a worker with its own ledger and no alerting.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, queue: Arc<dyn DurableQueue>) -> Self {
        Self {
            orchestrator,
            queue,
            ledger: Arc::new(CompletionLedger::default()),
            notifier: None,
            bus: None,
            settings: WorkerSettings::default(),
        }
    }

    /// Shares a completion ledger.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<CompletionLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Sets the channel alerted on dead-lettered messages.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationChannel>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Sets the bus receiving `queue.dead_lettered` events.
    #[must_use]
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets the worker behavior.
    #[must_use]
    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The completion ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<CompletionLedger> {
        &self.ledger
    }

    /// Receives one batch and processes it. Returns how many messages were handled.
    ///
    /// # Errors
    ///
    /// Returns the queue error if the receive call fails.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let batch = self.receive().await?;
        Ok(self.dispatch(batch).await)
    }

    /// Long-polls for one batch. Dropping this future loses nothing.
    async fn receive(&self) -> Result<ReceiveBatch, QueueError> {
        self.queue
            .receive(self.settings.receive_batch, self.settings.receive_wait)
            .await
    }

    /// Alerts on dead letters and processes every delivered message.
    async fn dispatch(&self, batch: ReceiveBatch) -> usize {
        for record in &batch.dead_lettered {
            self.alert_dead_letter(record).await;
        }
        for message in &batch.messages {
            self.process(message).await;
        }
        batch.messages.len()
    }

    /// Processes one delivered message.
    pub async fn process(&self, message: &QueueMessage) -> Disposition {
        let work: WorkMessage = match serde_json::from_value(message.body.clone()) {
            Ok(work) => work,
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    receive_count = message.receive_count,
                    error = %e,
                    "Undecodable work message left for redelivery"
                );
                return Disposition::Malformed;
            }
        };

        let execution_id = work.execution_id();
        if self.ledger.contains(execution_id) {
            debug!(message_id = %message.id, execution_id = %execution_id, "Execution already finished");
            self.delete(message.id).await;
            return Disposition::Duplicate;
        }

        let execution = match work {
            WorkMessage::Start { execution_id, input } => self.orchestrator.start_with_id(execution_id, input),
            WorkMessage::Resume { execution } => *execution,
        };

        match self.advance_holding(message.id, execution).await {
            Advance::Suspended {
                execution,
                resume_after,
            } => self.reschedule(message, execution, resume_after).await,
            Advance::Finished(execution) => self.finish(message, &execution).await,
        }
    }

    /// Drives the execution while keeping the message hidden from other workers.
    async fn advance_holding(&self, message_id: Uuid, execution: WorkflowExecution) -> Advance {
        let advance = self.orchestrator.advance(execution);
        tokio::pin!(advance);
        let Some(timeout) = self.settings.visibility_timeout.filter(|t| !t.is_zero()) else {
            return advance.await;
        };
        let period = timeout / 2;
        loop {
            tokio::select! {
                outcome = &mut advance => return outcome,
                () = tokio::time::sleep(period) => {
                    match self.queue.extend_visibility(message_id, timeout).await {
                        Ok(()) => debug!(message_id = %message_id, "Message visibility extended"),
                        Err(e) => warn!(message_id = %message_id, error = %e, "Failed to extend visibility"),
                    }
                }
            }
        }
    }

    async fn reschedule(
        &self,
        message: &QueueMessage,
        execution: WorkflowExecution,
        resume_after: Duration,
    ) -> Disposition {
        let execution_id = execution.id();
        let body = match (WorkMessage::Resume {
            execution: Box::new(execution),
        })
        .to_body()
        {
            Ok(body) => body,
            Err(e) => {
                error!(execution_id = %execution_id, error = %e, "Failed to serialize checkpoint");
                return Disposition::Retained;
            }
        };
        match self.queue.enqueue(body, Some(resume_after)).await {
            Ok(resume_id) => {
                debug!(
                    execution_id = %execution_id,
                    message_id = %resume_id,
                    delay_ms = resume_after.as_millis(),
                    "Execution rescheduled"
                );
                self.delete(message.id).await;
                Disposition::Rescheduled
            }
            Err(e) => {
                error!(execution_id = %execution_id, error = %e, "Failed to re-enqueue execution");
                Disposition::Retained
            }
        }
    }

    async fn finish(&self, message: &QueueMessage, execution: &WorkflowExecution) -> Disposition {
        let status = execution.status();
        if status == ExecutionStatus::Failed && self.settings.redeliver_failed_executions {
            info!(
                execution_id = %execution.id(),
                message_id = %message.id,
                receive_count = message.receive_count,
                "Execution failed, message left for redelivery"
            );
            return Disposition::Retained;
        }
        self.ledger.record(execution.id(), status);
        self.delete(message.id).await;
        Disposition::Completed(status)
    }

    async fn delete(&self, id: Uuid) {
        if let Err(e) = self.queue.delete(id).await {
            warn!(message_id = %id, error = %e, "Failed to delete message");
        }
    }

    async fn alert_dead_letter(&self, record: &DeadLetterRecord) {
        let detail = json!({
            "message_id": record.message.id,
            "receive_count": record.message.receive_count,
            "reason": record.reason,
            "execution_id": serde_json::from_value::<WorkMessage>(record.message.body.clone())
                .ok()
                .map(|w| w.execution_id()),
        });
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.send(&self.settings.dlq_topic, &detail.to_string()).await {
                error!(message_id = %record.message.id, error = %e, "Failed to alert on dead letter");
            }
        }
        if let Some(bus) = &self.bus {
            bus.publish(EventEnvelope::new(
                SOURCE_QUEUE,
                event_types::QUEUE_DEAD_LETTERED,
                detail,
            ))
            .await;
        }
    }

    async fn run(self, index: usize, shutdown: Arc<ShutdownSignal>) {
        info!(worker = index, "Worker started");
        while !shutdown.is_triggered() {
            // Only the long-poll races shutdown; a received batch always runs to completion.
            let received = tokio::select! {
                () = shutdown.wait() => break,
                received = self.receive() => received,
            };
            match received {
                Ok(batch) => {
                    self.dispatch(batch).await;
                }
                Err(e) => {
                    warn!(worker = index, error = %e, "Receive failed");
                    tokio::select! {
                        () = shutdown.wait() => break,
                        () = tokio::time::sleep(self.settings.receive_wait) => {}
                    }
                }
            }
        }
        info!(worker = index, "Worker stopped");
    }
}

/// A fixed-size pool of workers sharing one queue and ledger.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<ShutdownSignal>,
}

impl WorkerPool {
    /// Spawns `count` copies of `worker`.
    #[must_use]
    pub fn start(worker: &Worker, count: usize) -> Self {
        let shutdown = Arc::new(ShutdownSignal::new());
        let handles = (0..count.max(1))
            .map(|index| tokio::spawn(worker.clone().run(index, Arc::clone(&shutdown))))
            .collect();
        info!(workers = count.max(1), "Worker pool started");
        Self { handles, shutdown }
    }

    /// Number of workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// The pool's shutdown signal.
    #[must_use]
    pub fn signal(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }

    /// Stops the workers and waits for them. A worker idle in a receive stops
    /// at once; one processing a batch finishes it first.
    pub async fn shutdown(self) {
        self.shutdown.trigger("worker pool shutdown");
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}
