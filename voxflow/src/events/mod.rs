//! Domain event bus.
//!
//! Events are published in process and fanned out to subscribers whose
//! pattern matches. Subscribers needing durability forward into a
//! [`crate::queue::DurableQueue`] with [`QueueForwarder`].

mod bus;
mod envelope;
mod subscribers;

pub use bus::{
    DetailPredicate, EventBus, EventHandler, EventPattern, HandlerFailure, PublishReport, SubscriptionId,
};
pub use envelope::{event_types, EventEnvelope, SOURCE_ORCHESTRATOR, SOURCE_QUEUE};
pub use subscribers::{CollectingSubscriber, LoggingSubscriber, QueueForwarder};
