//! In-process publish/subscribe bus.
//!
//! `publish` invokes every subscriber whose pattern matches, in subscription
//! order. A failing or panicking handler is reported in the [`PublishReport`]
//! and never stops the others; the bus does not retry.

use super::EventEnvelope;
use crate::workflow::Condition;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handles events delivered by the bus.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in reports and logs.
    fn name(&self) -> &str;

    /// Handles one event.
    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()>;
}

/// Predicate over an event's `detail`.
pub type DetailPredicate = Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
enum TypeMatcher {
    Exact(String),
    Regex(Regex),
}

impl TypeMatcher {
    fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == event_type,
            Self::Regex(re) => re.is_match(event_type),
        }
    }
}

/// Selects events by source, type and optionally detail.
///
/// Empty source or type lists match anything; within a list any entry may
/// match.
#[derive(Clone, Default)]
pub struct EventPattern {
    sources: Vec<String>,
    types: Vec<TypeMatcher>,
    detail: Option<DetailPredicate>,
}

impl EventPattern {
    /// Matches every event.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Adds an accepted source.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Adds an accepted event type.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.types.push(TypeMatcher::Exact(event_type.into()));
        self
    }

    /// Adds an accepted event type pattern. The regex is anchored.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile.
    pub fn type_regex(mut self, pattern: &str) -> Result<Self, regex::Error> {
        let re = Regex::new(&format!("^(?:{pattern})$"))?;
        self.types.push(TypeMatcher::Regex(re));
        Ok(self)
    }

    /// Requires `predicate` to hold for the event detail.
    #[must_use]
    pub fn with_detail(mut self, predicate: impl Fn(&serde_json::Value) -> bool + Send + Sync + 'static) -> Self {
        self.detail = Some(Arc::new(predicate));
        self
    }

    /// Requires a [`Condition`] to hold for the event detail.
    #[must_use]
    pub fn detail_matching(self, condition: Condition) -> Self {
        self.with_detail(move |detail| condition.evaluate(detail))
    }

    /// Returns true if the event matches.
    #[must_use]
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        let source_ok = self.sources.is_empty() || self.sources.iter().any(|s| *s == event.source);
        let type_ok = self.types.is_empty() || self.types.iter().any(|t| t.matches(&event.event_type));
        source_ok && type_ok && self.detail.as_ref().map_or(true, |p| p(&event.detail))
    }
}

impl fmt::Debug for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPattern")
            .field("sources", &self.sources)
            .field("types", &self.types)
            .field("has_detail_predicate", &self.detail.is_some())
            .finish()
    }
}

/// Identifies a subscription for `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

/// A handler that failed while processing a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    /// The subscription.
    pub subscription: SubscriptionId,
    /// The handler name.
    pub handler: String,
    /// Error text, or the panic message.
    pub error: String,
}

/// Outcome of one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Number of subscribers whose pattern matched.
    pub matched: usize,
    /// Handlers that failed.
    pub failures: Vec<HandlerFailure>,
}

impl PublishReport {
    /// Number of handlers that succeeded.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.matched - self.failures.len()
    }

    /// Returns true if no handler failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Subscription {
    id: SubscriptionId,
    pattern: EventPattern,
    handler: Arc<dyn EventHandler>,
}

/// Pattern-matching fan-out of domain events.
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a handler for events matching `pattern`.
    pub fn subscribe(&self, pattern: EventPattern, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(subscription = id.0, handler = %handler.name(), "Subscriber registered");
        self.subscriptions.write().push(Subscription { id, pattern, handler });
        id
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Delivers an event to every matching subscriber.
    pub async fn publish(&self, event: EventEnvelope) -> PublishReport {
        let targets: Vec<(SubscriptionId, Arc<dyn EventHandler>)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.pattern.matches(&event))
            .map(|s| (s.id, Arc::clone(&s.handler)))
            .collect();

        let mut report = PublishReport {
            matched: targets.len(),
            failures: Vec::new(),
        };

        for (id, handler) in targets {
            let outcome = AssertUnwindSafe(handler.handle(&event)).catch_unwind().await;
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(
                subscription = id.0,
                handler = %handler.name(),
                event_type = %event.event_type,
                error = %error,
                "Event handler failed"
            );
            report.failures.push(HandlerFailure {
                subscription: id,
                handler: handler.name().to_string(),
                error,
            });
        }

        debug!(
            source = %event.source,
            event_type = %event.event_type,
            matched = report.matched,
            failed = report.failures.len(),
            "Event published"
        );
        report
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
