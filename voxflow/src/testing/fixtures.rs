//! Conversation fixtures wired with in-memory services.

use std::sync::Arc;

use super::mocks::{KeywordClassifier, RecordingNotifier, StaticSynthesizer, StaticTranscriber, TemplateGenerator};
use crate::config::VoxflowConfig;
use crate::conversation::{ConversationRuntime, ConversationServices};
use crate::errors::VoxflowError;
use crate::events::{CollectingSubscriber, EventPattern};
use crate::services::{InMemoryBlobStore, IntentClassifier};
use crate::store::InMemoryConversationStore;

/// In-memory services plus handles to inspect them.
pub struct ConversationFixture {
    /// Conversation history.
    pub store: Arc<InMemoryConversationStore>,
    /// Audio blobs.
    pub blobs: Arc<InMemoryBlobStore>,
    /// Operator and DLQ notifications.
    pub notifier: Arc<RecordingNotifier>,
    /// Response generator.
    pub generator: Arc<TemplateGenerator>,
    /// Every event published on the runtime's bus.
    pub events: Arc<CollectingSubscriber>,
    /// Configuration used by [`Self::runtime`].
    pub config: VoxflowConfig,
    classifier: Arc<dyn IntentClassifier>,
}

impl std::fmt::Debug for ConversationFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationFixture")
            .field("turns", &self.store.len())
            .field("blobs", &self.blobs.len())
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl Default for ConversationFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationFixture {
    /// Creates a fixture with a [`KeywordClassifier`] and fast worker polling.
    #[must_use]
    pub fn new() -> Self {
        let mut config = VoxflowConfig::default();
        config.workers.receive_wait_seconds = 0.01;
        config.workers.count = 2;
        Self {
            store: Arc::new(InMemoryConversationStore::new()),
            blobs: Arc::new(InMemoryBlobStore::new()),
            notifier: RecordingNotifier::new(),
            generator: Arc::new(TemplateGenerator::new()),
            events: Arc::new(CollectingSubscriber::new("fixture")),
            config,
            classifier: Arc::new(KeywordClassifier::default()),
        }
    }

    /// Replaces the classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Edits the configuration.
    #[must_use]
    pub fn with_config(mut self, edit: impl FnOnce(&mut VoxflowConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    /// The services bundle.
    #[must_use]
    pub fn services(&self) -> ConversationServices {
        ConversationServices {
            classifier: self.classifier.clone(),
            generator: self.generator.clone(),
            synthesizer: Arc::new(StaticSynthesizer),
            transcriber: Arc::new(StaticTranscriber),
            blobs: self.blobs.clone(),
            notifier: self.notifier.clone(),
            store: self.store.clone(),
        }
    }

    /// Builds a runtime whose bus feeds [`Self::events`].
    ///
    /// # Errors
    ///
    /// Returns the build error of [`ConversationRuntime::build`].
    pub fn runtime(&self) -> Result<ConversationRuntime, VoxflowError> {
        let runtime = ConversationRuntime::build(&self.config, &self.services())?;
        runtime.bus().subscribe(EventPattern::any(), self.events.clone());
        Ok(runtime)
    }
}
