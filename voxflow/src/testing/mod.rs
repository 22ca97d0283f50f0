//! Testing utilities for voxflow workflows.
//!
//! This module provides:
//! - Deterministic doubles for the external service contracts
//! - A conversation fixture wired with in-memory stores
//! - Assertions over workflow executions

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_attempts, assert_execution_failed, assert_execution_succeeded, assert_last_status, assert_path,
};
pub use fixtures::ConversationFixture;
pub use mocks::{
    FlakyClassifier, KeywordClassifier, RecordingNotifier, StaticSynthesizer, StaticTranscriber, TemplateGenerator,
};
