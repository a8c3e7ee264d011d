//! Shared types, error model, and configuration for carebot.
//!
//! This crate is the foundation depended on by all other carebot crates.
//! It provides:
//! - [`CarebotError`] — the unified error type
//! - Data contracts ([`IntentPrediction`], [`IntentLabel`], [`SessionId`],
//!   [`QuestionSpec`], [`AnswerValue`], [`RetrievedChunk`], [`GenerationRequest`])
//! - Configuration ([`AppConfig`], the runtime configs derived from it, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ClassifierConfig, EmbeddingsConfig, GenerationConfig, RetrievalConfig,
    RetrievalSection, RouterConfig, RouterSection, SanitizerMode, SanitizerSection,
    SessionConfig, SessionsSection, StorageSection, config_dir, config_file_path, expand_home,
    init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{CarebotError, Result};
pub use types::{
    AnswerValue, Answers, FieldType, GenerationRequest, IntentLabel, IntentPrediction,
    QuestionSpec, QuestionView, RetrievedChunk, SessionId,
};
