//! Routing, session state and retrieval orchestration for carebot.
//!
//! [`Carebot`] wires the pieces together: the [`IntentRouter`] classifies a
//! message and dispatches it to the [`Questionnaire`], to a retrieval-backed
//! responder, or to a single-shot responder. All collaborators are built once
//! and shared; the session store is the only mutable state.

pub mod archive;
pub mod program;
pub mod questionnaire;
pub mod questions;
pub mod responder;
pub mod retrieval;
pub mod router;
pub mod session;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use carebot_providers::{
    EmbeddingProvider, FlatIndex, HttpEmbeddingProvider, HttpIntentClassifier, IntentClassifier,
    ProgramGenerator, VectorIndex,
};
use carebot_shared::{
    AppConfig, CarebotError, Result, RetrievalConfig, RouterConfig, SessionConfig, expand_home,
    validate_api_key,
};
use carebot_storage::Storage;

pub use archive::{ProgramArchive, Requester};
pub use program::NutritionProgramGenerator;
pub use questionnaire::{AnswerStep, ProgramOutcome, Progress, Questionnaire};
pub use responder::{
    GenerationOutcome, LiveReply, ResponderKind, ResponderRegistry, ResponseEnvelope,
};
pub use retrieval::{RetrievedContext, Retriever};
pub use router::{IntentRouter, LiveDecision, RoutingDecision, SourceRef, UNRECOGNIZED_MESSAGE};
pub use session::{Session, SessionStore};

/// Everything the core consumes from the outside.
pub struct Collaborators {
    pub classifier: Arc<dyn IntentClassifier>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
    pub responders: ResponderRegistry,
    /// Defaults to a [`NutritionProgramGenerator`] over the nutrition responder.
    pub program_generator: Option<Arc<dyn ProgramGenerator>>,
    pub archive: Option<Arc<dyn ProgramArchive>>,
}

/// Point-in-time service status.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub active_sessions: usize,
    pub indexed_chunks: usize,
    pub responders: Vec<String>,
    pub archive: bool,
}

/// The assembled chatbot core.
pub struct Carebot {
    router: IntentRouter,
    questionnaire: Arc<Questionnaire>,
    index: Arc<dyn VectorIndex>,
    has_archive: bool,
}

impl Carebot {
    /// Build every collaborator from config: HTTP providers, the chunk index
    /// and the program archive.
    ///
    /// A remote generation endpoint requires its API key. A missing index
    /// file yields an empty index, and an archive that cannot be opened
    /// disables persistence; both are logged.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        validate_api_key(config)?;
        let classifier = Arc::new(HttpIntentClassifier::new(&config.classifier)?);
        let embedder = Arc::new(HttpEmbeddingProvider::new(&config.embeddings)?);
        let responders = ResponderRegistry::from_config(&config.generation)?;

        let index_path = expand_home(&config.retrieval.index_path);
        let index = if index_path.exists() {
            FlatIndex::load(&index_path)?
        } else {
            warn!(path = %index_path.display(), "chunk index not found, retrieval will fail");
            FlatIndex::empty()
        };

        let db_path = expand_home(&config.storage.db_path);
        let archive: Option<Arc<dyn ProgramArchive>> = match Storage::open(&db_path).await {
            Ok(storage) => Some(Arc::new(
                storage.with_programs_dir(expand_home(&config.storage.programs_dir)),
            )),
            Err(e) => {
                warn!(error = %e, path = %db_path.display(), "program archive unavailable");
                None
            }
        };

        Self::assemble(
            Collaborators {
                classifier,
                embedder,
                index: Arc::new(index),
                responders,
                program_generator: None,
                archive,
            },
            config,
        )
    }

    /// Wire explicit collaborators together.
    pub fn assemble(collaborators: Collaborators, config: &AppConfig) -> Result<Self> {
        let Collaborators {
            classifier,
            embedder,
            index,
            responders,
            program_generator,
            archive,
        } = collaborators;

        let generator: Arc<dyn ProgramGenerator> = match program_generator {
            Some(generator) => generator,
            None => {
                let backend = responders.get(ResponderKind::Nutrition).ok_or_else(|| {
                    CarebotError::config("no nutrition responder registered for program generation")
                })?;
                Arc::new(NutritionProgramGenerator::new(backend))
            }
        };

        let has_archive = archive.is_some();
        let mut questionnaire = Questionnaire::new(Arc::new(SessionStore::new()), generator)
            .with_config(&SessionConfig::from(config));
        if let Some(archive) = archive {
            questionnaire = questionnaire.with_archive(archive);
        }
        let questionnaire = Arc::new(questionnaire);

        let retriever = Arc::new(Retriever::new(
            embedder,
            Arc::clone(&index),
            RetrievalConfig::from(config),
        ));
        let envelope = ResponseEnvelope::new(responders, config.sanitizer.mode);
        let router = IntentRouter::new(
            classifier,
            Arc::clone(&questionnaire),
            retriever,
            envelope,
            RouterConfig::from(config),
        );

        info!(
            chunks = index.len(),
            responders = router.envelope().registry().kinds().len(),
            archive = has_archive,
            "carebot assembled"
        );
        Ok(Self {
            router,
            questionnaire,
            index,
            has_archive,
        })
    }

    fn prepare(&self, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(CarebotError::validation("message must not be empty"));
        }
        let swept = self.questionnaire.sweep_expired_now();
        if swept > 0 {
            debug!(swept, "expired sessions removed");
        }
        Ok(())
    }

    /// Sweep expired sessions, then route one message.
    pub async fn route(&self, message: &str) -> Result<RoutingDecision> {
        self.prepare(message)?;
        Ok(self.router.route(message.trim()).await)
    }

    /// As [`route`](Self::route), with responder replies streamed live.
    pub async fn route_live(&self, message: &str) -> Result<LiveDecision> {
        self.prepare(message)?;
        Ok(self.router.route_live(message.trim()).await)
    }

    pub fn questionnaire(&self) -> &Questionnaire {
        &self.questionnaire
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            active_sessions: self.questionnaire.active_sessions(),
            indexed_chunks: self.index.len(),
            responders: self.router.envelope().registry().describe(),
            archive: self.has_archive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FixedEmbedder, MemoryArchive, ScriptedResponder, StaticClassifier, StaticIndex,
        valid_answers,
    };

    fn collaborators(label: &str, confidence: f64) -> (Collaborators, ScriptedResponder) {
        let nutrition = ScriptedResponder::sequence(["analysis", "Day 1: lentil soup"]);
        let responders = ResponderRegistry::new()
            .with(ResponderKind::Nutrition, Arc::new(nutrition.clone()))
            .with(
                ResponderKind::EmotionalSupport,
                Arc::new(ScriptedResponder::replying(["You are doing great."])),
            );
        (
            Collaborators {
                classifier: Arc::new(StaticClassifier::new(label, confidence)),
                embedder: Arc::new(FixedEmbedder::new(vec![1.0])),
                index: Arc::new(StaticIndex::new(&[("c", "a.pdf", 0.5)])),
                responders,
                program_generator: None,
                archive: Some(Arc::new(MemoryArchive::default())),
            },
            nutrition,
        )
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (c, _) = collaborators("emotional_support", 0.9);
        let bot = Carebot::assemble(c, &AppConfig::default()).unwrap();
        assert!(matches!(
            bot.route("   ").await,
            Err(CarebotError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn assemble_requires_a_program_backend() {
        let (mut c, _) = collaborators("nutrition", 0.9);
        c.responders = ResponderRegistry::new();
        assert!(Carebot::assemble(c, &AppConfig::default()).is_err());
    }

    #[tokio::test]
    async fn nutrition_conversation_end_to_end() {
        let (c, nutrition) = collaborators("nutrition", 0.92);
        let bot = Carebot::assemble(c, &AppConfig::default()).unwrap();

        let RoutingDecision::QuestionnaireStarted { session_id, .. } =
            bot.route("I want a meal plan").await.unwrap()
        else {
            panic!("expected questionnaire");
        };

        let requester = Requester::new("u42", "Elif");
        let answers = valid_answers();
        let mut finished = None;
        for answer in answers {
            match bot
                .questionnaire()
                .answer_and_advance(session_id, answer, Some(&requester))
                .await
                .unwrap()
            {
                AnswerStep::Next { .. } => {}
                AnswerStep::Finished { outcome } => finished = Some(outcome),
            }
        }

        let outcome = finished.expect("questionnaire finished");
        assert_eq!(outcome.text, "Day 1: lentil soup");
        assert_eq!(outcome.artifact.unwrap().user_id, "u42");
        assert_eq!(nutrition.calls(), 2);
        assert_eq!(bot.health().active_sessions, 0);
    }

    fn zero_ttl_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.sessions.ttl_secs = 0;
        config
    }

    #[tokio::test]
    async fn route_sweeps_expired_sessions_first() {
        let (c, _) = collaborators("emotional_support", 0.9);
        let bot = Carebot::assemble(c, &zero_ttl_config()).unwrap();
        bot.questionnaire().begin();
        bot.questionnaire().begin();
        assert_eq!(bot.health().active_sessions, 2);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bot.route("I feel tired").await.unwrap();
        assert_eq!(bot.health().active_sessions, 0);
    }

    #[tokio::test]
    async fn route_live_sweeps_expired_sessions_first() {
        let (c, _) = collaborators("emotional_support", 0.9);
        let bot = Carebot::assemble(c, &zero_ttl_config()).unwrap();
        bot.questionnaire().begin();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bot.route_live("I feel tired").await.unwrap();
        assert_eq!(bot.health().active_sessions, 0);
    }

    #[tokio::test]
    async fn rejected_message_does_not_sweep() {
        let (c, _) = collaborators("emotional_support", 0.9);
        let bot = Carebot::assemble(c, &zero_ttl_config()).unwrap();
        bot.questionnaire().begin();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(bot.route("  ").await.is_err());
        assert_eq!(bot.health().active_sessions, 1);
    }

    #[tokio::test]
    async fn health_reports_components() {
        let (c, _) = collaborators("emotional_support", 0.9);
        let bot = Carebot::assemble(c, &AppConfig::default()).unwrap();
        let health = bot.health();
        assert_eq!(health.indexed_chunks, 1);
        assert!(health.archive);
        assert_eq!(health.responders.len(), 2);
        assert!(health.responders[0].starts_with("nutrition:"));
    }
}
