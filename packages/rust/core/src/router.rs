//! Intent router: classify, gate on confidence, dispatch.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use carebot_providers::IntentClassifier;
use carebot_shared::{IntentLabel, IntentPrediction, QuestionView, RouterConfig, SessionId};

use crate::questionnaire::Questionnaire;
use crate::responder::{GenerationOutcome, LiveReply, ResponderKind, ResponseEnvelope};
use crate::retrieval::{RetrievedContext, Retriever};

/// Reply for low-confidence and `unclear` predictions.
pub const UNRECOGNIZED_MESSAGE: &str =
    "I couldn't understand your message. Please rephrase it more clearly.";

const SOURCE_PREVIEW_CHARS: usize = 200;

/// A retrieved chunk as shown alongside a grounded reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub source_id: String,
    pub similarity: f32,
    pub preview: String,
}

/// What the router did with one message. Every failure is a variant here;
/// nothing escapes `route` as an error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RoutingDecision {
    /// Confidence below the gate; nothing downstream ran.
    LowConfidence {
        prediction: IntentPrediction,
        message: String,
    },
    /// The classifier answered `unclear`.
    Unclear {
        prediction: IntentPrediction,
        message: String,
    },
    /// A confident label the router has no handler for.
    UnknownLabel { prediction: IntentPrediction },
    ClassifierFailure { error: String },
    /// A questionnaire session was opened.
    QuestionnaireStarted {
        prediction: IntentPrediction,
        session_id: SessionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        question: Option<QuestionView>,
        message: String,
    },
    /// A responder ran (successfully or not, see `outcome.success`).
    Responded {
        prediction: IntentPrediction,
        kind: ResponderKind,
        outcome: GenerationOutcome,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        sources: Vec<SourceRef>,
    },
    RetrievalFailure {
        prediction: IntentPrediction,
        error: String,
    },
}

impl RoutingDecision {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LowConfidence { .. } => "low_confidence",
            Self::Unclear { .. } => "unclear",
            Self::UnknownLabel { .. } => "unknown_label",
            Self::ClassifierFailure { .. } => "classifier_failure",
            Self::QuestionnaireStarted { .. } => "questionnaire_started",
            Self::Responded { .. } => "responded",
            Self::RetrievalFailure { .. } => "retrieval_failure",
        }
    }

    /// User-facing text for this decision.
    pub fn reply_text(&self) -> String {
        match self {
            Self::LowConfidence { message, .. }
            | Self::Unclear { message, .. }
            | Self::QuestionnaireStarted { message, .. } => message.clone(),
            Self::UnknownLabel { prediction } => {
                format!("Unknown intent '{}'. Please rephrase your message.", prediction.label)
            }
            Self::ClassifierFailure { error } => format!("Intent classification failed: {error}"),
            Self::Responded { outcome, .. } => outcome.text.clone(),
            Self::RetrievalFailure { error, .. } => format!("Could not look that up: {error}"),
        }
    }
}

/// Like [`RoutingDecision`], but a responder reply may still be streaming.
#[derive(Debug)]
pub enum LiveDecision {
    Decided(RoutingDecision),
    Streaming {
        prediction: IntentPrediction,
        kind: ResponderKind,
        sources: Vec<SourceRef>,
        reply: LiveReply,
    },
}

/// Where a confident prediction goes next.
enum Dispatch {
    Done(RoutingDecision),
    Respond {
        prediction: IntentPrediction,
        kind: ResponderKind,
        context: Option<RetrievedContext>,
    },
}

pub struct IntentRouter {
    classifier: Arc<dyn IntentClassifier>,
    questionnaire: Arc<Questionnaire>,
    retriever: Arc<Retriever>,
    envelope: ResponseEnvelope,
    config: RouterConfig,
}

impl IntentRouter {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        questionnaire: Arc<Questionnaire>,
        retriever: Arc<Retriever>,
        envelope: ResponseEnvelope,
        config: RouterConfig,
    ) -> Self {
        Self {
            classifier,
            questionnaire,
            retriever,
            envelope,
            config,
        }
    }

    pub fn envelope(&self) -> &ResponseEnvelope {
        &self.envelope
    }

    /// Route one message and wait for the full reply.
    #[instrument(skip_all, fields(chars = message.len()))]
    pub async fn route(&self, message: &str) -> RoutingDecision {
        match self.dispatch(message).await {
            Dispatch::Done(decision) => decision,
            Dispatch::Respond {
                prediction,
                kind,
                context,
            } => {
                let outcome = self
                    .envelope
                    .respond(kind, message, context.as_ref().map(|c| c.text.as_str()))
                    .await;
                let decision = RoutingDecision::Responded {
                    prediction,
                    kind,
                    outcome,
                    sources: sources_of(context.as_ref()),
                };
                info!(decision = decision.name(), "message routed");
                decision
            }
        }
    }

    /// Route one message; a responder reply is handed back as a live stream.
    #[instrument(skip_all, fields(chars = message.len()))]
    pub async fn route_live(&self, message: &str) -> LiveDecision {
        match self.dispatch(message).await {
            Dispatch::Done(decision) => LiveDecision::Decided(decision),
            Dispatch::Respond {
                prediction,
                kind,
                context,
            } => {
                let sources = sources_of(context.as_ref());
                let opened = self
                    .envelope
                    .respond_live(kind, message, context.as_ref().map(|c| c.text.as_str()))
                    .await;
                match opened {
                    Ok(reply) => LiveDecision::Streaming {
                        prediction,
                        kind,
                        sources,
                        reply,
                    },
                    Err(outcome) => LiveDecision::Decided(RoutingDecision::Responded {
                        prediction,
                        kind,
                        outcome,
                        sources,
                    }),
                }
            }
        }
    }

    /// Classification, the confidence gate, session start and retrieval.
    async fn dispatch(&self, message: &str) -> Dispatch {
        let prediction = match self.classifier.predict(message).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "intent classifier failed");
                return Dispatch::Done(RoutingDecision::ClassifierFailure {
                    error: e.to_string(),
                });
            }
        };
        info!(label = %prediction.label, confidence = prediction.confidence, "intent predicted");

        // NaN never passes the gate.
        if !(prediction.confidence >= self.config.confidence_threshold) {
            return Dispatch::Done(RoutingDecision::LowConfidence {
                prediction,
                message: UNRECOGNIZED_MESSAGE.to_string(),
            });
        }

        let Some(intent) = prediction.intent() else {
            warn!(label = %prediction.label, "no handler for label");
            return Dispatch::Done(RoutingDecision::UnknownLabel { prediction });
        };

        match intent {
            IntentLabel::Unclear => Dispatch::Done(RoutingDecision::Unclear {
                prediction,
                message: UNRECOGNIZED_MESSAGE.to_string(),
            }),
            IntentLabel::Nutrition => {
                let session_id = self.questionnaire.begin();
                let question = self.questionnaire.next_prompt(session_id).await;
                let message = match &question {
                    Some(q) => format!(
                        "To build your nutrition plan I'll ask you a few questions. First question: {}",
                        q.prompt
                    ),
                    None => "To build your nutrition plan I'll ask you a few questions.".to_string(),
                };
                Dispatch::Done(RoutingDecision::QuestionnaireStarted {
                    prediction,
                    session_id,
                    question,
                    message,
                })
            }
            other => {
                let Some(kind) = ResponderKind::for_intent(other) else {
                    return Dispatch::Done(RoutingDecision::UnknownLabel { prediction });
                };
                let context = if kind.uses_retrieval() {
                    match self.retriever.retrieve(message).await {
                        Ok(ctx) => Some(ctx),
                        Err(e) => {
                            warn!(error = %e, "retrieval failed");
                            return Dispatch::Done(RoutingDecision::RetrievalFailure {
                                prediction,
                                error: e.to_string(),
                            });
                        }
                    }
                } else {
                    None
                };
                Dispatch::Respond {
                    prediction,
                    kind,
                    context,
                }
            }
        }
    }
}

fn sources_of(context: Option<&RetrievedContext>) -> Vec<SourceRef> {
    context
        .map(|ctx| {
            ctx.chunks
                .iter()
                .map(|chunk| SourceRef {
                    source_id: chunk.source_id.clone(),
                    similarity: chunk.similarity,
                    preview: chunk.preview(SOURCE_PREVIEW_CHARS),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::ResponderRegistry;
    use crate::session::SessionStore;
    use crate::testing::{
        CountingEmbedder, ScriptedGenerator, ScriptedResponder, StaticClassifier, StaticIndex,
    };
    use carebot_sanitizer::SanitizerMode;
    use carebot_shared::RetrievalConfig;

    struct Harness {
        router: IntentRouter,
        embedder: Arc<CountingEmbedder>,
        responders: Vec<(ResponderKind, ScriptedResponder)>,
        questionnaire: Arc<Questionnaire>,
    }

    fn harness(classifier: StaticClassifier) -> Harness {
        let embedder = Arc::new(CountingEmbedder::default());
        let index = StaticIndex::new(&[
            ("Iron supports blood volume.", "iron.pdf", 0.93),
            ("Folate prevents neural tube defects.", "folate.pdf", 0.88),
        ]);
        let retriever = Arc::new(Retriever::new(
            embedder.clone(),
            Arc::new(index),
            RetrievalConfig::default(),
        ));

        let responders: Vec<_> = [
            ResponderKind::HealthInfo,
            ResponderKind::DietExercise,
            ResponderKind::EmotionalSupport,
        ]
        .into_iter()
        .map(|k| (k, ScriptedResponder::replying([format!("<|assistant|> reply from {k}")])))
        .collect();
        let mut registry = ResponderRegistry::new();
        for (kind, responder) in &responders {
            registry.register(*kind, Arc::new(responder.clone()));
        }

        let questionnaire = Arc::new(Questionnaire::new(
            Arc::new(SessionStore::new()),
            ScriptedGenerator::ok("plan"),
        ));
        let router = IntentRouter::new(
            Arc::new(classifier),
            Arc::clone(&questionnaire),
            retriever,
            ResponseEnvelope::new(registry, SanitizerMode::Scoped),
            RouterConfig::default(),
        );
        Harness {
            router,
            embedder,
            responders,
            questionnaire,
        }
    }

    impl Harness {
        fn generator_calls(&self) -> usize {
            self.responders.iter().map(|(_, r)| r.calls()).sum()
        }

        fn responder(&self, kind: ResponderKind) -> &ScriptedResponder {
            &self.responders.iter().find(|(k, _)| *k == kind).unwrap().1
        }
    }

    #[tokio::test]
    async fn low_confidence_invokes_nothing_downstream() {
        for confidence in [0.0, 0.3, 0.59, 0.599_999] {
            for label in ["emotional_support", "health_rag_info", "nutrition"] {
                let h = harness(StaticClassifier::new(label, confidence));
                let decision = h.router.route("hello").await;
                assert!(
                    matches!(&decision, RoutingDecision::LowConfidence { prediction, message }
                        if prediction.confidence == confidence && message == UNRECOGNIZED_MESSAGE)
                );
                assert_eq!(h.generator_calls(), 0);
                assert_eq!(h.embedder.calls(), 0);
                assert_eq!(h.questionnaire.active_sessions(), 0);
            }
        }
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let h = harness(StaticClassifier::new("diet_exercise", 0.6));
        assert!(matches!(
            h.router.route("what should I eat").await,
            RoutingDecision::Responded { .. }
        ));
    }

    #[tokio::test]
    async fn nan_confidence_is_rejected() {
        let h = harness(StaticClassifier::new("diet_exercise", f64::NAN));
        assert!(matches!(
            h.router.route("x").await,
            RoutingDecision::LowConfidence { .. }
        ));
    }

    #[tokio::test]
    async fn emotional_support_skips_retrieval() {
        let h = harness(StaticClassifier::new("emotional_support", 0.81));
        let decision = h.router.route("I'm feeling overwhelmed as a new mom").await;

        let RoutingDecision::Responded {
            kind,
            outcome,
            sources,
            ..
        } = decision
        else {
            panic!("expected a reply, got {decision:?}");
        };
        assert_eq!(kind, ResponderKind::EmotionalSupport);
        assert!(outcome.success);
        assert_eq!(outcome.text, "reply from emotional_support");
        assert!(sources.is_empty());
        assert_eq!(h.embedder.calls(), 0);

        let request = h
            .responder(ResponderKind::EmotionalSupport)
            .last_request()
            .unwrap();
        assert!(request.context.is_none());
        assert_eq!(request.user, "I'm feeling overwhelmed as a new mom");
    }

    #[tokio::test]
    async fn health_info_uses_ranked_context() {
        let h = harness(StaticClassifier::new("health_rag_info", 0.9));
        let decision = h.router.route("Why do I need iron?").await;

        let RoutingDecision::Responded { sources, outcome, .. } = decision else {
            panic!("expected a reply");
        };
        assert!(outcome.success);
        assert_eq!(h.embedder.calls(), 1);
        let ids: Vec<_> = sources.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(ids, ["iron.pdf", "folate.pdf"]);

        let context = h
            .responder(ResponderKind::HealthInfo)
            .last_request()
            .unwrap()
            .context
            .unwrap();
        let iron = context.find("iron.pdf").unwrap();
        let folate = context.find("folate.pdf").unwrap();
        assert!(iron < folate);
    }

    #[tokio::test]
    async fn nutrition_starts_questionnaire() {
        let h = harness(StaticClassifier::new("nutrition", 0.95));
        let decision = h.router.route("make me a meal plan").await;
        let RoutingDecision::QuestionnaireStarted {
            session_id,
            question,
            message,
            ..
        } = decision
        else {
            panic!("expected questionnaire");
        };
        assert!(h.questionnaire.store().contains(session_id));
        assert_eq!(question.unwrap().field, "age");
        assert!(message.ends_with("First question: What is your age?"));
        assert_eq!(h.generator_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_and_unclear_labels() {
        let h = harness(StaticClassifier::new("astrology", 0.99));
        assert!(matches!(
            h.router.route("x").await,
            RoutingDecision::UnknownLabel { .. }
        ));

        let h = harness(StaticClassifier::new("unclear", 0.99));
        assert!(matches!(
            h.router.route("x").await,
            RoutingDecision::Unclear { .. }
        ));
        assert_eq!(h.generator_calls(), 0);
    }

    #[tokio::test]
    async fn classifier_failure_is_a_decision() {
        let h = harness(StaticClassifier::failing("connection refused"));
        let decision = h.router.route("hello").await;
        assert!(matches!(&decision, RoutingDecision::ClassifierFailure { error } if error.contains("connection refused")));
        assert_eq!(h.generator_calls(), 0);
    }

    #[tokio::test]
    async fn retrieval_failure_is_a_decision() {
        let h = harness(StaticClassifier::new("health_rag_info", 0.9));
        h.embedder.fail_next();
        let decision = h.router.route("q").await;
        assert!(matches!(decision, RoutingDecision::RetrievalFailure { .. }));
        assert_eq!(h.generator_calls(), 0);
    }

    #[tokio::test]
    async fn live_route_streams_the_same_text() {
        let h = harness(StaticClassifier::new("emotional_support", 0.81));
        let sync = h.router.route("hi").await.reply_text();

        let LiveDecision::Streaming { reply, .. } = h.router.route_live("hi").await else {
            panic!("expected a stream");
        };
        let outcome = reply.finish().await;
        assert_eq!(outcome.text, sync);
    }

    #[test]
    fn decisions_serialize_with_tag() {
        let decision = RoutingDecision::LowConfidence {
            prediction: IntentPrediction::new("nutrition", 0.2),
            message: UNRECOGNIZED_MESSAGE.into(),
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "low_confidence");
        assert_eq!(json["prediction"]["label"], "nutrition");
    }
}
