//! Responder registry and the shared generate-then-sanitize envelope.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use carebot_providers::{ChatCompletionResponder, FragmentStream, Responder};
use carebot_sanitizer::{SanitizerMode, StreamSanitizer, sanitize};
use carebot_shared::{GenerationConfig, GenerationRequest, IntentLabel, Result};

// ---------------------------------------------------------------------------
// Responder kinds
// ---------------------------------------------------------------------------

const HEALTH_INFO_PROMPT: &str = "You are an expert health consultant specializing in pregnancy and postpartum care.
Use the following information to answer questions. Provide complete, helpful responses.
Never mention sources, references, or file names in your response.
Always give complete answers without cutting off mid-sentence.";

const EMOTIONAL_SUPPORT_PROMPT: &str = "You are an empathetic emotional support assistant for mothers. \
Your role is to provide comforting, supportive, and helpful responses to mothers who are struggling. \
Always respond as the assistant, never as the user. \
Give emotional support, validation, and practical advice when appropriate. \
Use a warm, caring, and understanding tone. \
IMPORTANT: You must respond ONLY in English. Never use any other language. \
Provide comprehensive, detailed responses. Always give complete answers. \
Do not use any HTML tags or formatting.";

const DIET_EXERCISE_PROMPT: &str = "You are a registered dietitian and fitness expert. \
You provide professional diet and exercise advice. \
IMPORTANT: You must respond ONLY in English. Never use any other language. \
Provide comprehensive, detailed responses. Always give complete answers with practical advice. \
Do not use any HTML tags or formatting.";

const NUTRITION_PROMPT: &str = "You are a professional nutritionist and health expert. \
You create safe, practical and personalised nutrition programs. \
IMPORTANT: You must respond ONLY in English.";

/// The generative backends, one per dispatchable intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderKind {
    Nutrition,
    HealthInfo,
    DietExercise,
    EmotionalSupport,
}

impl ResponderKind {
    pub const ALL: [ResponderKind; 4] = [
        Self::Nutrition,
        Self::HealthInfo,
        Self::DietExercise,
        Self::EmotionalSupport,
    ];

    /// Name used in config (`[generation.models]`) and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nutrition => "nutrition",
            Self::HealthInfo => "health_info",
            Self::DietExercise => "diet_exercise",
            Self::EmotionalSupport => "emotional_support",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Nutrition => "Nutrition",
            Self::HealthInfo => "Health info",
            Self::DietExercise => "Diet & exercise",
            Self::EmotionalSupport => "Emotional support",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Nutrition => NUTRITION_PROMPT,
            Self::HealthInfo => HEALTH_INFO_PROMPT,
            Self::DietExercise => DIET_EXERCISE_PROMPT,
            Self::EmotionalSupport => EMOTIONAL_SUPPORT_PROMPT,
        }
    }

    /// Whether replies are grounded on retrieved context.
    pub fn uses_retrieval(&self) -> bool {
        matches!(self, Self::HealthInfo)
    }

    /// Single-shot responder for an intent. The questionnaire intent and
    /// `unclear` have none.
    pub fn for_intent(intent: IntentLabel) -> Option<Self> {
        match intent {
            IntentLabel::HealthInfo => Some(Self::HealthInfo),
            IntentLabel::DietExercise => Some(Self::DietExercise),
            IntentLabel::EmotionalSupport => Some(Self::EmotionalSupport),
            IntentLabel::Nutrition | IntentLabel::Unclear => None,
        }
    }
}

impl fmt::Display for ResponderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Responders registered once at startup, looked up by kind.
#[derive(Clone, Default)]
pub struct ResponderRegistry {
    responders: HashMap<ResponderKind, Arc<dyn Responder>>,
}

impl ResponderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One chat-completions backend per kind, honouring per-kind model overrides.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let mut registry = Self::new();
        for kind in ResponderKind::ALL {
            let model = config.model_for(kind.as_str());
            let backend = ChatCompletionResponder::new(config, model)?;
            registry.register(kind, Arc::new(backend));
        }
        Ok(registry)
    }

    pub fn register(&mut self, kind: ResponderKind, responder: Arc<dyn Responder>) {
        self.responders.insert(kind, responder);
    }

    pub fn with(mut self, kind: ResponderKind, responder: Arc<dyn Responder>) -> Self {
        self.register(kind, responder);
        self
    }

    pub fn get(&self, kind: ResponderKind) -> Option<Arc<dyn Responder>> {
        self.responders.get(&kind).cloned()
    }

    /// Registered kinds in declaration order.
    pub fn kinds(&self) -> Vec<ResponderKind> {
        ResponderKind::ALL
            .into_iter()
            .filter(|k| self.responders.contains_key(k))
            .collect()
    }

    /// `kind: backend` lines for health output.
    pub fn describe(&self) -> Vec<String> {
        self.kinds()
            .into_iter()
            .filter_map(|k| self.get(k).map(|r| format!("{k}: {}", r.describe())))
            .collect()
    }
}

impl fmt::Debug for ResponderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Result of one responder invocation.
///
/// `success` is false only when the backend failed; an empty reply still
/// succeeds, carrying the fallback message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutcome {
    pub success: bool,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationOutcome {
    fn ok(text: String) -> Self {
        Self {
            success: true,
            text,
            error: None,
        }
    }

    fn failed(kind: ResponderKind, error: &dyn fmt::Display) -> Self {
        Self {
            success: false,
            text: format!("{} module error: {error}", kind.display_name()),
            error: Some(error.to_string()),
        }
    }
}

/// Builds the prompt, invokes a responder and sanitizes its output.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    registry: ResponderRegistry,
    mode: SanitizerMode,
}

impl ResponseEnvelope {
    pub fn new(registry: ResponderRegistry, mode: SanitizerMode) -> Self {
        Self { registry, mode }
    }

    pub fn registry(&self) -> &ResponderRegistry {
        &self.registry
    }

    fn request(kind: ResponderKind, user: &str, context: Option<&str>) -> GenerationRequest {
        let request = GenerationRequest::new(kind.system_prompt(), user);
        match context {
            Some(ctx) => request.with_context(ctx),
            None => request,
        }
    }

    fn backend(&self, kind: ResponderKind) -> std::result::Result<Arc<dyn Responder>, String> {
        self.registry
            .get(kind)
            .ok_or_else(|| format!("no responder registered for {kind}"))
    }

    /// Synchronous path: generate the whole reply, then sanitize it once.
    #[instrument(skip_all, fields(responder = %kind, has_context = context.is_some()))]
    pub async fn respond(
        &self,
        kind: ResponderKind,
        user: &str,
        context: Option<&str>,
    ) -> GenerationOutcome {
        let backend = match self.backend(kind) {
            Ok(b) => b,
            Err(e) => return GenerationOutcome::failed(kind, &e),
        };
        let request = Self::request(kind, user, context);
        debug!(prompt_chars = request.system_block().len() + user.len(), "invoking responder");

        match backend.generate(&request).await {
            Ok(raw) => {
                let text = sanitize(&raw, self.mode);
                info!(raw_chars = raw.len(), chars = text.len(), "reply generated");
                GenerationOutcome::ok(text)
            }
            Err(e) => {
                warn!(error = %e, "responder failed");
                GenerationOutcome::failed(kind, &e)
            }
        }
    }

    /// Live path: open a fragment stream and sanitize each fragment as it
    /// arrives. Fails only if the stream cannot be opened.
    #[instrument(skip_all, fields(responder = %kind, has_context = context.is_some()))]
    pub async fn respond_live(
        &self,
        kind: ResponderKind,
        user: &str,
        context: Option<&str>,
    ) -> std::result::Result<LiveReply, GenerationOutcome> {
        let backend = self
            .backend(kind)
            .map_err(|e| GenerationOutcome::failed(kind, &e))?;
        let request = Self::request(kind, user, context);
        match backend.generate_stream(&request).await {
            Ok(stream) => Ok(LiveReply::new(kind, stream, self.mode)),
            Err(e) => {
                warn!(error = %e, "responder stream failed to open");
                Err(GenerationOutcome::failed(kind, &e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Live replies
// ---------------------------------------------------------------------------

/// A reply being streamed and sanitized fragment by fragment.
///
/// Dropping it cancels the upstream generation.
#[derive(Debug)]
pub struct LiveReply {
    kind: ResponderKind,
    stream: FragmentStream,
    sanitizer: Option<StreamSanitizer>,
    text: String,
    error: Option<String>,
}

impl LiveReply {
    fn new(kind: ResponderKind, stream: FragmentStream, mode: SanitizerMode) -> Self {
        Self {
            kind,
            stream,
            sanitizer: Some(StreamSanitizer::new(mode)),
            text: String::new(),
            error: None,
        }
    }

    pub fn kind(&self) -> ResponderKind {
        self.kind
    }

    /// Next piece of sanitized text, or `None` once the reply is complete.
    ///
    /// Pieces are never empty. A backend error mid-stream ends the reply; it
    /// is reported by [`finish`](Self::finish).
    pub async fn next(&mut self) -> Option<String> {
        loop {
            let sanitizer = self.sanitizer.as_mut()?;
            let piece = match self.stream.next().await {
                Some(Ok(fragment)) => sanitizer.push(&fragment),
                Some(Err(e)) => {
                    warn!(responder = %self.kind, error = %e, "stream failed mid-reply");
                    self.error = Some(e.to_string());
                    self.sanitizer = None;
                    return None;
                }
                None => {
                    let sanitizer = self.sanitizer.take()?;
                    sanitizer.finish()
                }
            };
            if !piece.is_empty() {
                self.text.push_str(&piece);
                return Some(piece);
            }
        }
    }

    /// Drain whatever is left and report the outcome.
    pub async fn finish(mut self) -> GenerationOutcome {
        while self.next().await.is_some() {}
        match self.error {
            Some(e) => GenerationOutcome::failed(self.kind, &e),
            None => GenerationOutcome::ok(self.text),
        }
    }
}
