//! Core data contracts shared between the router, the questionnaire, and retrieval.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// One classifier verdict for one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentPrediction {
    /// Raw label as emitted by the classifier.
    pub label: String,
    /// Probability of `label`, in `[0, 1]`.
    pub confidence: f64,
}

impl IntentPrediction {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    /// The known intent this label names, if any.
    pub fn intent(&self) -> Option<IntentLabel> {
        IntentLabel::parse(&self.label)
    }
}

/// The closed set of intents the router knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    /// Personalised nutrition plan, collected through the questionnaire.
    Nutrition,
    /// Open-domain pregnancy and postpartum health questions (retrieval-backed).
    #[serde(rename = "health_rag_info")]
    HealthInfo,
    /// Diet and exercise advice.
    DietExercise,
    /// Emotional support for mothers.
    EmotionalSupport,
    /// The classifier itself could not make sense of the message.
    Unclear,
}

impl IntentLabel {
    /// Every label, in help-listing order.
    pub const ALL: [IntentLabel; 5] = [
        Self::Nutrition,
        Self::HealthInfo,
        Self::DietExercise,
        Self::EmotionalSupport,
        Self::Unclear,
    ];

    /// Wire name used by the classifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nutrition => "nutrition",
            Self::HealthInfo => "health_rag_info",
            Self::DietExercise => "diet_exercise",
            Self::EmotionalSupport => "emotional_support",
            Self::Unclear => "unclear",
        }
    }

    /// Parse a classifier label. Unknown labels yield `None`.
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == label.trim())
    }

    /// Human-readable module name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Nutrition => "Nutrition Plan",
            Self::HealthInfo => "Health Information",
            Self::DietExercise => "Diet & Exercise",
            Self::EmotionalSupport => "Emotional Support",
            Self::Unclear => "Not understood",
        }
    }

    /// One-line description for help listings.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Nutrition => "Builds a personalised nutrition program from a short questionnaire",
            Self::HealthInfo => "Answers pregnancy and postpartum health questions from reference documents",
            Self::DietExercise => "Gives diet and exercise recommendations",
            Self::EmotionalSupport => "Offers emotional support and practical encouragement",
            Self::Unclear => "Messages the classifier could not place",
        }
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Opaque questionnaire session handle (UUID v7, time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a fresh session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

// ---------------------------------------------------------------------------
// Questions and answers
// ---------------------------------------------------------------------------

/// Expected type of a questionnaire answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int,
    Float,
    String,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
        }
    }

    /// Coerce raw answer text into a typed value.
    ///
    /// Numbers tolerate surrounding whitespace; floats must be finite.
    /// Strings pass through untouched.
    pub fn coerce(&self, raw: &str) -> Option<AnswerValue> {
        match self {
            Self::Int => raw.trim().parse::<i64>().ok().map(AnswerValue::Int),
            Self::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(AnswerValue::Float),
            Self::String => Some(AnswerValue::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable question of the fixed sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuestionSpec {
    pub field: &'static str,
    pub prompt: &'static str,
    pub field_type: FieldType,
}

/// A question as presented to a client, with its position in the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionView {
    pub field: String,
    pub prompt: String,
    pub field_type: FieldType,
    /// 1-based position.
    pub number: usize,
    pub total: usize,
}

impl QuestionView {
    pub fn new(spec: &QuestionSpec, index: usize, total: usize) -> Self {
        Self {
            field: spec.field.to_string(),
            prompt: spec.prompt.to_string(),
            field_type: spec.field_type,
            number: index + 1,
            total,
        }
    }
}

/// A coerced answer value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Answers keyed by field name, kept in the order they were collected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Answers {
    entries: Vec<(String, AnswerValue)>,
}

impl Answers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value. An existing key is overwritten in place.
    pub fn insert(&mut self, field: impl Into<String>, value: AnswerValue) {
        let field = field.into();
        match self.entries.iter_mut().find(|(k, _)| *k == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&AnswerValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == field)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnswerValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pretty JSON object, keys in collection order.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
    }
}

impl Serialize for Answers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Retrieval and generation
// ---------------------------------------------------------------------------

/// One nearest-neighbour hit, as handed to prompt assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    /// Source document the chunk was cut from.
    pub source_id: String,
    pub similarity: f32,
}

impl RetrievedChunk {
    /// First `max_chars` characters of the content, with an ellipsis when cut.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.content.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

/// A generation prompt: system instructions, optional retrieved context, user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub user: String,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            context: None,
            user: user.into(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// System instructions followed by the context block, if any.
    pub fn system_block(&self) -> String {
        match &self.context {
            Some(ctx) if !ctx.trim().is_empty() => format!("{}\n\n{}", self.system, ctx),
            _ => self.system.clone(),
        }
    }

    /// Single-string chat template for raw text-completion backends.
    pub fn render(&self) -> String {
        format!(
            "<|system|>\n{}\n\n<|user|>\n{}\n\n<|assistant|>",
            self.system_block(),
            self.user
        )
    }
}
