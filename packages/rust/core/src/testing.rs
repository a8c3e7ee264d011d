//! In-crate fakes for every capability trait.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use carebot_providers::{
    EmbeddingProvider, FragmentStream, IndexedChunk, IntentClassifier, Neighbor,
    ProgramGenerator, Responder, VectorIndex,
};
use carebot_shared::{
    Answers, CarebotError, GenerationRequest, IntentPrediction, Result,
};
use carebot_storage::{NUTRITION_PROGRAM, ProgramRecord};

use crate::archive::{ProgramArchive, Requester};

/// One valid answer per question, in order.
pub fn valid_answers() -> Vec<&'static str> {
    vec![
        "31", "64.5", "165", "moderate", "desk_job", "7", "medium", "no", "0", "12",
        "vaginal", "yes", "12", "none", "none", "none", "none", "none", "none",
        "intermediate", "energy_boost", "3", "4", "yes", "quick", "medium",
        "mediterranean", "mild", "meal_prep",
    ]
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

pub struct StaticClassifier {
    reply: std::result::Result<IntentPrediction, String>,
}

impl StaticClassifier {
    pub fn new(label: &str, confidence: f64) -> Self {
        Self {
            reply: Ok(IntentPrediction::new(label, confidence)),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            reply: Err(error.to_string()),
        }
    }
}

#[async_trait]
impl IntentClassifier for StaticClassifier {
    async fn predict(&self, _text: &str) -> Result<IntentPrediction> {
        self.reply.clone().map_err(CarebotError::ClassifierFailure)
    }
}

// ---------------------------------------------------------------------------
// Embeddings and index
// ---------------------------------------------------------------------------

pub struct FixedEmbedder {
    vector: Vec<f32>,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.vector.len())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn encode_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Err(CarebotError::Network("embedding server down".into()))
    }

    fn dimension(&self) -> Option<usize> {
        None
    }
}

/// Counts calls; can be told to fail the next one.
#[derive(Default)]
pub struct CountingEmbedder {
    calls: AtomicUsize,
    fail_next: AtomicBool,
}

impl CountingEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CarebotError::Network("timeout".into()));
        }
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(2)
    }
}

/// Returns its chunks ranked by a preset score, ignoring the query.
pub struct StaticIndex {
    chunks: Vec<(IndexedChunk, f32)>,
}

impl StaticIndex {
    pub fn new(entries: &[(&str, &str, f32)]) -> Self {
        Self {
            chunks: entries
                .iter()
                .map(|(content, source, score)| {
                    (
                        IndexedChunk {
                            content: content.to_string(),
                            source_id: source.to_string(),
                        },
                        *score,
                    )
                })
                .collect(),
        }
    }
}

impl VectorIndex for StaticIndex {
    fn search(&self, _query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let mut hits: Vec<Neighbor> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(index, (_, score))| Neighbor {
                index,
                score: *score,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    fn chunk(&self, index: usize) -> Option<IndexedChunk> {
        self.chunks.get(index).map(|(chunk, _)| chunk.clone())
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

enum Script {
    /// Same fragments for every call.
    Replying(Vec<String>),
    /// One whole reply per call, in order.
    Sequence(VecDeque<String>),
    /// Items for a single streamed call.
    Streaming(Option<Vec<Result<String>>>),
    Failing(String),
}

#[derive(Default)]
struct ResponderLog {
    requests: Vec<GenerationRequest>,
}

/// Scripted generative backend. Clones share their state.
#[derive(Clone)]
pub struct ScriptedResponder {
    script: Arc<Mutex<Script>>,
    log: Arc<Mutex<ResponderLog>>,
}

impl ScriptedResponder {
    fn with(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            log: Arc::default(),
        }
    }

    pub fn replying<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with(Script::Replying(fragments.into_iter().map(Into::into).collect()))
    }

    pub fn sequence<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with(Script::Sequence(replies.into_iter().map(Into::into).collect()))
    }

    pub fn streaming(items: Vec<Result<String>>) -> Self {
        Self::with(Script::Streaming(Some(items)))
    }

    pub fn failing(error: &str) -> Self {
        Self::with(Script::Failing(error.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().requests.len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.log.lock().unwrap().requests.clone()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.log.lock().unwrap().requests.last().cloned()
    }

    fn record(&self, request: &GenerationRequest) {
        self.log.lock().unwrap().requests.push(request.clone());
    }

    fn next_items(&self) -> Result<Vec<Result<String>>> {
        let mut script = self.script.lock().unwrap();
        match &mut *script {
            Script::Replying(fragments) => Ok(fragments.iter().cloned().map(Ok).collect()),
            Script::Sequence(queue) => queue
                .pop_front()
                .map(|reply| vec![Ok(reply)])
                .ok_or_else(|| CarebotError::GenerationFailure("script exhausted".into())),
            Script::Streaming(items) => items
                .take()
                .ok_or_else(|| CarebotError::GenerationFailure("stream already used".into())),
            Script::Failing(error) => Err(CarebotError::Network(error.clone())),
        }
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    fn describe(&self) -> String {
        "scripted".into()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.record(request);
        let mut text = String::new();
        for item in self.next_items()? {
            text.push_str(&item?);
        }
        Ok(text)
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        self.record(request);
        Ok(FragmentStream::from_results(self.next_items()?))
    }
}

// ---------------------------------------------------------------------------
// Program generation and archive
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedGenerator {
    text: String,
    fail_once: Mutex<Option<String>>,
    calls: AtomicUsize,
    last_answers: Mutex<Option<Answers>>,
}

impl ScriptedGenerator {
    pub fn ok(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            ..Self::default()
        })
    }

    pub fn failing_once(error: &str, then: &str) -> Arc<Self> {
        Arc::new(Self {
            text: then.to_string(),
            fail_once: Mutex::new(Some(error.to_string())),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_answers(&self) -> Option<Answers> {
        self.last_answers.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgramGenerator for ScriptedGenerator {
    async fn generate_program(&self, answers: &Answers) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_answers.lock().unwrap() = Some(answers.clone());
        if let Some(error) = self.fail_once.lock().unwrap().take() {
            return Err(CarebotError::GenerationFailure(error));
        }
        Ok(self.text.clone())
    }
}

#[derive(Default)]
pub struct MemoryArchive {
    records: Mutex<Vec<ProgramRecord>>,
}

impl MemoryArchive {
    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl ProgramArchive for MemoryArchive {
    async fn archive(
        &self,
        requester: &Requester,
        text: &str,
        _answers: &Answers,
    ) -> Result<ProgramRecord> {
        let program_id = uuid::Uuid::now_v7().to_string();
        let record = ProgramRecord {
            filename: format!("{program_id}.md"),
            file_path: PathBuf::from(format!("/tmp/{program_id}.md")),
            program_id,
            user_id: requester.user_id.clone(),
            username: requester.username.clone(),
            content_hash: format!("{:x}", text.len()),
            created_at: Utc::now(),
            program_type: NUTRITION_PROGRAM.to_string(),
            status: "active".to_string(),
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }
}

pub struct FailingArchive;

#[async_trait]
impl ProgramArchive for FailingArchive {
    async fn archive(
        &self,
        _requester: &Requester,
        _text: &str,
        _answers: &Answers,
    ) -> Result<ProgramRecord> {
        Err(CarebotError::Storage("disk full".into()))
    }
}
