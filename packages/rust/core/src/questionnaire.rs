//! Slot-filling questionnaire engine.
//!
//! A session moves `COLLECTING -> COMPLETE -> FINALIZED`. The cursor only
//! advances on an answer that coerces to the question's type, and a session
//! is removed only by a successful finalize or by the expiry sweep.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use carebot_providers::ProgramGenerator;
use carebot_shared::{
    CarebotError, QuestionSpec, QuestionView, Result, SessionConfig, SessionId,
};
use carebot_storage::ProgramRecord;

use crate::archive::{ProgramArchive, Requester};
use crate::questions::NUTRITION_QUESTIONS;
use crate::session::{DEFAULT_INACTIVITY_TIMEOUT, SessionGuard, SessionStore};

/// Where a session stands after an accepted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub answered: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.answered == self.total
    }
}

/// Result of a successful finalize.
#[derive(Debug, Clone, Serialize)]
pub struct ProgramOutcome {
    pub success: bool,
    pub text: String,
    /// Archive metadata, when the program was persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ProgramRecord>,
    /// Why persistence failed; the program text is still returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
}

/// What `answer_and_advance` did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum AnswerStep {
    /// The answer was stored; ask this next.
    Next { question: QuestionView },
    /// That was the last answer; the program is ready.
    Finished { outcome: ProgramOutcome },
}

/// Drives sessions through the fixed question sequence.
pub struct Questionnaire {
    store: Arc<SessionStore>,
    questions: &'static [QuestionSpec],
    generator: Arc<dyn ProgramGenerator>,
    archive: Option<Arc<dyn ProgramArchive>>,
    ttl: Duration,
}

impl Questionnaire {
    pub fn new(store: Arc<SessionStore>, generator: Arc<dyn ProgramGenerator>) -> Self {
        Self {
            store,
            questions: &NUTRITION_QUESTIONS,
            generator,
            archive: None,
            ttl: DEFAULT_INACTIVITY_TIMEOUT,
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn ProgramArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_config(mut self, config: &SessionConfig) -> Self {
        self.ttl = Duration::from_std(config.ttl).unwrap_or(DEFAULT_INACTIVITY_TIMEOUT);
        self
    }

    /// Replace the question sequence (must be non-empty).
    pub fn with_questions(mut self, questions: &'static [QuestionSpec]) -> Self {
        self.questions = questions;
        self
    }

    pub fn questions(&self) -> &'static [QuestionSpec] {
        self.questions
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn total(&self) -> usize {
        self.questions.len()
    }

    fn view_at(&self, index: usize) -> Option<QuestionView> {
        self.questions
            .get(index)
            .map(|spec| QuestionView::new(spec, index, self.total()))
    }

    async fn lock(&self, id: SessionId) -> Result<SessionGuard> {
        self.store
            .lock(id)
            .await
            .ok_or_else(|| CarebotError::session_not_found(id))
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Start a new session at the first question.
    pub fn begin(&self) -> SessionId {
        self.store.create()
    }

    /// The question at the cursor, or `None` for unknown or complete sessions.
    /// Refreshes the session's activity time.
    pub async fn next_prompt(&self, id: SessionId) -> Option<QuestionView> {
        let mut session = self.store.lock(id).await?;
        session.touch();
        self.view_at(session.cursor)
    }

    /// Store an answer for the current question and advance by one.
    ///
    /// An answer that does not coerce leaves the cursor where it was.
    #[instrument(skip(self, raw), fields(session_id = %id))]
    pub async fn submit_answer(&self, id: SessionId, raw: &str) -> Result<Progress> {
        let mut session = self.lock(id).await?;
        session.touch();

        let Some(spec) = self.questions.get(session.cursor) else {
            return Err(CarebotError::AlreadyComplete { id: id.to_string() });
        };

        let value = spec
            .field_type
            .coerce(raw)
            .ok_or_else(|| CarebotError::InvalidType {
                field: spec.field.to_string(),
                expected: spec.field_type.to_string(),
                value: raw.to_string(),
            })?;

        session.answers.insert(spec.field, value);
        session.cursor += 1;

        Ok(Progress {
            answered: session.cursor,
            total: self.total(),
        })
    }

    /// Turn a complete session into a program.
    ///
    /// The session lock is held for the whole generation, so concurrent
    /// answers for the same session wait. On generator failure the session
    /// stays for a retry; on success it is removed. Persistence (only with a
    /// requester and an archive) never fails the call.
    #[instrument(skip(self, requester), fields(session_id = %id))]
    pub async fn finalize(
        &self,
        id: SessionId,
        requester: Option<&Requester>,
    ) -> Result<ProgramOutcome> {
        let mut session = self.lock(id).await?;
        session.touch();

        if session.cursor < self.total() {
            return Err(CarebotError::Incomplete {
                id: id.to_string(),
                answered: session.cursor,
                total: self.total(),
            });
        }

        let text = self
            .generator
            .generate_program(&session.answers)
            .await
            .map_err(|e| match e {
                CarebotError::GenerationFailure(_) => e,
                other => CarebotError::GenerationFailure(other.to_string()),
            })?;

        let answers = session.answers.clone();
        self.store.retire(&mut session);
        drop(session);
        info!(chars = text.len(), "session finalized");

        let mut outcome = ProgramOutcome {
            success: true,
            text,
            artifact: None,
            persistence_error: None,
        };

        if let (Some(archive), Some(requester)) = (&self.archive, requester) {
            match archive.archive(requester, &outcome.text, &answers).await {
                Ok(record) => outcome.artifact = Some(record),
                Err(e) => {
                    warn!(error = %e, user_id = %requester.user_id, "program not persisted");
                    outcome.persistence_error =
                        Some(CarebotError::PersistenceFailure(e.to_string()).to_string());
                }
            }
        }

        Ok(outcome)
    }

    /// Submit an answer, then either return the next question or finalize.
    pub async fn answer_and_advance(
        &self,
        id: SessionId,
        raw: &str,
        requester: Option<&Requester>,
    ) -> Result<AnswerStep> {
        let progress = self.submit_answer(id, raw).await?;
        if progress.is_complete() {
            let outcome = self.finalize(id, requester).await?;
            return Ok(AnswerStep::Finished { outcome });
        }
        match self.next_prompt(id).await {
            Some(question) => Ok(AnswerStep::Next { question }),
            None => Err(CarebotError::session_not_found(id)),
        }
    }

    /// Remove sessions idle for longer than `ttl` at `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        self.store.sweep_expired(now, ttl)
    }

    /// Sweep with the configured inactivity window.
    pub fn sweep_expired_now(&self) -> usize {
        self.sweep_expired(Utc::now(), self.ttl)
    }

    pub fn active_sessions(&self) -> usize {
        self.store.len()
    }
}
