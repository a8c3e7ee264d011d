//! Program persistence seam between the questionnaire and the storage layer.

use async_trait::async_trait;
use serde::Serialize;

use carebot_shared::{Answers, Result};
use carebot_storage::{ProgramRecord, Storage};

/// Who asked for a program; persistence only happens when one is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requester {
    pub user_id: String,
    pub username: String,
}

impl Requester {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

/// Stores a finished program and returns its metadata.
#[async_trait]
pub trait ProgramArchive: Send + Sync {
    async fn archive(
        &self,
        requester: &Requester,
        text: &str,
        answers: &Answers,
    ) -> Result<ProgramRecord>;
}

#[async_trait]
impl ProgramArchive for Storage {
    async fn archive(
        &self,
        requester: &Requester,
        text: &str,
        answers: &Answers,
    ) -> Result<ProgramRecord> {
        self.record_program(&requester.user_id, &requester.username, text, answers)
            .await
    }
}
