//! libSQL-backed archive of generated programs.
//!
//! Each archived program is a Markdown document written under the programs
//! directory plus one `user_programs` row describing it. Deleting a program is
//! a soft delete: the row is marked `deleted` and stops being listed.
//!
//! **Access rules:**
//! - chat and program generation: read-write via [`Storage::open`]
//! - listing tools: read-only via [`Storage::open_readonly`]

mod document;
mod migrations;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use libsql::{Connection, Database, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use carebot_shared::{Answers, CarebotError, Result};

/// Program type recorded for questionnaire output.
pub const NUTRITION_PROGRAM: &str = "nutrition";

const STATUS_ACTIVE: &str = "active";
const STATUS_DELETED: &str = "deleted";

/// Metadata of one archived program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramRecord {
    pub program_id: String,
    pub user_id: String,
    pub username: String,
    pub filename: String,
    pub file_path: PathBuf,
    /// SHA-256 of the document bytes.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub program_type: String,
    pub status: String,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    programs_dir: PathBuf,
}

fn storage_err(e: impl std::fmt::Display) -> CarebotError {
    CarebotError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode. Documents go to
    /// a `programs/` directory next to the database unless overridden with
    /// [`with_programs_dir`](Self::with_programs_dir).
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CarebotError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            programs_dir: default_programs_dir(path),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            programs_dir: default_programs_dir(path),
        })
    }

    /// Write program documents to `dir` instead of the default.
    pub fn with_programs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.programs_dir = dir.into();
        self
    }

    pub fn programs_dir(&self) -> &Path {
        &self.programs_dir
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    CarebotError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(CarebotError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Program operations
    // -----------------------------------------------------------------------

    /// Write the program document and record it for `user_id`.
    ///
    /// If the row cannot be inserted the document is removed again.
    pub async fn record_program(
        &self,
        user_id: &str,
        username: &str,
        text: &str,
        answers: &Answers,
    ) -> Result<ProgramRecord> {
        self.check_writable()?;

        let program_id = Uuid::now_v7().to_string();
        // Stored with microsecond precision; keep the returned record identical.
        let created_at = Utc::now().trunc_subsecs(6);
        let filename = format!("{program_id}.md");
        let file_path = self.programs_dir.join(&filename);

        let document = document::render_program(username, created_at, text, answers);
        let content_hash = compute_hash(&document);

        std::fs::create_dir_all(&self.programs_dir)
            .map_err(|e| CarebotError::io(&self.programs_dir, e))?;
        std::fs::write(&file_path, &document).map_err(|e| CarebotError::io(&file_path, e))?;

        let path_str = file_path.to_string_lossy().to_string();
        let created_str = created_at.to_rfc3339_opts(SecondsFormat::Micros, true);
        let inserted = self
            .conn
            .execute(
                "INSERT INTO user_programs
                 (program_id, user_id, username, filename, file_path, content_hash, created_at, program_type, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    program_id.as_str(),
                    user_id,
                    username,
                    filename.as_str(),
                    path_str.as_str(),
                    content_hash.as_str(),
                    created_str.as_str(),
                    NUTRITION_PROGRAM,
                    STATUS_ACTIVE
                ],
            )
            .await;

        if let Err(e) = inserted {
            let _ = std::fs::remove_file(&file_path);
            return Err(storage_err(e));
        }

        tracing::info!(%program_id, user_id, path = %file_path.display(), "program archived");

        Ok(ProgramRecord {
            program_id,
            user_id: user_id.to_string(),
            username: username.to_string(),
            filename,
            file_path,
            content_hash,
            created_at,
            program_type: NUTRITION_PROGRAM.to_string(),
            status: STATUS_ACTIVE.to_string(),
        })
    }

    /// Active programs of a user, newest first.
    pub async fn list_programs(&self, user_id: &str) -> Result<Vec<ProgramRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT program_id, user_id, username, filename, file_path, content_hash,
                        created_at, program_type, status
                 FROM user_programs
                 WHERE user_id = ?1 AND status = ?2
                 ORDER BY created_at DESC, program_id DESC",
                params![user_id, STATUS_ACTIVE],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    /// Document path of an active program.
    pub async fn program_file_path(&self, program_id: &str) -> Result<Option<PathBuf>> {
        let mut rows = self
            .conn
            .query(
                "SELECT file_path FROM user_programs WHERE program_id = ?1 AND status = ?2",
                params![program_id, STATUS_ACTIVE],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(PathBuf::from(
                row.get::<String>(0).map_err(storage_err)?,
            ))),
            None => Ok(None),
        }
    }

    /// Contents of an active program's document, or `None` if there is no
    /// such program. A row whose document has gone missing is an I/O error.
    pub async fn read_program(&self, program_id: &str) -> Result<Option<String>> {
        let Some(path) = self.program_file_path(program_id).await? else {
            return Ok(None);
        };
        let body = std::fs::read_to_string(&path).map_err(|e| CarebotError::io(&path, e))?;
        Ok(Some(body))
    }

    /// Mark a user's program deleted. Returns whether an active row changed.
    pub async fn delete_program(&self, program_id: &str, user_id: &str) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE user_programs SET status = ?1
                 WHERE program_id = ?2 AND user_id = ?3 AND status = ?4",
                params![STATUS_DELETED, program_id, user_id, STATUS_ACTIVE],
            )
            .await
            .map_err(storage_err)?;

        if changed > 0 {
            tracing::info!(program_id, user_id, "program deleted");
        }
        Ok(changed > 0)
    }
}

fn default_programs_dir(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .map(|p| p.join("programs"))
        .unwrap_or_else(|| PathBuf::from("programs"))
}

fn row_to_record(row: &libsql::Row) -> Result<ProgramRecord> {
    let created_raw: String = row.get(6).map_err(storage_err)?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CarebotError::Storage(format!("bad created_at {created_raw:?}: {e}")))?;

    Ok(ProgramRecord {
        program_id: row.get(0).map_err(storage_err)?,
        user_id: row.get(1).map_err(storage_err)?,
        username: row.get(2).map_err(storage_err)?,
        filename: row.get(3).map_err(storage_err)?,
        file_path: PathBuf::from(row.get::<String>(4).map_err(storage_err)?),
        content_hash: row.get(5).map_err(storage_err)?,
        created_at,
        program_type: row.get(7).map_err(storage_err)?,
        status: row.get(8).map_err(storage_err)?,
    })
}

/// Compute SHA-256 hash of content.
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
