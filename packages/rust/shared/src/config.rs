//! Application configuration for carebot.
//!
//! User config lives at `~/.carebot/carebot.toml`.
//! Values missing from the file fall back to defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CarebotError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "carebot.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".carebot";

/// Minimum classifier confidence before an intent is acted on.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Inactivity window after which a questionnaire session is reclaimed.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;

// ---------------------------------------------------------------------------
// Config structs (matching carebot.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub router: RouterSection,

    #[serde(default)]
    pub sessions: SessionsSection,

    #[serde(default)]
    pub retrieval: RetrievalSection,

    #[serde(default)]
    pub sanitizer: SanitizerSection,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub storage: StorageSection,
}

/// `[router]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    /// Predictions below this confidence are rejected without dispatch.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

/// `[sessions]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsSection {
    /// Seconds of inactivity before a session is swept.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSection {
    /// Number of neighbours fetched per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// JSON chunk index loaded at startup.
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Hard cap on context characters handed to the prompt (0 = unlimited).
    #[serde(default)]
    pub max_context_chars: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            index_path: default_index_path(),
            max_context_chars: 0,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_index_path() -> String {
    "~/.carebot/index/chunks.json".into()
}

/// How aggressively generated text is scrubbed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizerMode {
    /// Strip role markers, special tokens and complete markup tags only.
    #[default]
    Scoped,
    /// Reproduce the legacy character denylist over the whole text.
    Compat,
}

/// `[sanitizer]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SanitizerSection {
    #[serde(default)]
    pub mode: SanitizerMode,
}

/// `[classifier]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// URL accepting `{"text": ...}` and answering `{"label", "confidence"}`.
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_classifier_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_classifier_endpoint() -> String {
    "http://127.0.0.1:8090/predict".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[embeddings]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_embeddings_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embeddings_endpoint(),
            model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embeddings_endpoint() -> String {
    "http://127.0.0.1:8091/v1/embeddings".into()
}
fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".into()
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL of an OpenAI-compatible server (`/chat/completions` is appended).
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_generation_model")]
    pub default_model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Generation can legitimately take tens of seconds.
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,

    /// Per-responder model overrides, keyed by responder name.
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            api_key_env: default_api_key_env(),
            default_model: default_generation_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout_secs(),
            models: BTreeMap::new(),
        }
    }
}

impl GenerationConfig {
    /// Model for a responder, falling back to the default.
    pub fn model_for(&self, responder: &str) -> &str {
        self.models
            .get(responder)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }

    /// Whether `base_url` points at this machine.
    pub fn is_local(&self) -> bool {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|url| {
                url.host_str()
                    .map(|host| matches!(host, "localhost" | "127.0.0.1" | "[::1]"))
            })
            .unwrap_or(false)
    }
}

fn default_generation_base_url() -> String {
    "http://127.0.0.1:8080/v1".into()
}
fn default_api_key_env() -> String {
    "CAREBOT_API_KEY".into()
}
fn default_generation_model() -> String {
    "stabilityai/stablelm-2-zephyr-1_6b".into()
}
fn default_max_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generation_timeout_secs() -> u64 {
    180
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// libSQL database holding the program archive.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory receiving generated program documents.
    #[serde(default = "default_programs_dir")]
    pub programs_dir: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            programs_dir: default_programs_dir(),
        }
    }
}

fn default_db_path() -> String {
    "~/.carebot/carebot.db".into()
}
fn default_programs_dir() -> String {
    "~/.carebot/programs".into()
}

// ---------------------------------------------------------------------------
// Runtime configs
// ---------------------------------------------------------------------------

/// Runtime router settings.
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    pub confidence_threshold: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl From<&AppConfig> for RouterConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            confidence_threshold: config.router.confidence_threshold,
        }
    }
}

/// Runtime session-store settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        }
    }
}

impl From<&AppConfig> for SessionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.sessions.ttl_secs),
        }
    }
}

/// Runtime retrieval settings.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// `None` leaves the context untruncated.
    pub max_context_chars: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: None,
        }
    }
}

impl From<&AppConfig> for RetrievalConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            max_context_chars: (config.retrieval.max_context_chars > 0)
                .then_some(config.retrieval.max_context_chars),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.carebot/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| CarebotError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.carebot/carebot.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CarebotError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| CarebotError::config(format!("failed to parse {}: {e}", path.display())))?;
    validate(&config)?;
    Ok(config)
}

/// Reject values no component can work with.
fn validate(config: &AppConfig) -> Result<()> {
    let threshold = config.router.confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(CarebotError::config(format!(
            "router.confidence_threshold must be within [0, 1], got {threshold}"
        )));
    }
    if config.retrieval.top_k == 0 {
        return Err(CarebotError::config("retrieval.top_k must be at least 1"));
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CarebotError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CarebotError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CarebotError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the generation API key env var is set and non-empty.
/// Endpoints on the local machine need no key.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    if config.generation.is_local() {
        return Ok(());
    }
    let var_name = &config.generation.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(CarebotError::config(format!(
            "generation API key not found. Set the {var_name} environment variable."
        ))),
    }
}
