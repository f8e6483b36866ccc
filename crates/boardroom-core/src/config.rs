// Configuration loading and parsing (boardroom.toml, credentials.toml, env).

use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::persona::Persona;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_MODEL: &str = "OPENAI_MODEL";

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub user: UserConfig,
    pub report: ReportConfig,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// boardroom.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire boardroom.toml file.
#[derive(Debug, Clone, Deserialize)]
struct BoardroomFile {
    llm: LlmConfig,
    database: DatabaseConfig,
    user: UserConfig,
    report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API, without the
    /// `/chat/completions` suffix.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Stream chat replies token by token.
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path. Empty means the platform data directory.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub email: String,
    pub full_name: String,
    pub role: String,
    #[serde(default)]
    pub department: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Personas consulted when a report request names none.
    pub default_agents: Vec<String>,
    /// How many conversations / reports the history listings show.
    pub history_limit: usize,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub openai_api_key: Option<String>,
}

impl CredentialsConfig {
    /// The API key, if one is set and non-empty.
    pub fn api_key(&self) -> Option<&str> {
        self.openai_api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/boardroom.toml` and
/// (optionally) `config/credentials.toml`, relative to `base_dir`, then apply
/// environment overrides via `env`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults
/// and does not read the process environment directly.
pub fn load_config_from(
    base_dir: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- boardroom.toml (required) ---
    let main_path = config_dir.join("boardroom.toml");
    let main_text = read_file(&main_path)?;
    let file: BoardroomFile = toml::from_str(&main_text).map_err(|e| ConfigError::ParseError {
        path: main_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let mut config = Config {
        llm: file.llm,
        database: file.database,
        user: file.user,
        report: file.report,
        credentials,
    };

    apply_env_overrides(&mut config, env);
    validate(&config)?;

    Ok(config)
}

/// Overlay `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_MODEL`. Empty
/// values are ignored.
pub fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = non_empty(ENV_API_KEY) {
        config.credentials.openai_api_key = Some(key);
    }
    if let Some(url) = non_empty(ENV_BASE_URL) {
        config.llm.base_url = url;
    }
    if let Some(model) = non_empty(ENV_MODEL) {
        config.llm.model = model;
    }
}

/// Populate `config/` from `defaults/`, never overwriting a file that is
/// already there. Returns the files written, sorted by name.
///
/// `*.example` templates (the credentials file) are left for the user to copy
/// by hand. Without a `defaults/` directory an existing `config/` is used
/// as-is.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.is_dir() {
        if config_dir.is_dir() {
            return Ok(Vec::new());
        }
        return Err(copy_error(format!(
            "no defaults/ or config/ directory under {}; run boardroom from the project root",
            base_dir.display()
        )));
    }

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| copy_error(format!("cannot create {}: {e}", config_dir.display())))?;

    let mut shipped: Vec<PathBuf> = std::fs::read_dir(&defaults_dir)
        .map_err(|e| copy_error(format!("cannot list {}: {e}", defaults_dir.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_none_or(|ext| ext != "example"))
        .collect();
    shipped.sort();

    let mut copied = Vec::new();
    for source in shipped {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = config_dir.join(name);
        if copy_if_missing(&source, &target)? {
            info!(file = %target.display(), "installed default config file");
            copied.push(target);
        }
    }
    Ok(copied)
}

/// Copy `source` to `target` unless `target` exists. `create_new` makes the
/// existence check and the create one step.
fn copy_if_missing(source: &Path, target: &Path) -> Result<bool, ConfigError> {
    let mut dest = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(copy_error(format!("cannot create {}: {e}", target.display()))),
    };
    let content = std::fs::read(source)
        .map_err(|e| copy_error(format!("cannot read {}: {e}", source.display())))?;
    dest.write_all(&content)
        .map_err(|e| copy_error(format!("cannot write {}: {e}", target.display())))?;
    Ok(true)
}

fn copy_error(message: String) -> ConfigError {
    ConfigError::DefaultsCopyError { message }
}

/// Convenience wrapper: loads config relative to the current working
/// directory, copying defaults first and reading overrides from the process
/// environment.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd, |key| std::env::var(key).ok())
}

impl Config {
    /// Where the SQLite file lives. An empty `database.path` resolves to
    /// `<platform data dir>/boardroom.db`, falling back to the working
    /// directory when no home directory is known.
    pub fn resolved_db_path(&self) -> PathBuf {
        if !self.database.path.trim().is_empty() {
            return PathBuf::from(&self.database.path);
        }
        match directories::ProjectDirs::from("", "", "boardroom") {
            Some(dirs) => dirs.data_dir().join("boardroom.db"),
            None => PathBuf::from("boardroom.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let llm = &config.llm;

    if !(llm.base_url.starts_with("http://") || llm.base_url.starts_with("https://")) {
        return Err(ConfigError::ValidationError {
            field: "llm.base_url".into(),
            message: format!("must start with http:// or https://, got {:?}", llm.base_url),
        });
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "llm.model".into(),
            message: "must not be empty".into(),
        });
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::ValidationError {
            field: "llm.temperature".into(),
            message: format!("must be between 0.0 and 2.0 inclusive, got {}", llm.temperature),
        });
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::ValidationError {
            field: "llm.max_tokens".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.user.email.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "user.email".into(),
            message: "must not be empty".into(),
        });
    }

    for tag in &config.report.default_agents {
        if Persona::from_tag(tag).is_none() {
            return Err(ConfigError::ValidationError {
                field: "report.default_agents".into(),
                message: format!("unknown agent {tag:?}; expected one of CFO, CTO, CMO, COO, CHRO"),
            });
        }
    }

    if config.report.history_limit == 0 {
        return Err(ConfigError::ValidationError {
            field: "report.history_limit".into(),
            message: "must be greater than 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
