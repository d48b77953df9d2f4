// Configuration loading and parsing (guildhall.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

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
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub pagination: PaginationConfig,
    pub chat: ChatConfig,
    pub credentials: CredentialsConfig,
    pub db_path: String,
}

impl Config {
    /// Host name used in calendar UIDs, taken from `server.public_url`.
    pub fn public_host(&self) -> &str {
        let url = self.server.public_url.as_str();
        let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
        without_scheme
            .split(['/', ':'])
            .next()
            .filter(|h| !h.is_empty())
            .unwrap_or("localhost")
    }

    /// Whether `email` is on the bootstrap admin list (case-insensitive).
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.credentials
            .admin_emails
            .iter()
            .any(|e| e.eq_ignore_ascii_case(email.trim()))
    }
}

// ---------------------------------------------------------------------------
// guildhall.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire guildhall.toml file.
#[derive(Debug, Clone, Deserialize)]
struct GuildhallFile {
    server: ServerConfig,
    auth: AuthConfig,
    pagination: PaginationConfig,
    chat: ChatConfig,
    database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    pub ws_port: u16,
    /// Externally visible base URL, embedded in certificate QR codes.
    pub public_url: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub session_ttl_hours: i64,
    pub cookie_name: String,
    pub min_password_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub max_message_length: usize,
    pub poll_limit: u32,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    /// Accounts registered with one of these emails get the ADMIN role.
    #[serde(default)]
    pub admin_emails: Vec<String>,
}

impl Default for Config {
    /// Built-in settings, mirroring `defaults/guildhall.toml`, with an
    /// in-memory database. Used by tests and embedders.
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                http_port: 8080,
                ws_port: 8081,
                public_url: "http://localhost:8080".into(),
                cors_origins: Vec::new(),
            },
            auth: AuthConfig {
                session_ttl_hours: 336,
                cookie_name: "guildhall_session".into(),
                min_password_length: 8,
            },
            pagination: PaginationConfig {
                default_limit: 20,
                max_limit: 100,
            },
            chat: ChatConfig {
                max_message_length: 4000,
                poll_limit: 200,
            },
            credentials: CredentialsConfig::default(),
            db_path: ":memory:".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/guildhall.toml` and
/// (optionally) `config/credentials.toml`, relative to `base_dir`.
///
/// Does not copy defaults; prefer `load_config()`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- guildhall.toml (required) ---
    let main_path = config_dir.join("guildhall.toml");
    let main_text = read_file(&main_path)?;
    let file: GuildhallFile = toml::from_str(&main_text).map_err(|e| ConfigError::ParseError {
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

    let db_path = if file.database.path.trim().is_empty() {
        default_db_path()?
    } else {
        file.database.path
    };

    let config = Config {
        server: file.server,
        auth: file.auth,
        pagination: file.pagination,
        chat: file.chat,
        credentials,
        db_path,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or set GUILDHALL_HOME",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Loads config relative to `GUILDHALL_HOME`, or the current working
/// directory when unset. Copies default config files first.
pub fn load_config() -> Result<Config, ConfigError> {
    let base = match std::env::var_os("GUILDHALL_HOME") {
        Some(home) => PathBuf::from(home),
        None => std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
            path: PathBuf::from("."),
        })?,
    };
    ensure_config_files(&base)?;
    load_config_from(&base)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

/// `<platform data dir>/guildhall.db`, creating the directory if needed.
fn default_db_path() -> Result<String, ConfigError> {
    let dirs = directories::ProjectDirs::from("org", "guildhall", "guildhall").ok_or_else(|| {
        ConfigError::ValidationError {
            field: "database.path".into(),
            message: "empty and no platform data directory is available".into(),
        }
    })?;
    let data_dir = dirs.data_dir();
    std::fs::create_dir_all(data_dir).map_err(|e| ConfigError::ValidationError {
        field: "database.path".into(),
        message: format!("cannot create {}: {e}", data_dir.display()),
    })?;
    Ok(data_dir.join("guildhall.db").to_string_lossy().into_owned())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// One year.
const MAX_SESSION_TTL_HOURS: i64 = 24 * 366;

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.http_port == config.server.ws_port && config.server.http_port != 0 {
        return Err(ConfigError::ValidationError {
            field: "server.ws_port".into(),
            message: format!(
                "must differ from server.http_port ({})",
                config.server.http_port
            ),
        });
    }

    let url = &config.server.public_url;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError {
            field: "server.public_url".into(),
            message: format!("must start with http:// or https://, got {url:?}"),
        });
    }

    let ttl = config.auth.session_ttl_hours;
    if !(1..=MAX_SESSION_TTL_HOURS).contains(&ttl) {
        return Err(ConfigError::ValidationError {
            field: "auth.session_ttl_hours".into(),
            message: format!("must be between 1 and {MAX_SESSION_TTL_HOURS}, got {ttl}"),
        });
    }

    if config.auth.cookie_name.is_empty()
        || !config
            .auth
            .cookie_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::ValidationError {
            field: "auth.cookie_name".into(),
            message: "must be non-empty and contain only [A-Za-z0-9_-]".into(),
        });
    }

    if config.auth.min_password_length < 6 {
        return Err(ConfigError::ValidationError {
            field: "auth.min_password_length".into(),
            message: "must be at least 6".into(),
        });
    }

    let p = &config.pagination;
    if p.default_limit == 0 || p.max_limit == 0 {
        return Err(ConfigError::ValidationError {
            field: "pagination".into(),
            message: "limits must be > 0".into(),
        });
    }
    if p.default_limit > p.max_limit {
        return Err(ConfigError::ValidationError {
            field: "pagination.default_limit".into(),
            message: format!("must not exceed max_limit ({})", p.max_limit),
        });
    }

    let chat_fields: &[(&str, usize)] = &[
        ("chat.max_message_length", config.chat.max_message_length),
        ("chat.poll_limit", config.chat.poll_limit as usize),
    ];
    for (name, val) in chat_fields {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
