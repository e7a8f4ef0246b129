//! Application configuration.
//!
//! Settings are read from a TOML file and then overridden by environment
//! variables, so a `.env` file is enough to get started:
//!
//! ```toml
//! [model]
//! model = "Qwen/Qwen2.5-72B-Instruct"
//!
//! [agent]
//! max_steps = 25
//!
//! [storage]
//! database = "/home/me/.local/share/parley/chatbot.db"
//!
//! [tools]
//! time_zone = "Europe/Berlin"
//! disabled = ["search_youtube"]
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_DATABASE: &str = "chatbot.db";
const DEFAULT_TOKEN_PATH: &str = "token.json";

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
    /// The file is not valid TOML for [`AppConfig`].
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        /// Path of the configuration file.
        path: PathBuf,
        /// The TOML error.
        source: toml::de::Error,
    },
}

/// The whole configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// The `[model]` section.
    pub model: ModelConfig,
    /// The `[agent]` section.
    pub agent: AgentConfig,
    /// The `[storage]` section.
    pub storage: StorageConfig,
    /// The `[tools]` section.
    pub tools: ToolsConfig,
}

/// Chat-completions endpoint settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// API key of the endpoint.
    pub api_key: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: Option<String>,
    /// Limit of generated tokens per response.
    pub max_tokens: Option<u32>,
}

/// Agent loop settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Replaces the built-in system prompt.
    pub system_prompt: Option<String>,
    /// Maximum model calls per turn.
    pub max_steps: Option<usize>,
    /// Time limit of a single tool call, in seconds.
    pub tool_timeout_secs: Option<u64>,
}

impl AgentConfig {
    /// Returns the tool time limit, if any.
    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Where conversations are stored.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the SQLite database.
    pub database: Option<PathBuf>,
}

/// Built-in tool settings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Alpha Vantage key for `get_stock_price`.
    pub alphavantage_api_key: Option<String>,
    /// YouTube Data API key for `search_youtube`.
    pub youtube_api_key: Option<String>,
    /// Authorized-user token file for the calendar tools.
    pub google_token_path: Option<PathBuf>,
    /// Calendar to use, `primary` by default.
    pub calendar_id: Option<String>,
    /// Time zone of created events, `Asia/Kolkata` by default.
    pub time_zone: Option<String>,
    /// Names of tools that are not offered to the model.
    pub disabled: Vec<String>,
}

impl ToolsConfig {
    /// Returns `true` unless the tool is listed in `disabled`.
    pub fn is_enabled(&self, name: &str) -> bool {
        !self.disabled.iter().any(|disabled| disabled == name)
    }

    /// Returns the token file path, relative to the working directory by
    /// default.
    pub fn google_token_path(&self) -> PathBuf {
        self.google_token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "parley", "parley")
}

impl AppConfig {
    /// Returns the default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads the configuration from `path`, or from [`Self::default_path`].
    ///
    /// A missing file yields the defaults. Environment overrides are not
    /// applied here; see [`Self::apply_env`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path.map(Path::to_owned).or_else(Self::default_path)
        else {
            return Ok(Self::default());
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path, source })
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides read through `lookup`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(key) =
            var("HUGGINGFACEHUB_API_TOKEN").or_else(|| var("HF_TOKEN"))
        {
            self.model.api_key = Some(key);
        }
        if let Some(model) = var("PARLEY_MODEL") {
            self.model.model = Some(model);
        }
        if let Some(base_url) = var("PARLEY_BASE_URL") {
            self.model.base_url = Some(base_url);
        }
        if let Some(key) = var("ALPHAVANTAGE_API_KEY") {
            self.tools.alphavantage_api_key = Some(key);
        }
        if let Some(key) = var("YOUTUBE_API_KEY") {
            self.tools.youtube_api_key = Some(key);
        }
        if let Some(database) = var("PARLEY_DATABASE") {
            self.storage.database = Some(PathBuf::from(database));
        }
    }

    /// Returns the database path, `chatbot.db` in the data directory by
    /// default.
    pub fn database_path(&self) -> PathBuf {
        if let Some(database) = &self.storage.database {
            return database.clone();
        }
        match project_dirs() {
            Some(dirs) => dirs.data_dir().join(DEFAULT_DATABASE),
            None => PathBuf::from(DEFAULT_DATABASE),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_parse() {
        let config: AppConfig = toml::from_str(
            r#"
[model]
model = "meta-llama/Llama-3.1-8B-Instruct"
max_tokens = 1024

[agent]
max_steps = 8
tool_timeout_secs = 30

[tools]
calendar_id = "team@example.com"
disabled = ["search_youtube"]
"#,
        )
        .unwrap();
        assert_eq!(
            config.model.model.as_deref(),
            Some("meta-llama/Llama-3.1-8B-Instruct")
        );
        assert_eq!(config.model.max_tokens, Some(1024));
        assert_eq!(config.agent.max_steps, Some(8));
        assert_eq!(config.agent.tool_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.tools.calendar_id.as_deref(), Some("team@example.com"));
        assert!(!config.tools.is_enabled("search_youtube"));
        assert!(config.tools.is_enabled("calculator"));
        assert!(config.storage.database.is_none());
        assert_eq!(config.tools.google_token_path(), PathBuf::from("token.json"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HF_TOKEN", "hf_fallback"),
            ("PARLEY_MODEL", "Qwen/Qwen2.5-7B-Instruct"),
            ("ALPHAVANTAGE_API_KEY", "av"),
            ("YOUTUBE_API_KEY", ""),
            ("PARLEY_DATABASE", "/tmp/chat.db"),
        ]);
        let mut config = AppConfig::default();
        config.tools.youtube_api_key = Some("from-file".to_owned());
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.model.api_key.as_deref(), Some("hf_fallback"));
        assert_eq!(
            config.model.model.as_deref(),
            Some("Qwen/Qwen2.5-7B-Instruct")
        );
        assert_eq!(config.tools.alphavantage_api_key.as_deref(), Some("av"));
        assert_eq!(config.tools.youtube_api_key.as_deref(), Some("from-file"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/chat.db"));

        let env = HashMap::from([
            ("HUGGINGFACEHUB_API_TOKEN", "hf_primary"),
            ("HF_TOKEN", "hf_fallback"),
        ]);
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.model.api_key.as_deref(), Some("hf_primary"));
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let config = AppConfig::load(Some(&missing)).unwrap();
        assert!(config.model.model.is_none());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[agent]\nmax_steps = \"many\"\n").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&broken)),
            Err(ConfigError::Parse { .. })
        ));

        let good = dir.path().join("config.toml");
        std::fs::write(&good, "[storage]\ndatabase = \"chat.db\"\n").unwrap();
        let config = AppConfig::load(Some(&good)).unwrap();
        assert_eq!(config.database_path(), PathBuf::from("chat.db"));
    }
}
