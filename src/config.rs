use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing as log;

pub static CONFIG_FILE_NAME: &str = "mergewatch.toml";
static DEFAULT_STATE_FILE: &str = "mergewatch.json";

#[derive(PartialEq, Eq, Debug, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Where the credential and watched projects are stored.
    pub state_file: Option<PathBuf>,
}

#[derive(PartialEq, Eq, Debug, serde::Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// How long the project directory is reused between cycles; 0 refetches
    /// it every cycle.
    #[serde(default = "default_directory_refresh_secs")]
    pub directory_refresh_secs: u64,
}

#[derive(PartialEq, Eq, Debug, serde::Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_directory_refresh_secs() -> u64 {
    300
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            interval_secs: default_interval_secs(),
            directory_refresh_secs: default_directory_refresh_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Reads the configuration.
    ///
    /// With an explicit `path` the file must exist. Otherwise
    /// `mergewatch.toml` in the working directory is used if present, and
    /// the defaults if not.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigurationError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(CONFIG_FILE_NAME), false),
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                log::debug!("no {}, using defaults", path.display());
                return Ok(Config::default());
            }
            Err(e) => return Err(ConfigurationError::Io(path, e)),
        };
        let config = toml::from_str::<Config>(&contents).map_err(ConfigurationError::Toml)?;
        log::debug!("configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        // `tokio::time::interval` rejects a zero period.
        Duration::from_secs(self.poll.interval_secs.max(1))
    }

    pub fn directory_refresh(&self) -> Duration {
        Duration::from_secs(self.poll.directory_refresh_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// `MERGEWATCH_STATE_FILE` wins over the configured path.
    pub fn state_file(&self) -> PathBuf {
        std::env::var_os("MERGEWATCH_STATE_FILE")
            .map(PathBuf::from)
            .or_else(|| self.state_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
    }
}

#[derive(Debug)]
pub enum ConfigurationError {
    Io(PathBuf, std::io::Error),
    Toml(toml::de::Error),
}

impl std::error::Error for ConfigurationError {}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigurationError::Io(path, e) => {
                write!(f, "Failed to read configuration {}: {}", path.display(), e)
            }
            ConfigurationError::Toml(e) => {
                write!(f, "Malformed `{}`.\n{}", CONFIG_FILE_NAME, e)
            }
        }
    }
}
