//! Engine configuration.
//!
//! Sources, highest priority first:
//! 1. command-line flags (applied by the caller),
//! 2. environment variables (`BF_TAPE_SIZE`, `BF_STEP_DELAY_MS`,
//!    `BF_MAX_STEPS`, `BF_TIMEOUT_MS`, `BF_POINTER_POLICY`, `BF_BRACKET_MODE`),
//! 3. the `[engine]` table of `bf.toml` in the XDG config home,
//! 4. built-in defaults.
//!
//! ```toml
//! [engine]
//! tape_size = 30000
//! step_delay_ms = 25
//! pointer_policy = "wrap"      # or "strict"
//! bracket_mode = "permissive"  # or "strict"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use cross_xdg::BaseDirs;
use serde::Deserialize;

use crate::engine::BracketMode;
use crate::error::ConfigError;
use crate::tape::{PointerPolicy, DEFAULT_CAPACITY};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of tape cells.
    pub tape_size: usize,
    /// Pause after every step of a run, in milliseconds.
    pub step_delay_ms: u64,
    pub max_steps: Option<usize>,
    /// Wall-clock budget for a CLI run, in milliseconds.
    pub timeout_ms: u64,
    pub pointer_policy: PointerPolicy,
    pub bracket_mode: BracketMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tape_size: DEFAULT_CAPACITY,
            step_delay_ms: 0,
            max_steps: None,
            timeout_ms: 2_000,
            pointer_policy: PointerPolicy::Strict,
            bracket_mode: BracketMode::Permissive,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    engine: Config,
}

impl Config {
    /// Defaults, then the user config file, then the environment.
    ///
    /// A missing or broken config file is skipped (and logged); a malformed
    /// environment variable is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::user_config_path() {
            Some(path) if path.exists() => match Self::load_from_file(&path) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("{e}");
                    Self::default()
                }
            },
            _ => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/bf.toml` (or the platform equivalent).
    pub fn user_config_path() -> Option<PathBuf> {
        let base_dirs = BaseDirs::new().ok()?;
        let mut path = PathBuf::from(base_dirs.config_home());
        path.push("bf.toml");
        Some(path)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.engine)
    }

    /// Override fields from variables resolved by `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "BF_TAPE_SIZE")? {
            self.tape_size = v;
        }
        if let Some(v) = parse_var(&lookup, "BF_STEP_DELAY_MS")? {
            self.step_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "BF_MAX_STEPS")? {
            self.max_steps = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "BF_TIMEOUT_MS")? {
            self.timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "BF_POINTER_POLICY")? {
            self.pointer_policy = v;
        }
        if let Some(v) = parse_var(&lookup, "BF_BRACKET_MODE")? {
            self.bracket_mode = v;
        }
        Ok(())
    }

    pub fn step_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.step_delay_ms)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    log::info!("Using {key} from environment: {raw}");
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value: raw })
}
