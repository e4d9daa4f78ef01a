//! Runtime settings shared by the daemon and the CLI.
//!
//! Resolution order: built-in defaults, then the TOML file named by
//! `FACEGATE_CONFIG` (if set), then `FACEGATE_*` environment variables.
//! Settings are resolved once at startup and passed down explicitly.

use crate::gate::GateConfig;
use crate::matcher::MatchConfig;
use crate::service::ServiceConfig;
use crate::store::{RegistrationPolicy, StoreOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database holding the embeddings.
    pub db_path: PathBuf,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    pub busy_timeout_ms: u64,
    pub registration: RegistrationPolicy,
    pub gate: GateConfig,
    pub matching: MatchConfig,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: data_dir.join("faces.db"),
            model_dir: data_dir.join("models"),
            busy_timeout_ms: 5_000,
            registration: RegistrationPolicy::Append,
            gate: GateConfig::default(),
            matching: MatchConfig::default(),
        }
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn load() -> Result<Self, SettingsError> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve settings with an explicit variable lookup.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let mut settings = match lookup("FACEGATE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        settings.reset_out_of_range();
        settings.apply_env(&lookup);
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEGATE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        override_parsed(lookup, "FACEGATE_BUSY_TIMEOUT_MS", &mut self.busy_timeout_ms);
        override_parsed(lookup, "FACEGATE_REGISTRATION_POLICY", &mut self.registration);
        override_parsed(lookup, "FACEGATE_DISTANCE_METRIC", &mut self.matching.metric);
        override_checked(
            lookup,
            "FACEGATE_DISTANCE_THRESHOLD",
            &mut self.matching.threshold,
            valid_threshold,
        );
        override_checked(
            lookup,
            "FACEGATE_MIN_DETECTION_CONFIDENCE",
            &mut self.gate.min_confidence,
            valid_confidence_floor,
        );
        override_parsed(lookup, "FACEGATE_GATE_ON_REGISTER", &mut self.gate.enforce_on_register);
        override_parsed(lookup, "FACEGATE_GATE_ON_VERIFY", &mut self.gate.enforce_on_verify);
    }

    /// Put thresholds read from a config file back to their defaults when
    /// they cannot be meaningful.
    fn reset_out_of_range(&mut self) {
        if !valid_threshold(&self.matching.threshold) {
            tracing::warn!(
                value = self.matching.threshold,
                "ignoring invalid matching.threshold"
            );
            self.matching.threshold = MatchConfig::default().threshold;
        }
        if !valid_confidence_floor(&self.gate.min_confidence) {
            tracing::warn!(
                value = self.gate.min_confidence,
                "ignoring invalid gate.min_confidence"
            );
            self.gate.min_confidence = GateConfig::default().min_confidence;
        }
    }

    pub fn detector_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    pub fn recognizer_model_path(&self) -> String {
        self.model_dir.join("w600k_r50.onnx").to_string_lossy().into_owned()
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            registration: self.registration,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            gate: self.gate,
            matching: self.matching,
        }
    }
}

/// `$XDG_DATA_HOME/facegate`, falling back to `~/.local/share/facegate`.
fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

/// Distance thresholds must be finite and positive.
fn valid_threshold(v: &f32) -> bool {
    v.is_finite() && *v > 0.0
}

/// Detection confidences live in [0, 1].
fn valid_confidence_floor(v: &f32) -> bool {
    (0.0..=1.0).contains(v)
}

/// Replace `slot` when `key` is set and parses; an unparsable value is
/// logged and the previous value kept.
fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    override_checked(lookup, key, slot, |_| true);
}

/// Like [`override_parsed`], but a parsed value failing `valid` is also
/// logged and ignored.
fn override_checked<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
    valid: impl Fn(&T) -> bool,
) where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) if valid(&v) => *slot = v,
        Ok(_) => tracing::warn!(key, value = %raw, "ignoring out-of-range setting"),
        Err(e) => tracing::warn!(key, value = %raw, error = %e, "ignoring invalid setting"),
    }
}
