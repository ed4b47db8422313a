use dirtree_core::random::DEFAULT_SEED;
use dirtree_core::{ParameterError, TreeParameters};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::Level;

const DEFAULT_CONCENTRATION: f64 = 1.0;
const RUN_ID_ALLOWED: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789._-";

/// Root audit configuration loaded from YAML.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AuditConfig {
    pub run_id: String,
    pub election: ElectionConfig,
    #[serde(default)]
    pub ballots: BallotsConfig,
    pub audit: SimulationConfig,
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AuditConfig {
    /// Load configuration from a YAML file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_buf = path.to_path_buf();
        let file = File::open(path).map_err(|source| ConfigError::Read {
            source,
            path: path_buf.clone(),
        })?;
        let reader = BufReader::new(file);
        let mut cfg: AuditConfig =
            serde_yaml::from_reader(reader).map_err(|source| ConfigError::Parse {
                source,
                path: path_buf.clone(),
            })?;
        cfg.validate().map_err(|source| ConfigError::Invalid {
            path: path_buf,
            source,
        })?;
        Ok(cfg)
    }

    /// Validate the configuration without performing I/O.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        validate_run_id(&self.run_id)?;
        self.election.validate()?;
        self.ballots.validate()?;
        self.audit.validate(self.election.candidates.len())?;
        self.outputs.validate(&self.run_id)?;
        self.logging.normalize();
        Ok(())
    }

    /// Resolve output templates (e.g., `{run_id}` placeholders) into concrete paths.
    pub fn resolved_outputs(&self) -> ResolvedOutputs {
        ResolvedOutputs {
            json: resolve_template(&self.run_id, &self.outputs.json),
            summary_md: resolve_template(&self.run_id, &self.outputs.summary_md),
            plots_dir: resolve_template(&self.run_id, &self.outputs.plots_dir),
        }
    }

    /// The ballot file, relative paths taken as given.
    pub fn resolved_ballots_path(&self) -> Option<PathBuf> {
        self.ballots
            .path
            .as_deref()
            .map(|template| resolve_template(&self.run_id, template))
    }
}

/// Candidates and Dirichlet-tree prior.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ElectionConfig {
    pub candidates: Vec<String>,
    #[serde(default)]
    pub min_depth: usize,
    /// Defaults to the number of candidates.
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default = "default_concentration")]
    pub concentration: f64,
    #[serde(default)]
    pub vanilla_equivalent: bool,
    #[serde(default = "default_seed")]
    pub seed: String,
}

impl ElectionConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.candidates.len() < 2 {
            return Err(ValidationError::InvalidField {
                field: "election.candidates".to_string(),
                message: "at least two candidates must be listed".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for name in &self.candidates {
            if name.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: "election.candidates".to_string(),
                    message: "candidate name must not be empty".to_string(),
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(ValidationError::InvalidField {
                    field: "election.candidates".to_string(),
                    message: format!("candidate '{name}' listed more than once"),
                });
            }
        }

        self.tree_parameters()
            .map_err(|err| ValidationError::InvalidField {
                field: match err {
                    ParameterError::InvalidConcentration { .. } => "election.concentration",
                    _ => "election.max_depth",
                }
                .to_string(),
                message: err.to_string(),
            })?;
        Ok(())
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth.unwrap_or(self.candidates.len())
    }

    pub fn tree_parameters(&self) -> Result<TreeParameters, ParameterError> {
        TreeParameters::new(
            self.candidates.len(),
            self.min_depth,
            self.max_depth(),
            self.concentration,
            self.vanilla_equivalent,
        )
    }
}

fn default_concentration() -> f64 {
    DEFAULT_CONCENTRATION
}

fn default_seed() -> String {
    DEFAULT_SEED.to_string()
}

/// Observed ballots: a JSONL file, inline entries, or both.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct BallotsConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub inline: Vec<NamedBallot>,
}

impl BallotsConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(path) = &self.path {
            if path.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: "ballots.path".to_string(),
                    message: "path must not be empty".to_string(),
                });
            }
        }
        if let Some(idx) = self.inline.iter().position(|b| b.count == 0) {
            return Err(ValidationError::InvalidField {
                field: format!("ballots.inline[{idx}].count"),
                message: "count must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// A ballot written with candidate names, as found inline or in a ballot file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NamedBallot {
    pub preferences: Vec<String>,
    #[serde(default = "default_count")]
    pub count: u64,
}

fn default_count() -> u64 {
    1
}

/// Posterior simulation settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SimulationConfig {
    pub elections: usize,
    pub ballots_total: u64,
    #[serde(default = "default_winners")]
    pub winners: usize,
    /// Defaults to the available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub seed: Option<String>,
    #[serde(default)]
    pub predictive_samples: u64,
    #[serde(default)]
    pub marginal_samples: usize,
}

impl SimulationConfig {
    fn validate(&self, n_candidates: usize) -> Result<(), ValidationError> {
        if self.elections == 0 {
            return Err(ValidationError::InvalidField {
                field: "audit.elections".to_string(),
                message: "number of elections must be greater than zero".to_string(),
            });
        }

        if self.winners == 0 || self.winners >= n_candidates {
            return Err(ValidationError::InvalidField {
                field: "audit.winners".to_string(),
                message: format!("winners must lie in [1, {n_candidates})"),
            });
        }

        if self.workers == Some(0) {
            return Err(ValidationError::InvalidField {
                field: "audit.workers".to_string(),
                message: "workers must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

fn default_winners() -> usize {
    1
}

/// Output artifact configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OutputsConfig {
    pub json: String,
    pub summary_md: String,
    pub plots_dir: String,
}

impl OutputsConfig {
    fn validate(&self, run_id: &str) -> Result<(), ValidationError> {
        for (label, value) in [
            ("outputs.json", &self.json),
            ("outputs.summary_md", &self.summary_md),
            ("outputs.plots_dir", &self.plots_dir),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: label.to_string(),
                    message: "path must not be empty".to_string(),
                });
            }

            let resolved = resolve_template(run_id, value);
            if resolved.components().count() == 0 {
                return Err(ValidationError::InvalidField {
                    field: label.to_string(),
                    message: "resolved path is invalid".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Logging configuration defaults to disabled structured logs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enable_structured: bool,
    #[serde(default = "default_tracing_level")]
    pub tracing_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_structured: false,
            tracing_level: default_tracing_level(),
        }
    }
}

impl LoggingConfig {
    fn normalize(&mut self) {
        if self.tracing_level.trim().is_empty() {
            self.tracing_level = default_tracing_level();
        }
    }

    pub fn level(&self) -> Option<Level> {
        match self.tracing_level.to_ascii_lowercase().as_str() {
            "trace" => Some(Level::TRACE),
            "debug" => Some(Level::DEBUG),
            "info" => Some(Level::INFO),
            "warn" | "warning" => Some(Level::WARN),
            "error" => Some(Level::ERROR),
            _ => None,
        }
    }
}

fn default_tracing_level() -> String {
    "info".to_string()
}

fn validate_run_id(run_id: &str) -> Result<(), ValidationError> {
    if run_id.trim().is_empty() {
        return Err(ValidationError::InvalidField {
            field: "run_id".to_string(),
            message: "run_id must not be empty".to_string(),
        });
    }

    if !run_id.chars().all(|c| RUN_ID_ALLOWED.contains(c)) {
        return Err(ValidationError::InvalidField {
            field: "run_id".to_string(),
            message: "run_id may only contain alphanumeric characters, '.', '_' or '-'".to_string(),
        });
    }

    Ok(())
}

fn resolve_template(run_id: &str, template: &str) -> PathBuf {
    PathBuf::from(template.replace("{run_id}", run_id))
}

/// Fully resolved output paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutputs {
    pub json: PathBuf,
    pub summary_md: PathBuf,
    pub plots_dir: PathBuf,
}

/// Errors surfaced when loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },
    #[error("invalid configuration in {path:?}: {source}")]
    Invalid {
        path: PathBuf,
        source: ValidationError,
    },
}

/// Validation failures captured with contextual metadata.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field}: {message}")]
    InvalidField { field: String, message: String },
}
