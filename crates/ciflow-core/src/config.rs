use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RunnerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum number of jobs running at once; 0 means unbounded.
    #[serde(default)]
    pub max_parallel: usize,
    /// Shell used for `run` steps that don't name one.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Parent directory for per-job workspaces, relative to the project root.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub keep_workspaces: bool,
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(paths::WORK_DIR)
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 0,
            shell: default_shell(),
            work_dir: default_work_dir(),
            keep_workspaces: false,
        }
    }
}

// ---------------------------------------------------------------------------
// CoverageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://coveralls.io/api/v1/jobs".to_string()
}

fn default_service_name() -> String {
    "github".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            service_name: default_service_name(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_workflow")]
    pub workflow: PathBuf,
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Secret name → environment variable it is read from. Secrets not
    /// listed here are read from the variable of the same name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,
    #[serde(default)]
    pub coverage: CoverageConfig,
}

fn default_version() -> u32 {
    1
}

fn default_workflow() -> PathBuf {
    PathBuf::from(paths::DEFAULT_WORKFLOW)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            workflow: default_workflow(),
            runner: RunnerConfig::default(),
            secrets: BTreeMap::new(),
            coverage: CoverageConfig::default(),
        }
    }
}

impl Config {
    /// Load `.ciflow/config.yaml`, falling back to defaults when it is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn workflow_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.workflow)
    }

    pub fn work_dir(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.runner.work_dir)
    }

    /// Environment variable holding `secret`.
    pub fn secret_env<'a>(&'a self, secret: &'a str) -> &'a str {
        self.secrets
            .get(secret)
            .map(String::as_str)
            .unwrap_or(secret)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self, root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.version != 1 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("unsupported config version {}", self.version),
            });
        }

        if !self.workflow_path(root).exists() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "workflow file '{}' does not exist",
                    self.workflow.display()
                ),
            });
        }

        if self.runner.shell.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "runner.shell is empty".to_string(),
            });
        }

        if !self.coverage.endpoint.starts_with("http://")
            && !self.coverage.endpoint.starts_with("https://")
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "coverage.endpoint '{}' is not an http(s) URL",
                    self.coverage.endpoint
                ),
            });
        }

        if self.coverage.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "coverage.timeout_secs is 0; uploads will time out immediately"
                    .to_string(),
            });
        }

        for (secret, var) in &self.secrets {
            if var.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("secret '{secret}' maps to an empty variable name"),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.workflow, PathBuf::from(".github/workflows/ci.yml"));
        assert_eq!(parsed.runner.shell, "bash");
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.coverage.endpoint, "https://coveralls.io/api/v1/jobs");
        assert_eq!(cfg.runner.max_parallel, 0);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".ciflow")).unwrap();
        std::fs::write(
            dir.path().join(".ciflow/config.yaml"),
            "runner:\n  max_parallel: 2\nsecrets:\n  GITHUB_TOKEN: COVERALLS_REPO_TOKEN\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.runner.max_parallel, 2);
        assert_eq!(cfg.runner.shell, "bash");
        assert_eq!(cfg.secret_env("GITHUB_TOKEN"), "COVERALLS_REPO_TOKEN");
        assert_eq!(cfg.secret_env("OTHER"), "OTHER");
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.runner.keep_workspaces = true;
        cfg.save(dir.path()).unwrap();
        assert!(Config::load(dir.path()).unwrap().runner.keep_workspaces);
    }

    #[test]
    fn validate_flags_missing_workflow_and_bad_endpoint() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.coverage.endpoint = "coveralls.io".to_string();
        let warnings = cfg.validate(dir.path());
        assert_eq!(
            warnings
                .iter()
                .filter(|w| w.level == WarnLevel::Error)
                .count(),
            2
        );
    }
}
