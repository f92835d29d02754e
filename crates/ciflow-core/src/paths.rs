use crate::error::{CiError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CIFLOW_DIR: &str = ".ciflow";
pub const CONFIG_FILE: &str = ".ciflow/config.yaml";
pub const RUNS_DIR: &str = ".ciflow/runs";
pub const WORK_DIR: &str = ".ciflow/work";

pub const DEFAULT_WORKFLOW: &str = ".github/workflows/ci.yml";
pub const DEFAULT_SETUP_ACTION_DIR: &str = ".github/workflows/setup";

pub const ACTION_FILES: [&str; 2] = ["action.yml", "action.yaml"];

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn ciflow_dir(root: &Path) -> PathBuf {
    root.join(CIFLOW_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn runs_dir(root: &Path) -> PathBuf {
    root.join(RUNS_DIR)
}

pub fn run_record_path(root: &Path, run_id: &str) -> PathBuf {
    runs_dir(root).join(format!("{run_id}.yaml"))
}

/// Absolute paths are used as-is, relative paths are taken from the project root.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Locate `action.yml` / `action.yaml` inside a composite action directory.
pub fn action_manifest(action_dir: &Path) -> Option<PathBuf> {
    ACTION_FILES
        .iter()
        .map(|name| action_dir.join(name))
        .find(|p| p.is_file())
}

// ---------------------------------------------------------------------------
// Job ids
// ---------------------------------------------------------------------------

static JOB_ID_RE: OnceLock<Regex> = OnceLock::new();
static SLUG_SEP_RE: OnceLock<Regex> = OnceLock::new();

fn job_id_re() -> &'static Regex {
    JOB_ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").unwrap())
}

fn slug_sep_re() -> &'static Regex {
    SLUG_SEP_RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").unwrap())
}

/// Job ids start with a letter or `_` and contain only alphanumerics, `-` and `_`.
pub fn validate_job_id(id: &str) -> Result<()> {
    if id.len() > 100 || !job_id_re().is_match(id) {
        return Err(CiError::InvalidWorkflow(format!(
            "invalid job id '{id}': must start with a letter or '_' and contain only alphanumerics, '-' or '_'"
        )));
    }
    Ok(())
}

/// Filesystem-safe form of a job instance name, e.g. `test (3.11, 4.2.*)` → `test-3-11-4-2`.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    slug_sep_re()
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_job_ids() {
        for id in ["test", "coverage", "_private", "build-docs", "lint_2"] {
            validate_job_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_job_ids() {
        for id in ["", "-starts-with-dash", "1abc", "has spaces", "dot.ted"] {
            assert!(validate_job_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn slugify_matrix_names() {
        assert_eq!(slugify("test (3.11, 4.2.*)"), "test-3-11-4-2");
        assert_eq!(slugify("Lint"), "lint");
        assert_eq!(slugify("--docs--"), "docs");
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.ciflow/config.yaml")
        );
        assert_eq!(
            run_record_path(root, "abc"),
            PathBuf::from("/tmp/proj/.ciflow/runs/abc.yaml")
        );
        assert_eq!(
            resolve(root, Path::new(DEFAULT_WORKFLOW)),
            PathBuf::from("/tmp/proj/.github/workflows/ci.yml")
        );
        assert_eq!(
            resolve(root, Path::new("/etc/ci.yml")),
            PathBuf::from("/etc/ci.yml")
        );
    }
}
