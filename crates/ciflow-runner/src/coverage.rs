//! lcov parsing and Coveralls job upload.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use ciflow_core::config::CoverageConfig;

use crate::{Result, RunnerError};

// ─── lcov ─────────────────────────────────────────────────────────────────

/// Highest `DA:` line number accepted; source files are never this long.
const MAX_LCOV_LINE: u32 = 1_000_000;

/// Line hits for one `SF:` record.
#[derive(Debug, Clone, PartialEq)]
pub struct LcovRecord {
    pub source: String,
    /// Line number (1-based) to hit count.
    pub lines: BTreeMap<u32, u64>,
}

/// Parse lcov tracefile text. Only `SF`, `DA` and `end_of_record` matter;
/// function and branch records are ignored.
pub fn parse_lcov(text: &str) -> Result<Vec<LcovRecord>> {
    let mut records = Vec::new();
    let mut current: Option<LcovRecord> = None;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if let Some(source) = line.strip_prefix("SF:") {
            if let Some(done) = current.take() {
                records.push(done);
            }
            current = Some(LcovRecord {
                source: source.to_string(),
                lines: BTreeMap::new(),
            });
        } else if let Some(data) = line.strip_prefix("DA:") {
            let record = current.as_mut().ok_or_else(|| {
                RunnerError::Coverage(format!("line {}: DA outside of an SF record", lineno + 1))
            })?;
            let mut fields = data.split(',');
            let (Some(num), Some(hits)) = (fields.next(), fields.next()) else {
                return Err(RunnerError::Coverage(format!(
                    "line {}: malformed DA record '{line}'",
                    lineno + 1
                )));
            };
            let num: u32 = num.trim().parse().map_err(|_| {
                RunnerError::Coverage(format!("line {}: bad line number '{num}'", lineno + 1))
            })?;
            if num > MAX_LCOV_LINE {
                return Err(RunnerError::Coverage(format!(
                    "line {}: line number {num} is out of range",
                    lineno + 1
                )));
            }
            // Negative or fractional counts are clamped to whole hits.
            let hits = hits
                .trim()
                .parse::<u64>()
                .or_else(|_| hits.trim().parse::<f64>().map(|f| f.max(0.0).ceil() as u64))
                .map_err(|_| {
                    RunnerError::Coverage(format!("line {}: bad hit count '{hits}'", lineno + 1))
                })?;
            let entry = record.lines.entry(num).or_insert(0);
            *entry = entry.saturating_add(hits);
        } else if line == "end_of_record" {
            if let Some(done) = current.take() {
                records.push(done);
            }
        }
    }
    if let Some(done) = current.take() {
        records.push(done);
    }
    Ok(records)
}

// ─── Coveralls payload ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SourceFile {
    pub name: String,
    /// One entry per source line; `None` marks lines that aren't relevant.
    pub coverage: Vec<Option<u64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GitHead {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GitInfo {
    pub head: GitHead,
    pub branch: String,
}

/// The `json_file` body of a Coveralls `POST /api/v1/jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct CoverallsJob {
    pub repo_token: String,
    pub service_name: String,
    pub service_job_id: String,
    pub run_at: String,
    pub git: GitInfo,
    pub source_files: Vec<SourceFile>,
}

/// Convert lcov records to Coveralls source files, with names relative to
/// `workspace`.
pub fn source_files(records: &[LcovRecord], workspace: &Path) -> Vec<SourceFile> {
    records
        .iter()
        .map(|record| {
            let source = Path::new(&record.source);
            let relative = source.strip_prefix(workspace).unwrap_or(source);
            let name = relative
                .to_string_lossy()
                .trim_start_matches("./")
                .to_string();

            let max_hit_line = record.lines.keys().next_back().copied().unwrap_or(0) as usize;
            let file_lines = std::fs::read_to_string(workspace.join(&name))
                .map(|text| text.lines().count())
                .unwrap_or(0);
            let mut coverage = vec![None; file_lines.max(max_hit_line)];
            for (&num, &hits) in &record.lines {
                if num > 0 {
                    coverage[num as usize - 1] = Some(hits);
                }
            }
            SourceFile { name, coverage }
        })
        .collect()
}

// ─── Upload ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CoverageUploader {
    client: reqwest::Client,
    endpoint: String,
    service_name: String,
}

impl CoverageUploader {
    pub fn new(config: &CoverageConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            service_name: config.service_name.clone(),
        })
    }

    /// Assemble the job payload for one job instance.
    pub fn job(
        &self,
        token: &str,
        job_id: &str,
        sha: &str,
        branch: &str,
        files: Vec<SourceFile>,
    ) -> CoverallsJob {
        CoverallsJob {
            repo_token: token.to_string(),
            service_name: self.service_name.clone(),
            service_job_id: job_id.to_string(),
            run_at: Utc::now().to_rfc3339(),
            git: GitInfo {
                head: GitHead { id: sha.to_string() },
                branch: branch.to_string(),
            },
            source_files: files,
        }
    }

    /// POST the payload as the multipart `json_file` field.
    pub async fn upload(&self, job: &CoverallsJob) -> Result<()> {
        let body = serde_json::to_string(job)
            .map_err(|e| RunnerError::Coverage(format!("failed to serialize payload: {e}")))?;
        let part = reqwest::multipart::Part::text(body)
            .file_name("coveralls.json")
            .mime_str("application/json")?;
        let form = reqwest::multipart::Form::new().part("json_file", part);

        let resp = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RunnerError::Coverage(format!(
                "{} responded {status}: {}",
                self.endpoint,
                text.trim()
            )));
        }
        tracing::info!(job = %job.service_job_id, files = job.source_files.len(), "coverage uploaded");
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LCOV: &str = "TN:\nSF:pynotify/models.py\nFN:3,send\nDA:1,1\nDA:2,0\nDA:4,3\nend_of_record\nSF:/ws/pynotify/__init__.py\nDA:1,1\nend_of_record\n";

    #[test]
    fn parses_records() {
        let records = parse_lcov(LCOV).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source, "pynotify/models.py");
        assert_eq!(records[0].lines.get(&4), Some(&3));
        assert_eq!(records[0].lines.get(&2), Some(&0));
    }

    #[test]
    fn da_without_sf_is_an_error() {
        assert!(matches!(
            parse_lcov("DA:1,1\n"),
            Err(RunnerError::Coverage(_))
        ));
    }

    #[test]
    fn malformed_da_is_an_error() {
        assert!(parse_lcov("SF:a.py\nDA:x,1\n").is_err());
        assert!(parse_lcov("SF:a.py\nDA:1\n").is_err());
    }

    #[test]
    fn huge_line_numbers_are_rejected() {
        let err = parse_lcov("SF:a.py\nDA:4294967295,1\nend_of_record\n").unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        assert!(parse_lcov("SF:a.py\nDA:1000000,1\n").is_ok());
    }

    #[test]
    fn repeated_hits_saturate() {
        let max = u64::MAX;
        let records = parse_lcov(&format!("SF:a.py\nDA:1,{max}\nDA:1,{max}\n")).unwrap();
        assert_eq!(records[0].lines[&1], u64::MAX);
    }

    #[test]
    fn source_files_pad_to_file_length_and_strip_workspace() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("pynotify")).unwrap();
        std::fs::write(
            dir.path().join("pynotify/models.py"),
            "import x\nimport y\n\ndef send():\n    pass\n",
        )
        .unwrap();

        let records = vec![LcovRecord {
            source: dir.path().join("pynotify/models.py").display().to_string(),
            lines: BTreeMap::from([(1, 1), (4, 2)]),
        }];
        let files = source_files(&records, dir.path());
        assert_eq!(files[0].name, "pynotify/models.py");
        assert_eq!(files[0].coverage, vec![Some(1), None, None, Some(2), None]);
    }

    #[test]
    fn missing_source_uses_highest_line() {
        let dir = TempDir::new().unwrap();
        let records = parse_lcov("SF:./gone.py\nDA:3,1\nend_of_record\n").unwrap();
        let files = source_files(&records, dir.path());
        assert_eq!(files[0].name, "gone.py");
        assert_eq!(files[0].coverage, vec![None, None, Some(1)]);
    }

    fn uploader(endpoint: String) -> CoverageUploader {
        CoverageUploader::new(&CoverageConfig {
            endpoint,
            service_name: "github".into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn upload_posts_multipart_json_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/jobs")
            .match_header(
                "content-type",
                mockito::Matcher::Regex("multipart/form-data".into()),
            )
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::Regex("name=\"json_file\"".into()),
                mockito::Matcher::Regex("\"repo_token\":\"tok\"".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"message":"Job #1.1","url":"https://coveralls.io/jobs/1"}"#)
            .create_async()
            .await;

        let up = uploader(format!("{}/api/v1/jobs", server.url()));
        let job = up.job("tok", "coverage", "abc", "master", Vec::new());
        up.upload(&job).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upload_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/jobs")
            .with_status(422)
            .with_body("Couldn't find a repository matching this job.")
            .create_async()
            .await;

        let up = uploader(format!("{}/api/v1/jobs", server.url()));
        let job = up.job("bad", "coverage", "abc", "master", Vec::new());
        let err = up.upload(&job).await.unwrap_err();
        assert!(err.to_string().contains("422"), "{err}");
    }
}
