use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::{Result, RunnerError};

/// Lines of stderr kept for failure reports.
const STDERR_TAIL_LINES: usize = 20;

// ─── Shell ────────────────────────────────────────────────────────────────

/// A shell program plus the arguments that precede the script text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Shell {
    pub program: PathBuf,
    pub args: Vec<&'static str>,
}

impl Shell {
    /// Resolve a `shell:` value to a program on `PATH`.
    ///
    /// `bash` runs with `-eo pipefail` and falls back to `sh -e` when bash is
    /// not installed. Any other name is invoked as `<name> -c <script>`.
    pub(crate) fn resolve(name: &str) -> Result<Self> {
        match name {
            "bash" => match which::which("bash") {
                Ok(program) => Ok(Self {
                    program,
                    args: vec!["--noprofile", "--norc", "-eo", "pipefail", "-c"],
                }),
                Err(_) => {
                    tracing::warn!("bash not found on PATH, falling back to sh");
                    Self::resolve("sh")
                }
            },
            "sh" => which::which("sh")
                .map(|program| Self {
                    program,
                    args: vec!["-e", "-c"],
                })
                .map_err(|_| RunnerError::ShellNotFound(name.to_string())),
            other => which::which(other)
                .map(|program| Self {
                    program,
                    args: vec!["-c"],
                })
                .map_err(|_| RunnerError::ShellNotFound(other.to_string())),
        }
    }
}

// ─── Output ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stderr_tail: String,
}

impl ProcessOutput {
    pub(crate) fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// `exited with code N` plus the stderr tail, for failure messages.
    pub(crate) fn describe(&self) -> String {
        let status = match self.exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_string(),
        };
        if self.stderr_tail.is_empty() {
            status
        } else {
            format!("{status}\n{}", self.stderr_tail)
        }
    }
}

// ─── Spawning ─────────────────────────────────────────────────────────────

/// Run `script` through `shell` in `cwd`.
///
/// stdout and stderr are forwarded line by line to the log under `label`.
pub(crate) async fn run_script(
    shell: &Shell,
    script: &str,
    cwd: &Path,
    env: &[(String, String)],
    label: &str,
) -> Result<ProcessOutput> {
    let mut cmd = Command::new(&shell.program);
    cmd.args(&shell.args).arg(script).current_dir(cwd);
    for (k, v) in env {
        cmd.env(k, v);
    }
    drive(cmd, label).await
}

/// Run a program directly, without a shell.
pub(crate) async fn run_program<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    cwd: &Path,
    label: &str,
) -> Result<ProcessOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(cwd);
    drive(cmd, label).await
}

type Tail = Arc<Mutex<VecDeque<String>>>;

async fn drive(mut cmd: Command, label: &str) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(RunnerError::Io)?;

    // Both pipes are drained to EOF so the child never blocks or sees SIGPIPE.
    let tail: Tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(forward(out, label.to_string(), "stdout", None)));
    let stderr_task = child.stderr.take().map(|err| {
        tokio::spawn(forward(
            err,
            label.to_string(),
            "stderr",
            Some(Arc::clone(&tail)),
        ))
    });

    let status = child.wait().await.map_err(RunnerError::Io)?;
    for task in [stdout_task, stderr_task].into_iter().flatten() {
        let _ = task.await;
    }

    let stderr_tail = tail
        .lock()
        .map(|t| t.iter().cloned().collect::<Vec<_>>().join("\n"))
        .unwrap_or_default();

    Ok(ProcessOutput {
        exit_code: status.code(),
        stderr_tail,
    })
}

/// Log every line of `stream` under `label`. Output is not required to be
/// UTF-8; invalid bytes are replaced.
async fn forward<R>(stream: R, label: String, name: &'static str, tail: Option<Tail>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                tracing::info!(job = %label, stream = name, "{line}");
                if let Some(tail) = &tail {
                    if let Ok(mut t) = tail.lock() {
                        if t.len() == STDERR_TAIL_LINES {
                            t.pop_front();
                        }
                        t.push_back(line.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::warn!(job = %label, stream = name, "failed reading output: {e}");
                break;
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn successful_script_reports_zero() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::resolve("sh").unwrap();
        let out = run_script(&shell, "echo hello", dir.path(), &[], "t")
            .await
            .unwrap();
        assert!(out.success());
        assert!(out.stderr_tail.is_empty());
    }

    #[tokio::test]
    async fn failing_script_keeps_exit_code_and_stderr() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::resolve("sh").unwrap();
        let out = run_script(&shell, "echo oops >&2; exit 3", dir.path(), &[], "t")
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stderr_tail, "oops");
        assert_eq!(out.describe(), "exited with code 3\noops");
    }

    #[tokio::test]
    async fn errexit_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::resolve("sh").unwrap();
        let out = run_script(
            &shell,
            "false\ntouch reached",
            dir.path(),
            &[],
            "t",
        )
        .await
        .unwrap();
        assert!(!out.success());
        assert!(!dir.path().join("reached").exists());
    }

    #[tokio::test]
    async fn env_and_cwd_are_applied() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::resolve("sh").unwrap();
        let env = vec![("CIFLOW_TEST_VALUE".to_string(), "42".to_string())];
        let out = run_script(
            &shell,
            "echo \"$CIFLOW_TEST_VALUE\" > out.txt",
            dir.path(),
            &env,
            "t",
        )
        .await
        .unwrap();
        assert!(out.success());
        let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(written.trim(), "42");
    }

    #[tokio::test]
    async fn stderr_tail_is_bounded() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::resolve("sh").unwrap();
        let out = run_script(
            &shell,
            "i=0; while [ $i -lt 50 ]; do echo line$i >&2; i=$((i+1)); done; exit 1",
            dir.path(),
            &[],
            "t",
        )
        .await
        .unwrap();
        let lines: Vec<_> = out.stderr_tail.lines().collect();
        assert_eq!(lines.len(), STDERR_TAIL_LINES);
        assert_eq!(lines.last(), Some(&"line49"));
    }

    #[tokio::test]
    async fn non_utf8_stdout_does_not_fail_the_step() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::resolve("sh").unwrap();
        let out = run_script(&shell, "printf 'caf\\351\\n'; exit 0", dir.path(), &[], "t")
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn non_utf8_stderr_keeps_draining() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::resolve("sh").unwrap();
        let out = run_script(
            &shell,
            "printf 'caf\\351\\n' >&2; i=0; while [ $i -lt 2000 ]; do echo after$i >&2; i=$((i+1)); done; exit 0",
            dir.path(),
            &[],
            "t",
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stderr_tail.lines().last(), Some("after1999"));
    }

    #[tokio::test]
    async fn invalid_bytes_are_replaced_in_the_tail() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::resolve("sh").unwrap();
        let out = run_script(&shell, "printf 'caf\\351\\n' >&2; exit 1", dir.path(), &[], "t")
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(1));
        assert_eq!(out.stderr_tail, "caf\u{FFFD}");
    }

    #[test]
    fn unknown_shell_is_an_error() {
        assert!(matches!(
            Shell::resolve("definitely-not-a-shell-xyz"),
            Err(RunnerError::ShellNotFound(_))
        ));
    }
}
