//! Isolated subprocess execution for model-requested code.
//!
//! Every outcome is reported as an [`ExecutionResult`]: timeouts, non-zero
//! exits and even a missing interpreter surface as `exit_code`/`stderr` so the
//! model and the graders can see them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Per-stream capture limit.
pub const MAX_OUTPUT_BYTES: usize = 100 * 1024;

/// Environment variable names containing any of these (case-insensitive) never
/// reach the child.
pub const SECRET_MARKERS: [&str; 5] = ["API_KEY", "SECRET", "TOKEN", "PASSWORD", "CREDENTIAL"];

const FALLBACK_PATH: &str = "/usr/bin:/bin";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: f64,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub interpreter: String,
    /// Arguments placed between the interpreter and the code.
    pub interpreter_args: Vec<String>,
    /// Environment the child inherits from, before scrubbing. Passed in
    /// explicitly; the executor never reads the process environment itself.
    pub base_env: Vec<(String, String)>,
    pub max_output_bytes: usize,
}

impl SandboxConfig {
    pub fn python(base_env: Vec<(String, String)>) -> Self {
        Self {
            interpreter: "python3".into(),
            interpreter_args: vec!["-c".into()],
            base_env,
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    pub fn shell(base_env: Vec<(String, String)>) -> Self {
        Self {
            interpreter: "sh".into(),
            interpreter_args: vec!["-c".into()],
            base_env,
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }
}

pub fn is_secret_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    SECRET_MARKERS.iter().any(|m| upper.contains(m))
}

/// Drop secret-looking variables and make sure `PATH` is set.
pub fn scrub_env<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = vars
        .into_iter()
        .filter(|(k, _)| !is_secret_name(k))
        .collect();
    env.entry("PATH".to_string())
        .or_insert_with(|| FALLBACK_PATH.to_string());
    env
}

pub struct SandboxExecutor {
    config: SandboxConfig,
    env: BTreeMap<String, String>,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        let env = scrub_env(config.base_env.iter().cloned());
        Self { config, env }
    }

    /// The environment children actually receive.
    pub fn child_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub async fn execute(&self, code: &str, timeout: Duration) -> ExecutionResult {
        let start = Instant::now();

        let scratch = match tempfile::Builder::new()
            .prefix("evalkit-sandbox-")
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => return failure(start, format!("failed to create scratch dir: {}", e)),
        };

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.args(&self.config.interpreter_args)
            .arg(code)
            .current_dir(scratch.path())
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so background children can be killed with it.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    event = "sandbox.spawn_failed",
                    interpreter = %self.config.interpreter,
                    error = %e
                );
                return failure(
                    start,
                    format!("failed to start {}: {}", self.config.interpreter, e),
                );
            }
        };
        let group = child.id();

        let cap = self.config.max_output_bytes;
        let mut stdout_task = tokio::spawn(read_capped(child.stdout.take(), cap));
        let mut stderr_task = tokio::spawn(read_capped(child.stderr.take(), cap));

        // The limit covers draining the pipes too: a background process that
        // inherited them keeps them open after the interpreter exits.
        let finished = tokio::time::timeout(timeout, async {
            let status = child.wait().await;
            let stdout = (&mut stdout_task).await.unwrap_or_default();
            let stderr = (&mut stderr_task).await.unwrap_or_default();
            (status, stdout, stderr)
        })
        .await;
        kill_group(group);

        match finished {
            Ok((Ok(status), (stdout, out_cut), (stderr, err_cut))) => {
                let result = ExecutionResult {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    duration_ms: round_ms(start),
                    truncated: out_cut || err_cut,
                };
                tracing::debug!(
                    event = "sandbox.finished",
                    exit_code = result.exit_code,
                    duration_ms = result.duration_ms,
                    truncated = result.truncated
                );
                result
            }
            Ok((Err(e), _, _)) => failure(start, format!("failed waiting for child: {}", e)),
            Err(_) => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                tracing::info!(
                    event = "sandbox.timeout",
                    timeout_ms = timeout.as_millis() as u64
                );
                ExecutionResult {
                    stdout: String::new(),
                    stderr: format!("Execution timed out after {}s", timeout.as_secs_f64()),
                    exit_code: -1,
                    duration_ms: round_ms(start),
                    truncated: false,
                }
            }
        }
    }
}

/// SIGKILL everything left in the child's process group.
#[cfg(unix)]
fn kill_group(group: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = group else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(event = "sandbox.kill_group_failed", pgid = pid, error = %e),
    }
}

#[cfg(not(unix))]
fn kill_group(_group: Option<u32>) {}

fn failure(start: Instant, message: String) -> ExecutionResult {
    ExecutionResult {
        stdout: String::new(),
        stderr: message,
        exit_code: -1,
        duration_ms: round_ms(start),
        truncated: false,
    }
}

fn round_ms(start: Instant) -> f64 {
    let ms = start.elapsed().as_secs_f64() * 1000.0;
    (ms * 10.0).round() / 10.0
}

/// Read the whole stream, keeping at most `cap` bytes. The remainder is drained
/// so the child never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> (String, bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(mut reader) = reader else {
        return (String::new(), false);
    };

    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(_) => break,
        }
    }
    let mut text = String::from_utf8_lossy(&kept).into_owned();
    // A multibyte sequence split at the cap decodes to U+FFFD, which is wider.
    if text.len() > cap {
        let mut end = cap;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    (text, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn scrub_removes_secret_names_case_insensitively() {
        let env = scrub_env(vars(&[
            ("OPENAI_API_KEY", "sk-1"),
            ("github_token", "ghp"),
            ("DB_Password", "pw"),
            ("AWS_SECRET_ACCESS_KEY", "x"),
            ("GCP_CREDENTIALS", "x"),
            ("HOME", "/home/eval"),
            ("PATH", "/opt/bin"),
        ]));

        assert_eq!(env.len(), 2);
        assert_eq!(env.get("HOME").map(String::as_str), Some("/home/eval"));
        assert_eq!(env.get("PATH").map(String::as_str), Some("/opt/bin"));
    }

    #[test]
    fn scrub_supplies_path_when_missing() {
        let env = scrub_env(vars(&[("LANG", "C")]));
        assert_eq!(env.get("PATH").map(String::as_str), Some(FALLBACK_PATH));
    }

    #[cfg(unix)]
    fn shell() -> SandboxExecutor {
        SandboxExecutor::new(SandboxConfig::shell(vars(&[
            ("PATH", "/usr/local/bin:/usr/bin:/bin"),
            ("EVAL_VISIBLE", "yes"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ])))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_streams_and_exit_code() {
        let res = shell()
            .execute("echo out; echo err 1>&2; exit 3", Duration::from_secs(10))
            .await;
        assert_eq!(res.stdout, "out\n");
        assert_eq!(res.stderr, "err\n");
        assert_eq!(res.exit_code, 3);
        assert!(!res.truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_sees_scrubbed_env_only() {
        let res = shell().execute("env", Duration::from_secs(10)).await;
        assert!(res.stdout.contains("EVAL_VISIBLE=yes"));
        assert!(res.stdout.contains("PATH="));
        assert!(!res.stdout.contains("ANTHROPIC_API_KEY"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_scratch_directory() {
        let res = shell().execute("pwd", Duration::from_secs(10)).await;
        assert!(res.stdout.contains("evalkit-sandbox-"), "{}", res.stdout);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn large_output_is_truncated() {
        let res = shell()
            .execute(
                "i=0; while [ $i -lt 3000 ]; do echo 'aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa'; i=$((i+1)); done",
                Duration::from_secs(30),
            )
            .await;
        assert_eq!(res.exit_code, 0);
        assert_eq!(res.stdout.len(), MAX_OUTPUT_BYTES);
        assert!(res.truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_is_a_result_not_an_error() {
        let res = shell()
            .execute("sleep 5", Duration::from_millis(200))
            .await;
        assert_eq!(res.exit_code, -1);
        assert!(res.stdout.is_empty());
        assert!(res.stderr.contains("timed out"), "{}", res.stderr);
        assert!(res.duration_ms < 5000.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_process_holding_pipes_cannot_outlive_timeout() {
        let res = shell()
            .execute("sleep 4 & echo started", Duration::from_millis(500))
            .await;
        assert_eq!(res.exit_code, -1);
        assert!(res.stderr.contains("timed out"), "{}", res.stderr);
        assert!(res.duration_ms < 3000.0, "{}", res.duration_ms);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn detached_background_process_does_not_delay_result() {
        let res = shell()
            .execute("sleep 30 >/dev/null 2>&1 & echo done", Duration::from_secs(10))
            .await;
        assert_eq!(res.exit_code, 0);
        assert_eq!(res.stdout, "done\n");
        assert!(res.duration_ms < 5000.0, "{}", res.duration_ms);
    }

    #[tokio::test]
    async fn split_multibyte_char_stays_within_cap() {
        // "é" is two bytes; a cap of 5 splits the third one.
        let (text, truncated) = read_capped(Some("ééé".as_bytes()), 5).await;
        assert!(truncated);
        assert!(text.len() <= 5, "{:?}", text);
        assert!(text.starts_with("éé"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_reported_as_data() {
        let exec = SandboxExecutor::new(
            SandboxConfig::python(vec![]).with_interpreter("evalkit-no-such-interpreter"),
        );
        let res = exec.execute("print(1)", Duration::from_secs(1)).await;
        assert_eq!(res.exit_code, -1);
        assert!(res.stderr.contains("failed to start"));
    }
}
