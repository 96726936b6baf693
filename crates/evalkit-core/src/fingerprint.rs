use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const GIT_TIMEOUT: Duration = Duration::from_secs(5);

/// `git rev-parse HEAD` of the working directory, if there is one.
pub async fn source_revision() -> Option<String> {
    let mut cmd = Command::new("git");
    cmd.args(["rev-parse", "HEAD"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(GIT_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::debug!(event = "fingerprint.git_unavailable", error = %e);
            return None;
        }
        Err(_) => {
            tracing::debug!(event = "fingerprint.git_timeout");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}
