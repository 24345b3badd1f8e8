//! Runs the wrapped command and captures its output: spawn, pipe
//! stdout/stderr through separate reader tasks, wait for completion.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};

pub struct ChildOutcome {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` through `shell -c`, capturing combined stdout/stderr.
/// `echo` additionally streams each line to this process's own
/// stdout/stderr as it arrives (`CRABECHO`).
pub async fn run(shell: &str, command: &str, echo: bool) -> std::io::Result<ChildOutcome> {
    let mut cmd = Command::new(shell);
    cmd.arg("-c").arg(command);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let stdout_task = tokio::spawn(collect_stdout(stdout, echo));
    let stderr_task = tokio::spawn(collect_stderr(stderr, echo));

    let status = child.wait().await?;
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(ChildOutcome {
        status: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

async fn collect_stdout(stdout: ChildStdout, echo: bool) -> String {
    let mut lines = BufReader::new(stdout).lines();
    let mut buf = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if echo {
            println!("{line}");
        }
        buf.push_str(&line);
        buf.push('\n');
    }
    buf
}

async fn collect_stderr(stderr: ChildStderr, echo: bool) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut buf = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if echo {
            eprintln!("{line}");
        }
        buf.push_str(&line);
        buf.push('\n');
    }
    buf
}
