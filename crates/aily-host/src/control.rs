//! SSH plumbing: one multiplexed control connection per host, commands run
//! through it with a hard deadline.

use std::time::Duration;

use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::error::{HostError, Result};

/// Default deadline for a single remote command.
pub const OP_TIMEOUT: Duration = Duration::from_secs(8);
/// Exit code the ssh client reserves for its own (connection) failures.
const SSH_FAILURE_CODE: i32 = 255;

/// Output of a completed remote command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// ssh argv prefix for a host: batch mode, shared control socket with
/// ControlPersist so the first command lazily opens the channel and later
/// commands multiplex over it.
pub fn ssh_argv(host: &str, socket_dir: &str) -> Vec<String> {
    vec![
        "ssh".into(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        "ControlMaster=auto".into(),
        "-o".into(),
        format!("ControlPath={socket_dir}/cm-%C"),
        "-o".into(),
        "ControlPersist=60".into(),
        "-o".into(),
        "ConnectTimeout=5".into(),
        host.into(),
    ]
}

/// Quote one word for the remote shell (ssh joins arguments with spaces and
/// hands the result to a shell on the far side).
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'=' | b'/' | b'.' | b':' | b','))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Join remote argv into a single safely-quoted command string.
pub fn remote_command(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a remote command over the host's control channel with a deadline.
///
/// The child is driven on a spawned task so the timeout future can race it;
/// on expiry the child is killed by PID (the handle has been consumed by
/// `wait_with_output`).
pub async fn run(
    host: &str,
    socket_dir: &str,
    remote_parts: &[String],
    timeout: Duration,
) -> Result<CmdOutput> {
    let mut argv = ssh_argv(host, socket_dir);
    argv.push(remote_command(remote_parts));
    debug!(host, cmd = %argv.last().unwrap_or(&String::new()), "ssh exec");

    let child = AsyncCommand::new(&argv[0])
        .args(&argv[1..])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| HostError::Spawn(format!("ssh spawn failed: {e}")))?;

    let pid = child.id();
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(child.wait_with_output().await);
    });

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(Ok(output))) => {
            let code = output.status.code().unwrap_or(-1);
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if code == SSH_FAILURE_CODE {
                return Err(HostError::Unreachable {
                    host: host.to_string(),
                    reason: stderr.lines().last().unwrap_or("ssh failed").to_string(),
                });
            }
            Ok(CmdOutput {
                code,
                stdout,
                stderr,
            })
        }
        Ok(Ok(Err(e))) => Err(HostError::Spawn(format!("ssh wait failed: {e}"))),
        Ok(Err(_)) => Err(HostError::Spawn("ssh wait task died".to_string())),
        Err(_elapsed) => {
            if let Some(raw_pid) = pid {
                #[cfg(unix)]
                // Safety: raw_pid is our direct child, still running.
                unsafe {
                    libc::kill(raw_pid as libc::pid_t, libc::SIGKILL);
                }
            }
            Err(HostError::Timeout {
                ms: timeout.as_millis() as u64,
            })
        }
    }
}

/// Strip ANSI escapes from captured pane output.
pub fn scrub(raw: &str) -> String {
    let clean = strip_ansi_escapes::strip(raw.as_bytes());
    String::from_utf8_lossy(&clean).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_pass_through() {
        assert_eq!(shell_quote("tmux"), "tmux");
        assert_eq!(shell_quote("-F"), "-F");
        assert_eq!(shell_quote("a/b.c:d"), "a/b.c:d");
    }

    #[test]
    fn spaces_and_quotes_are_wrapped() {
        assert_eq!(shell_quote("hello world"), "'hello world'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("#{session_name}"), "'#{session_name}'");
    }

    #[test]
    fn remote_command_joins_quoted() {
        let parts: Vec<String> = ["tmux", "send-keys", "-l", "--", "echo hi"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            remote_command(&parts),
            "tmux send-keys -l -- 'echo hi'"
        );
    }

    #[test]
    fn ssh_argv_pins_control_socket() {
        let argv = ssh_argv("dev", "/tmp/aily");
        assert_eq!(argv[0], "ssh");
        assert!(argv.contains(&"ControlMaster=auto".to_string()));
        assert!(argv.iter().any(|a| a.starts_with("ControlPath=/tmp/aily/")));
        assert_eq!(argv.last().unwrap(), "dev");
    }

    #[test]
    fn scrub_removes_escapes() {
        assert_eq!(scrub("\x1b[31mred\x1b[0m plain"), "red plain");
    }
}
