use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use aily_core::types::{HostId, SessionName};

use crate::control::{self, CmdOutput, OP_TIMEOUT};
use crate::error::{HostError, Result};
use crate::keys::ControlKey;

/// Commands queued per host; the funnel bounds memory under bursts.
const QUEUE_DEPTH: usize = 8;
/// No-op health check cadence on an idle channel.
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);
/// Delay between the literal payload and the submit keystroke. Combining
/// them in one batch is read as a soft newline by some agent front-ends.
const SUBMIT_DELAY: Duration = Duration::from_millis(300);
/// Reconnect backoff bounds.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Ok,
    NameTaken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Ok,
    NotFound,
}

enum HostOp {
    Exec {
        parts: Vec<String>,
        timeout: Duration,
        reply: oneshot::Sender<Result<CmdOutput>>,
    },
    /// Literal payload, then (optionally) a submit keystroke as a second
    /// invocation after [`SUBMIT_DELAY`].
    Inject {
        target: String,
        payload: String,
        submit: bool,
        reply: oneshot::Sender<Result<CmdOutput>>,
    },
}

impl HostOp {
    fn evict(self, host: &str) {
        let err = HostError::Unreachable {
            host: host.to_string(),
            reason: "evicted while host unreachable".into(),
        };
        match self {
            HostOp::Exec { reply, .. } | HostOp::Inject { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

struct HostChannel {
    tx: mpsc::Sender<HostOp>,
    reachable: Arc<AtomicBool>,
}

/// Fleet-wide executor. Owns every SSH control channel; nothing else in the
/// process touches the wire.
pub struct HostExecutor {
    channels: HashMap<HostId, HostChannel>,
}

impl HostExecutor {
    /// Build channels and spawn one worker per configured host. Channels are
    /// lazy: no connection is opened until the first command.
    pub fn new(hosts: &[HostId], socket_dir: &str) -> Self {
        let _ = std::fs::create_dir_all(socket_dir);

        let mut channels = HashMap::new();
        for host in hosts {
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            let reachable = Arc::new(AtomicBool::new(true));
            tokio::spawn(worker(
                host.as_str().to_string(),
                socket_dir.to_string(),
                rx,
                Arc::clone(&reachable),
            ));
            channels.insert(host.clone(), HostChannel { tx, reachable });
        }
        info!(hosts = channels.len(), "host executor ready");
        Self { channels }
    }

    pub fn hosts(&self) -> Vec<HostId> {
        let mut hosts: Vec<HostId> = self.channels.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Whether the host's channel currently believes it is reachable.
    pub fn is_reachable(&self, host: &HostId) -> Option<bool> {
        self.channels
            .get(host)
            .map(|c| c.reachable.load(Ordering::Acquire))
    }

    /// Live multiplexer sessions on the host. An empty host yields an empty
    /// set; only transport failures are `unreachable`.
    pub async fn list_sessions(&self, host: &HostId) -> Result<BTreeSet<SessionName>> {
        let out = self
            .exec(
                host,
                vec![
                    "tmux".into(),
                    "list-sessions".into(),
                    "-F".into(),
                    "#{session_name}".into(),
                ],
            )
            .await?;
        classify_list(&out)
    }

    pub async fn has_session(&self, host: &HostId, name: &SessionName) -> Result<bool> {
        let out = self
            .exec(
                host,
                vec![
                    "tmux".into(),
                    "has-session".into(),
                    "-t".into(),
                    exact_target(name),
                ],
            )
            .await?;
        classify_has(&out)
    }

    pub async fn create_session(&self, host: &HostId, name: &SessionName) -> Result<CreateOutcome> {
        let out = self
            .exec(
                host,
                vec![
                    "tmux".into(),
                    "new-session".into(),
                    "-d".into(),
                    "-s".into(),
                    name.to_string(),
                ],
            )
            .await?;
        classify_create(&out)
    }

    pub async fn kill_session(&self, host: &HostId, name: &SessionName) -> Result<KillOutcome> {
        let out = self
            .exec(
                host,
                vec![
                    "tmux".into(),
                    "kill-session".into(),
                    "-t".into(),
                    exact_target(name),
                ],
            )
            .await?;
        classify_kill(&out)
    }

    /// Deliver a text payload as if typed. With `submit`, a submit keystroke
    /// follows as a second invocation after a small delay.
    pub async fn inject(
        &self,
        host: &HostId,
        name: &SessionName,
        payload: &str,
        submit: bool,
    ) -> Result<()> {
        let channel = self.channel(host)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        channel
            .tx
            .send(HostOp::Inject {
                target: exact_target(name),
                payload: payload.to_string(),
                submit,
                reply: reply_tx,
            })
            .await
            .map_err(|_| HostError::Closed)?;
        let out = reply_rx.await.map_err(|_| HostError::Closed)??;
        classify_target(&out, host, name).map(|_| ())
    }

    /// Send a single control keystroke, bypassing the two-step rule.
    pub async fn control_key(
        &self,
        host: &HostId,
        name: &SessionName,
        key: ControlKey,
    ) -> Result<()> {
        let out = self
            .exec(
                host,
                vec![
                    "tmux".into(),
                    "send-keys".into(),
                    "-t".into(),
                    exact_target(name),
                    key.key_name().into(),
                ],
            )
            .await?;
        classify_target(&out, host, name).map(|_| ())
    }

    /// Last `lines` lines of the pane's scrollback, ANSI-scrubbed.
    /// `lines == 0` returns an empty string without touching the wire.
    pub async fn capture(&self, host: &HostId, name: &SessionName, lines: u32) -> Result<String> {
        if lines == 0 {
            return Ok(String::new());
        }
        let out = self
            .exec(
                host,
                vec![
                    "tmux".into(),
                    "capture-pane".into(),
                    "-p".into(),
                    "-t".into(),
                    exact_target(name),
                    "-S".into(),
                    format!("-{lines}"),
                ],
            )
            .await?;
        let out = classify_target(&out, host, name)?;
        Ok(control::scrub(&out.stdout))
    }

    /// Run an arbitrary remote command (transcript scraper support).
    pub async fn raw(&self, host: &HostId, parts: Vec<String>) -> Result<CmdOutput> {
        self.exec(host, parts).await
    }

    // --- private helpers ---------------------------------------------------

    fn channel(&self, host: &HostId) -> Result<&HostChannel> {
        self.channels
            .get(host)
            .ok_or_else(|| HostError::UnknownHost(host.to_string()))
    }

    async fn exec(&self, host: &HostId, parts: Vec<String>) -> Result<CmdOutput> {
        let channel = self.channel(host)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        channel
            .tx
            .send(HostOp::Exec {
                parts,
                timeout: OP_TIMEOUT,
                reply: reply_tx,
            })
            .await
            .map_err(|_| HostError::Closed)?;
        reply_rx.await.map_err(|_| HostError::Closed)?
    }
}

/// `=name` pins tmux target matching to the exact session name.
fn exact_target(name: &SessionName) -> String {
    format!("={name}")
}

// --- worker ----------------------------------------------------------------

async fn worker(
    host: String,
    socket_dir: String,
    mut rx: mpsc::Receiver<HostOp>,
    reachable: Arc<AtomicBool>,
) {
    let mut health = tokio::time::interval(HEALTH_INTERVAL);
    health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // the first tick fires immediately; skip it so a fresh channel stays lazy
    health.tick().await;

    loop {
        tokio::select! {
            op = rx.recv() => match op {
                Some(op) => {
                    if handle_op(&host, &socket_dir, op).await {
                        recover(&host, &socket_dir, &mut rx, &reachable).await;
                    }
                }
                None => break,
            },
            _ = health.tick() => {
                if ping(&host, &socket_dir).await.is_err() {
                    warn!(host, "health check failed");
                    recover(&host, &socket_dir, &mut rx, &reachable).await;
                }
            }
        }
    }
    info!(host, "host channel released");
}

/// Run one op. Returns `true` when the host went unreachable.
async fn handle_op(host: &str, socket_dir: &str, op: HostOp) -> bool {
    match op {
        HostOp::Exec {
            parts,
            timeout,
            reply,
        } => {
            let result = control::run(host, socket_dir, &parts, timeout).await;
            let down = matches!(result, Err(HostError::Unreachable { .. }));
            let _ = reply.send(result);
            down
        }
        HostOp::Inject {
            target,
            payload,
            submit,
            reply,
        } => {
            let literal = vec![
                "tmux".to_string(),
                "send-keys".to_string(),
                "-t".to_string(),
                target.clone(),
                "-l".to_string(),
                "--".to_string(),
                payload,
            ];
            let first = control::run(host, socket_dir, &literal, OP_TIMEOUT).await;
            let result = match first {
                Ok(out) if out.code == 0 && submit => {
                    tokio::time::sleep(SUBMIT_DELAY).await;
                    let enter = vec![
                        "tmux".to_string(),
                        "send-keys".to_string(),
                        "-t".to_string(),
                        target,
                        ControlKey::Submit.key_name().to_string(),
                    ];
                    control::run(host, socket_dir, &enter, OP_TIMEOUT).await
                }
                other => other,
            };
            let down = matches!(result, Err(HostError::Unreachable { .. }));
            let _ = reply.send(result);
            down
        }
    }
}

async fn ping(host: &str, socket_dir: &str) -> Result<()> {
    control::run(host, socket_dir, &["true".to_string()], OP_TIMEOUT).await?;
    Ok(())
}

/// Evict queued ops and retry with exponential backoff until the host
/// answers a no-op again.
async fn recover(
    host: &str,
    socket_dir: &str,
    rx: &mut mpsc::Receiver<HostOp>,
    reachable: &Arc<AtomicBool>,
) {
    reachable.store(false, Ordering::Release);
    let mut delay = BACKOFF_BASE;
    loop {
        while let Ok(op) = rx.try_recv() {
            op.evict(host);
        }
        warn!(host, retry_in_secs = delay.as_secs(), "host unreachable, backing off");
        tokio::time::sleep(delay).await;
        while let Ok(op) = rx.try_recv() {
            op.evict(host);
        }
        if ping(host, socket_dir).await.is_ok() {
            break;
        }
        delay = (delay * 2).min(BACKOFF_CAP);
    }
    reachable.store(true, Ordering::Release);
    info!(host, "host reachable again");
}

// --- output classification -------------------------------------------------

fn classify_list(out: &CmdOutput) -> Result<BTreeSet<SessionName>> {
    if out.code == 0 {
        return Ok(out
            .stdout
            .lines()
            .filter_map(|l| SessionName::parse(l.trim()).ok())
            .collect());
    }
    let stderr = out.stderr.to_ascii_lowercase();
    if stderr.contains("no server running") || stderr.contains("no sessions") {
        return Ok(BTreeSet::new());
    }
    Err(HostError::Protocol(format!(
        "list-sessions exited {}: {}",
        out.code,
        out.stderr.trim()
    )))
}

fn classify_has(out: &CmdOutput) -> Result<bool> {
    match out.code {
        0 => Ok(true),
        1 => Ok(false),
        _ => Err(HostError::Protocol(format!(
            "has-session exited {}: {}",
            out.code,
            out.stderr.trim()
        ))),
    }
}

fn classify_create(out: &CmdOutput) -> Result<CreateOutcome> {
    if out.code == 0 {
        return Ok(CreateOutcome::Ok);
    }
    if out.stderr.to_ascii_lowercase().contains("duplicate session") {
        return Ok(CreateOutcome::NameTaken);
    }
    Err(HostError::Protocol(format!(
        "new-session exited {}: {}",
        out.code,
        out.stderr.trim()
    )))
}

fn classify_kill(out: &CmdOutput) -> Result<KillOutcome> {
    if out.code == 0 {
        return Ok(KillOutcome::Ok);
    }
    let stderr = out.stderr.to_ascii_lowercase();
    if stderr.contains("can't find session")
        || stderr.contains("session not found")
        || stderr.contains("no server running")
    {
        return Ok(KillOutcome::NotFound);
    }
    Err(HostError::Protocol(format!(
        "kill-session exited {}: {}",
        out.code,
        out.stderr.trim()
    )))
}

fn classify_target<'a>(out: &'a CmdOutput, host: &HostId, name: &SessionName) -> Result<&'a CmdOutput> {
    if out.code == 0 {
        return Ok(out);
    }
    let stderr = out.stderr.to_ascii_lowercase();
    if stderr.contains("can't find") || stderr.contains("not found") || stderr.contains("no server running") {
        return Err(HostError::SessionNotFound {
            host: host.to_string(),
            session: name.to_string(),
        });
    }
    Err(HostError::Protocol(format!(
        "send-keys/capture exited {}: {}",
        out.code,
        out.stderr.trim()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(code: i32, stdout: &str, stderr: &str) -> CmdOutput {
        CmdOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn list_parses_names_and_skips_garbage() {
        let sessions =
            classify_list(&out(0, "alpha\nbeta-2\nbad name\n", "")).unwrap();
        let names: Vec<String> = sessions.iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["alpha", "beta-2"]);
    }

    #[test]
    fn empty_host_is_empty_set_not_error() {
        let sessions = classify_list(&out(
            1,
            "",
            "no server running on /tmp/tmux-1000/default",
        ))
        .unwrap();
        assert!(sessions.is_empty());
    }

    #[test]
    fn unexpected_list_failure_is_protocol_error() {
        assert!(matches!(
            classify_list(&out(127, "", "tmux: command not found")),
            Err(HostError::Protocol(_))
        ));
    }

    #[test]
    fn create_detects_name_taken() {
        assert_eq!(classify_create(&out(0, "", "")).unwrap(), CreateOutcome::Ok);
        assert_eq!(
            classify_create(&out(1, "", "duplicate session: s")).unwrap(),
            CreateOutcome::NameTaken
        );
    }

    #[test]
    fn kill_of_missing_session_is_not_found() {
        assert_eq!(
            classify_kill(&out(1, "", "can't find session: s")).unwrap(),
            KillOutcome::NotFound
        );
        assert_eq!(classify_kill(&out(0, "", "")).unwrap(), KillOutcome::Ok);
    }

    #[test]
    fn has_session_maps_exit_codes() {
        assert!(classify_has(&out(0, "", "")).unwrap());
        assert!(!classify_has(&out(1, "", "")).unwrap());
        assert!(classify_has(&out(255, "", "boom")).is_err());
    }

    #[test]
    fn target_errors_classify_not_found() {
        let host = HostId::from("h");
        let name = SessionName::parse("s").unwrap();
        assert!(matches!(
            classify_target(&out(1, "", "can't find pane: s"), &host, &name),
            Err(HostError::SessionNotFound { .. })
        ));
        assert!(classify_target(&out(0, "ok", ""), &host, &name).is_ok());
    }
}
