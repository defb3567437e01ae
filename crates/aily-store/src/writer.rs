use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Result, StoreError};
use crate::messages::{AppendOutcome, NewMessage};

/// Bound on queued appends; senders back-pressure beyond this.
pub(crate) const WRITE_QUEUE_DEPTH: usize = 512;
/// Appends arriving within this window share one transaction, bounding the
/// fsync rate under bursts.
const COMMIT_WINDOW: Duration = Duration::from_millis(50);
/// Hard cap on one transaction so a sustained burst still commits regularly.
const MAX_BATCH: usize = 128;

pub(crate) struct AppendRequest {
    pub msg: NewMessage,
    pub reply: oneshot::Sender<Result<AppendOutcome>>,
}

/// Single-writer task for the messages table. Exactly one instance runs per
/// store; per-session ordering follows from the single funnel.
pub struct MessageWriter {
    conn: Connection,
    rx: mpsc::Receiver<AppendRequest>,
}

impl MessageWriter {
    pub(crate) fn new(conn: Connection, rx: mpsc::Receiver<AppendRequest>) -> Self {
        Self { conn, rx }
    }

    /// Drive the write loop until `shutdown` fires, then drain whatever is
    /// already queued so accepted appends reach the storage boundary.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("message writer started");
        loop {
            let first = tokio::select! {
                req = self.rx.recv() => match req {
                    Some(r) => r,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            };

            let mut batch = vec![first];
            let deadline = tokio::time::Instant::now() + COMMIT_WINDOW;
            while batch.len() < MAX_BATCH {
                tokio::select! {
                    req = self.rx.recv() => match req {
                        Some(r) => batch.push(r),
                        None => break,
                    },
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            }

            self.commit_batch(batch);
        }

        // shutdown drain: everything already queued is committed, late
        // senders observe Closed
        self.rx.close();
        let mut rest = Vec::new();
        while let Ok(req) = self.rx.try_recv() {
            rest.push(req);
        }
        if !rest.is_empty() {
            info!(count = rest.len(), "flushing queued appends on shutdown");
            self.commit_batch(rest);
        }
        info!("message writer stopped");
    }

    fn commit_batch(&mut self, batch: Vec<AppendRequest>) {
        let tx = match self.conn.transaction() {
            Ok(tx) => tx,
            Err(e) => {
                error!(error = %e, "begin transaction failed");
                let reason = e.to_string();
                for req in batch {
                    let _ = req.reply.send(Err(StoreError::Write(reason.clone())));
                }
                return;
            }
        };

        let mut outcomes = Vec::with_capacity(batch.len());
        for req in &batch {
            outcomes.push(insert_one(&tx, &req.msg));
        }

        match tx.commit() {
            Ok(()) => {
                for (req, outcome) in batch.into_iter().zip(outcomes) {
                    let _ = req.reply.send(outcome);
                }
            }
            Err(e) => {
                warn!(error = %e, "batch commit failed");
                let reason = e.to_string();
                for req in batch {
                    let _ = req.reply.send(Err(StoreError::Write(reason.clone())));
                }
            }
        }
    }
}

fn insert_one(tx: &rusqlite::Transaction<'_>, msg: &NewMessage) -> Result<AppendOutcome> {
    let dedup_key = msg.dedup_key();
    let changed = tx.execute(
        "INSERT INTO messages (session, role, source, content, ts, external_id, dedup_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(session, dedup_key) DO NOTHING",
        rusqlite::params![
            msg.session.as_str(),
            msg.role.to_string(),
            msg.source.to_string(),
            msg.content,
            msg.timestamp.to_rfc3339(),
            msg.external_id,
            dedup_key,
        ],
    )?;

    if changed == 0 {
        return Ok(AppendOutcome::Duplicate);
    }

    let id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO messages_fts(rowid, content) VALUES (?1, ?2)",
        rusqlite::params![id, msg.content],
    )?;
    Ok(AppendOutcome::Appended(id))
}
