use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{info, warn};

use crate::error::{Result, StoreError};

const BACKUP_PREFIX: &str = "aily-";
const BACKUP_SUFFIX: &str = ".db.gz";

/// Write a consistent gzip snapshot of the live database into `backup_dir`.
///
/// `VACUUM INTO` gives a point-in-time copy without blocking the writer,
/// then the copy is compressed and removed.
pub fn snapshot(db_path: &str, backup_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(backup_dir)?;

    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let staging = backup_dir.join(format!("{BACKUP_PREFIX}{stamp}.db"));
    let target = backup_dir.join(format!("{BACKUP_PREFIX}{stamp}{BACKUP_SUFFIX}"));

    let conn = crate::db::open(db_path)?;
    conn.execute(
        "VACUUM INTO ?1",
        [staging.to_string_lossy().as_ref()],
    )
    .map_err(|e| StoreError::Backup(format!("vacuum into failed: {e}")))?;
    drop(conn);

    let result = compress(&staging, &target);
    let _ = fs::remove_file(&staging);
    result?;

    info!(path = %target.display(), "database snapshot written");
    Ok(target)
}

fn compress(src: &Path, dst: &Path) -> Result<()> {
    let input = fs::File::open(src)?;
    let output = fs::File::create(dst)?;
    let mut reader = BufReader::new(input);
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    std::io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

/// Delete snapshots older than `retain_days`. Returns how many were removed.
pub fn sweep(backup_dir: &Path, retain_days: u64) -> Result<usize> {
    let cutoff = SystemTime::now() - Duration::from_secs(retain_days * 24 * 3600);
    let mut removed = 0;

    let entries = match fs::read_dir(backup_dir) {
        Ok(e) => e,
        Err(_) => return Ok(0),
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(BACKUP_PREFIX) || !name.ends_with(BACKUP_SUFFIX) {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified());
        if let Ok(modified) = modified {
            if modified < cutoff {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "retention sweep delete failed"),
                }
            }
        }
    }
    Ok(removed)
}

/// Verify the backup directory is usable at startup; degraded but non-fatal.
pub fn check_dir(backup_dir: &Path) -> bool {
    fs::create_dir_all(backup_dir).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_produces_gz_and_sweep_keeps_it() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("live.db");
        let backups = dir.path().join("backups");

        let conn = crate::db::open(db_path.to_str().unwrap()).unwrap();
        crate::db::init_db(&conn).unwrap();
        drop(conn);

        let out = snapshot(db_path.to_str().unwrap(), &backups).unwrap();
        assert!(out.exists());
        assert!(out.to_string_lossy().ends_with(".db.gz"));

        // a fresh snapshot survives a 7-day retention sweep
        assert_eq!(sweep(&backups, 7).unwrap(), 0);
        assert!(out.exists());
    }
}
