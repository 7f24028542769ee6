//! Cross-process run guard. An advisory lock file next to the record store
//! is held from trigger until the run report is written, so two `srrm`
//! processes sharing a store cannot both start runs.

use crate::dashboard_state::ActiveRun;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// `Ok(None)` when another handle holds the lock.
    pub fn try_acquire(path: &Path, active: &ActiveRun) -> Result<Option<Self>, std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }

        let mut lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.record(active)?;
        Ok(Some(lock))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the holder metadata, e.g. once the run id is known.
    pub fn record(&mut self, active: &ActiveRun) -> Result<(), std::io::Error> {
        let metadata = format!(
            "owner_pid={}\ntriggered_at={}\nrun_id={}\n",
            std::process::id(),
            active.triggered_at.to_rfc3339(),
            active.run_id.as_deref().unwrap_or("na"),
        );
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(metadata.as_bytes())?;
        self.file.flush()
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Best-effort read of the run recorded by the current lock holder.
pub fn read_holder(path: &Path) -> Option<ActiveRun> {
    let mut text = String::new();
    File::open(path).ok()?.read_to_string(&mut text).ok()?;

    let mut triggered_at = None;
    let mut run_id = None;
    for line in text.lines() {
        match line.split_once('=') {
            Some(("triggered_at", value)) => {
                triggered_at = DateTime::parse_from_rfc3339(value.trim())
                    .ok()
                    .map(|ts| ts.with_timezone(&Utc));
            }
            Some(("run_id", value)) if value.trim() != "na" && !value.trim().is_empty() => {
                run_id = Some(value.trim().to_string());
            }
            _ => {}
        }
    }
    Some(ActiveRun {
        triggered_at: triggered_at?,
        run_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn active(run_id: Option<&str>) -> ActiveRun {
        ActiveRun {
            triggered_at: Utc
                .with_ymd_and_hms(2026, 4, 1, 7, 0, 0)
                .single()
                .expect("valid timestamp"),
            run_id: run_id.map(str::to_string),
        }
    }

    #[test]
    fn second_handle_is_refused_until_first_drops() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("locks").join("srrm.run.lock");

        let mut first = RunLock::try_acquire(&path, &active(None))
            .expect("acquire")
            .expect("lock free");
        first.record(&active(Some("manual__7"))).expect("record run id");
        assert_eq!(first.path(), path.as_path());

        assert!(RunLock::try_acquire(&path, &active(None))
            .expect("acquire")
            .is_none());
        assert_eq!(read_holder(&path), Some(active(Some("manual__7"))));

        drop(first);
        assert!(RunLock::try_acquire(&path, &active(None))
            .expect("acquire")
            .is_some());
    }

    #[test]
    fn unreadable_metadata_has_no_holder() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("srrm.run.lock");
        std::fs::write(&path, "garbage").expect("write");
        assert_eq!(read_holder(&path), None);
        assert_eq!(read_holder(&dir.path().join("absent.lock")), None);
    }
}
