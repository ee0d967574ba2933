//! Durable, append-only delivery ledger.
//!
//! One JSON record per line. The in-memory set answers `is_delivered` in
//! O(1); every `record_delivered` appends and syncs before returning, so a
//! crash between an outbound send and its commit is the only window in
//! which a duplicate delivery can occur.

use std::{
    collections::HashSet,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::PostId, errors::Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct DeliveryRecord {
    post_id: u64,
    delivered_at: String,
}

pub struct DeliveryLedger {
    path: PathBuf,
    seen: Mutex<HashSet<PostId>>,
}

impl DeliveryLedger {
    /// Open (or create) the ledger file and load all committed records.
    ///
    /// A malformed trailing line is tolerated: it is the footprint of a
    /// crash mid-append, and the record was by contract not yet committed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ledger_err("create data dir", e))?;
            }
        }

        let mut seen = HashSet::new();
        match fs::read_to_string(path) {
            Ok(contents) => {
                for line in contents.lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<DeliveryRecord>(line) {
                        Ok(rec) => {
                            seen.insert(PostId(rec.post_id));
                        }
                        Err(e) => {
                            tracing::warn!("skipping malformed ledger line: {e}");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ledger_err("read ledger", e)),
        }

        tracing::info!(records = seen.len(), path = %path.display(), "delivery ledger loaded");
        Ok(Self {
            path: path.to_path_buf(),
            seen: Mutex::new(seen),
        })
    }

    /// O(1) membership check against committed records.
    pub fn is_delivered(&self, id: PostId) -> bool {
        self.seen.lock().unwrap().contains(&id)
    }

    /// Commit the fact "post `id` was dispatched". Idempotent: recording an
    /// already-present id is a no-op, never an error. Returns only after
    /// the record is durably on disk.
    pub fn record_delivered(&self, id: PostId, at: DateTime<Utc>) -> Result<()> {
        if self.is_delivered(id) {
            return Ok(());
        }

        let rec = DeliveryRecord {
            post_id: id.0,
            delivered_at: at.to_rfc3339(),
        };
        let mut line = serde_json::to_string(&rec)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ledger_err("open ledger for append", e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| ledger_err("append delivery record", e))?;
        file.sync_data()
            .map_err(|e| ledger_err("sync delivery record", e))?;

        self.seen.lock().unwrap().insert(id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().unwrap().is_empty()
    }
}

fn ledger_err(context: &str, e: std::io::Error) -> Error {
    Error::Ledger(format!("{context}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.jsonl"))
    }

    #[test]
    fn recording_is_idempotent() {
        let path = tmp_file("ftb-ledger-idem");
        let ledger = DeliveryLedger::open(&path).unwrap();

        ledger.record_delivered(PostId(1), Utc::now()).unwrap();
        ledger.record_delivered(PostId(1), Utc::now()).unwrap();

        assert!(ledger.is_delivered(PostId(1)));
        assert_eq!(ledger.len(), 1);

        // Exactly one line on disk.
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn records_survive_reopen() {
        let path = tmp_file("ftb-ledger-reopen");
        {
            let ledger = DeliveryLedger::open(&path).unwrap();
            ledger.record_delivered(PostId(7), Utc::now()).unwrap();
            ledger.record_delivered(PostId(8), Utc::now()).unwrap();
        }

        let reopened = DeliveryLedger::open(&path).unwrap();
        assert!(reopened.is_delivered(PostId(7)));
        assert!(reopened.is_delivered(PostId(8)));
        assert!(!reopened.is_delivered(PostId(9)));
    }

    #[test]
    fn tolerates_truncated_trailing_line() {
        let path = tmp_file("ftb-ledger-torn");
        {
            let ledger = DeliveryLedger::open(&path).unwrap();
            ledger.record_delivered(PostId(1), Utc::now()).unwrap();
        }
        // Simulate a crash mid-append.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"post_id\":2,\"deliv").unwrap();
        drop(f);

        let reopened = DeliveryLedger::open(&path).unwrap();
        assert!(reopened.is_delivered(PostId(1)));
        assert!(!reopened.is_delivered(PostId(2)));
    }

    #[test]
    fn missing_file_starts_empty() {
        let ledger = DeliveryLedger::open(&tmp_file("ftb-ledger-fresh")).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.is_delivered(PostId(1)));
    }
}
