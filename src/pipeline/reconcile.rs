// src/pipeline/reconcile.rs

//! Reconciliation between the ledger and the files on disk.
//!
//! `downloaded.txt` is a cached claim that a valid file exists. The scan here
//! is the ground truth: it parses every record file and is used to repair the
//! ledger in both directions before a run plans its work.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::models::ModelId;
use crate::storage::layout::{Layout, id_from_file_name};
use crate::storage::{Ledger, LogKind, read_and_validate};

/// Partition of the record files found on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Ids whose file parses as JSON
    pub valid: BTreeSet<ModelId>,
    /// Ids whose file exists but does not parse
    pub invalid: BTreeSet<ModelId>,
}

/// Walk the bucket directories and validate every record file.
///
/// Only files sitting at their own storage path count; stray `*.json` files
/// elsewhere (or in the wrong bucket) are ignored.
pub fn scan(root: &Path, layout: Layout) -> Result<ScanReport> {
    let mut report = ScanReport::default();

    let buckets = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    for bucket in buckets {
        let bucket = bucket?;
        if !bucket.file_type()?.is_dir() {
            continue;
        }
        let bucket_name = bucket.file_name();
        let bucket_name = bucket_name.to_string_lossy();

        let files = match fs::read_dir(bucket.path()) {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Skipping unreadable bucket {}: {}", bucket_name, e);
                continue;
            }
        };

        for file in files {
            let file = file?;
            let name = file.file_name();
            let Some(id) = id_from_file_name(&name.to_string_lossy()) else {
                continue;
            };
            if layout.bucket_name(id) != bucket_name {
                log::debug!("Ignoring misplaced record {}/{:?}", bucket_name, name);
                continue;
            }

            if read_and_validate(&file.path()) {
                report.valid.insert(id);
            } else {
                report.invalid.insert(id);
            }
        }
    }

    Ok(report)
}

/// What a pre-flight reconciliation found and repaired.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub scan: ScanReport,
    /// Valid files that were missing from `downloaded.txt` and got appended
    pub appended: BTreeSet<ModelId>,
    /// Ids logged as downloaded whose file is now invalid or missing
    pub stale: BTreeSet<ModelId>,
}

impl Reconciliation {
    /// Ids that are actually done: a valid file exists for each.
    pub fn downloaded(&self) -> &BTreeSet<ModelId> {
        &self.scan.valid
    }

    /// Ids that must be fetched again despite any ledger claim.
    pub fn needs_refetch(&self) -> BTreeSet<ModelId> {
        self.stale.union(&self.scan.invalid).copied().collect()
    }
}

/// Bring `downloaded.txt` in line with the files on disk.
///
/// Valid files absent from the log are appended to it. Logged ids without a
/// valid file cannot be removed from an append-only log; they are reported as
/// stale so the planner schedules them again.
pub fn reconcile(ledger: &Ledger, layout: Layout) -> Result<Reconciliation> {
    let logged = ledger.load(LogKind::Downloaded)?;
    let scan = scan(ledger.root(), layout)?;

    let appended: BTreeSet<ModelId> = scan.valid.difference(&logged).copied().collect();
    for id in &appended {
        ledger.record_downloaded(*id)?;
    }

    let stale: BTreeSet<ModelId> = logged.difference(&scan.valid).copied().collect();

    if !appended.is_empty() {
        log::info!(
            "Reconcile: {} valid files were missing from {}",
            appended.len(),
            LogKind::Downloaded.file_name()
        );
    }
    if !scan.invalid.is_empty() {
        log::warn!(
            "Reconcile: {} corrupt record files scheduled for re-download",
            scan.invalid.len()
        );
    }
    if !stale.is_empty() {
        log::warn!(
            "Reconcile: {} ids logged as downloaded have no valid file",
            stale.len()
        );
    }

    Ok(Reconciliation {
        scan,
        appended,
        stale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_scan_partitions_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        put(root, "00000000/00000001.json", r#"{"id": 1}"#);
        put(root, "00000000/00000002.json", r#"{"id": "#);
        put(root, "00010000/00010005.json", r#"{"id": 10005}"#);
        put(root, "00000000/00000003.tmp", r#"{"id": 3}"#);
        put(root, "00000000/notes.json", r#"{}"#);
        // wrong bucket for its id
        put(root, "00000000/00020000.json", r#"{}"#);
        put(root, "downloaded.txt", "00000001\n");

        let report = scan(root, Layout::default()).unwrap();
        assert_eq!(report.valid, BTreeSet::from([1, 10_005]));
        assert_eq!(report.invalid, BTreeSet::from([2]));
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let report = scan(&tmp.path().join("absent"), Layout::default()).unwrap();
        assert_eq!(report, ScanReport::default());
    }

    #[test]
    fn test_reconcile_repairs_both_directions() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let ledger = Ledger::open(root).unwrap();

        // logged and valid
        put(root, "00000000/00000001.json", "{}");
        ledger.record_downloaded(1).unwrap();
        // on disk, never logged
        put(root, "00000000/00000002.json", "{}");
        // logged, but truncated
        put(root, "00000000/00000003.json", "{\"a\":");
        ledger.record_downloaded(3).unwrap();
        // logged, file deleted
        ledger.record_downloaded(4).unwrap();

        let result = reconcile(&ledger, Layout::default()).unwrap();

        assert_eq!(result.appended, BTreeSet::from([2]));
        assert_eq!(result.stale, BTreeSet::from([3, 4]));
        assert_eq!(result.downloaded(), &BTreeSet::from([1, 2]));
        assert_eq!(result.needs_refetch(), BTreeSet::from([3, 4]));
        assert_eq!(
            ledger.load(LogKind::Downloaded).unwrap(),
            BTreeSet::from([1, 2, 3, 4])
        );

        // A second pass has nothing left to append.
        let again = reconcile(&ledger, Layout::default()).unwrap();
        assert!(again.appended.is_empty());
    }
}
