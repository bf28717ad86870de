// src/storage/ledger.rs

//! Append-only run ledgers.
//!
//! ```text
//! {output_dir}/
//! ├── downloaded.txt   # one id per line
//! ├── notfound.txt     # one id per line
//! ├── errors.txt       # "<id> # <reason>" per line
//! ├── discovered.txt   # ids found by frontier crawls
//! └── last_max.txt     # watermark, a single integer
//! ```
//!
//! Writers only ever append whole lines under a per-log lock. Readers rebuild
//! sets from the physical lines, so duplicates are harmless and malformed
//! lines are skipped.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::layout::{Layout, format_id, parse_id};
use crate::error::{AppError, Result};
use crate::models::ModelId;
use crate::pipeline::reconcile;

const WATERMARK_FILE: &str = "last_max.txt";

/// The logs kept in the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Downloaded,
    NotFound,
    Errors,
    Discovered,
}

impl LogKind {
    pub fn file_name(self) -> &'static str {
        match self {
            LogKind::Downloaded => "downloaded.txt",
            LogKind::NotFound => "notfound.txt",
            LogKind::Errors => "errors.txt",
            LogKind::Discovered => "discovered.txt",
        }
    }
}

/// One line of `errors.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub id: ModelId,
    pub reason: String,
}

impl ErrorEntry {
    /// Parse `<id> # <reason>`; `None` for malformed lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (head, reason) = match line.split_once('#') {
            Some((head, reason)) => (head, reason.trim()),
            None => (line, ""),
        };
        let id = parse_id(head.split_whitespace().next()?)?;
        Some(Self {
            id,
            reason: reason.to_string(),
        })
    }

    /// 404-class failures are permanent and never replayed.
    pub fn is_not_found(&self) -> bool {
        self.reason.starts_with("404")
    }
}

#[derive(Debug)]
struct LogFile {
    kind: LogKind,
    path: PathBuf,
    lock: Mutex<()>,
}

impl LogFile {
    fn new(root: &Path, kind: LogKind) -> Self {
        Self {
            kind,
            path: root.join(kind.file_name()),
            lock: Mutex::new(()),
        }
    }

    fn append(&self, line: &str) -> Result<()> {
        let mut entry = line.replace(['\n', '\r'], " ");
        entry.push('\n');

        let _guard = self
            .lock
            .lock()
            .map_err(|_| AppError::LedgerPoisoned(self.kind.file_name()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // One write per line keeps appends whole even across processes sharing the file.
        file.write_all(entry.as_bytes())?;
        Ok(())
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes)
                .lines()
                .map(str::to_owned)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    fn replace(&self, contents: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| AppError::LedgerPoisoned(self.kind.file_name()))?;
        write_atomic(&self.path, contents.as_bytes())
    }
}

/// Durable bookkeeping for one output directory.
#[derive(Debug)]
pub struct Ledger {
    root: PathBuf,
    downloaded: LogFile,
    not_found: LogFile,
    errors: LogFile,
    discovered: LogFile,
}

impl Ledger {
    /// Open the ledgers under `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| AppError::storage(&root, format!("cannot create output directory: {e}")))?;

        Ok(Self {
            downloaded: LogFile::new(&root, LogKind::Downloaded),
            not_found: LogFile::new(&root, LogKind::NotFound),
            errors: LogFile::new(&root, LogKind::Errors),
            discovered: LogFile::new(&root, LogKind::Discovered),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, kind: LogKind) -> &Path {
        &self.log(kind).path
    }

    fn log(&self, kind: LogKind) -> &LogFile {
        match kind {
            LogKind::Downloaded => &self.downloaded,
            LogKind::NotFound => &self.not_found,
            LogKind::Errors => &self.errors,
            LogKind::Discovered => &self.discovered,
        }
    }

    /// Append one line to a log.
    pub fn append(&self, kind: LogKind, line: &str) -> Result<()> {
        self.log(kind).append(line)
    }

    pub fn record_downloaded(&self, id: ModelId) -> Result<()> {
        self.append(LogKind::Downloaded, &format_id(id))
    }

    pub fn record_not_found(&self, id: ModelId) -> Result<()> {
        self.append(LogKind::NotFound, &format_id(id))
    }

    pub fn record_error(&self, id: ModelId, reason: &str) -> Result<()> {
        self.append(LogKind::Errors, &format!("{} # {}", format_id(id), reason))
    }

    pub fn record_discovered(&self, id: ModelId) -> Result<()> {
        self.append(LogKind::Discovered, &format_id(id))
    }

    /// Deduplicated set of ids in a log.
    pub fn load(&self, kind: LogKind) -> Result<BTreeSet<ModelId>> {
        let lines = self.log(kind).read_lines()?;
        Ok(lines
            .iter()
            .filter_map(|line| {
                line.split(|c: char| c.is_whitespace() || c == '#')
                    .find(|token| !token.is_empty())
                    .and_then(parse_id)
            })
            .collect())
    }

    /// All well-formed `errors.txt` entries, in file order.
    pub fn load_errors(&self) -> Result<Vec<ErrorEntry>> {
        let lines = self.errors.read_lines()?;
        Ok(lines
            .iter()
            .map(String::as_str)
            .filter_map(ErrorEntry::parse)
            .collect())
    }

    /// True when `downloaded.txt` is missing or holds no ids.
    pub fn needs_rebuild(&self) -> Result<bool> {
        Ok(self.load(LogKind::Downloaded)?.is_empty())
    }

    /// Replace `downloaded.txt` with the ids of every valid file on disk.
    pub fn rebuild(&self, layout: Layout) -> Result<usize> {
        let scan = reconcile::scan(&self.root, layout)?;
        let mut contents = String::new();
        for id in &scan.valid {
            contents.push_str(&format_id(*id));
            contents.push('\n');
        }
        self.downloaded.replace(&contents)?;

        log::info!(
            "Rebuilt {} from disk: {} valid files ({} invalid ignored)",
            LogKind::Downloaded.file_name(),
            scan.valid.len(),
            scan.invalid.len()
        );
        Ok(scan.valid.len())
    }

    /// Rebuild `downloaded.txt` only when it has been lost.
    pub fn rebuild_if_needed(&self, layout: Layout) -> Result<Option<usize>> {
        if self.needs_rebuild()? {
            self.rebuild(layout).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Highest id recorded by a completed delta or crawl run.
    pub fn read_watermark(&self) -> Result<Option<ModelId>> {
        let path = self.root.join(WATERMARK_FILE);
        match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => parse_id(&text)
                .map(Some)
                .ok_or_else(|| AppError::storage(&path, "malformed watermark")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    pub fn write_watermark(&self, id: ModelId) -> Result<()> {
        write_atomic(&self.root.join(WATERMARK_FILE), id.to_string().as_bytes())
    }
}

/// Write to a temporary sibling, then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}
