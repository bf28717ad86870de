// src/storage/layout.rs

//! Deterministic id → path mapping.
//!
//! ```text
//! {output_dir}/
//! ├── 00000000/
//! │   ├── 00000001.json
//! │   └── 00009999.json
//! └── 00010000/
//!     └── 00010000.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::models::ModelId;

/// Width of the zero-padded decimal used for bucket and file names.
pub const ID_WIDTH: usize = 8;

static RECORD_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{8,})\.json$").expect("static regex"));

/// Format an id the way every file and ledger line spells it.
pub fn format_id(id: ModelId) -> String {
    format!("{:0width$}", id, width = ID_WIDTH)
}

/// Parse a ledger token or file stem back into an id.
pub fn parse_id(token: &str) -> Option<ModelId> {
    let token = token.trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Id encoded in a record file name (`00000042.json`), if it is one.
pub fn id_from_file_name(name: &str) -> Option<ModelId> {
    RECORD_FILE
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_id(m.as_str()))
}

/// Bucketing scheme for record files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    block_size: u64,
}

impl Layout {
    /// A zero block size is clamped to one so the mapping stays total.
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Name of the bucket directory holding `id`.
    pub fn bucket_name(&self, id: ModelId) -> String {
        format_id((id / self.block_size) * self.block_size)
    }

    /// Path of the record file for `id`, relative to `root`.
    pub fn record_path(&self, root: &Path, id: ModelId) -> PathBuf {
        root.join(self.bucket_name(id))
            .join(format!("{}.json", format_id(id)))
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(10_000)
    }
}
