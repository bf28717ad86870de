// src/models/record.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of one catalog resource; the sole key across the engine.
pub type ModelId = u64;

/// A fetched catalog document.
///
/// The engine treats the payload as opaque. Only [`Record::summary`] looks
/// inside, and only for log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Value);

impl Record {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Extract the optional display fields.
    pub fn summary(&self) -> RecordSummary {
        let latest_version = self.0.pointer("/modelVersions/0");
        let text = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_owned);

        RecordSummary {
            name: text(self.0.get("name")),
            creator: text(self.0.pointer("/creator/username")),
            created_at: text(latest_version.and_then(|v| v.get("createdAt")))
                .or_else(|| text(self.0.get("createdAt"))),
            status: text(latest_version.and_then(|v| v.get("status")))
                .or_else(|| text(self.0.get("status"))),
        }
    }
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Display fields of a record. Never used for control decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSummary {
    pub name: Option<String>,
    pub creator: Option<String>,
    pub created_at: Option<String>,
    pub status: Option<String>,
}

impl fmt::Display for RecordSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name.as_deref().unwrap_or("<unnamed>"))?;
        if let Some(creator) = &self.creator {
            write!(f, " by {creator}")?;
        }
        if let Some(created_at) = &self.created_at {
            write!(f, " ({created_at})")?;
        }
        if let Some(status) = &self.status {
            write!(f, " [{status}]")?;
        }
        Ok(())
    }
}
