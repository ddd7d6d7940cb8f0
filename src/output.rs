//! Output document: a JSON array of links, newest first.

use crate::registry::NormalizedLink;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

const SAMPLE_SIZE: usize = 5;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to serialize links: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub url: String,
    /// RFC 3339 / ISO-8601.
    pub timestamp: String,
    pub sender: String,
}

impl From<&NormalizedLink> for LinkRecord {
    fn from(link: &NormalizedLink) -> Self {
        Self {
            url: link.canonical_url.clone(),
            timestamp: link.timestamp.to_rfc3339(),
            sender: link.sender.clone(),
        }
    }
}

pub fn to_records(snapshot: &[NormalizedLink]) -> Vec<LinkRecord> {
    snapshot.iter().map(LinkRecord::from).collect()
}

pub fn to_json(records: &[LinkRecord]) -> Result<String, OutputError> {
    Ok(serde_json::to_string_pretty(records)?)
}

pub fn write_json(path: &Path, records: &[LinkRecord]) -> Result<(), OutputError> {
    let content = to_json(records)?;
    let write_err = |source| OutputError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, content).map_err(write_err)
}

/// Totals printed after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub most_recent: Option<String>,
    pub oldest: Option<String>,
    pub samples: Vec<LinkRecord>,
}

impl Summary {
    pub fn from_records(records: &[LinkRecord]) -> Self {
        Self {
            total: records.len(),
            most_recent: records.first().map(|r| r.timestamp.clone()),
            oldest: records.last().map(|r| r.timestamp.clone()),
            samples: records.iter().take(SAMPLE_SIZE).cloned().collect(),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!("- Total unique URLs: {}", self.total)];
        if let (Some(newest), Some(oldest)) = (&self.most_recent, &self.oldest) {
            lines.push(format!("- Most recent: {}", newest));
            lines.push(format!("- Oldest: {}", oldest));
            lines.push("- Sample URLs:".to_string());
            for (i, record) in self.samples.iter().enumerate() {
                lines.push(format!("  {}. {} (from {})", i + 1, record.url, record.sender));
            }
        }
        lines
    }
}
