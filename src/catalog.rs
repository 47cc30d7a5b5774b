//! Catalog and video list files.
//!
//! A catalog partition is a JSON array of records. Loading and saving goes
//! through `CandidateRecord`, which keeps each record's full key map (serde_json
//! `preserve_order`), so a save changes nothing but the links that were set.
//! Record order is never changed.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use crate::error::Result;
use crate::models::{CandidateRecord, RecordKind, VideoItem};

// ============================================================================
// Catalog
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct Catalog {
    pub kind: RecordKind,
    pub records: Vec<CandidateRecord>,
}

/// Link coverage of one partition.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CoverageStats {
    pub kind: RecordKind,
    pub total: usize,
    pub linked: usize,
    pub unlinked: usize,
    pub coverage_percent: f64,
}

impl Catalog {
    pub fn new(kind: RecordKind, records: Vec<CandidateRecord>) -> Self {
        Self { kind, records }
    }

    pub fn load(path: &Path, kind: RecordKind) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text, kind)
    }

    pub fn from_json(text: &str, kind: RecordKind) -> Result<Self> {
        let records: Vec<CandidateRecord> = serde_json::from_str(text)?;
        Ok(Self::new(kind, records))
    }

    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(&self.records)?;
        json.push('\n');
        Ok(json)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn stats(&self) -> CoverageStats {
        let total = self.records.len();
        let linked = self.records.iter().filter(|r| r.is_linked()).count();
        let coverage_percent = if total == 0 {
            0.0
        } else {
            100.0 * linked as f64 / total as f64
        };
        CoverageStats {
            kind: self.kind,
            total,
            linked,
            unlinked: total - linked,
            coverage_percent,
        }
    }

    /// Linked records whose URL does not start with `prefix`.
    pub fn invalid_links(&self, prefix: &str) -> Vec<&CandidateRecord> {
        self.records
            .iter()
            .filter(|r| r.external_url().is_some_and(|u| !u.starts_with(prefix)))
            .collect()
    }

    pub fn unlinked(&self) -> Vec<&CandidateRecord> {
        self.records.iter().filter(|r| !r.is_linked()).collect()
    }

    pub fn linked(&self) -> Vec<&CandidateRecord> {
        self.records.iter().filter(|r| r.is_linked()).collect()
    }
}

// ============================================================================
// Video Lists
// ============================================================================

pub fn load_videos(path: &Path) -> Result<Vec<VideoItem>> {
    let text = std::fs::read_to_string(path)?;
    parse_videos(&text)
}

/// Accepts a flat array of videos or an object keyed by playlist name. In the
/// keyed form the key becomes the source group of videos that lack one.
pub fn parse_videos(text: &str) -> Result<Vec<VideoItem>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(groups) => {
            let mut videos = Vec::new();
            for (group, items) in groups {
                let items: Vec<VideoItem> = serde_json::from_value(items)?;
                videos.extend(items.into_iter().map(|mut video| {
                    if video.source_group.is_none() {
                        video.source_group = Some(group.clone());
                    }
                    video
                }));
            }
            Ok(videos)
        }
        other => Ok(serde_json::from_value(other)?),
    }
}

// ============================================================================
// TESTS
// ============================================================================
