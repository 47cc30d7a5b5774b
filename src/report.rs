//! Batch report: one entry per candidate considered, plus tier breakdown and
//! statistics. Written as JSON by the CLI and read back by `review-matches`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::models::{ConfidenceTier, Decision, FieldPair, MatchCandidate, MatchingStats, RecordKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flow {
    Link,
    CrossRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub query_title: String,
    pub candidate_title: String,
    /// Partition the candidate came from (cross-reference only)
    pub candidate_kind: Option<RecordKind>,
    pub source_group: Option<String>,
    pub field_pair: FieldPair,
    pub score: f64,
    pub tier: ConfidenceTier,
    pub proposed_url: String,
    /// 1-based position among the query's candidates
    pub rank: usize,
    pub decision: Option<Decision>,
    pub issue: Option<String>,
}

impl ReportEntry {
    pub fn new(query_title: &str, candidate: &MatchCandidate, rank: usize) -> Self {
        Self {
            query_title: query_title.to_string(),
            candidate_title: candidate.candidate_title.clone(),
            candidate_kind: None,
            source_group: candidate.source_group.clone(),
            field_pair: candidate.field_pair,
            score: candidate.score,
            tier: candidate.tier,
            proposed_url: candidate.proposed_url.clone(),
            rank,
            decision: None,
            issue: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierBreakdown {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl TierBreakdown {
    pub fn count(&mut self, tier: ConfidenceTier) {
        match tier {
            ConfidenceTier::High => self.high += 1,
            ConfidenceTier::Medium => self.medium += 1,
            ConfidenceTier::Low => self.low += 1,
            ConfidenceTier::Rejected => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub flow: Flow,
    pub kind: RecordKind,
    pub dry_run: bool,
    pub entries: Vec<ReportEntry>,
    /// Queries that produced no candidate at all
    pub unmatched: Vec<String>,
    pub tiers: TierBreakdown,
    pub stats: MatchingStats,
}

impl BatchReport {
    pub fn new(flow: Flow, kind: RecordKind, dry_run: bool) -> Self {
        Self {
            flow,
            kind,
            dry_run,
            entries: Vec::new(),
            unmatched: Vec::new(),
            tiers: TierBreakdown::default(),
            stats: MatchingStats::default(),
        }
    }

    pub fn push(&mut self, entry: ReportEntry) {
        self.tiers.count(entry.tier);
        self.entries.push(entry);
    }

    pub fn in_tier(&self, tier: ConfidenceTier) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(move |e| e.tier == tier)
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TitleField;

    fn entry(tier: ConfidenceTier, score: f64) -> ReportEntry {
        ReportEntry {
            query_title: "q".to_string(),
            candidate_title: "c".to_string(),
            candidate_kind: Some(RecordKind::Films),
            source_group: Some("試映劇場".to_string()),
            field_pair: FieldPair::new(TitleField::Title, TitleField::Title),
            score,
            tier,
            proposed_url: "https://v/1".to_string(),
            rank: 1,
            decision: Some(Decision::Applied),
            issue: None,
        }
    }

    #[test]
    fn test_tier_breakdown() {
        let mut report = BatchReport::new(Flow::CrossRef, RecordKind::Films, true);
        report.push(entry(ConfidenceTier::High, 0.95));
        report.push(entry(ConfidenceTier::Low, 0.65));
        report.push(entry(ConfidenceTier::Low, 0.7));
        assert_eq!(report.tiers, TierBreakdown { high: 1, medium: 0, low: 2 });
        assert_eq!(report.in_tier(ConfidenceTier::Low).count(), 2);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let mut report = BatchReport::new(Flow::Link, RecordKind::VarietyShows, false);
        report.push(entry(ConfidenceTier::Medium, 0.85));
        report.unmatched.push("lonely".to_string());
        report.write_to_file(&path).unwrap();

        let loaded = BatchReport::load(&path).unwrap();
        assert_eq!(loaded.flow, Flow::Link);
        assert_eq!(loaded.entries, report.entries);
        assert_eq!(loaded.unmatched, vec!["lonely".to_string()]);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"tier\": \"MEDIUM\""));
        assert!(raw.contains("\"decision\": \"applied\""));
    }
}
