//! Core data models for title matching.
//!
//! Catalog records and video items are the two kinds of input; match
//! candidates, tiers and decisions are computed values that flow from the
//! matcher through the merge policy into the batch report.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// Confidence Tiers
// ============================================================================

/// Lowest score classified as HIGH
pub const HIGH_TIER_FLOOR: f64 = 0.9;

/// Lowest score classified as MEDIUM
pub const MEDIUM_TIER_FLOOR: f64 = 0.8;

/// Lowest score classified as LOW. Anything below is REJECTED and never returned.
pub const LOW_TIER_FLOOR: f64 = 0.6;

/// Confidence tier derived from a score on the canonical 0-1 scale.
/// A view over the score; never stored on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
    Rejected,
}

impl ConfidenceTier {
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_TIER_FLOOR {
            ConfidenceTier::High
        } else if score >= MEDIUM_TIER_FLOOR {
            ConfidenceTier::Medium
        } else if score >= LOW_TIER_FLOOR {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::Rejected
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceTier::High => "HIGH",
            ConfidenceTier::Medium => "MEDIUM",
            ConfidenceTier::Low => "LOW",
            ConfidenceTier::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Catalog Models
// ============================================================================

/// Catalog partition a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Films,
    Ads,
    VarietyShows,
    Songs,
    AuditionFilms,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Films,
        RecordKind::Ads,
        RecordKind::VarietyShows,
        RecordKind::Songs,
        RecordKind::AuditionFilms,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Films => "films",
            RecordKind::Ads => "ads",
            RecordKind::VarietyShows => "variety-shows",
            RecordKind::Songs => "songs",
            RecordKind::AuditionFilms => "audition-films",
        }
    }

    /// Song records carry `song`/`movie` titles worth comparing against.
    pub fn has_aux_titles(self) -> bool {
        matches!(self, RecordKind::Songs)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown record kind '{}'", s))
    }
}

/// Stable record id. Catalog files use both numeric and string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        match id {
            RecordId::Int(n) => Value::from(n),
            RecordId::Text(s) => Value::String(s),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

/// Catalog entry (film, ad, variety show, song).
///
/// The typed fields are what the matcher reads. `fields` is the record as it
/// was read, in file order; on save the typed values are written back into it
/// in place, so unknown keys, explicit nulls and key order survive. `video_url`
/// is the external link; an empty string counts as unlinked.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct CandidateRecord {
    pub id: Option<RecordId>,
    pub title: String,
    pub full_title: Option<String>,
    pub video_url: Option<String>,
    pub song: Option<String>,
    pub movie: Option<String>,
    pub fields: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KnownFields {
    #[serde(default)]
    id: Option<RecordId>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    full_title: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    song: Option<String>,
    #[serde(default)]
    movie: Option<String>,
}

impl TryFrom<Map<String, Value>> for CandidateRecord {
    type Error = serde_json::Error;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let known: KnownFields = serde_json::from_value(Value::Object(fields.clone()))?;
        Ok(Self {
            id: known.id,
            title: known.title.unwrap_or_default(),
            full_title: known.full_title,
            video_url: known.video_url,
            song: known.song,
            movie: known.movie,
            fields,
        })
    }
}

impl From<CandidateRecord> for Map<String, Value> {
    fn from(record: CandidateRecord) -> Self {
        let CandidateRecord {
            id,
            title,
            full_title,
            video_url,
            song,
            movie,
            mut fields,
        } = record;

        let title = (!title.is_empty()).then_some(title);
        write_back(&mut fields, "id", id.map(Value::from));
        write_back(&mut fields, "title", title.map(Value::String));
        write_back(&mut fields, "fullTitle", full_title.map(Value::String));
        write_back(&mut fields, "videoUrl", video_url.map(Value::String));
        write_back(&mut fields, "song", song.map(Value::String));
        write_back(&mut fields, "movie", movie.map(Value::String));
        fields
    }
}

/// Store a typed value under `key`. Existing keys keep their position; an
/// unset value leaves a missing, null or empty entry as it was.
fn write_back(fields: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    let keep = match (fields.get(key), &value) {
        (Some(old), Some(new)) => old == new,
        (Some(old), None) => old.is_null() || old.as_str() == Some(""),
        (None, Some(_)) => false,
        (None, None) => true,
    };
    if !keep {
        fields.insert(key.to_string(), value.unwrap_or(Value::Null));
    }
}

impl CandidateRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_full_title(mut self, full_title: impl Into<String>) -> Self {
        self.full_title = Some(full_title.into());
        self
    }

    pub fn with_video_url(mut self, url: impl Into<String>) -> Self {
        self.video_url = Some(url.into());
        self
    }

    /// Current external link, if any (empty strings are treated as absent).
    pub fn external_url(&self) -> Option<&str> {
        self.video_url.as_deref().filter(|u| !u.trim().is_empty())
    }

    pub fn is_linked(&self) -> bool {
        self.external_url().is_some()
    }

    pub fn record_ref(&self) -> RecordRef {
        RecordRef {
            id: self.id.clone(),
            title: self.title.clone(),
        }
    }
}

/// Identity of a record as seen by the merge policy: id when present,
/// otherwise the exact title.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub id: Option<RecordId>,
    pub title: String,
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "ID {}", id),
            None => write!(f, "'{}'", self.title),
        }
    }
}

// ============================================================================
// Video Models
// ============================================================================

/// Video from an external source (playlist or channel listing).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoItem {
    pub title: String,
    pub url: String,
    /// Playlist or channel the video was listed under
    #[serde(default, rename = "playlist", alias = "sourceGroup")]
    pub source_group: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub view_count: Option<u64>,
}

impl VideoItem {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.source_group = Some(group.into());
        self
    }
}

// ============================================================================
// Match Models
// ============================================================================

/// Comparable text field on either side of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TitleField {
    Title,
    FullTitle,
    Song,
    Movie,
}

impl TitleField {
    pub fn as_str(self) -> &'static str {
        match self {
            TitleField::Title => "title",
            TitleField::FullTitle => "fullTitle",
            TitleField::Song => "song",
            TitleField::Movie => "movie",
        }
    }
}

/// Which query field was compared with which candidate field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPair {
    pub query: TitleField,
    pub candidate: TitleField,
}

impl FieldPair {
    pub fn new(query: TitleField, candidate: TitleField) -> Self {
        Self { query, candidate }
    }
}

impl fmt::Display for FieldPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_to_{}", self.query.as_str(), self.candidate.as_str())
    }
}

/// Ranked pairing of one unmatched item with one pool entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Position of the candidate in the pool it was ranked from
    pub pool_index: usize,
    pub candidate_title: String,
    pub score: f64,
    pub tier: ConfidenceTier,
    pub field_pair: FieldPair,
    pub source_group: Option<String>,
    /// URL the match would write to the unlinked side
    pub proposed_url: String,
    pub episode_boosted: bool,
    pub domain_boosted: bool,
}

/// Outcome of offering a candidate to the merge policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Applied,
    SkippedExisting,
    SkippedNoChange,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Applied => "applied",
            Decision::SkippedExisting => "skipped_existing",
            Decision::SkippedNoChange => "skipped_no_change",
        })
    }
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Per-batch matching statistics.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct MatchingStats {
    // Ranking
    pub queries_total: usize,
    pub queries_matched: usize,
    pub queries_unmatched: usize,
    pub candidates_high: usize,
    pub candidates_medium: usize,
    pub candidates_low: usize,
    pub episode_boosted: usize,
    pub domain_boosted: usize,

    // Merge
    pub applied: usize,
    pub overridden: usize,
    pub skipped_existing: usize,
    pub skipped_no_change: usize,
    pub below_apply_threshold: usize,
    pub ambiguous_identity: usize,
    pub record_not_found: usize,
    pub contested: usize,

    // Timing
    pub elapsed_seconds: f64,
}

impl MatchingStats {
    /// Share of queries with at least one candidate, as a percentage
    pub fn match_rate(&self) -> f64 {
        if self.queries_total == 0 {
            0.0
        } else {
            100.0 * self.queries_matched as f64 / self.queries_total as f64
        }
    }

    /// Log stats to stderr in JSON format
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            eprintln!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn record_candidate(&mut self, candidate: &MatchCandidate) {
        match candidate.tier {
            ConfidenceTier::High => self.candidates_high += 1,
            ConfidenceTier::Medium => self.candidates_medium += 1,
            ConfidenceTier::Low => self.candidates_low += 1,
            ConfidenceTier::Rejected => {}
        }
        if candidate.episode_boosted {
            self.episode_boosted += 1;
        }
        if candidate.domain_boosted {
            self.domain_boosted += 1;
        }
    }

    pub fn record_decision(&mut self, decision: Decision) {
        match decision {
            Decision::Applied => self.applied += 1,
            Decision::SkippedExisting => self.skipped_existing += 1,
            Decision::SkippedNoChange => self.skipped_no_change += 1,
        }
    }

    pub fn total_candidates(&self) -> usize {
        self.candidates_high + self.candidates_medium + self.candidates_low
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(ConfidenceTier::from_score(1.0), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.9), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.89), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.8), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.79), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_score(0.6), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_score(0.59), ConfidenceTier::Rejected);
    }

    #[test]
    fn test_record_preserves_unknown_fields() {
        let json = r#"{"id":7,"title":"A","director":"X","releaseDate":"2020-01-01"}"#;
        let record: CandidateRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, Some(RecordId::Int(7)));
        assert_eq!(record.fields.get("director").and_then(|v| v.as_str()), Some("X"));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["releaseDate"], "2020-01-01");
        assert!(back.get("videoUrl").is_none());
    }

    #[test]
    fn test_record_keeps_empty_and_null_fields() {
        let json = r#"{"id":1,"title":"","fullTitle":null,"videoUrl":null,"director":"X"}"#;
        let record: CandidateRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.title, "");
        assert!(!record.is_linked());
        assert_eq!(serde_json::to_string(&record).unwrap(), json);
    }

    #[test]
    fn test_record_keeps_key_order() {
        let json = r#"{"year":2019,"title":"A","videoUrl":null,"id":1}"#;
        let mut record: CandidateRecord = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&record).unwrap(), json);

        record.video_url = Some("https://v/1".to_string());
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"year":2019,"title":"A","videoUrl":"https://v/1","id":1}"#
        );
    }

    #[test]
    fn test_new_link_appended_at_end() {
        let json = r#"{"title":"A","year":2019}"#;
        let mut record: CandidateRecord = serde_json::from_str(json).unwrap();
        record.video_url = Some("https://v/1".to_string());
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"title":"A","year":2019,"videoUrl":"https://v/1"}"#
        );
    }

    #[test]
    fn test_built_record_serializes_known_fields() {
        let record = CandidateRecord::new("A")
            .with_id(RecordId::Text("a1".to_string()))
            .with_video_url("https://v/1");
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"id":"a1","title":"A","videoUrl":"https://v/1"}"#
        );
    }

    #[test]
    fn test_record_rejects_wrong_types() {
        assert!(serde_json::from_str::<CandidateRecord>(r#"{"title":5}"#).is_err());
        assert!(serde_json::from_str::<CandidateRecord>(r#"["A"]"#).is_err());
    }

    #[test]
    fn test_record_string_id_and_empty_url() {
        let json = r#"{"id":"abc","title":"A","videoUrl":""}"#;
        let record: CandidateRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, Some(RecordId::Text("abc".to_string())));
        assert!(!record.is_linked());
    }

    #[test]
    fn test_video_playlist_field() {
        let json = r#"{"title":"T","url":"https://x","playlist":"試玩毛","duration":120.0}"#;
        let video: VideoItem = serde_json::from_str(json).unwrap();
        assert_eq!(video.source_group.as_deref(), Some("試玩毛"));
        assert_eq!(video.view_count, None);
    }

    #[test]
    fn test_field_pair_display() {
        let pair = FieldPair::new(TitleField::Title, TitleField::FullTitle);
        assert_eq!(pair.to_string(), "title_to_fullTitle");
    }

    #[test]
    fn test_record_kind_parse() {
        assert_eq!("variety-shows".parse::<RecordKind>(), Ok(RecordKind::VarietyShows));
        assert!("podcasts".parse::<RecordKind>().is_err());
    }

    #[test]
    fn test_match_rate() {
        let stats = MatchingStats {
            queries_total: 4,
            queries_matched: 3,
            ..MatchingStats::default()
        };
        assert!((stats.match_rate() - 75.0).abs() < 1e-9);
        assert_eq!(MatchingStats::default().match_rate(), 0.0);
    }
}
