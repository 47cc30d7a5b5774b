//! Matching configuration.
//!
//! Every threshold, bonus and pattern list the core uses lives here and is
//! handed to the normalizer, scorer, matcher and merge policy at construction.
//! Two configurations (e.g. exploratory and automatic) can be used side by side.
//!
//! ## Score scale
//!
//! All scores and thresholds are on the 0-1 scale. Values quoted as
//! percentages (90/80/60 tiers, +5 domain bonus, +20 episode bonus, 95 override)
//! convert by dividing by 100. `validate()` rejects anything above 1.0 instead
//! of guessing which scale was meant.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::RecordKind;

// ============================================================================
// Built-in Pattern Tables
// ============================================================================

/// Label + bracket wrappers, tried in order. Capture group 1 is the core title.
pub const DEFAULT_WRAPPER_PATTERNS: &[&str] = &[
    r"試映劇場《(.+?)》",
    r"試音片《(.+?)》",
    r"試乜都得《(.+?)》",
    // Show label followed by an episode code: "試玩毛EP06《...》"
    r"試玩毛[^《]*《(.+?)》",
];

/// Site names stripped when they trail a title as "- Site".
pub const DEFAULT_SITE_SUFFIXES: &[&str] = &["YouTube"];

/// Values that carry no title information.
pub const DEFAULT_PLACEHOLDERS: &[&str] = &["／", "/", "-"];

/// Prefix every stored video link is expected to start with.
pub const DEFAULT_LINK_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// Playlists whose videos get the domain bonus against these record kinds.
fn default_domain_compatibility() -> FxHashMap<String, FxHashSet<RecordKind>> {
    use RecordKind::*;
    let table: [(&str, &[RecordKind]); 9] = [
        ("試映劇場", &[Films, Ads]),
        ("試音片", &[Songs]),
        ("試乜都得", &[VarietyShows]),
        ("試玩毛", &[VarietyShows]),
        ("口試王", &[VarietyShows]),
        ("學術研討會", &[VarietyShows]),
        ("誠實測慌機", &[VarietyShows]),
        ("同囚易", &[VarietyShows]),
        ("忍笑", &[VarietyShows]),
    ];
    table
        .into_iter()
        .map(|(group, kinds)| (group.to_string(), kinds.iter().copied().collect()))
        .collect()
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NormalizeConfig {
    pub wrapper_patterns: Vec<String>,
    pub site_suffixes: Vec<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            wrapper_patterns: DEFAULT_WRAPPER_PATTERNS.iter().map(|s| s.to_string()).collect(),
            site_suffixes: DEFAULT_SITE_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScoringConfig {
    pub placeholders: Vec<String>,
    /// Titles shorter than this (in characters) never match
    pub min_usable_len: usize,
    /// Shorter side of a containment must have at least this many characters
    pub min_containment_len: usize,
    pub exact_normalized_score: f64,
    pub containment_boost_floor: f64,
    pub stripped_equal_floor: f64,
    pub stripped_containment_floor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            placeholders: DEFAULT_PLACEHOLDERS.iter().map(|s| s.to_string()).collect(),
            min_usable_len: 2,
            min_containment_len: 3,
            exact_normalized_score: 0.95,
            containment_boost_floor: 0.8,
            stripped_equal_floor: 0.9,
            stripped_containment_floor: 0.85,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchingConfig {
    pub min_confidence_threshold: f64,
    pub top_k: usize,
    pub episode_bonus: f64,
    pub domain_bonus: f64,
    /// Source group -> record kinds that group is known to feed
    pub domain_compatibility: FxHashMap<String, FxHashSet<RecordKind>>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 0.6,
            top_k: 3,
            episode_bonus: 0.20,
            domain_bonus: 0.05,
            domain_compatibility: default_domain_compatibility(),
        }
    }
}

impl MatchingConfig {
    pub fn is_compatible(&self, group: &str, kind: RecordKind) -> bool {
        self.domain_compatibility
            .get(group)
            .is_some_and(|kinds| kinds.contains(&kind))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MergeConfig {
    /// Candidates below this are reported but never offered to the merge policy
    pub apply_threshold: f64,
    /// A differing existing link is replaced only above this
    pub override_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            apply_threshold: 0.75,
            override_threshold: 0.95,
        }
    }
}

// ============================================================================
// Top-level Config
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchConfig {
    pub normalize: NormalizeConfig,
    pub scoring: ScoringConfig,
    pub matching: MatchingConfig,
    pub merge: MergeConfig,
    pub link_prefix: Option<String>,
}

impl MatchConfig {
    /// Cross-referencing for human review: low floor, three candidates per item.
    pub fn exploratory() -> Self {
        Self::default()
    }

    /// Direct application: best candidate only, automated-application floor.
    pub fn automatic() -> Self {
        let mut config = Self::default();
        config.matching.min_confidence_threshold = 0.75;
        config.matching.top_k = 1;
        config
    }

    /// Load a (possibly partial) config file over the defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: MatchConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn link_prefix(&self) -> &str {
        self.link_prefix.as_deref().unwrap_or(DEFAULT_LINK_PREFIX)
    }

    pub fn validate(&self) -> Result<()> {
        let unit_values = [
            ("scoring.exactNormalizedScore", self.scoring.exact_normalized_score),
            ("scoring.containmentBoostFloor", self.scoring.containment_boost_floor),
            ("scoring.strippedEqualFloor", self.scoring.stripped_equal_floor),
            ("scoring.strippedContainmentFloor", self.scoring.stripped_containment_floor),
            ("matching.minConfidenceThreshold", self.matching.min_confidence_threshold),
            ("matching.episodeBonus", self.matching.episode_bonus),
            ("matching.domainBonus", self.matching.domain_bonus),
            ("merge.applyThreshold", self.merge.apply_threshold),
            ("merge.overrideThreshold", self.merge.override_threshold),
        ];
        for (name, value) in unit_values {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{} = {} is outside 0-1 (percentages must be divided by 100)",
                    name, value
                )));
            }
        }

        if self.matching.top_k == 0 {
            return Err(Error::InvalidConfig("matching.topK must be at least 1".to_string()));
        }
        if self.scoring.min_usable_len == 0 {
            return Err(Error::InvalidConfig(
                "scoring.minUsableLen must be at least 1".to_string(),
            ));
        }
        if self.merge.override_threshold <= self.merge.apply_threshold {
            return Err(Error::InvalidConfig(format!(
                "merge.overrideThreshold ({}) must be above merge.applyThreshold ({})",
                self.merge.override_threshold, self.merge.apply_threshold
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
