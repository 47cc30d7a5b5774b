//! Title similarity scoring.
//!
//! `Scorer::score` runs a short decision ladder (degenerate input, raw
//! equality, normalized equality) and otherwise folds independent sub-scorers
//! with `max`:
//! - fuzzy edit-distance ratio
//! - token-sorted ratio (word order ignored)
//! - containment floor
//! - character-class-stripped comparison
//!
//! Scores are on the 0-1 scale. The scorer is symmetric: every check applies to
//! both sides.

use serde::Serialize;

use crate::config::{MatchConfig, ScoringConfig};
use crate::error::Result;
use crate::normalize::Normalizer;

// ============================================================================
// Sub-scorers
// ============================================================================

/// Edit-distance ratio of two lower-cased titles (0.0 to 1.0).
pub fn fuzzy_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Edit-distance ratio after sorting whitespace-separated tokens, so
/// "Night Movie" and "Movie Night" compare equal.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    fuzzy_ratio(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// `floor` when one string contains the other and the shorter has at least
/// `min_len` characters, else 0.0.
pub fn containment_score(a: &str, b: &str, min_len: usize, floor: f64) -> f64 {
    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if shorter.chars().count() >= min_len && longer.contains(shorter) {
        floor
    } else {
        0.0
    }
}

/// Keep alphanumerics only (letters of any script, digits).
pub fn alnum_only(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Compare with punctuation and whitespace removed: `equal_floor` when the
/// stripped forms are equal, `containment_floor` when one contains the other.
pub fn stripped_score(
    a: &str,
    b: &str,
    min_len: usize,
    equal_floor: f64,
    containment_floor: f64,
) -> f64 {
    let sa = alnum_only(a);
    let sb = alnum_only(b);
    if sa == sb {
        if sa.chars().count() >= min_len {
            equal_floor
        } else {
            0.0
        }
    } else {
        containment_score(&sa, &sb, min_len, containment_floor)
    }
}

// ============================================================================
// Score Explanation
// ============================================================================

/// Which step of the ladder produced the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreRule {
    Degenerate,
    RawEqual,
    TooShort,
    NormalizedEqual,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub normalized_a: String,
    pub normalized_b: String,
    pub rule: ScoreRule,
    pub fuzzy_ratio: f64,
    pub token_sort: f64,
    pub containment: f64,
    pub stripped: f64,
    pub score: f64,
}

impl ScoreBreakdown {
    fn early(rule: ScoreRule, score: f64, normalized_a: String, normalized_b: String) -> Self {
        Self {
            normalized_a,
            normalized_b,
            rule,
            fuzzy_ratio: 0.0,
            token_sort: 0.0,
            containment: 0.0,
            stripped: 0.0,
            score,
        }
    }
}

// ============================================================================
// Scorer
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct Scorer {
    normalizer: Normalizer,
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(normalizer: Normalizer, config: ScoringConfig) -> Self {
        Self { normalizer, config }
    }

    pub fn from_config(config: &MatchConfig) -> Result<Self> {
        Ok(Self::new(
            Normalizer::from_config(&config.normalize)?,
            config.scoring.clone(),
        ))
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Empty, a placeholder token, or too short to carry a title.
    pub fn is_degenerate(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        trimmed.is_empty()
            || self.config.placeholders.iter().any(|p| p == trimmed)
            || trimmed.chars().count() < self.config.min_usable_len
    }

    pub fn score(&self, a: &str, b: &str) -> f64 {
        self.explain(a, b).score
    }

    /// Score with every intermediate value kept for auditing.
    pub fn explain(&self, a: &str, b: &str) -> ScoreBreakdown {
        if self.is_degenerate(a) || self.is_degenerate(b) {
            return ScoreBreakdown::early(ScoreRule::Degenerate, 0.0, String::new(), String::new());
        }

        let na = self.normalizer.normalize(a);
        let nb = self.normalizer.normalize(b);

        if a == b {
            return ScoreBreakdown::early(ScoreRule::RawEqual, 1.0, na, nb);
        }

        let min_len = self.config.min_usable_len;
        if na.chars().count() < min_len || nb.chars().count() < min_len {
            return ScoreBreakdown::early(ScoreRule::TooShort, 0.0, na, nb);
        }

        if na == nb {
            let score = self.config.exact_normalized_score;
            return ScoreBreakdown::early(ScoreRule::NormalizedEqual, score, na, nb);
        }

        let la = na.to_lowercase();
        let lb = nb.to_lowercase();
        let cfg = &self.config;

        let fuzzy = fuzzy_ratio(&la, &lb);
        // Same words in another order never outrank a normalized-equal match
        let token_sort = token_sort_ratio(&la, &lb).min(cfg.exact_normalized_score);
        let containment =
            containment_score(&la, &lb, cfg.min_containment_len, cfg.containment_boost_floor);
        let stripped = stripped_score(
            &la,
            &lb,
            cfg.min_containment_len,
            cfg.stripped_equal_floor,
            cfg.stripped_containment_floor,
        );

        let score = [fuzzy, token_sort, containment, stripped]
            .into_iter()
            .fold(0.0_f64, f64::max)
            .clamp(0.0, 1.0);

        ScoreBreakdown {
            normalized_a: na,
            normalized_b: nb,
            rule: ScoreRule::Fuzzy,
            fuzzy_ratio: fuzzy,
            token_sort,
            containment,
            stripped,
            score,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
