//! Candidate ranking.
//!
//! For one unmatched item and a pool, score every eligible pool entry across
//! its comparable field pairs, keep the best pair per entry, apply the episode
//! and domain refinements, drop anything under the confidence floor and return
//! the top-k in descending score order.

use log::debug;

use crate::config::{MatchConfig, MatchingConfig};
use crate::error::Result;
use crate::models::{
    CandidateRecord, ConfidenceTier, FieldPair, MatchCandidate, RecordKind, TitleField, VideoItem,
    LOW_TIER_FLOOR,
};
use crate::normalize::{extract_episode, strip_episode};
use crate::scoring::Scorer;

// ============================================================================
// Matchable
// ============================================================================

/// Anything that can sit on either side of a comparison.
pub trait Matchable {
    fn field(&self, field: TitleField) -> Option<&str>;
    fn external_url(&self) -> Option<&str>;
    fn source_group(&self) -> Option<&str> {
        None
    }
}

impl Matchable for VideoItem {
    fn field(&self, field: TitleField) -> Option<&str> {
        match field {
            TitleField::Title => Some(self.title.as_str()),
            _ => None,
        }
    }

    fn external_url(&self) -> Option<&str> {
        Some(self.url.as_str()).filter(|u| !u.trim().is_empty())
    }

    fn source_group(&self) -> Option<&str> {
        self.source_group.as_deref()
    }
}

impl Matchable for CandidateRecord {
    fn field(&self, field: TitleField) -> Option<&str> {
        match field {
            TitleField::Title => Some(self.title.as_str()),
            TitleField::FullTitle => self.full_title.as_deref(),
            TitleField::Song => self.song.as_deref(),
            TitleField::Movie => self.movie.as_deref(),
        }
    }

    fn external_url(&self) -> Option<&str> {
        CandidateRecord::external_url(self)
    }
}

// ============================================================================
// Pool Context
// ============================================================================

/// Which pool entries may be proposed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eligibility {
    /// Every entry, including ones linked elsewhere (override consideration)
    Any,
    /// Entry must already carry a link (catalog to catalog)
    RequireLink,
    /// Entry must be unlinked or linked to the query's own URL (video to catalog)
    #[default]
    SkipConflictingLink,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolContext<'a> {
    /// Record kind of the pool; enables aux field pairs and the domain bonus
    pub kind: Option<RecordKind>,
    pub eligibility: Eligibility,
    /// Reported as the source group when the query has none
    pub label: Option<&'a str>,
}

impl<'a> PoolContext<'a> {
    pub fn new(kind: RecordKind, eligibility: Eligibility) -> Self {
        Self {
            kind: Some(kind),
            eligibility,
            label: None,
        }
    }

    pub fn with_label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    fn uses_aux_titles(&self) -> bool {
        self.kind.is_none_or(RecordKind::has_aux_titles)
    }
}

const BASE_PAIRS: [(TitleField, TitleField); 4] = [
    (TitleField::Title, TitleField::Title),
    (TitleField::Title, TitleField::FullTitle),
    (TitleField::FullTitle, TitleField::Title),
    (TitleField::FullTitle, TitleField::FullTitle),
];

const AUX_PAIRS: [(TitleField, TitleField); 2] = [
    (TitleField::Title, TitleField::Song),
    (TitleField::Title, TitleField::Movie),
];

// ============================================================================
// Matcher
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct Matcher {
    scorer: Scorer,
    config: MatchingConfig,
}

/// Best pair for one pool entry, before thresholding.
struct PairScore {
    score: f64,
    pair: FieldPair,
    episode_boosted: bool,
}

impl Matcher {
    pub fn new(scorer: Scorer, config: MatchingConfig) -> Self {
        Self { scorer, config }
    }

    pub fn from_config(config: &MatchConfig) -> Result<Self> {
        Ok(Self::new(Scorer::from_config(config)?, config.matching.clone()))
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Effective floor: the configured threshold, never below the LOW tier.
    pub fn floor(&self) -> f64 {
        self.config.min_confidence_threshold.max(LOW_TIER_FLOOR)
    }

    /// Rank `pool` for one query.
    ///
    /// Sorting is stable, so entries with equal scores keep pool order. That
    /// order is not part of the contract and callers should not rely on it.
    pub fn rank<Q, C>(&self, query: &Q, pool: &[C], ctx: &PoolContext<'_>) -> Vec<MatchCandidate>
    where
        Q: Matchable,
        C: Matchable,
    {
        let floor = self.floor();
        let domain_boost = self.domain_boost_applies(query, ctx);

        let mut candidates: Vec<MatchCandidate> = pool
            .iter()
            .enumerate()
            .filter_map(|(index, candidate)| {
                let proposed_url = eligible_url(query, candidate, ctx.eligibility)?;
                let best = self.best_pair(query, candidate, ctx)?;

                let mut score = best.score;
                let domain_boosted = domain_boost && score > 0.0;
                if domain_boosted {
                    score = (score + self.config.domain_bonus).min(1.0);
                }
                if score < floor {
                    return None;
                }

                Some(MatchCandidate {
                    pool_index: index,
                    candidate_title: candidate
                        .field(TitleField::Title)
                        .unwrap_or_default()
                        .to_string(),
                    score,
                    tier: ConfidenceTier::from_score(score),
                    field_pair: best.pair,
                    source_group: query.source_group().or(ctx.label).map(str::to_string),
                    proposed_url: proposed_url.to_string(),
                    episode_boosted: best.episode_boosted,
                    domain_boosted,
                })
            })
            .collect();

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(self.config.top_k);

        for c in &candidates {
            debug!(
                "{:?} -> {:?} [{}] {:.3} {}",
                query.field(TitleField::Title).unwrap_or_default(),
                c.candidate_title,
                c.field_pair,
                c.score,
                c.tier
            );
        }
        candidates
    }

    fn domain_boost_applies<Q: Matchable>(&self, query: &Q, ctx: &PoolContext<'_>) -> bool {
        match (query.source_group(), ctx.kind) {
            (Some(group), Some(kind)) => self.config.is_compatible(group, kind),
            _ => false,
        }
    }

    /// Highest-scoring field pair; the first pair wins ties.
    fn best_pair<Q, C>(&self, query: &Q, candidate: &C, ctx: &PoolContext<'_>) -> Option<PairScore>
    where
        Q: Matchable,
        C: Matchable,
    {
        let aux: &[(TitleField, TitleField)] = if ctx.uses_aux_titles() {
            &AUX_PAIRS
        } else {
            &[]
        };

        let mut best: Option<PairScore> = None;
        for &(qf, cf) in BASE_PAIRS.iter().chain(aux) {
            let (Some(q), Some(c)) = (query.field(qf), candidate.field(cf)) else {
                continue;
            };
            let (score, episode_boosted) = self.pair_score(q, c);
            if best.as_ref().is_none_or(|b| score > b.score) {
                best = Some(PairScore {
                    score,
                    pair: FieldPair::new(qf, cf),
                    episode_boosted,
                });
            }
        }
        best
    }

    /// Scorer result, raised by the episode refinement when both titles carry
    /// the same episode number.
    fn pair_score(&self, q: &str, c: &str) -> (f64, bool) {
        let base = self.scorer.score(q, c);
        let (Some(eq), Some(ec)) = (extract_episode(q), extract_episode(c)) else {
            return (base, false);
        };
        if eq.number != ec.number {
            return (base, false);
        }

        let stripped = self
            .scorer
            .score(&strip_episode(q, &eq), &strip_episode(c, &ec));
        let boosted = (stripped + self.config.episode_bonus).min(1.0);
        if boosted > base {
            (boosted, true)
        } else {
            (base, false)
        }
    }
}

/// URL the pairing would propose, or `None` when the entry is not eligible.
fn eligible_url<'q, Q, C>(query: &'q Q, candidate: &'q C, eligibility: Eligibility) -> Option<&'q str>
where
    Q: Matchable,
    C: Matchable,
{
    let existing = candidate.external_url();
    match eligibility {
        Eligibility::Any => {}
        Eligibility::RequireLink => {
            existing?;
        }
        Eligibility::SkipConflictingLink => {
            if existing.is_some() && existing != query.external_url() {
                return None;
            }
        }
    }
    query.external_url().or(existing)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;

    fn record(title: &str) -> CandidateRecord {
        CandidateRecord::new(title)
    }

    fn linked(title: &str, url: &str) -> CandidateRecord {
        CandidateRecord::new(title).with_video_url(url)
    }

    fn matcher_with(min_conf: f64, top_k: usize) -> Matcher {
        let mut config = MatchConfig::exploratory();
        config.matching.min_confidence_threshold = min_conf;
        config.matching.top_k = top_k;
        Matcher::from_config(&config).unwrap()
    }

    #[test]
    fn test_empty_pool() {
        let matcher = Matcher::default();
        let video = VideoItem::new("Movie Night", "https://v/1");
        let pool: Vec<CandidateRecord> = Vec::new();
        assert!(matcher.rank(&video, &pool, &PoolContext::default()).is_empty());
    }

    #[test]
    fn test_best_first_and_top_k() {
        let pool = vec![
            record("Movie Nights"),
            record("Movie Night"),
            record("Movie Night Special Edition"),
            record("Completely Different"),
        ];
        let video = VideoItem::new("Movie Night", "https://v/1");

        let results = matcher_with(0.6, 3).rank(&video, &pool, &PoolContext::default());
        assert_eq!(results[0].pool_index, 1);
        assert_eq!(results[0].score, 1.0);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(results.iter().all(|c| c.pool_index != 3));
        assert_eq!(results[0].proposed_url, "https://v/1");

        let best_only = matcher_with(0.6, 1).rank(&video, &pool, &PoolContext::default());
        assert_eq!(best_only.len(), 1);
        assert_eq!(best_only[0].pool_index, 1);
    }

    #[test]
    fn test_raising_threshold_never_adds_candidates() {
        let pool = vec![
            record("Movie Nights"),
            record("Movie Night"),
            record("Movie Night Special Edition"),
            record("Movie Mights"),
            record("Night Movie"),
        ];
        let video = VideoItem::new("Movie Night", "https://v/1");

        let mut previous = usize::MAX;
        for threshold in [0.0, 0.6, 0.7, 0.8, 0.9, 0.95, 1.0] {
            let count = matcher_with(threshold, 10)
                .rank(&video, &pool, &PoolContext::default())
                .len();
            assert!(count <= previous, "threshold {} added candidates", threshold);
            previous = count;
        }
    }

    #[test]
    fn test_never_returns_rejected() {
        let pool = vec![record("Apple"), record("Zebra"), record("Movie Nights")];
        let video = VideoItem::new("Movie Night", "https://v/1");
        let results = matcher_with(0.0, 10).rank(&video, &pool, &PoolContext::default());
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|c| c.tier != ConfidenceTier::Rejected));
    }

    #[test]
    fn test_episode_bonus_same_marker() {
        let pool = vec![record("Trial EP06 The Big Day")];
        let video = VideoItem::new("Trial EP6 The Big Day", "https://v/1");
        let results = Matcher::default().rank(&video, &pool, &PoolContext::default());
        assert_eq!(results.len(), 1);
        assert!(results[0].episode_boosted);
        assert_eq!(results[0].score, 1.0);
    }

    #[test]
    fn test_episode_bonus_different_marker() {
        let pool = vec![record("Trial EP7 The Big Day")];
        let video = VideoItem::new("Trial EP6 The Big Day", "https://v/1");
        let results = Matcher::default().rank(&video, &pool, &PoolContext::default());
        assert_eq!(results.len(), 1);
        assert!(!results[0].episode_boosted);
        assert!(results[0].score < 1.0);
    }

    #[test]
    fn test_domain_bonus() {
        let pool = vec![record("Movie Nights")];
        let video = VideoItem::new("Movie Night", "https://v/1").in_group("試映劇場");
        let matcher = Matcher::default();

        let plain = matcher.rank(&video, &pool, &PoolContext::default());
        let films = matcher.rank(
            &video,
            &pool,
            &PoolContext::new(RecordKind::Films, Eligibility::SkipConflictingLink),
        );
        let songs = matcher.rank(
            &video,
            &pool,
            &PoolContext::new(RecordKind::Songs, Eligibility::SkipConflictingLink),
        );

        assert!(!plain[0].domain_boosted);
        assert!(films[0].domain_boosted);
        assert!((films[0].score - (plain[0].score + 0.05)).abs() < 1e-9);
        assert!(!songs[0].domain_boosted);
        assert_eq!(films[0].source_group.as_deref(), Some("試映劇場"));
    }

    #[test]
    fn test_tie_keeps_pool_order() {
        let pool = vec![
            record("Same Title").with_id(RecordId::Int(1)),
            record("Same Title").with_id(RecordId::Int(2)),
        ];
        let video = VideoItem::new("Same Title", "https://v/1");
        let results = Matcher::default().rank(&video, &pool, &PoolContext::default());
        let order: Vec<usize> = results.iter().map(|c| c.pool_index).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_skip_conflicting_link() {
        let pool = vec![
            linked("Movie Night", "https://v/other"),
            linked("Movie Night", "https://v/1"),
            record("Movie Night"),
        ];
        let video = VideoItem::new("Movie Night", "https://v/1");

        let results = Matcher::default().rank(&video, &pool, &PoolContext::default());
        let order: Vec<usize> = results.iter().map(|c| c.pool_index).collect();
        assert_eq!(order, vec![1, 2]);

        let ctx = PoolContext {
            eligibility: Eligibility::Any,
            ..PoolContext::default()
        };
        assert_eq!(Matcher::default().rank(&video, &pool, &ctx).len(), 3);
    }

    #[test]
    fn test_require_link_for_cross_reference() {
        let query = record("Movie Night");
        let pool = vec![record("Movie Night"), linked("Movie Night", "https://v/9")];
        let ctx = PoolContext::new(RecordKind::Films, Eligibility::RequireLink).with_label("films");

        let results = Matcher::default().rank(&query, &pool, &ctx);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].pool_index, 1);
        assert_eq!(results[0].proposed_url, "https://v/9");
        assert_eq!(results[0].source_group.as_deref(), Some("films"));
    }

    #[test]
    fn test_full_title_pair() {
        let query = record("大佬");
        let pool = vec![linked("Big Boss", "https://v/2").with_full_title("試映劇場《大佬》")];
        let ctx = PoolContext::new(RecordKind::Films, Eligibility::RequireLink);

        let results = Matcher::default().rank(&query, &pool, &ctx);
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].field_pair,
            FieldPair::new(TitleField::Title, TitleField::FullTitle)
        );
    }

    #[test]
    fn test_song_pairs_only_for_song_pools() {
        let query = record("一個人之歌");
        let mut song = linked("試音片 MV", "https://v/3");
        song.song = Some("一個人之歌".to_string());
        let pool = vec![song];

        let songs_ctx = PoolContext::new(RecordKind::Songs, Eligibility::RequireLink);
        let results = Matcher::default().rank(&query, &pool, &songs_ctx);
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].field_pair,
            FieldPair::new(TitleField::Title, TitleField::Song)
        );

        let films_ctx = PoolContext::new(RecordKind::Films, Eligibility::RequireLink);
        assert!(Matcher::default().rank(&query, &pool, &films_ctx).is_empty());
    }

    #[test]
    fn test_no_url_anywhere_is_ineligible() {
        let query = record("Movie Night");
        let pool = vec![record("Movie Night")];
        let ctx = PoolContext {
            eligibility: Eligibility::Any,
            ..PoolContext::default()
        };
        assert!(Matcher::default().rank(&query, &pool, &ctx).is_empty());
    }
}
