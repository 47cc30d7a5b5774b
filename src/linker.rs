//! Batch driver: ranks many queries in parallel, then merges sequentially.
//!
//! Two flows:
//! - `link_videos`: videos against one catalog partition.
//! - `cross_reference`: unlinked records of a partition against linked records
//!   of other partitions.
//!
//! Both report the top-k candidates per query; only rank 1 is offered to the
//! merge policy, the rest are there for review.
//!
//! Ranking is read-only and runs on rayon. The merge pass mutates the target
//! catalog and assumes it is the only writer while it runs.

use log::info;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::time::Instant;

use crate::catalog::Catalog;
use crate::config::MatchConfig;
use crate::error::Result;
use crate::matcher::{Eligibility, Matcher, PoolContext};
use crate::merge::{MergeIssue, MergePolicy, Proposal};
use crate::models::{CandidateRecord, MatchCandidate, RecordRef, VideoItem};
use crate::progress::PhaseProgress;
use crate::report::{BatchReport, Flow, ReportEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Propose and report only
    #[default]
    DryRun,
    /// Write candidates at or above the apply threshold
    Apply,
}

#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    pub mode: RunMode,
    /// Only videos from these source groups; `None` takes every video
    pub groups: Option<FxHashSet<String>>,
    /// Also rank records linked to another video, so the merge policy can
    /// consider replacing their link
    pub allow_override: bool,
}

impl LinkOptions {
    fn eligibility(&self) -> Eligibility {
        if self.allow_override {
            Eligibility::Any
        } else {
            Eligibility::SkipConflictingLink
        }
    }

    pub fn accepts(&self, video: &VideoItem) -> bool {
        match &self.groups {
            None => true,
            Some(groups) => video
                .source_group
                .as_deref()
                .is_some_and(|g| groups.contains(g)),
        }
    }
}

/// Candidate plus the record it would be written to.
struct Pending {
    entry: usize,
    proposal: Proposal,
}

#[derive(Clone, Debug, Default)]
pub struct Linker {
    matcher: Matcher,
    merge: MergePolicy,
}

impl Linker {
    pub fn new(matcher: Matcher, merge: MergePolicy) -> Self {
        Self { matcher, merge }
    }

    pub fn from_config(config: &MatchConfig) -> Result<Self> {
        Ok(Self::new(
            Matcher::from_config(config)?,
            MergePolicy::new(config.merge.clone()),
        ))
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Link videos to records of `catalog`.
    pub fn link_videos(
        &self,
        videos: &[VideoItem],
        catalog: &mut Catalog,
        options: &LinkOptions,
        progress: &PhaseProgress,
    ) -> BatchReport {
        let start = Instant::now();
        let dry_run = options.mode == RunMode::DryRun;
        let mut report = BatchReport::new(Flow::Link, catalog.kind, dry_run);

        let queries: Vec<&VideoItem> = videos.iter().filter(|v| options.accepts(v)).collect();
        let ctx = PoolContext::new(catalog.kind, options.eligibility());

        let ranked: Vec<Vec<MatchCandidate>> = {
            let pool = &catalog.records;
            queries
                .par_iter()
                .map(|video| {
                    let candidates = self.matcher.rank(*video, pool, &ctx);
                    progress.inc();
                    candidates
                })
                .collect()
        };

        let mut pending = Vec::new();
        report.stats.queries_total = queries.len();
        for (video, candidates) in queries.iter().zip(ranked) {
            let mut candidates = candidates.into_iter();
            let Some(best) = candidates.next() else {
                report.stats.queries_unmatched += 1;
                report.unmatched.push(video.title.clone());
                continue;
            };
            report.stats.queries_matched += 1;
            report.stats.record_candidate(&best);

            let target = catalog.records[best.pool_index].record_ref();
            self.queue(&mut report, &mut pending, &video.title, best, target, options.mode);

            for (rank, candidate) in candidates.enumerate() {
                report.stats.record_candidate(&candidate);
                report.push(ReportEntry::new(&video.title, &candidate, rank + 2));
            }
        }

        self.merge_pending(&mut report, &mut catalog.records, pending);
        report.stats.elapsed_seconds = start.elapsed().as_secs_f64();
        progress.finish("done");
        info!(
            "link {}: {} of {} videos matched, {} applied",
            catalog.kind, report.stats.queries_matched, report.stats.queries_total, report.stats.applied
        );
        report
    }

    /// Propose links for unlinked records of `target` from linked records of
    /// `sources`. Only the best candidate per record is offered to the merge.
    pub fn cross_reference(
        &self,
        target: &mut Catalog,
        sources: &[Catalog],
        mode: RunMode,
        progress: &PhaseProgress,
    ) -> BatchReport {
        let start = Instant::now();
        let mut report = BatchReport::new(Flow::CrossRef, target.kind, mode == RunMode::DryRun);
        let top_k = self.matcher.config().top_k;

        let queries: Vec<&CandidateRecord> = target.unlinked();
        let ranked: Vec<Vec<(usize, MatchCandidate)>> = queries
            .par_iter()
            .map(|record| {
                let mut merged: Vec<(usize, MatchCandidate)> = sources
                    .iter()
                    .enumerate()
                    .flat_map(|(si, source)| {
                        let ctx = PoolContext::new(source.kind, Eligibility::RequireLink)
                            .with_label(source.kind.as_str());
                        self.matcher
                            .rank(*record, &source.records, &ctx)
                            .into_iter()
                            .map(move |c| (si, c))
                    })
                    .collect();
                merged.sort_by(|a, b| b.1.score.total_cmp(&a.1.score));
                merged.truncate(top_k);
                progress.inc();
                merged
            })
            .collect();

        let queries: Vec<RecordRef> = queries.iter().map(|r| r.record_ref()).collect();
        let mut pending = Vec::new();
        report.stats.queries_total = queries.len();
        for (query, candidates) in queries.into_iter().zip(ranked) {
            if candidates.is_empty() {
                report.stats.queries_unmatched += 1;
                report.unmatched.push(query.title);
                continue;
            }
            report.stats.queries_matched += 1;

            let mut candidates = candidates.into_iter();
            if let Some((si, best)) = candidates.next() {
                report.stats.record_candidate(&best);
                let first = report.entries.len();
                self.queue(&mut report, &mut pending, &query.title, best, query.clone(), mode);
                report.entries[first].candidate_kind = Some(sources[si].kind);
            }
            for (rank, (si, candidate)) in candidates.enumerate() {
                report.stats.record_candidate(&candidate);
                let mut entry = ReportEntry::new(&query.title, &candidate, rank + 2);
                entry.candidate_kind = Some(sources[si].kind);
                report.push(entry);
            }
        }

        self.merge_pending(&mut report, &mut target.records, pending);
        report.stats.elapsed_seconds = start.elapsed().as_secs_f64();
        progress.finish("done");
        info!(
            "cross-ref {}: {} of {} unlinked records matched, {} applied",
            target.kind, report.stats.queries_matched, report.stats.queries_total, report.stats.applied
        );
        report
    }

    /// Add the best candidate's entry and, in apply mode, queue it for merging.
    fn queue(
        &self,
        report: &mut BatchReport,
        pending: &mut Vec<Pending>,
        query_title: &str,
        candidate: MatchCandidate,
        target: RecordRef,
        mode: RunMode,
    ) {
        let entry = report.entries.len();
        report.push(ReportEntry::new(query_title, &candidate, 1));

        if mode == RunMode::DryRun {
            return;
        }
        if !self.merge.meets_apply_threshold(&candidate) {
            report.stats.below_apply_threshold += 1;
            return;
        }
        pending.push(Pending {
            entry,
            proposal: Proposal { target, candidate },
        });
    }

    fn merge_pending(
        &self,
        report: &mut BatchReport,
        records: &mut [CandidateRecord],
        pending: Vec<Pending>,
    ) {
        if pending.is_empty() {
            return;
        }

        let (entries, proposals): (Vec<usize>, Vec<Proposal>) =
            pending.into_iter().map(|p| (p.entry, p.proposal)).unzip();
        let results = self.merge.apply_batch(records, &proposals);

        for (entry, result) in entries.into_iter().zip(results) {
            match result {
                Ok(outcome) => {
                    report.stats.record_decision(outcome.decision);
                    if outcome.replaced.is_some() {
                        report.stats.overridden += 1;
                    }
                    report.entries[entry].decision = Some(outcome.decision);
                }
                Err(issue) => {
                    match issue {
                        MergeIssue::AmbiguousIdentity { .. } => report.stats.ambiguous_identity += 1,
                        MergeIssue::NotFound(_) => report.stats.record_not_found += 1,
                        MergeIssue::Contested { .. } => report.stats.contested += 1,
                    }
                    report.entries[entry].issue = Some(issue.to_string());
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfidenceTier, Decision, RecordId, RecordKind};

    fn film(id: i64, title: &str) -> CandidateRecord {
        CandidateRecord::new(title).with_id(RecordId::Int(id))
    }

    fn hidden(total: usize) -> PhaseProgress {
        PhaseProgress::hidden("test", total as u64)
    }

    fn films() -> Catalog {
        Catalog::new(
            RecordKind::Films,
            vec![
                film(1, "大佬"),
                film(2, "返工").with_video_url("https://www.youtube.com/watch?v=old"),
                film(3, "哈利波腎"),
            ],
        )
    }

    fn videos() -> Vec<VideoItem> {
        vec![
            VideoItem::new("試映劇場《大佬》｜試當真", "https://www.youtube.com/watch?v=a1")
                .in_group("試映劇場"),
            VideoItem::new("試映劇場《返工》", "https://www.youtube.com/watch?v=b2")
                .in_group("試映劇場"),
            VideoItem::new("試玩毛EP06《哈利波腎》｜試當真", "https://www.youtube.com/watch?v=c3")
                .in_group("試玩毛"),
            VideoItem::new("完全無關嘅片", "https://www.youtube.com/watch?v=d4"),
        ]
    }

    #[test]
    fn test_link_dry_run_leaves_catalog() {
        let linker = Linker::default();
        let mut catalog = films();
        let before = catalog.clone();
        let videos = videos();

        let report = linker.link_videos(&videos, &mut catalog, &LinkOptions::default(), &hidden(4));

        assert_eq!(catalog, before);
        assert!(report.dry_run);
        assert_eq!(report.stats.queries_total, 4);
        // 返工 is linked elsewhere and not eligible; the last video matches nothing
        assert_eq!(report.stats.queries_matched, 2);
        assert_eq!(report.unmatched.len(), 2);
        assert!(report.entries.iter().all(|e| e.decision.is_none()));
    }

    #[test]
    fn test_link_apply() {
        let linker = Linker::default();
        let mut catalog = films();
        let videos = videos();
        let options = LinkOptions {
            mode: RunMode::Apply,
            ..LinkOptions::default()
        };

        let report = linker.link_videos(&videos, &mut catalog, &options, &hidden(4));

        assert_eq!(
            catalog.records[0].video_url.as_deref(),
            Some("https://www.youtube.com/watch?v=a1")
        );
        assert_eq!(
            catalog.records[1].video_url.as_deref(),
            Some("https://www.youtube.com/watch?v=old")
        );
        assert_eq!(
            catalog.records[2].video_url.as_deref(),
            Some("https://www.youtube.com/watch?v=c3")
        );
        assert_eq!(report.stats.applied, 2);
        assert_eq!(report.stats.overridden, 0);

        // Second run changes nothing
        let again = linker.link_videos(&videos, &mut catalog, &options, &hidden(4));
        assert_eq!(again.stats.applied, 0);
        assert_eq!(again.stats.skipped_no_change, 2);
    }

    #[test]
    fn test_two_videos_for_one_record() {
        let linker = Linker::default();
        let mut catalog = Catalog::new(RecordKind::Films, vec![film(1, "大佬")]);
        let videos = vec![
            VideoItem::new("試映劇場《大佬》｜試當真", "https://www.youtube.com/watch?v=full")
                .in_group("試映劇場"),
            VideoItem::new("試映劇場《大佬》", "https://www.youtube.com/watch?v=trailer")
                .in_group("試映劇場"),
        ];
        let options = LinkOptions {
            mode: RunMode::Apply,
            ..LinkOptions::default()
        };

        let report = linker.link_videos(&videos, &mut catalog, &options, &hidden(2));

        assert_eq!(
            catalog.records[0].video_url.as_deref(),
            Some("https://www.youtube.com/watch?v=full")
        );
        assert_eq!(report.stats.applied, 1);
        assert_eq!(report.stats.overridden, 0);
        assert_eq!(report.stats.contested, 1);
        assert_eq!(report.entries[0].decision, Some(Decision::Applied));
        assert!(report.entries[1].decision.is_none());
        assert!(report.entries[1].issue.is_some());
    }

    #[test]
    fn test_allow_override_counts_replacement() {
        let linker = Linker::default();
        let mut catalog = films();
        let options = LinkOptions {
            mode: RunMode::Apply,
            allow_override: true,
            ..LinkOptions::default()
        };

        let report = linker.link_videos(&videos(), &mut catalog, &options, &hidden(4));

        // 試映劇場《返工》 scores 1.0 with the domain bonus, above the override bar
        assert_eq!(
            catalog.records[1].video_url.as_deref(),
            Some("https://www.youtube.com/watch?v=b2")
        );
        assert_eq!(report.stats.applied, 3);
        assert_eq!(report.stats.overridden, 1);
    }

    #[test]
    fn test_link_reports_lower_ranks() {
        let linker = Linker::default();
        let mut catalog = Catalog::new(
            RecordKind::Films,
            vec![film(1, "Movie Night"), film(2, "Movie Nights")],
        );
        let videos = vec![VideoItem::new("Movie Night", "https://www.youtube.com/watch?v=m1")];
        let options = LinkOptions {
            mode: RunMode::Apply,
            ..LinkOptions::default()
        };

        let report = linker.link_videos(&videos, &mut catalog, &options, &hidden(1));

        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].rank, 1);
        assert_eq!(report.entries[0].decision, Some(Decision::Applied));
        assert_eq!(report.entries[1].rank, 2);
        assert!(report.entries[1].decision.is_none());
        assert!(catalog.records[0].is_linked());
        assert!(!catalog.records[1].is_linked());
    }

    #[test]
    fn test_link_group_filter() {
        let linker = Linker::default();
        let mut catalog = films();
        let options = LinkOptions {
            mode: RunMode::Apply,
            groups: Some(["試玩毛".to_string()].into_iter().collect()),
            ..LinkOptions::default()
        };

        let report = linker.link_videos(&videos(), &mut catalog, &options, &hidden(1));
        assert_eq!(report.stats.queries_total, 1);
        assert!(!catalog.records[0].is_linked());
        assert!(catalog.records[2].is_linked());
    }

    #[test]
    fn test_apply_threshold_gates_merge() {
        let mut config = MatchConfig::exploratory();
        config.merge.apply_threshold = 0.99;
        config.merge.override_threshold = 1.0;
        let linker = Linker::from_config(&config).unwrap();

        let mut catalog = films();
        let options = LinkOptions {
            mode: RunMode::Apply,
            ..LinkOptions::default()
        };
        let report = linker.link_videos(&videos(), &mut catalog, &options, &hidden(4));

        // Normalized-equal matches score 0.95 (+0.05 domain for 試映劇場)
        assert_eq!(report.stats.applied, 1);
        assert_eq!(report.stats.below_apply_threshold, 1);
        assert!(catalog.records[0].is_linked());
        assert!(!catalog.records[2].is_linked());
    }

    #[test]
    fn test_cross_reference() {
        let linker = Linker::default();
        let mut target = Catalog::new(
            RecordKind::AuditionFilms,
            vec![film(10, "大佬"), film(11, "Night Train"), film(12, "無關")],
        );
        let sources = vec![
            Catalog::new(
                RecordKind::Films,
                vec![
                    film(1, "大佬"),
                    film(2, "Light Brawn").with_video_url("https://www.youtube.com/watch?v=f2"),
                ],
            ),
            Catalog::new(
                RecordKind::Ads,
                vec![film(20, "Light Brawns").with_video_url("https://www.youtube.com/watch?v=ad")],
            ),
        ];

        let report = linker.cross_reference(&mut target, &sources, RunMode::Apply, &hidden(3));

        // 大佬 exists in films but is unlinked there, so it cannot be a source
        assert_eq!(report.stats.queries_total, 3);
        assert_eq!(report.stats.queries_matched, 1);
        assert_eq!(report.unmatched, vec!["大佬".to_string(), "無關".to_string()]);

        assert_eq!(report.entries.len(), 2);
        assert!(report.entries.iter().all(|e| e.tier == ConfidenceTier::Low));
        assert_eq!(report.entries[0].rank, 1);
        assert_eq!(report.entries[0].candidate_kind, Some(RecordKind::Films));
        assert_eq!(report.entries[1].rank, 2);
        assert_eq!(report.entries[1].candidate_kind, Some(RecordKind::Ads));
        assert!(report.entries[0].score > report.entries[1].score);

        // LOW candidates stay below the apply threshold
        assert!(!target.records[1].is_linked());
        assert_eq!(report.stats.below_apply_threshold, 1);
        assert_eq!(report.tiers.low, 2);
    }

    #[test]
    fn test_cross_reference_applies_best() {
        let linker = Linker::default();
        let mut target = Catalog::new(RecordKind::AuditionFilms, vec![film(10, "返工")]);
        let sources = vec![films()];

        let report = linker.cross_reference(&mut target, &sources, RunMode::Apply, &hidden(1));

        assert_eq!(report.entries[0].decision, Some(Decision::Applied));
        assert_eq!(report.entries[0].source_group.as_deref(), Some("films"));
        assert_eq!(
            target.records[0].video_url.as_deref(),
            Some("https://www.youtube.com/watch?v=old")
        );
    }

    #[test]
    fn test_cross_reference_ambiguous_title() {
        let linker = Linker::default();
        let mut target = Catalog::new(
            RecordKind::AuditionFilms,
            vec![CandidateRecord::new("返工"), CandidateRecord::new("返工")],
        );
        let sources = vec![films()];

        let report = linker.cross_reference(&mut target, &sources, RunMode::Apply, &hidden(2));

        assert_eq!(report.stats.ambiguous_identity, 2);
        assert!(report.entries.iter().all(|e| e.issue.is_some()));
        assert!(target.records.iter().all(|r| !r.is_linked()));
    }
}
