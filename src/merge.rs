//! Merge policy: decides whether a proposed link is written to a record.
//!
//! Applying only ever touches `videoUrl`. An existing, different link is
//! replaced only when the candidate's score is strictly above the override
//! threshold. Within one batch a record takes at most one proposal.

use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::config::MergeConfig;
use crate::models::{CandidateRecord, Decision, MatchCandidate, RecordRef};

// ============================================================================
// Identity Lookup
// ============================================================================

/// How proposals find their record. Fixed for a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    ById,
    ByTitle,
}

impl LookupStrategy {
    /// By id when every record carries one, otherwise by exact title.
    pub fn for_records(records: &[CandidateRecord]) -> Self {
        if !records.is_empty() && records.iter().all(|r| r.id.is_some()) {
            LookupStrategy::ById
        } else {
            LookupStrategy::ByTitle
        }
    }

    pub fn locate(self, records: &[CandidateRecord], target: &RecordRef) -> Result<usize, MergeIssue> {
        let mut hits = records.iter().enumerate().filter(|(_, r)| match self {
            LookupStrategy::ById => target.id.is_some() && r.id == target.id,
            LookupStrategy::ByTitle => r.title == target.title,
        });

        let first = hits
            .next()
            .map(|(i, _)| i)
            .ok_or_else(|| MergeIssue::NotFound(target.clone()))?;
        let extra = hits.count();
        if extra > 0 {
            return Err(MergeIssue::AmbiguousIdentity {
                target: target.clone(),
                matches: extra + 1,
            });
        }
        Ok(first)
    }
}

/// A proposal that could not be resolved to exactly one record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeIssue {
    #[error("{target} matches {matches} records; nothing applied")]
    AmbiguousIdentity { target: RecordRef, matches: usize },

    #[error("{0} not found in catalog")]
    NotFound(RecordRef),

    #[error("{target} already proposed {winner} with a higher score in this batch; nothing applied")]
    Contested { target: RecordRef, winner: String },
}

/// What a merge did to one record.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub decision: Decision,
    /// Link that an override replaced
    pub replaced: Option<String>,
}

impl From<Decision> for MergeOutcome {
    fn from(decision: Decision) -> Self {
        Self {
            decision,
            replaced: None,
        }
    }
}

/// Candidate aimed at a specific record.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub target: RecordRef,
    pub candidate: MatchCandidate,
}

// ============================================================================
// Merge Policy
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct MergePolicy {
    config: MergeConfig,
}

impl MergePolicy {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Whether a candidate is strong enough to be offered at all.
    pub fn meets_apply_threshold(&self, candidate: &MatchCandidate) -> bool {
        candidate.score >= self.config.apply_threshold
    }

    pub fn apply(&self, record: &mut CandidateRecord, candidate: &MatchCandidate) -> Decision {
        self.merge(record, candidate).decision
    }

    /// `apply`, also returning the link an override replaced.
    pub fn merge(&self, record: &mut CandidateRecord, candidate: &MatchCandidate) -> MergeOutcome {
        let proposed = candidate.proposed_url.as_str();
        let Some(existing) = record.external_url() else {
            info!(
                "Linked {} -> {} ({:.3} {})",
                record.record_ref(),
                proposed,
                candidate.score,
                candidate.tier
            );
            record.video_url = Some(proposed.to_string());
            return Decision::Applied.into();
        };

        if existing == proposed {
            debug!("{} already linked to {}", record.record_ref(), proposed);
            return Decision::SkippedNoChange.into();
        }

        if candidate.score > self.config.override_threshold {
            info!(
                "Override {}: {} -> {} ({:.3})",
                record.record_ref(),
                existing,
                proposed,
                candidate.score
            );
            let replaced = record.video_url.replace(proposed.to_string());
            MergeOutcome {
                decision: Decision::Applied,
                replaced,
            }
        } else {
            debug!(
                "Kept {} on {} (proposed {} at {:.3}, override needs > {:.2})",
                record.record_ref(),
                existing,
                proposed,
                candidate.score,
                self.config.override_threshold
            );
            Decision::SkippedExisting.into()
        }
    }

    /// Apply proposals against one catalog. The lookup strategy is chosen once
    /// from the catalog before anything is applied. When several proposals
    /// resolve to the same record only the highest-scoring one (earliest on a
    /// tie) is applied; the rest come back as `Contested`.
    pub fn apply_batch(
        &self,
        records: &mut [CandidateRecord],
        proposals: &[Proposal],
    ) -> Vec<Result<MergeOutcome, MergeIssue>> {
        let strategy = LookupStrategy::for_records(records);
        let located: Vec<Result<usize, MergeIssue>> = proposals
            .iter()
            .map(|proposal| {
                strategy.locate(records, &proposal.target).inspect_err(|issue| {
                    warn!("{}", issue);
                })
            })
            .collect();

        let mut winners: FxHashMap<usize, usize> = FxHashMap::default();
        for (i, index) in located.iter().enumerate() {
            let Ok(index) = index else { continue };
            winners
                .entry(*index)
                .and_modify(|best| {
                    if proposals[i].candidate.score > proposals[*best].candidate.score {
                        *best = i;
                    }
                })
                .or_insert(i);
        }

        located
            .into_iter()
            .enumerate()
            .map(|(i, located)| {
                let index = located?;
                let winner = winners[&index];
                if winner != i {
                    let issue = MergeIssue::Contested {
                        target: proposals[i].target.clone(),
                        winner: proposals[winner].candidate.proposed_url.clone(),
                    };
                    warn!("{}", issue);
                    return Err(issue);
                }
                Ok(self.merge(&mut records[index], &proposals[i].candidate))
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
