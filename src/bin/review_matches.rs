//! Print MEDIUM and LOW entries of a saved batch report for manual review
//!
//! Usage: review-matches <report.json> [--limit N]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use title_matcher::models::ConfidenceTier;
use title_matcher::report::{BatchReport, ReportEntry};

#[derive(Parser, Debug)]
#[command(name = "review-matches")]
#[command(about = "Review medium and low confidence matches from a title-matcher report")]
struct Args {
    report: PathBuf,

    /// Show at most this many entries per tier
    #[arg(long)]
    limit: Option<usize>,
}

fn recommendation(tier: ConfidenceTier) -> &'static str {
    match tier {
        ConfidenceTier::High => "Safe to apply automatically",
        ConfidenceTier::Medium => "Likely correct - verify titles and apply manually",
        ConfidenceTier::Low => "Needs verification - may be a false positive",
        ConfidenceTier::Rejected => "Do not apply",
    }
}

fn show_entry(entry: &ReportEntry, index: usize) {
    println!("\n{:=<80}", "");
    println!("MATCH #{} - SCORE: {:.3} ({})", index, entry.score, entry.tier);
    println!("{:=<80}", "");
    println!("  Query:     '{}'", entry.query_title);
    println!("  Candidate: '{}'", entry.candidate_title);
    if let Some(kind) = entry.candidate_kind {
        println!("  From:      {}", kind);
    }
    if let Some(group) = &entry.source_group {
        println!("  Group:     {}", group);
    }
    println!("  Fields:    {}", entry.field_pair);
    println!("  Rank:      {}", entry.rank);
    println!("  Video URL: {}", entry.proposed_url);
    match (&entry.decision, &entry.issue) {
        (Some(decision), _) => println!("  Decision:  {}", decision),
        (None, Some(issue)) => println!("  Issue:     {}", issue),
        (None, None) => {}
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let report = BatchReport::load(&args.report)
        .with_context(|| format!("Failed to load report {}", args.report.display()))?;
    let limit = args.limit.unwrap_or(usize::MAX);

    println!("MANUAL REVIEW ({} / {})", report.kind, args.report.display());
    println!("{:=<80}", "");
    println!("  HIGH   (>= 0.90): {}", report.tiers.high);
    println!("  MEDIUM (0.80-0.89): {}", report.tiers.medium);
    println!("  LOW    (0.60-0.79): {}", report.tiers.low);
    println!("  Unmatched: {}", report.unmatched.len());
    if report.dry_run {
        println!("\nThis was a dry run; nothing has been applied yet.");
    }

    let review_tiers = [
        (ConfidenceTier::Medium, "These are likely correct but should be verified"),
        (ConfidenceTier::Low, "These need careful verification"),
    ];

    let mut index = 0;
    for (tier, note) in review_tiers {
        let entries: Vec<&ReportEntry> = report.in_tier(tier).take(limit).collect();
        if entries.is_empty() {
            continue;
        }
        println!("\n{:=<80}", "");
        println!("{} CONFIDENCE MATCHES", tier);
        println!("{}:", note);
        for entry in entries {
            index += 1;
            show_entry(entry, index);
        }
    }

    println!("\n{:=<80}", "");
    println!("RECOMMENDATIONS");
    println!("{:=<80}", "");
    for (tier, _) in review_tiers {
        let entries: Vec<&ReportEntry> = report
            .in_tier(tier)
            .filter(|e| e.decision.is_none())
            .take(limit)
            .collect();
        if entries.is_empty() {
            continue;
        }
        println!("\n{} CONFIDENCE:", tier);
        for (i, entry) in entries.iter().enumerate() {
            println!("  {}. '{}' -> '{}'", i + 1, entry.query_title, entry.candidate_title);
            println!("     Video URL: {}", entry.proposed_url);
            println!("     Recommendation: {}", recommendation(tier));
        }
    }

    println!("\nTo apply a reviewed match, set its videoUrl in the catalog, or rerun");
    println!("title-matcher with --apply and a lower merge.applyThreshold in --config.");
    Ok(())
}
