use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use title_matcher::catalog::{load_videos, Catalog};
use title_matcher::config::MatchConfig;
use title_matcher::linker::{LinkOptions, Linker, RunMode};
use title_matcher::models::{ConfidenceTier, RecordKind};
use title_matcher::progress::{format_duration, ProgressMode};
use title_matcher::report::BatchReport;
use title_matcher::safety::{create_backup, validate_report_path};
use title_matcher::scoring::Scorer;

#[derive(Parser, Debug)]
#[command(name = "title-matcher")]
#[command(about = "Link catalog records to videos by fuzzy title matching")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// JSON config file; missing fields take built-in defaults and --preset is ignored
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Preset::Exploratory, global = true)]
    preset: Preset,

    /// Override matching.minConfidenceThreshold (0-1)
    #[arg(long, global = true)]
    min_confidence: Option<f64>,

    /// Override matching.topK
    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Hide progress bars and print periodic progress lines instead
    #[arg(long, global = true)]
    log_only: bool,

    /// Write batch statistics to this JSON file
    #[arg(long, global = true)]
    stats: Option<PathBuf>,

    #[arg(long, default_value = "0", global = true)]
    workers: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Preset {
    /// Low floor, three candidates per item, for human review
    Exploratory,
    /// Best candidate only, automated-application floor
    Automatic,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Link videos to records of one catalog partition
    Link(LinkArgs),

    /// Propose links for unlinked records from linked records of other partitions
    CrossRef(CrossRefArgs),

    /// Explain the similarity score of two titles
    Score { a: String, b: String },

    /// Link coverage and invalid link listing for a catalog
    Stats {
        #[arg(long)]
        catalog: PathBuf,

        #[arg(long)]
        kind: RecordKind,
    },
}

#[derive(Args, Debug)]
struct LinkArgs {
    /// Video list (flat array or object keyed by playlist)
    #[arg(long)]
    videos: PathBuf,

    #[arg(long)]
    catalog: PathBuf,

    #[arg(long)]
    kind: RecordKind,

    /// Only use videos from these playlists (comma-separated)
    #[arg(long)]
    groups: Option<String>,

    /// Write links to the catalog (default: dry run)
    #[arg(long)]
    apply: bool,

    /// Also propose videos for records linked elsewhere; replaced only above merge.overrideThreshold
    #[arg(long)]
    allow_override: bool,

    /// Write the batch report here (.json)
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CrossRefArgs {
    #[arg(long)]
    target: PathBuf,

    #[arg(long)]
    target_kind: RecordKind,

    /// Source partition as <kind>=<file>; repeatable
    #[arg(long = "source", required = true)]
    sources: Vec<String>,

    /// Write links to the target catalog (default: dry run)
    #[arg(long)]
    apply: bool,

    /// Write the batch report here (.json)
    #[arg(long)]
    report: Option<PathBuf>,
}

fn load_config(global: &GlobalArgs) -> Result<MatchConfig> {
    let mut config = match &global.config {
        Some(path) => MatchConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => match global.preset {
            Preset::Exploratory => MatchConfig::exploratory(),
            Preset::Automatic => MatchConfig::automatic(),
        },
    };
    if let Some(threshold) = global.min_confidence {
        config.matching.min_confidence_threshold = threshold;
    }
    if let Some(top_k) = global.top_k {
        config.matching.top_k = top_k;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn run_mode(apply: bool) -> RunMode {
    if apply {
        RunMode::Apply
    } else {
        RunMode::DryRun
    }
}

fn load_catalog(path: &Path, kind: RecordKind) -> Result<Catalog> {
    Catalog::load(path, kind).with_context(|| format!("Failed to load catalog {}", path.display()))
}

/// Back up and rewrite the catalog when the batch changed it.
fn save_if_changed(catalog: &Catalog, path: &Path, report: &BatchReport) -> Result<()> {
    if report.dry_run || report.stats.applied == 0 {
        return Ok(());
    }
    let backup = create_backup(path).context("Failed to back up catalog")?;
    println!("Backup written to {}", backup.display());
    catalog
        .save(path)
        .with_context(|| format!("Failed to write catalog {}", path.display()))?;
    println!("Catalog updated: {}", path.display());
    Ok(())
}

fn finish_report(report: &BatchReport, path: Option<&Path>, global: &GlobalArgs) -> Result<()> {
    let stats = &report.stats;
    println!("\n{:=<60}", "");
    println!(
        "{} ({})",
        if report.dry_run { "Dry run complete" } else { "Matching complete" },
        report.kind
    );
    println!("  Queries: {}", stats.queries_total);
    println!("  Matched: {} ({:.1}%)", stats.queries_matched, stats.match_rate());
    println!(
        "  Candidates: HIGH {} / MEDIUM {} / LOW {}",
        report.tiers.high, report.tiers.medium, report.tiers.low
    );
    if !report.dry_run {
        println!("  Applied: {} (overrides: {})", stats.applied, stats.overridden);
        println!(
            "  Skipped: {} existing, {} unchanged, {} below apply threshold",
            stats.skipped_existing, stats.skipped_no_change, stats.below_apply_threshold
        );
        if stats.ambiguous_identity + stats.record_not_found + stats.contested > 0 {
            println!(
                "  Unresolved: {} ambiguous, {} not found, {} contested",
                stats.ambiguous_identity, stats.record_not_found, stats.contested
            );
        }
    }
    println!(
        "  Elapsed: {}",
        format_duration(std::time::Duration::from_secs_f64(stats.elapsed_seconds))
    );
    println!("{:=<60}", "");

    if let Some(path) = path {
        report
            .write_to_file(path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        println!("Report written to {}", path.display());
    }
    if global.log_only {
        stats.log_phase(if report.dry_run { "dry-run" } else { "apply" });
    }
    if let Some(path) = &global.stats {
        stats
            .write_to_file(path)
            .with_context(|| format!("Failed to write stats {}", path.display()))?;
    }
    Ok(())
}

fn cmd_link(args: LinkArgs, config: &MatchConfig, global: &GlobalArgs) -> Result<()> {
    if let Some(report) = &args.report {
        validate_report_path(report, &[args.videos.as_path(), args.catalog.as_path()])?;
    }
    let mode = ProgressMode::new(global.log_only);

    let spinner = mode.spinner("Loading inputs");
    let videos = load_videos(&args.videos)
        .with_context(|| format!("Failed to load videos {}", args.videos.display()))?;
    let mut catalog = load_catalog(&args.catalog, args.kind)?;
    spinner.finish_and_clear();

    let options = LinkOptions {
        mode: run_mode(args.apply),
        groups: args.groups.as_deref().map(|s| {
            s.split(',')
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect::<FxHashSet<String>>()
        }),
        allow_override: args.allow_override,
    };
    let total = videos.iter().filter(|v| options.accepts(v)).count();
    println!(
        "Matching {} of {} videos against {} {} records",
        total,
        videos.len(),
        catalog.records.len(),
        catalog.kind
    );

    let linker = Linker::from_config(config)?;
    let progress = mode.phase("Matching videos", total as u64);
    let report = linker.link_videos(&videos, &mut catalog, &options, &progress);

    save_if_changed(&catalog, &args.catalog, &report)?;
    finish_report(&report, args.report.as_deref(), global)
}

fn parse_source(spec: &str) -> Result<(RecordKind, PathBuf)> {
    let Some((kind, path)) = spec.split_once('=') else {
        bail!("Invalid --source '{}': expected <kind>=<file>", spec);
    };
    let kind: RecordKind = kind.trim().parse().map_err(anyhow::Error::msg)?;
    Ok((kind, PathBuf::from(path.trim())))
}

fn cmd_cross_ref(args: CrossRefArgs, config: &MatchConfig, global: &GlobalArgs) -> Result<()> {
    let sources: Vec<(RecordKind, PathBuf)> = args
        .sources
        .iter()
        .map(|s| parse_source(s))
        .collect::<Result<_>>()?;

    if let Some(report) = &args.report {
        let mut inputs: Vec<&Path> = vec![args.target.as_path()];
        inputs.extend(sources.iter().map(|(_, p)| p.as_path()));
        validate_report_path(report, &inputs)?;
    }
    let mode = ProgressMode::new(global.log_only);

    let spinner = mode.spinner("Loading catalogs");
    let mut target = load_catalog(&args.target, args.target_kind)?;
    let source_catalogs = sources
        .iter()
        .map(|(kind, path)| load_catalog(path, *kind))
        .collect::<Result<Vec<_>>>()?;
    spinner.finish_and_clear();

    let unlinked = target.unlinked().len();
    println!(
        "Cross-referencing {} unlinked {} records against {} source catalogs",
        unlinked,
        target.kind,
        source_catalogs.len()
    );

    let linker = Linker::from_config(config)?;
    let progress = mode.phase("Cross-referencing", unlinked as u64);
    let report = linker.cross_reference(&mut target, &source_catalogs, run_mode(args.apply), &progress);

    save_if_changed(&target, &args.target, &report)?;
    finish_report(&report, args.report.as_deref(), global)
}

fn cmd_score(a: &str, b: &str, config: &MatchConfig) -> Result<()> {
    let scorer = Scorer::from_config(config)?;
    let breakdown = scorer.explain(a, b);
    println!("{}", serde_json::to_string_pretty(&breakdown)?);
    println!("Tier: {}", ConfidenceTier::from_score(breakdown.score));
    Ok(())
}

fn cmd_stats(path: &Path, kind: RecordKind, config: &MatchConfig) -> Result<()> {
    let catalog = load_catalog(path, kind)?;
    let stats = catalog.stats();
    println!("{} ({})", path.display(), stats.kind);
    println!("  Total: {}", stats.total);
    println!("  Linked: {}", stats.linked);
    println!("  Unlinked: {}", stats.unlinked);
    println!("  Coverage: {:.1}%", stats.coverage_percent);

    let prefix = config.link_prefix();
    let invalid = catalog.invalid_links(prefix);
    if invalid.is_empty() {
        println!("All links start with {}", prefix);
    } else {
        println!("\n{} links do not start with {}:", invalid.len(), prefix);
        for record in invalid {
            println!(
                "  {}: {}",
                record.record_ref(),
                record.external_url().unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.global.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.global.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let config = load_config(&cli.global)?;
    let start = Instant::now();

    match cli.cmd {
        Command::Link(args) => cmd_link(args, &config, &cli.global)?,
        Command::CrossRef(args) => cmd_cross_ref(args, &config, &cli.global)?,
        Command::Score { a, b } => cmd_score(&a, &b, &config)?,
        Command::Stats { catalog, kind } => cmd_stats(&catalog, kind, &config)?,
    }

    log::debug!("Finished in {}", format_duration(start.elapsed()));
    Ok(())
}
