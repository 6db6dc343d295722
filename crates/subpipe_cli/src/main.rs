//! subpipe - command-line front end
//!
//! Creates jobs, runs and resumes them, shows their status and maintains the
//! media cache. All behavior lives in `subpipe_core`; this binary only wires
//! configuration, logging and output together.
//!
//! Usage:
//!   subpipe create-job --user 1 talk.mkv --run
//!   subpipe run-job 20250101-001
//!   subpipe resume-job 20250101-001 --force-from correct
//!   subpipe status 20250101-001
//!   subpipe clear-cache --all

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use subpipe_core::cache::{CachePhase, MediaCacheManager, MediaIdentity};
use subpipe_core::config::{ConfigManager, Settings};
use subpipe_core::jobs::JobLayout;
use subpipe_core::logging::{init_tracing, LogCallback};
use subpipe_core::manifest::{PipelineManifest, StageManifest};
use subpipe_core::orchestrator::{
    create_job, find_job, JobContext, RunSummary, StageRunner, Topology,
};

#[derive(Parser, Debug)]
#[command(name = "subpipe", version, about = "Subtitle pipeline job runner")]
struct Cli {
    /// Path to the configuration file (created with defaults if missing).
    #[arg(long, global = true, default_value = ".config/subpipe.toml")]
    config: PathBuf,

    /// Echo job log lines to stdout.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocate a new job for a media file.
    CreateJob {
        /// Owning user id.
        #[arg(long)]
        user: u32,
        /// Input media file.
        media: PathBuf,
        /// Run the job right after creating it.
        #[arg(long)]
        run: bool,
    },
    /// Run a job's remaining stages.
    RunJob {
        /// Job id (YYYYMMDD-NNN).
        job_id: String,
    },
    /// Resume a failed or interrupted job.
    ResumeJob {
        job_id: String,
        /// Re-run this stage and everything after it, even if completed.
        #[arg(long)]
        force_from: Option<String>,
    },
    /// Print a job's pipeline manifest summary.
    Status { job_id: String },
    /// List media cache entries.
    ListCache,
    /// Remove media cache entries.
    ClearCache(ClearCacheArgs),
}

#[derive(Args, Debug)]
#[group(required = true, multiple = true)]
struct ClearCacheArgs {
    /// Media identity (64 hex characters).
    #[arg(long, conflicts_with = "all")]
    identity: Option<String>,
    /// Only this phase (baseline, glossary, translation). Needs --identity.
    #[arg(long, requires = "identity")]
    phase: Option<String>,
    /// Remove every entry.
    #[arg(long)]
    all: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigManager::new(&cli.config);
    config
        .load_or_create()
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    init_tracing(config.settings().logging.level);
    config
        .ensure_dirs_exist()
        .context("Failed to create output/cache directories")?;
    let settings = config.settings();

    tracing::debug!("subpipe v{} using {}", subpipe_core::version(), cli.config.display());

    match cli.command {
        Command::CreateJob { user, media, run } => {
            let job = create_job(settings, &Topology::standard(), user, &media)
                .with_context(|| format!("Failed to create job for {}", media.display()))?;
            println!("{}", job.id);
            if run {
                let summary = run_job(&job.job_dir, None, false, cli.verbose)?;
                print_summary(&summary);
            }
        }
        Command::RunJob { job_id } => {
            let job_dir = find_job(settings, &job_id)?;
            let summary = run_job(&job_dir, None, false, cli.verbose)?;
            print_summary(&summary);
        }
        Command::ResumeJob { job_id, force_from } => {
            let job_dir = find_job(settings, &job_id)?;
            let summary = run_job(&job_dir, force_from.as_deref(), true, cli.verbose)?;
            print_summary(&summary);
        }
        Command::Status { job_id } => {
            let job_dir = find_job(settings, &job_id)?;
            print_status(&job_dir)?;
        }
        Command::ListCache => list_cache(settings)?,
        Command::ClearCache(args) => clear_cache(settings, &args)?,
    }

    Ok(())
}

fn run_job(
    job_dir: &Path,
    force_from: Option<&str>,
    resume: bool,
    verbose: bool,
) -> Result<RunSummary> {
    let callback: Option<LogCallback> = if verbose {
        Some(Box::new(|line: &str| println!("{}", line)))
    } else {
        None
    };

    let ctx = JobContext::open(job_dir, callback)
        .with_context(|| format!("Failed to open job {}", job_dir.display()))?;
    let runner = StageRunner::for_snapshot(Topology::standard(), &ctx.snapshot);

    let result = if resume {
        runner.resume(&ctx, force_from)
    } else {
        runner.run(&ctx)
    };
    ctx.logger.close();

    result.with_context(|| format!("See {}", ctx.layout.log_file().display()))
}

fn print_summary(summary: &RunSummary) {
    println!("Job {}: {}", summary.job_id, summary.status);
    let groups = [
        ("already done", &summary.already_done),
        ("executed", &summary.executed),
        ("from cache", &summary.from_cache),
        ("skipped", &summary.skipped),
    ];
    for (label, stages) in groups {
        if !stages.is_empty() {
            println!("  {:<13}{}", format!("{}:", label), stages.join(", "));
        }
    }
}

fn print_status(job_dir: &Path) -> Result<()> {
    let layout = JobLayout::new(job_dir);
    let manifest = PipelineManifest::load(&layout.pipeline_manifest())
        .with_context(|| format!("Failed to read manifest in {}", job_dir.display()))?;

    println!("Job {}: {}", manifest.job_id, manifest.status);
    println!("  created   {}", manifest.created_at.to_rfc3339());
    if let Some(done) = manifest.completed_at {
        println!("  completed {}", done.to_rfc3339());
    }
    println!("  next      {}", manifest.next_stage().unwrap_or("-"));
    println!();
    for name in &manifest.stages {
        let Some(summary) = manifest.summary(name) else {
            continue;
        };
        let notes = summary.notes.as_deref().unwrap_or("");
        let duration = StageManifest::load(&layout.stage_manifest(summary.ordinal, name))
            .ok()
            .and_then(|stage| stage.duration_secs())
            .map(|secs| format!("{:.1}s", secs))
            .unwrap_or_default();
        println!(
            "  {:02} {:<12} {:<8} {:>8} {}",
            summary.ordinal, name, summary.status, duration, notes
        );
    }
    Ok(())
}

fn cache_for(settings: &Settings) -> MediaCacheManager {
    MediaCacheManager::with_decoder_kind(
        settings.paths.cache_root(),
        settings.cache.identity_decoder,
    )
}

fn list_cache(settings: &Settings) -> Result<()> {
    let cache = cache_for(settings);
    let entries = cache.list().context("Failed to list cache")?;
    if entries.is_empty() {
        println!("Cache at {} is empty", cache.root().display());
        return Ok(());
    }

    let mut total = 0;
    for entry in &entries {
        total += entry.total_bytes;
        println!(
            "{} {:<12} {:<20} {:>3} file(s) {:>12} bytes",
            entry.identity.short(),
            entry.phase,
            entry.secondary.as_deref().unwrap_or("-"),
            entry.artifact_count,
            entry.total_bytes
        );
    }
    println!("{} entries, {} bytes", entries.len(), total);
    Ok(())
}

fn clear_cache(settings: &Settings, args: &ClearCacheArgs) -> Result<()> {
    let cache = cache_for(settings);

    if args.all {
        let removed = cache.clear().context("Failed to clear cache")?;
        println!("Removed {} cache identities", removed);
        return Ok(());
    }

    let Some(identity) = &args.identity else {
        bail!("--identity or --all is required");
    };
    let identity = MediaIdentity::parse(identity)?;
    let phase = args
        .phase
        .as_deref()
        .map(str::parse::<CachePhase>)
        .transpose()?;

    if cache.invalidate(&identity, phase)? {
        println!("Removed {}", identity);
    } else {
        println!("Nothing cached for {}", identity);
    }
    Ok(())
}
