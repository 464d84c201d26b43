use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use snapkeep::critical::{self, CopyReport};
use snapkeep::error::{self, RunError, integrity_error, transient_error};
use snapkeep::model::BackupConfig;
use snapkeep::oplog::{self, OpLogEntry};
use snapkeep::rotate;
use snapkeep::store::SnapshotStore;
use snapkeep::verify;
use snapkeep::writer;

#[derive(Parser)]
#[command(name = "snapkeep")]
#[command(version)]
#[command(
    about = "Scheduled snapshot backups with retention, verification and critical-file duplication",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $SNAPKEEP_CONFIG)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write one snapshot and duplicate the critical-file set
    Snapshot {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete snapshots that fall outside the retention policy
    Rotate {
        /// Report what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that a snapshot is a valid restore point
    Verify {
        snapshot_id: String,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy the critical-file set to its destination
    Duplicate,

    /// List complete snapshots, newest first
    List {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        let code = error::exit_code(&err);
        if matches!(error::classify(&err), Some(RunError::LockHeld(_))) {
            // Scheduler overlap, not a failure.
            tracing::info!("{err:#}");
        } else {
            eprintln!("{err:#}");
        }
        std::process::exit(code);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let cfg = BackupConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Snapshot { json } => run_snapshot(&cfg, json),
        Commands::Rotate { dry_run, json } => run_rotate(&cfg, dry_run, json),
        Commands::Verify { snapshot_id, json } => run_verify(&cfg, &snapshot_id, json),
        Commands::Duplicate => run_duplicate(&cfg),
        Commands::List { json } => run_list(&cfg, json),
    }
}

fn run_snapshot(cfg: &BackupConfig, json: bool) -> Result<()> {
    let store = SnapshotStore::open(&cfg.output_dir)?;

    // Duplicator first, so critical files survive even a broken archive run.
    // The two sides are decoupled: a duplicator failure of any kind is folded
    // into the run's result, never a reason to skip the archive. Lock
    // contention on the critical destination is an idempotent skip.
    let (copies, critical_failure) = match critical::duplicate(cfg) {
        Ok(report) if report.failed.is_empty() => (report, None),
        Ok(report) => {
            let detail = format!("critical file copy failed for: {}", report.failed_names());
            (report, Some(detail))
        }
        Err(err) if matches!(error::classify(&err), Some(RunError::LockHeld(_))) => {
            tracing::info!("critical duplication skipped: {err:#}");
            (CopyReport::default(), None)
        }
        Err(err) => {
            tracing::warn!("critical duplication failed: {err:#}");
            (
                CopyReport::default(),
                Some(format!("critical duplication failed: {err:#}")),
            )
        }
    };

    match writer::write_snapshot(cfg, &store, copies.copied.clone()) {
        Ok(manifest) => {
            let ok = critical_failure.is_none();
            let mut entry = OpLogEntry::new("snapshot", if ok { "ok" } else { "error" });
            entry.snapshot_id = Some(manifest.id.to_string());
            entry.bytes = Some(manifest.archive_bytes);
            entry.detail = critical_failure.clone();
            log_run(&cfg.output_dir, entry);

            if json {
                println!("{}", serde_json::to_string_pretty(&manifest)?);
            } else {
                println!(
                    "snapshot {} complete ({} bytes, {} files)",
                    manifest.id, manifest.archive_bytes, manifest.stats.files
                );
            }
            match critical_failure {
                Some(detail) => Err(transient_error(detail)),
                None => Ok(()),
            }
        }
        Err(err) => {
            let mut entry = entry_for_error("snapshot", &err);
            if let Some(extra) = critical_failure {
                entry.detail = Some(match entry.detail.take() {
                    Some(detail) => format!("{detail}; {extra}"),
                    None => extra,
                });
            }
            log_run(&cfg.output_dir, entry);
            Err(err)
        }
    }
}

fn run_rotate(cfg: &BackupConfig, dry_run: bool, json: bool) -> Result<()> {
    let store = SnapshotStore::open(&cfg.output_dir)?;
    match rotate::rotate(&store, &cfg.retention, dry_run) {
        Ok(report) => {
            let summary = format!(
                "kept {}, deleted {}, skipped {}, swept {} manifests and {} temps{}",
                report.kept,
                report.deleted,
                report.skipped,
                report.swept_manifests,
                report.swept_temps,
                if dry_run { " (dry run)" } else { "" }
            );
            let ok = report.skipped == 0;
            let mut entry = OpLogEntry::new("rotate", if ok { "ok" } else { "error" });
            entry.detail = Some(summary.clone());
            log_run(&cfg.output_dir, entry);

            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "kept": report.kept,
                        "deleted": report.deleted,
                        "skipped": report.skipped,
                        "swept_manifests": report.swept_manifests,
                        "swept_temps": report.swept_temps,
                        "dry_run": dry_run,
                    })
                );
            } else {
                println!("{summary}");
            }
            if !ok {
                return Err(transient_error(format!(
                    "{} snapshot(s) could not be deleted this pass",
                    report.skipped
                )));
            }
            Ok(())
        }
        Err(err) => {
            log_run(&cfg.output_dir, entry_for_error("rotate", &err));
            Err(err)
        }
    }
}

fn run_verify(cfg: &BackupConfig, snapshot_id: &str, json: bool) -> Result<()> {
    let store = SnapshotStore::open(&cfg.output_dir)?;
    let report = verify::verify(&store, snapshot_id)?;

    let mut entry = OpLogEntry::new("verify", if report.passed() { "ok" } else { "error" });
    entry.snapshot_id = Some(report.id.to_string());
    entry.bytes = report.archive_bytes;
    if let Some(failure) = &report.failure {
        entry.detail = Some(failure.describe());
    }
    log_run(&cfg.output_dir, entry);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.passed() {
        println!("snapshot {}: ok", report.id);
    }
    match &report.failure {
        None => Ok(()),
        Some(failure) => Err(integrity_error(format!(
            "snapshot {}: {}",
            report.id,
            failure.describe()
        ))),
    }
}

fn run_duplicate(cfg: &BackupConfig) -> Result<()> {
    let report = match critical::duplicate(cfg) {
        Ok(report) => report,
        Err(err) => {
            log_run(&cfg.output_dir, entry_for_error("duplicate", &err));
            return Err(err);
        }
    };

    let ok = report.failed.is_empty();
    let mut entry = OpLogEntry::new("duplicate", if ok { "ok" } else { "error" });
    if !ok {
        entry.detail = Some(format!(
            "critical file copy failed for: {}",
            report.failed_names()
        ));
    }
    log_run(&cfg.output_dir, entry);

    for copy in &report.copied {
        println!("{}  {}", copy.checksum, copy.name);
    }
    if !ok {
        return Err(transient_error(format!(
            "critical file copy failed for: {}",
            report.failed_names()
        )));
    }
    Ok(())
}

fn run_list(cfg: &BackupConfig, json: bool) -> Result<()> {
    let store = SnapshotStore::open(&cfg.output_dir)?;
    let snapshots = store.list_complete()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }
    for m in &snapshots {
        println!(
            "{}  {}  {:>12} bytes  {} files",
            m.id, m.created_at, m.archive_bytes, m.stats.files
        );
    }
    Ok(())
}

fn log_run(output_dir: &Path, entry: OpLogEntry) {
    if let Err(err) = oplog::append(output_dir, &entry) {
        tracing::warn!(error = %err, "could not append to operational log");
    }
}

fn entry_for_error(mode: &'static str, err: &anyhow::Error) -> OpLogEntry {
    let skipped = matches!(error::classify(err), Some(RunError::LockHeld(_)));
    let mut entry = OpLogEntry::new(mode, if skipped { "skipped" } else { "error" });
    entry.detail = Some(format!("{err:#}"));
    entry
}
