use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use fieldops_core::JobType;
use fieldops_storage::{EventFilter, PgStore};
use fieldops_sync::{AppConfig, FieldOps, ImportRunSummary};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "fieldops-cli")]
#[command(about = "Calendar import, review and inspector assignment")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one import batch for a calendar, or for every configured calendar.
    Import {
        #[arg(long)]
        calendar: Option<String>,
    },
    /// Run imports on the configured cron until interrupted.
    Schedule,
    /// Serve the operator API.
    Serve,
    Migrate,
    /// Load builders, abbreviations and inspector preferences into postgres.
    Seed {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Summarise the most recent import reports.
    Report {
        #[arg(long, default_value_t = 10)]
        runs: usize,
    },
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },
}

#[derive(Debug, Subcommand)]
enum ReviewAction {
    List {
        #[arg(long)]
        min_confidence: Option<u8>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Approve {
        id: Uuid,
        #[arg(long)]
        builder: Uuid,
        #[arg(long)]
        job_type: Option<String>,
        #[arg(long, default_value = "cli")]
        reviewer: String,
    },
    Reject {
        id: Uuid,
        #[arg(long)]
        reason: String,
        #[arg(long, default_value = "cli")]
        reviewer: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Import { calendar: None }) {
        Commands::Import { calendar } => {
            let summaries = fieldops_sync::run_import_once_from_env(calendar.as_deref()).await?;
            for summary in &summaries {
                print_summary(summary);
            }
        }
        Commands::Schedule => {
            let ops = FieldOps::from_env().await?;
            let Some(sched) = ops.pipeline.maybe_build_scheduler(&ops.config).await? else {
                bail!("scheduler is disabled; set FIELDOPS_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %ops.config.import_cron, calendars = ops.config.calendars.len(), "scheduler running");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            let mut sched = sched;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Serve => {
            let ops = FieldOps::from_env().await?;
            let sched = ops.pipeline.maybe_build_scheduler(&ops.config).await?;
            if let Some(sched) = &sched {
                sched.start().await.context("starting scheduler")?;
            }
            fieldops_web::serve(ops).await?;
        }
        Commands::Migrate => {
            let store = connect_pg().await?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Seed { file } => {
            let config = AppConfig::from_env()?;
            let path = file.unwrap_or(config.seed_path);
            let seed = fieldops_sync::load_seed(&path)?;
            let store = connect_pg().await?;
            store.apply_seed(&seed).await.context("applying seed")?;
            println!(
                "seed applied: builders={} abbreviations={} inspectors={}",
                seed.builders.len(),
                seed.abbreviations.len(),
                seed.inspectors.len()
            );
        }
        Commands::Report { runs } => {
            let config = AppConfig::from_env()?;
            let markdown = fieldops_sync::report_recent_imports_markdown(runs, &config.reports_dir)?;
            println!("{markdown}");
        }
        Commands::Review { action } => run_review(action).await?,
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}

async fn connect_pg() -> Result<PgStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        bail!("DATABASE_URL is required");
    };
    PgStore::connect(&url).await.context("connecting to postgres")
}

async fn run_review(action: ReviewAction) -> Result<()> {
    let ops = FieldOps::from_env().await?;
    match action {
        ReviewAction::List {
            min_confidence,
            limit,
        } => {
            let page = ops
                .review
                .list(&EventFilter {
                    status: Some(fieldops_core::EventStatus::Pending),
                    min_confidence,
                    limit,
                    ..EventFilter::default()
                })
                .await?;
            println!("{} pending", page.total);
            for event in page.items {
                println!(
                    "{}  {:>3}  {}  {}",
                    event.id,
                    event.confidence,
                    event.start_at.format("%Y-%m-%d %H:%M"),
                    event.title
                );
            }
        }
        ReviewAction::Approve {
            id,
            builder,
            job_type,
            reviewer,
        } => {
            let job_type = job_type.map(|raw| raw.parse::<JobType>()).transpose()?;
            let outcome = ops
                .review
                .approve(id, builder, job_type, &reviewer, Utc::now())
                .await?;
            println!("approved {} -> job {}", outcome.event.id, outcome.job.id);
            println!("{}", serde_json::to_string_pretty(&outcome.job)?);
        }
        ReviewAction::Reject {
            id,
            reason,
            reviewer,
        } => {
            let event = ops.review.reject(id, &reason, &reviewer, Utc::now()).await?;
            println!("rejected {}", event.id);
        }
    }
    Ok(())
}

fn print_summary(summary: &ImportRunSummary) {
    let c = &summary.log.counters;
    println!(
        "import complete: calendar={} run_id={} processed={} jobs_created={} queued={} rejected={} duplicates={} errored={} assigned={} unassigned={}",
        summary.log.calendar_id,
        summary.run_id,
        c.events_processed,
        c.jobs_created,
        c.events_queued,
        c.events_rejected,
        c.duplicates,
        c.events_errored,
        c.jobs_assigned,
        c.jobs_unassigned
    );
    if let Some(err) = &summary.log.error {
        println!("  error: {err}");
    }
    if let Some(dir) = &summary.report_dir {
        println!("  report: {}", dir.display());
    }
}
