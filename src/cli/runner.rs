use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::{Cli, Commands};
use crate::config::Config;
use crate::download::DownloadProgress;
use crate::orchestrator::{ApplyOutcome, Orchestrator};
use crate::platform::{
    CommandSetter, DesktopStatus, FileImageDecoder, KmeansPaletteExtractor, SystemClock,
};
use crate::prefs::Feedback;
use crate::schedule::{RotationInterval, Scheduler};

pub(crate) async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(Config::default_data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let config = Config::load(&data_dir)?;

    let orchestrator = Arc::new(Orchestrator::open(
        data_dir.clone(),
        config.clone(),
        Arc::new(CommandSetter::new(config.setter.command.clone())),
        Arc::new(FileImageDecoder),
        Arc::new(KmeansPaletteExtractor),
        Arc::new(DesktopStatus::default()),
        Arc::new(SystemClock),
    )?);

    match cli.command {
        Some(Commands::Next { manual, seed }) => {
            cmd_next(&orchestrator, manual, seed).await?;
        }
        Some(Commands::Like) => {
            let id = orchestrator.rate_current(Feedback::Like).await?;
            println!("Liked {id}");
        }
        Some(Commands::Dislike) => {
            let id = orchestrator.rate_current(Feedback::Dislike).await?;
            println!("Disliked {id}");
        }
        Some(Commands::Sync) => {
            let count = orchestrator.refresh_catalog().await?;
            println!("Catalog synced: {count} wallpapers");
        }
        Some(Commands::Download { limit }) => {
            cmd_download(&orchestrator, limit).await?;
        }
        Some(Commands::Daemon) => {
            cmd_daemon(orchestrator, &config).await?;
        }
        Some(Commands::Status) | None => {
            cmd_status(&orchestrator).await;
        }
        Some(Commands::Queue) => {
            cmd_queue(&orchestrator).await;
        }
        Some(Commands::History { limit }) => {
            for (id, applied_at, feedback) in orchestrator.history_summary(limit).await {
                let mark = match feedback {
                    Some(Feedback::Like) => " +",
                    Some(Feedback::Dislike) => " -",
                    None => "",
                };
                println!("{applied_at}  {id}{mark}");
            }
        }
        Some(Commands::Cleanup) => {
            let report = orchestrator.cleanup().await?;
            println!(
                "Cleanup: {} history rows trimmed, {} files removed, {} queue rows dropped",
                report.history_trimmed, report.files_removed, report.queue_dropped
            );
        }
        Some(Commands::Reset { yes }) => {
            if !yes {
                anyhow::bail!("refusing to reset without --yes");
            }
            orchestrator.reset_all().await?;
            println!("Preferences reset");
        }
    }

    Ok(())
}

async fn cmd_next(
    orchestrator: &Arc<Orchestrator>,
    manual: bool,
    seed: Option<u64>,
) -> Result<()> {
    let cancel = AtomicBool::new(false);
    let outcome = match seed {
        Some(seed) => orchestrator.apply_next_seeded(manual, &cancel, seed).await,
        None => orchestrator.apply_next(manual, &cancel).await,
    }?;
    match outcome {
        ApplyOutcome::Applied {
            wallpaper_id,
            reason,
            ..
        } => println!("Applied {wallpaper_id} ({})", reason.name()),
        ApplyOutcome::NothingToDo => println!("Nothing to apply (catalog empty or queue busy)"),
    }
    Ok(())
}

async fn cmd_download(orchestrator: &Arc<Orchestrator>, limit: usize) -> Result<()> {
    let (tx, mut rx) = watch::channel(DownloadProgress::default());
    let cancel = Arc::new(AtomicBool::new(false));

    let bar = ProgressBar::new(limit as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let bar_task = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let p = *rx.borrow();
                bar.set_length(p.total as u64);
                bar.set_position((p.downloaded + p.failed) as u64);
                if p.failed > 0 {
                    bar.set_message(format!("{} failed", p.failed));
                }
            }
        })
    };

    let report = orchestrator.batch_download(limit, &cancel, Some(&tx)).await?;
    drop(tx);
    let _ = bar_task.await;
    bar.finish_and_clear();

    println!(
        "Downloaded {} wallpapers ({} failed)",
        report.downloaded.len(),
        report.failed.len()
    );
    Ok(())
}

async fn cmd_daemon(orchestrator: Arc<Orchestrator>, config: &Config) -> Result<()> {
    let rotation =
        RotationInterval::from_config(&config.rotation.interval, &config.rotation.daily_time);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let scheduler = Scheduler::new(
        orchestrator,
        Arc::new(DesktopStatus::default()),
        rotation,
        shutdown_rx,
    );
    scheduler.run().await
}

async fn cmd_status(orchestrator: &Arc<Orchestrator>) {
    let catalog = orchestrator.catalog();
    let prefs = orchestrator.store().snapshot();
    let (queue_total, queue_pending) = orchestrator.queue_stats().await;

    println!("driftwall status");
    println!(
        "  catalog:   {} wallpapers, {} categories (model {})",
        catalog.len(),
        catalog.categories().len(),
        catalog.model_version
    );
    println!("  feedback:  {} events", prefs.user.feedback_count);
    println!(
        "  taste:     {} dims, epsilon {:.2}, mode {:?}",
        prefs.user.taste.len(),
        prefs.user.epsilon,
        prefs.user.mode
    );
    println!(
        "  liked:     {} / disliked: {}",
        prefs.user.liked.len(),
        prefs.user.disliked.len()
    );

    if let Some(favorite) = prefs.favorite_category() {
        println!("  category:  {favorite}");
    }
    let palette = prefs.preferred_palette(5);
    if !palette.is_empty() {
        println!("  colors:    {}", palette.join(" "));
    }
    let tendencies = prefs.composition.tendencies();
    if !tendencies.is_empty() {
        println!("  leans:     {}", tendencies.join(", "));
    }

    println!("  queue:     {queue_total} items ({queue_pending} pending)");
    println!(
        "  cache:     {:.1} MiB of {:.0} MiB",
        orchestrator.cache().total_bytes() as f64 / (1024.0 * 1024.0),
        orchestrator.cache().budget_bytes() as f64 / (1024.0 * 1024.0)
    );
    println!("  last sync: {}", orchestrator.last_sync_ts());
}

async fn cmd_queue(orchestrator: &Arc<Orchestrator>) {
    let (total, pending) = orchestrator.queue_stats().await;
    println!("queue: {total} items, {pending} pending");
    for (id, priority, downloaded, retries) in orchestrator.queue_preview(20).await {
        let state = if downloaded {
            "done"
        } else if retries >= crate::queue::MAX_RETRIES {
            "failed"
        } else {
            "pending"
        };
        println!("  {priority:.2}  {id}  [{state}]");
    }
}
