use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "driftwall")]
#[command(version)]
#[command(about = "On-device wallpaper personalization engine: learns your taste, rotates intelligently")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,

    /// Data directory (preferences, history, cache)
    #[arg(short, long, global = true)]
    pub(crate) data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Apply the next wallpaper chosen by the engine
    Next {
        /// Count as a manual change (derives implicit feedback for the
        /// previous wallpaper)
        #[arg(short, long)]
        manual: bool,

        /// Fixed RNG seed for reproducible selection
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Mark the current wallpaper as liked
    Like,
    /// Mark the current wallpaper as disliked
    Dislike,
    /// Fetch the wallpaper catalog manifest
    Sync,
    /// Download the top of the pre-fetch queue
    Download {
        /// Maximum images this run
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Run the rotation daemon
    Daemon,
    /// Show the learned taste model and engine state
    Status,
    /// Show the pre-download queue
    Queue,
    /// Show recent wallpaper history
    History {
        /// Maximum entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Trim history, drop disliked files, prune the queue
    Cleanup,
    /// Forget everything the engine has learned
    Reset {
        /// Skip the confirmation
        #[arg(long)]
        yes: bool,
    },
}
