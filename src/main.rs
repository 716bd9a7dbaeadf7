mod cache;
mod catalog;
mod cli;
mod composition;
mod config;
mod download;
mod error;
mod explore;
mod feedback;
mod history;
mod learner;
mod orchestrator;
mod palette;
mod platform;
mod prefs;
mod queue;
mod schedule;
mod scoring;
mod vecops;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
