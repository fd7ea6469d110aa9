//! Command-line interface for lectern.
//!
//! Provides commands for capturing a transcription session, replaying
//! the offline buffer, inspecting local state, and garbage-collecting
//! synced records.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::adapters::rest::RestRemoteStore;
use crate::adapters::{MemoryRemoteStore, RemoteStore};
use crate::config;
use crate::core::{CaptureConfig, CaptureSession, ConnectivityGate, SyncService};
use crate::domain::{Lecture, SyncEvent, SyncOp};
use crate::store::LocalStore;

/// lectern - Offline-first lecture transcription capture and sync
#[derive(Parser, Debug)]
#[command(name = "lectern")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture a session, reading recognition text line by line from stdin
    Capture {
        /// Lecture id to attach the transcript to
        #[arg(short, long)]
        lecture: String,

        /// User running the capture
        #[arg(short, long, env = "LECTERN_USER")]
        user: String,

        /// Debounce window in seconds (overrides config)
        #[arg(long)]
        debounce: Option<u64>,

        /// Buffer everything locally even if a remote is configured
        #[arg(long)]
        offline: bool,
    },

    /// Create a lecture locally and queue it for sync
    NewLecture {
        /// Display name
        name: String,

        /// Topic / subject
        #[arg(short, long)]
        topic: Option<String>,

        /// Creating user
        #[arg(short, long, env = "LECTERN_USER")]
        user: String,
    },

    /// Replay everything buffered offline to the remote store
    Sync,

    /// Show local buffer and queue statistics
    Status,

    /// Delete synced records older than the retention window
    Gc {
        /// Retention in days (overrides config)
        #[arg(short, long)]
        days: Option<i64>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Capture {
                lecture,
                user,
                debounce,
                offline,
            } => capture(&lecture, &user, debounce, offline).await,
            Commands::NewLecture { name, topic, user } => new_lecture(&name, topic, &user).await,
            Commands::Sync => sync().await,
            Commands::Status => status().await,
            Commands::Gc { days } => gc(days).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Open the configured local store
fn open_store() -> Result<Arc<LocalStore>> {
    let path = config::db_path()?;
    let store = LocalStore::open(&path)
        .with_context(|| format!("Failed to open local store: {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Build the remote store from config. Returns None when no remote is
/// configured, in which case everything stays local.
fn open_remote() -> Result<Option<Arc<dyn RemoteStore>>> {
    let cfg = config::config()?;
    Ok(cfg
        .remote
        .as_ref()
        .map(|rc| Arc::new(RestRemoteStore::new(rc.clone())) as Arc<dyn RemoteStore>))
}

/// Capture a session, feeding stdin lines as cumulative final text
async fn capture(lecture_id: &str, user: &str, debounce: Option<u64>, offline: bool) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store()?;

    let (remote, online) = match open_remote()? {
        Some(remote) if !offline => (remote, true),
        _ => (
            Arc::new(MemoryRemoteStore::new()) as Arc<dyn RemoteStore>,
            false,
        ),
    };

    let gate = Arc::new(ConnectivityGate::new(online));
    let sync = Arc::new(SyncService::new(
        store.clone(),
        remote.clone(),
        cfg.sync.max_retries,
    ));
    sync.add_listener(|event| {
        if let SyncEvent::Completed(report) = event {
            eprintln!("[synced {} of {}]", report.synced, report.total);
        }
    });
    let _trigger = gate.spawn_trigger(store.clone(), sync.clone());

    let mut capture_config = CaptureConfig::new(lecture_id, user);
    capture_config.segmenter = cfg.segmenter.clone();
    if let Some(secs) = debounce {
        capture_config.segmenter.debounce_secs = secs;
    }

    let mut session = CaptureSession::new(
        capture_config,
        store.clone(),
        remote,
        gate.clone(),
        sync.clone(),
    );
    session.start().await?;

    eprintln!("Capturing for lecture {} (Ctrl-D to stop)", lecture_id);

    // Each stdin line extends the cumulative final text, the way a
    // recognition engine grows its result list.
    let mut final_text = String::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if !final_text.is_empty() {
            final_text.push(' ');
        }
        final_text.push_str(&line);
        session.push_update(&final_text, "").await;
    }

    session.stop().await?;

    let pending = session.pending_sync_count()?;
    if pending > 0 {
        eprintln!("{} record(s) pending sync", pending);
        if online {
            sync.reconcile().await?;
        }
    }

    Ok(())
}

/// Create a lecture offline and queue its creation
async fn new_lecture(name: &str, topic: Option<String>, user: &str) -> Result<()> {
    let store = open_store()?;

    let lecture = Lecture::new_offline(name, topic, user);
    store.put_lecture(&lecture)?;
    store.enqueue(&SyncOp::LectureCreate {
        lecture: lecture.clone(),
    })?;

    println!("{}", lecture.id);
    eprintln!("Lecture '{}' created locally. Run 'lectern sync' to push.", name);
    Ok(())
}

/// Replay the offline buffer
async fn sync() -> Result<()> {
    let cfg = config::config()?;
    let store = open_store()?;
    let remote = open_remote()?
        .context("No remote configured. Add a 'remote' section to .lectern/config.yaml")?;

    let sync = SyncService::new(store, remote, cfg.sync.max_retries);
    match sync.reconcile().await? {
        Some(report) => {
            println!(
                "Synced {} of {} ({} error(s))",
                report.synced, report.total, report.errors
            );
            if report.errors > 0 {
                std::process::exit(1);
            }
        }
        None => println!("Sync already in progress"),
    }

    Ok(())
}

/// Show local buffer statistics
async fn status() -> Result<()> {
    let store = open_store()?;
    let stats = store.stats()?;

    println!("Transcriptions: {} ({} unsynced)", stats.transcriptions_total, stats.transcriptions_unsynced);
    println!("Lectures:       {} ({} unsynced)", stats.lectures_total, stats.lectures_unsynced);
    println!("Queue depth:    {}", stats.queue_depth);
    println!("Pending total:  {}", stats.pending());

    Ok(())
}

/// Purge synced records past the retention window
async fn gc(days: Option<i64>) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store()?;

    let days = days.unwrap_or(cfg.sync.retention_days);
    let removed = store.purge_synced(retention_days(days))?;

    println!("Removed {} synced record(s) older than {} day(s)", removed, days);
    Ok(())
}

/// Clamp a day count into a non-negative retention window
fn retention_days(days: i64) -> chrono::Duration {
    chrono::Duration::days(days.max(0))
}

/// Show the resolved configuration (for debugging)
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:  {}", cfg.home.display());
    println!("  Store: {}", cfg.db_path.display());
    println!();
    println!("Segmenter:");
    println!("  Debounce: {}s", cfg.segmenter.debounce_secs);
    println!();
    println!("Sync:");
    println!("  Max retries:    {}", cfg.sync.max_retries);
    println!("  Retention days: {}", cfg.sync.retention_days);
    println!();
    match &cfg.remote {
        Some(remote) => println!("Remote: {}", remote.base_url),
        None => println!("Remote: (not configured - offline only)"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_clamps_negative_days() {
        assert_eq!(retention_days(7), chrono::Duration::days(7));
        assert_eq!(retention_days(0), chrono::Duration::zero());
        assert_eq!(retention_days(-3), chrono::Duration::zero());
    }

    #[test]
    fn test_retention_window_is_accepted_by_the_store() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.purge_synced(retention_days(7)).unwrap(), 0);
    }
}
