mod prompt;

use anyhow::{Context, Result};
use clap::Parser;
use clobsync_lib::cli::commands::{Cli, Commands};
use clobsync_lib::operations::{SyncAction, SyncOutcome};
use clobsync_lib::orchestrator::RemoteIndex;
use clobsync_lib::presence::build_views;
use clobsync_lib::session::start_orchestrator;
use clobsync_lib::watch::WatchedDirectory;
use clobsync_lib::{
    BackupStore, MappingResolver, RowStore, SessionConfig, SqliteRowStore, SyncSession,
};
use env_logger::Env;
use log::{info, warn};
use prompt::TerminalListener;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger with specified or default log level
    let env = match cli.log_level {
        Some(ref log_level) => Env::default().filter_or("RUST_LOG", log_level),
        None => Env::default().filter_or("RUST_LOG", "info"),
    };
    env_logger::init_from_env(env);

    let config = SessionConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration {:?}", cli.config))?;

    match cli.command {
        Commands::Watch => cmd_watch(&config)?,
        Commands::Push { file } => cmd_request(&config, &file, SyncAction::Push)?,
        Commands::Insert { file } => cmd_request(&config, &file, SyncAction::Insert)?,
        Commands::Download { file } => cmd_request(&config, &file, SyncAction::Download)?,
        Commands::Status { directory } => cmd_status(&config, directory.as_deref())?,
        Commands::Backups { file } => cmd_backups(&config, &file)?,
        Commands::Restore {
            file,
            number,
            force,
        } => cmd_restore(&config, &file, number, force)?,
        Commands::Purge { older_than_days } => cmd_purge(&config, older_than_days)?,
    }

    Ok(())
}

fn open_store(config: &SessionConfig) -> Result<Arc<SqliteRowStore>> {
    let database = config
        .database
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("No database configured (set `database` in the configuration)"))?;
    let store = SqliteRowStore::open(database)
        .with_context(|| format!("Failed to open database {:?}", database))?;
    store.set_busy_timeout(config.io_timeout())?;
    for (schema, path) in &config.schemas {
        store
            .attach_schema(schema, path)
            .with_context(|| format!("Failed to attach {:?} as schema {}", path, schema))?;
    }
    Ok(Arc::new(store))
}

fn open_backups(config: &SessionConfig) -> Result<BackupStore> {
    BackupStore::open(&config.backup_dir(), &config.root, &config.connection)
        .with_context(|| format!("Failed to open backup store for {:?}", config.root))
}

/// Absolute path for a file argument. The file itself may not exist yet.
fn absolute_file(file: &Path) -> Result<PathBuf> {
    let absolute = if file.is_absolute() {
        file.to_path_buf()
    } else {
        std::env::current_dir()?.join(file)
    };
    let name = absolute
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Not a file path: {:?}", file))?;
    let parent = absolute.parent().unwrap_or_else(|| Path::new("/"));
    let parent = std::fs::canonicalize(parent)
        .with_context(|| format!("Directory does not exist: {:?}", parent))?;
    Ok(parent.join(name))
}

/// Watch the configured root until Ctrl-C
fn cmd_watch(config: &SessionConfig) -> Result<()> {
    let store = open_store(config)?;
    let listener = Arc::new(TerminalListener::new());
    let mut session = SyncSession::open(config, store, listener)
        .with_context(|| format!("Failed to start watching {:?}", config.root))?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, stopping");
        flag.store(false, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    println!("✓ Watching '{}'", session.root().display());
    println!("  Connection: {}", config.connection);
    println!("  Rules: {}", config.rules.len());
    println!("  Press Ctrl+C to stop");

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    session.close();
    println!("✓ Stopped watching '{}'", session.root().display());
    Ok(())
}

/// Run one explicit push/insert/download and wait for it
fn cmd_request(config: &SessionConfig, file: &Path, action: SyncAction) -> Result<()> {
    let path = absolute_file(file)?;
    let store = open_store(config)?;
    let listener = Arc::new(TerminalListener::new());
    let (mut orchestrator, _backups, purge) = start_orchestrator(config, &config.root, store, listener)
        .with_context(|| format!("Failed to start sync for {:?}", config.root))?;

    let report = orchestrator
        .run(path.clone(), action)
        .ok_or_else(|| anyhow::anyhow!("Request for {:?} was cancelled", path))?;
    orchestrator.shutdown();
    if purge.join().is_err() {
        warn!("Backup purge thread panicked");
    }

    if let Some(backup) = &report.backup {
        println!("  Backup: {}", backup.location.display());
    }
    match &report.outcome {
        SyncOutcome::Failed { .. } => Err(anyhow::anyhow!("{}: {}", path.display(), report.outcome)),
        outcome => {
            println!("✓ {}: {}", path.display(), outcome);
            Ok(())
        }
    }
}

/// Show presence of mapped files
fn cmd_status(config: &SessionConfig, directory: Option<&Path>) -> Result<()> {
    let store = open_store(config)?;
    let root = std::fs::canonicalize(&config.root)
        .with_context(|| format!("Root does not exist: {:?}", config.root))?;
    let filter = directory
        .map(|d| std::fs::canonicalize(d).with_context(|| format!("Directory does not exist: {:?}", d)))
        .transpose()?;

    let tree = WatchedDirectory::scan(&root)?;
    let resolver = MappingResolver::new(&root, Arc::new(config.rules.clone()));
    let store: Arc<dyn RowStore> = store;
    let index = RemoteIndex::new(store, config.io_timeout());
    let views = build_views(&tree, &resolver, &index)?;

    println!("Status of '{}' ({})", root.display(), config.connection);
    let mut shown = 0;
    for view in &views {
        if let Some(dir) = &filter {
            if !view.path.starts_with(dir) {
                continue;
            }
        }
        let rel = view.path.strip_prefix(&root).unwrap_or(view.path.as_path());
        let table = view
            .record
            .as_ref()
            .map(|r| r.table.as_str())
            .unwrap_or("-");
        let mut actions = Vec::new();
        if view.can_update() {
            actions.push("push");
        }
        if view.can_insert() {
            actions.push("insert");
        }
        if view.can_download() {
            actions.push("download");
        }
        println!(
            "  {:<11} {:<40} {:<24} {}",
            format!("{:?}", view.presence),
            rel.display(),
            table,
            actions.join(",")
        );
        shown += 1;
    }
    println!("{} file(s)", shown);
    Ok(())
}

/// List backups of a file
fn cmd_backups(config: &SessionConfig, file: &Path) -> Result<()> {
    let path = absolute_file(file)?;
    let backups = open_backups(config)?;
    let list = backups.list_backups(&path)?;

    if list.is_empty() {
        println!("No backups of '{}'", path.display());
        return Ok(());
    }
    println!("Backups of '{}' (newest first):", path.display());
    for (i, backup) in list.iter().enumerate() {
        let size = std::fs::metadata(&backup.location).map(|m| m.len()).unwrap_or(0);
        println!(
            "  {:>3}  {}  {:>8} bytes",
            i + 1,
            backup.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            size
        );
    }
    Ok(())
}

/// Restore a file from a numbered backup
fn cmd_restore(config: &SessionConfig, file: &Path, number: usize, force: bool) -> Result<()> {
    let path = absolute_file(file)?;
    let backups = open_backups(config)?;
    let list = backups.list_backups(&path)?;

    let backup = number
        .checked_sub(1)
        .and_then(|i| list.get(i))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No backup #{} of {:?} ({} available)",
                number,
                path,
                list.len()
            )
        })?;

    if !force && path.exists() {
        print!(
            "Overwrite '{}' with the backup from {}? [y/N] ",
            path.display(),
            backup.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted");
            return Ok(());
        }
    }

    // The current content becomes a backup itself
    if path.exists() {
        backups.snapshot(&path)?;
    }
    backups.restore(backup, &path)?;
    println!("✓ Restored '{}'", path.display());
    Ok(())
}

/// Remove expired backups
fn cmd_purge(config: &SessionConfig, older_than_days: Option<u64>) -> Result<()> {
    let backups = open_backups(config)?;
    let lifetime = match older_than_days {
        Some(days) => Duration::from_secs(days * 24 * 60 * 60),
        None => config.backup_lifetime(),
    };
    let removed = backups.purge(lifetime)?;
    println!("✓ Removed {} backup(s)", removed);
    Ok(())
}
