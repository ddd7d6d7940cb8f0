//! Linkmine CLI - pull shared video links out of the local Messages database
//!
//! Usage: linkmine-cli [OPTIONS] <COMMAND>
//!
//! Supports JSON output for scripting.

use chrono::{Datelike, Local, Timelike, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use linkmine_lib::{
    archive,
    links::{self, service, CandidateSource, LinkExtractor, LinkMatcher},
    output::{self, Summary},
    pipeline::{Pipeline, PipelineOptions},
    settings::{self, Lookback, Settings},
    store::{self, MessageStore, SenderFilter},
    timestamp,
};
use std::io::Write;
use std::path::{Path, PathBuf};

// ============================================================================
// Logging Infrastructure
// ============================================================================

use std::fs::{self, File, OpenOptions};
use std::sync::Mutex;

static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

const LOG_PREFIX: &str = "linkmine-";
const LOG_RETENTION_DAYS: i64 = 7;

/// Initialize logging - creates log file and cleans old logs
fn init_logging() -> Option<PathBuf> {
    let log_dir = dirs::data_dir()
        .map(|p| p.join(settings::APP_DIR).join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));

    if fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    // Clean logs older than a week
    if let Ok(entries) = fs::read_dir(&log_dir) {
        let cutoff = (Local::now() - chrono::Duration::days(LOG_RETENTION_DAYS)).date_naive();
        for entry in entries.flatten() {
            let path = entry.path();
            let date = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(LOG_PREFIX))
                .and_then(|n| n.strip_suffix(".log"))
                .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
            if matches!(date, Some(d) if d < cutoff) {
                let _ = fs::remove_file(&path);
            }
        }
    }

    // Create today's log file
    let today = Local::now();
    let log_filename = format!("{}{:04}-{:02}-{:02}.log", LOG_PREFIX, today.year(), today.month(), today.day());
    let log_path = log_dir.join(&log_filename);

    let file = OpenOptions::new().create(true).append(true).open(&log_path).ok()?;
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }
    Some(log_path)
}

/// Diagnostics from the library go to stderr through `tracing`.
fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("LINKMINE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn write_log_line(level: &str, msg: &str) {
    let now = Local::now();
    let timestamp = format!("[{:02}:{:02}:{:02}]", now.hour(), now.minute(), now.second());
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(ref mut file) = *guard {
            let _ = writeln!(file, "{} {}{}", timestamp, level, msg);
        }
    }
}

/// Log to both terminal and file
fn log_both(msg: &str) {
    println!("{}", msg);
    write_log_line("", msg);
}

/// Log error to both terminal and file
fn elog_both(msg: &str) {
    eprintln!("{}", msg);
    write_log_line("[ERROR] ", msg);
}

/// Macro for logging to both terminal and file
macro_rules! log {
    ($($arg:tt)*) => {
        log_both(&format!($($arg)*))
    };
}

/// Macro for error logging to both terminal and file
macro_rules! elog {
    ($($arg:tt)*) => {
        elog_both(&format!($($arg)*))
    };
}

// ============================================================================
// Main CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "linkmine-cli")]
#[command(version, about = "Extract shared video links from Messages", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Message database path (default: ~/Library/Messages/chat.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Detailed logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan recent messages and write the deduplicated link list
    Extract {
        /// How far back to look, e.g. 60d, 12h, 2w (default from settings)
        #[arg(long, short)]
        lookback: Option<Lookback>,
        /// Only messages from this handle; "me" for your own messages
        #[arg(long)]
        from: Option<String>,
        /// Output JSON file
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Link service profile (tiktok, instagram)
        #[arg(long)]
        service: Option<String>,
        /// Also scan attributed bodies that fail to decode as raw text
        #[arg(long)]
        scan_raw_blobs: bool,
        /// Process rows on all cores
        #[arg(long)]
        parallel: bool,
    },
    /// Decode an archived attributed body and print its object graph
    Decode {
        /// File holding the raw blob bytes
        path: PathBuf,
        /// Link service profile used to report links
        #[arg(long)]
        service: Option<String>,
    },
    /// Show how a piece of text is matched and canonicalized
    Normalize {
        /// Text to scan
        text: String,
        /// Link service profile
        #[arg(long)]
        service: Option<String>,
    },
    /// Settings management
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// List all settings
    List,
    /// Get a setting value
    Get {
        /// Setting key
        key: String,
    },
    /// Set a setting value
    Set {
        /// Setting key
        key: String,
        /// Setting value
        value: String,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);
    if let Some(log_path) = init_logging() {
        if cli.verbose {
            eprintln!("Logging to: {}", log_path.display());
        }
    }

    if let Err(e) = run_cli(cli) {
        elog!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<(), String> {
    // Handle completions first (no settings needed)
    if let Commands::Completions { shell } = &cli.command {
        generate(*shell, &mut Cli::command(), "linkmine-cli", &mut std::io::stdout());
        return Ok(());
    }

    let settings_path = settings::default_settings_path();
    let settings = Settings::load(&settings_path);

    match cli.command {
        Commands::Extract { lookback, from, output, service, scan_raw_blobs, parallel } => {
            let run = ExtractRun {
                lookback: lookback.unwrap_or(settings.lookback),
                from: from.or_else(|| settings.from_sender.clone()),
                output: output.unwrap_or_else(|| PathBuf::from(&settings.output_path)),
                service: service.unwrap_or_else(|| settings.service.clone()),
                db: cli
                    .db
                    .or_else(|| settings.db_path.as_ref().map(PathBuf::from))
                    .unwrap_or_else(store::default_db_path),
                scan_raw_blobs: scan_raw_blobs || settings.scan_raw_blobs,
                parallel: parallel || settings.parallel,
            };
            handle_extract(run, cli.json)
        }
        Commands::Decode { path, service } => {
            let matcher = matcher_for(service.as_deref().unwrap_or(&settings.service))?;
            handle_decode(&path, &matcher, cli.json)
        }
        Commands::Normalize { text, service } => {
            let matcher = matcher_for(service.as_deref().unwrap_or(&settings.service))?;
            handle_normalize(&text, &matcher, cli.json)
        }
        Commands::Config { cmd } => handle_config(cmd, settings, &settings_path, cli.json),
        Commands::Completions { .. } => unreachable!(),
    }
}

fn matcher_for(name: &str) -> Result<LinkMatcher, String> {
    let profile = service::by_name(name).ok_or_else(|| {
        let known: Vec<&str> = service::SERVICES.iter().map(|s| s.name).collect();
        format!("Unknown service '{}' (known: {})", name, known.join(", "))
    })?;
    Ok(LinkMatcher::new(profile))
}

// ============================================================================
// Extract
// ============================================================================

struct ExtractRun {
    lookback: Lookback,
    from: Option<String>,
    output: PathBuf,
    service: String,
    db: PathBuf,
    scan_raw_blobs: bool,
    parallel: bool,
}

fn handle_extract(run: ExtractRun, json: bool) -> Result<(), String> {
    let matcher = matcher_for(&run.service)?;
    let filter = run.from.as_deref().and_then(SenderFilter::parse);

    let since = run.lookback.cutoff(Utc::now());
    let cutoff = timestamp::to_store_nanos(since);

    tracing::debug!(db = %run.db.display(), %since, "opening message store");
    let store = MessageStore::open(&run.db).map_err(|e| e.to_string())?;
    let rows = store
        .fetch_rows(cutoff, filter.as_ref())
        .map_err(|e| e.to_string())?;

    if !json {
        let who = match &filter {
            Some(SenderFilter::Me) => " from you".to_string(),
            Some(SenderFilter::Handle(h)) => format!(" from {}", h),
            None => String::new(),
        };
        log!("Found {} messages{} in the last {}", rows.len(), who, run.lookback);
    }

    let pipeline = Pipeline::new(matcher, PipelineOptions { scan_raw_blobs: run.scan_raw_blobs });
    let (registry, stats) = if run.parallel {
        pipeline.run_parallel(&rows)
    } else {
        pipeline.run(&rows)
    };

    let records = output::to_records(&registry.snapshot());
    output::write_json(&run.output, &records).map_err(|e| e.to_string())?;
    let summary = Summary::from_records(&records);

    if json {
        let report = serde_json::json!({
            "output": run.output.display().to_string(),
            "summary": summary,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?);
        return Ok(());
    }

    log!("Saved {} links to {}", records.len(), run.output.display());
    if stats.blobs_failed > 0 {
        elog!("Skipped {} attributed bodies that could not be decoded", stats.blobs_failed);
    }
    if stats.rows_skipped_timestamp > 0 {
        elog!("Skipped {} messages with unusable timestamps", stats.rows_skipped_timestamp);
    }
    for line in summary.lines() {
        log!("{}", line);
    }
    Ok(())
}

// ============================================================================
// Debug commands
// ============================================================================

fn handle_decode(path: &Path, matcher: &LinkMatcher, json: bool) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    if !archive::looks_like_archive(&bytes) {
        tracing::warn!(
            path = %path.display(),
            "no bplist00 header; typedstream bodies need --scan-raw-blobs during extract"
        );
    }
    let decoded = archive::decode(&bytes).map_err(|e| format!("{}: {}", path.display(), e))?;
    let found = LinkExtractor::new(matcher).extract_archive(&decoded);

    if json {
        let report = serde_json::json!({
            "archive": decoded,
            "links": found,
        });
        println!("{}", serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?);
    } else {
        let graph = serde_json::to_string_pretty(&decoded).map_err(|e| e.to_string())?;
        println!("{}", graph);
        println!();
        println!("{} objects, {} links", decoded.objects.len(), found.len());
        for url in &found {
            println!("  {}", url);
        }
    }
    Ok(())
}

fn handle_normalize(text: &str, matcher: &LinkMatcher, json: bool) -> Result<(), String> {
    let cleaned = links::strip_noise(text);
    let candidates = matcher.find_candidates(&cleaned, CandidateSource::PlainText);

    if json {
        let items: Vec<serde_json::Value> = candidates
            .iter()
            .map(|c| {
                serde_json::json!({
                    "candidate": c.text,
                    "start": c.start,
                    "end": c.end,
                    "shape": c.shape,
                    "canonical": links::normalize(matcher, &c.text),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items).map_err(|e| e.to_string())?);
        return Ok(());
    }

    if candidates.is_empty() {
        println!("No {} links found", matcher.profile().name);
        return Ok(());
    }
    for c in &candidates {
        let canonical = links::normalize(matcher, &c.text);
        println!(
            "{:?} {} -> {}",
            c.shape,
            c.text,
            canonical.as_deref().unwrap_or("(rejected)")
        );
    }
    Ok(())
}

// ============================================================================
// Config
// ============================================================================

fn handle_config(cmd: ConfigCommands, mut settings: Settings, path: &Path, json: bool) -> Result<(), String> {
    let as_map = |s: &Settings| -> Result<serde_json::Map<String, serde_json::Value>, String> {
        match serde_json::to_value(s).map_err(|e| e.to_string())? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err("Settings did not serialize to an object".to_string()),
        }
    };
    let display = |key: &str, value: &serde_json::Value| -> String {
        match (key, value) {
            ("lookback", _) => settings_lookback(value),
            (_, serde_json::Value::Null) => "not set".to_string(),
            (_, serde_json::Value::String(s)) => s.clone(),
            (_, other) => other.to_string(),
        }
    };

    match cmd {
        ConfigCommands::List => {
            if json {
                println!("{}", serde_json::to_string_pretty(&settings).map_err(|e| e.to_string())?);
            } else {
                println!("settings-file:  {}", path.display());
                for (key, value) in as_map(&settings)? {
                    println!("{:<15} {}", format!("{}:", key), display(&key, &value));
                }
            }
        }
        ConfigCommands::Get { key } => {
            let map = as_map(&settings)?;
            let value = map.get(&key).ok_or_else(|| format!("Unknown config key: {}", key))?;
            if json {
                let mut single = serde_json::Map::new();
                single.insert(key.clone(), value.clone());
                println!("{}", serde_json::Value::Object(single));
            } else {
                println!("{}", display(&key, value));
            }
        }
        ConfigCommands::Set { key, value } => {
            settings.set(&key, &value)?;
            settings.save(path)?;
            if !json {
                log!("Set {} in {}", key, path.display());
            }
        }
    }
    Ok(())
}

fn settings_lookback(value: &serde_json::Value) -> String {
    serde_json::from_value::<Lookback>(value.clone())
        .map(|l| l.to_string())
        .unwrap_or_else(|_| value.to_string())
}
