//! Chat Bridge - decode and relay captured chat library traffic.
//!
//! Replays HTTP exchanges recorded from a chat web app through an interceptor
//! that decodes its positional-array responses into typed records, delivers
//! them over an event bridge, and applies them to a local `SQLite` store.
//! Library scans reconcile the rendered list with the captured listing
//! traffic, and the store can be moved around as a chunked frame file.
//!
//!   chat-bridge replay capture.jsonl          # Apply chats and prompt changes
//!   chat-bridge scan dom.json capture.jsonl   # Reconcile a library walk
//!   chat-bridge decode chat body.txt          # Try one decoder on one body
//!   chat-bridge export library.frames         # Store → frame file
//!   chat-bridge import library.frames         # Frame file → store

mod application;
mod cli;
mod domain;
mod infrastructure;

use std::path::Path;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use application::{
    channel, format_json, format_merged_table, format_records_markdown, format_records_table,
    format_replay_stats, format_stored_table, import_frames, run_scan, ApplyStats,
    BridgeListener, ChunkedSender, CollectingHandler, EndpointCategory, InterceptStats,
    Interceptor, Notifier, OutputFormat, RecordHandler, RecordStore, StoreApplier, APPLIED_KINDS,
};
use cli::{Cli, Commands, ConfigAction};
use domain::{AppConfig, AppError, Body, DomainRecord, RawExchange};
use infrastructure::{
    ensure_config_exists, load_config, read_capture, read_dom_snapshot, read_frames,
    render_config, FrameFileWriter, LocalStore, ReplayDomDriver,
};

fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);
    install_panic_hook();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main application logic.
fn run(cli: Cli) -> domain::Result<()> {
    let format = cli
        .output_format()
        .map_err(|e| AppError::Config { message: e })?;

    if let Commands::Config {
        action: ConfigAction::Init,
    } = cli.command
    {
        return cmd_config_init();
    }

    let config = load_config()?;

    match cli.command {
        Commands::Decode {
            category,
            body,
            request,
        } => cmd_decode(category, &body, request.as_deref(), format)?,
        Commands::Replay { capture, dry_run } => cmd_replay(&config, &capture, dry_run, format)?,
        Commands::Scan {
            dom,
            capture,
            dry_run,
        } => cmd_scan(&config, &dom, &capture, dry_run, format)?,
        Commands::Export { output, frame_size } => cmd_export(&config, &output, frame_size)?,
        Commands::Import { input } => cmd_import(&config, &input)?,
        Commands::List { limit } => cmd_list(&config, limit, format)?,
        Commands::Config { action } => match action {
            ConfigAction::Init => cmd_config_init()?,
            ConfigAction::Show => println!("{}", render_config(&config)?),
        },
    }

    Ok(())
}

/// Surfaces the "integration may be out of date" notice on the terminal.
struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, message: &str) {
        eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
    }
}

fn open_store(config: &AppConfig, dry_run: bool) -> domain::Result<LocalStore> {
    if dry_run {
        tracing::info!("Dry run, using an in-memory store");
        LocalStore::open_in_memory()
    } else {
        LocalStore::open(&config.store_db_path())
    }
}

fn print_records(records: &[DomainRecord], format: OutputFormat) -> domain::Result<()> {
    let output = match format {
        OutputFormat::Markdown => format_records_markdown(records),
        OutputFormat::Json => format_json(records).map_err(AppError::json_parse)?,
        OutputFormat::Table => format_records_table(records),
    };
    println!("{output}");
    Ok(())
}

/// Decode one body with the decoder for `category`.
fn cmd_decode(
    category: EndpointCategory,
    body_path: &Path,
    request_path: Option<&Path>,
    format: OutputFormat,
) -> domain::Result<()> {
    let read = |path: &Path| {
        std::fs::read_to_string(path)
            .map_err(|e| AppError::io(format!("Failed to read {}", path.display()), e))
    };

    let exchange = RawExchange {
        method: "POST".to_string(),
        url: String::new(),
        request_body: request_path.map(read).transpose()?.map(Body::Text).unwrap_or_default(),
        status: 200,
        response_body: Body::Text(read(body_path)?),
    };

    let records =
        application::decode_exchange(category, &exchange).map_err(|e| AppError::InvalidData {
            message: format!("{category} decoder: {e}"),
        })?;

    if records.is_empty() {
        println!(
            "{} Body does not have the shape the {} decoder expects",
            "∅".yellow().bold(),
            category
        );
        return Ok(());
    }

    print_records(&records, format)
}

/// Pushes every exchange through the interceptor and hands what the
/// listener accepts to `handler`.
fn replay_into<N: Notifier, H: RecordHandler>(
    exchanges: &[RawExchange],
    interceptor: &mut Interceptor<N>,
    listener: &mut BridgeListener,
    handler: &mut H,
) -> InterceptStats {
    let mut stats = InterceptStats::default();
    for exchange in exchanges {
        stats.record(interceptor.observe(exchange));
        listener.drain(|record| handler.handle(record));
    }
    stats
}

/// Replay a capture file.
fn cmd_replay(
    config: &AppConfig,
    capture: &Path,
    dry_run: bool,
    format: OutputFormat,
) -> domain::Result<()> {
    let exchanges = read_capture(capture)?;

    let (bridge, mut listener) = channel();
    for kind in APPLIED_KINDS {
        listener.subscribe(kind);
    }
    let mut interceptor = Interceptor::new(bridge, TerminalNotifier, config.notice_cooldown());

    if dry_run {
        let mut collected = CollectingHandler::default();
        let stats = replay_into(&exchanges, &mut interceptor, &mut listener, &mut collected);
        print_records(&collected.records, format)?;
        println!();
        println!("{}", format_replay_stats(&stats, &ApplyStats::default()));
        return Ok(());
    }

    let store = LocalStore::open(&config.store_db_path())?;
    let mut applier = StoreApplier::new(&store);
    let stats = replay_into(&exchanges, &mut interceptor, &mut listener, &mut applier);

    println!("{}", format_replay_stats(&stats, &applier.stats()));
    Ok(())
}

/// Run a library scan from recorded material.
fn cmd_scan(
    config: &AppConfig,
    dom_path: &Path,
    capture: &Path,
    dry_run: bool,
    format: OutputFormat,
) -> domain::Result<()> {
    let dom = read_dom_snapshot(dom_path)?;
    let exchanges = read_capture(capture)?;
    let store = open_store(config, dry_run)?;

    let (bridge, mut listener) = channel();
    for kind in APPLIED_KINDS {
        listener.subscribe(kind);
    }
    let mut interceptor = Interceptor::new(bridge, TerminalNotifier, config.notice_cooldown());
    let mut driver = ReplayDomDriver::new(&mut interceptor, exchanges, dom);
    let mut applier = StoreApplier::new(&store);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| AppError::io("Failed to start runtime", e))?;
    let outcome = runtime.block_on(run_scan(
        &mut driver,
        &mut listener,
        &mut applier,
        config.settle_delay(),
    ))?;

    let written = store.upsert_library(&outcome.merged)?;

    match format {
        OutputFormat::Json => {
            println!("{}", format_json(&outcome.merged).map_err(AppError::json_parse)?);
        }
        OutputFormat::Markdown | OutputFormat::Table => {
            println!("{}", format_merged_table(&outcome.merged));
        }
    }

    let traffic = driver.stats();
    println!();
    println!(
        "{} {} listed, {} captured, {} enriched, {} unmatched exchanges",
        "🔎".bold(),
        outcome.dom_items.to_string().cyan(),
        outcome.api_items.to_string().cyan(),
        outcome.enriched().to_string().green(),
        traffic.unmatched
    );
    if dry_run {
        println!("{} Dry run, nothing written", "∅".yellow().bold());
    } else {
        println!(
            "{} Stored {} items in {}",
            "✓".green().bold(),
            written,
            config.store_db_path().display()
        );
    }
    Ok(())
}

/// Export the store as frames.
fn cmd_export(config: &AppConfig, output: &Path, frame_size: Option<usize>) -> domain::Result<()> {
    let frame_size = frame_size.unwrap_or(config.transport.frame_size_bytes);
    config.transport.check_frame_size(frame_size)?;

    let store = LocalStore::open(&config.store_db_path())?;
    let snapshot = store.snapshot()?;
    let payload = serde_json::to_vec(&snapshot).map_err(AppError::json_parse)?;

    let writer = FrameFileWriter::create(output, config.transport.max_message_bytes)?;
    let mut sender = ChunkedSender::new(writer, frame_size);
    let frames = sender.send(&payload)?;
    sender.into_inner().finish()?;

    println!(
        "{} Exported {} items and {} prompts in {} frame(s) to {}",
        "✓".green().bold(),
        snapshot.items.len(),
        snapshot.prompts.len(),
        frames,
        output.display()
    );
    Ok(())
}

/// Import every complete transfer in a frame file.
fn cmd_import(config: &AppConfig, input: &Path) -> domain::Result<()> {
    let frames = read_frames(input)?;
    let store = LocalStore::open(&config.store_db_path())?;
    let report = import_frames(&store, frames)?;

    if report.pending > 0 {
        eprintln!(
            "{} {} transfer(s) incomplete, skipped",
            "⚠".yellow().bold(),
            report.pending
        );
    }
    if report.failed > 0 {
        eprintln!(
            "{} {} transfer(s) were not store snapshots, skipped",
            "⚠".yellow().bold(),
            report.failed
        );
    }
    if report.transfers == 0 {
        return Err(AppError::transport(format!(
            "no importable transfer in {}",
            input.display()
        )));
    }

    println!(
        "{} Imported {} records from {} transfer(s), {} failed",
        "✓".green().bold(),
        report.imported,
        report.transfers,
        report.failed
    );
    Ok(())
}

/// List stored library items.
fn cmd_list(config: &AppConfig, limit: usize, format: OutputFormat) -> domain::Result<()> {
    let store = LocalStore::open(&config.store_db_path())?;
    let items = store.list_library(limit)?;

    match format {
        OutputFormat::Json => println!("{}", format_json(&items).map_err(AppError::json_parse)?),
        OutputFormat::Markdown | OutputFormat::Table => println!("{}", format_stored_table(&items)),
    }

    println!();
    println!("Total stored: {}", store.item_count()?);
    Ok(())
}

/// Write the default config file.
fn cmd_config_init() -> domain::Result<()> {
    let (path, created) = ensure_config_exists()?;
    if created {
        println!("{} Wrote {}", "✓".green().bold(), path.display());
    } else {
        println!("Config already exists at {}", path.display());
    }
    Ok(())
}

/// Routes panic reports through tracing. Contained decoder panics would
/// otherwise print a raw report ahead of the command output.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!("panic: {}", panic_info);
        if tracing::enabled!(tracing::Level::TRACE) {
            default_hook(panic_info);
        }
    }));
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panics_still_unwind_with_hook_installed() {
        install_panic_hook();
        let caught = std::panic::catch_unwind(|| panic!("decoder failure"));
        assert!(caught.is_err());
        let _ = std::panic::take_hook();
    }
}
