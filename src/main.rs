//! Terminal audiobook narrator.
//!
//! Loads a plain-text document, splits it into sentences and reads it aloud
//! one sentence at a time, driven by commands typed on stdin. Configuration
//! comes from `conf/config.toml` unless `--config` points elsewhere.

mod commands;

use anyhow::{Context, Result, anyhow, bail};
use narrator_core::config::load_config;
use narrator_core::document::DocumentSession;
use narrator_core::engine::{EngineEvent, PlaybackPhase};
use narrator_core::segmenter::TextToken;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

const DEFAULT_CONFIG_PATH: &str = "conf/config.toml";

struct Args {
    document: PathBuf,
    config: PathBuf,
}

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let args = parse_args(env::args().skip(1))?;
    let config = load_config(&args.config);
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        path = %args.document.display(),
        backend = %config.backend,
        level = %config.log_level,
        "Starting narrator"
    );

    let text = fs::read_to_string(&args.document)
        .with_context(|| format!("Failed to read {}", args.document.display()))?;
    let title = document_title(&args.document);
    let tokens: Vec<TextToken> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(TextToken::from)
        .collect();

    let mut session = DocumentSession::load(&title, &text, &tokens, config)
        .with_context(|| format!("Failed to load {}", args.document.display()))?;

    let stop_handle = session.engine().stop_handle();
    if let Err(err) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C; stopping playback");
        stop_handle.stop();
        std::process::exit(130);
    }) {
        warn!("Failed to install Ctrl+C signal handler: {err}");
    }

    spawn_event_printer(session.engine().subscribe());

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    commands::run_loop(&mut session, stdin.lock(), &mut stdout)?;
    session.engine().stop();
    info!("Narrator exiting");
    Ok(())
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut document = None;
    let mut config = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            let path = args
                .next()
                .ok_or_else(|| anyhow!("--config needs a path"))?;
            config = PathBuf::from(path);
        } else if document.is_none() {
            document = Some(PathBuf::from(arg));
        } else {
            bail!("Unexpected argument {arg:?}");
        }
    }
    let document =
        document.ok_or_else(|| anyhow!("Usage: narrator <path-to-text> [--config <path>]"))?;
    if !document.exists() {
        return Err(anyhow!("File not found: {}", document.display()));
    }
    Ok(Args { document, config })
}

fn document_title(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Print phase changes and errors as they happen.
fn spawn_event_printer(events: Receiver<EngineEvent>) {
    thread::spawn(move || {
        let mut last_phase = PlaybackPhase::Stopped;
        for event in events {
            let snapshot = &event.snapshot;
            match event.action {
                "error" => {
                    if let Some(err) = &snapshot.last_error {
                        println!("! {err}");
                    }
                }
                "end_of_document" => println!("(end of document)"),
                _ => {}
            }
            if snapshot.phase != last_phase {
                println!(
                    "[{}] sentence {}/{}",
                    snapshot.phase,
                    snapshot.current_index + 1,
                    snapshot.sentence_count
                );
                last_phase = snapshot.phase;
            }
        }
    });
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    if env::var_os("RUST_LOG").is_some() {
        info!("RUST_LOG is set; ignoring configured log level");
        return;
    }
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed.clone()) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        info!(%level, "Applied log level from config");
    }
}
