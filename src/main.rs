use anyhow::{bail, Context, Result};
use clap::Parser;
use driftwatch::cli::{Cli, Command, OutputFormat};
use driftwatch::config::Settings;
use driftwatch::output;
use driftwatch::pipeline::RunControl;
use driftwatch::service::AnomalyService;
use driftwatch::store::FileStore;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; `--debug` forces TRACE, otherwise RUST_LOG (default warn)
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Settings file first, then command-line overrides
fn load_settings(args: &Cli) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_toml(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(store) = &args.store {
        settings.store_path = store.clone();
    }
    if let Some(input) = &args.input {
        settings.input_dir = input.clone();
    }
    if let Some(catalog) = &args.catalog {
        settings.catalog_path = Some(catalog.clone());
    }
    Ok(settings)
}

/// Write replay output to a new file that resolves outside the live store
///
/// Both sides are canonicalized so `.`/`..` segments, relative paths and
/// symlinked directories cannot reach the store. The file is created with
/// `create_new`, so an existing file is never truncated.
fn write_replay_output(path: &Path, store: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let resolved_parent = parent
        .canonicalize()
        .with_context(|| format!("failed to resolve output directory {}", parent.display()))?;
    let resolved_store = store
        .canonicalize()
        .with_context(|| format!("failed to resolve store directory {}", store.display()))?;
    if resolved_parent.starts_with(&resolved_store) {
        bail!(
            "Refusing to write replay output inside the live store: {}",
            path.display()
        );
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| {
            format!(
                "failed to create {} (replay output never replaces an existing file)",
                path.display()
            )
        })?;
    file.write_all(contents.as_bytes())
        .and_then(|_| file.sync_all())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn emit(rendered: String) {
    if rendered.ends_with('\n') {
        print!("{}", rendered);
    } else {
        println!("{}", rendered);
    }
}

fn run(args: Cli, service: &AnomalyService<FileStore>, settings: &Settings) -> Result<()> {
    let format = args.format;

    match args.command {
        Command::Detect(window) => {
            let window = window.window()?;
            let report = service
                .process_window(&window, &RunControl::unbounded())
                .with_context(|| format!("failed to process window {}", window))?;
            emit(output::render_report(&report, format)?);
        }
        Command::List(list) => {
            let filter = list.to_filter()?;
            let records = service.list(&filter)?;
            emit(output::render_records(&records, format)?);
        }
        Command::Get { record_id } => {
            let record = service.get(record_id)?;
            emit(output::render_record(&record, format)?);
        }
        Command::Replay(replay) => {
            let window = replay.window.window()?;
            let mut control = RunControl::unbounded();
            if let Some(secs) = replay.timeout_secs {
                control = control.with_timeout(Duration::from_secs(secs));
            }

            let outcome = service
                .replay(&window, replay.algorithm_version.as_deref(), &control)
                .with_context(|| format!("replay of {} failed", window))?;

            if let Some(path) = &replay.output {
                write_replay_output(path, &settings.store_path, &output::replay_jsonl(&outcome)?)?;
            }
            emit(output::render_replay(&outcome, format)?);

            if let Some(divergence) = outcome.divergence() {
                bail!("{}", divergence);
            }
        }
        Command::Trust(trust) => {
            let window = trust.window()?;
            let signal = match (window, trust.hours) {
                (None, Some(hours)) => {
                    let window = driftwatch::model::TimeWindow::ending_at(chrono::Utc::now(), hours)?;
                    service.trust_signal(Some(window))?
                }
                (window, _) => service.trust_signal(window)?,
            };
            emit(output::render_trust(&signal, format)?);
        }
        Command::Stats => {
            emit(output::render_stats(&service.stats()?, format)?);
        }
        Command::Versions => {
            let active = service.catalog().active_version();
            let versions: Vec<&str> = service.catalog().versions().collect();
            match format {
                OutputFormat::Json => emit(serde_json::to_string_pretty(&serde_json::json!({
                    "active": active,
                    "versions": versions,
                }))?),
                OutputFormat::Text => {
                    for version in versions {
                        let marker = if version == active { "*" } else { " " };
                        println!("{} {}", marker, version);
                    }
                }
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing before anything can log
    init_tracing(args.debug);

    let settings = load_settings(&args)?;
    let service = AnomalyService::open(&settings).with_context(|| {
        format!(
            "failed to open anomaly store at {}",
            settings.store_path.display()
        )
    })?;

    run(args, &service, &settings)
}
